use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use reqwest::Url;
use std::path::PathBuf;

/// Base URL used when none is configured or the configured one is unusable
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8080/api/v1";

// Portal Client - Command line
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// API base URL (e.g. https://example.com/api/v1)
    #[arg(short = 'b', long, env = "PORTAL_API_BASE_URL", global = true)]
    pub base_url: Option<String>,

    /// Path to the credentials SQLite database
    #[arg(short = 'd', long, env = "PORTAL_CREDENTIALS_DB", global = true)]
    pub db_file: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "warn", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "text", global = true)]
    pub log_format: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "HTTP_REQUEST_TIMEOUT", default_value = "30", global = true)]
    pub http_timeout: u64,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Log in and store the token pair
    Login {
        /// Account email
        email: String,

        /// Password (prompted for when omitted)
        #[arg(long, env = "PORTAL_PASSWORD", conflicts_with = "phone")]
        password: Option<String>,

        /// Dealer login with phone number instead of password
        #[arg(long)]
        phone: Option<String>,
    },

    /// Notify the backend and forget the stored tokens
    Logout,

    /// Show the logged-in user's profile
    Me,

    /// Send an arbitrary request relative to the base URL
    Request {
        /// HTTP method
        method: String,

        /// Path relative to the base URL, e.g. /leads
        path: String,

        /// JSON body
        #[arg(long)]
        data: Option<String>,
    },

    /// Check whether the logged-in user holds a permission
    Can {
        /// Permission name, e.g. lead.write
        permission: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Clone, Debug)]
pub struct Config {
    // API
    pub api_base_url: String,

    // Credentials
    pub credentials_db_file: PathBuf,

    // HTTP client
    pub http_max_connections: usize,
    pub http_connect_timeout: u64,
    pub http_request_timeout: u64,

    // Logging
    pub log_level: String,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration with priority: CLI > ENV > defaults
    ///
    /// `.env` must already be loaded (see `main`) so clap sees its values.
    pub fn load(args: &GlobalArgs) -> Result<Self> {
        let config = Config {
            api_base_url: normalize_base_url(args.base_url.as_deref()),

            credentials_db_file: args
                .db_file
                .as_deref()
                .map(expand_tilde)
                .unwrap_or_else(default_credentials_db),

            http_max_connections: std::env::var("HTTP_MAX_CONNECTIONS")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_connect_timeout: std::env::var("HTTP_CONNECT_TIMEOUT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(10),

            http_request_timeout: args.http_timeout,

            log_level: args.log_level.clone(),
            log_format: parse_log_format(&args.log_format),
        };

        Ok(config)
    }
}

/// Normalize a configured base URL
///
/// - empty or missing: the default local address
/// - `:8080/api/v1`: `http://localhost` is prepended
/// - no scheme: `http://` is prepended
/// - anything still unparsable: the default local address
///
/// The result never ends with `/`.
pub fn normalize_base_url(input: Option<&str>) -> String {
    let mut value = input.unwrap_or_default().trim().to_string();
    if value.is_empty() {
        return DEFAULT_API_BASE_URL.to_string();
    }

    if value.starts_with(':') {
        value = format!("http://localhost{}", value);
    }

    let lower = value.to_ascii_lowercase();
    if !lower.starts_with("http://") && !lower.starts_with("https://") {
        value = format!("http://{}", value);
    }

    match Url::parse(&value) {
        Ok(url) if url.host_str().is_some_and(|h| !h.is_empty()) => {
            value.trim_end_matches('/').to_string()
        }
        _ => {
            tracing::warn!(base_url = %value, "Invalid API base URL, using default");
            DEFAULT_API_BASE_URL.to_string()
        }
    }
}

/// Default location of the credentials database
fn default_credentials_db() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("portal-client"))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("credentials.sqlite3")
}

/// Expand tilde (~) in file paths to user's home directory
fn expand_tilde(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}

/// Parse log format from string
fn parse_log_format(s: &str) -> LogFormat {
    match s.to_lowercase().as_str() {
        "json" => LogFormat::Json,
        _ => LogFormat::Text,
    }
}
