use anyhow::{Context, Result};
use clap::Parser;
use dialoguer::Password;
use reqwest::Method;
use std::sync::Arc;

use portal_client::auth::{CredentialStore, LoginSecret, SqliteCredentialStore};
use portal_client::config::{CliArgs, Command, Config, LogFormat};
use portal_client::http_client::{PortalHttpClient, RequestOptions};

#[tokio::main]
async fn main() -> Result<()> {
    // .env has to be in the environment before clap reads env fallbacks
    dotenvy::dotenv().ok();

    let args = CliArgs::parse();
    let config = Config::load(&args.global)?;

    init_logging(&config);

    tracing::debug!(
        base_url = %config.api_base_url,
        credentials_db = %config.credentials_db_file.display(),
        "Configuration loaded"
    );

    let store: Arc<dyn CredentialStore> =
        Arc::new(SqliteCredentialStore::open(&config.credentials_db_file)?);
    let client = PortalHttpClient::from_config(&config, store)?;

    run(&client, args.command).await
}

fn init_logging(config: &Config) {
    let log_level = config.log_level.to_lowercase();
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(true)
        .with_line_number(true);

    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn run(client: &PortalHttpClient, command: Command) -> Result<()> {
    match command {
        Command::Login {
            email,
            password,
            phone,
        } => {
            let secret = match (phone, password) {
                (Some(phone), _) => LoginSecret::Phone(phone),
                (None, Some(password)) => LoginSecret::Password(password),
                (None, None) => LoginSecret::Password(
                    Password::new()
                        .with_prompt(format!("Password for {}", email))
                        .interact()
                        .context("Failed to read password")?,
                ),
            };

            client.login(&email, &secret).await?;
            println!("Logged in as {}", email);
        }

        Command::Logout => {
            client.logout().await;
            println!("Logged out");
        }

        Command::Me => {
            let user = client.current_user().await?;
            println!("{}", serde_json::to_string_pretty(&user)?);
        }

        Command::Request { method, path, data } => {
            let method = Method::from_bytes(method.to_uppercase().as_bytes())
                .with_context(|| format!("Invalid HTTP method: {}", method))?;
            let body = data
                .as_deref()
                .map(serde_json::from_str::<serde_json::Value>)
                .transpose()
                .context("--data is not valid JSON")?;

            let response = client
                .request(method, &path, body.as_ref(), RequestOptions::default())
                .await?;

            match response.json::<serde_json::Value>() {
                Ok(value) if !value.is_null() => {
                    println!("{}", serde_json::to_string_pretty(&value)?)
                }
                Ok(_) => {}
                Err(_) => println!("{}", response.text()),
            }
        }

        Command::Can { permission } => {
            let user = client.current_user().await?;
            let allowed = user.can(&permission);
            println!("{}", allowed);
            if !allowed {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}
