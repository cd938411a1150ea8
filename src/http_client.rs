use anyhow::{Context, Result as AnyResult};
use bytes::Bytes;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::types::{
    CreateUserRequest, Envelope, LoginRequest, LoginResponse, PasswordResetRequest,
    RefreshTokenRequest, RegisterRequest, ResetPasswordRequest,
};
use crate::auth::{AuthManager, CredentialPair, CredentialStore, LoginSecret, UserProfile};
use crate::config::Config;
use crate::dealer_portal::DealerPortal;
use crate::error::{AuthError, ClientError, Result};
use crate::resources::Resources;

const LOGIN_PATH: &str = "/auth/login";
const REFRESH_PATH: &str = "/auth/refresh";
const LOGOUT_PATH: &str = "/auth/logout";
const ME_PATH: &str = "/auth/me";
const REGISTER_PATH: &str = "/auth/register";
const PASSWORD_RESET_REQUEST_PATH: &str = "/auth/request-password-reset";
const PASSWORD_RESET_PATH: &str = "/auth/reset-password";
const USERS_PATH: &str = "/users";

/// Everything except unreserved characters is escaped, `/` included
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Per-call header overrides
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub headers: HeaderMap,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a header; invalid names or values are rejected when the request is built
    pub fn header(mut self, name: &str, value: &str) -> Result<Self> {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| ClientError::InvalidRequest(format!("header name {name:?}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ClientError::InvalidRequest(format!("header value for {name}: {e}")))?;
        self.headers.insert(name, value);
        Ok(self)
    }
}

/// One logical request, replayable once after a refresh
#[derive(Debug, Clone)]
pub struct RequestDescriptor {
    pub method: Method,
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
    /// Set when the request is replayed after a refresh; blocks further replays
    pub retried: bool,
}

impl RequestDescriptor {
    pub fn new(
        method: Method,
        path: &str,
        body: Option<serde_json::Value>,
        options: RequestOptions,
    ) -> Result<Self> {
        // Anything that parses on its own carries a scheme and would leave the base URL
        if Url::parse(path).is_ok() {
            return Err(ClientError::InvalidRequest(format!(
                "path must be relative to the base URL: {path}"
            )));
        }

        Ok(Self {
            method,
            path: path.to_string(),
            headers: options.headers,
            body,
            retried: false,
        })
    }
}

/// Successful (2xx) response
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl ApiResponse {
    /// Decode the body; an empty body decodes as JSON `null`
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        if self.body.is_empty() {
            return Ok(serde_json::from_value(serde_json::Value::Null)?);
        }
        Ok(serde_json::from_slice(&self.body)?)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// HTTP client for the portal API with transparent token refresh
pub struct PortalHttpClient {
    /// Shared HTTP client with connection pooling
    client: Client,

    /// Base URL every path is appended to, without a trailing slash
    base_url: String,

    /// Authentication manager
    auth: Arc<AuthManager>,
}

impl PortalHttpClient {
    /// Create a new HTTP client
    pub fn new(
        base_url: &str,
        store: Arc<dyn CredentialStore>,
        max_connections: usize,
        connect_timeout: u64,
        request_timeout: u64,
    ) -> AnyResult<Self> {
        let client = Client::builder()
            .pool_max_idle_per_host(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
            .timeout(Duration::from_secs(request_timeout))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        let auth = Arc::new(AuthManager::new(
            store,
            client.clone(),
            join_url(&base_url, REFRESH_PATH),
        ));

        Ok(Self {
            client,
            base_url,
            auth,
        })
    }

    /// Create a client from loaded configuration
    pub fn from_config(config: &Config, store: Arc<dyn CredentialStore>) -> AnyResult<Self> {
        Self::new(
            &config.api_base_url,
            store,
            config.http_max_connections,
            config.http_connect_timeout,
            config.http_request_timeout,
        )
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn auth(&self) -> &AuthManager {
        &self.auth
    }

    /// Whether an access token is stored
    pub fn is_authenticated(&self) -> bool {
        self.auth.is_authenticated()
    }

    /// Typed passthrough endpoints
    pub fn resources(&self) -> Resources<'_> {
        Resources { client: self }
    }

    /// Dealer portal endpoints
    pub fn dealer(&self) -> DealerPortal<'_> {
        DealerPortal { client: self }
    }

    // ── Requests ─────────────────────────────────────────────────────────

    /// Execute a request against the API
    /// Automatically handles:
    /// - bearer token attachment
    /// - 401: one coalesced refresh, then one replay
    pub async fn request<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
        options: RequestOptions,
    ) -> Result<ApiResponse> {
        let body = body.map(serde_json::to_value).transpose()?;
        let descriptor = RequestDescriptor::new(method, path, body, options)?;
        self.execute(descriptor).await
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request::<()>(Method::GET, path, None, RequestOptions::default())
            .await?
            .json()
    }

    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.request(Method::POST, path, Some(body), RequestOptions::default())
            .await?
            .json()
    }

    pub async fn patch_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T> {
        self.request(Method::PATCH, path, Some(body), RequestOptions::default())
            .await?
            .json()
    }

    pub async fn delete(&self, path: &str) -> Result<ApiResponse> {
        self.request::<()>(Method::DELETE, path, None, RequestOptions::default())
            .await
    }

    /// Refresh-and-retry loop around a single attempt
    async fn execute(&self, mut request: RequestDescriptor) -> Result<ApiResponse> {
        loop {
            let token = self.auth.access_token();

            match self.send_once(&request, token.as_deref()).await {
                Err(ClientError::Unauthorized {
                    reason: AuthError::Expired,
                    body,
                }) => {
                    if request.retried {
                        tracing::warn!(
                            method = %request.method,
                            path = %request.path,
                            "Received 401 after refresh, giving up"
                        );
                        return Err(ClientError::Unauthorized {
                            reason: AuthError::Invalid,
                            body,
                        });
                    }

                    tracing::debug!(
                        method = %request.method,
                        path = %request.path,
                        "Received 401, attempting token refresh"
                    );

                    if let Err(e) = self.auth.recover_from_unauthorized(token.as_deref()).await {
                        tracing::warn!(
                            error = %e,
                            path = %request.path,
                            "Token refresh failed, returning original 401"
                        );
                        return Err(ClientError::Unauthorized {
                            reason: AuthError::Invalid,
                            body,
                        });
                    }

                    request.retried = true;
                }
                other => return other,
            }
        }
    }

    /// One attempt, no refresh
    async fn send_once(
        &self,
        request: &RequestDescriptor,
        token: Option<&str>,
    ) -> Result<ApiResponse> {
        let url = join_url(&self.base_url, &request.path);

        let mut headers = request.headers.clone();
        if let Some(token) = token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ClientError::InvalidRequest(format!("access token: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }

        tracing::debug!(
            method = %request.method,
            url = %url,
            authenticated = token.is_some(),
            retried = request.retried,
            "Sending HTTP request"
        );

        let mut builder = self
            .client
            .request(request.method.clone(), &url)
            .headers(headers);
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(|e| {
            tracing::warn!(
                error = %e,
                timeout = e.is_timeout(),
                connect = e.is_connect(),
                url = %url,
                "HTTP request error"
            );
            ClientError::Network(e)
        })?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await.map_err(ClientError::Network)?;

        tracing::debug!(status = %status, "Received HTTP response");

        if status.is_success() {
            return Ok(ApiResponse {
                status,
                headers,
                body,
            });
        }

        let body = String::from_utf8_lossy(&body).into_owned();
        if status == StatusCode::UNAUTHORIZED {
            return Err(ClientError::Unauthorized {
                reason: AuthError::Expired,
                body,
            });
        }

        tracing::debug!(status = status.as_u16(), body = %body, "Error response");
        Err(ClientError::Http {
            status: status.as_u16(),
            body,
        })
    }

    // ── Auth ─────────────────────────────────────────────────────────────

    /// Log in and store the returned pair, replacing any prior one.
    ///
    /// A 401 here means wrong credentials; it never triggers a refresh.
    pub async fn login(&self, email: &str, secret: &LoginSecret) -> Result<CredentialPair> {
        self.login_at(LOGIN_PATH, email, secret).await
    }

    pub(crate) async fn login_at(
        &self,
        path: &str,
        email: &str,
        secret: &LoginSecret,
    ) -> Result<CredentialPair> {
        let body = serde_json::to_value(LoginRequest::new(email, secret))?;
        let request =
            RequestDescriptor::new(Method::POST, path, Some(body), RequestOptions::default())?;

        let response = self
            .send_once(&request, None)
            .await
            .map_err(|e| match e {
                ClientError::Unauthorized { body, .. } => ClientError::Unauthorized {
                    reason: AuthError::Invalid,
                    body,
                },
                other => other,
            })?;

        let data: LoginResponse = response.json()?;
        let access_token = data
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| {
                ClientError::InvalidResponse("login response does not contain accessToken".into())
            })?;

        let pair = CredentialPair {
            access_token,
            refresh_token: data.refresh_token.unwrap_or_default(),
        };
        self.auth.store_credentials(&pair);

        tracing::info!(email = %email, "Logged in");
        Ok(pair)
    }

    /// Best-effort backend logout, then unconditionally forget both tokens
    pub async fn logout(&self) {
        if let Some(refresh_token) = self.auth.refresh_token() {
            if let Err(e) = self.notify_logout(&refresh_token).await {
                tracing::debug!(error = %e, "Logout notification failed, ignoring");
            }
        }

        self.auth.clear();
        tracing::info!("Logged out");
    }

    async fn notify_logout(&self, refresh_token: &str) -> Result<ApiResponse> {
        let body = serde_json::to_value(RefreshTokenRequest { refresh_token })?;
        let request =
            RequestDescriptor::new(Method::POST, LOGOUT_PATH, Some(body), RequestOptions::default())?;
        let token = self.auth.access_token();
        self.send_once(&request, token.as_deref()).await
    }

    /// Profile of the logged-in user
    pub async fn current_user(&self) -> Result<UserProfile> {
        let envelope: Envelope<UserProfile> = self.get_json(ME_PATH).await?;
        Ok(envelope.into_inner())
    }

    pub async fn register(&self, display_name: &str, email: &str, password: &str) -> Result<()> {
        let body = RegisterRequest {
            display_name,
            email,
            password,
        };
        self.request(Method::POST, REGISTER_PATH, Some(&body), RequestOptions::default())
            .await?;
        Ok(())
    }

    pub async fn create_admin_user(
        &self,
        display_name: &str,
        email: &str,
        password: &str,
    ) -> Result<()> {
        let body = CreateUserRequest {
            display_name,
            email,
            roles: vec!["admin"],
            password,
        };
        self.request(Method::POST, USERS_PATH, Some(&body), RequestOptions::default())
            .await?;
        Ok(())
    }

    pub async fn request_password_reset(&self, email: &str) -> Result<()> {
        self.request(
            Method::POST,
            PASSWORD_RESET_REQUEST_PATH,
            Some(&PasswordResetRequest { email }),
            RequestOptions::default(),
        )
        .await?;
        Ok(())
    }

    pub async fn reset_password(&self, token: &str, new_password: &str) -> Result<()> {
        self.request(
            Method::POST,
            PASSWORD_RESET_PATH,
            Some(&ResetPasswordRequest {
                token,
                new_password,
            }),
            RequestOptions::default(),
        )
        .await?;
        Ok(())
    }
}

/// Percent-encode a query value
pub fn encode_component(value: &str) -> String {
    utf8_percent_encode(value, COMPONENT).to_string()
}

/// Percent-encode an id for use as one path segment
///
/// Empty and dot segments are refused: URL parsing would collapse them and
/// the request would land on a different resource.
pub fn path_segment(value: &str) -> Result<String> {
    if matches!(value, "" | "." | "..") {
        return Err(ClientError::InvalidRequest(format!(
            "invalid path segment: {value:?}"
        )));
    }
    Ok(encode_component(value))
}

/// Append `path` to `base`, with exactly one slash between them
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
