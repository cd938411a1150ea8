// Token refresh call

use reqwest::Client;

use super::types::{CredentialPair, RefreshResponse, RefreshTokenRequest};
use crate::error::RefreshFailure;

/// Exchange `refresh_token` for a new pair.
///
/// A response without a rotated refresh token keeps the one that was sent.
pub async fn refresh_credentials(
    client: &Client,
    url: &str,
    refresh_token: &str,
) -> Result<CredentialPair, RefreshFailure> {
    tracing::info!("Refreshing access token...");

    let response = client
        .post(url)
        .json(&RefreshTokenRequest { refresh_token })
        .send()
        .await
        .map_err(|e| {
            tracing::warn!(error = %e, timeout = e.is_timeout(), "Refresh request failed");
            RefreshFailure::Network(e.to_string())
        })?;

    let status = response.status();
    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_default();
        tracing::warn!(
            status = status.as_u16(),
            body = %error_text,
            "Refresh rejected"
        );
        return Err(RefreshFailure::Rejected {
            status: status.as_u16(),
        });
    }

    let body = response.bytes().await.map_err(|e| {
        tracing::warn!(error = %e, "Failed to read refresh response");
        RefreshFailure::Network(e.to_string())
    })?;

    let data: RefreshResponse = serde_json::from_slice(&body).map_err(|e| {
        tracing::warn!(error = %e, "Malformed refresh response");
        RefreshFailure::InvalidResponse(e.to_string())
    })?;

    if data.access_token.is_empty() {
        return Err(RefreshFailure::MissingAccessToken);
    }

    let rotated = data.refresh_token.as_deref().is_some_and(|t| !t.is_empty());
    tracing::info!(rotated, "Token refreshed");

    Ok(CredentialPair {
        access_token: data.access_token,
        refresh_token: match data.refresh_token {
            Some(next) if !next.is_empty() => next,
            _ => refresh_token.to_string(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    #[tokio::test]
    async fn test_refresh_with_rotation() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .match_body(Matcher::Json(json!({"refreshToken": "R1"})))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"accessToken":"A2","refreshToken":"R2"}"#)
            .expect(1)
            .create_async()
            .await;

        let url = format!("{}/auth/refresh", server.url());
        let pair = refresh_credentials(&Client::new(), &url, "R1")
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(pair, CredentialPair::new("A2", "R2"));
    }

    #[tokio::test]
    async fn test_refresh_without_rotation_keeps_token() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken":"A2"}"#)
            .create_async()
            .await;

        let url = format!("{}/auth/refresh", server.url());
        let pair = refresh_credentials(&Client::new(), &url, "R1")
            .await
            .unwrap();
        assert_eq!(pair, CredentialPair::new("A2", "R1"));
    }

    #[tokio::test]
    async fn test_refresh_rejected() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(401)
            .with_body("refresh token revoked")
            .create_async()
            .await;

        let url = format!("{}/auth/refresh", server.url());
        let err = refresh_credentials(&Client::new(), &url, "R1")
            .await
            .unwrap_err();
        assert_eq!(err, RefreshFailure::Rejected { status: 401 });
    }

    #[tokio::test]
    async fn test_refresh_missing_access_token() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"refreshToken":"R2"}"#)
            .create_async()
            .await;

        let url = format!("{}/auth/refresh", server.url());
        let err = refresh_credentials(&Client::new(), &url, "R1")
            .await
            .unwrap_err();
        assert_eq!(err, RefreshFailure::MissingAccessToken);
    }

    #[tokio::test]
    async fn test_refresh_malformed_body() {
        let mut server = Server::new_async().await;
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body("<html>maintenance</html>")
            .create_async()
            .await;

        let url = format!("{}/auth/refresh", server.url());
        let err = refresh_credentials(&Client::new(), &url, "R1")
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshFailure::InvalidResponse(_)));
    }

    #[tokio::test]
    async fn test_refresh_connection_refused() {
        let err = refresh_credentials(&Client::new(), "http://127.0.0.1:1/auth/refresh", "R1")
            .await
            .unwrap_err();
        assert!(matches!(err, RefreshFailure::Network(_)));
    }
}
