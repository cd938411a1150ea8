use futures::FutureExt;
use reqwest::Client;
use std::sync::Arc;

use super::refresh;
use super::store::CredentialStore;
use super::types::CredentialPair;
use crate::coalesce::{Coalescer, Start};
use crate::error::RefreshFailure;

/// Authentication manager
/// Owns the credential store and the single in-flight token refresh
pub struct AuthManager {
    /// Where the token pair lives
    store: Arc<dyn CredentialStore>,

    /// HTTP client for refresh requests
    client: Client,

    /// Absolute URL of the refresh endpoint
    refresh_url: String,

    /// At most one refresh in flight
    refreshes: Coalescer<(), RefreshFailure>,
}

impl AuthManager {
    pub fn new(store: Arc<dyn CredentialStore>, client: Client, refresh_url: String) -> Self {
        Self {
            store,
            client,
            refresh_url,
            refreshes: Coalescer::new(),
        }
    }

    /// Current access token, if any
    pub fn access_token(&self) -> Option<String> {
        self.store
            .get()
            .filter(CredentialPair::has_access_token)
            .map(|pair| pair.access_token)
    }

    /// Current refresh token, if any
    pub fn refresh_token(&self) -> Option<String> {
        self.store
            .get()
            .filter(CredentialPair::has_refresh_token)
            .map(|pair| pair.refresh_token)
    }

    pub fn credentials(&self) -> Option<CredentialPair> {
        self.store.get()
    }

    /// Replace the stored pair
    pub fn store_credentials(&self, pair: &CredentialPair) {
        self.store.set(pair);
    }

    /// Forget both tokens
    pub fn clear(&self) {
        self.store.clear();
    }

    pub fn is_authenticated(&self) -> bool {
        self.access_token().is_some()
    }

    /// Whether a refresh is currently outstanding
    pub fn is_refreshing(&self) -> bool {
        self.refreshes.is_in_flight()
    }

    /// Obtain a usable access token after the backend rejected `rejected`.
    ///
    /// Joins the refresh already in flight if there is one. Otherwise, when
    /// the stored access token no longer matches the rejected one, another
    /// caller has already rotated the pair and nothing is sent. With no
    /// refresh token stored, credentials are cleared and no call is made.
    /// Any refresh failure clears both tokens, unless a login or logout
    /// replaced them in the meantime; a successful refresh is likewise
    /// discarded in that case and reported as `Superseded`.
    pub async fn recover_from_unauthorized(
        &self,
        rejected: Option<&str>,
    ) -> Result<(), RefreshFailure> {
        let pending = self.refreshes.attach(|| {
            let current = self.store.get();

            if let Some(pair) = current.as_ref() {
                if pair.has_access_token() && rejected != Some(pair.access_token.as_str()) {
                    tracing::debug!("Access token already rotated by a concurrent refresh");
                    return Start::Skip(Ok(()));
                }
            }

            let refresh_token = match current {
                Some(pair) if pair.has_refresh_token() => pair.refresh_token,
                _ => {
                    tracing::warn!("Received 401 with no refresh token stored");
                    self.store.clear();
                    return Start::Skip(Err(RefreshFailure::NoRefreshToken));
                }
            };

            let store = Arc::clone(&self.store);
            let client = self.client.clone();
            let url = self.refresh_url.clone();

            Start::Run(
                async move {
                    // Writes only land if the session that was refreshed is still stored
                    match refresh::refresh_credentials(&client, &url, &refresh_token).await {
                        Ok(pair) => {
                            if store.replace_if(&refresh_token, &pair) {
                                Ok(())
                            } else {
                                tracing::warn!("Session changed during refresh, discarding new tokens");
                                Err(RefreshFailure::Superseded)
                            }
                        }
                        Err(e) => {
                            if store.clear_if(&refresh_token) {
                                tracing::error!(error = %e, "Token refresh failed, cleared credentials");
                            } else {
                                tracing::warn!(error = %e, "Token refresh failed after the session changed");
                            }
                            Err(e)
                        }
                    }
                }
                .boxed(),
            )
        });

        if pending.is_joined() {
            tracing::debug!("Awaiting refresh already in flight");
        }

        pending.wait().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::store::MemoryCredentialStore;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn manager_with(store: Arc<MemoryCredentialStore>, refresh_url: String) -> AuthManager {
        AuthManager::new(store, Client::new(), refresh_url)
    }

    #[tokio::test]
    async fn test_no_refresh_token_short_circuits() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "A1", "",
        )));
        let manager = manager_with(store.clone(), format!("{}/auth/refresh", server.url()));

        let err = manager
            .recover_from_unauthorized(Some("A1"))
            .await
            .unwrap_err();

        mock.assert_async().await;
        assert_eq!(err, RefreshFailure::NoRefreshToken);
        assert!(store.get().is_none());
        assert!(!manager.is_refreshing());
    }

    #[tokio::test]
    async fn test_refresh_stores_rotated_pair() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .match_body(Matcher::Json(json!({"refreshToken": "R1"})))
            .with_status(200)
            .with_body(r#"{"accessToken":"A2","refreshToken":"R2"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "A1", "R1",
        )));
        let manager = manager_with(store.clone(), format!("{}/auth/refresh", server.url()));

        tokio_test::assert_ok!(manager.recover_from_unauthorized(Some("A1")).await);

        mock.assert_async().await;
        assert_eq!(store.get(), Some(CredentialPair::new("A2", "R2")));
        assert_eq!(manager.access_token().as_deref(), Some("A2"));
        assert_eq!(manager.refresh_token().as_deref(), Some("R2"));
    }

    #[tokio::test]
    async fn test_stale_rejection_skips_refresh() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .expect(0)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "A2", "R2",
        )));
        let manager = manager_with(store.clone(), format!("{}/auth/refresh", server.url()));

        // A1 was rejected, but A2 is already stored
        tokio_test::assert_ok!(manager.recover_from_unauthorized(Some("A1")).await);

        mock.assert_async().await;
        assert_eq!(store.get(), Some(CredentialPair::new("A2", "R2")));
    }

    #[tokio::test]
    async fn test_network_failure_clears_credentials() {
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "A1", "R1",
        )));
        let manager = manager_with(store.clone(), "http://127.0.0.1:1/auth/refresh".to_string());

        let err = manager
            .recover_from_unauthorized(Some("A1"))
            .await
            .unwrap_err();

        assert!(matches!(err, RefreshFailure::Network(_)));
        assert!(store.get().is_none());
        assert!(!manager.is_authenticated());
    }

    #[tokio::test]
    async fn test_logout_during_refresh_discards_new_pair() {
        let mut server = Server::new_async().await;
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "A1", "R1",
        )));

        // The session ends while the backend is still answering the refresh
        let during = store.clone();
        server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body_from_request(move |_| {
                during.clear();
                br#"{"accessToken":"A2","refreshToken":"R2"}"#.to_vec()
            })
            .create_async()
            .await;

        let manager = manager_with(store.clone(), format!("{}/auth/refresh", server.url()));

        let err = manager
            .recover_from_unauthorized(Some("A1"))
            .await
            .unwrap_err();

        assert_eq!(err, RefreshFailure::Superseded);
        assert!(store.get().is_none());
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_newer_login() {
        let mut server = Server::new_async().await;
        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "A1", "R1",
        )));

        let during = store.clone();
        server
            .mock("POST", "/auth/refresh")
            .with_status(500)
            .with_body_from_request(move |_| {
                during.set(&CredentialPair::new("X", "Y"));
                b"upstream down".to_vec()
            })
            .create_async()
            .await;

        let manager = manager_with(store.clone(), format!("{}/auth/refresh", server.url()));

        let err = manager
            .recover_from_unauthorized(Some("A1"))
            .await
            .unwrap_err();

        assert_eq!(err, RefreshFailure::Rejected { status: 500 });
        assert_eq!(store.get(), Some(CredentialPair::new("X", "Y")));
    }

    #[tokio::test]
    async fn test_concurrent_recoveries_share_one_refresh() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/auth/refresh")
            .with_status(200)
            .with_body(r#"{"accessToken":"A2","refreshToken":"R2"}"#)
            .expect(1)
            .create_async()
            .await;

        let store = Arc::new(MemoryCredentialStore::with_pair(CredentialPair::new(
            "A1", "R1",
        )));
        let manager = manager_with(store.clone(), format!("{}/auth/refresh", server.url()));

        let results = futures::future::join_all(
            (0..8).map(|_| manager.recover_from_unauthorized(Some("A1"))),
        )
        .await;

        mock.assert_async().await;
        assert!(results.iter().all(Result::is_ok));
        assert_eq!(store.get(), Some(CredentialPair::new("A2", "R2")));
    }
}
