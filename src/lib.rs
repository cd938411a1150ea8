// Portal Client - Library root

pub mod auth;
pub mod coalesce;
pub mod config;
pub mod dealer_portal;
pub mod error;
pub mod http_client;
pub mod rbac;
pub mod resources;

pub use auth::{AuthManager, CredentialPair, CredentialStore, LoginSecret, UserProfile};
pub use error::{AuthError, ClientError, RefreshFailure};
pub use http_client::{PortalHttpClient, RequestOptions};
pub use rbac::Role;
