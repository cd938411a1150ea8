// Authentication types

use serde::{Deserialize, Serialize};

use crate::rbac::Role;

/// Access/refresh token pair
///
/// An empty `refresh_token` means none was issued.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialPair {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
}

impl CredentialPair {
    pub fn new(access_token: impl Into<String>, refresh_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            refresh_token: refresh_token.into(),
        }
    }

    pub fn has_access_token(&self) -> bool {
        !self.access_token.is_empty()
    }

    pub fn has_refresh_token(&self) -> bool {
        !self.refresh_token.is_empty()
    }
}

/// Second login factor: admins use a password, dealers their phone number
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginSecret {
    Password(String),
    Phone(String),
}

/// Login request body
#[derive(Serialize)]
pub struct LoginRequest<'a> {
    pub email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<&'a str>,
}

impl<'a> LoginRequest<'a> {
    pub fn new(email: &'a str, secret: &'a LoginSecret) -> Self {
        match secret {
            LoginSecret::Password(password) => Self {
                email,
                password: Some(password),
                phone: None,
            },
            LoginSecret::Phone(phone) => Self {
                email,
                password: None,
                phone: Some(phone),
            },
        }
    }
}

/// Login response; either token may be missing on a misbehaving backend
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    #[serde(default)]
    pub access_token: Option<String>,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Body for refresh and logout calls
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest<'a> {
    pub refresh_token: &'a str,
}

/// Refresh response; the refresh token is only present when rotated
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
}

/// Self-service registration body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest<'a> {
    pub display_name: &'a str,
    pub email: &'a str,
    pub password: &'a str,
}

/// Admin-created user body
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserRequest<'a> {
    pub display_name: &'a str,
    pub email: &'a str,
    pub roles: Vec<&'a str>,
    pub password: &'a str,
}

#[derive(Serialize)]
pub struct PasswordResetRequest<'a> {
    pub email: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResetPasswordRequest<'a> {
    pub token: &'a str,
    pub new_password: &'a str,
}

/// Profile returned by `GET /auth/me`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
}

impl UserProfile {
    /// Roles known to the permission table; unknown role names are skipped
    pub fn known_roles(&self) -> Vec<Role> {
        self.roles.iter().filter_map(|r| r.parse().ok()).collect()
    }

    /// Whether any of the user's roles grants `permission`
    pub fn can(&self, permission: &str) -> bool {
        self.known_roles()
            .into_iter()
            .any(|role| crate::rbac::can(role, permission))
    }

    /// Plain role-name check, e.g. `&["admin", "marketing"]`
    pub fn has_any_role(&self, names: &[&str]) -> bool {
        self.roles.iter().any(|r| names.contains(&r.as_str()))
    }
}

/// Body that is either bare or wrapped as `{ "data": ... }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum Envelope<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> Envelope<T> {
    pub fn into_inner(self) -> T {
        match self {
            Envelope::Wrapped { data } => data,
            Envelope::Bare(value) => value,
        }
    }
}
