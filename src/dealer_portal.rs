// Dealer portal endpoints
// Same transport as the back office: bearer token, coalesced refresh, one replay

use serde::{Deserialize, Serialize};

use crate::auth::{CredentialPair, LoginSecret};
use crate::error::Result;
use crate::http_client::{encode_component, PortalHttpClient};
use crate::resources::Paginated;

const DEALER_LOGIN_PATH: &str = "/dealer/login";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingEvent {
    pub id: String,
    pub title: String,
    /// ISO timestamp or `DD-MM-YYYY[ HH:MM]`, as entered by staff
    #[serde(default)]
    pub datetime: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
    /// Only set on past sessions the dealer attended
    #[serde(default)]
    pub certificate: Option<String>,
}

/// Response of `GET /dealer/training`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSchedule {
    #[serde(default)]
    pub upcoming: Vec<TrainingEvent>,
    #[serde(default)]
    pub past: Vec<TrainingEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerFile {
    pub id: String,
    pub name: String,
    #[serde(default, rename = "type")]
    pub file_type: Option<String>,
    #[serde(default)]
    pub href: Option<String>,
    #[serde(default)]
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UploadCategory {
    #[serde(rename = "Testing Report")]
    TestingReport,
    Marketing,
    Certification,
}

/// Body of `POST /dealer/upload`; file content travels separately
#[derive(Debug, Clone, Serialize)]
pub struct UploadRequest<'a> {
    pub name: &'a str,
    pub category: UploadCategory,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealerUpload {
    pub name: String,
    #[serde(default)]
    pub category: Option<UploadCategory>,
    #[serde(default)]
    pub created_at: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Application to become a dealer
#[derive(Debug, Clone, Default)]
pub struct DealerApplication<'a> {
    pub name: &'a str,
    pub email: &'a str,
    pub phone: Option<&'a str>,
    pub company: Option<&'a str>,
    pub country: Option<&'a str>,
    pub message: Option<&'a str>,
}

/// Applications are filed as new leads of type `Dealer`
#[derive(Serialize)]
struct ApplicationBody<'a> {
    name: &'a str,
    email: &'a str,
    phone: &'a str,
    company: &'a str,
    country: &'a str,
    #[serde(rename = "type")]
    lead_type: &'static str,
    message: &'a str,
    tags: [&'static str; 0],
    status: &'static str,
}

impl<'a> From<&DealerApplication<'a>> for ApplicationBody<'a> {
    fn from(app: &DealerApplication<'a>) -> Self {
        Self {
            name: app.name,
            email: app.email,
            phone: app.phone.unwrap_or_default(),
            company: app.company.unwrap_or_default(),
            country: app.country.unwrap_or_default(),
            lead_type: "Dealer",
            message: app.message.unwrap_or_default(),
            tags: [],
            status: "New",
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrainingRegistration<'a> {
    event_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    note: Option<&'a str>,
}

/// Sub-client for the dealer portal
pub struct DealerPortal<'a> {
    pub(crate) client: &'a PortalHttpClient,
}

impl<'a> DealerPortal<'a> {
    /// Dealer sign-in by email and phone; stores the returned pair like `login`
    pub async fn login(&self, email: &str, phone: &str) -> Result<CredentialPair> {
        self.client
            .login_at(
                DEALER_LOGIN_PATH,
                email,
                &LoginSecret::Phone(phone.to_string()),
            )
            .await
    }

    pub async fn apply(&self, application: &DealerApplication<'_>) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .post_json("/dealer/apply", &ApplicationBody::from(application))
            .await?;
        Ok(())
    }

    pub async fn training(&self) -> Result<TrainingSchedule> {
        self.client.get_json("/dealer/training").await
    }

    pub async fn register_training(&self, event_id: &str, note: Option<&str>) -> Result<()> {
        let _: serde_json::Value = self
            .client
            .post_json(
                "/dealer/training/register",
                &TrainingRegistration { event_id, note },
            )
            .await?;
        Ok(())
    }

    /// Files shared with dealers, optionally filtered by type (`pdf`, `zip`, ...)
    pub async fn files(&self, file_type: Option<&str>) -> Result<Paginated<DealerFile>> {
        let path = match file_type {
            Some(t) => format!("/dealer/files?type={}", encode_component(t)),
            None => "/dealer/files".to_string(),
        };
        self.client.get_json(&path).await
    }

    pub async fn upload(&self, upload: &UploadRequest<'_>) -> Result<DealerUpload> {
        self.client.post_json("/dealer/upload", upload).await
    }

    pub async fn uploads(&self) -> Result<Paginated<DealerUpload>> {
        self.client.get_json("/dealer/uploads").await
    }
}
