// Typed passthrough endpoints
// Every call goes through `PortalHttpClient::request`, so it gets refresh-and-retry

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::Result;
use crate::http_client::{encode_component, path_segment, PortalHttpClient};

/// List envelope
///
/// The backend answers list endpoints as `{ "items": [...] }`, `{ "data": [...] }`
/// or a bare array; all three decode to the same value.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Paginated<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Wire<T> {
            Items {
                items: Vec<T>,
                #[serde(default)]
                total: Option<u64>,
            },
            Data {
                data: Vec<T>,
                #[serde(default)]
                total: Option<u64>,
            },
            Bare(Vec<T>),
        }

        Ok(match Wire::deserialize(deserializer)? {
            Wire::Items { items, total } => Paginated { items, total },
            Wire::Data { data, total } => Paginated { items: data, total },
            Wire::Bare(items) => Paginated { items, total: None },
        })
    }
}

impl<T> Paginated<T> {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LeadType {
    General,
    Prototype,
    Dealership,
    Dealer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lead {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub company: Option<String>,
    #[serde(rename = "type")]
    pub lead_type: LeadType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Dealer {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub org: Option<String>,
    #[serde(default)]
    pub contact_name: Option<String>,
    #[serde(default)]
    pub region: Option<String>,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body of `POST /dealers`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDealer<'a> {
    pub org: &'a str,
    pub contact_name: &'a str,
    pub email: &'a str,
    pub region: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FileKind {
    #[serde(rename = "NDA")]
    Nda,
    Spec,
    Report,
    Marketing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileItem {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: Option<FileKind>,
    #[serde(default)]
    pub size: Option<u64>,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPage {
    pub id: String,
    pub title: String,
    pub slug: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Body for creating or updating a content page
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentPageInput<'a> {
    pub title: &'a str,
    pub slug: &'a str,
    pub body: &'a str,
    pub status: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardStats {
    #[serde(default)]
    pub total_leads: Option<u64>,
    #[serde(default)]
    pub active_dealers: Option<u64>,
    #[serde(default)]
    pub proto30d: Option<u64>,
    #[serde(default)]
    pub downloads30d: Option<u64>,
}

#[derive(Serialize)]
struct StatusUpdate<'a> {
    status: &'a str,
}

#[derive(Serialize)]
struct VisibilityUpdate<'a> {
    vis: &'a str,
}

#[derive(Serialize)]
struct BulkDelete<'a> {
    ids: &'a [&'a str],
}

/// Sub-client for back-office resources
pub struct Resources<'a> {
    pub(crate) client: &'a PortalHttpClient,
}

impl<'a> Resources<'a> {
    async fn post_ignored<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let _: serde_json::Value = self.client.post_json(path, body).await?;
        Ok(())
    }

    async fn patch_ignored<B: Serialize + ?Sized>(&self, path: &str, body: &B) -> Result<()> {
        let _: serde_json::Value = self.client.patch_json(path, body).await?;
        Ok(())
    }

    // ── Leads ────────────────────────────────────────────────────────────

    pub async fn leads(&self) -> Result<Paginated<Lead>> {
        self.client.get_json("/leads").await
    }

    pub async fn create_lead(&self, lead: &Lead) -> Result<Lead> {
        self.client.post_json("/leads", lead).await
    }

    pub async fn update_lead(&self, id: &str, lead: &Lead) -> Result<Lead> {
        self.client
            .patch_json(&format!("/leads/{}", path_segment(id)?), lead)
            .await
    }

    pub async fn update_lead_status(&self, id: &str, status: &str) -> Result<()> {
        self.patch_ignored(
            &format!("/leads/{}/status", path_segment(id)?),
            &StatusUpdate { status },
        )
        .await
    }

    /// Turn a dealership lead into a dealer account
    pub async fn accept_dealer_lead(&self, id: &str) -> Result<()> {
        self.post_ignored(
            &format!("/leads/{}/accept-dealer", path_segment(id)?),
            &serde_json::json!({}),
        )
        .await
    }

    pub async fn delete_lead(&self, id: &str) -> Result<()> {
        self.client
            .delete(&format!("/leads/{}", path_segment(id)?))
            .await?;
        Ok(())
    }

    pub async fn bulk_delete_leads(&self, ids: &[&str]) -> Result<()> {
        self.post_ignored("/leads/bulk-delete", &BulkDelete { ids })
            .await
    }

    // ── Dealers ──────────────────────────────────────────────────────────

    pub async fn dealers(&self) -> Result<Paginated<Dealer>> {
        self.client.get_json("/dealers").await
    }

    pub async fn dealer_detail(&self, id: &str) -> Result<Dealer> {
        self.client
            .get_json(&format!("/dealers/{}/detail", path_segment(id)?))
            .await
    }

    pub async fn create_dealer(&self, dealer: &NewDealer<'_>) -> Result<Dealer> {
        self.client.post_json("/dealers", dealer).await
    }

    pub async fn approve_dealer(&self, id: &str) -> Result<()> {
        self.post_ignored(
            &format!("/dealers/{}/approve", path_segment(id)?),
            &serde_json::json!({}),
        )
        .await
    }

    pub async fn update_dealer_status(&self, id: &str, status: &str) -> Result<()> {
        self.patch_ignored(
            &format!("/dealers/{}/status", path_segment(id)?),
            &StatusUpdate { status },
        )
        .await
    }

    pub async fn delete_dealer(&self, id: &str) -> Result<()> {
        self.client
            .delete(&format!("/dealers/{}", path_segment(id)?))
            .await?;
        Ok(())
    }

    pub async fn bulk_delete_dealers(&self, ids: &[&str]) -> Result<()> {
        self.post_ignored("/dealers/bulk-delete", &BulkDelete { ids })
            .await
    }

    // ── Files ────────────────────────────────────────────────────────────

    pub async fn files(&self) -> Result<Paginated<FileItem>> {
        self.client.get_json("/files").await
    }

    /// Change who can see a file, e.g. `public` or `dealer`
    pub async fn set_file_visibility(&self, id: &str, vis: &str) -> Result<()> {
        self.patch_ignored(
            &format!("/files/{}", path_segment(id)?),
            &VisibilityUpdate { vis },
        )
        .await
    }

    pub async fn delete_file(&self, id: &str) -> Result<()> {
        self.client
            .delete(&format!("/files/{}", path_segment(id)?))
            .await?;
        Ok(())
    }

    pub async fn bulk_delete_files(&self, ids: &[&str]) -> Result<()> {
        self.post_ignored("/files/bulk-delete", &BulkDelete { ids })
            .await
    }

    // ── Products / content ───────────────────────────────────────────────

    pub async fn products(&self) -> Result<Paginated<Product>> {
        self.client.get_json("/products").await
    }

    pub async fn product(&self, slug: &str) -> Result<Product> {
        self.client
            .get_json(&format!("/products/{}", path_segment(slug)?))
            .await
    }

    pub async fn content_pages(&self, status: Option<&str>) -> Result<Paginated<ContentPage>> {
        let path = match status {
            Some(s) => format!("/content/pages?status={}", encode_component(s)),
            None => "/content/pages".to_string(),
        };
        self.client.get_json(&path).await
    }

    pub async fn create_content_page(&self, page: &ContentPageInput<'_>) -> Result<ContentPage> {
        self.client.post_json("/content/pages", page).await
    }

    pub async fn update_content_page(
        &self,
        id: &str,
        page: &ContentPageInput<'_>,
    ) -> Result<ContentPage> {
        self.client
            .patch_json(&format!("/content/pages/{}", path_segment(id)?), page)
            .await
    }

    pub async fn delete_content_page(&self, id: &str) -> Result<()> {
        self.client
            .delete(&format!("/content/pages/{}", path_segment(id)?))
            .await?;
        Ok(())
    }

    // ── Dashboard ────────────────────────────────────────────────────────

    pub async fn dashboard_stats(&self) -> Result<DashboardStats> {
        self.client.get_json("/admin/stats").await
    }
}
