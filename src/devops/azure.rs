//! Azure DevOps work item REST client.

use super::WorkItemClient;
use crate::config::DevOpsConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderValue};
use secrecy::{ExposeSecret, SecretString};
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_BASE_URL: &str = "https://dev.azure.com";
const API_VERSION: &str = "7.0";
const JSON_PATCH: &str = "application/json-patch+json";
const TASK_TYPE: &str = "Task";
const PARENT_LINK: &str = "System.LinkTypes.Hierarchy-Reverse";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

pub struct AzureDevOpsClient {
    http: reqwest::Client,
    base_url: String,
    organization: String,
    project: String,
}

impl AzureDevOpsClient {
    /// Build a client authenticated with the configured personal access token.
    pub fn new(config: &DevOpsConfig) -> Result<Self> {
        Self::with_base_url(config, DEFAULT_BASE_URL)
    }

    /// Same as [`new`](Self::new) against a different server root, e.g. an
    /// on-prem Azure DevOps Server.
    pub fn with_base_url(config: &DevOpsConfig, base_url: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        let mut auth = HeaderValue::from_str(basic_auth(&config.pat).expose_secret())
            .map_err(|e| Error::Config(format!("invalid Azure DevOps token: {e}")))?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(JSON_PATCH));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(REQUEST_TIMEOUT)
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            organization: config.organization.clone(),
            project: config.project.clone(),
        })
    }

    fn work_items_root(&self) -> String {
        format!(
            "{}/{}/{}/_apis/wit/workitems",
            self.base_url, self.organization, self.project
        )
    }

    /// URL for creating a work item of `work_item_type`.
    pub fn create_url(&self, work_item_type: &str) -> String {
        format!(
            "{}/${work_item_type}?api-version={API_VERSION}",
            self.work_items_root()
        )
    }

    /// URL addressing an existing work item.
    pub fn item_url(&self, id: i64) -> String {
        format!("{}/{id}?api-version={API_VERSION}", self.work_items_root())
    }
}

#[async_trait]
impl WorkItemClient for AzureDevOpsClient {
    async fn create_item(
        &self,
        title: &str,
        area_path: &str,
        iteration_path: &str,
    ) -> Result<i64> {
        let url = self.create_url(TASK_TYPE);
        let body = create_item_patch(title, area_path, iteration_path);

        let response = self
            .http
            .post(&url)
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;
        let status = response.status();

        if matches!(
            status,
            StatusCode::OK | StatusCode::CREATED | StatusCode::NON_AUTHORITATIVE_INFORMATION
        ) {
            let created: serde_json::Value = response.json().await?;
            let id = created
                .get("id")
                .and_then(serde_json::Value::as_i64)
                .ok_or_else(|| {
                    Error::External(format!("create task '{title}': response has no id"))
                })?;
            info!(task_id = id, title, "created task");
            Ok(id)
        } else {
            let text = response.text().await.unwrap_or_default();
            Err(Error::External(format!(
                "create task '{title}' failed: {status} - {}",
                truncate(&text, 200)
            )))
        }
    }

    async fn link_item(&self, child_id: i64, parent_id: i64) -> Result<()> {
        let url = self.item_url(child_id);
        let body = parent_link_patch(&self.work_items_root(), parent_id);

        let response = self
            .http
            .patch(&url)
            .body(serde_json::to_vec(&body)?)
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::OK {
            info!(task_id = child_id, story_id = parent_id, "linked task to story");
            Ok(())
        } else {
            let text = response.text().await.unwrap_or_default();
            warn!(
                task_id = child_id,
                story_id = parent_id,
                "task created but not linked, verify the story exists upstream"
            );
            Err(Error::External(format!(
                "link task #{child_id} to story #{parent_id} failed: {status} - {}",
                truncate(&text, 100)
            )))
        }
    }
}

/// JSON-patch document creating a work item with title, area and iteration.
pub fn create_item_patch(title: &str, area_path: &str, iteration_path: &str) -> serde_json::Value {
    json!([
        {"op": "add", "path": "/fields/System.Title", "value": title},
        {"op": "add", "path": "/fields/System.AreaPath", "value": area_path},
        {"op": "add", "path": "/fields/System.IterationPath", "value": iteration_path},
    ])
}

/// JSON-patch document adding a parent relation to a work item.
pub fn parent_link_patch(work_items_root: &str, parent_id: i64) -> serde_json::Value {
    json!([{
        "op": "add",
        "path": "/relations/-",
        "value": {
            "rel": PARENT_LINK,
            "url": format!("{work_items_root}/{parent_id}"),
        }
    }])
}

fn basic_auth(pat: &SecretString) -> SecretString {
    let encoded = BASE64.encode(format!(":{}", pat.expose_secret()));
    SecretString::from(format!("Basic {encoded}"))
}

fn truncate(text: &str, max_chars: usize) -> String {
    text.chars().take(max_chars).collect()
}

