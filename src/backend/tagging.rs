//! vSphere Automation tagging REST client (`/api/cis/tagging`).
//!
//! Tagging lives outside the VI/JSON API and has its own session, opened
//! with basic auth on `POST /api/session`.

use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde_json::json;

use super::RemoteObjectRef;
use super::vsphere::{ConnectOptions, SESSION_HEADER};
use crate::error::VmcliError;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Tag {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Tag listing and attachment, so handlers can run against a fake.
#[allow(async_fn_in_trait)]
pub trait Tagging {
    async fn list_tags(&self) -> Result<Vec<Tag>, VmcliError>;
    async fn attach(&self, tag: &Tag, vm: &RemoteObjectRef) -> Result<(), VmcliError>;
}

pub struct TaggingClient {
    http: Client,
    base: String,
    session: String,
}

impl TaggingClient {
    pub async fn connect(options: &ConnectOptions) -> Result<Self, VmcliError> {
        let http = options.http_client()?;
        let base = format!("https://{}/api", options.host);
        let connection_error = |message: String| VmcliError::Connection {
            host: options.host.clone(),
            message,
        };

        let response = http
            .post(format!("{base}/session"))
            .basic_auth(&options.username, Some(&options.password))
            .send()
            .await
            .map_err(|e| connection_error(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(connection_error(format!(
                "tagging session refused with HTTP {status}"
            )));
        }
        let session: String = response
            .json()
            .await
            .map_err(|e| connection_error(e.to_string()))?;

        Ok(Self {
            http,
            base,
            session,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.http
            .request(method, format!("{}{path}", self.base))
            .header(SESSION_HEADER, &self.session)
    }

    async fn send(&self, context: &str, request: RequestBuilder) -> Result<reqwest::Response, VmcliError> {
        let response = request.send().await.map_err(|e| VmcliError::Http {
            context: context.to_string(),
            source: e,
        })?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(VmcliError::Api {
            method: context.to_string(),
            fault: None,
            message: format!("HTTP {status}: {}", body.trim()),
        })
    }

    pub async fn logout(&self) -> Result<(), VmcliError> {
        self.send("logout", self.request(Method::DELETE, "/session"))
            .await?;
        Ok(())
    }
}

impl Tagging for TaggingClient {
    async fn list_tags(&self) -> Result<Vec<Tag>, VmcliError> {
        let ids: Vec<String> = self
            .send("list tags", self.request(Method::GET, "/cis/tagging/tag"))
            .await?
            .json()
            .await
            .map_err(|e| VmcliError::Http {
                context: "list tags".into(),
                source: e,
            })?;

        let mut tags = Vec::with_capacity(ids.len());
        for id in ids {
            let path = format!("/cis/tagging/tag/{id}");
            let tag: Tag = self
                .send("get tag", self.request(Method::GET, &path))
                .await?
                .json()
                .await
                .map_err(|e| VmcliError::Http {
                    context: format!("tag {id}"),
                    source: e,
                })?;
            tags.push(tag);
        }
        Ok(tags)
    }

    async fn attach(&self, tag: &Tag, vm: &RemoteObjectRef) -> Result<(), VmcliError> {
        let path = format!("/cis/tagging/tag-association/{}?action=attach", tag.id);
        let body = json!({ "object_id": { "type": vm.moref.kind, "id": vm.moref.value } });
        self.send("attach tag", self.request(Method::POST, &path).json(&body))
            .await?;
        tracing::debug!(tag = %tag.name, vm = %vm.name, "tag attached");
        Ok(())
    }
}

/// Split a `a,b,c` tag list, dropping empty entries.
pub fn split_tags(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Pick the tags named in `wanted`. Every name must exist.
pub fn select_tags(available: &[Tag], wanted: &[String]) -> Result<Vec<Tag>, VmcliError> {
    let missing: Vec<&str> = wanted
        .iter()
        .filter(|name| !available.iter().any(|t| &t.name == *name))
        .map(String::as_str)
        .collect();
    if !missing.is_empty() {
        return Err(VmcliError::Validation {
            message: format!("tag(s) not found: {}", missing.join(", ")),
        });
    }
    Ok(available
        .iter()
        .filter(|t| wanted.contains(&t.name))
        .cloned()
        .collect())
}
