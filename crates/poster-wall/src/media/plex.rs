use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder};
use tracing::debug;

use super::wire::JsonEnvelope;
use super::{LibraryPage, LibrarySection, MediaError, MediaServer, UpstreamImage};
use crate::config::MediaServerConfig;

const TOKEN_HEADER: &str = "X-Plex-Token";

/// HTTP client for a Plex-compatible media server.
#[derive(Debug, Clone)]
pub struct PlexClient {
    http: Client,
    base_url: String,
    token: Option<String>,
}

impl PlexClient {
    pub fn new(config: &MediaServerConfig) -> Result<Self, MediaError> {
        let http = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            base_url: config.url.trim_end_matches('/').to_string(),
            token: config.token.clone().filter(|t| !t.is_empty()),
        })
    }

    fn request(&self, path: &str) -> RequestBuilder {
        let req = self.http.get(format!("{}{}", self.base_url, path));
        match &self.token {
            Some(token) => req.header(TOKEN_HEADER, token),
            None => req,
        }
    }

    async fn send_checked(
        &self,
        req: RequestBuilder,
        path: &str,
    ) -> Result<reqwest::Response, MediaError> {
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(MediaError::Status {
                status: status.as_u16(),
                path: path.to_string(),
            });
        }
        Ok(resp)
    }

    async fn get_json(&self, req: RequestBuilder, path: &str) -> Result<JsonEnvelope, MediaError> {
        let body = self
            .send_checked(req.header(ACCEPT, "application/json"), path)
            .await?
            .text()
            .await?;
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MediaServer for PlexClient {
    async fn session_status(&self) -> Result<String, MediaError> {
        let path = "/status/sessions";
        let resp = self
            .send_checked(self.request(path).header(ACCEPT, "application/json"), path)
            .await?;
        Ok(resp.text().await?)
    }

    async fn libraries(&self) -> Result<Vec<LibrarySection>, MediaError> {
        let path = "/library/sections";
        let envelope = self.get_json(self.request(path), path).await?;
        Ok(envelope
            .container
            .directories
            .into_iter()
            .map(|dir| LibrarySection {
                key: dir.key,
                kind: dir.kind,
                title: dir.title,
            })
            .collect())
    }

    async fn library_page(
        &self,
        section: &LibrarySection,
        offset: u64,
        size: u64,
    ) -> Result<LibraryPage, MediaError> {
        let path = format!("/library/sections/{}/all", section.key);
        let req = self.request(&path).query(&[
            ("X-Plex-Container-Start", offset.to_string()),
            ("X-Plex-Container-Size", size.to_string()),
        ]);
        let envelope = self.get_json(req, &path).await?;
        let container = envelope.container;
        debug!(
            section = %section.title,
            offset,
            size,
            returned = container.metadata.len(),
            total = container.total_size,
            "library page fetched"
        );
        Ok(LibraryPage {
            total_size: container.total_size,
            items: container
                .metadata
                .into_iter()
                .filter_map(|meta| meta.into_item())
                .collect(),
        })
    }

    async fn image(&self, path: &str) -> Result<UpstreamImage, MediaError> {
        let resp = self.send_checked(self.request(path), path).await?;
        let content_type = resp
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let bytes = resp.bytes().await?;
        Ok(UpstreamImage {
            bytes,
            content_type,
        })
    }
}
