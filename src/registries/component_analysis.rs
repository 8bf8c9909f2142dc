//! Client for the component-analysis metadata service

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode, Url};

use super::http_client::create_shared_client;
use super::{Metadata, MetadataSource};
use crate::config::ServerConfig;
use crate::error::LookupError;
use crate::file_types::Ecosystem;

/// Looks up `{server}/component-analyses/{ecosystem}/{name}/{version}`
pub struct ComponentAnalysisClient {
    client: Arc<Client>,
    server: ServerConfig,
}

impl ComponentAnalysisClient {
    pub fn new(server: ServerConfig) -> anyhow::Result<Self> {
        Ok(Self::with_client(create_shared_client()?, server))
    }

    /// Create a client reusing an existing HTTP client
    pub fn with_client(client: Arc<Client>, server: ServerConfig) -> Self {
        Self { client, server }
    }

    /// Get the underlying HTTP client
    pub fn http_client(&self) -> Arc<Client> {
        Arc::clone(&self.client)
    }

    /// Request URL for one lookup. Path segments and the user key are
    /// percent-encoded. With a user key the trailing slash is dropped in
    /// favour of the query parameter.
    fn lookup_url(
        &self,
        base: &str,
        ecosystem: Ecosystem,
        name: &str,
        version: &str,
    ) -> Result<Url, LookupError> {
        let invalid = || LookupError::InvalidServerUrl(base.to_string());
        let mut url = Url::parse(base.trim()).map_err(|_| invalid())?;
        {
            let mut segments = url.path_segments_mut().map_err(|_| invalid())?;
            segments
                .pop_if_empty()
                .extend(["component-analyses", ecosystem.as_str(), name, version]);
            if self.server.user_key.is_none() {
                segments.push("");
            }
        }
        if let Some(key) = &self.server.user_key {
            url.query_pairs_mut().append_pair("user_key", key);
        }
        Ok(url)
    }
}

#[async_trait]
impl MetadataSource for ComponentAnalysisClient {
    async fn fetch(
        &self,
        ecosystem: Ecosystem,
        name: &str,
        version: &str,
    ) -> Result<Metadata, LookupError> {
        let Some(base) = self.server.url.as_deref().filter(|u| !u.trim().is_empty()) else {
            return Err(LookupError::NotConfigured);
        };

        let url = self.lookup_url(base, ecosystem, name, version)?;
        tracing::debug!("Looking up {}/{}/{}", ecosystem, name, version);

        let mut request = self.client.get(url);
        if let Some(token) = &self.server.api_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::OK && status != StatusCode::ACCEPTED {
            return Err(LookupError::from_status(status));
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
