//! HTTP client for the conductor

use std::time::Duration;

use protheon_common::types::{HeartbeatRequest, RegisterRequest, RegisterResponse};
use reqwest::Client;
use tracing::debug;

use crate::error::ClientError;

pub fn register_url(base_url: &str) -> String {
    format!("{}/mind/register", base_url.trim_end_matches('/'))
}

pub fn heartbeat_url(base_url: &str) -> String {
    format!("{}/mind/heartbeat", base_url.trim_end_matches('/'))
}

#[derive(Debug, Clone)]
pub struct ConductorClient {
    client: Client,
    base_url: String,
}

impl ConductorClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ClientError> {
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Announce this mind and learn its id, heartbeat interval and queue.
    pub async fn register(&self, request: &RegisterRequest) -> Result<RegisterResponse, ClientError> {
        let url = register_url(&self.base_url);
        debug!(url = %url, hostname = %request.hostname, "Registering with conductor");

        let response = self.client.post(&url).json(request).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        Ok(response.json().await?)
    }

    pub async fn heartbeat(&self, report: &HeartbeatRequest) -> Result<(), ClientError> {
        let url = heartbeat_url(&self.base_url);

        let response = self.client.post(&url).json(report).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Status {
                status: response.status().as_u16(),
                url,
            });
        }

        Ok(())
    }
}
