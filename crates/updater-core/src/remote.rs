//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use tracing::{debug, warn};
use updater_common::config::NetworkConfig;

use crate::error::RemoteVersionError;
use crate::version::VersionCode;

/// Source of the latest published version code.
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// Latest version at `url`, or [`VersionCode::UNKNOWN`] when it cannot be determined.
    async fn latest_version(&self, url: &str) -> VersionCode;
}

/// Reads a plain-text version code over HTTP.
#[derive(Debug, Clone)]
pub struct HttpVersionClient {
    client: Client,
}

impl HttpVersionClient {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.connect_timeout + config.read_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build version HTTP client")?;
        Ok(Self { client })
    }

    /// Fetch and parse the version body, surfacing the failure reason.
    pub async fn fetch(&self, url: &str) -> Result<VersionCode, RemoteVersionError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(RemoteVersionError::Status(status.as_u16()));
        }
        let body = response.text().await?;
        debug!(url, body = %body.trim(), "remote version response");
        VersionCode::parse(&body).ok_or(RemoteVersionError::Parse(body))
    }
}

#[async_trait]
impl VersionSource for HttpVersionClient {
    async fn latest_version(&self, url: &str) -> VersionCode {
        match self.fetch(url).await {
            Ok(version) => version,
            Err(err) => {
                warn!(url, error = %err, "remote version unavailable");
                VersionCode::UNKNOWN
            }
        }
    }
}
