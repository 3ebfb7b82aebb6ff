//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use tokio::fs::{self, File};
use tokio::io::{AsyncWriteExt, BufWriter};
use tracing::{debug, info};
use updater_common::config::NetworkConfig;

use crate::error::DownloadError;

/// Write buffer size for streamed package bodies.
pub const COPY_BUFFER_BYTES: usize = 64 * 1024;

/// Downloads package artifacts to local storage.
#[async_trait]
pub trait PackageDownloader: Send + Sync {
    /// Stream `url` into `destination`, replacing any existing file.
    ///
    /// Returns the number of bytes written. On error the destination holds
    /// partial or stale content and must not be installed.
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, DownloadError>;
}

/// [`PackageDownloader`] over HTTP.
///
/// There is no overall deadline; each chunk must arrive within `read_timeout`.
#[derive(Debug, Clone)]
pub struct HttpPackageFetcher {
    client: Client,
    header_timeout: Duration,
    read_timeout: Duration,
}

impl HttpPackageFetcher {
    pub fn new(config: &NetworkConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .context("failed to build package HTTP client")?;
        Ok(Self {
            client,
            header_timeout: config.connect_timeout + config.read_timeout,
            read_timeout: config.read_timeout,
        })
    }

    async fn next_chunk(
        &self,
        response: &mut reqwest::Response,
    ) -> Result<Option<Bytes>, DownloadError> {
        match tokio::time::timeout(self.read_timeout, response.chunk()).await {
            Ok(chunk) => Ok(chunk?),
            Err(_) => Err(DownloadError::ReadTimeout(self.read_timeout)),
        }
    }
}

#[async_trait]
impl PackageDownloader for HttpPackageFetcher {
    async fn download(&self, url: &str, destination: &Path) -> Result<u64, DownloadError> {
        info!(url, destination = %destination.display(), "downloading package");
        let mut response = tokio::time::timeout(self.header_timeout, self.client.get(url).send())
            .await
            .map_err(|_| DownloadError::ReadTimeout(self.header_timeout))??;
        let status = response.status();
        if status != StatusCode::OK {
            return Err(DownloadError::Status(status.as_u16()));
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| DownloadError::io(parent, err))?;
        }
        let file = File::create(destination)
            .await
            .map_err(|err| DownloadError::io(destination, err))?;
        let mut writer = BufWriter::with_capacity(COPY_BUFFER_BYTES, file);

        let mut written: u64 = 0;
        while let Some(chunk) = self.next_chunk(&mut response).await? {
            writer
                .write_all(&chunk)
                .await
                .map_err(|err| DownloadError::io(destination, err))?;
            written += chunk.len() as u64;
        }
        writer
            .flush()
            .await
            .map_err(|err| DownloadError::io(destination, err))?;
        writer
            .into_inner()
            .sync_all()
            .await
            .map_err(|err| DownloadError::io(destination, err))?;

        debug!(url, bytes = written, "package stream complete");
        Ok(written)
    }
}
