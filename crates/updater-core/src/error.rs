//! ---
//! upd_section: "02-update-pipeline"
//! upd_subsection: "module"
//! upd_type: "source"
//! upd_scope: "code"
//! upd_description: "Version probing, download, install and restart of the target application."
//! upd_version: "v0.0.0-prealpha"
//! upd_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Reasons a remote version probe produced no usable version.
#[derive(Debug, Error)]
pub enum RemoteVersionError {
    #[error("version request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("version endpoint answered with HTTP {0}")]
    Status(u16),
    #[error("version body {0:?} is not a decimal version code")]
    Parse(String),
}

/// Reasons a package download failed. The destination file is invalid afterwards.
#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("package request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("package endpoint answered with HTTP {0}")]
    Status(u16),
    #[error("no data received for {0:?}")]
    ReadTimeout(Duration),
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl DownloadError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}
