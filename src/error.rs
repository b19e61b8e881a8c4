//! src/error.rs
//!
//! Defines the library's custom, comprehensive `Error` enum using `thiserror`.

use crate::{cloud::ServiceError, runner::RunOutput};
use std::{path::PathBuf, process::ExitStatus, time::Duration};
use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] figment::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to decode build output: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Cloud service error: {0}")]
    Service(#[from] ServiceError),

    #[error("Tokio task join error: {0}")]
    TaskJoin(#[from] tokio::task::JoinError),

    #[error("Precondition failed: {0}")]
    Precondition(String),

    #[error("Failed to build {}: {reason}", .package_dir.display())]
    BuildFailed { package_dir: PathBuf, reason: String },

    #[error("Runner binary was never built successfully")]
    NotBuilt,

    #[error("Process exited with {status}")]
    ProcessFailed { status: ExitStatus, output: RunOutput },

    #[error("Process did not finish within {timeout:?}")]
    Timeout { timeout: Duration, output: RunOutput },

    #[error("Bucket {0} still exists after deletion")]
    BucketStillExists(String),
}

impl Error {
    /// Output captured from a child process before it failed, if any.
    pub fn output(&self) -> Option<&RunOutput> {
        match self {
            Error::ProcessFailed { output, .. } | Error::Timeout { output, .. } => Some(output),
            _ => None,
        }
    }
}
