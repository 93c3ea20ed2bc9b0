//! Error taxonomy for the registry kernel.
//!
//! The kernel never performs network I/O, so every variant here is detected
//! while reading local inputs or while assembling gateway objects. Transport
//! failures against the admin API live in `registry-agent`.

use std::path::PathBuf;
use thiserror::Error;

/// Errors produced while building the gateway object graph.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum KernelError {
    /// Upstream or identity configuration is invalid or incomplete.
    #[error("config error: {0}")]
    Config(String),

    /// The interface-definition file could not be opened or read.
    #[error("failed to read interface definition {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A required transcoding-plugin field is still empty after autofill.
    #[error("grpc-transcode `{field}` missing for route {uri}, please set the `{field}` field")]
    Validation { field: &'static str, uri: String },
}

impl KernelError {
    /// Build a [`KernelError::Config`] from any message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}

/// Result type for kernel operations
pub type KernelResult<T> = Result<T, KernelError>;
