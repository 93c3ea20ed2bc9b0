//! Agent error types

use registry_kernel::HttpMethod;
use registry_kernel::KernelError;
use registry_kernel::config::ConfigError;
use thiserror::Error;

/// A failed admin API interaction.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("{method} {url} transport error: {message}")]
    Transport {
        method: HttpMethod,
        url: String,
        message: String,
    },

    #[error("{method} {url} returned status {status}: {body}")]
    Status {
        method: HttpMethod,
        url: String,
        status: u16,
        body: String,
    },

    #[error("APISIX request {method} {path} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        method: HttpMethod,
        path: String,
        attempts: u32,
        #[source]
        last: Box<GatewayError>,
    },

    #[error("failed to encode request body: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode {path} response: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

pub type GatewayResult<T> = Result<T, GatewayError>;

/// Top-level agent errors.
#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Kernel(#[from] KernelError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("invalid settings: {0}")]
    Settings(String),
}

pub type AgentResult<T> = Result<T, AgentError>;
