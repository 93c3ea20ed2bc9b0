//! APISIX registry agent.
//!
//! Registers one gRPC service with the APISIX admin API at startup and
//! removes everything it registered on shutdown.
//!
//! | Module | Role |
//! |--------|------|
//! | [`client`] | Admin API client with retries over a pluggable transport |
//! | [`settings`] | File, environment and CLI merged into [`AgentSettings`] |
//! | [`lifecycle`] | Register, wait, deregister |
//! | [`cli`] | Command-line flags |

pub mod cli;
pub mod client;
pub mod error;
pub mod lifecycle;
pub mod settings;

pub use client::{AdminClient, AdminEndpoint, AdminTransport, ReqwestTransport, RetryPolicy};
pub use error::{AgentError, AgentResult, GatewayError, GatewayResult};
pub use lifecycle::{LifecycleState, Orchestrator, Registration, TeardownReport, TeardownStep};
pub use settings::{AgentSettings, CliOverrides};
