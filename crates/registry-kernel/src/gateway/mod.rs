//! Gateway object model.
//!
//! ```text
//! ┌──────────────┐  upstream_id  ┌──────────────┐  service_id  ┌──────────────┐
//! │ UpstreamObject│◀─────────────│ ServiceObject │◀────────────│ RouteObject×N │
//! └──────────────┘               └──────────────┘              └──────┬───────┘
//!                                                     grpc-transcode  │ proto_id
//!                                                                     ▼
//!                                                              ┌──────────────┐
//!                                                              │  ProtoObject  │
//!                                                              └──────────────┘
//! ```
//!
//! Upstream, service and descriptor share the service id; routes are
//! `<service_id>-<index>`; consumers are keyed by username.

pub mod types;

pub use types::{
    AUTO_REGISTERED_CUSTOM_DESC, AUTO_REGISTERED_DESC, ConsumerObject, GRPC_TRANSCODE, HttpMethod,
    PluginConfig, PluginMap, ProtoObject, RouteListing, RouteNode, RouteObject, ServiceIdentity,
    ServiceObject, UpstreamObject, UpstreamSpec,
};
