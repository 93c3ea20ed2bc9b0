//! `registry-kernel`: the network-free core of the APISIX registry agent.
//!
//! Turns one service's configuration and `.proto` interface definition into
//! the typed APISIX objects the agent registers:
//!
//! | Module | Responsibility |
//! |--------|----------------|
//! | [`descriptor`] | `google.api.http` scanning → ordered [`RouteDescriptor`]s |
//! | [`upstream`] | static nodes vs. discovery → [`UpstreamObject`] |
//! | [`route`] | descriptors + overrides + plugins → [`RouteObject`]s |
//! | [`consumer`] | consumer auth plugins → [`ConsumerObject`] |
//! | [`config`] | configuration file + environment overrides |
//!
//! Nothing here talks to the network; the admin API client and the
//! registration lifecycle live in `registry-agent`.

pub mod config;
pub mod consumer;
pub mod descriptor;
pub mod error;
pub mod gateway;
pub mod route;
pub mod upstream;

pub use consumer::ConsumerConfig;
pub use descriptor::{DescriptorExtractor, HttpRuleExtractor, RouteDescriptor};
pub use error::{KernelError, KernelResult};
pub use gateway::{
    ConsumerObject, HttpMethod, PluginConfig, PluginMap, ProtoObject, RouteListing, RouteObject,
    ServiceIdentity, ServiceObject, UpstreamObject, UpstreamSpec,
};
pub use route::{AssembledRoute, PluginSpec, RouteAssembler, RouteOverride, TranscodeDefaults};
pub use upstream::DiscoveryOptions;
