//! Effective agent settings.
//!
//! Precedence, lowest first: configuration file, environment overrides,
//! command-line flags. Static upstream nodes come from `--static-node`, then
//! the file's `upstream.nodes`, then `127.0.0.1:<port>` when a port is known.

use crate::client::{AdminEndpoint, RetryPolicy};
use crate::error::{AgentError, AgentResult};
use registry_kernel::config::AgentConfig;
use registry_kernel::descriptor;
use registry_kernel::upstream::build_upstream;
use registry_kernel::{
    AssembledRoute, ConsumerConfig, DiscoveryOptions, KernelResult, PluginSpec, ProtoObject,
    RouteAssembler, RouteDescriptor, RouteOverride, ServiceIdentity, ServiceObject,
    TranscodeDefaults, UpstreamObject,
};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Values only the command line (or its environment fallbacks) provides.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CliOverrides {
    pub env: String,
    pub use_discovery: bool,
    pub discovery_type: Option<String>,
    pub discovery_service_name: Option<String>,
    pub static_nodes: BTreeMap<String, u32>,
}

#[derive(Debug, Clone)]
pub struct AgentSettings {
    pub identity: ServiceIdentity,
    pub admin: AdminEndpoint,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
    /// Log admin API bodies.
    pub debug: bool,
    pub discovery: DiscoveryOptions,
    pub static_nodes: BTreeMap<String, u32>,
    pub route_plugins: Vec<PluginSpec>,
    pub routes: Vec<RouteOverride>,
    pub consumers: Vec<ConsumerConfig>,
    pub proto_path: Option<PathBuf>,
    pub proto_pb_path: Option<PathBuf>,
    pub transcode_namespace: String,
}

impl AgentSettings {
    /// Merge an already env-overridden `config` with CLI flags.
    pub fn resolve(mut config: AgentConfig, cli: CliOverrides) -> AgentResult<Self> {
        config.normalize();

        let identity = ServiceIdentity::new(
            Some(config.service_id.as_str()),
            &config.service_name,
            config.service_port,
        )?;

        let static_nodes = if !cli.static_nodes.is_empty() {
            cli.static_nodes
        } else if let Some(nodes) = config.upstream_nodes() {
            nodes.clone()
        } else if identity.port != 0 {
            BTreeMap::from([(format!("127.0.0.1:{}", identity.port), 1)])
        } else {
            BTreeMap::new()
        };

        let discovery = DiscoveryOptions {
            env: cli.env,
            enabled: cli.use_discovery,
            discovery_type: cli.discovery_type.filter(|t| !t.is_empty()),
            service_name: cli.discovery_service_name.filter(|n| !n.is_empty()),
        };

        Ok(Self {
            identity,
            admin: AdminEndpoint::new(config.admin_api, config.admin_key),
            retry: RetryPolicy::new(config.max_retry, config.retry_interval),
            request_timeout: config.request_timeout,
            debug: config.debug,
            discovery,
            static_nodes,
            route_plugins: config.route_plugins,
            routes: config.routes,
            consumers: config.consumers,
            proto_path: config.proto_path,
            proto_pb_path: config.proto_pb_path,
            transcode_namespace: config.transcode_namespace,
        })
    }

    /// Fail unless an admin API URL is configured.
    pub fn require_admin_api(&self) -> AgentResult<&AdminEndpoint> {
        if self.admin.base_url.is_empty() {
            return Err(AgentError::Settings(
                "admin API URL is not configured (admin_api or APISIX_ADMIN_API)".to_string(),
            ));
        }
        Ok(&self.admin)
    }

    pub fn service_object(&self) -> ServiceObject {
        ServiceObject::for_identity(&self.identity)
    }

    pub fn upstream_object(&self) -> KernelResult<UpstreamObject> {
        build_upstream(&self.identity, &self.discovery, &self.static_nodes)
    }

    /// Descriptor id shared by the proto object and `grpc-transcode`.
    pub fn proto_id(&self) -> &str {
        &self.identity.service_id
    }

    /// File registered as the service descriptor, compiled set first.
    pub fn descriptor_path(&self) -> Option<&Path> {
        self.proto_pb_path
            .as_deref()
            .or(self.proto_path.as_deref())
    }

    pub fn load_descriptor(&self) -> Option<KernelResult<ProtoObject>> {
        self.descriptor_path().map(descriptor::load_descriptor)
    }

    /// Annotated RPCs of `proto_path`; empty when none is configured.
    pub fn extract_descriptors(&self) -> KernelResult<Vec<RouteDescriptor>> {
        match &self.proto_path {
            Some(path) => descriptor::extract_file(path),
            None => Ok(Vec::new()),
        }
    }

    pub fn transcode_defaults(&self) -> TranscodeDefaults {
        TranscodeDefaults {
            proto_configured: self.descriptor_path().is_some(),
            service_name: self.identity.service_name.clone(),
            namespace: self.transcode_namespace.clone(),
        }
    }

    pub fn assemble_routes(&self, descriptors: &[RouteDescriptor]) -> Vec<AssembledRoute> {
        RouteAssembler::new(
            &self.identity,
            &self.route_plugins,
            &self.routes,
            self.transcode_defaults(),
        )
        .assemble(descriptors)
    }

    /// Objects a registration would submit, without contacting the gateway.
    pub fn plan(&self) -> RegistrationPlan {
        let (upstream, upstream_error) = match self.upstream_object() {
            Ok(upstream) => (Some(upstream), None),
            Err(e) => (None, Some(e.to_string())),
        };
        let (routes, descriptor_error) = match self.extract_descriptors() {
            Ok(descriptors) => (
                self.assemble_routes(&descriptors)
                    .into_iter()
                    .map(|assembled| serde_json::to_value(&assembled.route))
                    .collect::<Result<Vec<_>, _>>()
                    .unwrap_or_default(),
                None,
            ),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };

        RegistrationPlan {
            admin_api: self.admin.base_url.clone(),
            consumers: self
                .consumers
                .iter()
                .filter_map(ConsumerConfig::to_object)
                .map(|c| c.username)
                .collect(),
            upstream,
            upstream_error,
            service: self.service_object(),
            routes,
            descriptor_error,
            proto: self
                .descriptor_path()
                .map(|path| (self.proto_id().to_string(), path.to_path_buf())),
        }
    }
}

/// Dry-run view printed by `--print-plan`.
#[derive(Debug, Clone, Serialize)]
pub struct RegistrationPlan {
    pub admin_api: String,
    pub consumers: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream: Option<UpstreamObject>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub upstream_error: Option<String>,
    pub service: ServiceObject,
    pub routes: Vec<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub descriptor_error: Option<String>,
    /// `(proto id, descriptor file)`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto: Option<(String, PathBuf)>,
}
