//! Route assembly: extracted descriptors + operator overrides + plugins.
//!
//! Route `i` is always `<service_id>-<i>`, whatever produced its uri and
//! methods. An override whose `uri` equals a descriptor's uri replaces that
//! descriptor's methods and plugin set; the descriptor still supplies the RPC
//! method name for `grpc-transcode`.

use crate::descriptor::RouteDescriptor;
use crate::error::KernelError;
use crate::gateway::{
    AUTO_REGISTERED_CUSTOM_DESC, AUTO_REGISTERED_DESC, GRPC_TRANSCODE, HttpMethod, PluginConfig,
    PluginMap, RouteObject, ServiceIdentity,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, error};

/// Default package prefix for the generated `grpc-transcode` service name.
pub const DEFAULT_TRANSCODE_NAMESPACE: &str = "micro";

/// A plugin to attach to routes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginSpec {
    pub name: String,
    #[serde(default)]
    pub config: PluginConfig,
}

/// Operator-supplied route, matched against descriptors by `uri`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RouteOverride {
    pub uri: String,
    #[serde(default)]
    pub methods: Vec<HttpMethod>,
    #[serde(default)]
    pub plugins: Vec<PluginSpec>,
}

/// Inputs for the `grpc-transcode` autofill rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscodeDefaults {
    /// An interface-definition path is configured, so `proto_id` can point
    /// at the descriptor registered under the service id.
    pub proto_configured: bool,
    /// Configured service name; empty disables `service` autofill.
    pub service_name: String,
    /// Package prefix of the generated gRPC service name.
    pub namespace: String,
}

impl Default for TranscodeDefaults {
    fn default() -> Self {
        Self {
            proto_configured: false,
            service_name: String::new(),
            namespace: DEFAULT_TRANSCODE_NAMESPACE.to_string(),
        }
    }
}

/// A built route plus the validation problems found while building it.
///
/// Problems are reported, never fatal: the route is still submitted.
#[derive(Debug)]
pub struct AssembledRoute {
    pub route: RouteObject,
    pub issues: Vec<KernelError>,
}

/// Builds gateway routes for one service.
#[derive(Debug)]
pub struct RouteAssembler<'a> {
    identity: &'a ServiceIdentity,
    plugins: &'a [PluginSpec],
    overrides: HashMap<&'a str, &'a RouteOverride>,
    transcode: TranscodeDefaults,
}

impl<'a> RouteAssembler<'a> {
    pub fn new(
        identity: &'a ServiceIdentity,
        plugins: &'a [PluginSpec],
        overrides: &'a [RouteOverride],
        transcode: TranscodeDefaults,
    ) -> Self {
        // Later entries win when two overrides share a uri.
        let overrides = overrides.iter().map(|o| (o.uri.as_str(), o)).collect();
        Self {
            identity,
            plugins,
            overrides,
            transcode,
        }
    }

    /// Assemble every descriptor, keeping their order.
    pub fn assemble(&self, descriptors: &[RouteDescriptor]) -> Vec<AssembledRoute> {
        descriptors
            .iter()
            .enumerate()
            .map(|(index, descriptor)| self.assemble_one(index, descriptor))
            .collect()
    }

    /// Assemble the route at position `index`.
    pub fn assemble_one(&self, index: usize, descriptor: &RouteDescriptor) -> AssembledRoute {
        let id = self.identity.route_id(index);
        let mut issues = Vec::new();

        let (desc, uri, methods, specs) = match self.overrides.get(descriptor.uri.as_str()) {
            Some(custom) => (
                AUTO_REGISTERED_CUSTOM_DESC,
                custom.uri.clone(),
                (!custom.methods.is_empty()).then(|| custom.methods.clone()),
                custom.plugins.as_slice(),
            ),
            None => (
                AUTO_REGISTERED_DESC,
                descriptor.uri.clone(),
                Some(vec![descriptor.http_method]),
                self.plugins,
            ),
        };

        let mut plugins = PluginMap::new();
        for spec in specs {
            // Each route gets its own copy; shared specs are never mutated.
            let mut config = spec.config.clone();
            if spec.name == GRPC_TRANSCODE
                && !self.autofill_transcode(&mut config, &descriptor.rpc_method, &uri, &mut issues)
            {
                continue;
            }
            plugins.insert(spec.name.clone(), config);
        }

        let route = RouteObject {
            id: id.clone(),
            name: id,
            desc: desc.to_string(),
            service_id: self.identity.service_id.clone(),
            uri,
            methods,
            plugins,
        };
        debug!(route = %route.id, uri = %route.uri, "assembled route");
        AssembledRoute { route, issues }
    }

    /// Fill `method`, `proto_id` and `service`, then report what is still
    /// missing. Returns `false` when the plugin must be left off the route.
    fn autofill_transcode(
        &self,
        config: &mut PluginConfig,
        rpc_method: &str,
        uri: &str,
        issues: &mut Vec<KernelError>,
    ) -> bool {
        if is_absent(config.get("method")) {
            if rpc_method.is_empty() {
                error!(%uri, "grpc method not found for route, skip grpc-transcode");
                issues.push(KernelError::Validation {
                    field: "method",
                    uri: uri.to_string(),
                });
                return false;
            }
            config.insert("method".into(), Value::String(rpc_method.to_string()));
            debug!(%uri, method = rpc_method, "auto fill grpc-transcode method");
        }

        if is_absent(config.get("proto_id")) && self.transcode.proto_configured {
            config.insert(
                "proto_id".into(),
                Value::String(self.identity.service_id.clone()),
            );
            debug!(%uri, proto_id = %self.identity.service_id, "auto fill grpc-transcode proto_id");
        }

        if is_absent(config.get("service")) && !self.transcode.service_name.is_empty() {
            let service = format!(
                "{}.{}Service",
                self.transcode.namespace,
                capitalize(&self.transcode.service_name)
            );
            debug!(%uri, %service, "auto fill grpc-transcode service");
            config.insert("service".into(), Value::String(service));
        }

        for field in ["method", "proto_id", "service"] {
            if is_empty(config.get(field)) {
                let issue = KernelError::Validation {
                    field,
                    uri: uri.to_string(),
                };
                error!("{issue}");
                issues.push(issue);
            }
        }
        true
    }
}

fn is_absent(value: Option<&Value>) -> bool {
    matches!(value, None | Some(Value::Null))
}

fn is_empty(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.is_empty(),
        Some(_) => false,
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
