//! Typed gateway objects exchanged with the APISIX admin API.
//!
//! Every object kind the agent manages has its own record type here. They are
//! plain `serde` structs: the kernel builds them, and only the admin client in
//! `registry-agent` turns them into JSON on the wire.

use crate::error::{KernelError, KernelResult};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Plugin name of the APISIX HTTP → gRPC transcoding plugin.
pub const GRPC_TRANSCODE: &str = "grpc-transcode";

/// Description stamped on every object created by the agent.
pub const AUTO_REGISTERED_DESC: &str = "Auto registered by apisix-registry-agent";

/// Description stamped on routes built from an operator override.
pub const AUTO_REGISTERED_CUSTOM_DESC: &str =
    "Auto registered by apisix-registry-agent (custom config)";

/// Configuration body of a single plugin.
pub type PluginConfig = serde_json::Map<String, Value>;

/// Plugins attached to a route or consumer, keyed by plugin name.
///
/// A `BTreeMap` keeps the serialized payload byte-stable across runs.
pub type PluginMap = BTreeMap<String, PluginConfig>;

// ─────────────────────────────────────────────────────────────────────────────
// HTTP primitives
// ─────────────────────────────────────────────────────────────────────────────

/// HTTP verbs accepted on a gateway route.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Patch,
    Delete,
    Head,
    Options,
    Connect,
    Trace,
    /// Cache invalidation verb understood by APISIX.
    Purge,
}

impl HttpMethod {
    /// Case-insensitive parse from a string slice.
    pub fn from_str_ci(s: &str) -> Option<Self> {
        match s.trim().to_uppercase().as_str() {
            "GET" => Some(HttpMethod::Get),
            "POST" => Some(HttpMethod::Post),
            "PUT" => Some(HttpMethod::Put),
            "PATCH" => Some(HttpMethod::Patch),
            "DELETE" => Some(HttpMethod::Delete),
            "HEAD" => Some(HttpMethod::Head),
            "OPTIONS" => Some(HttpMethod::Options),
            "CONNECT" => Some(HttpMethod::Connect),
            "TRACE" => Some(HttpMethod::Trace),
            "PURGE" => Some(HttpMethod::Purge),
            _ => None,
        }
    }

    /// Return the standard uppercase string representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Patch => "PATCH",
            HttpMethod::Delete => "DELETE",
            HttpMethod::Head => "HEAD",
            HttpMethod::Options => "OPTIONS",
            HttpMethod::Connect => "CONNECT",
            HttpMethod::Trace => "TRACE",
            HttpMethod::Purge => "PURGE",
        }
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HttpMethod {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_ci(s).ok_or_else(|| KernelError::config(format!("unknown HTTP method `{s}`")))
    }
}

impl Serialize for HttpMethod {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for HttpMethod {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        HttpMethod::from_str_ci(&raw)
            .ok_or_else(|| serde::de::Error::custom(format!("unknown HTTP method `{raw}`")))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Identity of the one service this agent manages.
///
/// `service_id` keys every derived gateway object, so two runs with the same
/// configuration always address the same objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceIdentity {
    pub service_id: String,
    pub service_name: String,
    pub port: u16,
}

impl ServiceIdentity {
    /// Resolve the identity; `service_id` falls back to `service_name`.
    pub fn new(
        service_id: Option<&str>,
        service_name: impl Into<String>,
        port: u16,
    ) -> KernelResult<Self> {
        let service_name = service_name.into();
        let service_id = match service_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => service_name.trim().to_string(),
        };
        if service_id.is_empty() {
            return Err(KernelError::config(
                "neither service_id nor service_name is configured",
            ));
        }
        Ok(Self {
            service_id,
            service_name,
            port,
        })
    }

    /// Gateway id of the route at `index` in the extracted route order.
    pub fn route_id(&self, index: usize) -> String {
        format!("{}-{}", self.service_id, index)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Object kinds
// ─────────────────────────────────────────────────────────────────────────────

/// Where an upstream gets its backend nodes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpstreamSpec {
    /// Fixed `address → weight` node map.
    Static { nodes: BTreeMap<String, u32> },
    /// Nodes resolved by the gateway's discovery integration.
    Discovery {
        discovery_type: String,
        service_name: String,
    },
}

/// `PUT /upstreams/{id}` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamObject {
    pub id: String,
    #[serde(rename = "type")]
    pub balancer: String,
    pub scheme: String,
    #[serde(flatten)]
    pub target: UpstreamSpec,
}

/// `PUT /services/{id}` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceObject {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub upstream_id: String,
}

impl ServiceObject {
    /// The service object bound to the upstream sharing its id.
    pub fn for_identity(identity: &ServiceIdentity) -> Self {
        Self {
            id: identity.service_id.clone(),
            name: identity.service_name.clone(),
            desc: AUTO_REGISTERED_DESC.to_string(),
            upstream_id: identity.service_id.clone(),
        }
    }
}

/// `PUT /routes/{id}` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteObject {
    pub id: String,
    pub name: String,
    pub desc: String,
    pub service_id: String,
    pub uri: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub methods: Option<Vec<HttpMethod>>,
    #[serde(default, skip_serializing_if = "PluginMap::is_empty")]
    pub plugins: PluginMap,
}

/// `PUT /protos/{id}` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtoObject {
    pub content: String,
}

/// `PUT /consumers/{username}` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerObject {
    pub username: String,
    pub plugins: PluginMap,
}

// ─────────────────────────────────────────────────────────────────────────────
// Route listing (reconciliation)
// ─────────────────────────────────────────────────────────────────────────────

/// `GET /routes` response envelope.
///
/// Older admin APIs answer with `nodes`, v3 answers with `list`; both carry
/// the stored route under `value`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RouteListing {
    #[serde(default, alias = "list")]
    pub nodes: Vec<RouteNode>,
}

/// One stored route in a [`RouteListing`].
#[derive(Debug, Clone, Deserialize)]
pub struct RouteNode {
    #[serde(default)]
    pub value: Value,
}

impl RouteNode {
    /// Stored route id, if the gateway returned one as a string.
    pub fn route_id(&self) -> Option<&str> {
        self.value.get("id").and_then(Value::as_str)
    }

    /// `proto_id` referenced by this route's transcoding plugin, if any.
    pub fn transcode_proto_id(&self) -> Option<&str> {
        self.value
            .get("plugins")?
            .get(GRPC_TRANSCODE)?
            .get("proto_id")?
            .as_str()
    }
}

impl RouteListing {
    /// Ids of every listed route whose transcoding plugin points at `proto_id`.
    pub fn routes_referencing_proto(&self, proto_id: &str) -> Vec<String> {
        self.nodes
            .iter()
            .filter(|node| node.transcode_proto_id() == Some(proto_id))
            .filter_map(|node| node.route_id().map(str::to_string))
            .collect()
    }
}
