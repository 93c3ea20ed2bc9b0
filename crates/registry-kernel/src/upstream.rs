//! Upstream resolution: static node map or gateway-side discovery.

use crate::error::{KernelError, KernelResult};
use crate::gateway::{ServiceIdentity, UpstreamObject, UpstreamSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Discovery type used when discovery is on but no type is configured.
pub const DEFAULT_DISCOVERY_TYPE: &str = "dns";

/// Environment tag that switches generated names to `<id>:<port>`.
pub const DEV_ENV: &str = "dev";

/// Discovery settings resolved from CLI flags and environment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryOptions {
    /// Deployment environment tag (`dev`, `prod`, ...).
    pub env: String,
    /// Let the gateway resolve nodes instead of using a static map.
    pub enabled: bool,
    /// `dns`, `kubernetes`, `consul`, ...
    pub discovery_type: Option<String>,
    /// Explicit name handed to the discovery integration.
    pub service_name: Option<String>,
}

/// Name the gateway should resolve when no explicit name is configured.
pub fn generate_service_name(
    identity: &ServiceIdentity,
    env: &str,
    discovery_type: &str,
) -> String {
    if env == DEV_ENV {
        return format!("{}:{}", identity.service_id, identity.port);
    }
    if discovery_type == "kubernetes" {
        return format!("{}.default.svc.cluster.local", identity.service_id);
    }
    identity.service_id.clone()
}

/// Choose between discovery and the static node map.
pub fn resolve_spec(
    identity: &ServiceIdentity,
    discovery: &DiscoveryOptions,
    static_nodes: &BTreeMap<String, u32>,
) -> KernelResult<UpstreamSpec> {
    if discovery.enabled {
        let discovery_type = discovery
            .discovery_type
            .as_deref()
            .filter(|t| !t.is_empty())
            .unwrap_or(DEFAULT_DISCOVERY_TYPE)
            .to_string();
        let service_name = match discovery.service_name.as_deref() {
            Some(name) if !name.is_empty() => name.to_string(),
            _ => generate_service_name(identity, &discovery.env, &discovery_type),
        };
        return Ok(UpstreamSpec::Discovery {
            discovery_type,
            service_name,
        });
    }

    if static_nodes.is_empty() {
        return Err(KernelError::config(
            "no upstream nodes or discovery config provided",
        ));
    }
    Ok(UpstreamSpec::Static {
        nodes: static_nodes.clone(),
    })
}

/// Build the `roundrobin` gRPC upstream for `identity`.
pub fn build_upstream(
    identity: &ServiceIdentity,
    discovery: &DiscoveryOptions,
    static_nodes: &BTreeMap<String, u32>,
) -> KernelResult<UpstreamObject> {
    Ok(UpstreamObject {
        id: identity.service_id.clone(),
        balancer: "roundrobin".to_string(),
        scheme: "grpc".to_string(),
        target: resolve_spec(identity, discovery, static_nodes)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity() -> ServiceIdentity {
        ServiceIdentity::new(Some("svc"), "svc", 8080).unwrap()
    }

    fn discovery(env: &str, discovery_type: Option<&str>) -> DiscoveryOptions {
        DiscoveryOptions {
            env: env.to_string(),
            enabled: true,
            discovery_type: discovery_type.map(str::to_string),
            service_name: None,
        }
    }

    #[test]
    fn dev_env_uses_id_and_port() {
        let spec = resolve_spec(&identity(), &discovery("dev", None), &BTreeMap::new()).unwrap();
        assert_eq!(
            spec,
            UpstreamSpec::Discovery {
                discovery_type: "dns".into(),
                service_name: "svc:8080".into(),
            }
        );
    }

    #[test]
    fn kubernetes_uses_cluster_dns_name() {
        let spec = resolve_spec(
            &identity(),
            &discovery("prod", Some("kubernetes")),
            &BTreeMap::new(),
        )
        .unwrap();
        assert_eq!(
            spec,
            UpstreamSpec::Discovery {
                discovery_type: "kubernetes".into(),
                service_name: "svc.default.svc.cluster.local".into(),
            }
        );
    }

    #[test]
    fn other_types_use_plain_id() {
        let spec = resolve_spec(&identity(), &discovery("prod", Some("consul")), &BTreeMap::new())
            .unwrap();
        assert!(matches!(
            spec,
            UpstreamSpec::Discovery { ref service_name, .. } if service_name == "svc"
        ));
    }

    #[test]
    fn explicit_name_wins() {
        let mut options = discovery("dev", Some("kubernetes"));
        options.service_name = Some("auth.prod.svc".into());
        let spec = resolve_spec(&identity(), &options, &BTreeMap::new()).unwrap();
        assert!(matches!(
            spec,
            UpstreamSpec::Discovery { ref service_name, .. } if service_name == "auth.prod.svc"
        ));
    }

    #[test]
    fn static_without_nodes_is_config_error() {
        let err = build_upstream(&identity(), &DiscoveryOptions::default(), &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, KernelError::Config(ref msg) if msg.contains("no upstream nodes")));
    }

    #[test]
    fn static_nodes_pass_through_unchanged() {
        let nodes = BTreeMap::from([("svc:8082".to_string(), 1)]);
        let upstream = build_upstream(&identity(), &DiscoveryOptions::default(), &nodes).unwrap();
        assert_eq!(upstream.id, "svc");
        assert_eq!(upstream.balancer, "roundrobin");
        assert_eq!(upstream.scheme, "grpc");
        assert_eq!(upstream.target, UpstreamSpec::Static { nodes });
    }
}
