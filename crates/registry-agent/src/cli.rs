//! CLI definitions using clap

use crate::settings::CliOverrides;
use clap::Parser;
use std::path::PathBuf;

/// Register a gRPC service with APISIX for as long as it runs
#[derive(Debug, Parser)]
#[command(name = "registry-agent")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Configuration file (YAML, TOML or JSON)
    #[arg(short, long, env = "REGISTRY_CONFIG", default_value = "./registry.yaml")]
    pub config: PathBuf,

    /// Deployment environment tag
    #[arg(long, env = "REGISTRY_ENV", default_value = "dev")]
    pub env: String,

    /// Let APISIX resolve upstream nodes through service discovery
    #[arg(long, env = "REGISTRY_USE_DISCOVERY")]
    pub use_discovery: bool,

    /// Discovery integration (dns, kubernetes, consul, ...)
    #[arg(long, env = "REGISTRY_DISCOVERY_TYPE")]
    pub discovery_type: Option<String>,

    /// Name handed to the discovery integration
    #[arg(long, env = "REGISTRY_DISCOVERY_SERVICE_NAME")]
    pub discovery_service_name: Option<String>,

    /// Static upstream node as host:port[=weight]; repeatable
    #[arg(long = "static-node", value_name = "HOST:PORT[=WEIGHT]", value_parser = parse_static_node)]
    pub static_nodes: Vec<(String, u32)>,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,

    /// Print the objects a registration would submit and exit
    #[arg(long)]
    pub print_plan: bool,
}

impl Cli {
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            env: self.env.clone(),
            use_discovery: self.use_discovery,
            discovery_type: self.discovery_type.clone(),
            discovery_service_name: self.discovery_service_name.clone(),
            static_nodes: self.static_nodes.iter().cloned().collect(),
        }
    }
}

/// Parse `host:port` or `host:port=weight`; weight defaults to 1.
fn parse_static_node(value: &str) -> Result<(String, u32), String> {
    let (node, weight) = match value.split_once('=') {
        Some((node, weight)) => {
            let weight = weight
                .trim()
                .parse()
                .map_err(|e| format!("invalid weight {weight:?}: {e}"))?;
            (node.trim(), weight)
        }
        None => (value.trim(), 1),
    };
    if node.is_empty() {
        return Err("node address must not be empty".to_string());
    }
    Ok((node.to_string(), weight))
}
