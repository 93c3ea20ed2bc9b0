//! Agent configuration file model and loader.
//!
//! The agent reads one configuration file (YAML, TOML or JSON, detected from
//! the extension), substitutes `${VAR}` / `$VAR` placeholders, then lets a
//! fixed set of environment variables override individual fields:
//!
//! | Variable | Field |
//! |----------|-------|
//! | `APISIX_AGENT_DEBUG` | `debug` |
//! | `APISIX_ADMIN_API` | `admin_api` |
//! | `APISIX_ADMIN_KEY` | `admin_key` |
//! | `SERVICE_NAME` | `service_name` |
//! | `SERVICE_ID` | `service_id` |
//! | `SERVICE_GRPC_PORT` | `service_port` |
//! | `PROTO_PATH` | `proto_path` |
//! | `PROTO_PB_PATH` | `proto_pb_path` |
//! | `REGISTRY_TTL` | `ttl` |
//! | `REGISTRY_MAX_RETRY` | `max_retry` |
//! | `REGISTRY_RETRY_INTERVAL` | `retry_interval` |
//!
//! Environment access goes through a lookup function so callers decide where
//! values come from.

use crate::consumer::ConsumerConfig;
use crate::route::{DEFAULT_TRANSCODE_NAMESPACE, PluginSpec, RouteOverride};
use config::{Config as Cfg, File, FileFormat};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use std::time::Duration;
use tracing::{info, warn};

pub const MIN_TTL_SECS: u64 = 60;
pub const DEFAULT_MAX_RETRY: u32 = 3;
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(3);
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

static BRACED_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("braced var regex"));

static SIMPLE_VAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("simple var regex"));

/// Configuration loading error
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Result type for config operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Static upstream section of the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub nodes: BTreeMap<String, u32>,
}

/// Everything the agent reads from its configuration file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Log admin API request and response bodies.
    pub debug: bool,
    /// Admin API base URL, e.g. `http://apisix:9180/apisix/admin`.
    pub admin_api: String,
    /// Value of the `X-API-KEY` header.
    pub admin_key: String,
    pub service_version: String,
    pub service_name: String,
    pub service_id: String,
    pub service_port: u16,
    /// `.proto` file scanned for HTTP annotations.
    pub proto_path: Option<PathBuf>,
    /// Descriptor registered under the service id; `.pb` files are sent
    /// base64-encoded.
    pub proto_pb_path: Option<PathBuf>,
    /// Plugins attached to every extracted route.
    pub route_plugins: Vec<PluginSpec>,
    pub upstream: Option<UpstreamConfig>,
    /// Registration TTL in seconds.
    pub ttl: u64,
    /// Attempts per admin API call.
    pub max_retry: u32,
    #[serde(with = "humantime_serde")]
    pub retry_interval: Duration,
    /// Deadline for a single admin API call.
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,
    /// Package prefix of the generated `grpc-transcode` service name.
    pub transcode_namespace: String,
    pub consumers: Vec<ConsumerConfig>,
    /// Operator overrides keyed by uri.
    pub routes: Vec<RouteOverride>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            debug: false,
            admin_api: String::new(),
            admin_key: String::new(),
            service_version: String::new(),
            service_name: String::new(),
            service_id: String::new(),
            service_port: 0,
            proto_path: None,
            proto_pb_path: None,
            route_plugins: Vec::new(),
            upstream: None,
            ttl: MIN_TTL_SECS,
            max_retry: DEFAULT_MAX_RETRY,
            retry_interval: MIN_RETRY_INTERVAL,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            transcode_namespace: DEFAULT_TRANSCODE_NAMESPACE.to_string(),
            consumers: Vec::new(),
            routes: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load `path`, or fall back to defaults when it does not exist.
    pub fn load<F>(path: &Path, lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        info!(path = %path.display(), "loading config");
        if !path.exists() {
            warn!(path = %path.display(), "config file not found, using defaults and environment");
            return Ok(Self::default());
        }
        load_config(path, lookup)
    }

    /// Apply the environment overrides listed in the module docs.
    ///
    /// Values that fail to parse are ignored with a warning.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.is_empty());

        if let Some(v) = get("APISIX_AGENT_DEBUG") {
            match parse_bool(&v) {
                Some(debug) => self.debug = debug,
                None => warn!(value = %v, "ignoring invalid APISIX_AGENT_DEBUG"),
            }
        }
        if let Some(v) = get("APISIX_ADMIN_API") {
            self.admin_api = v;
        }
        if let Some(v) = get("APISIX_ADMIN_KEY") {
            self.admin_key = v;
        }
        if let Some(v) = get("SERVICE_NAME") {
            self.service_name = v;
        }
        if let Some(v) = get("SERVICE_ID") {
            self.service_id = v;
        }
        if let Some(v) = get("SERVICE_GRPC_PORT") {
            match v.parse() {
                Ok(port) => self.service_port = port,
                Err(e) => warn!(value = %v, error = %e, "ignoring invalid SERVICE_GRPC_PORT"),
            }
        }
        if let Some(v) = get("PROTO_PATH") {
            self.proto_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("PROTO_PB_PATH") {
            self.proto_pb_path = Some(PathBuf::from(v));
        }
        if let Some(v) = get("REGISTRY_TTL") {
            match v.parse() {
                Ok(ttl) => self.ttl = ttl,
                Err(e) => warn!(value = %v, error = %e, "ignoring invalid REGISTRY_TTL"),
            }
        }
        if let Some(v) = get("REGISTRY_MAX_RETRY") {
            match v.parse() {
                Ok(n) => self.max_retry = n,
                Err(e) => warn!(value = %v, error = %e, "ignoring invalid REGISTRY_MAX_RETRY"),
            }
        }
        if let Some(v) = get("REGISTRY_RETRY_INTERVAL") {
            match humantime::parse_duration(&v) {
                Ok(interval) => self.retry_interval = interval,
                Err(e) => warn!(value = %v, error = %e, "ignoring invalid REGISTRY_RETRY_INTERVAL"),
            }
        }
    }

    /// Clamp values to their minimums.
    pub fn normalize(&mut self) {
        if self.ttl < MIN_TTL_SECS {
            self.ttl = MIN_TTL_SECS;
        }
        if self.max_retry == 0 {
            self.max_retry = DEFAULT_MAX_RETRY;
        }
        if self.retry_interval < MIN_RETRY_INTERVAL {
            self.retry_interval = MIN_RETRY_INTERVAL;
        }
        if self.request_timeout.is_zero() {
            self.request_timeout = DEFAULT_REQUEST_TIMEOUT;
        }
        if self.transcode_namespace.is_empty() {
            self.transcode_namespace = DEFAULT_TRANSCODE_NAMESPACE.to_string();
        }
    }

    /// Static upstream nodes from the file, if any.
    pub fn upstream_nodes(&self) -> Option<&BTreeMap<String, u32>> {
        self.upstream
            .as_ref()
            .map(|u| &u.nodes)
            .filter(|nodes| !nodes.is_empty())
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Detect configuration format from file extension
///
/// - YAML: `.yaml`, `.yml`
/// - TOML: `.toml`
/// - JSON: `.json`
pub fn detect_format(path: &Path) -> ConfigResult<FileFormat> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Substitute environment variables in a string
///
/// Supports `${VAR_NAME}` and `$VAR_NAME`. Unknown variables are left as
/// written.
pub fn substitute_env_vars<F>(content: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let braced = BRACED_VAR_RE.replace_all(content, |caps: &regex::Captures| {
        lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
    });
    SIMPLE_VAR_RE
        .replace_all(&braced, |caps: &regex::Captures| {
            lookup(&caps[1]).unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Load configuration from a file, detecting the format from its extension.
pub fn load_config<T, F>(path: &Path, lookup: F) -> ConfigResult<T>
where
    T: DeserializeOwned,
    F: Fn(&str) -> Option<String>,
{
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    from_str(&content, format, lookup)
}

/// Load configuration from a string with explicit format
pub fn from_str<T, F>(content: &str, format: FileFormat, lookup: F) -> ConfigResult<T>
where
    T: DeserializeOwned,
    F: Fn(&str) -> Option<String>,
{
    let substituted = substitute_env_vars(content, lookup);

    let config = Cfg::builder()
        .add_source(File::from_str(&substituted, format))
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?;

    config
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}
