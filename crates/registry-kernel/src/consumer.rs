//! Consumer objects with multi-auth plugin composition.

use crate::gateway::{ConsumerObject, PluginConfig, PluginMap};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const JWT_AUTH: &str = "jwt-auth";
pub const KEY_AUTH: &str = "key-auth";

/// A consumer as written in the agent configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsumerConfig {
    pub name: String,
    #[serde(default)]
    pub jwt_enabled: bool,
    #[serde(default)]
    pub key_auth_enabled: bool,
    #[serde(default)]
    pub key_auth_key: String,
}

impl ConsumerConfig {
    /// Auth plugins enabled for this consumer.
    ///
    /// `key-auth` needs a non-empty key; without one it is left out.
    pub fn auth_plugins(&self) -> PluginMap {
        let mut plugins = PluginMap::new();
        if self.jwt_enabled {
            plugins.insert(JWT_AUTH.to_string(), key_config(&self.name));
        }
        if self.key_auth_enabled && !self.key_auth_key.is_empty() {
            plugins.insert(KEY_AUTH.to_string(), key_config(&self.key_auth_key));
        }
        plugins
    }

    /// The consumer object to register, or `None` when no auth plugin is on.
    pub fn to_object(&self) -> Option<ConsumerObject> {
        let plugins = self.auth_plugins();
        if plugins.is_empty() {
            return None;
        }
        Some(ConsumerObject {
            username: self.name.clone(),
            plugins,
        })
    }
}

fn key_config(key: &str) -> PluginConfig {
    let mut config = PluginConfig::new();
    config.insert("key".to_string(), Value::String(key.to_string()));
    config
}
