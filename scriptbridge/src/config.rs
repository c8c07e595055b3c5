//! Bridge construction config.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::codec::Format;
use crate::debug::DEFAULT_DEBUG_SERVER_HOST;

const ENV_PREFIX: &str = "SCRIPTBRIDGE_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub single_thread_mode: bool,
    pub enable_binary_serialization: bool,
    /// Dev mode: connect the debugger and accept its frames.
    pub is_dev_module: bool,
    /// `host:port` of the debug proxy. Empty means the default.
    pub debug_server_host: String,
    /// Passed to the executor on init and destroy.
    pub low_memory_mode: bool,
    /// Base directory under which the code cache root is created.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_base_dir: Option<PathBuf>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            single_thread_mode: false,
            enable_binary_serialization: false,
            is_dev_module: false,
            debug_server_host: DEFAULT_DEBUG_SERVER_HOST.to_string(),
            low_memory_mode: false,
            cache_base_dir: None,
        }
    }
}

impl BridgeConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Defaults overridden by `SCRIPTBRIDGE_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let flag = |name: &str, default: bool| match var(name) {
            Some(raw) => parse_flag(&raw).unwrap_or_else(|| {
                tracing::warn!(var = name, value = %raw, "Ignoring unparseable flag");
                default
            }),
            None => default,
        };

        let defaults = Self::default();
        Self {
            single_thread_mode: flag("SINGLE_THREAD", defaults.single_thread_mode),
            enable_binary_serialization: flag(
                "BINARY_SERIALIZATION",
                defaults.enable_binary_serialization,
            ),
            is_dev_module: flag("DEV_MODULE", defaults.is_dev_module),
            debug_server_host: var("DEBUG_SERVER_HOST").unwrap_or(defaults.debug_server_host),
            low_memory_mode: flag("LOW_MEMORY", defaults.low_memory_mode),
            cache_base_dir: var("CACHE_DIR")
                .filter(|s| !s.is_empty())
                .map(PathBuf::from),
        }
    }

    pub fn with_single_thread_mode(mut self, enabled: bool) -> Self {
        self.single_thread_mode = enabled;
        self
    }

    pub fn with_binary_serialization(mut self, enabled: bool) -> Self {
        self.enable_binary_serialization = enabled;
        self
    }

    pub fn with_dev_module(mut self, enabled: bool) -> Self {
        self.is_dev_module = enabled;
        self
    }

    pub fn with_debug_server_host(mut self, host: impl Into<String>) -> Self {
        self.debug_server_host = host.into();
        self
    }

    pub fn with_low_memory_mode(mut self, enabled: bool) -> Self {
        self.low_memory_mode = enabled;
        self
    }

    pub fn with_cache_base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_base_dir = Some(dir.into());
        self
    }

    pub fn format(&self) -> Format {
        Format::from_flag(self.enable_binary_serialization)
    }

    /// The debug host, with the default standing in for an empty value.
    pub fn effective_debug_host(&self) -> &str {
        if self.debug_server_host.is_empty() {
            DEFAULT_DEBUG_SERVER_HOST
        } else {
            &self.debug_server_host
        }
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
