//! Configuration for the dispatcher.
//!
//! Defines the mode toggle, upstream environments, parameterized routes and
//! mock settings.

use crate::dispatcher::API_PREFIX;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Longest latency accepted from configuration.
const MAX_LATENCY_MS: u64 = 60_000;

/// Main configuration for the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherConfig {
    /// Address the dev server listens on
    #[serde(default = "default_listen")]
    pub listen: SocketAddr,

    /// Start in Mock mode
    #[serde(default)]
    pub mock: bool,

    /// Delay applied to every mock response (ms)
    #[serde(default = "default_latency_ms")]
    pub latency_ms: u64,

    /// Directory of file-backed mock handlers
    #[serde(default = "default_mock_dir")]
    pub mock_dir: Option<PathBuf>,

    /// Parameterized routes, e.g. `/api/{type}`
    #[serde(default)]
    pub routes: Vec<String>,

    /// Upstream environments by tag
    #[serde(default = "default_targets")]
    pub targets: BTreeMap<String, String>,

    /// Environment requests are forwarded to in Proxy mode
    #[serde(default = "default_active_target")]
    pub active_target: String,

    /// Forwarding settings
    #[serde(default)]
    pub proxy: ProxySettings,

    /// Largest request body buffered (bytes)
    #[serde(default = "default_body_limit")]
    pub body_limit: usize,

    /// Global settings
    #[serde(default)]
    pub settings: GlobalSettings,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            mock: false,
            latency_ms: default_latency_ms(),
            mock_dir: default_mock_dir(),
            routes: Vec::new(),
            targets: default_targets(),
            active_target: default_active_target(),
            proxy: ProxySettings::default(),
            body_limit: default_body_limit(),
            settings: GlobalSettings::default(),
        }
    }
}

impl DispatcherConfig {
    /// Load configuration from a YAML file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", path.display(), e))?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML.
    pub fn from_yaml(yaml: &str) -> anyhow::Result<Self> {
        // An empty document deserializes as null, not as an empty map
        let config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml::from_str(yaml)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.targets.is_empty() {
            anyhow::bail!("At least one target must be declared");
        }
        for (tag, url) in &self.targets {
            if !(url.starts_with("http://") || url.starts_with("https://")) {
                anyhow::bail!("Target {}: url must start with http:// or https://, got {:?}", tag, url);
            }
        }
        if !self.targets.contains_key(&self.active_target) {
            anyhow::bail!(
                "Active target {:?} is not declared (declared: {})",
                self.active_target,
                self.targets.keys().cloned().collect::<Vec<_>>().join(", ")
            );
        }
        for route in &self.routes {
            if !route.starts_with(API_PREFIX) {
                anyhow::bail!("Route {:?} must start with {}", route, API_PREFIX);
            }
        }
        if self.latency_ms > MAX_LATENCY_MS {
            anyhow::bail!("latency_ms {} exceeds {}", self.latency_ms, MAX_LATENCY_MS);
        }
        if self.proxy.timeout_ms == 0 {
            anyhow::bail!("proxy.timeout_ms must be greater than zero");
        }
        Ok(())
    }
}

fn default_listen() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8080))
}

fn default_latency_ms() -> u64 {
    300
}

fn default_mock_dir() -> Option<PathBuf> {
    Some(PathBuf::from("mock"))
}

fn default_targets() -> BTreeMap<String, String> {
    [
        ("online", "http://online.com"),
        ("dev", "http://dev.com"),
        ("test", "http://test.com"),
    ]
    .into_iter()
    .map(|(tag, url)| (tag.to_string(), url.to_string()))
    .collect()
}

fn default_active_target() -> String {
    "dev".to_string()
}

fn default_body_limit() -> usize {
    10 * 1024 * 1024
}

fn default_true() -> bool {
    true
}

/// Forwarding settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProxySettings {
    /// Upstream connect and idle-read timeout (ms); streamed replies may run longer
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            timeout_ms: default_timeout_ms(),
        }
    }
}

fn default_timeout_ms() -> u64 {
    30_000
}

/// Global settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalSettings {
    /// Log the branch chosen for each API request
    #[serde(default = "default_true")]
    pub log_routes: bool,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self { log_routes: true }
    }
}
