use serde::Deserialize;
use std::path::Path;

use crate::promql::binary::BinOpLimits;
use crate::state::reducer::{DEFAULT_SERVER_URL, ServerAccess, ServerSettings};

/// Top-level config loaded from `promlens.toml`.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LensConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub explain: ExplainConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> String {
    "0.0.0.0:8080".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct PrometheusConfig {
    #[serde(default = "default_prometheus_url")]
    pub url: String,
    #[serde(default)]
    pub access: ServerAccess,
    /// Grafana datasource to proxy through when `access = "proxy"`.
    pub datasource_id: Option<u64>,
    #[serde(default)]
    pub with_credentials: bool,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            url: default_prometheus_url(),
            access: ServerAccess::Direct,
            datasource_id: None,
            with_credentials: false,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_prometheus_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExplainConfig {
    /// Match groups returned per binary expression explanation.
    #[serde(default = "default_100")]
    pub max_groups: usize,
    /// Samples kept per side of a match group.
    #[serde(default = "default_100")]
    pub max_series_per_group: usize,
}

impl Default for ExplainConfig {
    fn default() -> Self {
        Self {
            max_groups: 100,
            max_series_per_group: 100,
        }
    }
}

fn default_100() -> usize {
    100
}

impl LensConfig {
    /// Load config from a TOML file. Returns defaults if the file doesn't exist.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::info!("config file not found at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)?;
        let config = Self::parse(&contents)?;
        tracing::info!("loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `PROMLENS_*` environment overrides.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var("PROMLENS_PROMETHEUS_URL") {
            self.prometheus.url = url;
        }
        if let Ok(addr) = std::env::var("PROMLENS_LISTEN_ADDR") {
            self.server.listen_addr = addr;
        }
        self
    }

    /// Server settings handed to the UI and used for Prometheus requests.
    pub fn server_settings(&self) -> ServerSettings {
        ServerSettings {
            url: self.prometheus.url.clone(),
            access: self.prometheus.access,
            datasource_id: self.prometheus.datasource_id,
            with_credentials: self.prometheus.with_credentials,
        }
    }

    pub fn bin_op_limits(&self) -> BinOpLimits {
        BinOpLimits::new(self.explain.max_groups, self.explain.max_series_per_group)
    }
}
