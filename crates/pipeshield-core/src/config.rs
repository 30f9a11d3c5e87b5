//! Configuration model.
//!
//! The config is a YAML document loaded once at process start and immutable
//! afterwards. It names the ConfigMap the gate state is persisted to, how to
//! reach the metrics backend, which decision strategy to run, and how often
//! to reconcile.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::duration::Duration;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Name of the ConfigMap the gate state is written to.
    pub dest_name: String,

    /// Namespace of the ConfigMap the gate state is written to.
    pub dest_namespace: String,

    /// Instant query whose non-`"0"` result transitions the gate to denied.
    /// Expected, but not required, to be complementary with
    /// `enableIngressQuery`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disable_ingress_query: Option<String>,

    /// Instant query whose non-`"0"` result transitions the gate back to
    /// allowed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enable_ingress_query: Option<String>,

    pub prometheus: PrometheusConfig,

    /// How long to wait between reconciliation passes.
    pub wait_time: Duration,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PrometheusConfig {
    /// Base URL of the metrics backend, e.g. `http://prometheus.monitoring.svc:9090`.
    pub address: String,

    /// Alert to mirror. Setting this selects the alert-mirror strategy;
    /// leaving it unset selects the two-query hysteresis strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert_name: Option<String>,

    /// Connection parameters for the HTTP client used to reach the backend.
    #[serde(default)]
    pub config: HttpClientConfig,
}

/// TLS, auth, and proxy parameters for the metrics-backend HTTP client.
///
/// Opaque to the core beyond "construct an HTTP client from this".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpClientConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token: Option<String>,

    /// File to read a bearer token from; takes effect only when
    /// `bearerToken` is unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bearer_token_file: Option<PathBuf>,

    /// Additional PEM-encoded CA bundle to trust.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_file: Option<PathBuf>,

    #[serde(default)]
    pub insecure_skip_verify: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
}

/// The decision strategy resolved from configuration, exactly once at load.
#[derive(Debug, Clone, PartialEq)]
pub enum StrategySpec {
    /// Mirror a single alert: gate denied while the alert fires.
    AlertMirror { alert_name: String },

    /// Two-query hysteresis: one query provides the evidence to close the
    /// gate, an independent one the evidence to reopen it.
    Hysteresis {
        disable_query: String,
        enable_query: String,
    },
}

impl Config {
    /// Load and validate the config from a YAML file. Any failure here is
    /// fatal to startup.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> Result<Self, ConfigError> {
        let config: Config = serde_yaml::from_str(raw)?;
        // Resolve the strategy eagerly so a bad config never reaches the loop.
        config.strategy()?;
        Ok(config)
    }

    /// Resolve which decision strategy this config selects.
    ///
    /// `prometheus.alertName` wins when present; otherwise both ingress
    /// queries must be set.
    pub fn strategy(&self) -> Result<StrategySpec, ConfigError> {
        if let Some(alert_name) = &self.prometheus.alert_name {
            return Ok(StrategySpec::AlertMirror {
                alert_name: alert_name.clone(),
            });
        }
        match (&self.disable_ingress_query, &self.enable_ingress_query) {
            (Some(disable), Some(enable)) => Ok(StrategySpec::Hysteresis {
                disable_query: disable.clone(),
                enable_query: enable.clone(),
            }),
            (None, None) => Err(ConfigError::NoStrategy),
            _ => Err(ConfigError::IncompleteQueryPair),
        }
    }
}
