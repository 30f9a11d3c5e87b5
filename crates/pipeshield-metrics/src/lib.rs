//! Metrics backend client.
//!
//! The reconciler asks the metrics backend one of two questions: "is alert X
//! firing right now" or "evaluate this expression now". Each question is a
//! small trait so decision strategies can depend on exactly the capability
//! they use, and tests can substitute scripted answers.

mod prometheus;

use async_trait::async_trait;
use thiserror::Error;

pub use prometheus::PrometheusClient;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("prometheus call timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("prometheus returned status {status}: {message}")]
    Backend { status: String, message: String },

    #[error("failed to build prometheus client: {0}")]
    Build(String),
}

/// Asks the backend for the current state of a named alert.
///
/// No retries and no cached fallback: a transport failure is an error, and
/// retry policy belongs to the caller's next tick.
#[async_trait]
pub trait AlertQuerier: Send + Sync {
    /// True iff an alert labeled `alertname == name` is currently firing
    /// (pending does not count).
    async fn is_alert_firing(&self, name: &str) -> Result<bool, MetricsError>;
}

/// Evaluates an instant expression at "now" and returns its textual result.
#[async_trait]
pub trait InstantQuerier: Send + Sync {
    async fn query(&self, expr: &str) -> Result<String, MetricsError>;
}
