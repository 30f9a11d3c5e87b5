//! Prometheus HTTP API client.
//!
//! Implements both querier capabilities against the v1 HTTP API:
//! `/api/v1/alerts` for alert state and `/api/v1/query` for instant
//! expressions. Calls are bounded by a fixed timeout and never retried here;
//! the reconciler simply tries again on its next tick.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use pipeshield_core::HttpClientConfig;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde::Deserialize;

use crate::{AlertQuerier, InstantQuerier, MetricsError};

/// Outer bound on any single call to the backend.
const CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Evaluation deadline passed to the backend for instant queries, nested
/// inside [`CALL_TIMEOUT`].
const QUERY_EVAL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PrometheusClient {
    http: reqwest::Client,
    base: String,
}

impl PrometheusClient {
    pub fn new(address: &str, config: &HttpClientConfig) -> Result<Self, MetricsError> {
        let mut builder = reqwest::Client::builder();

        if let Some(token) = Self::bearer_token(config)? {
            let mut headers = HeaderMap::new();
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|err| MetricsError::Build(format!("invalid bearer token: {err}")))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
            builder = builder.default_headers(headers);
        }

        if let Some(ca_file) = &config.ca_file {
            let pem = std::fs::read(ca_file).map_err(|err| {
                MetricsError::Build(format!("failed to read CA file {}: {err}", ca_file.display()))
            })?;
            builder = builder.add_root_certificate(reqwest::Certificate::from_pem(&pem)?);
        }

        if config.insecure_skip_verify {
            builder = builder.danger_accept_invalid_certs(true);
        }

        if let Some(proxy_url) = &config.proxy_url {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(Self {
            http: builder.build()?,
            base: address.trim_end_matches('/').to_string(),
        })
    }

    fn bearer_token(config: &HttpClientConfig) -> Result<Option<String>, MetricsError> {
        if let Some(token) = &config.bearer_token {
            return Ok(Some(token.clone()));
        }
        if let Some(path) = &config.bearer_token_file {
            let token = std::fs::read_to_string(path).map_err(|err| {
                MetricsError::Build(format!(
                    "failed to read bearer token file {}: {err}",
                    path.display()
                ))
            })?;
            return Ok(Some(token.trim().to_string()));
        }
        Ok(None)
    }

    async fn call<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<ApiResponse<T>, MetricsError> {
        let url = format!("{}{path}", self.base);
        let request = self.http.get(&url).query(params).send();
        let response = tokio::time::timeout(CALL_TIMEOUT, async {
            let response = request.await?.error_for_status()?;
            response.json::<ApiResponse<T>>().await
        })
        .await
        .map_err(|_| MetricsError::Timeout(CALL_TIMEOUT))??;

        if response.status != "success" {
            return Err(MetricsError::Backend {
                status: response.status,
                message: response.error.unwrap_or_default(),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl AlertQuerier for PrometheusClient {
    async fn is_alert_firing(&self, name: &str) -> Result<bool, MetricsError> {
        let response: ApiResponse<AlertsData> = self.call("/api/v1/alerts", &[]).await?;
        let firing = response
            .data
            .map(|data| {
                data.alerts.iter().any(|alert| {
                    alert.state == "firing"
                        && alert.labels.get("alertname").map(String::as_str) == Some(name)
                })
            })
            .unwrap_or(false);
        Ok(firing)
    }
}

#[async_trait]
impl InstantQuerier for PrometheusClient {
    async fn query(&self, expr: &str) -> Result<String, MetricsError> {
        let eval_timeout = format!("{}s", QUERY_EVAL_TIMEOUT.as_secs());
        let response: ApiResponse<QueryData> = self
            .call("/api/v1/query", &[("query", expr), ("timeout", &eval_timeout)])
            .await?;

        if !response.warnings.is_empty() {
            tracing::warn!(
                query = expr,
                warnings = ?response.warnings,
                "prometheus reported query warnings"
            );
        }

        let text = response
            .data
            .map(|data| render_result_text(&data.result_type, &data.result))
            .unwrap_or_else(|| "0".to_string());
        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
struct ApiResponse<T> {
    status: String,
    #[serde(default)]
    data: Option<T>,
    #[serde(default)]
    warnings: Vec<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AlertsData {
    #[serde(default)]
    alerts: Vec<ActiveAlert>,
}

#[derive(Debug, Deserialize)]
struct ActiveAlert {
    #[serde(default)]
    labels: BTreeMap<String, String>,
    state: String,
}

#[derive(Debug, Deserialize)]
struct QueryData {
    #[serde(rename = "resultType")]
    result_type: String,
    result: serde_json::Value,
}

/// Reduce an instant-query result to the scalar text the decision logic
/// compares against `"0"`. An empty result renders as `"0"`: no series means
/// the condition is not asserted.
fn render_result_text(result_type: &str, result: &serde_json::Value) -> String {
    let sample_value = |value: &serde_json::Value| {
        value
            .get(1)
            .and_then(serde_json::Value::as_str)
            .map(str::to_string)
    };
    let text = match result_type {
        "scalar" | "string" => sample_value(result),
        "vector" => result
            .as_array()
            .and_then(|samples| samples.first())
            .and_then(|sample| sample.get("value"))
            .and_then(|value| sample_value(value)),
        _ => None,
    };
    text.unwrap_or_else(|| "0".to_string())
}
