//! Metrics read from the Prometheus instance running on each node.
//!
//! A field's `query` is a PromQL template. `{target}` expands to the
//! target id and `{host}` to the collecting host's public address.
//! Fields without a query have no live value.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use swarmgrid_core::config::PrometheusConfig;
use swarmgrid_core::{ConfigError, MetricTarget, MetricsSource};
use swarmgrid_state::{Field, HostAddress};
use tracing::debug;

use crate::error::{RemoteError, RemoteResult};
use crate::http;

pub struct PrometheusMetrics {
    port: u16,
    timeout: Duration,
    /// Reference queries for percentage-mode thresholds, keyed by field name.
    references: HashMap<String, String>,
}

#[derive(Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    data: Option<QueryData>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Deserialize)]
struct QueryData {
    #[serde(default)]
    result: Vec<Sample>,
}

#[derive(Deserialize)]
struct Sample {
    /// `[unix_time, "value"]`
    value: (f64, String),
}

impl PrometheusMetrics {
    pub fn new(port: u16, timeout: Duration) -> Self {
        Self {
            port,
            timeout,
            references: HashMap::new(),
        }
    }

    pub fn from_config(config: &PrometheusConfig) -> Result<Self, ConfigError> {
        Ok(Self::new(config.port, config.timeout()?))
    }

    pub fn with_reference(mut self, field: impl Into<String>, query: impl Into<String>) -> Self {
        self.references.insert(field.into(), query.into());
        self
    }

    async fn query(&self, host: &HostAddress, promql: &str) -> RemoteResult<Option<f64>> {
        let encoded: String = url::form_urlencoded::byte_serialize(promql.as_bytes()).collect();
        let address = format!("{}:{}", host.public_ip, self.port);
        debug!(%address, query = promql, "prometheus query");
        let body = http::get(&address, &format!("/api/v1/query?query={encoded}"), self.timeout).await?;
        parse_vector(&body)
    }
}

pub(crate) fn render(template: &str, target: &MetricTarget) -> String {
    template
        .replace("{target}", &target.id)
        .replace("{host}", &target.host.public_ip)
}

/// First sample of an instant-vector reply. Empty vectors and NaN are `None`.
pub(crate) fn parse_vector(body: &[u8]) -> RemoteResult<Option<f64>> {
    let decode = |reason: String| RemoteError::Decode {
        source_name: "prometheus".to_string(),
        reason,
    };
    let response: QueryResponse =
        serde_json::from_slice(body).map_err(|e| decode(e.to_string()))?;
    if response.status != "success" {
        return Err(decode(response.error.unwrap_or(response.status)));
    }
    let Some(sample) = response.data.and_then(|d| d.result.into_iter().next()) else {
        return Ok(None);
    };
    let value: f64 = sample
        .value
        .1
        .parse()
        .map_err(|_| decode(format!("not a number: {}", sample.value.1)))?;
    Ok(value.is_finite().then_some(value))
}

#[async_trait]
impl MetricsSource for PrometheusMetrics {
    async fn value(&self, target: &MetricTarget, field: &Field) -> anyhow::Result<Option<f64>> {
        let Some(template) = &field.query else {
            return Ok(None);
        };
        Ok(self.query(&target.host, &render(template, target)).await?)
    }

    async fn reference(&self, target: &MetricTarget, field: &Field) -> anyhow::Result<Option<f64>> {
        let Some(template) = self.references.get(&field.name) else {
            return Ok(None);
        };
        Ok(self.query(&target.host, &render(template, target)).await?)
    }
}
