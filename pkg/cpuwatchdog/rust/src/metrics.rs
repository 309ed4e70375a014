// Unless explicitly stated otherwise all files in this repository are licensed
// under the Apache License Version 2.0.
// This product includes software developed at Datadog (https://www.datadoghq.com/).
// Copyright 2026-present Datadog, Inc.

//! CPU usage samples from the Prometheus instant-query API.

use serde::Deserialize;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("unexpected status code: {0}")]
    Status(u16),
    #[error("could not decode response body: {0}")]
    Decode(#[source] reqwest::Error),
    #[error("query returned no series")]
    EmptyResult,
    #[error("unusable sample value: {0}")]
    BadValue(String),
}

/// Source of CPU utilisation samples, expressed as a percentage of the limit.
pub trait MetricsSource: Send + Sync {
    fn fetch_rate(&self) -> impl Future<Output = Result<f64, MetricsError>> + Send;
}

#[derive(Debug, Deserialize)]
pub struct QueryResponse {
    pub status: String,
    pub data: QueryData,
}

#[derive(Debug, Deserialize)]
pub struct QueryData {
    #[serde(rename = "resultType")]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<QueryResult>,
}

#[derive(Debug, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub metric: serde_json::Value,
    /// `[unix_timestamp, "value"]`
    #[serde(default)]
    pub value: Vec<serde_json::Value>,
}

impl QueryResponse {
    /// Value of the first series, `result[0].value[1]`.
    pub fn first_value(&self) -> Result<f64, MetricsError> {
        let series = self.data.result.first().ok_or(MetricsError::EmptyResult)?;
        let raw = series
            .value
            .get(1)
            .ok_or_else(|| MetricsError::BadValue("missing value element".to_string()))?;
        let value = match raw {
            serde_json::Value::String(s) => s
                .parse::<f64>()
                .map_err(|_| MetricsError::BadValue(s.clone()))?,
            serde_json::Value::Number(n) => n
                .as_f64()
                .ok_or_else(|| MetricsError::BadValue(n.to_string()))?,
            other => return Err(MetricsError::BadValue(other.to_string())),
        };
        if value.is_nan() {
            return Err(MetricsError::BadValue("NaN".to_string()));
        }
        Ok(value)
    }
}

/// `<metric>{pod="<target>"}/<cpu_limit>*100`
pub fn build_query(metric_name: &str, target_name: &str, cpu_limit: f64) -> String {
    format!("{metric_name}{{pod=\"{target_name}\"}}/{cpu_limit}*100")
}

pub struct PrometheusSource {
    endpoint: String,
    query: String,
    timeout: Duration,
    client: reqwest::Client,
}

impl PrometheusSource {
    pub fn new(base_url: &str, query: String, timeout: Duration) -> Result<Self, MetricsError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(MetricsError::Transport)?;
        Ok(Self {
            endpoint: format!("{}/api/v1/query", base_url.trim_end_matches('/')),
            query,
            timeout,
            client,
        })
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

impl MetricsSource for PrometheusSource {
    async fn fetch_rate(&self) -> Result<f64, MetricsError> {
        let resp = self
            .client
            .get(&self.endpoint)
            .query(&[("query", self.query.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    MetricsError::Timeout(self.timeout)
                } else {
                    MetricsError::Transport(e)
                }
            })?;

        let status = resp.status();
        if status != reqwest::StatusCode::OK {
            return Err(MetricsError::Status(status.as_u16()));
        }

        let body: QueryResponse = resp.json().await.map_err(MetricsError::Decode)?;
        body.first_value()
    }
}
