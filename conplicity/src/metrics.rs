//! Prometheus push-gateway reporting.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use crate::error::{ConplicityError, Result};

/// Job label under which backup metrics are grouped on the gateway.
pub const JOB_NAME: &str = "conplicity";

/// Content type of the Prometheus text exposition format.
pub const EXPOSITION_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Upper bound on one push, so an unresponsive gateway cannot hold up exit.
pub const PUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Metric lines accumulated over a backup cycle, in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetricBatch {
    lines: Vec<String>,
}

impl MetricBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Appends `<name>{volume="<volume>",what="<what>"} <value>`.
    pub fn push_volume_metric(
        &mut self,
        name: &str,
        volume: &str,
        what: &str,
        value: impl std::fmt::Display,
    ) {
        self.push(format!(
            "{name}{{volume=\"{}\",what=\"{what}\"}} {value}",
            escape_label(volume)
        ));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Newline-joined lines with a trailing newline.
    pub fn to_body(&self) -> String {
        let mut body = self.lines.join("\n");
        body.push('\n');
        body
    }
}

impl<S: Into<String>> FromIterator<S> for MetricBatch {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            lines: iter.into_iter().map(Into::into).collect(),
        }
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

pub fn push_url(gateway_url: &str, job: &str, instance: &str) -> String {
    format!(
        "{}/metrics/job/{job}/instance/{instance}",
        gateway_url.trim_end_matches('/')
    )
}

pub struct MetricsReporter {
    client: reqwest::Client,
    gateway_url: String,
}

impl MetricsReporter {
    /// An empty `gateway_url` turns every push into a no-op.
    pub fn new(gateway_url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(gateway_url, PUSH_TIMEOUT)
    }

    pub fn with_timeout(gateway_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConplicityError::Config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(client, gateway_url))
    }

    pub fn with_client(client: reqwest::Client, gateway_url: impl Into<String>) -> Self {
        Self {
            client,
            gateway_url: gateway_url.into(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.gateway_url.is_empty()
    }

    /// Replaces the metrics of `job`/`instance` on the gateway with `batch`.
    ///
    /// Only transport failures are errors; the response is not interpreted.
    pub async fn push(&self, batch: &MetricBatch, job: &str, instance: &str) -> Result<()> {
        if batch.is_empty() || !self.is_enabled() {
            return Ok(());
        }

        let url = push_url(&self.gateway_url, job, instance);
        let body = batch.to_body();
        debug!(url = %url, data = %body, "Sending metrics to Prometheus Pushgateway");

        let res = self
            .client
            .put(&url)
            .header(CONTENT_TYPE, EXPOSITION_CONTENT_TYPE)
            .body(body)
            .send()
            .await
            .map_err(|source| ConplicityError::MetricsPush {
                url: url.clone(),
                source,
            })?;

        debug!(url = %url, status = %res.status(), "Received Prometheus response");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_is_newline_terminated() {
        let batch: MetricBatch = ["a 1", "b 2"].into_iter().collect();
        assert_eq!(batch.to_body(), "a 1\nb 2\n");
    }

    #[test]
    fn test_push_url() {
        assert_eq!(
            push_url("http://gw", JOB_NAME, "host1"),
            "http://gw/metrics/job/conplicity/instance/host1"
        );
        assert_eq!(
            push_url("http://gw/", JOB_NAME, "host1"),
            "http://gw/metrics/job/conplicity/instance/host1"
        );
    }

    #[test]
    fn test_volume_metric_line() {
        let mut batch = MetricBatch::new();
        batch.push_volume_metric("conplicity", "pg\"data", "backupExitCode", 0);
        assert_eq!(
            batch.lines(),
            ["conplicity{volume=\"pg\\\"data\",what=\"backupExitCode\"} 0"]
        );
    }

    #[tokio::test]
    async fn test_push_is_noop_without_gateway() {
        let reporter = MetricsReporter::new("").unwrap();
        let batch: MetricBatch = ["a 1"].into_iter().collect();
        assert!(!reporter.is_enabled());
        reporter.push(&batch, JOB_NAME, "host1").await.unwrap();
    }
}
