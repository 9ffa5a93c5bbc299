use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::future::Future;
use std::time::Instant;

use crate::error::Result;

pub struct PluginMetrics {
    registry: Registry,

    pub requests_total: IntCounterVec,
    pub request_duration: HistogramVec,
    pub starts_total: IntCounterVec,
}

impl Default for PluginMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PluginMetrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let requests_total = IntCounterVec::new(
            Opts::new("plugin_request_total", "Total number of plugin requests"),
            &["plugin_id", "endpoint", "status"],
        )
        .expect("metric creation failed");
        let request_duration = HistogramVec::new(
            HistogramOpts::new(
                "plugin_request_duration_seconds",
                "Plugin request duration in seconds",
            ),
            &["plugin_id", "endpoint"],
        )
        .expect("metric creation failed");
        let starts_total = IntCounterVec::new(
            Opts::new("plugin_starts_total", "Total number of plugin start attempts"),
            &["plugin_id", "status"],
        )
        .expect("metric creation failed");

        registry
            .register(Box::new(requests_total.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(request_duration.clone()))
            .expect("metric registration failed");
        registry
            .register(Box::new(starts_total.clone()))
            .expect("metric registration failed");

        Self {
            registry,
            requests_total,
            request_duration,
            starts_total,
        }
    }

    pub fn record_start(&self, plugin_id: &str, success: bool) {
        let status = if success { "ok" } else { "error" };
        self.starts_total.with_label_values(&[plugin_id, status]).inc();
    }

    pub fn record_request(
        &self,
        plugin_id: &str,
        endpoint: &str,
        duration: std::time::Duration,
        status: &str,
    ) {
        self.requests_total
            .with_label_values(&[plugin_id, endpoint, status])
            .inc();
        self.request_duration
            .with_label_values(&[plugin_id, endpoint])
            .observe(duration.as_secs_f64());
    }

    /// Time `fut` and count it under `endpoint`.
    pub async fn instrument<T, F>(&self, plugin_id: &str, endpoint: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let start = Instant::now();
        let result = fut.await;
        let status = match result {
            Ok(_) => "ok",
            Err(ref e) if e.is_not_implemented() => "not_implemented",
            Err(_) => "error",
        };
        self.record_request(plugin_id, endpoint, start.elapsed(), status);
        result
    }

    pub fn gather_metrics(&self) -> Vec<prometheus::proto::MetricFamily> {
        self.registry.gather()
    }

    /// Text exposition format of everything registered.
    pub fn gather_text(&self) -> String {
        let mut buffer = Vec::new();
        if let Err(e) = TextEncoder::new().encode(&self.gather_metrics(), &mut buffer) {
            tracing::warn!("Failed to encode metrics: {}", e);
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PluginError;

    #[tokio::test]
    async fn test_instrument_counts_by_status() {
        let metrics = PluginMetrics::new();

        let ok: Result<u32> = metrics.instrument("test-ds", "checkHealth", async { Ok(1) }).await;
        assert!(ok.is_ok());
        let err: Result<u32> = metrics
            .instrument("test-ds", "runStream", async {
                Err(PluginError::MethodNotImplemented)
            })
            .await;
        assert!(err.is_err());

        assert_eq!(
            metrics
                .requests_total
                .with_label_values(&["test-ds", "checkHealth", "ok"])
                .get(),
            1
        );
        assert_eq!(
            metrics
                .requests_total
                .with_label_values(&["test-ds", "runStream", "not_implemented"])
                .get(),
            1
        );
    }

    #[test]
    fn test_gather_text() {
        let metrics = PluginMetrics::new();
        metrics.record_start("test-ds", false);
        metrics.record_request("test-ds", "query", std::time::Duration::from_millis(3), "error");

        let text = metrics.gather_text();
        assert!(text.contains("plugin_starts_total{plugin_id=\"test-ds\",status=\"error\"} 1"));
        assert!(text.contains("plugin_request_duration_seconds"));
    }
}
