use prometheus::{
    CounterVec, Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// デフォルトのヒストグラムバケット。
const DEFAULT_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Prometheus メトリクス。HTTP の RED メトリクスとクエリ実行結果を集計する。
pub struct Metrics {
    pub http_requests_total: CounterVec,
    pub http_request_duration: HistogramVec,
    pub query_executions_total: IntCounterVec,
    pub query_execution_duration: HistogramVec,
    registry: Registry,
}

impl Metrics {
    /// service_name はメトリクスの service ラベルに使用される。
    pub fn new(service_name: &str) -> anyhow::Result<Self> {
        let registry = Registry::new();

        let http_requests_total = CounterVec::new(
            Opts::new("http_requests_total", "Total number of HTTP requests")
                .const_label("service", service_name),
            &["method", "path", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "http_request_duration_seconds",
                "Histogram of HTTP request latency",
            )
            .const_label("service", service_name)
            .buckets(DEFAULT_BUCKETS.to_vec()),
            &["method", "path"],
        )?;

        let query_executions_total = IntCounterVec::new(
            Opts::new(
                "query_builder_executions_total",
                "Total number of saved query executions",
            )
            .const_label("service", service_name),
            &["result"],
        )?;

        let query_execution_duration = HistogramVec::new(
            HistogramOpts::new(
                "db_query_duration_seconds",
                "Histogram of database query latency",
            )
            .const_label("service", service_name)
            .buckets(DEFAULT_BUCKETS.to_vec()),
            &["query_name"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(query_executions_total.clone()))?;
        registry.register(Box::new(query_execution_duration.clone()))?;

        Ok(Self {
            http_requests_total,
            http_request_duration,
            query_executions_total,
            query_execution_duration,
            registry,
        })
    }

    pub fn record_http_request(&self, method: &str, path: &str, status: u16, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[method, path, &status.to_string()])
            .inc();
        self.http_request_duration
            .with_label_values(&[method, path])
            .observe(duration_secs);
    }

    /// result は "success" / "denied" / "invalid" / "error" のいずれか。
    pub fn record_query_execution(&self, result: &str, duration_secs: f64) {
        self.query_executions_total.with_label_values(&[result]).inc();
        self.query_execution_duration
            .with_label_values(&["execute_saved_query"])
            .observe(duration_secs);
    }

    /// Prometheus テキスト形式でメトリクスを出力する。
    pub fn gather_metrics(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "failed to encode metrics");
            return String::new();
        }
        String::from_utf8(buffer).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_gather() {
        let metrics = Metrics::new("query_builder").unwrap();
        metrics.record_http_request("GET", "/api/v1/query-builder", 200, 0.012);
        metrics.record_query_execution("success", 0.2);
        metrics.record_query_execution("denied", 0.0);

        let text = metrics.gather_metrics();
        assert!(text.contains("http_requests_total"));
        assert!(text.contains("query_builder_executions_total"));
        assert!(text.contains("result=\"denied\""));
        assert!(text.contains("service=\"query_builder\""));
    }
}
