//! Metrics collection for observability

use prometheus::{
    Counter, CounterVec, Histogram, HistogramOpts, HistogramVec, Opts, Registry,
    register_counter_vec_with_registry, register_counter_with_registry,
    register_histogram_vec_with_registry, register_histogram_with_registry,
};

/// Metrics collector
///
/// Each instance owns its registry, so independent services (and tests) never
/// collide on metric names.
pub struct Metrics {
    registry: Registry,

    // Context window metrics
    pub context_truncations: CounterVec,
    pub context_utilization: Histogram,

    // Chunking metrics
    pub chunks_created: CounterVec,
    pub chunking_fallbacks: Counter,

    // Tool execution metrics
    pub tool_submissions: CounterVec,
    pub tool_executions: CounterVec,
    pub tool_execution_duration: Histogram,
    pub tool_cache_writes: CounterVec,
    pub approval_resolutions: CounterVec,

    // Retrieval metrics
    pub retrieval_merges: Counter,
    pub retrieval_results: Histogram,
    pub retrieval_duration: HistogramVec,

    // Embedding metrics
    pub embedding_requests: CounterVec,
    pub embedding_batch_failures: Counter,

    // Provider metrics
    pub provider_requests: CounterVec,
}

impl Metrics {
    /// Create a new metrics collector
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        // Context window metrics
        let context_truncations = register_counter_vec_with_registry!(
            Opts::new("context_truncations_total", "Histories truncated to fit a model budget"),
            &["strategy"],
            registry
        )?;

        let context_utilization = register_histogram_with_registry!(
            HistogramOpts::new(
                "context_utilization_percent",
                "Share of the available token budget used per prepared context"
            )
            .buckets(vec![10.0, 25.0, 50.0, 75.0, 90.0, 100.0, 150.0]),
            registry
        )?;

        // Chunking metrics
        let chunks_created = register_counter_vec_with_registry!(
            Opts::new("chunks_created_total", "Chunks produced by type"),
            &["chunk_type"],
            registry
        )?;

        let chunking_fallbacks = register_counter_with_registry!(
            Opts::new("chunking_fallbacks_total", "Documents that fell back to a single chunk"),
            registry
        )?;

        // Tool execution metrics
        let tool_submissions = register_counter_vec_with_registry!(
            Opts::new("tool_submissions_total", "Tool submissions by outcome"),
            &["outcome"],
            registry
        )?;

        let tool_executions = register_counter_vec_with_registry!(
            Opts::new("tool_executions_total", "Finished tool executions by status"),
            &["status"],
            registry
        )?;

        let tool_execution_duration = register_histogram_with_registry!(
            "tool_execution_duration_seconds",
            "Tool body run time in seconds",
            registry
        )?;

        let tool_cache_writes = register_counter_vec_with_registry!(
            Opts::new("tool_cache_writes_total", "Tool cache writes by result"),
            &["result"],
            registry
        )?;

        let approval_resolutions = register_counter_vec_with_registry!(
            Opts::new("tool_approval_resolutions_total", "Approval resolutions by decision"),
            &["decision"],
            registry
        )?;

        // Retrieval metrics
        let retrieval_merges = register_counter_with_registry!(
            Opts::new("retrieval_merges_total", "Hybrid result merges performed"),
            registry
        )?;

        let retrieval_results = register_histogram_with_registry!(
            HistogramOpts::new("retrieval_results", "Results returned per merge")
                .buckets(vec![0.0, 1.0, 3.0, 5.0, 10.0, 20.0, 50.0]),
            registry
        )?;

        let retrieval_duration = register_histogram_vec_with_registry!(
            "retrieval_duration_seconds",
            "Search duration in seconds",
            &["mode"],
            registry
        )?;

        // Embedding metrics
        let embedding_requests = register_counter_vec_with_registry!(
            Opts::new("embedding_requests_total", "Embedding provider calls by status"),
            &["status"],
            registry
        )?;

        let embedding_batch_failures = register_counter_with_registry!(
            Opts::new(
                "embedding_batch_failures_total",
                "Batches replaced by zero vectors after exhausting retries"
            ),
            registry
        )?;

        // Provider metrics
        let provider_requests = register_counter_vec_with_registry!(
            Opts::new("provider_requests_total", "Chat completion calls by provider and status"),
            &["provider", "status"],
            registry
        )?;

        Ok(Self {
            registry,
            context_truncations,
            context_utilization,
            chunks_created,
            chunking_fallbacks,
            tool_submissions,
            tool_executions,
            tool_execution_duration,
            tool_cache_writes,
            approval_resolutions,
            retrieval_merges,
            retrieval_results,
            retrieval_duration,
            embedding_requests,
            embedding_batch_failures,
            provider_requests,
        })
    }

    /// Get the metrics registry for exporting
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_truncation(&self, strategy: &str) {
        self.context_truncations.with_label_values(&[strategy]).inc();
    }

    pub fn record_context_utilization(&self, percent: f64) {
        self.context_utilization.observe(percent);
    }

    pub fn record_chunks(&self, chunk_type: &str, count: usize) {
        self.chunks_created
            .with_label_values(&[chunk_type])
            .inc_by(count as f64);
    }

    pub fn record_chunking_fallback(&self) {
        self.chunking_fallbacks.inc();
    }

    /// Outcome is one of `cache_hit`, `pending_approval`, `running`
    pub fn record_tool_submission(&self, outcome: &str) {
        self.tool_submissions.with_label_values(&[outcome]).inc();
    }

    pub fn record_tool_execution(&self, status: &str, elapsed_ms: u64) {
        self.tool_executions.with_label_values(&[status]).inc();
        self.tool_execution_duration
            .observe(elapsed_ms as f64 / 1000.0);
    }

    /// Result is one of `written`, `race`, `error`
    pub fn record_cache_write(&self, result: &str) {
        self.tool_cache_writes.with_label_values(&[result]).inc();
    }

    pub fn record_approval(&self, decision: &str) {
        self.approval_resolutions.with_label_values(&[decision]).inc();
    }

    pub fn record_merge(&self, result_count: usize) {
        self.retrieval_merges.inc();
        self.retrieval_results.observe(result_count as f64);
    }

    pub fn record_embedding_request(&self, success: bool) {
        let status = if success { "success" } else { "error" };
        self.embedding_requests.with_label_values(&[status]).inc();
    }

    pub fn record_embedding_batch_failure(&self) {
        self.embedding_batch_failures.inc();
    }

    pub fn record_provider_request(&self, provider: &str, success: bool) {
        let status = if success { "success" } else { "error" };
        self.provider_requests
            .with_label_values(&[provider, status])
            .inc();
    }

    /// Export metrics in Prometheus text format
    pub fn export(&self) -> String {
        use prometheus::Encoder;

        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();

        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer).unwrap_or_default();

        String::from_utf8(buffer).unwrap_or_default()
    }
}

/// Helper macro to time operations
#[macro_export]
macro_rules! time_operation {
    ($histogram:expr, $label:expr, $operation:expr) => {{
        let timer = $histogram.with_label_values(&[$label]).start_timer();
        let result = $operation;
        timer.observe_duration();
        result
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_initialization() {
        let metrics = Metrics::new();
        assert!(metrics.is_ok());
    }

    #[test]
    fn test_instances_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.record_tool_submission("cache_hit");
        assert_eq!(
            first.tool_submissions.with_label_values(&["cache_hit"]).get(),
            1.0
        );
        assert_eq!(
            second.tool_submissions.with_label_values(&["cache_hit"]).get(),
            0.0
        );
    }

    #[test]
    fn test_export_contains_recorded_series() {
        let metrics = Metrics::new().unwrap();
        metrics.record_truncation("smart");
        metrics.record_chunks("text", 3);
        metrics.record_merge(5);

        let text = metrics.export();
        assert!(text.contains("context_truncations_total"));
        assert!(text.contains("strategy=\"smart\""));
        assert!(text.contains("chunks_created_total"));
    }
}
