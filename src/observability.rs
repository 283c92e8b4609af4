use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Pipeline counters shared by the engines
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    pub sync_passes: AtomicU64,
    pub sync_failures: AtomicU64,
    pub conflicts_detected: AtomicU64,
    pub reviews_passed: AtomicU64,
    pub reviews_failed: AtomicU64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_sync_pass(&self, conflicts: usize) {
        self.sync_passes.fetch_add(1, Ordering::Relaxed);
        self.conflicts_detected
            .fetch_add(conflicts as u64, Ordering::Relaxed);
    }

    pub fn record_sync_failure(&self) {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_review(&self, passed: bool) {
        let counter = if passed {
            &self.reviews_passed
        } else {
            &self.reviews_failed
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get_stats(&self) -> PipelineStats {
        PipelineStats {
            sync_passes: self.sync_passes.load(Ordering::Relaxed),
            sync_failures: self.sync_failures.load(Ordering::Relaxed),
            conflicts_detected: self.conflicts_detected.load(Ordering::Relaxed),
            reviews_passed: self.reviews_passed.load(Ordering::Relaxed),
            reviews_failed: self.reviews_failed.load(Ordering::Relaxed),
        }
    }

    pub fn log_stats(&self) {
        let stats = self.get_stats();
        info!(
            "Pipeline metrics: sync_passes={}, sync_failures={}, conflicts={}, reviews_passed={}, reviews_failed={}",
            stats.sync_passes,
            stats.sync_failures,
            stats.conflicts_detected,
            stats.reviews_passed,
            stats.reviews_failed
        );
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub sync_passes: u64,
    pub sync_failures: u64,
    pub conflicts_detected: u64,
    pub reviews_passed: u64,
    pub reviews_failed: u64,
}

/// Span correlating every log line of one task operation
pub fn create_workflow_span(workflow: &str, task_id: &str, correlation_id: &str) -> tracing::Span {
    tracing::info_span!(
        "workflow",
        workflow.name = workflow,
        task_id = task_id,
        correlation.id = correlation_id
    )
}

/// Time an operation and log its duration
pub struct OperationTimer {
    operation: String,
    start: Instant,
}

impl OperationTimer {
    pub fn new(operation: &str) -> Self {
        Self {
            operation: operation.to_string(),
            start: Instant::now(),
        }
    }

    pub fn finish(self) {
        let duration = self.start.elapsed();
        info!(
            operation = %self.operation,
            duration_ms = duration.as_millis(),
            "Operation completed"
        );
    }
}
