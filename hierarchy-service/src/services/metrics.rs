//! Metrics collection and Prometheus export.
//!
//! Initializes the metrics exporter, provides the /metrics body and the
//! recording helpers used by the hierarchy engine.

use metrics::{counter, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};
use std::sync::OnceLock;
use std::time::Instant;

use super::error::HierarchyResult;

/// Global handle to the Prometheus recorder.
pub static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the metrics recorder.
///
/// Safe to call more than once; later calls keep the first recorder.
pub fn init_metrics() -> Result<(), BuildError> {
    if METRICS_HANDLE.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = METRICS_HANDLE.set(handle);
    Ok(())
}

/// Get the current metrics in Prometheus text format.
pub fn get_metrics() -> String {
    METRICS_HANDLE
        .get()
        .map(|handle| handle.render())
        .unwrap_or_else(|| "# Metrics recorder not initialized".to_string())
}

/// Count a hierarchy or assignment mutation. `outcome` is `ok` or an error code.
pub fn record_mutation(operation: &'static str, outcome: &'static str) {
    counter!(
        "hierarchy_mutations_total",
        "operation" => operation,
        "outcome" => outcome
    )
    .increment(1);
}

/// Count a scope resolution by kind (`tenant_admin`, `scoped`, `cached`).
pub fn record_scope_resolution(kind: &'static str) {
    counter!("hierarchy_scope_resolutions_total", "kind" => kind).increment(1);
}

pub fn record_cache(hit: bool) {
    let result = if hit { "hit" } else { "miss" };
    counter!("hierarchy_scope_cache_total", "result" => result).increment(1);
}

/// Records the elapsed time of a store query when dropped.
pub struct QueryTimer {
    operation: &'static str,
    started: Instant,
}

impl QueryTimer {
    pub fn start(operation: &'static str) -> Self {
        Self {
            operation,
            started: Instant::now(),
        }
    }
}

impl Drop for QueryTimer {
    fn drop(&mut self) {
        histogram!(
            "hierarchy_db_query_duration_seconds",
            "operation" => self.operation
        )
        .record(self.started.elapsed().as_secs_f64());
    }
}

/// Count a finished mutation and log it by outcome.
pub fn track_mutation<T>(operation: &'static str, result: &HierarchyResult<T>) {
    match result {
        Ok(_) => record_mutation(operation, "ok"),
        Err(err) => {
            record_mutation(operation, err.code());
            if err.is_rejection() {
                tracing::warn!(operation, code = err.code(), error = %err, "Mutation rejected");
            } else {
                tracing::error!(operation, code = err.code(), error = %err, "Mutation failed");
            }
        }
    }
}
