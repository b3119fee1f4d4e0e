//! Structured lifecycle events for batch operations.
//!
//! - `BatchSpan` scoping log lines to one fetch or bulk edit
//! - `emit_*` functions for clone, write and commit milestones
//!
//! Events are emitted at `info!` (failures at `warn!`) with an `event` field
//! so they can be filtered in JSON output.

use std::fmt::Display;
use std::future::Future;

use tracing::instrument::Instrumented;
use tracing::{info, warn, Instrument};

/// Span scoping every log line of one fetch or bulk edit.
///
/// ```ignore
/// let span = BatchSpan::new("apply", "acme");
/// span.in_scope_of(async { /* ... */ }).await;
/// // every log line now carries operation=apply scope=acme
/// ```
#[derive(Debug, Clone)]
pub struct BatchSpan {
    span: tracing::Span,
}

impl BatchSpan {
    pub fn new(operation: &str, scope: &str) -> Self {
        Self {
            span: tracing::info_span!("runson.batch", operation = %operation, scope = %scope),
        }
    }

    /// Enter the span for a synchronous section.
    pub fn enter(&self) -> tracing::span::Entered<'_> {
        self.span.enter()
    }

    /// Attach the span to a future.
    pub fn in_scope_of<F: Future>(&self, future: F) -> Instrumented<F> {
        future.instrument(self.span.clone())
    }
}

pub fn emit_batch_started(operation: &str, units: usize) {
    info!(event = "batch.started", operation = %operation, units = units);
}

/// Emit event: batch finished with duration and per-unit tallies.
pub fn emit_batch_finished(operation: &str, duration_ms: u64, succeeded: usize, failed: usize) {
    info!(
        event = "batch.finished",
        operation = %operation,
        duration_ms = duration_ms,
        succeeded = succeeded,
        failed = failed,
    );
}

pub fn emit_branch_cloned(directory: &str) {
    info!(event = "branch.cloned", directory = %directory);
}

pub fn emit_clone_failed(key: &str, error: &dyn Display) {
    warn!(event = "branch.clone_failed", key = %key, error = %error);
}

pub fn emit_write_failed(path: &str, error: &dyn Display) {
    warn!(event = "file.write_failed", path = %path, error = %error);
}

/// Emit event: one branch committed; `receipt` describes how.
pub fn emit_commit_finished(directory: &str, receipt: &dyn Display) {
    info!(event = "branch.committed", directory = %directory, receipt = %receipt);
}

pub fn emit_commit_failed(directory: &str, error: &dyn Display) {
    warn!(event = "branch.commit_failed", directory = %directory, error = %error);
}
