//! Batch-level aggregate of per-table outcomes.

use super::task::{RowCountMismatch, TableFailure, TableOutcome, TableSuccess};
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

/// Result of a transfer batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferStats {
    /// Unique run identifier.
    pub run_id: String,

    /// Fingerprint of the configuration the batch ran with.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config_hash: Option<String>,

    /// Tables requested (after discovery and exclusion).
    pub tables_requested: usize,

    /// Tables that reached `Verified`, in completion order.
    pub processed: Vec<TableSuccess>,

    /// Tables that failed, in completion order.
    pub failed: Vec<TableFailure>,

    /// Tables never started (stop-on-error or cancellation).
    pub skipped: Vec<String>,

    /// Whether the batch was cancelled before every table ran.
    pub cancelled: bool,

    /// When the batch started.
    pub started_at: DateTime<Utc>,

    /// When the batch finished. `None` until finalized.
    pub completed_at: Option<DateTime<Utc>>,

    /// Wall-clock duration in seconds.
    pub duration_seconds: f64,
}

impl TransferStats {
    pub fn new(run_id: impl Into<String>, tables_requested: usize) -> Self {
        Self {
            run_id: run_id.into(),
            config_hash: None,
            tables_requested,
            processed: Vec::new(),
            failed: Vec::new(),
            skipped: Vec::new(),
            cancelled: false,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: 0.0,
        }
    }

    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = Some(hash.into());
        self
    }

    /// Fold one terminal outcome into the aggregate.
    pub fn record(&mut self, outcome: TableOutcome) {
        match outcome {
            TableOutcome::Succeeded(success) => self.processed.push(success),
            TableOutcome::Failed(failure) => self.failed.push(failure),
        }
    }

    /// Note a table that was never started.
    pub fn skip(&mut self, table: impl Into<String>) {
        self.skipped.push(table.into());
    }

    /// Stamp the completion time. Calling again re-stamps.
    pub fn finalize(&mut self) {
        let now = Utc::now();
        self.duration_seconds = (now - self.started_at)
            .to_std()
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);
        self.completed_at = Some(now);
    }

    pub fn is_finalized(&self) -> bool {
        self.completed_at.is_some()
    }

    /// True when nothing failed, was skipped, or was cancelled.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.skipped.is_empty() && !self.cancelled
    }

    /// Total destination rows across processed tables.
    pub fn rows_transferred(&self) -> i64 {
        self.processed.iter().map(|s| s.destination_rows).sum()
    }

    /// Processed tables whose counts disagreed.
    pub fn warnings(&self) -> impl Iterator<Item = (&str, &RowCountMismatch)> {
        self.processed
            .iter()
            .filter_map(|s| s.warning.as_ref().map(|w| (s.table.as_str(), w)))
    }

    /// Move a recovered table from `failed` to `processed`.
    pub fn recover(&mut self, success: TableSuccess) {
        self.failed.retain(|f| f.table != success.table);
        self.processed.push(success);
    }

    /// Replace the failure record of a table that failed again.
    pub fn replace_failure(&mut self, failure: TableFailure) {
        match self.failed.iter_mut().find(|f| f.table == failure.table) {
            Some(existing) => *existing = failure,
            None => self.failed.push(failure),
        }
    }

    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Human-readable report.
    pub fn summary(&self) -> String {
        let status = if self.cancelled {
            "cancelled"
        } else if self.failed.is_empty() && self.skipped.is_empty() {
            "completed"
        } else {
            "completed with failures"
        };

        let mut out = String::new();
        let _ = writeln!(out, "Run {} {}", self.run_id, status);
        let _ = writeln!(
            out,
            "  Tables: {} processed, {} failed, {} skipped (of {})",
            self.processed.len(),
            self.failed.len(),
            self.skipped.len(),
            self.tables_requested
        );
        let _ = writeln!(out, "  Rows:   {}", self.rows_transferred());
        let _ = writeln!(out, "  Time:   {:.1}s", self.duration_seconds);

        for (table, warning) in self.warnings() {
            let _ = writeln!(out, "  WARN  {}: {}", table, warning);
        }
        for failure in &self.failed {
            let _ = writeln!(
                out,
                "  FAIL  {} (after {}): {}",
                failure.table, failure.phase, failure.error
            );
        }
        if !self.skipped.is_empty() {
            let _ = writeln!(out, "  SKIP  {}", self.skipped.join(", "));
        }
        out
    }
}
