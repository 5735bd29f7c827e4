//! Per-table transfer state machine.
//!
//! ```text
//! Pending -> Staged -> Exported -> Loaded -> Verified
//!     \         \          \          \
//!      +---------+----------+----------+--> Failed
//! ```
//!
//! Phases only move forward. The first error stops the table where it is,
//! and the task never retries on its own.

use crate::destination::{DestinationWarehouse, LoadRequest, SourceFormat, WriteDisposition};
use crate::error::{Result, TransferError};
use crate::source::{ExportOptions, ExportSummary, SourceWarehouse, TableRef};
use crate::staging::StagingContext;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Transfer phase of a single table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Pending,
    Staged,
    Exported,
    Loaded,
    Verified,
    Failed,
}

impl Phase {
    /// The phase reached by completing the next step, if any.
    pub fn next(&self) -> Option<Phase> {
        match self {
            Phase::Pending => Some(Phase::Staged),
            Phase::Staged => Some(Phase::Exported),
            Phase::Exported => Some(Phase::Loaded),
            Phase::Loaded => Some(Phase::Verified),
            Phase::Verified | Phase::Failed => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Verified | Phase::Failed)
    }
}

impl std::fmt::Display for Phase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Phase::Pending => "pending",
            Phase::Staged => "staged",
            Phase::Exported => "exported",
            Phase::Loaded => "loaded",
            Phase::Verified => "verified",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Source and destination row counts disagree after a load.
///
/// Not a failure: concurrent source writes can legitimately cause it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountMismatch {
    pub source_rows: i64,
    pub destination_rows: i64,
}

impl RowCountMismatch {
    /// Destination minus source.
    pub fn difference(&self) -> i64 {
        self.destination_rows - self.source_rows
    }
}

impl std::fmt::Display for RowCountMismatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "row count mismatch: source={} destination={} ({:+})",
            self.source_rows,
            self.destination_rows,
            self.difference()
        )
    }
}

/// Category of a table failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    SourceNotFound,
    Stage,
    Export,
    Load,
    Verify,
}

impl FailureKind {
    fn of(err: &TransferError) -> Self {
        match err {
            TransferError::SourceNotFound { .. } => FailureKind::SourceNotFound,
            TransferError::Export { .. } => FailureKind::Export,
            TransferError::Load { .. } => FailureKind::Load,
            TransferError::Verify { .. } => FailureKind::Verify,
            _ => FailureKind::Stage,
        }
    }
}

/// A table that reached `Verified`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSuccess {
    pub table: String,
    pub source_rows: i64,
    pub destination_rows: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<RowCountMismatch>,
    pub phases: Vec<Phase>,
    pub elapsed_seconds: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportSummary>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub load_job_id: Option<String>,
}

/// A table that stopped in `Failed`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableFailure {
    pub table: String,
    /// Last phase completed before the error.
    pub phase: Phase,
    pub kind: FailureKind,
    pub error: String,
    pub retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_rows: Option<i64>,
    pub elapsed_seconds: f64,
}

/// Terminal result of one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TableOutcome {
    Succeeded(TableSuccess),
    Failed(TableFailure),
}

impl TableOutcome {
    pub fn table(&self) -> &str {
        match self {
            TableOutcome::Succeeded(s) => &s.table,
            TableOutcome::Failed(f) => &f.table,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, TableOutcome::Succeeded(_))
    }

    /// Failure record for a task that never produced an outcome (e.g. panicked).
    pub fn aborted(table: impl Into<String>, message: impl Into<String>) -> Self {
        TableOutcome::Failed(TableFailure {
            table: table.into(),
            phase: Phase::Pending,
            kind: FailureKind::Stage,
            error: message.into(),
            retryable: true,
            source_rows: None,
            elapsed_seconds: 0.0,
        })
    }
}

/// Per-task inputs that do not change across the batch.
#[derive(Debug, Clone)]
pub struct TaskSettings {
    pub source_database: String,
    pub source_schema: String,
    pub dataset: String,
    pub overwrite: bool,
    pub export: ExportOptions,
}

/// One table's trip through the four phases.
#[derive(Debug)]
pub struct TableTransferTask {
    pub table: String,
    pub phase: Phase,
    /// Every phase entered, starting with `Pending`.
    pub history: Vec<Phase>,
    pub source_rows: Option<i64>,
    pub destination_rows: Option<i64>,
    pub elapsed: Duration,
    pub error: Option<TransferError>,
    warning: Option<RowCountMismatch>,
    export: Option<ExportSummary>,
    load_job_id: Option<String>,
}

impl TableTransferTask {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            phase: Phase::Pending,
            history: vec![Phase::Pending],
            source_rows: None,
            destination_rows: None,
            elapsed: Duration::ZERO,
            error: None,
            warning: None,
            export: None,
            load_job_id: None,
        }
    }

    /// Last phase completed successfully.
    pub fn last_completed(&self) -> Phase {
        self.history
            .iter()
            .rev()
            .copied()
            .find(|p| *p != Phase::Failed)
            .unwrap_or(Phase::Pending)
    }

    fn advance(&mut self, to: Phase) {
        debug_assert_eq!(self.phase.next(), Some(to), "out-of-order phase transition");
        self.phase = to;
        self.history.push(to);
        debug!("{}: {}", self.table, to);
    }

    fn fail(&mut self, err: TransferError) {
        error!("{}: failed after {} - {}", self.table, self.phase, err);
        self.phase = Phase::Failed;
        self.history.push(Phase::Failed);
        self.error = Some(err);
    }

    /// Run every remaining phase and return the terminal outcome.
    pub async fn execute(
        &mut self,
        source: &dyn SourceWarehouse,
        destination: &dyn DestinationWarehouse,
        staging: &StagingContext,
        settings: &TaskSettings,
    ) -> TableOutcome {
        let started = Instant::now();
        info!("{}: starting transfer", self.table);

        let result = self.run_phases(source, destination, staging, settings).await;
        self.elapsed = started.elapsed();
        if let Err(err) = result {
            self.fail(err);
        }
        self.outcome()
    }

    async fn run_phases(
        &mut self,
        source: &dyn SourceWarehouse,
        destination: &dyn DestinationWarehouse,
        staging: &StagingContext,
        settings: &TaskSettings,
    ) -> Result<()> {
        let source_table = TableRef::new(
            &settings.source_database,
            &settings.source_schema,
            &self.table,
        );
        let staged_table = staging.staging_table(&source_table);

        // Pending -> Staged
        let source_rows = self
            .stage(source, &source_table, &staged_table, staging)
            .await?;
        self.source_rows = Some(source_rows);
        self.advance(Phase::Staged);

        // Staged -> Exported
        let export = self
            .export(source, &staged_table, staging, settings)
            .await
            .map_err(|e| self.wrap(e, Phase::Exported))?;
        debug!(
            "{}: unloaded {} rows ({} bytes)",
            self.table, export.rows_unloaded, export.output_bytes
        );
        self.export = Some(export);
        self.advance(Phase::Exported);

        // Exported -> Loaded
        let load = self
            .load(destination, staging, settings)
            .await
            .map_err(|e| self.wrap(e, Phase::Loaded))?;
        self.load_job_id = Some(load);
        self.advance(Phase::Loaded);

        // Loaded -> Verified
        let destination_rows = destination
            .row_count(&settings.dataset, &self.table)
            .await
            .map_err(|e| self.wrap(e, Phase::Verified))?;
        self.destination_rows = Some(destination_rows);
        if destination_rows != source_rows {
            let mismatch = RowCountMismatch {
                source_rows,
                destination_rows,
            };
            warn!("{}: {}", self.table, mismatch);
            self.warning = Some(mismatch);
        }
        self.advance(Phase::Verified);
        info!(
            "{}: verified ({} source rows, {} destination rows)",
            self.table, source_rows, destination_rows
        );

        Ok(())
    }

    /// Tag an error with the step that raised it.
    fn wrap(&self, err: TransferError, step: Phase) -> TransferError {
        let table = self.table.clone();
        let source = Box::new(err);
        match step {
            Phase::Exported => TransferError::Export { table, source },
            Phase::Loaded => TransferError::Load { table, source },
            Phase::Verified => TransferError::Verify { table, source },
            _ => TransferError::Stage { table, source },
        }
    }

    /// Check the table exists, count it, and snapshot it into the staging schema.
    async fn stage(
        &self,
        source: &dyn SourceWarehouse,
        source_table: &TableRef,
        staged_table: &TableRef,
        staging: &StagingContext,
    ) -> Result<i64> {
        staging
            .prefix(&self.table)
            .map_err(|e| self.wrap(e, Phase::Staged))?;

        let exists = source
            .table_exists(source_table)
            .await
            .map_err(|e| self.wrap(e, Phase::Staged))?;
        if !exists {
            return Err(TransferError::SourceNotFound {
                table: source_table.to_string(),
            });
        }

        let rows = source
            .row_count(source_table)
            .await
            .map_err(|e| self.wrap(e, Phase::Staged))?;
        source
            .copy_table(source_table, staged_table)
            .await
            .map_err(|e| self.wrap(e, Phase::Staged))?;
        debug!("{}: staged {} rows into {}", self.table, rows, staged_table);
        Ok(rows)
    }

    async fn export(
        &self,
        source: &dyn SourceWarehouse,
        staged_table: &TableRef,
        staging: &StagingContext,
        settings: &TaskSettings,
    ) -> Result<ExportSummary> {
        let prefix = staging.prefix(&self.table)?;
        source
            .export_table(staged_table, &staging.stage, &prefix, &settings.export)
            .await
    }

    async fn load(
        &self,
        destination: &dyn DestinationWarehouse,
        staging: &StagingContext,
        settings: &TaskSettings,
    ) -> Result<String> {
        let request = LoadRequest {
            dataset: settings.dataset.clone(),
            table: self.table.clone(),
            source_uris: vec![staging.load_uri(&self.table)?],
            write_disposition: WriteDisposition::from_overwrite(settings.overwrite),
            source_format: SourceFormat::Parquet,
            autodetect: true,
        };
        let summary = destination.load_from_storage(&request).await?;
        debug!(
            "{}: load job {} wrote {:?} rows",
            self.table, summary.job_id, summary.output_rows
        );
        Ok(summary.job_id)
    }

    /// Terminal outcome. Only meaningful once `phase` is terminal.
    pub fn outcome(&self) -> TableOutcome {
        let elapsed_seconds = self.elapsed.as_secs_f64();
        match &self.error {
            None => TableOutcome::Succeeded(TableSuccess {
                table: self.table.clone(),
                source_rows: self.source_rows.unwrap_or(0),
                destination_rows: self.destination_rows.unwrap_or(0),
                warning: self.warning,
                phases: self.history.clone(),
                elapsed_seconds,
                export: self.export.clone(),
                load_job_id: self.load_job_id.clone(),
            }),
            Some(err) => TableOutcome::Failed(TableFailure {
                table: self.table.clone(),
                phase: self.last_completed(),
                kind: FailureKind::of(err),
                error: flatten(err),
                retryable: err.is_retryable(),
                source_rows: self.source_rows,
                elapsed_seconds,
            }),
        }
    }
}

/// Error plus its causes on one line.
fn flatten(err: &TransferError) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
