//! Transfer orchestrator - batch workflow coordinator.
//!
//! Provisions the staging path once, then runs one [`TableTransferTask`] per
//! table and folds every terminal outcome into a [`TransferStats`].

mod health;

pub use health::{HealthCheckResult, RowCountCheck};

use crate::config::{Config, TransferRequest};
use crate::destination::{BigQueryClient, DestinationWarehouse};
use crate::error::{Result, TransferError};
use crate::retry::{RetryDisposition, RetryPolicy};
use crate::source::{ExportOptions, SnowflakeClient, SourceWarehouse, TableRef};
use crate::staging::{StagingContext, StagingCoordinator};
use crate::transfer::{
    FailureKind, TableFailure, TableOutcome, TableTransferTask, TaskSettings, TransferStats,
};
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Transfer orchestrator.
pub struct TransferOrchestrator {
    config: Config,
    request: TransferRequest,
    source: Arc<dyn SourceWarehouse>,
    destination: Arc<dyn DestinationWarehouse>,
    staging: Option<Arc<StagingContext>>,
    stats: TransferStats,
    cancel: CancellationToken,
}

impl TransferOrchestrator {
    /// Create an orchestrator talking to the configured warehouses.
    pub fn new(config: Config) -> Result<Self> {
        let poll_interval = config.transfer.poll_interval();
        let source = SnowflakeClient::new(config.source.clone(), poll_interval)?;
        let destination = BigQueryClient::new(config.destination.clone(), poll_interval)?;
        Ok(Self::with_clients(
            config,
            Arc::new(source),
            Arc::new(destination),
        ))
    }

    /// Create an orchestrator over caller-supplied clients.
    pub fn with_clients(
        config: Config,
        source: Arc<dyn SourceWarehouse>,
        destination: Arc<dyn DestinationWarehouse>,
    ) -> Self {
        let request = config.request();
        let stats = TransferStats::new(uuid::Uuid::new_v4().to_string(), 0)
            .with_config_hash(config.hash());
        Self {
            config,
            request,
            source,
            destination,
            staging: None,
            stats,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the request derived from the configuration.
    pub fn with_request(mut self, request: TransferRequest) -> Self {
        self.request = request;
        self
    }

    /// Stop scheduling new tables once `token` is cancelled.
    pub fn with_cancel(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn request(&self) -> &TransferRequest {
        &self.request
    }

    /// Aggregate of the most recent batch (or of single-table calls since).
    pub fn stats(&self) -> &TransferStats {
        &self.stats
    }

    /// Staging context, once [`prepare`](Self::prepare) has run.
    pub fn staging_context(&self) -> Option<&StagingContext> {
        self.staging.as_deref()
    }

    /// Provision the staging path and the destination dataset.
    ///
    /// Safe to call repeatedly. Any failure is fatal to the batch.
    pub async fn prepare(&mut self) -> Result<Arc<StagingContext>> {
        let coordinator = StagingCoordinator::new(self.source.clone(), &self.config);
        let context = coordinator.prepare().await?;

        let dataset = &self.request.destination_dataset;
        self.destination
            .ensure_dataset(dataset)
            .await
            .map_err(|e| TransferError::provisioning(format!("dataset {}", dataset), e.to_string()))?;

        info!(
            "Staging ready: stage {} over gcs://{}/, dataset {}",
            context.stage.name, context.bucket(), dataset
        );
        let context = Arc::new(context);
        self.staging = Some(context.clone());
        Ok(context)
    }

    async fn ensure_prepared(&mut self) -> Result<Arc<StagingContext>> {
        if let Some(context) = &self.staging {
            return Ok(context.clone());
        }
        self.prepare().await
    }

    fn settings(&self, overwrite: bool) -> TaskSettings {
        TaskSettings {
            source_database: self.request.source_database.clone(),
            source_schema: self.request.source_schema.clone(),
            dataset: self.request.destination_dataset.clone(),
            overwrite,
            export: ExportOptions {
                max_file_size: self.config.transfer.max_file_size,
            },
        }
    }

    fn new_stats(&self, tables_requested: usize) -> TransferStats {
        TransferStats::new(uuid::Uuid::new_v4().to_string(), tables_requested)
            .with_config_hash(self.config.hash())
    }

    /// Run the configured request: prepare, then transfer the listed tables or
    /// every discovered one.
    pub async fn run(&mut self) -> Result<TransferStats> {
        let request = self.request.clone();
        info!(
            "Starting transfer {}.{} -> {}",
            request.source_database, request.source_schema, request.destination_dataset
        );
        self.prepare().await?;

        if request.discover_all() {
            self.transfer_all(request.overwrite, request.continue_on_error)
                .await
        } else {
            self.transfer_tables(&request.tables, request.overwrite, request.continue_on_error)
                .await
        }
    }

    /// Transfer one table and fold the outcome into [`stats`](Self::stats).
    pub async fn transfer_table(&mut self, table: &str, overwrite: bool) -> Result<TableOutcome> {
        let staging = self.ensure_prepared().await?;
        let outcome = run_table(
            self.source.clone(),
            self.destination.clone(),
            staging,
            table.to_string(),
            Arc::new(self.settings(overwrite)),
        )
        .await;

        self.stats.tables_requested += 1;
        self.stats.record(outcome.clone());
        self.stats.finalize();
        Ok(outcome)
    }

    /// Transfer `tables`, at most `workers` at a time.
    ///
    /// Only provisioning failures are returned as errors; table failures are
    /// recorded in the returned stats. With `continue_on_error = false` the
    /// first failure stops new tables from starting and the rest are listed
    /// as skipped.
    pub async fn transfer_tables(
        &mut self,
        tables: &[String],
        overwrite: bool,
        continue_on_error: bool,
    ) -> Result<TransferStats> {
        let tables = dedupe(tables);
        let mut stats = self.new_stats(tables.len());

        if tables.is_empty() {
            info!("No tables to transfer");
            stats.finalize();
            self.stats = stats.clone();
            return Ok(stats);
        }
        if self.cancel.is_cancelled() {
            info!("Cancellation requested before start, skipping {} tables", tables.len());
            stats.cancelled = true;
            stats.skipped = tables;
            stats.finalize();
            self.stats = stats.clone();
            return Ok(stats);
        }

        let staging = self.ensure_prepared().await?;
        let settings = Arc::new(self.settings(overwrite));
        let workers = self.config.transfer.workers.max(1);
        let semaphore = Arc::new(Semaphore::new(workers));

        info!(
            "Transferring {} tables with {} workers (run {})",
            tables.len(),
            workers,
            stats.run_id
        );

        let mut running = FuturesUnordered::new();
        let mut halted = false;
        let mut queue = tables.into_iter();

        while let Some(table) = queue.next() {
            while let Some(Some((name, joined))) = running.next().now_or_never() {
                halted |= fold(&mut stats, name, joined, continue_on_error);
            }
            while semaphore.available_permits() == 0 {
                match running.next().await {
                    Some((name, joined)) => {
                        halted |= fold(&mut stats, name, joined, continue_on_error)
                    }
                    None => break,
                }
            }

            if self.cancel.is_cancelled() {
                info!("Cancellation requested, stopping new transfers");
                stats.cancelled = true;
            }
            if halted || stats.cancelled {
                stats.skip(table);
                stats.skipped.extend(queue.by_ref());
                break;
            }

            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|_| TransferError::Cancelled)?;
            let handle = tokio::spawn(run_table(
                self.source.clone(),
                self.destination.clone(),
                staging.clone(),
                table.clone(),
                settings.clone(),
            ));
            running.push(async move {
                let joined = handle.await;
                drop(permit);
                (table, joined)
            });
        }

        while let Some((name, joined)) = running.next().await {
            fold(&mut stats, name, joined, continue_on_error);
        }

        if !stats.skipped.is_empty() {
            warn!(
                "{} tables not started: {}",
                stats.skipped.len(),
                stats.skipped.join(", ")
            );
        }
        stats.finalize();
        info!(
            "Run {} finished: {} processed, {} failed, {} skipped in {:.1}s",
            stats.run_id,
            stats.processed.len(),
            stats.failed.len(),
            stats.skipped.len(),
            stats.duration_seconds
        );

        self.stats = stats.clone();
        Ok(stats)
    }

    /// Transfer every table in the source schema, minus exclusions.
    pub async fn transfer_all(
        &mut self,
        overwrite: bool,
        continue_on_error: bool,
    ) -> Result<TransferStats> {
        let tables = self.discover_tables().await?;
        self.transfer_tables(&tables, overwrite, continue_on_error)
            .await
    }

    /// Tables in the source schema, minus `exclude_tables`.
    pub async fn discover_tables(&self) -> Result<Vec<String>> {
        let all = self
            .source
            .list_tables(&self.request.source_database, &self.request.source_schema)
            .await?;
        let total = all.len();
        let tables: Vec<String> = all
            .into_iter()
            .filter(|t| !self.config.transfer.is_excluded(t))
            .collect();
        info!(
            "Discovered {} tables in {}.{} ({} excluded)",
            tables.len(),
            self.request.source_database,
            self.request.source_schema,
            total - tables.len()
        );
        Ok(tables)
    }

    /// Tables currently in the destination dataset.
    pub async fn destination_tables(&self) -> Result<Vec<String>> {
        self.destination
            .list_tables(&self.request.destination_dataset)
            .await
    }

    /// Re-run failed tables under `policy` and update `stats` in place.
    ///
    /// Only retryable failures are attempted. In append mode a table that
    /// failed verification already holds the loaded rows, so it is left alone.
    /// Returns the number of tables recovered.
    pub async fn retry_failed(
        &mut self,
        stats: &mut TransferStats,
        policy: &RetryPolicy,
        overwrite: bool,
    ) -> Result<usize> {
        let candidates: Vec<String> = stats
            .failed
            .iter()
            .filter(|f| f.retryable && (overwrite || f.kind != FailureKind::Verify))
            .map(|f| f.table.clone())
            .collect();
        if candidates.is_empty() {
            return Ok(0);
        }

        let staging = self.ensure_prepared().await?;
        let settings = Arc::new(self.settings(overwrite));
        info!("Retrying {} failed tables", candidates.len());

        let mut recovered = 0;
        for table in candidates {
            if self.cancel.is_cancelled() {
                stats.cancelled = true;
                break;
            }

            let attempt = policy
                .run(
                    || {
                        let run = run_table(
                            self.source.clone(),
                            self.destination.clone(),
                            staging.clone(),
                            table.clone(),
                            settings.clone(),
                        );
                        async move {
                            match run.await {
                                TableOutcome::Succeeded(success) => Ok(success),
                                TableOutcome::Failed(failure) => Err(failure),
                            }
                        }
                    },
                    |failure: &TableFailure| {
                        if failure.retryable {
                            RetryDisposition::Retry
                        } else {
                            RetryDisposition::Stop
                        }
                    },
                )
                .await;

            match attempt {
                Ok(success) => {
                    info!("{}: recovered on retry", success.table);
                    stats.recover(success);
                    recovered += 1;
                }
                Err(e) => {
                    let failure = e.into_inner();
                    warn!("{}: still failing - {}", failure.table, failure.error);
                    stats.replace_failure(failure);
                }
            }
        }

        stats.finalize();
        self.stats = stats.clone();
        Ok(recovered)
    }

    /// Compare row counts without moving data.
    ///
    /// An empty `tables` list checks every discovered table.
    pub async fn validate(&self, tables: &[String]) -> Result<Vec<RowCountCheck>> {
        let tables = if tables.is_empty() {
            self.discover_tables().await?
        } else {
            dedupe(tables)
        };
        let dataset = &self.request.destination_dataset;

        let mut checks = Vec::with_capacity(tables.len());
        for table in tables {
            let source_table = TableRef::new(
                &self.request.source_database,
                &self.request.source_schema,
                &table,
            );
            let source_rows = self.source.row_count(&source_table).await?;
            let destination_rows = if self.destination.table_exists(dataset, &table).await? {
                self.destination.row_count(dataset, &table).await?
            } else {
                0
            };

            let check = RowCountCheck::new(table, source_rows, destination_rows);
            if check.matches {
                info!("{}: {} rows (match)", check.table, source_rows);
            } else {
                warn!(
                    "{}: source={} destination={} (MISMATCH)",
                    check.table, source_rows, destination_rows
                );
            }
            checks.push(check);
        }
        Ok(checks)
    }

    /// Ping both warehouses.
    pub async fn health_check(&self) -> HealthCheckResult {
        let mut result = HealthCheckResult::default();

        let started = Instant::now();
        match self.source.ping().await {
            Ok(version) => {
                result.source_connected = true;
                result.source_version = Some(version);
            }
            Err(e) => result.source_error = Some(e.to_string()),
        }
        result.source_latency_ms = started.elapsed().as_millis() as u64;

        if result.source_connected {
            let database = &self.request.source_database;
            let schema = &self.request.source_schema;
            match self.source.schema_exists(database, schema).await {
                Ok(exists) => {
                    if !exists {
                        warn!("Source schema {}.{} not found", database, schema);
                    }
                    result.source_schema_exists = Some(exists);
                }
                Err(e) => result.source_error = Some(e.to_string()),
            }
        }

        let started = Instant::now();
        match self.destination.ping().await {
            Ok(()) => result.destination_connected = true,
            Err(e) => result.destination_error = Some(e.to_string()),
        }
        result.destination_latency_ms = started.elapsed().as_millis() as u64;

        result.healthy = result.source_connected
            && result.source_schema_exists == Some(true)
            && result.destination_connected;
        result
    }
}

/// Run one table to a terminal outcome.
async fn run_table(
    source: Arc<dyn SourceWarehouse>,
    destination: Arc<dyn DestinationWarehouse>,
    staging: Arc<StagingContext>,
    table: String,
    settings: Arc<TaskSettings>,
) -> TableOutcome {
    let mut task = TableTransferTask::new(table);
    task.execute(source.as_ref(), destination.as_ref(), &staging, &settings)
        .await
}

/// Record a finished task. Returns true when scheduling should stop.
fn fold(
    stats: &mut TransferStats,
    table: String,
    joined: std::result::Result<TableOutcome, JoinError>,
    continue_on_error: bool,
) -> bool {
    let outcome = joined.unwrap_or_else(|e| {
        error!("{}: task panicked - {}", table, e);
        TableOutcome::aborted(&table, format!("Task panicked: {}", e))
    });

    let failed = !outcome.is_success();
    if let TableOutcome::Succeeded(success) = &outcome {
        info!(
            "{}: completed ({} rows, {:.1}s)",
            success.table, success.destination_rows, success.elapsed_seconds
        );
    }
    stats.record(outcome);

    if failed && !continue_on_error {
        warn!("{}: failed, not starting further tables", table);
        return true;
    }
    false
}

/// Drop repeated names, keeping the first occurrence.
fn dedupe(tables: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    tables
        .iter()
        .filter(|t| seen.insert(t.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_config, FailAt, FakeWarehouse, DATASET};
    use crate::transfer::Phase;
    use std::time::Duration;

    fn orchestrator(fake: &Arc<FakeWarehouse>) -> TransferOrchestrator {
        TransferOrchestrator::with_clients(test_config(), fake.clone(), fake.clone())
    }

    fn names(tables: &[&str]) -> Vec<String> {
        tables.iter().map(|t| t.to_string()).collect()
    }

    fn fast_retry(attempts: usize) -> RetryPolicy {
        RetryPolicy::new(attempts, Duration::ZERO, Duration::ZERO)
    }

    #[tokio::test]
    async fn test_prepare_is_idempotent_and_creates_dataset() {
        let fake = Arc::new(FakeWarehouse::new());
        let mut orch = orchestrator(&fake);

        let first = orch.prepare().await.unwrap();
        let second = orch.prepare().await.unwrap();
        assert_eq!(*first, *second);
        assert!(orch.staging_context().is_some());

        let state = fake.state();
        assert!(state.datasets.contains(DATASET));
        assert_eq!(state.stages.len(), 1);
        let creates = state
            .calls
            .iter()
            .filter(|c| c.starts_with("create_dataset:"))
            .count();
        assert_eq!(creates, 1);
    }

    #[tokio::test]
    async fn test_single_table_end_to_end() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 10_000)]));
        let mut orch = orchestrator(&fake);

        let stats = orch
            .transfer_tables(&names(&["ORDERS"]), true, true)
            .await
            .unwrap();

        assert_eq!(stats.processed.len(), 1);
        assert!(stats.failed.is_empty());
        let orders = &stats.processed[0];
        assert_eq!(orders.source_rows, 10_000);
        assert_eq!(orders.destination_rows, 10_000);
        assert!(orders.warning.is_none());
        assert_eq!(orders.phases.last(), Some(&Phase::Verified));
        assert!(stats.is_finalized());
        assert_eq!(fake.destination_rows("ORDERS"), Some(10_000));
        assert_eq!(fake.state().bucket.get("ORDERS"), Some(&10_000));
    }

    #[tokio::test]
    async fn test_provisioning_completes_before_any_table() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("A", 1), ("B", 2)]));
        let mut orch = orchestrator(&fake);
        orch.transfer_tables(&names(&["A", "B"]), true, true)
            .await
            .unwrap();

        let calls = fake.calls();
        let last_provisioning = calls
            .iter()
            .rposition(|c| c.starts_with("ensure_") || c.starts_with("create_dataset"))
            .unwrap();
        let first_table = calls
            .iter()
            .position(|c| c.starts_with("table_exists:"))
            .unwrap();
        assert!(last_provisioning < first_table);
    }

    #[tokio::test]
    async fn test_provisioning_failure_aborts_batch() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("A", 1)]));
        fake.fail_provisioning("Insufficient privileges to operate on account");
        let mut orch = orchestrator(&fake);

        let err = orch
            .transfer_tables(&names(&["A"]), true, true)
            .await
            .unwrap_err();
        assert!(matches!(err, TransferError::Provisioning { .. }));
        assert_eq!(err.exit_code(), 3);
        assert!(fake.calls_for("A").is_empty());
    }

    #[tokio::test]
    async fn test_continue_on_error_runs_every_table() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[
            ("T1", 10),
            ("T2", 20),
            ("T3", 30),
            ("T4", 40),
        ]));
        fake.fail("T2", FailAt::Export, "stage not authorized");
        let mut orch = orchestrator(&fake);

        let stats = orch
            .transfer_tables(&names(&["T1", "T2", "T3", "T4"]), true, true)
            .await
            .unwrap();

        let processed: Vec<_> = stats.processed.iter().map(|s| s.table.as_str()).collect();
        assert_eq!(processed, vec!["T1", "T3", "T4"]);
        assert_eq!(stats.failed.len(), 1);
        assert_eq!(stats.failed[0].table, "T2");
        assert_eq!(stats.failed[0].phase, Phase::Staged);
        assert!(stats.skipped.is_empty());
        assert!(!stats.is_success());
    }

    #[tokio::test]
    async fn test_stop_on_error_skips_remaining_tables() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[
            ("T1", 10),
            ("T2", 20),
            ("T3", 30),
            ("T4", 40),
        ]));
        fake.fail("T2", FailAt::Load, "load job failed");
        let mut orch = orchestrator(&fake);

        let stats = orch
            .transfer_tables(&names(&["T1", "T2", "T3", "T4"]), true, false)
            .await
            .unwrap();

        assert_eq!(stats.processed.len(), 1);
        assert_eq!(stats.failed.len(), 1);
        assert_eq!(stats.skipped, vec!["T3", "T4"]);
        assert!(fake.calls_for("T3").is_empty());
        assert!(fake.calls_for("T4").is_empty());
        assert!(stats.processed.len() + stats.failed.len() <= stats.tables_requested);
    }

    #[tokio::test]
    async fn test_stop_on_error_with_workers_lets_in_flight_tables_finish() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[
            ("T1", 10),
            ("T2", 20),
            ("T3", 30),
            ("T4", 40),
            ("T5", 50),
        ]));
        fake.fail("T1", FailAt::SourceCount, "count failed");
        fake.delay_exports(Duration::from_millis(50));
        let mut config = test_config();
        config.transfer.workers = 2;
        let mut orch = TransferOrchestrator::with_clients(config, fake.clone(), fake.clone());

        let stats = orch
            .transfer_tables(&names(&["T1", "T2", "T3", "T4", "T5"]), true, false)
            .await
            .unwrap();

        let processed: Vec<_> = stats.processed.iter().map(|s| s.table.as_str()).collect();
        let failed: Vec<_> = stats.failed.iter().map(|f| f.table.as_str()).collect();
        assert_eq!(processed, vec!["T2"]);
        assert_eq!(failed, vec!["T1"]);
        assert_eq!(stats.skipped, vec!["T3", "T4", "T5"]);
        assert!(!stats.cancelled);
        for table in ["T3", "T4", "T5"] {
            assert!(fake.calls_for(table).is_empty());
        }
    }

    #[tokio::test]
    async fn test_overwrite_replaces_and_append_accumulates() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 10_000)]));
        let mut orch = orchestrator(&fake);
        let orders = names(&["ORDERS"]);

        orch.transfer_tables(&orders, true, true).await.unwrap();
        orch.transfer_tables(&orders, true, true).await.unwrap();
        assert_eq!(fake.destination_rows("ORDERS"), Some(10_000));

        let stats = orch.transfer_tables(&orders, false, true).await.unwrap();
        assert_eq!(fake.destination_rows("ORDERS"), Some(20_000));

        let warning = stats.processed[0].warning.expect("append mismatch warning");
        assert_eq!(warning.source_rows, 10_000);
        assert_eq!(warning.destination_rows, 20_000);
    }

    #[tokio::test]
    async fn test_empty_table_list_is_a_finalized_success() {
        let fake = Arc::new(FakeWarehouse::new());
        let mut orch = orchestrator(&fake);

        let stats = orch.transfer_all(true, true).await.unwrap();
        assert_eq!(stats.tables_requested, 0);
        assert!(stats.processed.is_empty());
        assert!(stats.failed.is_empty());
        assert!(stats.is_finalized());
        assert!(stats.is_success());
    }

    #[tokio::test]
    async fn test_transfer_all_applies_exclusions() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[
            ("ORDERS", 3),
            ("CUSTOMERS", 2),
            ("AUDIT_LOG", 99),
        ]));
        let mut config = test_config();
        config.transfer.exclude_tables = vec!["audit_log".into()];
        let mut orch = TransferOrchestrator::with_clients(config, fake.clone(), fake.clone());

        let stats = orch.transfer_all(true, true).await.unwrap();
        let mut processed: Vec<_> = stats.processed.iter().map(|s| s.table.clone()).collect();
        processed.sort();
        assert_eq!(processed, vec!["CUSTOMERS", "ORDERS"]);
        assert!(fake.calls_for("AUDIT_LOG").is_empty());
    }

    #[tokio::test]
    async fn test_run_uses_request_tables() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 4), ("CUSTOMERS", 2)]));
        let mut config = test_config();
        config.transfer.tables = vec!["ORDERS".into()];
        let mut orch = TransferOrchestrator::with_clients(config, fake.clone(), fake.clone());

        let stats = orch.run().await.unwrap();
        assert_eq!(stats.tables_requested, 1);
        assert_eq!(stats.processed[0].table, "ORDERS");
        assert!(stats.config_hash.is_some());
        assert!(fake.calls_for("CUSTOMERS").is_empty());
    }

    #[tokio::test]
    async fn test_run_with_explicit_request_appends() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 4), ("CUSTOMERS", 2)]));
        let mut request = test_config().request();
        request.tables = vec!["CUSTOMERS".into()];
        request.overwrite = false;
        let mut orch = orchestrator(&fake).with_request(request);

        orch.run().await.unwrap();
        orch.run().await.unwrap();

        assert_eq!(orch.request().tables, vec!["CUSTOMERS"]);
        assert_eq!(fake.destination_rows("CUSTOMERS"), Some(4));
        assert!(fake.calls_for("ORDERS").is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_names_run_once() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 4)]));
        let mut orch = orchestrator(&fake);

        let stats = orch
            .transfer_tables(&names(&["ORDERS", "ORDERS"]), true, true)
            .await
            .unwrap();
        assert_eq!(stats.tables_requested, 1);
        assert_eq!(fake.calls_for("ORDERS").iter().filter(|c| c.starts_with("load:")).count(), 1);
    }

    #[tokio::test]
    async fn test_workers_bound_concurrency() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[
            ("T1", 1),
            ("T2", 1),
            ("T3", 1),
            ("T4", 1),
            ("T5", 1),
            ("T6", 1),
        ]));
        fake.delay_exports(Duration::from_millis(20));
        let mut config = test_config();
        config.transfer.workers = 3;
        let mut orch = TransferOrchestrator::with_clients(config, fake.clone(), fake.clone());

        let stats = orch
            .transfer_tables(&names(&["T1", "T2", "T3", "T4", "T5", "T6"]), true, true)
            .await
            .unwrap();

        assert_eq!(stats.processed.len(), 6);
        assert_eq!(fake.max_in_flight(), 3);
    }

    #[tokio::test]
    async fn test_sequential_by_default() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("T1", 1), ("T2", 1), ("T3", 1)]));
        fake.delay_exports(Duration::from_millis(5));
        let mut orch = orchestrator(&fake);

        let stats = orch
            .transfer_tables(&names(&["T1", "T2", "T3"]), true, true)
            .await
            .unwrap();

        assert_eq!(fake.max_in_flight(), 1);
        let order: Vec<_> = stats.processed.iter().map(|s| s.table.as_str()).collect();
        assert_eq!(order, vec!["T1", "T2", "T3"]);
    }

    #[tokio::test]
    async fn test_cancelled_before_start_skips_everything() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("T1", 1), ("T2", 1)]));
        let token = CancellationToken::new();
        token.cancel();
        let mut orch = orchestrator(&fake).with_cancel(token);

        let stats = orch
            .transfer_tables(&names(&["T1", "T2"]), true, true)
            .await
            .unwrap();

        assert!(stats.cancelled);
        assert_eq!(stats.skipped, vec!["T1", "T2"]);
        assert!(stats.processed.is_empty());
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_between_tables_finishes_current_and_skips_rest() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[
            ("T1", 1),
            ("T2", 2),
            ("T3", 3),
            ("T4", 4),
        ]));
        let token = CancellationToken::new();
        fake.cancel_on_export("T2", token.clone());
        let mut orch = orchestrator(&fake).with_cancel(token);

        let stats = orch
            .transfer_tables(&names(&["T1", "T2", "T3", "T4"]), true, true)
            .await
            .unwrap();

        let processed: Vec<_> = stats.processed.iter().map(|s| s.table.as_str()).collect();
        assert_eq!(processed, vec!["T1", "T2"]);
        assert_eq!(stats.skipped, vec!["T3", "T4"]);
        assert!(stats.cancelled);
        assert!(stats.failed.is_empty());
        assert_eq!(fake.destination_rows("T2"), Some(2));
        assert!(fake.calls_for("T3").is_empty());
        assert!(fake.calls_for("T4").is_empty());
    }

    #[tokio::test]
    async fn test_discovered_lower_case_tables_transfer_under_stored_name() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("orders", 3), ("Customers", 2)]));
        let mut orch = orchestrator(&fake);

        let discovered = orch.discover_tables().await.unwrap();
        assert_eq!(discovered, vec!["Customers", "orders"]);

        let stats = orch.transfer_all(true, true).await.unwrap();
        assert!(stats.failed.is_empty());
        assert_eq!(stats.processed.len(), 2);
        assert_eq!(fake.destination_rows("orders"), Some(3));
        assert_eq!(fake.destination_rows("Customers"), Some(2));
        assert!(fake
            .state()
            .source_tables
            .contains_key("ANALYTICS.BQ_STAGING.orders"));
    }

    #[tokio::test]
    async fn test_transfer_table_folds_into_stats() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 7)]));
        let mut orch = orchestrator(&fake);

        let outcome = orch.transfer_table("ORDERS", true).await.unwrap();
        assert!(outcome.is_success());
        let outcome = orch.transfer_table("MISSING", true).await.unwrap();
        assert!(!outcome.is_success());

        let stats = orch.stats();
        assert_eq!(stats.tables_requested, 2);
        assert_eq!(stats.processed.len(), 1);
        assert_eq!(stats.failed.len(), 1);
        assert_eq!(stats.failed[0].kind, FailureKind::SourceNotFound);
    }

    #[tokio::test]
    async fn test_retry_failed_recovers_transient_failures() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 5)]));
        fake.fail("ORDERS", FailAt::Load, "backendError");
        let mut orch = orchestrator(&fake);

        let mut stats = orch
            .transfer_tables(&names(&["ORDERS", "MISSING"]), true, true)
            .await
            .unwrap();
        assert_eq!(stats.failed.len(), 2);

        fake.clear_failures();
        let recovered = orch
            .retry_failed(&mut stats, &fast_retry(2), true)
            .await
            .unwrap();

        assert_eq!(recovered, 1);
        assert_eq!(stats.processed.len(), 1);
        assert_eq!(stats.processed[0].table, "ORDERS");
        assert_eq!(stats.failed.len(), 1);
        assert_eq!(stats.failed[0].table, "MISSING");
        assert_eq!(fake.destination_rows("ORDERS"), Some(5));
        // MISSING is not retryable, so it was never looked up again
        assert_eq!(fake.calls_for("MISSING").len(), 1);
    }

    #[tokio::test]
    async fn test_retry_failed_gives_up_after_attempts() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 5)]));
        fake.fail("ORDERS", FailAt::Export, "still broken");
        let mut orch = orchestrator(&fake);

        let mut stats = orch
            .transfer_tables(&names(&["ORDERS"]), true, true)
            .await
            .unwrap();
        let recovered = orch
            .retry_failed(&mut stats, &fast_retry(3), true)
            .await
            .unwrap();

        assert_eq!(recovered, 0);
        assert_eq!(stats.failed.len(), 1);
        let exports = fake
            .calls_for("ORDERS")
            .iter()
            .filter(|c| c.starts_with("export_table:"))
            .count();
        assert_eq!(exports, 4);
    }

    #[tokio::test]
    async fn test_validate_reports_counts() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 5), ("CUSTOMERS", 3)]));
        let mut orch = orchestrator(&fake);
        orch.transfer_tables(&names(&["ORDERS"]), true, true)
            .await
            .unwrap();

        let mut checks = orch.validate(&[]).await.unwrap();
        checks.sort_by(|a, b| a.table.cmp(&b.table));
        assert_eq!(
            checks,
            vec![
                RowCountCheck::new("CUSTOMERS", 3, 0),
                RowCountCheck::new("ORDERS", 5, 5),
            ]
        );
        assert!(!checks[0].matches);
        assert!(checks[1].matches);
    }

    #[tokio::test]
    async fn test_health_check() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 1)]));
        let orch = orchestrator(&fake);

        let health = orch.health_check().await;
        assert!(health.healthy);
        assert!(health.source_connected);
        assert!(health.destination_connected);
        assert_eq!(health.source_version.as_deref(), Some("8.0.0"));
        assert!(health.to_json().unwrap().contains("\"healthy\": true"));
    }

    #[tokio::test]
    async fn test_health_check_flags_missing_source_schema() {
        let fake = Arc::new(FakeWarehouse::new());
        let mut config = test_config();
        config.source.schema = "MISSING".into();
        let orch = TransferOrchestrator::with_clients(config, fake.clone(), fake.clone());

        let health = orch.health_check().await;
        assert!(health.source_connected);
        assert_eq!(health.source_schema_exists, Some(false));
        assert!(!health.healthy);
    }

    #[tokio::test]
    async fn test_destination_tables_lists_loaded_tables() {
        let fake = Arc::new(FakeWarehouse::with_tables(&[("ORDERS", 1), ("CUSTOMERS", 1)]));
        let mut orch = orchestrator(&fake);
        orch.transfer_all(true, true).await.unwrap();

        let mut tables = orch.destination_tables().await.unwrap();
        tables.sort();
        assert_eq!(tables, vec!["CUSTOMERS", "ORDERS"]);
    }
}
