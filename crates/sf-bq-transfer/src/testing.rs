//! In-memory stand-in for the source warehouse, the bucket and the
//! destination warehouse, used by unit tests.
//!
//! Source tables and staging snapshots live in one map keyed by
//! `DB.SCHEMA.TABLE`; exports copy a row count into a bucket prefix; loads
//! read the prefix back and truncate or append into the destination table.

use crate::config::{
    Config, DestinationConfig, SourceConfig, StagingConfig, TokenType, TransferOptions,
};
use crate::destination::{DestinationWarehouse, LoadRequest, LoadSummary, QueryResult, WriteDisposition};
use crate::error::{Result, TransferError};
use crate::source::{
    ExportOptions, ExportSummary, ExternalStage, SourceWarehouse, StorageIntegration, TableRef,
};
use async_trait::async_trait;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Where an injected failure fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailAt {
    SourceCount,
    Copy,
    Export,
    Load,
    DestinationCount,
}

#[derive(Debug, Clone, Default)]
pub struct FakeState {
    pub schemas: BTreeSet<(String, String)>,
    pub integrations: BTreeMap<String, String>,
    pub grants: Vec<(String, String)>,
    pub stages: BTreeMap<String, ExternalStage>,
    pub source_tables: BTreeMap<String, i64>,
    pub bucket: BTreeMap<String, i64>,
    pub datasets: BTreeSet<String>,
    pub destination_tables: BTreeMap<(String, String), i64>,
    pub calls: Vec<String>,
}

#[derive(Default)]
pub struct FakeWarehouse {
    state: Mutex<FakeState>,
    failures: Mutex<HashMap<(String, FailAt), String>>,
    provisioning_failure: Mutex<Option<String>>,
    load_skew: Mutex<HashMap<String, i64>>,
    export_delay: Mutex<Option<Duration>>,
    cancel_on_export: Mutex<Option<(String, CancellationToken)>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

pub const SOURCE_DB: &str = "ANALYTICS";
pub const SOURCE_SCHEMA: &str = "PUBLIC";
pub const DATASET: &str = "analytics";

pub fn test_config() -> Config {
    Config {
        source: SourceConfig {
            account: "xy12345".into(),
            user: "TRANSFER_USER".into(),
            role: Some("TRANSFER_ROLE".into()),
            warehouse: "COMPUTE_WH".into(),
            database: SOURCE_DB.into(),
            schema: SOURCE_SCHEMA.into(),
            token: "sf-token".into(),
            token_type: TokenType::Oauth,
            endpoint: None,
        },
        staging: StagingConfig {
            database: None,
            schema: "BQ_STAGING".into(),
            integration: "GCS_TRANSFER_INT".into(),
            stage: "GCS_TRANSFER_STAGE".into(),
            bucket: "transfer-bucket".into(),
        },
        destination: DestinationConfig {
            project: "my-project".into(),
            dataset: DATASET.into(),
            location: "US".into(),
            access_token: "bq-token".into(),
            endpoint: None,
        },
        transfer: TransferOptions::default(),
    }
}

fn source_key(table: &TableRef) -> String {
    table.to_string()
}

impl FakeWarehouse {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fake with the given tables in `ANALYTICS.PUBLIC`.
    pub fn with_tables(tables: &[(&str, i64)]) -> Self {
        let fake = Self::new();
        for (name, rows) in tables {
            fake.add_source_table(name, *rows);
        }
        fake
    }

    pub fn add_source_table(&self, name: &str, rows: i64) {
        let key = TableRef::new(SOURCE_DB, SOURCE_SCHEMA, name).to_string();
        self.lock().source_tables.insert(key, rows);
    }

    pub fn fail(&self, table: &str, at: FailAt, message: &str) {
        self.failures
            .lock()
            .unwrap()
            .insert((table.to_string(), at), message.to_string());
    }

    /// Drop every injected per-table failure.
    pub fn clear_failures(&self) {
        self.failures.lock().unwrap().clear();
    }

    pub fn fail_provisioning(&self, message: &str) {
        *self.provisioning_failure.lock().unwrap() = Some(message.to_string());
    }

    /// Make loads of `table` write `delta` more rows than were staged.
    pub fn skew_load(&self, table: &str, delta: i64) {
        self.load_skew.lock().unwrap().insert(table.to_string(), delta);
    }

    pub fn delay_exports(&self, delay: Duration) {
        *self.export_delay.lock().unwrap() = Some(delay);
    }

    /// Cancel `token` as soon as the export of `table` starts.
    pub fn cancel_on_export(&self, table: &str, token: CancellationToken) {
        *self.cancel_on_export.lock().unwrap() = Some((table.to_string(), token));
    }

    pub fn state(&self) -> FakeState {
        self.lock().clone()
    }

    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    /// Calls recorded for one table, in order.
    pub fn calls_for(&self, table: &str) -> Vec<String> {
        let suffix = format!(":{}", table);
        self.calls()
            .into_iter()
            .filter(|c| c.ends_with(&suffix))
            .collect()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn destination_rows(&self, table: &str) -> Option<i64> {
        self.lock()
            .destination_tables
            .get(&(DATASET.to_string(), table.to_string()))
            .copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeState> {
        self.state.lock().unwrap()
    }

    fn record(&self, call: String) {
        self.lock().calls.push(call);
    }

    fn injected(&self, table: &str, at: FailAt) -> Option<String> {
        self.failures
            .lock()
            .unwrap()
            .get(&(table.to_string(), at))
            .cloned()
    }

    fn check_provisioning(&self, operation: &str) -> Result<()> {
        match self.provisioning_failure.lock().unwrap().clone() {
            Some(message) => Err(TransferError::source_call(operation, message)),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl SourceWarehouse for FakeWarehouse {
    async fn ping(&self) -> Result<String> {
        Ok("8.0.0".into())
    }

    async fn schema_exists(&self, database: &str, schema: &str) -> Result<bool> {
        let state = self.lock();
        let prefix = format!("{}.{}.", database, schema);
        Ok(state
            .schemas
            .contains(&(database.to_string(), schema.to_string()))
            || state.source_tables.keys().any(|k| k.starts_with(&prefix)))
    }

    async fn ensure_schema(&self, database: &str, schema: &str) -> Result<()> {
        self.check_provisioning("create_schema")?;
        self.record(format!("ensure_schema:{}.{}", database, schema));
        self.lock()
            .schemas
            .insert((database.to_string(), schema.to_string()));
        Ok(())
    }

    async fn ensure_storage_integration(&self, integration: &StorageIntegration) -> Result<()> {
        self.check_provisioning("create_storage_integration")?;
        self.record(format!("ensure_integration:{}", integration.name));
        let mut state = self.lock();
        state
            .integrations
            .insert(integration.name.clone(), integration.bucket.clone());
        state
            .grants
            .push((integration.name.clone(), "TRANSFER_ROLE".to_string()));
        Ok(())
    }

    async fn ensure_stage(&self, stage: &ExternalStage) -> Result<()> {
        self.check_provisioning("create_stage")?;
        self.record(format!("ensure_stage:{}", stage.name));
        self.lock().stages.insert(stage.name.clone(), stage.clone());
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        self.record(format!("table_exists:{}", table.name));
        Ok(self.lock().source_tables.contains_key(&source_key(table)))
    }

    async fn list_tables(&self, database: &str, schema: &str) -> Result<Vec<String>> {
        let prefix = format!("{}.{}.", database, schema);
        Ok(self
            .lock()
            .source_tables
            .keys()
            .filter_map(|k| k.strip_prefix(&prefix).map(str::to_string))
            .collect())
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        self.record(format!("source_count:{}", table.name));
        if let Some(message) = self.injected(&table.name, FailAt::SourceCount) {
            return Err(TransferError::source_call("row_count", message));
        }
        self.lock()
            .source_tables
            .get(&source_key(table))
            .copied()
            .ok_or_else(|| TransferError::source_call("row_count", format!("{} does not exist", table)))
    }

    async fn copy_table(&self, from: &TableRef, to: &TableRef) -> Result<()> {
        self.record(format!("copy_table:{}", from.name));
        if let Some(message) = self.injected(&from.name, FailAt::Copy) {
            return Err(TransferError::source_call("copy_table", message));
        }
        let mut state = self.lock();
        let rows = state
            .source_tables
            .get(&source_key(from))
            .copied()
            .ok_or_else(|| TransferError::source_call("copy_table", format!("{} does not exist", from)))?;
        state.source_tables.insert(source_key(to), rows);
        Ok(())
    }

    async fn export_table(
        &self,
        table: &TableRef,
        _stage: &ExternalStage,
        prefix: &str,
        _options: &ExportOptions,
    ) -> Result<ExportSummary> {
        self.record(format!("export_table:{}", table.name));
        if let Some((target, token)) = self.cancel_on_export.lock().unwrap().as_ref() {
            if *target == table.name {
                token.cancel();
            }
        }
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.export_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(message) = self.injected(&table.name, FailAt::Export) {
            return Err(TransferError::source_call("copy_into_stage", message));
        }
        let mut state = self.lock();
        let rows = state
            .source_tables
            .get(&source_key(table))
            .copied()
            .ok_or_else(|| {
                TransferError::source_call("copy_into_stage", format!("{} does not exist", table))
            })?;
        state.bucket.insert(prefix.to_string(), rows);
        Ok(ExportSummary {
            rows_unloaded: rows,
            input_bytes: rows * 100,
            output_bytes: rows * 20,
        })
    }
}

#[async_trait]
impl DestinationWarehouse for FakeWarehouse {
    async fn ping(&self) -> Result<()> {
        Ok(())
    }

    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        Ok(self.lock().datasets.contains(dataset))
    }

    async fn create_dataset(&self, dataset: &str) -> Result<()> {
        self.record(format!("create_dataset:{}", dataset));
        self.lock().datasets.insert(dataset.to_string());
        Ok(())
    }

    async fn load_from_storage(&self, request: &LoadRequest) -> Result<LoadSummary> {
        self.record(format!("load:{}", request.table));
        if let Some(message) = self.injected(&request.table, FailAt::Load) {
            return Err(TransferError::destination_call("load_job", message));
        }
        let skew = self
            .load_skew
            .lock()
            .unwrap()
            .get(&request.table)
            .copied()
            .unwrap_or(0);

        let mut state = self.lock();
        if !state.datasets.contains(&request.dataset) {
            return Err(TransferError::destination_call(
                "load_job",
                format!("Not found: Dataset {}", request.dataset),
            ));
        }
        let mut staged = 0;
        for uri in &request.source_uris {
            let prefix = uri
                .strip_prefix("gs://")
                .and_then(|rest| rest.split_once('/'))
                .map(|(_, path)| path.trim_end_matches('*').trim_end_matches('/'))
                .unwrap_or_default();
            staged += state.bucket.get(prefix).copied().ok_or_else(|| {
                TransferError::destination_call("load_job", format!("Not found: URI {}", uri))
            })?;
        }
        let loaded = staged + skew;

        let key = (request.dataset.clone(), request.table.clone());
        let existing = state.destination_tables.get(&key).copied();
        let total = match request.write_disposition {
            WriteDisposition::Truncate => loaded,
            WriteDisposition::Append => existing.unwrap_or(0) + loaded,
            WriteDisposition::Empty => {
                if existing.unwrap_or(0) > 0 {
                    return Err(TransferError::destination_call(
                        "load_job",
                        "Already Exists: table is not empty",
                    ));
                }
                loaded
            }
        };
        state.destination_tables.insert(key, total);

        Ok(LoadSummary {
            job_id: format!("job_{}", request.table),
            output_rows: Some(loaded),
            input_files: Some(1),
        })
    }

    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool> {
        Ok(self
            .lock()
            .destination_tables
            .contains_key(&(dataset.to_string(), table.to_string())))
    }

    async fn row_count(&self, dataset: &str, table: &str) -> Result<i64> {
        self.record(format!("destination_count:{}", table));
        if let Some(message) = self.injected(table, FailAt::DestinationCount) {
            return Err(TransferError::destination_call("row_count", message));
        }
        self.lock()
            .destination_tables
            .get(&(dataset.to_string(), table.to_string()))
            .copied()
            .ok_or_else(|| {
                TransferError::destination_call("row_count", format!("Not found: Table {}.{}", dataset, table))
            })
    }

    async fn list_tables(&self, dataset: &str) -> Result<Vec<String>> {
        Ok(self
            .lock()
            .destination_tables
            .keys()
            .filter(|(d, _)| d == dataset)
            .map(|(_, t)| t.clone())
            .collect())
    }

    async fn run_query(&self, _sql: &str) -> Result<QueryResult> {
        Ok(QueryResult {
            columns: vec!["f0_".into()],
            rows: vec![vec![serde_json::Value::String("1".into())]],
        })
    }
}
