//! Source warehouse (Snowflake) operations.

mod snowflake;
pub mod sql;
mod types;

pub use snowflake::SnowflakeClient;
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;

/// Trait for source warehouse operations.
///
/// Every call awaits the remote statement to completion. Failures are
/// reported as [`crate::TransferError::Source`] naming the call that failed.
#[async_trait]
pub trait SourceWarehouse: Send + Sync {
    /// Check connectivity; returns the server version.
    async fn ping(&self) -> Result<String>;

    /// Check whether a schema exists.
    async fn schema_exists(&self, database: &str, schema: &str) -> Result<bool>;

    /// Create a schema if it does not exist.
    async fn ensure_schema(&self, database: &str, schema: &str) -> Result<()>;

    /// Create or replace a storage integration and grant its usage to the active role.
    async fn ensure_storage_integration(&self, integration: &StorageIntegration) -> Result<()>;

    /// Create or replace an external stage.
    async fn ensure_stage(&self, stage: &ExternalStage) -> Result<()>;

    /// Check whether a base table exists.
    async fn table_exists(&self, table: &TableRef) -> Result<bool>;

    /// List base tables in a schema, sorted by name.
    async fn list_tables(&self, database: &str, schema: &str) -> Result<Vec<String>>;

    /// Exact row count of a table.
    async fn row_count(&self, table: &TableRef) -> Result<i64>;

    /// Replace `to` with a full copy of `from`.
    async fn copy_table(&self, from: &TableRef, to: &TableRef) -> Result<()>;

    /// Unload a table under `prefix/` in the stage, replacing whatever was there.
    async fn export_table(
        &self,
        table: &TableRef,
        stage: &ExternalStage,
        prefix: &str,
        options: &ExportOptions,
    ) -> Result<ExportSummary>;
}
