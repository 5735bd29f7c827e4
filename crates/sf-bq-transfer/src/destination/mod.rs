//! Destination warehouse (BigQuery) operations.

mod bigquery;
mod types;

pub use bigquery::BigQueryClient;
pub use types::*;

use crate::error::Result;
use async_trait::async_trait;

/// Trait for destination warehouse operations.
///
/// Long-running jobs are awaited until the service reports them done.
/// Failures are reported as [`crate::TransferError::Destination`] naming the
/// call that failed.
#[async_trait]
pub trait DestinationWarehouse: Send + Sync {
    /// Check connectivity.
    async fn ping(&self) -> Result<()>;

    /// Check whether a dataset exists.
    async fn dataset_exists(&self, dataset: &str) -> Result<bool>;

    /// Create a dataset. Succeeds if it already exists.
    async fn create_dataset(&self, dataset: &str) -> Result<()>;

    /// Create the dataset unless it already exists.
    async fn ensure_dataset(&self, dataset: &str) -> Result<()> {
        if self.dataset_exists(dataset).await? {
            return Ok(());
        }
        self.create_dataset(dataset).await
    }

    /// Run a load job from object storage and wait for it to finish.
    async fn load_from_storage(&self, request: &LoadRequest) -> Result<LoadSummary>;

    /// Check whether a table exists.
    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool>;

    /// Row count from table metadata.
    async fn row_count(&self, dataset: &str, table: &str) -> Result<i64>;

    /// List tables in a dataset.
    async fn list_tables(&self, dataset: &str) -> Result<Vec<String>>;

    /// Run an ad hoc standard-SQL query.
    async fn run_query(&self, sql: &str) -> Result<QueryResult>;
}
