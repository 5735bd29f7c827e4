//! # sf-bq-transfer
//!
//! Batch table transfer from Snowflake to BigQuery through a shared GCS
//! bucket.
//!
//! Each table goes through four phases:
//!
//! - **Staged**: snapshot copied into a staging schema in the source warehouse
//! - **Exported**: snapshot unloaded as Parquet to its own bucket prefix
//! - **Loaded**: BigQuery load job from that prefix (truncate or append)
//! - **Verified**: source and destination row counts compared
//!
//! The staging schema, storage integration and external stage are provisioned
//! once per batch and reused by every table. Failures are isolated per table
//! unless the batch is told to stop on the first error.
//!
//! ## Example
//!
//! ```rust,no_run
//! use sf_bq_transfer::{Config, TransferOrchestrator};
//!
//! #[tokio::main]
//! async fn main() -> sf_bq_transfer::Result<()> {
//!     let config = Config::load("transfer.yaml")?;
//!     let mut orchestrator = TransferOrchestrator::new(config)?;
//!     let stats = orchestrator.run().await?;
//!     println!("{}", stats.summary());
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod core;
pub mod destination;
pub mod error;
pub mod orchestrator;
pub mod retry;
pub mod source;
pub mod staging;
pub mod transfer;

#[cfg(test)]
mod testing;

// Re-exports for convenient access
pub use config::{Config, TransferRequest};
pub use destination::{BigQueryClient, DestinationWarehouse, WriteDisposition};
pub use error::{Result, TransferError};
pub use orchestrator::{HealthCheckResult, RowCountCheck, TransferOrchestrator};
pub use retry::RetryPolicy;
pub use source::{SnowflakeClient, SourceWarehouse, TableRef};
pub use staging::{StagingContext, StagingCoordinator};
pub use transfer::{Phase, TableOutcome, TableTransferTask, TransferStats};
