//! Cross-system staging path: staging schema, storage integration and
//! external stage in the source warehouse, all pointing at one GCS bucket.
//!
//! Every provisioning call is re-entrant: schemas use `IF NOT EXISTS`, the
//! integration and stage use `CREATE OR REPLACE`, so repeated runs never need
//! manual cleanup. Nothing here is ever dropped; the staging resources outlive
//! the batch.

use crate::config::Config;
use crate::core::identifier::{snowflake_catalog_name, validate_path_segment};
use crate::error::{Result, TransferError};
use crate::source::{ExternalStage, SourceWarehouse, StorageIntegration, TableRef};
use std::sync::Arc;
use tracing::info;

/// Provisioned staging resources, shared read-only by every table in a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagingContext {
    /// Database holding the staging schema.
    pub database: String,

    /// Staging schema.
    pub schema: String,

    /// External stage, carrying the shared bucket and its storage integration.
    pub stage: ExternalStage,
}

impl StagingContext {
    /// Snapshot of `source` inside the staging schema.
    pub fn staging_table(&self, source: &TableRef) -> TableRef {
        source.with_location(&self.database, &self.schema)
    }

    /// Shared bucket.
    pub fn bucket(&self) -> &str {
        &self.stage.bucket
    }

    /// Storage integration granting access to the bucket.
    pub fn integration(&self) -> &str {
        &self.stage.integration
    }

    /// Object prefix owned by `table` (`<table>/`, without the slash).
    pub fn prefix(&self, table: &str) -> Result<String> {
        validate_path_segment(table)?;
        Ok(table.to_string())
    }

    /// Wildcard URI the destination loads from.
    pub fn load_uri(&self, table: &str) -> Result<String> {
        Ok(format!("gs://{}/{}/*", self.bucket(), self.prefix(table)?))
    }
}

/// Idempotently provisions the staging path in the source warehouse.
pub struct StagingCoordinator {
    source: Arc<dyn SourceWarehouse>,
    database: String,
    schema: String,
    integration: String,
    stage: String,
    bucket: String,
}

impl StagingCoordinator {
    /// Create a coordinator for the staging section of `config`.
    pub fn new(source: Arc<dyn SourceWarehouse>, config: &Config) -> Self {
        Self {
            source,
            database: snowflake_catalog_name(config.staging_database()),
            schema: snowflake_catalog_name(&config.staging.schema),
            integration: snowflake_catalog_name(&config.staging.integration),
            stage: snowflake_catalog_name(&config.staging.stage),
            bucket: config.staging.bucket.clone(),
        }
    }

    /// Create the staging schema if absent.
    pub async fn ensure_staging_schema(&self, database: &str, schema: &str) -> Result<()> {
        self.source
            .ensure_schema(database, schema)
            .await
            .map_err(|e| TransferError::provisioning(format!("schema {}.{}", database, schema), e.to_string()))
    }

    /// Bind the storage integration to `bucket` and grant its usage to the active role.
    pub async fn ensure_storage_binding(&self, integration: &str, bucket: &str) -> Result<()> {
        let binding = StorageIntegration {
            name: integration.to_string(),
            bucket: bucket.to_string(),
        };
        self.source
            .ensure_storage_integration(&binding)
            .await
            .map_err(|e| {
                TransferError::provisioning(format!("storage integration {}", integration), e.to_string())
            })
    }

    /// Create or replace the external stage over `bucket`.
    pub async fn ensure_external_stage(
        &self,
        database: &str,
        schema: &str,
        stage: &str,
        bucket: &str,
        integration: &str,
    ) -> Result<ExternalStage> {
        let stage = ExternalStage {
            database: database.to_string(),
            schema: schema.to_string(),
            name: stage.to_string(),
            bucket: bucket.to_string(),
            integration: integration.to_string(),
        };
        self.source
            .ensure_stage(&stage)
            .await
            .map_err(|e| TransferError::provisioning(format!("stage {}", stage.name), e.to_string()))?;
        Ok(stage)
    }

    /// Run all three provisioning steps and return the resulting context.
    pub async fn prepare(&self) -> Result<StagingContext> {
        info!(
            "Provisioning staging path {}.{} -> gcs://{}/",
            self.database, self.schema, self.bucket
        );
        self.ensure_staging_schema(&self.database, &self.schema)
            .await?;
        self.ensure_storage_binding(&self.integration, &self.bucket)
            .await?;
        let stage = self
            .ensure_external_stage(
                &self.database,
                &self.schema,
                &self.stage,
                &self.bucket,
                &self.integration,
            )
            .await?;

        Ok(StagingContext {
            database: self.database.clone(),
            schema: self.schema.clone(),
            stage,
        })
    }
}
