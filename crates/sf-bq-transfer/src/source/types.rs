//! Source-side metadata and staging object types.

use crate::core::identifier::{qualify_snowflake, validate_path_segment};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A table in the source warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    /// Database name.
    pub database: String,

    /// Schema name.
    pub schema: String,

    /// Table name.
    pub name: String,
}

impl TableRef {
    pub fn new(
        database: impl Into<String>,
        schema: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            database: database.into(),
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Quoted `database.schema.table` for generated SQL.
    pub fn qualified(&self) -> Result<String> {
        qualify_snowflake(&self.database, &self.schema, &self.name)
    }

    /// Same table name in another database/schema.
    pub fn with_location(&self, database: &str, schema: &str) -> Self {
        Self::new(database, schema, self.name.clone())
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.database, self.schema, self.name)
    }
}

/// Storage integration binding the source warehouse to a GCS bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageIntegration {
    /// Integration object name.
    pub name: String,

    /// Bucket the integration is allowed to reach.
    pub bucket: String,
}

impl StorageIntegration {
    /// Allowed location covering the bucket and all of its prefixes.
    pub fn allowed_location(&self) -> String {
        format!("gcs://{}/", self.bucket)
    }
}

/// Named external stage pointing at the shared bucket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalStage {
    /// Database holding the stage.
    pub database: String,

    /// Schema holding the stage.
    pub schema: String,

    /// Stage name.
    pub name: String,

    /// Bucket the stage points at.
    pub bucket: String,

    /// Storage integration used for access.
    pub integration: String,
}

impl ExternalStage {
    /// Quoted `database.schema.stage`.
    pub fn qualified(&self) -> Result<String> {
        qualify_snowflake(&self.database, &self.schema, &self.name)
    }

    /// Stage URL.
    pub fn url(&self) -> String {
        format!("gcs://{}/", self.bucket)
    }

    /// Stage reference for a table's prefix, e.g. `@DB.SCHEMA.STAGE/ORDERS/`.
    pub fn prefix_path(&self, prefix: &str) -> Result<String> {
        validate_path_segment(prefix)?;
        Ok(format!("@{}/{}/", self.qualified()?, prefix))
    }
}

/// Options for unloading a table to the stage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExportOptions {
    /// Upper bound on the size of each unloaded file, in bytes.
    pub max_file_size: Option<u64>,
}

/// What an unload wrote.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportSummary {
    /// Rows written to the bucket.
    pub rows_unloaded: i64,

    /// Uncompressed bytes read.
    pub input_bytes: i64,

    /// Compressed bytes written.
    pub output_bytes: i64,
}
