//! SQL text for every statement the source client issues.
//!
//! Every name is a catalog name. Identifiers are quoted through
//! [`crate::core::identifier`]; `INFORMATION_SCHEMA` lookups bind the same
//! names unchanged as positional `?` bindings.

use super::types::{ExportOptions, ExternalStage, StorageIntegration, TableRef};
use crate::core::identifier::{quote_literal, quote_snowflake};
use crate::error::Result;

/// A single statement plus its positional text bindings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Statement {
    pub sql: String,
    pub bindings: Vec<String>,
}

impl Statement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            bindings: Vec::new(),
        }
    }

    /// Add a positional TEXT binding for the next `?`.
    pub fn bind(mut self, value: impl Into<String>) -> Self {
        self.bindings.push(value.into());
        self
    }
}

pub fn ping() -> Statement {
    Statement::new("SELECT CURRENT_VERSION()")
}

pub fn current_role() -> Statement {
    Statement::new("SELECT CURRENT_ROLE()")
}

pub fn schema_exists(database: &str, schema: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "SELECT COUNT(*) FROM {}.INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?",
        quote_snowflake(database)?
    ))
    .bind(schema))
}

pub fn create_schema_if_not_exists(database: &str, schema: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "CREATE SCHEMA IF NOT EXISTS {}.{}",
        quote_snowflake(database)?,
        quote_snowflake(schema)?
    )))
}

pub fn create_storage_integration(integration: &StorageIntegration) -> Result<Statement> {
    Ok(Statement::new(format!(
        "CREATE OR REPLACE STORAGE INTEGRATION {} \
         TYPE = EXTERNAL_STAGE \
         STORAGE_PROVIDER = 'GCS' \
         ENABLED = TRUE \
         STORAGE_ALLOWED_LOCATIONS = ({})",
        quote_snowflake(&integration.name)?,
        quote_literal(&integration.allowed_location())
    )))
}

pub fn grant_integration_usage(integration: &str, role: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "GRANT USAGE ON INTEGRATION {} TO ROLE {}",
        quote_snowflake(integration)?,
        quote_snowflake(role)?
    )))
}

pub fn create_stage(stage: &ExternalStage) -> Result<Statement> {
    Ok(Statement::new(format!(
        "CREATE OR REPLACE STAGE {} \
         URL = {} \
         STORAGE_INTEGRATION = {} \
         FILE_FORMAT = (TYPE = PARQUET COMPRESSION = SNAPPY)",
        stage.qualified()?,
        quote_literal(&stage.url()),
        quote_snowflake(&stage.integration)?
    )))
}

pub fn table_exists(table: &TableRef) -> Result<Statement> {
    Ok(Statement::new(format!(
        "SELECT COUNT(*) FROM {}.INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ? AND TABLE_TYPE = 'BASE TABLE'",
        quote_snowflake(&table.database)?
    ))
    .bind(&table.schema)
    .bind(&table.name))
}

pub fn list_tables(database: &str, schema: &str) -> Result<Statement> {
    Ok(Statement::new(format!(
        "SELECT TABLE_NAME FROM {}.INFORMATION_SCHEMA.TABLES \
         WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE' \
         ORDER BY TABLE_NAME",
        quote_snowflake(database)?
    ))
    .bind(schema))
}

pub fn row_count(table: &TableRef) -> Result<Statement> {
    Ok(Statement::new(format!(
        "SELECT COUNT(*) FROM {}",
        table.qualified()?
    )))
}

/// Snapshot `from` into `to`, replacing any previous snapshot.
pub fn copy_table(from: &TableRef, to: &TableRef) -> Result<Statement> {
    Ok(Statement::new(format!(
        "CREATE OR REPLACE TABLE {} AS SELECT * FROM {}",
        to.qualified()?,
        from.qualified()?
    )))
}

/// Delete every file under a stage prefix.
pub fn remove_prefix(stage: &ExternalStage, prefix: &str) -> Result<Statement> {
    Ok(Statement::new(format!("REMOVE {}", stage.prefix_path(prefix)?)))
}

/// Unload a table to a stage prefix as snappy-compressed parquet.
pub fn copy_into_stage(
    table: &TableRef,
    stage: &ExternalStage,
    prefix: &str,
    options: &ExportOptions,
) -> Result<Statement> {
    let mut sql = format!(
        "COPY INTO {} FROM {} \
         FILE_FORMAT = (TYPE = PARQUET COMPRESSION = SNAPPY) \
         HEADER = TRUE \
         OVERWRITE = TRUE",
        stage.prefix_path(prefix)?,
        table.qualified()?
    );
    if let Some(max) = options.max_file_size {
        sql.push_str(&format!(" MAX_FILE_SIZE = {}", max));
    }
    Ok(Statement::new(sql))
}
