//! Connectivity and row-count reports that do not move data.

use crate::error::Result;
use serde::{Deserialize, Serialize};

/// Result of pinging both warehouses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub source_connected: bool,
    pub source_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_version: Option<String>,
    /// Whether the configured source schema exists. `None` when not checked.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_schema_exists: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_error: Option<String>,
    pub destination_connected: bool,
    pub destination_latency_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_error: Option<String>,
    pub healthy: bool,
}

impl HealthCheckResult {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Source vs destination row counts for one table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCountCheck {
    pub table: String,
    pub source_rows: i64,
    /// Zero when the destination table does not exist.
    pub destination_rows: i64,
    pub matches: bool,
}

impl RowCountCheck {
    pub fn new(table: impl Into<String>, source_rows: i64, destination_rows: i64) -> Self {
        Self {
            table: table.into(),
            source_rows,
            destination_rows,
            matches: source_rows == destination_rows,
        }
    }
}
