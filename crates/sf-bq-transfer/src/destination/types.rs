//! Destination-side load and query types.

use serde::{Deserialize, Serialize};

/// Whether a load replaces, appends to, or requires an empty destination table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WriteDisposition {
    #[serde(rename = "WRITE_TRUNCATE")]
    Truncate,
    #[serde(rename = "WRITE_APPEND")]
    Append,
    #[serde(rename = "WRITE_EMPTY")]
    Empty,
}

impl WriteDisposition {
    /// Disposition for a transfer's overwrite flag.
    pub fn from_overwrite(overwrite: bool) -> Self {
        if overwrite {
            WriteDisposition::Truncate
        } else {
            WriteDisposition::Append
        }
    }

    /// API value.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteDisposition::Truncate => "WRITE_TRUNCATE",
            WriteDisposition::Append => "WRITE_APPEND",
            WriteDisposition::Empty => "WRITE_EMPTY",
        }
    }
}

/// Format of the staged files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SourceFormat {
    #[default]
    #[serde(rename = "PARQUET")]
    Parquet,
}

impl SourceFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceFormat::Parquet => "PARQUET",
        }
    }
}

/// Bulk load of staged files into one destination table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    /// Destination dataset.
    pub dataset: String,

    /// Destination table.
    pub table: String,

    /// Object URIs (wildcards allowed), e.g. `gs://bucket/ORDERS/*`.
    pub source_uris: Vec<String>,

    /// Replace, append or require-empty.
    pub write_disposition: WriteDisposition,

    /// File format of the staged objects.
    pub source_format: SourceFormat,

    /// Infer the table schema from the files.
    pub autodetect: bool,
}

/// Outcome of a finished load job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadSummary {
    /// Job id.
    pub job_id: String,

    /// Rows written by the job, when reported.
    pub output_rows: Option<i64>,

    /// Files read by the job, when reported.
    pub input_files: Option<i64>,
}

/// Rows returned by an ad hoc query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    /// Column names from the result schema.
    pub columns: Vec<String>,

    /// Cell values as returned by the API (strings, nulls, or nested records).
    pub rows: Vec<Vec<serde_json::Value>>,
}
