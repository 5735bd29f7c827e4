//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Source warehouse (Snowflake) configuration.
    pub source: SourceConfig,

    /// Shared staging path (schema, integration, stage, bucket).
    pub staging: StagingConfig,

    /// Destination warehouse (BigQuery) configuration.
    pub destination: DestinationConfig,

    /// Transfer behavior configuration.
    #[serde(default)]
    pub transfer: TransferOptions,
}

/// How the source token should be presented to the SQL API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TokenType {
    #[default]
    Oauth,
    KeypairJwt,
}

impl TokenType {
    /// Value for the `X-Snowflake-Authorization-Token-Type` header.
    pub fn header_value(&self) -> &'static str {
        match self {
            TokenType::Oauth => "OAUTH",
            TokenType::KeypairJwt => "KEYPAIR_JWT",
        }
    }
}

/// Source warehouse (Snowflake) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Account identifier, e.g. `xy12345.us-east-1`.
    pub account: String,

    /// Login user.
    pub user: String,

    /// Role to run as. When absent the session's current role is used.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// Virtual warehouse used for copy/unload statements.
    pub warehouse: String,

    /// Source database.
    pub database: String,

    /// Source schema (default: "PUBLIC").
    #[serde(default = "default_public_schema")]
    pub schema: String,

    /// Bearer token. Falls back to `SNOWFLAKE_TOKEN` when empty.
    #[serde(default, skip_serializing)]
    pub token: String,

    /// Token type (default: oauth).
    #[serde(default)]
    pub token_type: TokenType,

    /// Base URL override. Defaults to `https://<account>.snowflakecomputing.com`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SourceConfig")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("role", &self.role)
            .field("warehouse", &self.warehouse)
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl SourceConfig {
    /// Base URL of the SQL API.
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{}.snowflakecomputing.com", self.account),
        }
    }
}

/// Staging path shared by every table in a batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StagingConfig {
    /// Database holding the staging schema (default: source database).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Staging schema (default: "BQ_STAGING").
    #[serde(default = "default_staging_schema")]
    pub schema: String,

    /// Storage integration name (default: "GCS_TRANSFER_INT").
    #[serde(default = "default_integration")]
    pub integration: String,

    /// External stage name (default: "GCS_TRANSFER_STAGE").
    #[serde(default = "default_stage")]
    pub stage: String,

    /// Shared GCS bucket name, without scheme.
    pub bucket: String,
}

/// Destination warehouse (BigQuery) configuration.
#[derive(Clone, Serialize, Deserialize)]
pub struct DestinationConfig {
    /// GCP project id.
    pub project: String,

    /// Destination dataset.
    pub dataset: String,

    /// Dataset and job location (default: "US").
    #[serde(default = "default_location")]
    pub location: String,

    /// OAuth access token. Falls back to `BIGQUERY_ACCESS_TOKEN` when empty.
    #[serde(default, skip_serializing)]
    pub access_token: String,

    /// Base URL override. Defaults to `https://bigquery.googleapis.com/bigquery/v2`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

impl fmt::Debug for DestinationConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DestinationConfig")
            .field("project", &self.project)
            .field("dataset", &self.dataset)
            .field("location", &self.location)
            .field("access_token", &"[REDACTED]")
            .field("endpoint", &self.endpoint)
            .finish()
    }
}

impl DestinationConfig {
    /// Base URL of the REST API.
    pub fn base_url(&self) -> String {
        match &self.endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => "https://bigquery.googleapis.com/bigquery/v2".to_string(),
        }
    }
}

/// Transfer behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferOptions {
    /// Tables to transfer. Empty means discover all tables in the source schema.
    #[serde(default)]
    pub tables: Vec<String>,

    /// Tables to skip during discovery (case-insensitive).
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Replace destination tables (true) or append to them (false).
    #[serde(default = "default_true")]
    pub overwrite: bool,

    /// Keep going after a table fails.
    #[serde(default = "default_true")]
    pub continue_on_error: bool,

    /// Number of tables transferred concurrently (default: 1).
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Poll interval for long-running remote jobs, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Optional MAX_FILE_SIZE (bytes) for unloaded files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_file_size: Option<u64>,
}

impl Default for TransferOptions {
    fn default() -> Self {
        Self {
            tables: Vec::new(),
            exclude_tables: Vec::new(),
            overwrite: true,
            continue_on_error: true,
            workers: default_workers(),
            poll_interval_ms: default_poll_interval_ms(),
            max_file_size: None,
        }
    }
}

impl TransferOptions {
    /// Poll interval as a Duration.
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Whether a discovered table is excluded by configuration.
    pub fn is_excluded(&self, table: &str) -> bool {
        self.exclude_tables
            .iter()
            .any(|t| t.eq_ignore_ascii_case(table))
    }
}

/// Immutable input for one batch invocation.
///
/// Source database, schema and table names are catalog names, exactly as
/// `INFORMATION_SCHEMA` stores them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRequest {
    /// Source database.
    pub source_database: String,
    /// Source schema.
    pub source_schema: String,
    /// Destination dataset.
    pub destination_dataset: String,
    /// Tables to transfer; empty means all.
    pub tables: Vec<String>,
    /// Full replace (true) or append (false).
    pub overwrite: bool,
    /// Keep going after a failed table.
    pub continue_on_error: bool,
}

impl TransferRequest {
    /// Whether the table list should be discovered from the source schema.
    pub fn discover_all(&self) -> bool {
        self.tables.is_empty()
    }
}

fn default_public_schema() -> String {
    "PUBLIC".to_string()
}

fn default_staging_schema() -> String {
    "BQ_STAGING".to_string()
}

fn default_integration() -> String {
    "GCS_TRANSFER_INT".to_string()
}

fn default_stage() -> String {
    "GCS_TRANSFER_STAGE".to_string()
}

fn default_location() -> String {
    "US".to_string()
}

fn default_true() -> bool {
    true
}

fn default_workers() -> usize {
    1
}

fn default_poll_interval_ms() -> u64 {
    1000
}
