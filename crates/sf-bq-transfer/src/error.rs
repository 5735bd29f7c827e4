//! Error types for the transfer library.

use thiserror::Error;

/// Main error type for transfer operations.
#[derive(Error, Debug)]
pub enum TransferError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Staging setup failed. Fatal to the whole batch.
    #[error("Provisioning failed for {resource}: {message}")]
    Provisioning { resource: String, message: String },

    /// Requested table does not exist in the source schema.
    #[error("Source table not found: {table}")]
    SourceNotFound { table: String },

    /// A source warehouse call failed.
    #[error("Source warehouse call '{operation}' failed: {message}")]
    Source { operation: String, message: String },

    /// A destination warehouse call failed.
    #[error("Destination warehouse call '{operation}' failed: {message}")]
    Destination { operation: String, message: String },

    /// Copying the table into the staging schema failed.
    #[error("Staging copy failed for table {table}")]
    Stage {
        table: String,
        #[source]
        source: Box<TransferError>,
    },

    /// Unloading the staged table to the bucket failed.
    #[error("Export failed for table {table}")]
    Export {
        table: String,
        #[source]
        source: Box<TransferError>,
    },

    /// The destination load job failed.
    #[error("Load failed for table {table}")]
    Load {
        table: String,
        #[source]
        source: Box<TransferError>,
    },

    /// Reading back the destination row count failed.
    #[error("Verification failed for table {table}")]
    Verify {
        table: String,
        #[source]
        source: Box<TransferError>,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Transfer was cancelled (SIGINT, etc.)
    #[error("Transfer cancelled")]
    Cancelled,
}

impl TransferError {
    /// Create a Provisioning error for a named staging resource.
    pub fn provisioning(resource: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Provisioning {
            resource: resource.into(),
            message: message.into(),
        }
    }

    /// Create a Source error identifying the failed call.
    pub fn source_call(operation: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Source {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Create a Destination error identifying the failed call.
    pub fn destination_call(operation: impl Into<String>, message: impl Into<String>) -> Self {
        TransferError::Destination {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether a caller-side retry could plausibly succeed.
    ///
    /// Missing tables and bad configuration will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransferError::Config(_)
            | TransferError::SourceNotFound { .. }
            | TransferError::Yaml(_)
            | TransferError::Cancelled => false,
            TransferError::Stage { source, .. }
            | TransferError::Export { source, .. }
            | TransferError::Load { source, .. }
            | TransferError::Verify { source, .. } => source.is_retryable(),
            _ => true,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> u8 {
        match self {
            TransferError::Config(_) | TransferError::Yaml(_) => 2,
            TransferError::Provisioning { .. } => 3,
            TransferError::Cancelled => 130,
            _ => 4,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for transfer operations.
pub type Result<T> = std::result::Result<T, TransferError>;
