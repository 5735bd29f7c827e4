//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;

use crate::core::identifier::snowflake_catalog_name;
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

/// Environment variable consulted when `source.token` is empty.
pub const SNOWFLAKE_TOKEN_ENV: &str = "SNOWFLAKE_TOKEN";

/// Environment variable consulted when `destination.access_token` is empty.
pub const BIGQUERY_TOKEN_ENV: &str = "BIGQUERY_ACCESS_TOKEN";

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let mut config: Config = serde_yaml::from_str(yaml)?;
        config.apply_env_credentials();
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Fill empty credentials from the environment.
    fn apply_env_credentials(&mut self) {
        if self.source.token.is_empty() {
            if let Ok(token) = std::env::var(SNOWFLAKE_TOKEN_ENV) {
                self.source.token = token;
            }
        }
        if self.destination.access_token.is_empty() {
            if let Ok(token) = std::env::var(BIGQUERY_TOKEN_ENV) {
                self.destination.access_token = token;
            }
        }
    }

    /// Database holding the staging schema.
    pub fn staging_database(&self) -> &str {
        self.staging
            .database
            .as_deref()
            .unwrap_or(&self.source.database)
    }

    /// Build the immutable request for one batch run.
    ///
    /// Source names are converted to catalog form: unquoted names fold to
    /// upper case, `"quoted"` names are kept verbatim.
    pub fn request(&self) -> TransferRequest {
        TransferRequest {
            source_database: snowflake_catalog_name(&self.source.database),
            source_schema: snowflake_catalog_name(&self.source.schema),
            destination_dataset: self.destination.dataset.clone(),
            tables: self
                .transfer
                .tables
                .iter()
                .map(|t| snowflake_catalog_name(t))
                .collect(),
            overwrite: self.transfer.overwrite,
            continue_on_error: self.transfer.continue_on_error,
        }
    }

    /// Compute a SHA256 hash of the configuration to fingerprint a run.
    ///
    /// Credentials are not serialized and so never affect the hash.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }
}
