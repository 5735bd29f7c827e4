//! Configuration validation.

use super::Config;
use crate::core::identifier::{snowflake_catalog_name, validate_identifier};
use crate::error::{TransferError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Source validation
    if config.source.account.is_empty() {
        return Err(TransferError::Config("source.account is required".into()));
    }
    if config.source.user.is_empty() {
        return Err(TransferError::Config("source.user is required".into()));
    }
    if config.source.warehouse.is_empty() {
        return Err(TransferError::Config("source.warehouse is required".into()));
    }
    if config.source.token.is_empty() {
        return Err(TransferError::Config(format!(
            "source.token is required (or set {})",
            super::SNOWFLAKE_TOKEN_ENV
        )));
    }
    validate_identifier(&config.source.database)
        .map_err(|e| TransferError::Config(format!("source.database: {}", e)))?;
    validate_identifier(&config.source.schema)
        .map_err(|e| TransferError::Config(format!("source.schema: {}", e)))?;

    // Staging validation
    if config.staging.bucket.is_empty() {
        return Err(TransferError::Config("staging.bucket is required".into()));
    }
    if config.staging.bucket.contains("://") || config.staging.bucket.contains('/') {
        return Err(TransferError::Config(format!(
            "staging.bucket must be a bare bucket name, got '{}'",
            config.staging.bucket
        )));
    }
    for (field, value) in [
        ("staging.database", config.staging_database()),
        ("staging.schema", config.staging.schema.as_str()),
        ("staging.integration", config.staging.integration.as_str()),
        ("staging.stage", config.staging.stage.as_str()),
    ] {
        validate_identifier(value).map_err(|e| TransferError::Config(format!("{}: {}", field, e)))?;
    }

    // Snapshotting into the schema being read would overwrite the source tables
    if snowflake_catalog_name(config.staging_database())
        == snowflake_catalog_name(&config.source.database)
        && snowflake_catalog_name(&config.staging.schema)
            == snowflake_catalog_name(&config.source.schema)
    {
        return Err(TransferError::Config(
            "staging schema cannot be the same as the source schema".into(),
        ));
    }

    // Destination validation
    if config.destination.project.is_empty() {
        return Err(TransferError::Config("destination.project is required".into()));
    }
    if config.destination.access_token.is_empty() {
        return Err(TransferError::Config(format!(
            "destination.access_token is required (or set {})",
            super::BIGQUERY_TOKEN_ENV
        )));
    }
    validate_identifier(&config.destination.dataset)
        .map_err(|e| TransferError::Config(format!("destination.dataset: {}", e)))?;

    // Transfer options
    if config.transfer.workers == 0 {
        return Err(TransferError::Config(
            "transfer.workers must be at least 1".into(),
        ));
    }
    if config.transfer.poll_interval_ms == 0 {
        return Err(TransferError::Config(
            "transfer.poll_interval_ms must be at least 1".into(),
        ));
    }
    for table in &config.transfer.tables {
        validate_identifier(table)
            .map_err(|e| TransferError::Config(format!("transfer.tables: {}", e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        DestinationConfig, SourceConfig, StagingConfig, TokenType, TransferOptions,
    };

    fn valid_config() -> Config {
        Config {
            source: SourceConfig {
                account: "xy12345".to_string(),
                user: "TRANSFER_USER".to_string(),
                role: None,
                warehouse: "COMPUTE_WH".to_string(),
                database: "ANALYTICS".to_string(),
                schema: "PUBLIC".to_string(),
                token: "sf-secret-token".to_string(),
                token_type: TokenType::Oauth,
                endpoint: None,
            },
            staging: StagingConfig {
                database: None,
                schema: "BQ_STAGING".to_string(),
                integration: "GCS_TRANSFER_INT".to_string(),
                stage: "GCS_TRANSFER_STAGE".to_string(),
                bucket: "transfer-bucket".to_string(),
            },
            destination: DestinationConfig {
                project: "my-project".to_string(),
                dataset: "analytics".to_string(),
                location: "US".to_string(),
                access_token: "bq-secret-token".to_string(),
                endpoint: None,
            },
            transfer: TransferOptions::default(),
        }
    }

    #[test]
    fn test_valid_config() {
        let config = valid_config();
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_missing_account() {
        let mut config = valid_config();
        config.source.account = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_missing_tokens() {
        let mut config = valid_config();
        config.source.token = "".to_string();
        assert!(validate(&config).is_err());

        let mut config = valid_config();
        config.destination.access_token = "".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bucket_must_be_bare_name() {
        let mut config = valid_config();
        config.staging.bucket = "gcs://transfer-bucket".to_string();
        assert!(validate(&config).is_err());

        config.staging.bucket = "transfer-bucket/prefix".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_staging_schema_cannot_be_source_schema() {
        let mut config = valid_config();
        config.staging.schema = "public".to_string();
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("staging schema"));

        // A quoted lower-case schema is a different object
        config.staging.schema = "\"public\"".to_string();
        assert!(validate(&config).is_ok());

        config.staging.schema = "public".to_string();
        // Same schema name in another database is fine
        config.staging.database = Some("SCRATCH".to_string());
        assert!(validate(&config).is_ok());
    }

    #[test]
    fn test_zero_workers_rejected() {
        let mut config = valid_config();
        config.transfer.workers = 0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_null_byte_in_table_rejected() {
        let mut config = valid_config();
        config.transfer.tables = vec!["ORD\0ERS".to_string()];
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_source_config_debug_redacts_token() {
        let config = valid_config();
        let debug_output = format!("{:?}", config.source);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("sf-secret-token"));
    }

    #[test]
    fn test_destination_config_debug_redacts_token() {
        let config = valid_config();
        let debug_output = format!("{:?}", config.destination);
        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("bq-secret-token"));
    }
}
