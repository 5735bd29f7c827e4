//! Snowflake client over the SQL REST API (`/api/v2/statements`).

use super::sql::{self, Statement};
use super::{
    ExportOptions, ExportSummary, ExternalStage, SourceWarehouse, StorageIntegration, TableRef,
};
use crate::config::SourceConfig;
use crate::core::identifier::snowflake_catalog_name;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Rows of a completed statement. Snowflake returns every cell as text.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl StatementResult {
    /// Cell by row index and case-insensitive column name.
    pub fn get(&self, row: usize, column: &str) -> Option<&str> {
        let idx = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(column))?;
        self.rows.get(row)?.get(idx)?.as_deref()
    }

    /// First cell of the first row.
    pub fn scalar(&self) -> Option<&str> {
        self.rows.first()?.first()?.as_deref()
    }

    /// First cell parsed as an integer.
    pub fn scalar_i64(&self, operation: &str) -> Result<i64> {
        let raw = self.scalar().ok_or_else(|| {
            TransferError::source_call(operation, "statement returned no rows")
        })?;
        raw.parse::<i64>().map_err(|e| {
            TransferError::source_call(operation, format!("expected an integer, got {:?}: {}", raw, e))
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatementResponse {
    #[serde(default)]
    statement_handle: Option<String>,
    #[serde(default)]
    result_set_meta_data: Option<ResultSetMetaData>,
    #[serde(default)]
    data: Option<Vec<Vec<Option<String>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResultSetMetaData {
    #[serde(default)]
    row_type: Vec<RowType>,
    #[serde(default)]
    partition_info: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct RowType {
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    sql_state: Option<String>,
}

/// Snowflake SQL API client.
pub struct SnowflakeClient {
    http: reqwest::Client,
    config: SourceConfig,
    base_url: String,
    poll_interval: Duration,
}

impl SnowflakeClient {
    /// Create a new client.
    pub fn new(config: SourceConfig, poll_interval: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("sf-bq-transfer/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| TransferError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            base_url: config.base_url(),
            http,
            config,
            poll_interval,
        })
    }

    fn authorized(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .bearer_auth(&self.config.token)
            .header(
                "X-Snowflake-Authorization-Token-Type",
                self.config.token_type.header_value(),
            )
            .header(reqwest::header::ACCEPT, "application/json")
    }

    fn request_body(&self, stmt: &Statement) -> Value {
        let mut body = json!({
            "statement": stmt.sql,
            "timeout": 0,
            "database": self.config.database,
            "schema": self.config.schema,
            "warehouse": self.config.warehouse,
        });
        if let Some(role) = &self.config.role {
            body["role"] = json!(role);
        }
        if !stmt.bindings.is_empty() {
            let bindings: Map<String, Value> = stmt
                .bindings
                .iter()
                .enumerate()
                .map(|(i, v)| ((i + 1).to_string(), json!({ "type": "TEXT", "value": v })))
                .collect();
            body["bindings"] = Value::Object(bindings);
        }
        body
    }

    /// Execute a statement and wait for it to finish.
    ///
    /// `operation` names the call in any error raised.
    pub async fn execute(&self, operation: &str, stmt: &Statement) -> Result<StatementResult> {
        debug!("{}: {}", operation, stmt.sql);

        let url = format!("{}/api/v2/statements", self.base_url);
        let request_id = uuid::Uuid::new_v4().to_string();
        let response = self
            .authorized(self.http.post(&url))
            .query(&[("requestId", request_id.as_str())])
            .json(&self.request_body(stmt))
            .send()
            .await
            .map_err(|e| TransferError::source_call(operation, e.to_string()))?;

        let mut body = self.read_response(operation, response).await?;

        // 202: still running, poll the handle until the result is ready
        while body.data.is_none() && body.result_set_meta_data.is_none() {
            let handle = body.statement_handle.clone().ok_or_else(|| {
                TransferError::source_call(operation, "response carried neither data nor a statement handle")
            })?;
            tokio::time::sleep(self.poll_interval).await;
            debug!("{}: polling statement {}", operation, handle);
            body = self.fetch_partition(operation, &handle, None).await?;
        }

        let columns = body
            .result_set_meta_data
            .as_ref()
            .map(|m| m.row_type.iter().map(|r| r.name.clone()).collect())
            .unwrap_or_default();
        let partitions = body
            .result_set_meta_data
            .as_ref()
            .map(|m| m.partition_info.len())
            .unwrap_or(0);
        let mut rows = body.data.take().unwrap_or_default();

        if partitions > 1 {
            let handle = body.statement_handle.clone().ok_or_else(|| {
                TransferError::source_call(operation, "partitioned result without a statement handle")
            })?;
            for partition in 1..partitions {
                let page = self.fetch_partition(operation, &handle, Some(partition)).await?;
                rows.extend(page.data.unwrap_or_default());
            }
        }

        Ok(StatementResult { columns, rows })
    }

    async fn fetch_partition(
        &self,
        operation: &str,
        handle: &str,
        partition: Option<usize>,
    ) -> Result<StatementResponse> {
        let url = format!("{}/api/v2/statements/{}", self.base_url, handle);
        let mut builder = self.authorized(self.http.get(&url));
        if let Some(p) = partition {
            builder = builder.query(&[("partition", p.to_string())]);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| TransferError::source_call(operation, e.to_string()))?;
        self.read_response(operation, response).await
    }

    async fn read_response(
        &self,
        operation: &str,
        response: reqwest::Response,
    ) -> Result<StatementResponse> {
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransferError::source_call(operation, e.to_string()))?;

        if status == StatusCode::OK || status == StatusCode::ACCEPTED {
            let mut body: StatementResponse = serde_json::from_str(&text).map_err(|e| {
                TransferError::source_call(operation, format!("invalid response body: {}", e))
            })?;
            if status == StatusCode::ACCEPTED {
                // Async placeholder; any data field is not the result yet
                body.data = None;
                body.result_set_meta_data = None;
            }
            return Ok(body);
        }

        let message = match serde_json::from_str::<ErrorResponse>(&text) {
            Ok(err) => format!(
                "{} (HTTP {}, code {}, sqlState {})",
                err.message.unwrap_or_else(|| "unknown error".into()),
                status.as_u16(),
                err.code.unwrap_or_else(|| "-".into()),
                err.sql_state.unwrap_or_else(|| "-".into())
            ),
            Err(_) => format!("HTTP {}: {}", status.as_u16(), text),
        };
        Err(TransferError::source_call(operation, message))
    }

    async fn active_role(&self) -> Result<String> {
        if let Some(role) = &self.config.role {
            return Ok(snowflake_catalog_name(role));
        }
        let result = self.execute("current_role", &sql::current_role()).await?;
        result
            .scalar()
            .map(str::to_string)
            .ok_or_else(|| TransferError::source_call("current_role", "session has no active role"))
    }
}

#[async_trait]
impl SourceWarehouse for SnowflakeClient {
    async fn ping(&self) -> Result<String> {
        let result = self.execute("ping", &sql::ping()).await?;
        Ok(result.scalar().unwrap_or_default().to_string())
    }

    async fn schema_exists(&self, database: &str, schema: &str) -> Result<bool> {
        let result = self
            .execute("schema_exists", &sql::schema_exists(database, schema)?)
            .await?;
        Ok(result.scalar_i64("schema_exists")? > 0)
    }

    async fn ensure_schema(&self, database: &str, schema: &str) -> Result<()> {
        self.execute(
            "create_schema",
            &sql::create_schema_if_not_exists(database, schema)?,
        )
        .await?;
        debug!("Schema {}.{} ready", database, schema);
        Ok(())
    }

    async fn ensure_storage_integration(&self, integration: &StorageIntegration) -> Result<()> {
        self.execute(
            "create_storage_integration",
            &sql::create_storage_integration(integration)?,
        )
        .await?;

        let role = self.active_role().await?;
        self.execute(
            "grant_integration_usage",
            &sql::grant_integration_usage(&integration.name, &role)?,
        )
        .await?;
        info!(
            "Storage integration {} bound to {} (usage granted to {})",
            integration.name,
            integration.allowed_location(),
            role
        );
        Ok(())
    }

    async fn ensure_stage(&self, stage: &ExternalStage) -> Result<()> {
        self.execute("create_stage", &sql::create_stage(stage)?)
            .await?;
        debug!("Stage {} -> {}", stage.name, stage.url());
        Ok(())
    }

    async fn table_exists(&self, table: &TableRef) -> Result<bool> {
        let result = self
            .execute("table_exists", &sql::table_exists(table)?)
            .await?;
        Ok(result.scalar_i64("table_exists")? > 0)
    }

    async fn list_tables(&self, database: &str, schema: &str) -> Result<Vec<String>> {
        let result = self
            .execute("list_tables", &sql::list_tables(database, schema)?)
            .await?;
        Ok(result
            .rows
            .into_iter()
            .filter_map(|row| row.into_iter().next().flatten())
            .collect())
    }

    async fn row_count(&self, table: &TableRef) -> Result<i64> {
        let result = self.execute("row_count", &sql::row_count(table)?).await?;
        let count = result.scalar_i64("row_count")?;
        debug!("Row count for {}: {}", table, count);
        Ok(count)
    }

    async fn copy_table(&self, from: &TableRef, to: &TableRef) -> Result<()> {
        self.execute("copy_table", &sql::copy_table(from, to)?)
            .await?;
        Ok(())
    }

    async fn export_table(
        &self,
        table: &TableRef,
        stage: &ExternalStage,
        prefix: &str,
        options: &ExportOptions,
    ) -> Result<ExportSummary> {
        // OVERWRITE only replaces files with matching names; clear the prefix
        // so a shorter re-export cannot leave old parts behind.
        self.execute("remove_stage_prefix", &sql::remove_prefix(stage, prefix)?)
            .await?;

        let result = self
            .execute(
                "copy_into_stage",
                &sql::copy_into_stage(table, stage, prefix, options)?,
            )
            .await?;

        let parse = |column: &str| -> i64 {
            result
                .get(0, column)
                .and_then(|v| v.parse().ok())
                .unwrap_or(0)
        };
        Ok(ExportSummary {
            rows_unloaded: parse("rows_unloaded"),
            input_bytes: parse("input_bytes"),
            output_bytes: parse("output_bytes"),
        })
    }
}
