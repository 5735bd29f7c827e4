//! BigQuery client over the v2 REST API.

use super::{DestinationWarehouse, LoadRequest, LoadSummary, QueryResult};
use crate::config::DestinationConfig;
use crate::core::identifier::validate_identifier;
use crate::error::{Result, TransferError};
use async_trait::async_trait;
use reqwest::{Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{debug, info};

/// Server-side wait per `jobs.query` / `getQueryResults` call.
const QUERY_WAIT_MS: u64 = 10_000;

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    #[serde(default)]
    status: Option<JobStatus>,
    #[serde(default)]
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    #[serde(default)]
    error_result: Option<JobError>,
    #[serde(default)]
    errors: Vec<JobError>,
}

#[derive(Debug, Deserialize)]
struct JobError {
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    #[serde(default)]
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    #[serde(default)]
    output_rows: Option<String>,
    #[serde(default)]
    input_files: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableMetadata {
    #[serde(default)]
    num_rows: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableList {
    #[serde(default)]
    tables: Vec<TableListEntry>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableListEntry {
    table_reference: TableReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TableReference {
    table_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_reference: Option<JobReference>,
    #[serde(default)]
    job_complete: bool,
    #[serde(default)]
    schema: Option<QuerySchema>,
    #[serde(default)]
    rows: Vec<QueryRow>,
    #[serde(default)]
    page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuerySchema {
    #[serde(default)]
    fields: Vec<QueryField>,
}

#[derive(Debug, Deserialize)]
struct QueryField {
    name: String,
}

#[derive(Debug, Deserialize)]
struct QueryRow {
    #[serde(default)]
    f: Vec<QueryCell>,
}

#[derive(Debug, Deserialize)]
struct QueryCell {
    #[serde(default)]
    v: Value,
}

impl JobStatus {
    fn failure_message(&self) -> Option<String> {
        let primary = self.error_result.as_ref()?;
        let mut message = match &primary.reason {
            Some(reason) => format!("{} ({})", primary.message, reason),
            None => primary.message.clone(),
        };
        let details: Vec<&str> = self
            .errors
            .iter()
            .map(|e| e.message.as_str())
            .filter(|m| !m.is_empty() && *m != primary.message)
            .collect();
        if !details.is_empty() {
            message.push_str(&format!("; {}", details.join("; ")));
        }
        Some(message)
    }
}

/// BigQuery REST client.
pub struct BigQueryClient {
    http: reqwest::Client,
    config: DestinationConfig,
    base_url: String,
    poll_interval: Duration,
}

impl BigQueryClient {
    /// Create a new client.
    pub fn new(config: DestinationConfig, poll_interval: Duration) -> Result<Self> {
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

    /// `<base>/projects/<project>/<segments...>` with each segment percent-encoded.
    fn url(&self, operation: &str, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.base_url).map_err(|e| {
            TransferError::destination_call(operation, format!("invalid endpoint {}: {}", self.base_url, e))
        })?;
        url.path_segments_mut()
            .map_err(|_| {
                TransferError::destination_call(operation, format!("endpoint cannot be a base: {}", self.base_url))
            })?
            .pop_if_empty()
            .push("projects")
            .push(&self.config.project)
            .extend(segments);
        Ok(url)
    }

    /// Send a request and return the status plus raw body.
    async fn send(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<(StatusCode, String)> {
        let mut builder = self
            .http
            .request(method, url)
            .bearer_auth(&self.config.access_token)
            .query(query);
        if let Some(body) = body {
            builder = builder.json(body);
        }
        let response = builder
            .send()
            .await
            .map_err(|e| TransferError::destination_call(operation, e.to_string()))?;
        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| TransferError::destination_call(operation, e.to_string()))?;
        Ok((status, text))
    }

    fn api_error(operation: &str, status: StatusCode, text: &str) -> TransferError {
        let message = match serde_json::from_str::<ErrorEnvelope>(text) {
            Ok(env) => format!(
                "{} (HTTP {}{})",
                env.error.message,
                status.as_u16(),
                env.error
                    .status
                    .map(|s| format!(", {}", s))
                    .unwrap_or_default()
            ),
            Err(_) => format!("HTTP {}: {}", status.as_u16(), text),
        };
        TransferError::destination_call(operation, message)
    }

    fn parse<T: DeserializeOwned>(operation: &str, text: &str) -> Result<T> {
        serde_json::from_str(text).map_err(|e| {
            TransferError::destination_call(operation, format!("invalid response body: {}", e))
        })
    }

    /// Send a request and decode a successful JSON response.
    async fn call<T: DeserializeOwned>(
        &self,
        operation: &str,
        method: Method,
        url: Url,
        query: &[(&str, String)],
        body: Option<&Value>,
    ) -> Result<T> {
        let (status, text) = self.send(operation, method, url, query, body).await?;
        if !status.is_success() {
            return Err(Self::api_error(operation, status, &text));
        }
        Self::parse(operation, &text)
    }

    fn load_job_body(&self, request: &LoadRequest, job_id: &str) -> Value {
        json!({
            "jobReference": {
                "projectId": self.config.project,
                "jobId": job_id,
                "location": self.config.location,
            },
            "configuration": {
                "load": {
                    "sourceUris": request.source_uris,
                    "sourceFormat": request.source_format.as_str(),
                    "writeDisposition": request.write_disposition.as_str(),
                    "autodetect": request.autodetect,
                    "destinationTable": {
                        "projectId": self.config.project,
                        "datasetId": request.dataset,
                        "tableId": request.table,
                    },
                }
            }
        })
    }

    /// Poll a job until it reports DONE.
    async fn wait_for_job(&self, operation: &str, mut job: Job) -> Result<Job> {
        loop {
            let outcome = match &job.status {
                Some(status) if status.state == "DONE" => Some(status.failure_message()),
                _ => None,
            };
            match outcome {
                Some(Some(message)) => {
                    return Err(TransferError::destination_call(operation, message))
                }
                Some(None) => return Ok(job),
                None => {}
            }
            tokio::time::sleep(self.poll_interval).await;
            let reference = job.job_reference.clone();
            debug!("{}: polling job {}", operation, reference.job_id);
            let location = reference
                .location
                .unwrap_or_else(|| self.config.location.clone());
            let url = self.url(operation, &["jobs", &reference.job_id])?;
            job = self
                .call(operation, Method::GET, url, &[("location", location)], None)
                .await?;
        }
    }
}

#[async_trait]
impl DestinationWarehouse for BigQueryClient {
    async fn ping(&self) -> Result<()> {
        self.run_query("SELECT 1").await?;
        Ok(())
    }

    async fn dataset_exists(&self, dataset: &str) -> Result<bool> {
        let url = self.url("dataset_exists", &["datasets", dataset])?;
        let (status, text) = self
            .send("dataset_exists", Method::GET, url, &[], None)
            .await?;
        match status {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(Self::api_error("dataset_exists", s, &text)),
        }
    }

    async fn create_dataset(&self, dataset: &str) -> Result<()> {
        validate_identifier(dataset)?;
        let url = self.url("create_dataset", &["datasets"])?;
        let body = json!({
            "datasetReference": {
                "projectId": self.config.project,
                "datasetId": dataset,
            },
            "location": self.config.location,
        });
        let (status, text) = self
            .send("create_dataset", Method::POST, url, &[], Some(&body))
            .await?;
        match status {
            StatusCode::CONFLICT => {
                debug!("Dataset {} already exists", dataset);
                Ok(())
            }
            s if s.is_success() => {
                info!("Created dataset {}.{}", self.config.project, dataset);
                Ok(())
            }
            s => Err(Self::api_error("create_dataset", s, &text)),
        }
    }

    async fn load_from_storage(&self, request: &LoadRequest) -> Result<LoadSummary> {
        let job_id = format!("sf_bq_load_{}", uuid::Uuid::new_v4().simple());
        let url = self.url("load_job", &["jobs"])?;
        let body = self.load_job_body(request, &job_id);
        debug!(
            "load_job {}: {:?} -> {}.{} ({})",
            job_id,
            request.source_uris,
            request.dataset,
            request.table,
            request.write_disposition.as_str()
        );

        let job: Job = self
            .call("load_job", Method::POST, url, &[], Some(&body))
            .await?;
        let job = self.wait_for_job("load_job", job).await?;

        let load = job.statistics.and_then(|s| s.load);
        Ok(LoadSummary {
            job_id: job.job_reference.job_id,
            output_rows: load
                .as_ref()
                .and_then(|l| l.output_rows.as_deref())
                .and_then(|v| v.parse().ok()),
            input_files: load
                .as_ref()
                .and_then(|l| l.input_files.as_deref())
                .and_then(|v| v.parse().ok()),
        })
    }

    async fn table_exists(&self, dataset: &str, table: &str) -> Result<bool> {
        let url = self.url("table_exists", &["datasets", dataset, "tables", table])?;
        let (status, text) = self
            .send("table_exists", Method::GET, url, &[], None)
            .await?;
        match status {
            StatusCode::NOT_FOUND => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(Self::api_error("table_exists", s, &text)),
        }
    }

    async fn row_count(&self, dataset: &str, table: &str) -> Result<i64> {
        let url = self.url("row_count", &["datasets", dataset, "tables", table])?;
        let meta: TableMetadata = self.call("row_count", Method::GET, url, &[], None).await?;
        let raw = meta.num_rows.unwrap_or_else(|| "0".to_string());
        raw.parse::<i64>().map_err(|e| {
            TransferError::destination_call("row_count", format!("invalid numRows {:?}: {}", raw, e))
        })
    }

    async fn list_tables(&self, dataset: &str) -> Result<Vec<String>> {
        let mut tables = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let url = self.url("list_tables", &["datasets", dataset, "tables"])?;
            let query: Vec<(&str, String)> = page_token
                .take()
                .map(|t| vec![("pageToken", t)])
                .unwrap_or_default();
            let page: TableList = self
                .call("list_tables", Method::GET, url, &query, None)
                .await?;
            tables.extend(page.tables.into_iter().map(|t| t.table_reference.table_id));
            match page.next_page_token {
                Some(token) if !token.is_empty() => page_token = Some(token),
                _ => break,
            }
        }
        Ok(tables)
    }

    async fn run_query(&self, sql: &str) -> Result<QueryResult> {
        debug!("run_query: {}", sql);
        let url = self.url("run_query", &["queries"])?;
        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "location": self.config.location,
            "timeoutMs": QUERY_WAIT_MS,
        });
        let mut response: QueryResponse = self
            .call("run_query", Method::POST, url, &[], Some(&body))
            .await?;

        let mut result = QueryResult::default();
        loop {
            if response.job_complete {
                if result.columns.is_empty() {
                    if let Some(schema) = &response.schema {
                        result.columns = schema.fields.iter().map(|f| f.name.clone()).collect();
                    }
                }
                result.rows.extend(
                    response
                        .rows
                        .drain(..)
                        .map(|row| row.f.into_iter().map(|cell| cell.v).collect()),
                );
                if response.page_token.as_deref().map_or(true, str::is_empty) {
                    return Ok(result);
                }
            } else {
                tokio::time::sleep(self.poll_interval).await;
            }

            let reference = response.job_reference.clone().ok_or_else(|| {
                TransferError::destination_call("run_query", "query response has no job reference")
            })?;
            let location = reference
                .location
                .unwrap_or_else(|| self.config.location.clone());
            let mut query = vec![
                ("location", location),
                ("timeoutMs", QUERY_WAIT_MS.to_string()),
            ];
            if response.job_complete {
                if let Some(token) = response.page_token.take() {
                    query.push(("pageToken", token));
                }
            }
            let url = self.url("run_query", &["queries", &reference.job_id])?;
            response = self
                .call("run_query", Method::GET, url, &query, None)
                .await?;
        }
    }
}
