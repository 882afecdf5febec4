//! BigQuery REST client
//!
//! Covers the two calls this service makes: streaming inserts into a table and
//! synchronous standard-SQL queries with result decoding.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Number, Value};
use time::OffsetDateTime;

use crate::client::{upstream_error, GoogleClient};
use crate::error::{RevenueError, RevenueResult};
use crate::events::{format_iso_millis, AnalyticsRow};
use crate::sinks::{AnalyticsSink, QueryRow, QueryRunner};

/// Server-side wait per `jobs.query` / `getQueryResults` call
const QUERY_WAIT_MS: u32 = 10_000;

#[derive(Clone)]
pub struct BigQueryClient {
    google: GoogleClient,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InsertAllResponse {
    #[serde(default)]
    insert_errors: Vec<RowInsertErrors>,
}

#[derive(Debug, Deserialize)]
struct RowInsertErrors {
    #[serde(default)]
    index: u64,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    query: &'a str,
    use_legacy_sql: bool,
    location: &'a str,
    timeout_ms: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    #[serde(default)]
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    location: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Clone, Deserialize)]
struct TableFieldSchema {
    name: String,
    #[serde(rename = "type")]
    field_type: String,
    mode: Option<String>,
    #[serde(default)]
    fields: Vec<TableFieldSchema>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

impl BigQueryClient {
    pub fn new(google: GoogleClient) -> Self {
        Self { google }
    }

    fn project_url(&self) -> String {
        let config = self.google.config();
        format!(
            "{}/projects/{}",
            config.bigquery_api_base.trim_end_matches('/'),
            config.project_id
        )
    }

    /// Stream rows into `dataset.table` via `tabledata.insertAll`
    ///
    /// Each row gets a random `insertId`, so retried deliveries are not
    /// deduplicated by BigQuery.
    pub async fn insert_all(&self, dataset: &str, table: &str, rows: Vec<Value>) -> RevenueResult<()> {
        let url = format!(
            "{}/datasets/{}/tables/{}/insertAll",
            self.project_url(),
            dataset,
            table
        );

        let rows: Vec<Value> = rows
            .into_iter()
            .map(|row| json!({ "insertId": uuid::Uuid::new_v4().to_string(), "json": row }))
            .collect();
        let body = json!({
            "kind": "bigquery#tableDataInsertAllRequest",
            "rows": rows,
        });

        let request = self.google.http().post(&url).json(&body);
        let response = self.google.authorize(request).await?.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }

        let parsed: InsertAllResponse = response.json().await?;
        if let Some(first) = parsed.insert_errors.first() {
            let detail = first
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.reason, e.message))
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RevenueError::Upstream {
                status: 200,
                message: format!(
                    "{} row(s) rejected by {}.{} (row {}: {})",
                    parsed.insert_errors.len(),
                    dataset,
                    table,
                    first.index,
                    detail
                ),
            });
        }

        Ok(())
    }

    /// Run a standard-SQL query and collect every result page
    pub async fn query(&self, sql: &str, location: &str) -> RevenueResult<Vec<QueryRow>> {
        let url = format!("{}/queries", self.project_url());
        let request = self.google.http().post(&url).json(&QueryRequest {
            query: sql,
            use_legacy_sql: false,
            location,
            timeout_ms: QUERY_WAIT_MS,
        });

        let response = self.google.authorize(request).await?.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        let mut page: QueryResponse = response.json().await?;

        let mut schema: Option<TableSchema> = None;
        let mut rows = Vec::new();

        loop {
            if !page.job_complete {
                let job = job_reference(&page)?;
                tracing::debug!(job_id = %job.job_id, "Query still running, waiting for results");
                page = self.query_results(&job, location, None).await?;
                continue;
            }

            if schema.is_none() {
                schema = page.schema.take();
            }
            if let Some(schema) = &schema {
                rows.extend(page.rows.iter().map(|row| decode_row(&schema.fields, &row.f)));
            }

            match page.page_token.take() {
                Some(token) => {
                    let job = job_reference(&page)?;
                    page = self.query_results(&job, location, Some(&token)).await?;
                }
                None => break,
            }
        }

        Ok(rows)
    }

    async fn query_results(
        &self,
        job: &JobReference,
        location: &str,
        page_token: Option<&str>,
    ) -> RevenueResult<QueryResponse> {
        let url = format!("{}/queries/{}", self.project_url(), job.job_id);
        let location = job.location.as_deref().unwrap_or(location);
        let wait = QUERY_WAIT_MS.to_string();

        let mut params = vec![("location", location), ("timeoutMs", wait.as_str())];
        if let Some(token) = page_token {
            params.push(("pageToken", token));
        }

        let request = self.google.http().get(&url).query(&params);
        let response = self.google.authorize(request).await?.send().await?;
        if !response.status().is_success() {
            return Err(upstream_error(response).await);
        }
        Ok(response.json().await?)
    }
}

fn job_reference(page: &QueryResponse) -> RevenueResult<JobReference> {
    page.job_reference
        .clone()
        .ok_or_else(|| RevenueError::UnexpectedResponse {
            service: "bigquery",
            detail: "query response without jobReference".to_string(),
        })
}

fn decode_row(fields: &[TableFieldSchema], cells: &[TableCell]) -> QueryRow {
    fields
        .iter()
        .zip(cells)
        .map(|(field, cell)| (field.name.clone(), decode_value(field, &cell.v)))
        .collect()
}

fn decode_value(field: &TableFieldSchema, value: &Value) -> Value {
    if field.mode.as_deref() == Some("REPEATED") {
        return match value {
            Value::Array(items) => Value::Array(
                items
                    .iter()
                    .map(|item| decode_scalar(field, item.get("v").unwrap_or(&Value::Null)))
                    .collect(),
            ),
            _ => Value::Array(Vec::new()),
        };
    }
    decode_scalar(field, value)
}

fn decode_scalar(field: &TableFieldSchema, value: &Value) -> Value {
    if value.is_null() {
        return Value::Null;
    }

    let text = match value {
        Value::String(s) => s.as_str(),
        Value::Object(record) => {
            let cells: Vec<TableCell> = match record.get("f") {
                Some(cells) => serde_json::from_value(cells.clone()).unwrap_or_default(),
                None => Vec::new(),
            };
            return Value::Object(decode_row(&field.fields, &cells));
        }
        other => return other.clone(),
    };

    match field.field_type.as_str() {
        "INTEGER" | "INT64" => text
            .parse::<i64>()
            .map(Value::from)
            .unwrap_or_else(|_| Value::String(text.to_string())),
        "FLOAT" | "FLOAT64" => text
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(text.to_string())),
        "BOOLEAN" | "BOOL" => match text {
            "true" => Value::Bool(true),
            "false" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        },
        "TIMESTAMP" => text
            .parse::<f64>()
            .ok()
            .and_then(|secs| {
                OffsetDateTime::from_unix_timestamp_nanos((secs * 1e9).round() as i128).ok()
            })
            .map(|ts| Value::String(format_iso_millis(ts)))
            .unwrap_or_else(|| Value::String(text.to_string())),
        _ => Value::String(text.to_string()),
    }
}

#[async_trait]
impl AnalyticsSink for BigQueryClient {
    async fn insert_row(&self, dataset: &str, table: &str, row: &AnalyticsRow) -> RevenueResult<()> {
        let row = serde_json::to_value(row)?;
        self.insert_all(dataset, table, vec![row]).await
    }
}

#[async_trait]
impl QueryRunner for BigQueryClient {
    async fn run_query(&self, sql: &str, location: &str) -> RevenueResult<Vec<QueryRow>> {
        self.query(sql, location).await
    }
}
