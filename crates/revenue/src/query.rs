//! Dynamic SQL execution on behalf of an automated caller
//!
//! Queries run verbatim. Failures come back as data so the caller can read the
//! warehouse's message and try again with a corrected query.

use std::sync::Arc;

use serde::Serialize;

use crate::sinks::{QueryRow, QueryRunner};

pub const DEFAULT_QUERY_LOCATION: &str = "us-central1";

/// Result of a dynamic query, serialized as `{ "data": [...] }` or `{ "error": "..." }`
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum QueryOutcome {
    Rows { data: Vec<QueryRow> },
    Failed { error: String },
}

pub struct DynamicQueryExecutor {
    runner: Arc<dyn QueryRunner>,
    location: String,
}

impl DynamicQueryExecutor {
    pub fn new(runner: Arc<dyn QueryRunner>, location: impl Into<String>) -> Self {
        Self {
            runner,
            location: location.into(),
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub async fn execute(&self, sql: &str) -> QueryOutcome {
        tracing::info!(query = %sql, location = %self.location, "Executing AI generated query");

        match self.runner.run_query(sql, &self.location).await {
            Ok(rows) => {
                tracing::debug!(row_count = rows.len(), "Query completed");
                QueryOutcome::Rows { data: rows }
            }
            Err(e) => {
                tracing::error!(error = %e, "BigQuery error");
                QueryOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }
}
