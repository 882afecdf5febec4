//! Storage seams for the ingestor and the query executor

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::RevenueResult;
use crate::events::{AnalyticsRow, EventDocument};

/// A result row keyed by column name
pub type QueryRow = Map<String, Value>;

/// Append-only analytical table writes
#[async_trait]
pub trait AnalyticsSink: Send + Sync {
    async fn insert_row(&self, dataset: &str, table: &str, row: &AnalyticsRow)
        -> RevenueResult<()>;
}

/// Merge-upsert of event documents keyed by event id
///
/// Implementations set `createdAt` only when the document is new and refresh
/// `updatedAt` on every call.
#[async_trait]
pub trait DocumentSink: Send + Sync {
    async fn merge_document(&self, collection: &str, document: &EventDocument)
        -> RevenueResult<()>;
}

/// Verbatim SQL execution against the warehouse
#[async_trait]
pub trait QueryRunner: Send + Sync {
    async fn run_query(&self, sql: &str, location: &str) -> RevenueResult<Vec<QueryRow>>;
}
