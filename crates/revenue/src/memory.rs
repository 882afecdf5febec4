//! In-memory sinks
//!
//! Used by `STORAGE_BACKEND=memory` for local runs without Google credentials,
//! and by tests that need to observe writes or inject failures.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{Map, Value};
use time::OffsetDateTime;

use crate::error::{RevenueError, RevenueResult};
use crate::events::{format_iso_millis, AnalyticsRow, EventDocument, FieldValue};
use crate::sinks::{AnalyticsSink, DocumentSink, QueryRow, QueryRunner};

/// A row captured by [`InMemoryAnalytics`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRow {
    pub dataset: String,
    pub table: String,
    pub row: AnalyticsRow,
}

/// Append-only row store
#[derive(Debug, Default)]
pub struct InMemoryAnalytics {
    rows: Mutex<Vec<StoredRow>>,
    calls: AtomicUsize,
    failure: Option<String>,
}

impl InMemoryAnalytics {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every insert fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn rows(&self) -> Vec<StoredRow> {
        self.rows.lock().map(|rows| rows.clone()).unwrap_or_default()
    }

    /// Number of insert attempts, including failed ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnalyticsSink for InMemoryAnalytics {
    async fn insert_row(&self, dataset: &str, table: &str, row: &AnalyticsRow) -> RevenueResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(RevenueError::Upstream {
                status: 500,
                message: message.clone(),
            });
        }

        let mut rows = self
            .rows
            .lock()
            .map_err(|_| RevenueError::Unsupported("analytics store lock poisoned".into()))?;
        rows.push(StoredRow {
            dataset: dataset.to_string(),
            table: table.to_string(),
            row: row.clone(),
        });
        Ok(())
    }
}

#[async_trait]
impl QueryRunner for InMemoryAnalytics {
    async fn run_query(&self, _sql: &str, _location: &str) -> RevenueResult<Vec<QueryRow>> {
        Err(RevenueError::Unsupported(
            "SQL queries are not supported by the in-memory analytics store".to_string(),
        ))
    }
}

/// A document held by [`InMemoryDocuments`]
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Field values as plain JSON; timestamps are rendered as ISO strings
    pub fields: Map<String, Value>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Merge-upsert document store keyed by `(collection, id)`
#[derive(Debug, Default)]
pub struct InMemoryDocuments {
    documents: Mutex<BTreeMap<(String, String), StoredDocument>>,
    calls: AtomicUsize,
    failure: Option<String>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose every merge fails with `message`
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            failure: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn get(&self, collection: &str, id: &str) -> Option<StoredDocument> {
        self.documents
            .lock()
            .ok()?
            .get(&(collection.to_string(), id.to_string()))
            .cloned()
    }

    /// Number of documents currently stored in `collection`
    pub fn count(&self, collection: &str) -> usize {
        self.documents
            .lock()
            .map(|docs| docs.keys().filter(|(c, _)| c == collection).count())
            .unwrap_or_default()
    }

    /// Number of merge attempts, including failed ones
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSink for InMemoryDocuments {
    async fn merge_document(&self, collection: &str, document: &EventDocument) -> RevenueResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(message) = &self.failure {
            return Err(RevenueError::Upstream {
                status: 500,
                message: message.clone(),
            });
        }

        let id = document.document_id()?.to_string();
        let now = OffsetDateTime::now_utc();

        let mut documents = self
            .documents
            .lock()
            .map_err(|_| RevenueError::Unsupported("document store lock poisoned".into()))?;
        let stored = documents
            .entry((collection.to_string(), id))
            .or_insert_with(|| StoredDocument {
                fields: Map::new(),
                created_at: now,
                updated_at: now,
            });

        for (name, value) in document.fields() {
            let value = match value {
                FieldValue::Json(json) => json,
                FieldValue::Timestamp(ts) => Value::String(format_iso_millis(ts)),
            };
            stored.fields.insert(name.to_string(), value);
        }
        stored.updated_at = now;
        Ok(())
    }
}
