// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Dime Meridian Revenue Module
//!
//! Moves RevenueCat subscription data into Google Cloud and reads it back.
//!
//! ## Features
//!
//! - **Webhook Ingestion**: Shared-secret check, event projection, concurrent
//!   BigQuery insert + Firestore merge
//! - **Dynamic Queries**: Verbatim SQL against BigQuery with errors returned as data
//! - **Google Clients**: BigQuery and Firestore REST with metadata-server tokens
//! - **In-Memory Stores**: Credential-free backend for local runs and tests

pub mod bigquery;
pub mod client;
pub mod error;
pub mod events;
pub mod firestore;
pub mod memory;
pub mod query;
pub mod sinks;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

use std::str::FromStr;
use std::sync::Arc;

// Clients
pub use bigquery::BigQueryClient;
pub use client::{GoogleClient, GoogleConfig, TokenSource};
pub use firestore::FirestoreClient;

// Error
pub use error::{RevenueError, RevenueResult};

// Events
pub use events::{AnalyticsRow, EventDocument, EventTimestamp, FieldValue, SubscriptionEvent};

// Stores
pub use memory::{InMemoryAnalytics, InMemoryDocuments, StoredDocument, StoredRow};
pub use sinks::{AnalyticsSink, DocumentSink, QueryRow, QueryRunner};

// Query
pub use query::{DynamicQueryExecutor, QueryOutcome, DEFAULT_QUERY_LOCATION};

// Webhooks
pub use webhooks::{
    WebhookIngestor, ANALYTICS_DATASET, EVENTS_COLLECTION, REVENUE_EVENTS_TABLE,
};

/// Which stores back the ingestor and the query executor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageBackend {
    #[default]
    Google,
    Memory,
}

impl FromStr for StorageBackend {
    type Err = RevenueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "google" | "gcp" => Ok(Self::Google),
            "memory" | "in-memory" => Ok(Self::Memory),
            other => Err(RevenueError::Config(format!(
                "unknown storage backend {:?} (expected \"google\" or \"memory\")",
                other
            ))),
        }
    }
}

/// Main revenue service that combines ingestion and querying
pub struct RevenueService {
    pub webhooks: WebhookIngestor,
    pub query: DynamicQueryExecutor,
}

impl RevenueService {
    /// Create the service for a storage backend
    pub fn new(
        http: reqwest::Client,
        webhook_secret: impl Into<String>,
        backend: StorageBackend,
        google: GoogleConfig,
        query_location: impl Into<String>,
    ) -> Self {
        match backend {
            StorageBackend::Google => {
                let google = GoogleClient::new(http, google);
                let bigquery = Arc::new(BigQueryClient::new(google.clone()));
                let firestore = Arc::new(FirestoreClient::new(google));
                Self::with_sinks(webhook_secret, bigquery.clone(), firestore, bigquery, query_location)
            }
            StorageBackend::Memory => {
                let analytics = Arc::new(InMemoryAnalytics::new());
                let documents = Arc::new(InMemoryDocuments::new());
                Self::with_sinks(webhook_secret, analytics.clone(), documents, analytics, query_location)
            }
        }
    }

    /// Create the service over explicit stores
    pub fn with_sinks(
        webhook_secret: impl Into<String>,
        analytics: Arc<dyn AnalyticsSink>,
        documents: Arc<dyn DocumentSink>,
        runner: Arc<dyn QueryRunner>,
        query_location: impl Into<String>,
    ) -> Self {
        Self {
            webhooks: WebhookIngestor::new(webhook_secret, analytics, documents),
            query: DynamicQueryExecutor::new(runner, query_location),
        }
    }
}
