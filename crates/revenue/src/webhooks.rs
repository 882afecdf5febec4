//! RevenueCat webhook ingestion
//!
//! Authenticates the delivery with the shared secret, projects the event, and
//! writes it to BigQuery and Firestore concurrently. Both writes always run to
//! completion; there is no compensation when only one of them lands.

use std::sync::Arc;

use crate::error::{RevenueError, RevenueResult};
use crate::events::SubscriptionEvent;
use crate::sinks::{AnalyticsSink, DocumentSink};

pub const ANALYTICS_DATASET: &str = "analytics";
pub const REVENUE_EVENTS_TABLE: &str = "revenue_events";
pub const EVENTS_COLLECTION: &str = "RevenuecatEvents";

/// Ingests RevenueCat subscription events
pub struct WebhookIngestor {
    secret: String,
    analytics: Arc<dyn AnalyticsSink>,
    documents: Arc<dyn DocumentSink>,
}

impl WebhookIngestor {
    pub fn new(
        secret: impl Into<String>,
        analytics: Arc<dyn AnalyticsSink>,
        documents: Arc<dyn DocumentSink>,
    ) -> Self {
        Self {
            secret: secret.into(),
            analytics,
            documents,
        }
    }

    /// Compare the trimmed `Authorization` value against the shared secret
    ///
    /// Plain byte equality, not constant-time.
    pub fn verify_authorization(&self, authorization: Option<&str>) -> RevenueResult<()> {
        match authorization {
            Some(received) if received.trim() == self.secret.trim() => Ok(()),
            _ => {
                tracing::warn!(
                    header_present = authorization.is_some(),
                    "Unauthorized webhook attempt"
                );
                Err(RevenueError::Unauthorized)
            }
        }
    }

    /// Authenticate, validate and ingest one webhook delivery
    pub async fn handle_delivery(
        &self,
        authorization: Option<&str>,
        body: &[u8],
    ) -> RevenueResult<()> {
        self.verify_authorization(authorization)?;
        let event = SubscriptionEvent::from_envelope(body).map_err(|e| {
            if !e.is_client_error() {
                tracing::error!(error = %e, "Error processing webhook");
            }
            e
        })?;
        self.ingest(&event).await
    }

    /// Write the event to both stores concurrently
    ///
    /// Waits for both writes even if one fails early. Any failure is reported as
    /// [`RevenueError::DualWrite`]; the side that succeeded stays written.
    pub async fn ingest(&self, event: &SubscriptionEvent) -> RevenueResult<()> {
        let row = event.analytics_row();
        let document = event.document();

        // Reports price_in_usd even when the stored amount came from `price`
        tracing::info!(
            event_id = ?event.id,
            event_type = ?event.event_type,
            price_in_usd = ?event.price_in_usd,
            "Ingesting event"
        );

        let (analytics, documents) = tokio::join!(
            self.analytics
                .insert_row(ANALYTICS_DATASET, REVENUE_EVENTS_TABLE, &row),
            self.documents.merge_document(EVENTS_COLLECTION, &document),
        );

        if analytics.is_ok() && documents.is_ok() {
            tracing::debug!(event_id = ?event.id, "Event ingested into both stores");
            return Ok(());
        }

        if let Err(e) = &analytics {
            tracing::error!(event_id = ?event.id, sink = "bigquery", error = %e, "Error processing webhook");
        }
        if let Err(e) = &documents {
            tracing::error!(event_id = ?event.id, sink = "firestore", error = %e, "Error processing webhook");
        }

        Err(RevenueError::DualWrite {
            analytics: analytics.err().map(|e| e.to_string()),
            documents: documents.err().map(|e| e.to_string()),
        })
    }
}
