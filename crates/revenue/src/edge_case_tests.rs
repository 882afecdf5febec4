// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for Webhook Ingestion
//!
//! Tests boundary conditions of the ingestor in:
//! - Authentication (ING-A01 to ING-A03)
//! - Payload validation (ING-V01 to ING-V03)
//! - Field projection (ING-P01 to ING-P04)
//! - Dual write and idempotency (ING-W01 to ING-W05)
//! - Failure logging (ING-L01 to ING-L03)

#[cfg(test)]
mod ingestion_tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;
    use tokio::sync::Barrier;

    use crate::error::{RevenueError, RevenueResult};
    use crate::events::{AnalyticsRow, EventDocument, INVALID_DATE};
    use crate::memory::{InMemoryAnalytics, InMemoryDocuments};
    use crate::sinks::{AnalyticsSink, DocumentSink};
    use crate::webhooks::{WebhookIngestor, EVENTS_COLLECTION};

    const SECRET: &str = "rc_webhook_secret";

    fn setup() -> (WebhookIngestor, Arc<InMemoryAnalytics>, Arc<InMemoryDocuments>) {
        let analytics = Arc::new(InMemoryAnalytics::new());
        let documents = Arc::new(InMemoryDocuments::new());
        let ingestor = WebhookIngestor::new(SECRET, analytics.clone(), documents.clone());
        (ingestor, analytics, documents)
    }

    fn renewal_body() -> Vec<u8> {
        serde_json::to_vec(&json!({
            "event": {
                "id": "evt_1",
                "app_user_id": "u1",
                "product_id": "p1",
                "price": 9.99,
                "store": "app_store",
                "type": "RENEWAL",
                "event_timestamp_ms": 1700000000000i64
            }
        }))
        .unwrap()
    }

    // =========================================================================
    // ING-A01: Missing Authorization - rejected with zero writes
    // =========================================================================
    #[tokio::test]
    async fn test_missing_authorization_writes_nothing() {
        let (ingestor, analytics, documents) = setup();

        let result = ingestor.handle_delivery(None, &renewal_body()).await;

        assert!(matches!(result, Err(RevenueError::Unauthorized)));
        assert_eq!(analytics.call_count(), 0);
        assert_eq!(documents.call_count(), 0);
    }

    // =========================================================================
    // ING-A02: Wrong secret - rejected with zero writes
    // =========================================================================
    #[tokio::test]
    async fn test_wrong_secret_writes_nothing() {
        let (ingestor, analytics, documents) = setup();

        for header in ["wrong", "rc_webhook_secret2", "Bearer rc_webhook_secret"] {
            let result = ingestor.handle_delivery(Some(header), &renewal_body()).await;
            assert!(matches!(result, Err(RevenueError::Unauthorized)), "{}", header);
        }

        assert_eq!(analytics.call_count(), 0);
        assert_eq!(documents.call_count(), 0);
    }

    // =========================================================================
    // ING-A03: Surrounding whitespace on the header is ignored
    // =========================================================================
    #[tokio::test]
    async fn test_padded_secret_is_accepted() {
        let (ingestor, analytics, _) = setup();

        ingestor
            .handle_delivery(Some("  rc_webhook_secret \t"), &renewal_body())
            .await
            .unwrap();

        assert_eq!(analytics.rows().len(), 1);
    }

    // =========================================================================
    // ING-V01: Authorized but empty body - no event data, zero writes
    // =========================================================================
    #[tokio::test]
    async fn test_empty_body_writes_nothing() {
        let (ingestor, analytics, documents) = setup();

        for body in [&b""[..], b"{}", br#"{"event": null}"#, br#"{"event": {}}"#] {
            let result = ingestor.handle_delivery(Some(SECRET), body).await;
            assert!(matches!(result, Err(RevenueError::NoEventData)));
        }

        assert_eq!(analytics.call_count(), 0);
        assert_eq!(documents.call_count(), 0);
    }

    // =========================================================================
    // ING-V02: Unauthorized takes precedence over a bad body
    // =========================================================================
    #[tokio::test]
    async fn test_auth_checked_before_body() {
        let (ingestor, _, _) = setup();
        let result = ingestor.handle_delivery(Some("nope"), b"").await;
        assert!(matches!(result, Err(RevenueError::Unauthorized)));
    }

    // =========================================================================
    // ING-V03: Body that is not JSON - malformed, zero writes
    // =========================================================================
    #[tokio::test]
    async fn test_garbage_body_is_malformed() {
        let (ingestor, analytics, documents) = setup();
        let result = ingestor.handle_delivery(Some(SECRET), b"event=1").await;
        assert!(matches!(result, Err(RevenueError::MalformedPayload(_))));
        assert_eq!(analytics.call_count() + documents.call_count(), 0);
    }

    // =========================================================================
    // ING-P01: Concrete renewal - exact row and document
    // =========================================================================
    #[tokio::test]
    async fn test_renewal_projection() {
        let (ingestor, analytics, documents) = setup();

        ingestor
            .handle_delivery(Some(SECRET), &renewal_body())
            .await
            .unwrap();

        let rows = analytics.rows();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].dataset, "analytics");
        assert_eq!(rows[0].table, "revenue_events");
        assert_eq!(
            serde_json::to_value(&rows[0].row).unwrap(),
            json!({
                "event_id": "evt_1",
                "user_id": "u1",
                "product_id": "p1",
                "amount_usd": 9.99,
                "store": "app_store",
                "type": "RENEWAL",
                "timestamp": "2023-11-14T22:13:20.000Z"
            })
        );

        let doc = documents.get(EVENTS_COLLECTION, "evt_1").expect("document stored");
        assert_eq!(doc.fields["eventId"], json!("evt_1"));
        assert_eq!(doc.fields["userId"], json!("u1"));
        assert_eq!(doc.fields["productId"], json!("p1"));
        assert_eq!(doc.fields["amountUsd"], json!(9.99));
        assert_eq!(doc.fields["store"], json!("app_store"));
        assert_eq!(doc.fields["type"], json!("RENEWAL"));
        assert_eq!(doc.fields["eventTimestamp"], json!("2023-11-14T22:13:20.000Z"));
        assert_eq!(doc.fields["rawEvent"]["event_timestamp_ms"], json!(1700000000000i64));
    }

    // =========================================================================
    // ING-P02: Both price fields present - price wins
    // =========================================================================
    #[tokio::test]
    async fn test_price_beats_price_in_usd() {
        let (ingestor, analytics, documents) = setup();
        let body = json!({"event": {
            "id": "evt_2", "price": 4.99, "price_in_usd": 5.49, "event_timestamp_ms": 1700000000000i64
        }});

        ingestor
            .handle_delivery(Some(SECRET), &serde_json::to_vec(&body).unwrap())
            .await
            .unwrap();

        assert_eq!(analytics.rows()[0].row.amount_usd, 4.99);
        let doc = documents.get(EVENTS_COLLECTION, "evt_2").unwrap();
        assert_eq!(doc.fields["amountUsd"], json!(4.99));
    }

    // =========================================================================
    // ING-P03: No price fields - amount is 0.0
    // =========================================================================
    #[tokio::test]
    async fn test_missing_prices_default_to_zero() {
        let (ingestor, analytics, documents) = setup();
        let body = json!({"event": {"id": "evt_3", "type": "CANCELLATION", "event_timestamp_ms": 1700000000000i64}});

        ingestor
            .handle_delivery(Some(SECRET), &serde_json::to_vec(&body).unwrap())
            .await
            .unwrap();

        assert_eq!(analytics.rows()[0].row.amount_usd, 0.0);
        let doc = documents.get(EVENTS_COLLECTION, "evt_3").unwrap();
        assert_eq!(doc.fields["amountUsd"], json!(0.0));
    }

    // =========================================================================
    // ING-P04: Unusable timestamp - sentinel passed downstream, writes proceed
    // =========================================================================
    #[tokio::test]
    async fn test_invalid_timestamp_passes_through() {
        let (ingestor, analytics, documents) = setup();
        let body = json!({"event": {"id": "evt_4", "event_timestamp_ms": "yesterday"}});

        ingestor
            .handle_delivery(Some(SECRET), &serde_json::to_vec(&body).unwrap())
            .await
            .unwrap();

        assert_eq!(analytics.rows()[0].row.timestamp, INVALID_DATE);
        let doc = documents.get(EVENTS_COLLECTION, "evt_4").unwrap();
        assert_eq!(doc.fields["eventTimestamp"], json!(null));
    }

    // =========================================================================
    // ING-W01: Same id delivered twice - one document, one or two rows
    // =========================================================================
    #[tokio::test]
    async fn test_redelivery_merges_document_only() {
        let (ingestor, analytics, documents) = setup();

        ingestor.handle_delivery(Some(SECRET), &renewal_body()).await.unwrap();
        let first = documents.get(EVENTS_COLLECTION, "evt_1").unwrap();
        ingestor.handle_delivery(Some(SECRET), &renewal_body()).await.unwrap();
        let second = documents.get(EVENTS_COLLECTION, "evt_1").unwrap();

        assert_eq!(documents.count(EVENTS_COLLECTION), 1, "document count must be exactly one");
        let row_count = analytics.rows().len();
        assert!((1..=2).contains(&row_count), "analytics rows: {}", row_count);
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at >= first.updated_at);
    }

    // =========================================================================
    // ING-W02: Analytics fails, documents succeed - error, document persisted
    // =========================================================================
    #[tokio::test]
    async fn test_analytics_failure_keeps_document() {
        let analytics = Arc::new(InMemoryAnalytics::failing("table unavailable"));
        let documents = Arc::new(InMemoryDocuments::new());
        let ingestor = WebhookIngestor::new(SECRET, analytics.clone(), documents.clone());

        let result = ingestor.handle_delivery(Some(SECRET), &renewal_body()).await;

        match result {
            Err(RevenueError::DualWrite { analytics: a, documents: d }) => {
                assert_eq!(a.as_deref(), Some("table unavailable"));
                assert!(d.is_none());
            }
            other => panic!("expected dual write failure, got {:?}", other),
        }
        assert_eq!(analytics.call_count(), 1);
        assert!(documents.get(EVENTS_COLLECTION, "evt_1").is_some());
    }

    // =========================================================================
    // ING-W03: Documents fail, analytics succeed - error, row persisted
    // =========================================================================
    #[tokio::test]
    async fn test_document_failure_keeps_row() {
        let analytics = Arc::new(InMemoryAnalytics::new());
        let documents = Arc::new(InMemoryDocuments::failing("deadline exceeded"));
        let ingestor = WebhookIngestor::new(SECRET, analytics.clone(), documents.clone());

        let result = ingestor.handle_delivery(Some(SECRET), &renewal_body()).await;

        assert!(matches!(
            result,
            Err(RevenueError::DualWrite { analytics: None, documents: Some(_) })
        ));
        assert_eq!(analytics.rows().len(), 1);
        assert_eq!(documents.call_count(), 1);
    }

    // =========================================================================
    // ING-W04: Missing event id - document write fails, row still appended
    // =========================================================================
    #[tokio::test]
    async fn test_missing_id_fails_document_side() {
        let (ingestor, analytics, documents) = setup();
        let body = json!({"event": {"type": "TEST", "event_timestamp_ms": 1700000000000i64}});

        let result = ingestor
            .handle_delivery(Some(SECRET), &serde_json::to_vec(&body).unwrap())
            .await;

        assert!(matches!(result, Err(RevenueError::DualWrite { .. })));
        assert_eq!(analytics.rows().len(), 1);
        assert_eq!(documents.count(EVENTS_COLLECTION), 0);
    }

    /// Sink that only completes once its sibling write is in flight too
    struct RendezvousSink {
        barrier: Arc<Barrier>,
    }

    #[async_trait]
    impl AnalyticsSink for RendezvousSink {
        async fn insert_row(&self, _: &str, _: &str, _: &AnalyticsRow) -> RevenueResult<()> {
            self.barrier.wait().await;
            Ok(())
        }
    }

    #[async_trait]
    impl DocumentSink for RendezvousSink {
        async fn merge_document(&self, _: &str, _: &EventDocument) -> RevenueResult<()> {
            self.barrier.wait().await;
            Err(RevenueError::Upstream {
                status: 409,
                message: "aborted".into(),
            })
        }
    }

    // =========================================================================
    // ING-W05: Writes run concurrently and both are awaited
    // =========================================================================
    #[tokio::test]
    async fn test_writes_are_issued_concurrently() {
        let barrier = Arc::new(Barrier::new(2));
        let sink = Arc::new(RendezvousSink { barrier });
        let ingestor = WebhookIngestor::new(SECRET, sink.clone(), sink);

        // Sequential writes would deadlock on the barrier
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            ingestor.handle_delivery(Some(SECRET), &renewal_body()),
        )
        .await
        .expect("writes must not be serialized");

        assert!(matches!(
            result,
            Err(RevenueError::DualWrite { analytics: None, documents: Some(_) })
        ));
    }

    /// Collects everything the fmt subscriber writes
    #[derive(Clone, Default)]
    struct LogCapture(Arc<std::sync::Mutex<Vec<u8>>>);

    impl std::io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl LogCapture {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    /// Route this thread's events into a buffer until the guard drops
    fn capture_logs() -> (LogCapture, tracing::subscriber::DefaultGuard) {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        (capture, tracing::subscriber::set_default(subscriber))
    }

    // =========================================================================
    // ING-L01: Unparseable body - error logged before the failure is returned
    // =========================================================================
    #[tokio::test]
    async fn test_malformed_body_is_logged_as_error() {
        let (logs, _guard) = capture_logs();
        let (ingestor, _, _) = setup();

        let result = ingestor.handle_delivery(Some(SECRET), b"{\"event\":").await;

        assert!(matches!(result, Err(RevenueError::MalformedPayload(_))));
        let output = logs.contents();
        assert!(output.contains("ERROR"), "no error line in: {}", output);
        assert!(output.contains("Error processing webhook"));
        assert!(output.contains("Malformed webhook payload"));
    }

    // =========================================================================
    // ING-L02: One store fails - the failing sink and its error are logged
    // =========================================================================
    #[tokio::test]
    async fn test_partial_failure_is_logged_as_error() {
        let (logs, _guard) = capture_logs();
        let analytics = Arc::new(InMemoryAnalytics::failing("quota exceeded"));
        let documents = Arc::new(InMemoryDocuments::new());
        let ingestor = WebhookIngestor::new(SECRET, analytics, documents);

        let result = ingestor.handle_delivery(Some(SECRET), &renewal_body()).await;

        assert!(matches!(result, Err(RevenueError::DualWrite { .. })));
        let output = logs.contents();
        assert!(output.contains("ERROR"), "no error line in: {}", output);
        assert!(output.contains("Error processing webhook"));
        assert!(output.contains("bigquery"));
        assert!(output.contains("quota exceeded"));
    }

    // =========================================================================
    // ING-L03: Empty body is the caller's fault - no error line
    // =========================================================================
    #[tokio::test]
    async fn test_missing_event_is_not_logged_as_error() {
        let (logs, _guard) = capture_logs();
        let (ingestor, _, _) = setup();

        let result = ingestor.handle_delivery(Some(SECRET), b"{}").await;

        assert!(matches!(result, Err(RevenueError::NoEventData)));
        assert!(!logs.contents().contains("ERROR"));
    }
}
