//! RevenueCat webhook endpoint

use axum::{
    body::Bytes,
    extract::State,
    http::{header::AUTHORIZATION, HeaderMap},
};
use tracing::Instrument;
use uuid::Uuid;

use crate::{error::ApiResult, state::AppState};

/// POST /revenueCatWebhook
///
/// Answers in plain text: 200, 401 `Unauthorized`, 400 `No event data`
/// or 500 `Internal Server Error`.
pub async fn revenuecat_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> ApiResult<&'static str> {
    let req_id = Uuid::new_v4();
    let span = tracing::info_span!("revenuecat_webhook", req_id = %req_id);

    async move {
        let authorization = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok());

        state
            .revenue
            .webhooks
            .handle_delivery(authorization, &body)
            .await?;

        tracing::info!("Webhook processed");
        Ok("Ingested into BigQuery and Firestore")
    }
    .instrument(span)
    .await
}
