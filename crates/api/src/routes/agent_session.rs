//! Signed conversation URLs for the in-app AI agents

use axum::{extract::State, Extension};
use serde::Serialize;

use crate::{
    auth::AuthUser,
    callable::{Callable, CallableData, CallableError, CallableResult},
    state::AppState,
};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUrlResponse {
    pub signed_url: String,
}

/// POST /getAgentSignedUrl
pub async fn get_agent_signed_url(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    _data: CallableData,
) -> CallableResult<SignedUrlResponse> {
    signed_url_for(&state, &user, &state.config.agent_id).await
}

/// POST /getAgentSignedUrlSubscriptionAgent
pub async fn get_subscription_agent_signed_url(
    State(state): State<AppState>,
    Extension(user): Extension<AuthUser>,
    _data: CallableData,
) -> CallableResult<SignedUrlResponse> {
    signed_url_for(&state, &user, &state.config.subscription_agent_id).await
}

async fn signed_url_for(
    state: &AppState,
    user: &AuthUser,
    agent_id: &str,
) -> CallableResult<SignedUrlResponse> {
    match state.elevenlabs.get_signed_url(agent_id).await {
        Ok(signed_url) => {
            tracing::debug!(uid = %user.uid, agent_id = %agent_id, "Issued signed agent URL");
            Ok(Callable(SignedUrlResponse { signed_url }))
        }
        Err(e) => {
            tracing::error!(uid = %user.uid, agent_id = %agent_id, error = %e, "Error getting signed URL");
            Err(CallableError::internal("Failed to connect to AI agent."))
        }
    }
}
