//! HTTP routes

pub mod agent_session;
pub mod dynamic_query;
pub mod revenuecat;


use axum::{
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};

use crate::{
    auth::{optional_auth, require_auth},
    state::AppState,
};

/// Create the main router
pub fn create_router(state: AppState) -> Router {
    let auth_state = state.auth_state();

    // AI sessions need a signed-in caller
    let agent_routes = Router::new()
        .route("/getAgentSignedUrl", post(agent_session::get_agent_signed_url))
        .route(
            "/getAgentSignedUrlSubscriptionAgent",
            post(agent_session::get_subscription_agent_signed_url),
        )
        .route_layer(middleware::from_fn_with_state(
            auth_state.clone(),
            require_auth,
        ));

    let query_routes = Router::new()
        .route("/runDynamicBigQuery", post(dynamic_query::run_dynamic_bigquery))
        .route_layer(middleware::from_fn_with_state(auth_state, optional_auth));

    Router::new()
        .route("/health", get(health))
        .route("/revenueCatWebhook", post(revenuecat::revenuecat_webhook))
        .merge(agent_routes)
        .merge(query_routes)
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}
