//! SQL passthrough for the AI assistant

use axum::extract::State;
use meridian_revenue::QueryOutcome;
use serde_json::Value;

use crate::{
    callable::{Callable, CallableData, CallableError, CallableResult},
    state::AppState,
};

/// POST /runDynamicBigQuery
///
/// Query failures are a successful call carrying `{"error": ...}`.
pub async fn run_dynamic_bigquery(
    State(state): State<AppState>,
    data: CallableData,
) -> CallableResult<QueryOutcome> {
    let sql = match data.field("query") {
        Some(Value::String(sql)) if !sql.is_empty() => sql,
        _ => return Err(CallableError::invalid_argument("No SQL query provided")),
    };

    Ok(Callable(state.revenue.query.execute(sql).await))
}
