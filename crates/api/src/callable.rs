//! HTTPS callable function protocol
//!
//! Requests are `POST {"data": ...}`. Successful calls answer
//! `{"result": ...}`; failures answer
//! `{"error": {"status": "...", "message": "..."}}` with a matching HTTP status.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use serde_json::{json, Value};

/// Error kinds a callable handler can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallableErrorKind {
    Unauthenticated,
    InvalidArgument,
    Internal,
}

impl CallableErrorKind {
    pub fn status(&self) -> &'static str {
        match self {
            Self::Unauthenticated => "UNAUTHENTICATED",
            Self::InvalidArgument => "INVALID_ARGUMENT",
            Self::Internal => "INTERNAL",
        }
    }

    pub fn http_status(&self) -> StatusCode {
        match self {
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::InvalidArgument => StatusCode::BAD_REQUEST,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

/// An error returned to the calling client
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{message}")]
pub struct CallableError {
    pub kind: CallableErrorKind,
    pub message: String,
}

impl CallableError {
    pub fn new(kind: CallableErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(CallableErrorKind::Unauthenticated, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(CallableErrorKind::InvalidArgument, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(CallableErrorKind::Internal, message)
    }
}

impl IntoResponse for CallableError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": {
                "status": self.kind.status(),
                "message": self.message,
            }
        }));

        (self.kind.http_status(), body).into_response()
    }
}

/// Successful callable result, rendered as `{"result": ...}`
#[derive(Debug)]
pub struct Callable<T>(pub T);

impl<T: Serialize> IntoResponse for Callable<T> {
    fn into_response(self) -> Response {
        Json(json!({ "result": self.0 })).into_response()
    }
}

pub type CallableResult<T> = Result<Callable<T>, CallableError>;

/// The `data` member of a callable request
///
/// Any body that is not a JSON object carrying `data` is rejected with
/// `INVALID_ARGUMENT "Bad Request"`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallableData(pub Value);

impl CallableData {
    /// Look up a field of the data object
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.0.get(name)
    }
}

impl<S> FromRequest<S> for CallableData
where
    S: Send + Sync,
{
    type Rejection = CallableError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let body = Bytes::from_request(req, state)
            .await
            .map_err(|_| CallableError::invalid_argument("Bad Request"))?;

        parse_envelope(&body)
    }
}

fn parse_envelope(body: &[u8]) -> Result<CallableData, CallableError> {
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(mut envelope)) => match envelope.remove("data") {
            Some(data) => Ok(CallableData(data)),
            None => Err(CallableError::invalid_argument("Bad Request")),
        },
        _ => Err(CallableError::invalid_argument("Bad Request")),
    }
}
