//! Caller authentication middleware for callable endpoints

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};

use super::id_token::IdTokenVerifier;
use crate::callable::CallableError;

/// Caller identity taken from a verified Firebase ID token
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    /// Firebase Auth uid (`sub` claim)
    pub uid: String,
    pub email: Option<String>,
}

/// State needed for authentication
#[derive(Clone)]
pub struct AuthState {
    pub verifier: IdTokenVerifier,
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authentication")]
    MissingAuth,
    #[error("Invalid authentication format")]
    InvalidAuthFormat,
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Could not load token signing keys: {0}")]
    KeyFetch(String),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let message = match self {
            AuthError::MissingAuth => "User must be logged in.",
            AuthError::InvalidAuthFormat => "Invalid authentication format",
            AuthError::InvalidToken | AuthError::KeyFetch(_) => "Unauthenticated",
        };

        CallableError::unauthenticated(message).into_response()
    }
}

/// Extract the bearer token, if any
///
/// An `Authorization` header that is present but not `Bearer <token>` is an error,
/// not an anonymous call.
fn extract_bearer_token(request: &Request) -> Result<Option<String>, AuthError> {
    let Some(header) = request.headers().get(AUTHORIZATION) else {
        return Ok(None);
    };

    let header = header.to_str().map_err(|_| AuthError::InvalidAuthFormat)?;
    match header.strip_prefix("Bearer ") {
        Some(token) if !token.trim().is_empty() => Ok(Some(token.trim().to_string())),
        _ => Err(AuthError::InvalidAuthFormat),
    }
}

async fn authenticate(
    auth_state: &AuthState,
    token: Result<Option<String>, AuthError>,
) -> Result<Option<AuthUser>, AuthError> {
    match token? {
        Some(token) => auth_state.verifier.verify(&token).await.map(Some),
        None => Ok(None),
    }
}

/// Middleware that requires a verified caller
pub async fn require_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let path = request.uri().path().to_string();

    let token = extract_bearer_token(&request);

    match authenticate(&auth_state, token).await {
        Ok(Some(auth_user)) => {
            tracing::debug!(path = %path, uid = %auth_user.uid, "require_auth: caller verified");
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Ok(None) => {
            tracing::warn!(path = %path, "require_auth: no caller identity");
            AuthError::MissingAuth.into_response()
        }
        Err(err) => {
            tracing::warn!(path = %path, error = %err, "require_auth: authentication failed");
            err.into_response()
        }
    }
}

/// Middleware that attaches the caller when one is present
///
/// Anonymous calls pass through; a token that fails verification is still rejected.
pub async fn optional_auth(
    State(auth_state): State<AuthState>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = extract_bearer_token(&request);

    match authenticate(&auth_state, token).await {
        Ok(Some(auth_user)) => {
            request.extensions_mut().insert(auth_user);
            next.run(request).await
        }
        Ok(None) => next.run(request).await,
        Err(err) => {
            tracing::warn!(path = %request.uri().path(), error = %err, "optional_auth: authentication failed");
            err.into_response()
        }
    }
}
