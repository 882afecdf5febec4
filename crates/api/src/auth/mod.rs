//! Caller authentication for callable endpoints

pub mod id_token;
pub mod middleware;

pub use id_token::{IdTokenVerifier, FIREBASE_JWKS_URL};
pub use middleware::{optional_auth, require_auth, AuthError, AuthState, AuthUser};
