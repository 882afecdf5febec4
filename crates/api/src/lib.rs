// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Dime Meridian API Library
//!
//! HTTP surface for the revenue backend: the RevenueCat webhook, the AI
//! agent session callables and the dynamic BigQuery callable.

pub mod auth;
pub mod callable;
pub mod config;
pub mod elevenlabs;
pub mod error;
pub mod routes;
pub mod state;

pub use callable::{Callable, CallableData, CallableError, CallableResult};
pub use config::{Config, ConfigError};
pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
