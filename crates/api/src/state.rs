//! Application state

use std::sync::Arc;

use meridian_revenue::RevenueService;
use reqwest::Client;

use crate::{
    auth::{AuthState, IdTokenVerifier},
    config::Config,
    elevenlabs::ElevenLabsClient,
};

/// Shared application state, built once at startup
#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub revenue: Arc<RevenueService>,
    pub elevenlabs: ElevenLabsClient,
    pub id_tokens: IdTokenVerifier,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        // One HTTP client for Google, ElevenLabs and key fetches
        let http_client = Client::new();

        let revenue = RevenueService::new(
            http_client.clone(),
            config.revenuecat_webhook_secret.clone(),
            config.storage_backend,
            config.google.clone(),
            config.bigquery_location.clone(),
        );
        tracing::info!(
            backend = ?config.storage_backend,
            project = %config.google.project_id,
            location = %config.bigquery_location,
            "Revenue service initialized"
        );

        let elevenlabs = ElevenLabsClient::new(
            http_client.clone(),
            config.elevenlabs_api_base.clone(),
            config.elevenlabs_api_key.clone(),
        );
        tracing::info!("ElevenLabs client initialized via {}", config.elevenlabs_api_base);

        let id_tokens = match &config.caller_token_secret {
            Some(secret) => {
                tracing::warn!("Caller tokens verified with CALLER_TOKEN_SECRET (HS256), not Firebase keys");
                IdTokenVerifier::with_secret(config.firebase_project_id.clone(), secret)
            }
            None => {
                tracing::info!(
                    project = %config.firebase_project_id,
                    "Firebase ID token verification enabled"
                );
                IdTokenVerifier::firebase(http_client, config.firebase_project_id.clone())
            }
        };

        Self::with_services(config, revenue, elevenlabs, id_tokens)
    }

    /// Assemble state from prebuilt services
    pub fn with_services(
        config: Config,
        revenue: RevenueService,
        elevenlabs: ElevenLabsClient,
        id_tokens: IdTokenVerifier,
    ) -> Self {
        Self {
            config,
            revenue: Arc::new(revenue),
            elevenlabs,
            id_tokens,
        }
    }

    /// Get auth state for middleware
    pub fn auth_state(&self) -> AuthState {
        AuthState {
            verifier: self.id_tokens.clone(),
        }
    }
}
