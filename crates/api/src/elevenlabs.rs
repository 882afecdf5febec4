//! ElevenLabs Conversational AI client

use reqwest::Client;
use serde::Deserialize;

#[derive(Debug, thiserror::Error)]
pub enum ElevenLabsError {
    #[error("Request to ElevenLabs failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("ElevenLabs returned {status}: {body}")]
    Upstream { status: u16, body: String },
    #[error("Unexpected ElevenLabs response: {0}")]
    MalformedResponse(String),
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: Option<String>,
}

/// Fetches signed conversation URLs so the API key never reaches the client app
#[derive(Clone)]
pub struct ElevenLabsClient {
    http: Client,
    api_base: String,
    api_key: String,
}

impl ElevenLabsClient {
    pub fn new(http: Client, api_base: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            http,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key: api_key.into(),
        }
    }

    /// Get a short-lived signed WebSocket URL for a conversation with `agent_id`
    pub async fn get_signed_url(&self, agent_id: &str) -> Result<String, ElevenLabsError> {
        let url = format!("{}/v1/convai/conversation/get_signed_url", self.api_base);

        let response = self
            .http
            .get(&url)
            .query(&[("agent_id", agent_id)])
            .header("xi-api-key", &self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ElevenLabsError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.text().await?;
        let parsed: SignedUrlResponse = serde_json::from_str(&body)
            .map_err(|e| ElevenLabsError::MalformedResponse(e.to_string()))?;

        match parsed.signed_url {
            Some(url) if !url.is_empty() => Ok(url),
            _ => Err(ElevenLabsError::MalformedResponse(format!(
                "missing signed_url in {}",
                body
            ))),
        }
    }
}
