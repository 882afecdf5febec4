//! Server configuration

use meridian_revenue::{GoogleConfig, StorageBackend, DEFAULT_QUERY_LOCATION};

pub const DEFAULT_ELEVENLABS_API_BASE: &str = "https://api.elevenlabs.io";
pub const DEFAULT_AGENT_ID: &str = "agent_3901kdqcb4v7fkaaawjhtwqkt84v";
pub const DEFAULT_SUBSCRIPTION_AGENT_ID: &str = "agent_4001kd4s66yqeajamancdw77zsh6";

const DEFAULT_PORT: &str = "8080";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),
    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Everything the server reads from its environment, resolved once at startup
#[derive(Clone)]
pub struct Config {
    pub bind_address: String,
    /// Comma-separated origins, or `*`
    pub allowed_origins: String,
    pub revenuecat_webhook_secret: String,
    pub elevenlabs_api_key: String,
    pub elevenlabs_api_base: String,
    pub agent_id: String,
    pub subscription_agent_id: String,
    pub bigquery_location: String,
    pub storage_backend: StorageBackend,
    pub firebase_project_id: String,
    /// When set, caller ID tokens are HS256-signed with this secret instead of Firebase keys
    pub caller_token_secret: Option<String>,
    pub google: GoogleConfig,
}

// Secrets stay out of Debug output
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("allowed_origins", &self.allowed_origins)
            .field("elevenlabs_api_base", &self.elevenlabs_api_base)
            .field("agent_id", &self.agent_id)
            .field("subscription_agent_id", &self.subscription_agent_id)
            .field("bigquery_location", &self.bigquery_location)
            .field("storage_backend", &self.storage_backend)
            .field("firebase_project_id", &self.firebase_project_id)
            .field("caller_token_secret", &self.caller_token_secret.is_some())
            .field("google", &self.google)
            .finish_non_exhaustive()
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let required = |name: &'static str| var(name).ok_or(ConfigError::Missing(name));

        let google = GoogleConfig::from_lookup(&lookup);

        let storage_backend = match var("STORAGE_BACKEND") {
            Some(raw) => raw.parse().map_err(|e: meridian_revenue::RevenueError| {
                ConfigError::Invalid {
                    name: "STORAGE_BACKEND",
                    reason: e.to_string(),
                }
            })?,
            None => StorageBackend::default(),
        };

        let bind_address = var("BIND_ADDRESS").unwrap_or_else(|| {
            format!("0.0.0.0:{}", var("PORT").unwrap_or_else(|| DEFAULT_PORT.into()))
        });

        Ok(Self {
            bind_address,
            allowed_origins: var("ALLOWED_ORIGINS").unwrap_or_else(|| "*".into()),
            revenuecat_webhook_secret: required("REVENUECAT_WEBHOOK_SECRET")?,
            elevenlabs_api_key: required("ELEVENLABS_API_KEY")?,
            elevenlabs_api_base: var("ELEVENLABS_API_BASE")
                .unwrap_or_else(|| DEFAULT_ELEVENLABS_API_BASE.into()),
            agent_id: var("ELEVENLABS_AGENT_ID").unwrap_or_else(|| DEFAULT_AGENT_ID.into()),
            subscription_agent_id: var("ELEVENLABS_SUBSCRIPTION_AGENT_ID")
                .unwrap_or_else(|| DEFAULT_SUBSCRIPTION_AGENT_ID.into()),
            bigquery_location: var("BIGQUERY_LOCATION")
                .unwrap_or_else(|| DEFAULT_QUERY_LOCATION.into()),
            storage_backend,
            firebase_project_id: var("FIREBASE_PROJECT_ID")
                .unwrap_or_else(|| google.project_id.clone()),
            caller_token_secret: var("CALLER_TOKEN_SECRET"),
            google,
        })
    }
}
