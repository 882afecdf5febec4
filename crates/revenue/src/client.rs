//! Google API client configuration and access tokens

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tokio::sync::RwLock;

use crate::error::{RevenueError, RevenueResult};

pub const DEFAULT_PROJECT_ID: &str = "dime-meridian";
pub const DEFAULT_BIGQUERY_API_BASE: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_FIRESTORE_API_BASE: &str = "https://firestore.googleapis.com/v1";
pub const DEFAULT_FIRESTORE_DATABASE: &str = "(default)";

const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";

/// Refresh metadata tokens this long before they actually expire
const TOKEN_EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Where bearer tokens for Google APIs come from
#[derive(Clone, PartialEq)]
pub enum TokenSource {
    /// Fixed token, typically from `gcloud auth print-access-token`
    Static(String),
    /// Service account token from the GCE / Cloud Run metadata server
    MetadataServer { url: String },
    /// Emulators accept any bearer; they conventionally get `owner`
    Anonymous,
}

impl fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TokenSource::Static(_) => f.debug_tuple("Static").field(&"<redacted>").finish(),
            TokenSource::MetadataServer { url } => f
                .debug_struct("MetadataServer")
                .field("url", url)
                .finish(),
            TokenSource::Anonymous => f.write_str("Anonymous"),
        }
    }
}

/// Google project and endpoint configuration
#[derive(Debug, Clone)]
pub struct GoogleConfig {
    pub project_id: String,
    pub bigquery_api_base: String,
    pub firestore_api_base: String,
    pub firestore_database: String,
    pub token_source: TokenSource,
}

impl GoogleConfig {
    /// Load from environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let project_id = var("GOOGLE_CLOUD_PROJECT").unwrap_or_else(|| DEFAULT_PROJECT_ID.into());
        let emulator_host = var("FIRESTORE_EMULATOR_HOST");

        let firestore_api_base = match (&emulator_host, var("FIRESTORE_API_BASE")) {
            (_, Some(base)) => base,
            (Some(host), None) => format!("http://{}/v1", host),
            (None, None) => DEFAULT_FIRESTORE_API_BASE.to_string(),
        };

        let token_source = if let Some(token) = var("GOOGLE_ACCESS_TOKEN") {
            TokenSource::Static(token)
        } else if emulator_host.is_some() {
            TokenSource::Anonymous
        } else {
            TokenSource::MetadataServer {
                url: var("GCE_METADATA_TOKEN_URL").unwrap_or_else(|| METADATA_TOKEN_URL.into()),
            }
        };

        Self {
            project_id,
            bigquery_api_base: var("BIGQUERY_API_BASE")
                .unwrap_or_else(|| DEFAULT_BIGQUERY_API_BASE.into()),
            firestore_api_base,
            firestore_database: var("FIRESTORE_DATABASE")
                .unwrap_or_else(|| DEFAULT_FIRESTORE_DATABASE.into()),
            token_source,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct MetadataTokenResponse {
    access_token: String,
    expires_in: u64,
}

/// Shared HTTP client plus bearer-token acquisition for Google APIs
///
/// Cheap to clone; clones share the token cache.
#[derive(Clone)]
pub struct GoogleClient {
    http: Client,
    config: Arc<GoogleConfig>,
    token_cache: Arc<RwLock<Option<CachedToken>>>,
}

impl GoogleClient {
    pub fn new(http: Client, config: GoogleConfig) -> Self {
        Self {
            http,
            config: Arc::new(config),
            token_cache: Arc::new(RwLock::new(None)),
        }
    }

    pub fn config(&self) -> &GoogleConfig {
        &self.config
    }

    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Attach `Authorization: Bearer ...` to a request
    pub async fn authorize(&self, request: RequestBuilder) -> RevenueResult<RequestBuilder> {
        let token = self.access_token().await?;
        Ok(request.bearer_auth(token))
    }

    pub async fn access_token(&self) -> RevenueResult<String> {
        match &self.config.token_source {
            TokenSource::Static(token) => Ok(token.clone()),
            TokenSource::Anonymous => Ok("owner".to_string()),
            TokenSource::MetadataServer { url } => self.metadata_token(url).await,
        }
    }

    async fn metadata_token(&self, url: &str) -> RevenueResult<String> {
        {
            let cache = self.token_cache.read().await;
            if let Some(cached) = cache.as_ref() {
                if Instant::now() < cached.expires_at {
                    return Ok(cached.token.clone());
                }
            }
        }

        let mut cache = self.token_cache.write().await;
        // Another request may have refreshed while we waited for the lock
        if let Some(cached) = cache.as_ref() {
            if Instant::now() < cached.expires_at {
                return Ok(cached.token.clone());
            }
        }

        let response = self
            .http
            .get(url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, body = %body, "Metadata server refused token request");
            return Err(RevenueError::Credentials(format!(
                "metadata server returned {}",
                status
            )));
        }

        let parsed: MetadataTokenResponse = response
            .json()
            .await
            .map_err(|e| RevenueError::Credentials(e.to_string()))?;

        let lifetime = Duration::from_secs(parsed.expires_in).saturating_sub(TOKEN_EXPIRY_MARGIN);
        *cache = Some(CachedToken {
            token: parsed.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        tracing::debug!(
            expires_in = parsed.expires_in,
            "Refreshed Google access token from metadata server"
        );

        Ok(parsed.access_token)
    }
}

/// Body shape of a Google API error response
#[derive(Debug, Deserialize)]
struct GoogleErrorBody {
    error: GoogleErrorDetail,
}

#[derive(Debug, Deserialize)]
struct GoogleErrorDetail {
    message: String,
}

/// Turn a non-2xx Google API response into [`RevenueError::Upstream`]
///
/// Uses the API's `error.message` when present, otherwise the raw body.
pub(crate) async fn upstream_error(response: reqwest::Response) -> RevenueError {
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    let message = match serde_json::from_str::<GoogleErrorBody>(&body) {
        Ok(parsed) => parsed.error.message,
        Err(_) if body.is_empty() => format!("HTTP {}", status),
        Err(_) => body,
    };
    RevenueError::Upstream { status, message }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_use_metadata_server() {
        let config = GoogleConfig::from_lookup(lookup(&[]));
        assert_eq!(config.project_id, DEFAULT_PROJECT_ID);
        assert_eq!(config.bigquery_api_base, DEFAULT_BIGQUERY_API_BASE);
        assert_eq!(config.firestore_api_base, DEFAULT_FIRESTORE_API_BASE);
        assert_eq!(config.firestore_database, "(default)");
        assert!(matches!(
            config.token_source,
            TokenSource::MetadataServer { .. }
        ));
    }

    #[test]
    fn test_emulator_host_switches_to_anonymous() {
        let config = GoogleConfig::from_lookup(lookup(&[("FIRESTORE_EMULATOR_HOST", "localhost:8085")]));
        assert_eq!(config.firestore_api_base, "http://localhost:8085/v1");
        assert_eq!(config.token_source, TokenSource::Anonymous);
    }

    #[test]
    fn test_static_token_wins() {
        let config = GoogleConfig::from_lookup(lookup(&[
            ("FIRESTORE_EMULATOR_HOST", "localhost:8085"),
            ("GOOGLE_ACCESS_TOKEN", "ya29.token"),
        ]));
        assert_eq!(config.token_source, TokenSource::Static("ya29.token".into()));
    }

    #[test]
    fn test_static_token_is_redacted_in_debug() {
        let config = GoogleConfig::from_lookup(lookup(&[("GOOGLE_ACCESS_TOKEN", "ya29.secret")]));
        let debug = format!("{:?}", config);
        assert!(!debug.contains("ya29.secret"));
        assert!(debug.contains("Static(\"<redacted>\")"));
    }

    #[tokio::test]
    async fn test_metadata_token_is_cached() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/token")
            .match_header("Metadata-Flavor", "Google")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"access_token":"ya29.abc","expires_in":3599,"token_type":"Bearer"}"#)
            .expect(1)
            .create_async()
            .await;

        let mut config = GoogleConfig::from_lookup(lookup(&[]));
        config.token_source = TokenSource::MetadataServer {
            url: format!("{}/token", server.url()),
        };
        let client = GoogleClient::new(Client::new(), config);

        assert_eq!(client.access_token().await.unwrap(), "ya29.abc");
        assert_eq!(client.access_token().await.unwrap(), "ya29.abc");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_metadata_failure_is_credentials_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/token")
            .with_status(404)
            .create_async()
            .await;

        let mut config = GoogleConfig::from_lookup(lookup(&[]));
        config.token_source = TokenSource::MetadataServer {
            url: format!("{}/token", server.url()),
        };
        let client = GoogleClient::new(Client::new(), config);

        assert!(matches!(
            client.access_token().await,
            Err(RevenueError::Credentials(_))
        ));
    }
}
