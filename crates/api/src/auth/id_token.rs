//! Firebase ID token verification

use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::{
    decode, decode_header, jwk::JwkSet, Algorithm, DecodingKey, Validation,
};
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::RwLock;

use super::middleware::{AuthError, AuthUser};

/// Public keys for tokens minted by Firebase Auth
pub const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Google rotates these keys every few hours; an hour is well inside that
const JWKS_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Unknown `kid`s trigger a refetch at most this often
const JWKS_MIN_REFRESH: Duration = Duration::from_secs(60);

/// Clock skew tolerated on `exp` / `iat` / `nbf`
const LEEWAY_SECS: u64 = 60;

#[derive(Debug, Deserialize)]
struct FirebaseClaims {
    sub: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Clone)]
struct CachedJwks {
    keys: JwkSet,
    fetched_at: Instant,
}

enum KeySource {
    Jwks {
        http: Client,
        url: String,
        cache: RwLock<Option<CachedJwks>>,
    },
    SharedSecret(DecodingKey),
}

/// Verifies caller ID tokens against Firebase signing keys or a shared HS256 secret
#[derive(Clone)]
pub struct IdTokenVerifier {
    project_id: String,
    keys: Arc<KeySource>,
}

impl IdTokenVerifier {
    /// Verify RS256 tokens issued by Firebase Auth for `project_id`
    pub fn firebase(http: Client, project_id: impl Into<String>) -> Self {
        Self::with_jwks_url(http, project_id, FIREBASE_JWKS_URL)
    }

    pub fn with_jwks_url(
        http: Client,
        project_id: impl Into<String>,
        url: impl Into<String>,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            keys: Arc::new(KeySource::Jwks {
                http,
                url: url.into(),
                cache: RwLock::new(None),
            }),
        }
    }

    /// Verify HS256 tokens signed with `secret`, for local runs and tests
    pub fn with_secret(project_id: impl Into<String>, secret: &str) -> Self {
        Self {
            project_id: project_id.into(),
            keys: Arc::new(KeySource::SharedSecret(DecodingKey::from_secret(
                secret.as_bytes(),
            ))),
        }
    }

    pub fn issuer(&self) -> String {
        format!("https://securetoken.google.com/{}", self.project_id)
    }

    fn validation(&self, algorithm: Algorithm) -> Validation {
        let mut validation = Validation::new(algorithm);
        validation.set_issuer(&[self.issuer()]);
        validation.set_audience(&[&self.project_id]);
        validation.set_required_spec_claims(&["exp", "iss", "aud", "sub"]);
        validation.leeway = LEEWAY_SECS;
        validation
    }

    /// Verify a token and return the caller it identifies
    pub async fn verify(&self, token: &str) -> Result<AuthUser, AuthError> {
        let header = decode_header(token).map_err(|e| {
            tracing::debug!(error = %e, "Malformed ID token header");
            AuthError::InvalidToken
        })?;

        let (key, algorithm) = match self.keys.as_ref() {
            KeySource::SharedSecret(key) => (key.clone(), Algorithm::HS256),
            KeySource::Jwks { http, url, cache } => {
                if header.alg != Algorithm::RS256 {
                    tracing::debug!(alg = ?header.alg, "ID token not signed with RS256");
                    return Err(AuthError::InvalidToken);
                }
                let kid = header.kid.as_deref().ok_or(AuthError::InvalidToken)?;
                (signing_key(http, url, cache, kid).await?, Algorithm::RS256)
            }
        };

        let data = decode::<FirebaseClaims>(token, &key, &self.validation(algorithm)).map_err(
            |e| {
                tracing::debug!(error = %e, "ID token rejected");
                AuthError::InvalidToken
            },
        )?;

        if data.claims.sub.is_empty() {
            return Err(AuthError::InvalidToken);
        }

        Ok(AuthUser {
            uid: data.claims.sub,
            email: data.claims.email,
        })
    }
}

async fn signing_key(
    http: &Client,
    url: &str,
    cache: &RwLock<Option<CachedJwks>>,
    kid: &str,
) -> Result<DecodingKey, AuthError> {
    // Fast path: fresh cache containing the key
    {
        let cached = cache.read().await;
        if let Some(cached) = cached.as_ref() {
            let fresh = cached.fetched_at.elapsed() < JWKS_CACHE_TTL;
            match cached.keys.find(kid) {
                Some(jwk) if fresh => return DecodingKey::from_jwk(jwk).map_err(key_error),
                None if fresh && cached.fetched_at.elapsed() < JWKS_MIN_REFRESH => {
                    return Err(AuthError::InvalidToken);
                }
                _ => {}
            }
        }
    }

    let keys = fetch_jwks(http, url).await?;
    let jwk = keys.find(kid).cloned();
    *cache.write().await = Some(CachedJwks {
        keys,
        fetched_at: Instant::now(),
    });

    match jwk {
        Some(jwk) => DecodingKey::from_jwk(&jwk).map_err(key_error),
        None => {
            tracing::debug!(kid = %kid, "ID token signed with unknown key");
            Err(AuthError::InvalidToken)
        }
    }
}

async fn fetch_jwks(http: &Client, url: &str) -> Result<JwkSet, AuthError> {
    tracing::debug!(url = %url, "Fetching ID token signing keys");

    let response = http
        .get(url)
        .send()
        .await
        .map_err(|e| AuthError::KeyFetch(e.to_string()))?;

    if !response.status().is_success() {
        return Err(AuthError::KeyFetch(format!(
            "key endpoint returned {}",
            response.status()
        )));
    }

    response
        .json::<JwkSet>()
        .await
        .map_err(|e| AuthError::KeyFetch(e.to_string()))
}

fn key_error(err: jsonwebtoken::errors::Error) -> AuthError {
    AuthError::KeyFetch(format!("unusable signing key: {}", err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    const PROJECT: &str = "dime-meridian";
    const KID: &str = "test-key-1";
    const RSA_PEM: &str = include_str!("../../testdata/id_token_rsa.pem");
    const RSA_N: &str = "nTVwyYf0kFp7P8bSd8xBUvpFQ_47rDvBcOguS0qFxDJtZK3es8yaKizkKe7jIOJsXfaZnWsEBCIOuo2aVpRvNNLYmUioIcoNDq8wKzLCA6-XyA5pMQA-PI18jF3Bcl50AQfNYT8SOzFi14Bk8wK06FWG12OCd5p5kDr8wgOjEHfzgRIG1kj-lf1Vrsk9g6_kOur734folM53Hksw4aUUUzOAwHYUUKlb3dpG1tl7jAiA7Tb4FWPY8tp-NHBX9HkMk2_r_Ok3DOIJOHbnJ0Y0wbfjFDrCWBy9G7Xp9VMEWSzgHfhWyPTIbEL62jSrGeqrIG_vzIafeJ0tki2ZWVImiw";

    fn now() -> i64 {
        time::OffsetDateTime::now_utc().unix_timestamp()
    }

    fn claims(project: &str, sub: &str, exp_offset: i64) -> serde_json::Value {
        json!({
            "iss": format!("https://securetoken.google.com/{}", project),
            "aud": project,
            "sub": sub,
            "user_id": sub,
            "email": "ada@example.com",
            "iat": now() - 10,
            "exp": now() + exp_offset,
        })
    }

    fn rs256_token(kid: &str, claims: &serde_json::Value) -> String {
        let mut header = Header::new(Algorithm::RS256);
        header.kid = Some(kid.to_string());
        let key = EncodingKey::from_rsa_pem(RSA_PEM.as_bytes()).unwrap();
        encode(&header, claims, &key).unwrap()
    }

    fn jwks_body() -> String {
        json!({
            "keys": [{
                "kty": "RSA",
                "alg": "RS256",
                "use": "sig",
                "kid": KID,
                "n": RSA_N,
                "e": "AQAB"
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn test_rs256_token_verified_against_jwks() {
        let mut server = mockito::Server::new_async().await;
        let jwks = server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(jwks_body())
            .expect(1)
            .create_async()
            .await;

        let verifier =
            IdTokenVerifier::with_jwks_url(Client::new(), PROJECT, format!("{}/jwks", server.url()));
        let token = rs256_token(KID, &claims(PROJECT, "uid_123", 3600));

        let user = verifier.verify(&token).await.unwrap();
        assert_eq!(user.uid, "uid_123");
        assert_eq!(user.email.as_deref(), Some("ada@example.com"));

        // Second verification is served from the key cache
        verifier.verify(&token).await.unwrap();
        jwks.assert_async().await;
    }

    #[tokio::test]
    async fn test_rs256_token_for_other_project_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_body(jwks_body())
            .create_async()
            .await;

        let verifier =
            IdTokenVerifier::with_jwks_url(Client::new(), PROJECT, format!("{}/jwks", server.url()));
        let token = rs256_token(KID, &claims("someone-else", "uid_123", 3600));

        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_unknown_kid_rejected() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/jwks")
            .with_status(200)
            .with_body(jwks_body())
            .create_async()
            .await;

        let verifier =
            IdTokenVerifier::with_jwks_url(Client::new(), PROJECT, format!("{}/jwks", server.url()));
        let token = rs256_token("rotated-away", &claims(PROJECT, "uid_123", 3600));

        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_jwks_outage_is_key_fetch_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/jwks")
            .with_status(503)
            .create_async()
            .await;

        let verifier =
            IdTokenVerifier::with_jwks_url(Client::new(), PROJECT, format!("{}/jwks", server.url()));
        let token = rs256_token(KID, &claims(PROJECT, "uid_123", 3600));

        assert!(matches!(verifier.verify(&token).await, Err(AuthError::KeyFetch(_))));
    }

    #[tokio::test]
    async fn test_hs256_token_rejected_in_jwks_mode() {
        let verifier = IdTokenVerifier::with_jwks_url(Client::new(), PROJECT, "http://127.0.0.1:9/jwks");
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims(PROJECT, "uid_123", 3600),
            &EncodingKey::from_secret(b"guess"),
        )
        .unwrap();

        assert!(matches!(verifier.verify(&token).await, Err(AuthError::InvalidToken)));
    }

    #[tokio::test]
    async fn test_shared_secret_mode() {
        let verifier = IdTokenVerifier::with_secret(PROJECT, "local-secret");
        let sign = |claims: &serde_json::Value, secret: &[u8]| {
            encode(&Header::new(Algorithm::HS256), claims, &EncodingKey::from_secret(secret)).unwrap()
        };

        let good = sign(&claims(PROJECT, "uid_9", 3600), b"local-secret");
        assert_eq!(verifier.verify(&good).await.unwrap().uid, "uid_9");

        let wrong_secret = sign(&claims(PROJECT, "uid_9", 3600), b"other-secret");
        assert!(verifier.verify(&wrong_secret).await.is_err());

        let expired = sign(&claims(PROJECT, "uid_9", -3600), b"local-secret");
        assert!(verifier.verify(&expired).await.is_err());

        let empty_sub = sign(&claims(PROJECT, "", 3600), b"local-secret");
        assert!(verifier.verify(&empty_sub).await.is_err());

        assert!(verifier.verify("not.a.jwt").await.is_err());
    }
}
