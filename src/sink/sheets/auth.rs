//! Access tokens for the Sheets API
//!
//! A service-account key signs an RS256 assertion that is exchanged for a
//! short-lived bearer token (the OAuth JWT-bearer grant). Tokens are cached
//! and minted again shortly before they expire, or when the API rejects one.

use super::check;
use crate::sink::SinkError;
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_LIFETIME_SECS: i64 = 3600;
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);
/// Mint a new token this long before the current one expires
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// How the Sheets sink authenticates
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SheetsAuth {
    /// Pre-obtained bearer token, used until it stops working
    AccessToken(String),
    /// Service-account key file (the JSON downloaded from the cloud console)
    ServiceAccount(PathBuf),
}

#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountKey {
    client_email: String,
    private_key: String,
    #[serde(default = "default_token_uri")]
    token_uri: String,
}

fn default_token_uri() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

#[derive(Debug, Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

enum Credentials {
    Fixed(String),
    ServiceAccount {
        key: ServiceAccountKey,
        signing_key: EncodingKey,
    },
}

pub(super) struct TokenSource {
    credentials: Credentials,
    cached: Mutex<Option<CachedToken>>,
}

impl TokenSource {
    pub(super) fn new(auth: &SheetsAuth) -> Result<Self, SinkError> {
        let credentials = match auth {
            SheetsAuth::AccessToken(token) => Credentials::Fixed(token.clone()),
            SheetsAuth::ServiceAccount(path) => {
                let key = load_key(path)?;
                let signing_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
                    .map_err(|e| {
                        SinkError::Auth(format!("Invalid private key in {}: {e}", path.display()))
                    })?;
                tracing::info!(client_email = %key.client_email, "Using Sheets service account");
                Credentials::ServiceAccount { key, signing_key }
            }
        };
        Ok(Self {
            credentials,
            cached: Mutex::new(None),
        })
    }

    /// Whether a rejected token can be replaced by a fresh one
    pub(super) fn can_refresh(&self) -> bool {
        matches!(self.credentials, Credentials::ServiceAccount { .. })
    }

    /// Current bearer token, minting one when none is cached or it is about
    /// to expire
    pub(super) async fn token(&self, http: &reqwest::Client) -> Result<String, SinkError> {
        let (key, signing_key) = match &self.credentials {
            Credentials::Fixed(token) => return Ok(token.clone()),
            Credentials::ServiceAccount { key, signing_key } => (key, signing_key),
        };

        let mut cached = self.cached.lock().await;
        if let Some(token) = cached
            .as_ref()
            .filter(|t| t.expires_at > Instant::now() + EXPIRY_MARGIN)
        {
            return Ok(token.value.clone());
        }

        let fresh = mint(http, key, signing_key).await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    /// Forget the cached token after the API rejected it
    pub(super) async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

fn load_key(path: &Path) -> Result<ServiceAccountKey, SinkError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| SinkError::Auth(format!("Cannot read {}: {e}", path.display())))?;
    serde_json::from_str(&raw)
        .map_err(|e| SinkError::Auth(format!("Malformed service account key {}: {e}", path.display())))
}

async fn mint(
    http: &reqwest::Client,
    key: &ServiceAccountKey,
    signing_key: &EncodingKey,
) -> Result<CachedToken, SinkError> {
    let iat = chrono::Utc::now().timestamp();
    let claims = AssertionClaims {
        iss: &key.client_email,
        scope: SHEETS_SCOPE,
        aud: &key.token_uri,
        iat,
        exp: iat + ASSERTION_LIFETIME_SECS,
    };
    let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, signing_key)
        .map_err(|e| SinkError::Auth(format!("Failed to sign token request: {e}")))?;

    let response = http
        .post(&key.token_uri)
        .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
        .send()
        .await?;
    let token: TokenResponse = check(response).await?.json().await?;

    let lifetime = token
        .expires_in
        .map_or(DEFAULT_TOKEN_LIFETIME, Duration::from_secs);
    tracing::debug!(expires_in_secs = lifetime.as_secs(), "Minted Sheets access token");
    Ok(CachedToken {
        value: token.access_token,
        expires_at: Instant::now() + lifetime,
    })
}

#[cfg(test)]
pub(super) mod testing {
    use serde_json::json;
    use std::path::{Path, PathBuf};

    pub const PRIVATE_KEY: &str = include_str!("testdata/service_account_key.pem");
    pub const PUBLIC_KEY: &str = include_str!("testdata/service_account_key.pub.pem");
    pub const CLIENT_EMAIL: &str = "mentor-log@example.iam.gserviceaccount.com";

    /// Write a service-account key file whose token endpoint is `token_uri`
    pub fn write_key(dir: &Path, token_uri: &str) -> PathBuf {
        let path = dir.join("service-account.json");
        let key = json!({
            "type": "service_account",
            "client_email": CLIENT_EMAIL,
            "private_key": PRIVATE_KEY,
            "token_uri": token_uri,
        });
        std::fs::write(&path, key.to_string()).unwrap();
        path
    }
}
