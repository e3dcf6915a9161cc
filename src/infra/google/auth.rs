// =============================================================================
// GOOGLE API AUTHENTICATION
// =============================================================================
//
// Two ways to obtain a bearer token:
//
// 1. **Service account** (recommended for deployments):
//    - Create a service account and download its JSON key
//    - For mail and calendar of a real user, enable domain-wide delegation
//      and set `GOOGLE_IMPERSONATE_USER` to that user's address
//    - Set `GOOGLE_SERVICE_ACCOUNT_KEY` (path) or `GOOGLE_SERVICE_ACCOUNT_JSON`
//
// 2. **Static token** (local testing):
//    - Set `GOOGLE_ACCESS_TOKEN` to an OAuth access token obtained elsewhere
//
// Tokens from the service account are cached and refreshed a minute before
// they expire.

use crate::core::errors::ExternalError;
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

const SOURCE: &str = "google_auth";

/// Scopes covering every workspace capability.
pub const WORKSPACE_SCOPES: &[&str] = &[
    "https://www.googleapis.com/auth/gmail.modify",
    "https://www.googleapis.com/auth/calendar",
    "https://www.googleapis.com/auth/drive",
    "https://www.googleapis.com/auth/spreadsheets",
    "https://www.googleapis.com/auth/documents",
];

/// Supplies bearer tokens to the service clients.
#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, ExternalError>;
}

/// A fixed token, typically from `GOOGLE_ACCESS_TOKEN`.
pub struct StaticAccessToken(String);

impl StaticAccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl AccessTokenSource for StaticAccessToken {
    async fn access_token(&self) -> Result<String, ExternalError> {
        Ok(self.0.clone())
    }
}

// =============================================================================
// SERVICE ACCOUNT AUTHENTICATION
// =============================================================================

/// Service account credentials from the JSON key file.
#[derive(Debug, Clone, Deserialize)]
struct ServiceAccountCredentials {
    /// The service account email (used as issuer in JWT).
    client_email: String,

    /// The private key in PEM format.
    private_key: String,

    /// Where to exchange the JWT for an access token.
    token_uri: String,
}

/// JWT claims for Google OAuth2.
#[derive(Debug, Serialize)]
struct JwtClaims {
    iss: String,

    /// Space separated scopes.
    scope: String,

    aud: String,

    /// User to act on behalf of, with domain-wide delegation.
    #[serde(skip_serializing_if = "Option::is_none")]
    sub: Option<String>,

    iat: u64,

    /// Max 1 hour from iat.
    exp: u64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedToken {
    token: String,
    expires_at: SystemTime,
}

/// Authenticator that handles OAuth2 with service account credentials.
pub struct ServiceAccountAuth {
    credentials: ServiceAccountCredentials,
    scopes: Vec<String>,
    subject: Option<String>,
    client: Client,
    cached_token: RwLock<Option<CachedToken>>,
}

impl ServiceAccountAuth {
    pub async fn from_file(path: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    pub fn from_json(json: &str) -> Result<Self, Box<dyn Error + Send + Sync>> {
        let credentials: ServiceAccountCredentials = serde_json::from_str(json)?;
        Ok(Self {
            credentials,
            scopes: WORKSPACE_SCOPES.iter().map(|s| s.to_string()).collect(),
            subject: None,
            client: Client::new(),
            cached_token: RwLock::new(None),
        })
    }

    /// Reads the key from `GOOGLE_SERVICE_ACCOUNT_KEY` or
    /// `GOOGLE_SERVICE_ACCOUNT_JSON`, the delegated user from
    /// `GOOGLE_IMPERSONATE_USER`, and an optional comma-separated scope list
    /// from `GOOGLE_API_SCOPES`.
    pub async fn from_env() -> Result<Self, Box<dyn Error + Send + Sync>> {
        let auth = if let Ok(path) = std::env::var("GOOGLE_SERVICE_ACCOUNT_KEY") {
            Self::from_file(&path).await?
        } else if let Ok(json) = std::env::var("GOOGLE_SERVICE_ACCOUNT_JSON") {
            Self::from_json(&json)?
        } else {
            return Err(
                "Neither GOOGLE_SERVICE_ACCOUNT_KEY nor GOOGLE_SERVICE_ACCOUNT_JSON is set.".into(),
            );
        };

        let auth = match std::env::var("GOOGLE_API_SCOPES") {
            Ok(raw) => match parse_scopes(&raw) {
                Some(scopes) => {
                    let scopes: Vec<&str> = scopes.iter().map(String::as_str).collect();
                    auth.with_scopes(&scopes)
                }
                None => auth,
            },
            Err(_) => auth,
        };

        Ok(match std::env::var("GOOGLE_IMPERSONATE_USER") {
            Ok(user) if !user.trim().is_empty() => auth.impersonating(user.trim()),
            _ => auth,
        })
    }

    pub fn impersonating(mut self, user: &str) -> Self {
        self.subject = Some(user.to_string());
        self
    }

    pub fn with_scopes(mut self, scopes: &[&str]) -> Self {
        self.scopes = scopes.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn client_email(&self) -> &str {
        &self.credentials.client_email
    }

    fn claims(&self, now: u64) -> JwtClaims {
        JwtClaims {
            iss: self.credentials.client_email.clone(),
            scope: self.scopes.join(" "),
            aud: self.credentials.token_uri.clone(),
            sub: self.subject.clone(),
            iat: now,
            exp: now + 3600,
        }
    }

    /// Fetches a new access token from Google.
    async fn fetch_new_token(&self) -> Result<CachedToken, ExternalError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ExternalError::permanent(SOURCE, e.to_string()))?
            .as_secs();

        let header = Header::new(Algorithm::RS256);
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .map_err(|e| ExternalError::permanent(SOURCE, format!("invalid private key: {}", e)))?;
        let jwt = encode(&header, &self.claims(now), &key)
            .map_err(|e| ExternalError::permanent(SOURCE, e.to_string()))?;

        let response = self
            .client
            .post(&self.credentials.token_uri)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", &jwt),
            ])
            .send()
            .await
            .map_err(|e| ExternalError::transient(SOURCE, e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            let detail = format!("token exchange failed ({}): {}", status, text);
            return Err(if crate::infra::http::is_transient_status(status) {
                ExternalError::transient(SOURCE, detail)
            } else {
                ExternalError::permanent(SOURCE, detail)
            });
        }

        let token_response: TokenResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::permanent(SOURCE, e.to_string()))?;

        let lifetime = token_response.expires_in.unwrap_or(3600);
        Ok(CachedToken {
            token: token_response.access_token,
            expires_at: SystemTime::now() + Duration::from_secs(lifetime),
        })
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountAuth {
    async fn access_token(&self) -> Result<String, ExternalError> {
        {
            let cached = self.cached_token.read().await;
            if let Some(token) = cached.as_ref() {
                if token.expires_at > SystemTime::now() + Duration::from_secs(60) {
                    return Ok(token.token.clone());
                }
            }
        }

        let fresh = self.fetch_new_token().await?;
        let token = fresh.token.clone();
        *self.cached_token.write().await = Some(fresh);

        tracing::debug!(account = %self.credentials.client_email, "Refreshed Google access token");
        Ok(token)
    }
}

/// Splits a comma-separated scope list. `None` when it names no scopes.
fn parse_scopes(raw: &str) -> Option<Vec<String>> {
    let scopes: Vec<String> = raw
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect();
    (!scopes.is_empty()).then_some(scopes)
}
