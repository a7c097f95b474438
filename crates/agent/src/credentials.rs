//! Google OAuth access tokens for Vertex AI.
//!
//! Credentials are looked up the way Google's client libraries find
//! Application Default Credentials: an explicit credentials file, then the file
//! written by `gcloud auth application-default login`, then the metadata server
//! of the VM or container the process runs on. Tokens are cached and renewed a
//! minute before they expire.

use std::fs;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::llm::LlmError;

pub const CLOUD_PLATFORM_SCOPE: &str = "https://www.googleapis.com/auth/cloud-platform";
pub const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub const METADATA_TOKEN_URL: &str =
    "http://metadata.google.internal/computeMetadata/v1/instance/service-accounts/default/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const REFRESH_MARGIN_SECS: i64 = 60;
const ASSERTION_LIFETIME_SECS: i64 = 3600;

/// Hands out a bearer token for each model call.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<SecretString, LlmError>;

    /// Drops any cached token so the next call fetches a new one.
    async fn invalidate(&self) {}
}

/// A token taken as-is from configuration. Never refreshed.
pub struct StaticTokenSource {
    token: SecretString,
}

impl StaticTokenSource {
    pub fn new(token: SecretString) -> Self {
        Self { token }
    }
}

#[async_trait]
impl TokenSource for StaticTokenSource {
    async fn access_token(&self) -> Result<SecretString, LlmError> {
        Ok(self.token.clone())
    }
}

#[derive(Clone, Debug)]
pub enum GoogleCredentials {
    ServiceAccount { client_email: String, private_key: SecretString, token_uri: String },
    AuthorizedUser {
        client_id: String,
        client_secret: SecretString,
        refresh_token: SecretString,
        token_uri: String,
    },
    Metadata { token_url: String },
}

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CredentialsFile {
    ServiceAccount {
        client_email: String,
        private_key: String,
        #[serde(default)]
        token_uri: Option<String>,
    },
    AuthorizedUser {
        client_id: String,
        client_secret: String,
        refresh_token: String,
    },
}

impl GoogleCredentials {
    /// Explicit file first, then the gcloud well-known file, then the metadata server.
    pub fn discover(explicit: Option<&Path>) -> Result<Self, LlmError> {
        if let Some(path) = explicit {
            return Self::from_file(path);
        }
        match gcloud_credentials_file().filter(|path| path.is_file()) {
            Some(path) => Self::from_file(&path),
            None => Ok(Self::Metadata { token_url: METADATA_TOKEN_URL.to_owned() }),
        }
    }

    pub fn from_file(path: &Path) -> Result<Self, LlmError> {
        let raw = fs::read_to_string(path).map_err(|error| {
            LlmError::Config(format!("cannot read google credentials `{}`: {error}", path.display()))
        })?;
        Self::from_json(&raw).map_err(|error| match error {
            LlmError::Config(message) => LlmError::Config(format!("{}: {message}", path.display())),
            other => other,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, LlmError> {
        let parsed: CredentialsFile = serde_json::from_str(raw).map_err(|error| {
            LlmError::Config(format!(
                "unsupported google credentials (expected service_account or authorized_user): {error}"
            ))
        })?;
        Ok(match parsed {
            CredentialsFile::ServiceAccount { client_email, private_key, token_uri } => {
                Self::ServiceAccount {
                    client_email,
                    private_key: SecretString::from(private_key),
                    token_uri: token_uri.unwrap_or_else(|| GOOGLE_TOKEN_URI.to_owned()),
                }
            }
            CredentialsFile::AuthorizedUser { client_id, client_secret, refresh_token } => {
                Self::AuthorizedUser {
                    client_id,
                    client_secret: SecretString::from(client_secret),
                    refresh_token: SecretString::from(refresh_token),
                    token_uri: GOOGLE_TOKEN_URI.to_owned(),
                }
            }
        })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::ServiceAccount { .. } => "service_account",
            Self::AuthorizedUser { .. } => "authorized_user",
            Self::Metadata { .. } => "metadata_server",
        }
    }
}

fn gcloud_credentials_file() -> Option<PathBuf> {
    let gcloud_dir = match std::env::var_os("CLOUDSDK_CONFIG") {
        Some(dir) => PathBuf::from(dir),
        None if cfg!(windows) => dirs::config_dir()?.join("gcloud"),
        None => dirs::home_dir()?.join(".config").join("gcloud"),
    };
    Some(gcloud_dir.join("application_default_credentials.json"))
}

struct CachedToken {
    token: SecretString,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: i64,
}

fn default_expires_in() -> i64 {
    3600
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

/// Exchanges Google credentials for short-lived access tokens.
pub struct GoogleTokenSource {
    http: reqwest::Client,
    credentials: GoogleCredentials,
    cached: Mutex<Option<CachedToken>>,
}

impl GoogleTokenSource {
    pub fn new(http: reqwest::Client, credentials: GoogleCredentials) -> Self {
        Self { http, credentials, cached: Mutex::new(None) }
    }

    async fn fetch(&self) -> Result<CachedToken, LlmError> {
        let now = Utc::now();
        let request = match &self.credentials {
            GoogleCredentials::ServiceAccount { client_email, private_key, token_uri } => {
                let assertion = sign_assertion(client_email, private_key, token_uri, now)?;
                self.http
                    .post(token_uri)
                    .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            }
            GoogleCredentials::AuthorizedUser {
                client_id,
                client_secret,
                refresh_token,
                token_uri,
            } => self.http.post(token_uri).form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client_id.as_str()),
                ("client_secret", client_secret.expose_secret()),
                ("refresh_token", refresh_token.expose_secret()),
            ]),
            GoogleCredentials::Metadata { token_url } => {
                self.http.get(token_url).header("Metadata-Flavor", "Google")
            }
        };

        let response = request
            .send()
            .await
            .map_err(|error| LlmError::Request(format!("google token request failed: {error}")))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status {
                status: status.as_u16(),
                body: format!("google token endpoint: {body}"),
            });
        }
        let token: TokenResponse = response.json().await.map_err(|error| {
            LlmError::InvalidResponse(format!("google token response: {error}"))
        })?;

        Ok(CachedToken {
            token: SecretString::from(token.access_token),
            expires_at: now + Duration::seconds(token.expires_in.max(0)),
        })
    }
}

#[async_trait]
impl TokenSource for GoogleTokenSource {
    async fn access_token(&self) -> Result<SecretString, LlmError> {
        let mut cached = self.cached.lock().await;
        if let Some(current) = cached.as_ref() {
            if current.expires_at - Duration::seconds(REFRESH_MARGIN_SECS) > Utc::now() {
                return Ok(current.token.clone());
            }
        }

        let fresh = self.fetch().await?;
        info!(
            event_name = "query.llm.token_refreshed",
            credentials = self.credentials.kind(),
            expires_at = %fresh.expires_at,
            "google access token refreshed"
        );
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn invalidate(&self) {
        *self.cached.lock().await = None;
    }
}

fn sign_assertion(
    client_email: &str,
    private_key: &SecretString,
    token_uri: &str,
    now: DateTime<Utc>,
) -> Result<String, LlmError> {
    let key = EncodingKey::from_rsa_pem(private_key.expose_secret().as_bytes()).map_err(|error| {
        LlmError::Config(format!("service account private key is invalid: {error}"))
    })?;
    let claims = AssertionClaims {
        iss: client_email,
        scope: CLOUD_PLATFORM_SCOPE,
        aud: token_uri,
        iat: now.timestamp(),
        exp: now.timestamp() + ASSERTION_LIFETIME_SECS,
    };
    encode(&Header::new(Algorithm::RS256), &claims, &key).map_err(|error| {
        LlmError::Config(format!("could not sign service account assertion: {error}"))
    })
}
