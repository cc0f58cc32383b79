//! Microsoft identity platform sign-in for Graph
//!
//! Interactive sign-in uses the OAuth2 device-code flow. The resulting refresh token is kept
//! in an auth record on disk; access tokens are minted from it on demand and cached in memory.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::{OutlookError, Result};

/// Scopes requested when neither `.auth.json` nor the environment name any
pub const DEFAULT_SCOPES: &[&str] = &["User.Read", "Mail.ReadWrite", "Mail.Send"];

/// Scopes always added to the request so a refresh token and an id token come back
const IDENTITY_SCOPES: &[&str] = &["openid", "profile", "offline_access"];

const DEVICE_CODE_GRANT: &str = "urn:ietf:params:oauth:grant-type:device_code";

/// Refresh this long before the identity platform says the token expires
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Azure app registration used for sign-in
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRegistration {
    pub client_id: String,
    pub tenant_id: String,
    pub scopes: Vec<String>,
}

/// `.auth.json` as written by the Azure portal quickstart
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AuthSettingsFile {
    client_id: String,
    #[serde(default = "default_tenant")]
    tenant_id: String,
    #[serde(default)]
    graph_user_scopes: Option<String>,
}

fn default_tenant() -> String {
    "common".to_string()
}

fn split_scopes(scopes: Option<&str>) -> Vec<String> {
    let parsed: Vec<String> = scopes
        .unwrap_or_default()
        .split_whitespace()
        .map(str::to_string)
        .collect();
    if parsed.is_empty() {
        DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
    } else {
        parsed
    }
}

impl AppRegistration {
    /// Load the registration from a `.auth.json` file
    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path).await.map_err(|e| {
            OutlookError::ConfigError(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let file: AuthSettingsFile = serde_json::from_str(&content).map_err(|e| {
            OutlookError::ConfigError(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        Ok(Self {
            client_id: file.client_id,
            tenant_id: file.tenant_id,
            scopes: split_scopes(file.graph_user_scopes.as_deref()),
        })
    }

    /// Load the registration from environment variables
    ///
    /// # Environment Variables
    /// - `OUTLOOK_CLIENT_ID`: application (client) id, required
    /// - `OUTLOOK_TENANT_ID`: directory id, defaults to `common`
    /// - `OUTLOOK_SCOPES`: space-separated Graph scopes
    pub fn from_env() -> Result<Self> {
        let client_id = env::var("OUTLOOK_CLIENT_ID")
            .map_err(|_| OutlookError::ConfigError("OUTLOOK_CLIENT_ID not set".to_string()))?;
        let tenant_id = env::var("OUTLOOK_TENANT_ID").unwrap_or_else(|_| default_tenant());
        let scopes = env::var("OUTLOOK_SCOPES").ok();

        Ok(Self {
            client_id,
            tenant_id,
            scopes: split_scopes(scopes.as_deref()),
        })
    }

    /// Prefer the file when it exists, otherwise the environment
    pub async fn resolve(path: &Path) -> Result<Self> {
        if path.exists() {
            return Self::load(path).await;
        }
        Self::from_env().map_err(|_| {
            OutlookError::ConfigError(format!(
                "No app registration found: create {} or set OUTLOOK_CLIENT_ID",
                path.display()
            ))
        })
    }

    fn scope_param(&self) -> String {
        self.scopes
            .iter()
            .map(String::as_str)
            .chain(IDENTITY_SCOPES.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Persisted sign-in state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub username: String,
    pub tenant_id: String,
    pub client_id: String,
    pub refresh_token: String,
    pub scopes: Vec<String>,
    pub updated_at: DateTime<Utc>,
}

impl AuthRecord {
    /// Read the record, `None` when the user never signed in
    pub async fn load(path: &Path) -> Result<Option<Self>> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let content = serde_json::to_string_pretty(self)?;

        // The refresh token never sits in a file other users can read
        let staging = path.with_extension("json.tmp");
        let mut options = tokio::fs::OpenOptions::new();
        options.write(true).create(true).truncate(true);
        #[cfg(unix)]
        options.mode(0o600);
        let mut file = options.open(&staging).await?;
        secure_token_file(&staging).await?;
        file.write_all(content.as_bytes()).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&staging, path).await?;
        debug!("Saved auth record to {:?}", path);
        Ok(())
    }

    /// Remove the record; returns whether one existed
    pub async fn delete(path: &Path) -> Result<bool> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// What the user has to do to finish a device-code sign-in
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCode {
    pub device_code: String,
    pub user_code: String,
    pub verification_uri: String,
    pub expires_in: u64,
    #[serde(default = "default_poll_interval")]
    pub interval: u64,
    pub message: Option<String>,
}

fn default_poll_interval() -> u64 {
    5
}

impl DeviceCode {
    /// Instruction text to show the user
    pub fn instructions(&self) -> String {
        self.message.clone().unwrap_or_else(|| {
            format!(
                "To sign in, open {} and enter the code {}",
                self.verification_uri, self.user_code
            )
        })
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: u64,
    refresh_token: Option<String>,
    id_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IdTokenClaims {
    preferred_username: Option<String>,
    email: Option<String>,
}

/// Pull the account name out of an id token without validating it
fn username_from_id_token(id_token: &str) -> Option<String> {
    let payload = id_token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: IdTokenClaims = serde_json::from_slice(&bytes).ok()?;
    claims.preferred_username.or(claims.email)
}

/// Anything that can hand out a bearer token for Graph
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A fixed token, for tests and for tokens obtained elsewhere
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Default)]
struct TokenState {
    record: Option<AuthRecord>,
    cached: Option<CachedToken>,
}

/// Device-code sign-in plus refresh-token based access tokens
pub struct Authenticator {
    http: reqwest::Client,
    authority: String,
    registration: AppRegistration,
    record_path: PathBuf,
    state: Mutex<TokenState>,
    /// Held across a refresh so one grant serves every waiting caller
    refresh_guard: Mutex<()>,
}

impl Authenticator {
    /// Create an authenticator, loading any existing auth record
    pub async fn new(
        http: reqwest::Client,
        authority: &str,
        registration: AppRegistration,
        record_path: PathBuf,
    ) -> Result<Self> {
        let record = AuthRecord::load(&record_path).await?;
        if let Some(record) = &record {
            debug!("Loaded auth record for {}", record.username);
        }

        Ok(Self {
            http,
            authority: authority.trim_end_matches('/').to_string(),
            registration,
            record_path,
            state: Mutex::new(TokenState {
                record,
                cached: None,
            }),
            refresh_guard: Mutex::new(()),
        })
    }

    fn endpoint(&self, name: &str) -> String {
        format!(
            "{}/{}/oauth2/v2.0/{}",
            self.authority, self.registration.tenant_id, name
        )
    }

    pub async fn is_signed_in(&self) -> bool {
        self.state.lock().await.record.is_some()
    }

    pub async fn username(&self) -> Option<String> {
        self.state
            .lock()
            .await
            .record
            .as_ref()
            .map(|r| r.username.clone())
    }

    /// Start a device-code sign-in
    pub async fn request_device_code(&self) -> Result<DeviceCode> {
        let response = self
            .http
            .post(self.endpoint("devicecode"))
            .form(&[
                ("client_id", self.registration.client_id.as_str()),
                ("scope", self.registration.scope_param().as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(identity_error(&body, status.as_u16()));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Poll the token endpoint until the user completes the device-code sign-in
    pub async fn complete_device_code(&self, code: &DeviceCode) -> Result<AuthRecord> {
        let deadline = Instant::now() + Duration::from_secs(code.expires_in);
        let mut interval = code.interval;

        loop {
            let response = self
                .http
                .post(self.endpoint("token"))
                .form(&[
                    ("grant_type", DEVICE_CODE_GRANT),
                    ("client_id", self.registration.client_id.as_str()),
                    ("device_code", code.device_code.as_str()),
                ])
                .send()
                .await?;

            let status = response.status();
            let body = response.text().await?;
            if status.is_success() {
                let token: TokenResponse = serde_json::from_str(&body)?;
                let record = self.store_token(token, None).await?;
                info!("Signed in as {}", record.username);
                return Ok(record);
            }

            let error: TokenErrorResponse = serde_json::from_str(&body).map_err(|_| {
                OutlookError::AuthError(format!("HTTP {} from token endpoint", status.as_u16()))
            })?;
            match error.error.as_str() {
                "authorization_pending" => {}
                "slow_down" => interval += 5,
                "expired_token" | "code_expired" => {
                    return Err(OutlookError::AuthError(
                        "Device code expired before sign-in completed".to_string(),
                    ))
                }
                "authorization_declined" | "access_denied" => {
                    return Err(OutlookError::AuthError("Sign-in was declined".to_string()))
                }
                other => {
                    return Err(OutlookError::AuthError(format!(
                        "{}: {}",
                        other,
                        error.error_description.unwrap_or_default()
                    )))
                }
            }

            if Instant::now() >= deadline {
                return Err(OutlookError::AuthError(
                    "Device code expired before sign-in completed".to_string(),
                ));
            }
            debug!("Waiting {}s for device-code sign-in", interval);
            tokio::time::sleep(Duration::from_secs(interval)).await;
        }
    }

    async fn cached_token(&self) -> Option<String> {
        let state = self.state.lock().await;
        state
            .cached
            .as_ref()
            .filter(|cached| Instant::now() < cached.expires_at)
            .map(|cached| cached.value.clone())
    }

    /// Forget the signed-in account
    pub async fn sign_out(&self) -> Result<bool> {
        let mut state = self.state.lock().await;
        state.record = None;
        state.cached = None;
        AuthRecord::delete(&self.record_path).await
    }

    async fn refresh(&self, refresh_token: &str) -> Result<TokenResponse> {
        let response = self
            .http
            .post(self.endpoint("token"))
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.registration.client_id.as_str()),
                ("refresh_token", refresh_token),
                ("scope", self.registration.scope_param().as_str()),
            ])
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(identity_error(&body, status.as_u16()));
        }
        Ok(serde_json::from_str(&body)?)
    }

    /// Cache the access token and persist the record if the refresh token changed
    async fn store_token(
        &self,
        token: TokenResponse,
        previous: Option<&AuthRecord>,
    ) -> Result<AuthRecord> {
        let refresh_token = token
            .refresh_token
            .or_else(|| previous.map(|r| r.refresh_token.clone()))
            .ok_or_else(|| {
                OutlookError::AuthError(
                    "No refresh token returned; is offline_access allowed?".to_string(),
                )
            })?;
        let username = token
            .id_token
            .as_deref()
            .and_then(username_from_id_token)
            .or_else(|| previous.map(|r| r.username.clone()))
            .unwrap_or_else(|| "unknown".to_string());

        let record = AuthRecord {
            username,
            tenant_id: self.registration.tenant_id.clone(),
            client_id: self.registration.client_id.clone(),
            refresh_token,
            scopes: self.registration.scopes.clone(),
            updated_at: Utc::now(),
        };

        let changed = previous.map_or(true, |p| p.refresh_token != record.refresh_token);
        if changed {
            record.save(&self.record_path).await?;
        }

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        let mut state = self.state.lock().await;
        state.cached = Some(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + lifetime,
        });
        state.record = Some(record.clone());
        Ok(record)
    }
}

#[async_trait]
impl TokenSource for Authenticator {
    async fn access_token(&self) -> Result<String> {
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let _refresh = self.refresh_guard.lock().await;
        // Another caller may have refreshed while we waited
        if let Some(token) = self.cached_token().await {
            return Ok(token);
        }

        let record = self.state.lock().await.record.clone().ok_or_else(|| {
            OutlookError::AuthError("Not logged in. Run 'outlook-cli login' first".to_string())
        })?;

        debug!("Refreshing access token for {}", record.username);
        let token = self.refresh(&record.refresh_token).await?;
        let record = self.store_token(token, Some(&record)).await?;

        let state = self.state.lock().await;
        state
            .cached
            .as_ref()
            .map(|c| c.value.clone())
            .ok_or_else(|| OutlookError::AuthError(format!("No access token for {}", record.username)))
    }
}

fn identity_error(body: &str, status: u16) -> OutlookError {
    match serde_json::from_str::<TokenErrorResponse>(body) {
        Ok(error) => OutlookError::AuthError(format!(
            "{}: {}",
            error.error,
            error.error_description.unwrap_or_default()
        )),
        Err(_) => OutlookError::AuthError(format!("HTTP {} from identity platform", status)),
    }
}

/// Secure token file permissions on Unix systems
///
/// Sets file permissions to 0600 (read/write for owner only)
#[cfg(unix)]
pub async fn secure_token_file(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mut perms = tokio::fs::metadata(path).await?.permissions();
    perms.set_mode(0o600);
    tokio::fs::set_permissions(path, perms).await?;
    Ok(())
}

#[cfg(not(unix))]
pub async fn secure_token_file(_path: &Path) -> Result<()> {
    Ok(())
}
