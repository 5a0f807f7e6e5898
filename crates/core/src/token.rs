//! Per-(tenant, provider) OAuth token lifecycle.
//!
//! State machine: `NoToken -> Valid -> ExpiringSoon -> Valid (refreshed)`.
//! A token is refreshed proactively once less than the refresh margin is
//! left. All refreshes go through one async mutex, so concurrent callers wait
//! for the in-flight refresh instead of issuing their own grant.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, SyncError};
use crate::retry::RetryPolicy;

/// A bearer token and its expiry, if the provider reported one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Observable state of a managed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    NoToken,
    Valid,
    ExpiringSoon,
    Expired,
}

impl AccessToken {
    pub fn state_at(&self, now: DateTime<Utc>, margin: Duration) -> TokenState {
        match self.expires_at {
            None => TokenState::Valid,
            Some(exp) if now >= exp => TokenState::Expired,
            Some(exp) if now + margin >= exp => TokenState::ExpiringSoon,
            Some(_) => TokenState::Valid,
        }
    }
}

/// Identifies the credential set a token belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CredentialKey {
    pub tenant_id: String,
    pub provider_id: String,
}

/// Performs the actual token grant against a provider.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken>;
}

/// External collaborator that keeps refreshed credentials across runs.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_token(&self, key: &CredentialKey) -> Result<Option<AccessToken>>;
    async fn save_token(&self, key: &CredentialKey, token: &AccessToken) -> Result<()>;
    async fn discard_token(&self, key: &CredentialKey) -> Result<()>;
}

/// In-process credential store.
#[derive(Debug, Default)]
pub struct MemoryCredentialStore {
    tokens: RwLock<HashMap<CredentialKey, AccessToken>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CredentialStore for MemoryCredentialStore {
    async fn load_token(&self, key: &CredentialKey) -> Result<Option<AccessToken>> {
        Ok(self.tokens.read().await.get(key).cloned())
    }

    async fn save_token(&self, key: &CredentialKey, token: &AccessToken) -> Result<()> {
        self.tokens.write().await.insert(key.clone(), token.clone());
        Ok(())
    }

    async fn discard_token(&self, key: &CredentialKey) -> Result<()> {
        self.tokens.write().await.remove(key);
        Ok(())
    }
}

/// OAuth token response (RFC 6749 section 5.1).
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// OAuth 2.0 client-credentials grant using HTTP basic client authentication.
pub struct OAuthClientCredentials {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
}

impl OAuthClientCredentials {
    pub fn new(http: Client, token_url: &str, client_id: &str, client_secret: &str) -> Self {
        Self {
            http,
            token_url: token_url.to_string(),
            client_id: client_id.to_string(),
            client_secret: client_secret.to_string(),
        }
    }
}

#[async_trait]
impl TokenSource for OAuthClientCredentials {
    async fn fetch_token(&self) -> Result<AccessToken> {
        debug!(url = %self.token_url, "Requesting client-credentials token");

        let form = [("grant_type", "client_credentials")];

        let response = self
            .http
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&form)
            .send()
            .await
            .map_err(|e| SyncError::from_transport(e, "token request"))?;

        let status = response.status();
        if !status.is_success() {
            let headers = response.headers().clone();
            let body = response.text().await.unwrap_or_default();
            warn!(status = %status, "Token request rejected");
            return Err(match status.as_u16() {
                400 | 401 | 403 => SyncError::Authentication(format!(
                    "token endpoint rejected credentials with status {status}: {body}"
                )),
                _ => SyncError::from_status(status, &headers, "token request", &body),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SyncError::Authentication(format!("failed to parse token response: {e}")))?;

        Ok(AccessToken {
            expires_at: expiry_from(token.expires_in)?,
            value: token.access_token,
        })
    }
}

/// Absolute expiry for an `expires_in` lifetime. A lifetime too large to
/// represent is treated as no expiry; a negative one is rejected.
fn expiry_from(expires_in: Option<i64>) -> Result<Option<DateTime<Utc>>> {
    match expires_in {
        None => Ok(None),
        Some(secs) if secs < 0 => Err(SyncError::Authentication(format!(
            "token endpoint returned negative expires_in {secs}"
        ))),
        Some(secs) => {
            let expires_at =
                Duration::try_seconds(secs).and_then(|d| Utc::now().checked_add_signed(d));
            if expires_at.is_none() {
                warn!(expires_in = secs, "Token lifetime out of range, treating as non-expiring");
            }
            Ok(expires_at)
        }
    }
}

/// Owned token state for one (tenant, provider) pairing.
pub struct TokenManager {
    key: CredentialKey,
    source: Arc<dyn TokenSource>,
    store: Option<Arc<dyn CredentialStore>>,
    refresh_margin: Duration,
    retry: RetryPolicy,
    slot: Mutex<TokenSlot>,
    refreshes: AtomicU64,
}

#[derive(Default)]
struct TokenSlot {
    token: Option<AccessToken>,
    store_checked: bool,
}

impl TokenManager {
    pub fn new(key: CredentialKey, source: Arc<dyn TokenSource>, refresh_margin: Duration) -> Self {
        Self {
            key,
            source,
            store: None,
            refresh_margin,
            retry: RetryPolicy::default(),
            slot: Mutex::new(TokenSlot::default()),
            refreshes: AtomicU64::new(0),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Number of grants performed so far.
    pub fn refresh_count(&self) -> u64 {
        self.refreshes.load(Ordering::SeqCst)
    }

    pub async fn state(&self) -> TokenState {
        let slot = self.slot.lock().await;
        match slot.token {
            None => TokenState::NoToken,
            Some(ref t) => t.state_at(Utc::now(), self.refresh_margin),
        }
    }

    /// A token that is valid for at least the refresh margin.
    #[instrument(skip(self), fields(tenant = %self.key.tenant_id, provider = %self.key.provider_id))]
    pub async fn access_token(&self) -> Result<String> {
        let mut slot = self.slot.lock().await;
        self.load_stored(&mut slot).await;

        if let Some(ref token) = slot.token {
            if token.state_at(Utc::now(), self.refresh_margin) == TokenState::Valid {
                return Ok(token.value.clone());
            }
            debug!("Token expiring soon, refreshing proactively");
        }

        self.refresh_locked(&mut slot).await
    }

    /// Refresh after the provider rejected `rejected` with a 401.
    ///
    /// If another caller already replaced that token, the replacement is
    /// returned without a second grant.
    #[instrument(skip(self, rejected), fields(tenant = %self.key.tenant_id, provider = %self.key.provider_id))]
    pub async fn force_refresh(&self, rejected: &str) -> Result<String> {
        let mut slot = self.slot.lock().await;
        if let Some(ref token) = slot.token {
            if token.value != rejected
                && token.state_at(Utc::now(), self.refresh_margin) == TokenState::Valid
            {
                return Ok(token.value.clone());
            }
        }
        slot.token = None;
        self.refresh_locked(&mut slot).await
    }

    /// Drop the cached and stored token (provider disconnect).
    pub async fn discard(&self) -> Result<()> {
        let mut slot = self.slot.lock().await;
        slot.token = None;
        if let Some(ref store) = self.store {
            store.discard_token(&self.key).await?;
        }
        Ok(())
    }

    async fn load_stored(&self, slot: &mut TokenSlot) {
        if slot.store_checked {
            return;
        }
        slot.store_checked = true;
        let Some(ref store) = self.store else {
            return;
        };
        match store.load_token(&self.key).await {
            Ok(Some(token)) => {
                debug!("Loaded stored token");
                slot.token = Some(token);
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "Failed to load stored token"),
        }
    }

    async fn refresh_locked(&self, slot: &mut TokenSlot) -> Result<String> {
        let token = self
            .retry
            .run("token refresh", || self.source.fetch_token())
            .await
            .map_err(|e| match e {
                SyncError::Authentication(_) | SyncError::Config(_) => e,
                other => SyncError::Authentication(format!("token refresh exhausted: {other}")),
            })?;

        self.refreshes.fetch_add(1, Ordering::SeqCst);
        info!(expires_at = ?token.expires_at, "Obtained access token");

        if let Some(ref store) = self.store {
            if let Err(e) = store.save_token(&self.key, &token).await {
                warn!(error = %e, "Failed to persist refreshed token");
            }
        }

        let value = token.value.clone();
        slot.token = Some(token);
        Ok(value)
    }
}
