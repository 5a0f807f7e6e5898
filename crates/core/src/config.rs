//! TOML-based configuration for the sync engine.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};
use crate::providers::{AdapterContext, Credentials, ProviderKind};
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::token::CredentialStore;

/// Top-level configuration, deserialized from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub engine: EngineSection,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

/// Engine-wide settings shared by every provider run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSection {
    /// SQLite file holding cursors, known IDs, hashes and run reports.
    #[serde(default = "default_database_path")]
    pub database_path: String,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    /// Records handed to the sink per apply call.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_backoff_ms")]
    pub base_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_token_refresh_margin_secs")]
    pub token_refresh_margin_secs: u64,
    /// Hard limit on a single (tenant, provider) run; 0 disables it.
    #[serde(default = "default_run_deadline_secs")]
    pub run_deadline_secs: u64,
    /// Aggregate outbound request budget; 0 disables rate limiting.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: u64,
    #[serde(default = "default_max_concurrent_runs")]
    pub max_concurrent_runs: usize,
    /// Run the deletion scan every N runs (1 = every run).
    #[serde(default = "default_deletion_scan_every")]
    pub deletion_scan_every: u32,
    #[serde(default = "default_http_timeout_secs")]
    pub http_timeout_secs: u64,
}

impl Default for EngineSection {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            page_size: default_page_size(),
            batch_size: default_batch_size(),
            max_attempts: default_max_attempts(),
            base_backoff_ms: default_base_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            token_refresh_margin_secs: default_token_refresh_margin_secs(),
            run_deadline_secs: default_run_deadline_secs(),
            requests_per_minute: default_requests_per_minute(),
            max_concurrent_runs: default_max_concurrent_runs(),
            deletion_scan_every: default_deletion_scan_every(),
            http_timeout_secs: default_http_timeout_secs(),
        }
    }
}

fn default_database_path() -> String {
    "/var/lib/rostersync/state.db".into()
}

fn default_page_size() -> u64 {
    100
}

fn default_batch_size() -> usize {
    500
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

fn default_token_refresh_margin_secs() -> u64 {
    300
}

/// Upper bound on the token refresh margin (one day).
const MAX_TOKEN_REFRESH_MARGIN_SECS: i64 = 86_400;

fn default_run_deadline_secs() -> u64 {
    3600
}

fn default_requests_per_minute() -> u64 {
    600
}

fn default_max_concurrent_runs() -> usize {
    4
}

fn default_deletion_scan_every() -> u32 {
    1
}

fn default_http_timeout_secs() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// One configured (tenant, provider) pairing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider instance ID; also the `source_system` of emitted records.
    pub id: String,
    pub tenant_id: String,
    pub kind: ProviderKind,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub base_url: Option<String>,
    /// OAuth token endpoint when it is not derivable from `base_url`.
    #[serde(default)]
    pub token_url: Option<String>,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub client_secret: Option<String>,
    /// Drop directory for `oneroster_csv`.
    #[serde(default)]
    pub csv_dir: Option<PathBuf>,
    /// Ed-Fi year-specific route segment.
    #[serde(default)]
    pub school_year: Option<u16>,
}

impl ProviderConfig {
    pub fn credentials(&self) -> Credentials {
        Credentials {
            client_id: self.client_id.clone(),
            client_secret: self.client_secret.clone(),
            token_url: self.token_url.clone(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file at the given path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)
            .map_err(|e| SyncError::Config(format!("failed to parse config: {e}")))?;
        Ok(config)
    }

    /// Validate the configuration, returning an error for invalid combinations.
    pub fn validate(&self) -> Result<()> {
        let engine = &self.engine;
        if engine.database_path.trim().is_empty() {
            return Err(SyncError::Config(
                "engine.database_path must not be empty".into(),
            ));
        }
        if engine.page_size == 0 {
            return Err(SyncError::Config("engine.page_size must be positive".into()));
        }
        if engine.batch_size == 0 {
            return Err(SyncError::Config("engine.batch_size must be positive".into()));
        }
        if engine.max_attempts == 0 {
            return Err(SyncError::Config(
                "engine.max_attempts must be at least 1".into(),
            ));
        }
        if engine.base_backoff_ms > engine.max_backoff_ms {
            return Err(SyncError::Config(
                "engine.base_backoff_ms must not exceed engine.max_backoff_ms".into(),
            ));
        }
        self.refresh_margin()?;
        if engine.max_concurrent_runs == 0 {
            return Err(SyncError::Config(
                "engine.max_concurrent_runs must be at least 1".into(),
            ));
        }
        if engine.deletion_scan_every == 0 {
            return Err(SyncError::Config(
                "engine.deletion_scan_every must be at least 1".into(),
            ));
        }

        let mut seen = std::collections::HashSet::new();
        for provider in &self.providers {
            if provider.id.trim().is_empty() || provider.tenant_id.trim().is_empty() {
                return Err(SyncError::Config(
                    "providers.id and providers.tenant_id must not be empty".into(),
                ));
            }
            if !seen.insert((provider.tenant_id.as_str(), provider.id.as_str())) {
                return Err(SyncError::Config(format!(
                    "duplicate provider {} for tenant {}",
                    provider.id, provider.tenant_id
                )));
            }
            if provider.kind.uses_oauth() {
                if provider.base_url.as_deref().map_or(true, str::is_empty) {
                    return Err(SyncError::Config(format!(
                        "provider {}: base_url is required for {}",
                        provider.id, provider.kind
                    )));
                }
            } else if provider.csv_dir.is_none() {
                return Err(SyncError::Config(format!(
                    "provider {}: csv_dir is required for {}",
                    provider.id, provider.kind
                )));
            }
        }

        Ok(())
    }

    /// Generate a sensible default configuration.
    pub fn generate_default() -> Self {
        Self {
            engine: EngineSection::default(),
            providers: vec![ProviderConfig {
                id: "edfi".into(),
                tenant_id: "my-district".into(),
                kind: ProviderKind::EdFi,
                enabled: false,
                base_url: Some("https://ods.example.org/api".into()),
                token_url: None,
                client_id: Some(String::new()),
                client_secret: Some(String::new()),
                csv_dir: None,
                school_year: None,
            }],
        }
    }

    pub fn provider(&self, tenant_id: &str, provider_id: &str) -> Option<&ProviderConfig> {
        self.providers
            .iter()
            .find(|p| p.tenant_id == tenant_id && p.id == provider_id)
    }

    pub fn enabled_providers(&self) -> impl Iterator<Item = &ProviderConfig> {
        self.providers.iter().filter(|p| p.enabled)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.engine.max_attempts,
            base_delay: Duration::from_millis(self.engine.base_backoff_ms),
            max_delay: Duration::from_millis(self.engine.max_backoff_ms),
            ..RetryPolicy::default()
        }
    }

    /// Token refresh margin as a signed duration.
    pub fn refresh_margin(&self) -> Result<chrono::Duration> {
        let secs = self.engine.token_refresh_margin_secs;
        i64::try_from(secs)
            .ok()
            .filter(|s| *s <= MAX_TOKEN_REFRESH_MARGIN_SECS)
            .and_then(chrono::Duration::try_seconds)
            .ok_or_else(|| {
                SyncError::Config(format!(
                    "engine.token_refresh_margin_secs must be at most {MAX_TOKEN_REFRESH_MARGIN_SECS}, got {secs}"
                ))
            })
    }

    pub fn run_deadline(&self) -> Option<Duration> {
        (self.engine.run_deadline_secs > 0)
            .then(|| Duration::from_secs(self.engine.run_deadline_secs))
    }

    /// Shared adapter resources: one HTTP client and one rate limiter for
    /// every provider this process talks to.
    pub fn adapter_context(
        &self,
        credential_store: Option<Arc<dyn CredentialStore>>,
    ) -> Result<AdapterContext> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.engine.http_timeout_secs))
            .user_agent(concat!("rostersync/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let mut ctx = AdapterContext::new(http);
        ctx.retry = self.retry_policy();
        ctx.page_size = self.engine.page_size;
        ctx.refresh_margin = self.refresh_margin()?;
        ctx.limiter = (self.engine.requests_per_minute > 0)
            .then(|| Arc::new(RateLimiter::per_minute(self.engine.requests_per_minute)));
        ctx.credential_store = credential_store;
        Ok(ctx)
    }
}
