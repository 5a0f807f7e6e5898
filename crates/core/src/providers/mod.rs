//! Provider adapters: one per SIS family, all mapping into the canonical model.

pub mod clever;
pub mod ed_fi;
pub mod http;
pub mod oneroster;
pub mod oneroster_csv;

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{Result, SyncError};
use crate::models::class::Class;
use crate::models::common::EntityType;
use crate::models::enrollment::Enrollment;
use crate::models::relationship::Relationship;
use crate::models::school::School;
use crate::models::term::Term;
use crate::models::user::User;
use crate::models::CanonicalEntity;
use crate::rate_limit::RateLimiter;
use crate::retry::RetryPolicy;
use crate::token::{CredentialKey, CredentialStore, OAuthClientCredentials, TokenManager};

/// What an adapter can do, checked explicitly by the orchestrator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Capabilities {
    /// Has a native change feed (`fetch_delta`).
    pub supports_delta: bool,
    /// Can enumerate every current source ID (`get_all_source_ids`).
    pub supports_deletion_detection: bool,
    /// Honors [`FetchQuery::modified_since`] on full fetches.
    pub supports_modified_since: bool,
}

/// Supported SIS families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    EdFi,
    OnerosterApi,
    OnerosterCsv,
    Clever,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::EdFi => "ed_fi",
            ProviderKind::OnerosterApi => "oneroster_api",
            ProviderKind::OnerosterCsv => "oneroster_csv",
            ProviderKind::Clever => "clever",
        }
    }

    /// Whether the kind talks to an HTTP API with OAuth client credentials.
    pub fn uses_oauth(&self) -> bool {
        !matches!(self, ProviderKind::OnerosterCsv)
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ed_fi" | "edfi" => Ok(ProviderKind::EdFi),
            "oneroster_api" | "oneroster" => Ok(ProviderKind::OnerosterApi),
            "oneroster_csv" => Ok(ProviderKind::OnerosterCsv),
            "clever" => Ok(ProviderKind::Clever),
            other => Err(SyncError::Config(format!("unknown provider kind: {other}"))),
        }
    }
}

/// Client credentials handed to `initialize`.
#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    /// Overrides the adapter's default token endpoint.
    pub token_url: Option<String>,
}

impl Credentials {
    pub fn new(client_id: &str, client_secret: &str) -> Self {
        Self {
            client_id: Some(client_id.to_string()),
            client_secret: Some(client_secret.to_string()),
            token_url: None,
        }
    }

    /// Client ID and secret, or a configuration error naming what is missing.
    pub fn require(&self) -> Result<(&str, &str)> {
        let id = self
            .client_id
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SyncError::Config("missing client_id".into()))?;
        let secret = self
            .client_secret
            .as_deref()
            .filter(|s| !s.trim().is_empty())
            .ok_or_else(|| SyncError::Config("missing client_secret".into()))?;
        Ok((id, secret))
    }
}

/// Filters for a full fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchQuery {
    pub modified_since: Option<DateTime<Utc>>,
}

impl FetchQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn modified_since(since: DateTime<Utc>) -> Self {
        Self {
            modified_since: Some(since),
        }
    }
}

/// A source record that failed normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRecord {
    pub source_id: Option<String>,
    pub reason: String,
}

impl RejectedRecord {
    pub fn new(source_id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            source_id,
            reason: reason.into(),
        }
    }
}

/// Normalized records plus the ones that could not be normalized.
#[derive(Debug, Clone)]
pub struct FetchResult<T> {
    pub records: Vec<T>,
    pub rejected: Vec<RejectedRecord>,
}

impl<T> Default for FetchResult<T> {
    fn default() -> Self {
        Self {
            records: Vec::new(),
            rejected: Vec::new(),
        }
    }
}

impl<T> FetchResult<T> {
    pub fn push(&mut self, outcome: Result<T>, source_id: Option<String>) {
        match outcome {
            Ok(record) => self.records.push(record),
            Err(e) => self.rejected.push(RejectedRecord::new(source_id, e.to_string())),
        }
    }

    pub fn into_canonical(self) -> FetchResult<CanonicalEntity>
    where
        T: Into<CanonicalEntity>,
    {
        FetchResult {
            records: self.records.into_iter().map(Into::into).collect(),
            rejected: self.rejected,
        }
    }
}

/// Native change type reported by a change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    Add,
    Update,
    Delete,
}

/// One entry from a native change feed.
#[derive(Debug, Clone)]
pub struct NativeChange {
    pub source_id: String,
    pub change_version: i64,
    pub change_type: ChangeType,
    /// Normalized entity; `None` for deletes.
    pub target: Option<CanonicalEntity>,
}

/// Result of a change query.
#[derive(Debug, Clone, Default)]
pub struct ChangeBatch {
    pub changes: Vec<NativeChange>,
    /// Upper bound of the window the provider answered for.
    pub max_change_version: Option<i64>,
    pub rejected: Vec<RejectedRecord>,
}

/// Uniform contract over every SIS family.
///
/// Full fetches exhaust pagination and return the complete normalized set.
/// `fetch_delta` returns changes after `min_change_version` (the last
/// committed cursor; `0` when none).
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn kind(&self) -> ProviderKind;
    fn tenant_id(&self) -> &str;
    fn provider_id(&self) -> &str;
    fn capabilities(&self) -> Capabilities;

    /// Validate credentials and connectivity; fails fast on bad credentials.
    async fn initialize(&self, credentials: &Credentials) -> Result<()>;

    async fn fetch_schools(&self, query: &FetchQuery) -> Result<FetchResult<School>>;
    async fn fetch_terms(&self, query: &FetchQuery) -> Result<FetchResult<Term>>;
    async fn fetch_classes(&self, query: &FetchQuery) -> Result<FetchResult<Class>>;
    async fn fetch_users(&self, query: &FetchQuery) -> Result<FetchResult<User>>;
    async fn fetch_enrollments(&self, query: &FetchQuery) -> Result<FetchResult<Enrollment>>;
    async fn fetch_relationships(&self, query: &FetchQuery) -> Result<FetchResult<Relationship>>;

    async fn fetch_delta(
        &self,
        entity_type: EntityType,
        _min_change_version: i64,
    ) -> Result<ChangeBatch> {
        Err(SyncError::CapabilityUnsupported(format!(
            "{} has no change feed for {entity_type}",
            self.kind()
        )))
    }

    async fn get_all_source_ids(&self, entity_type: EntityType) -> Result<Vec<String>>;

    /// Drop any held credentials.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }

    async fn fetch_canonical(
        &self,
        entity_type: EntityType,
        query: &FetchQuery,
    ) -> Result<FetchResult<CanonicalEntity>> {
        Ok(match entity_type {
            EntityType::School => self.fetch_schools(query).await?.into_canonical(),
            EntityType::Term => self.fetch_terms(query).await?.into_canonical(),
            EntityType::Class => self.fetch_classes(query).await?.into_canonical(),
            EntityType::User => self.fetch_users(query).await?.into_canonical(),
            EntityType::Enrollment => self.fetch_enrollments(query).await?.into_canonical(),
            EntityType::Relationship => self.fetch_relationships(query).await?.into_canonical(),
        })
    }
}

/// Process-wide resources handed to every adapter.
#[derive(Clone)]
pub struct AdapterContext {
    pub http: Client,
    pub limiter: Option<Arc<RateLimiter>>,
    pub retry: RetryPolicy,
    pub page_size: u64,
    pub refresh_margin: chrono::Duration,
    pub credential_store: Option<Arc<dyn CredentialStore>>,
}

impl AdapterContext {
    pub fn new(http: Client) -> Self {
        Self {
            http,
            limiter: None,
            retry: RetryPolicy::default(),
            page_size: 100,
            refresh_margin: chrono::Duration::minutes(5),
            credential_store: None,
        }
    }

    /// Token manager for one (tenant, provider) pairing.
    pub(crate) fn token_manager(
        &self,
        tenant_id: &str,
        provider_id: &str,
        token_url: &str,
        credentials: &Credentials,
    ) -> Result<Arc<TokenManager>> {
        let (client_id, client_secret) = credentials.require()?;
        let source = OAuthClientCredentials::new(
            self.http.clone(),
            credentials.token_url.as_deref().unwrap_or(token_url),
            client_id,
            client_secret,
        );
        let key = CredentialKey {
            tenant_id: tenant_id.to_string(),
            provider_id: provider_id.to_string(),
        };
        let mut manager = TokenManager::new(key, Arc::new(source), self.refresh_margin)
            .with_retry(self.retry.clone());
        if let Some(ref store) = self.credential_store {
            manager = manager.with_store(store.clone());
        }
        Ok(Arc::new(manager))
    }

    pub(crate) fn api_client(&self, base_url: &str) -> http::ApiClient {
        http::ApiClient::new(base_url, self.http.clone())
            .with_rate_limiter(self.limiter.clone())
            .with_retry(self.retry.clone())
    }

    pub(crate) fn pager(&self) -> crate::pager::Pager {
        crate::pager::Pager::new(self.page_size, self.retry.clone())
    }
}

/// Build the adapter for a configured provider.
pub fn build_adapter(config: &ProviderConfig, ctx: &AdapterContext) -> Result<Arc<dyn ProviderAdapter>> {
    let adapter: Arc<dyn ProviderAdapter> = match config.kind {
        ProviderKind::EdFi => Arc::new(ed_fi::EdFiAdapter::new(config, ctx)?),
        ProviderKind::OnerosterApi => Arc::new(oneroster::OneRosterApiAdapter::new(config, ctx)?),
        ProviderKind::OnerosterCsv => Arc::new(oneroster_csv::OneRosterCsvAdapter::new(config)?),
        ProviderKind::Clever => Arc::new(clever::CleverAdapter::new(config, ctx)?),
    };
    Ok(adapter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parse() {
        assert_eq!("ed_fi".parse::<ProviderKind>().unwrap(), ProviderKind::EdFi);
        assert_eq!(
            "oneroster_csv".parse::<ProviderKind>().unwrap(),
            ProviderKind::OnerosterCsv
        );
        assert!("classlink".parse::<ProviderKind>().is_err());
        assert!(!ProviderKind::OnerosterCsv.uses_oauth());
        assert!(ProviderKind::Clever.uses_oauth());
    }

    #[test]
    fn credentials_require_both_parts() {
        assert!(Credentials::new("id", "secret").require().is_ok());
        let missing = Credentials {
            client_id: Some("id".into()),
            client_secret: Some("  ".into()),
            token_url: None,
        };
        let err = missing.require().unwrap_err();
        assert!(err.is_fatal());
        assert!(err.to_string().contains("client_secret"));
    }

    #[test]
    fn fetch_result_collects_rejections() {
        let mut result: FetchResult<u32> = FetchResult::default();
        result.push(Ok(1), Some("a".into()));
        result.push(
            Err(SyncError::MalformedRecord("missing name".into())),
            Some("b".into()),
        );
        assert_eq!(result.records, vec![1]);
        assert_eq!(result.rejected.len(), 1);
        assert_eq!(result.rejected[0].source_id.as_deref(), Some("b"));
    }
}
