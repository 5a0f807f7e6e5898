//! Clever-style OAuth rostering adapter (API v3.0).

pub mod mapper;
pub mod models;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{info, instrument};

use self::mapper::CleverMapper;
use super::http::ApiClient;
use super::{
    AdapterContext, Capabilities, Credentials, FetchQuery, FetchResult, ProviderAdapter,
    ProviderKind,
};
use crate::config::ProviderConfig;
use crate::error::{Result, SyncError};
use crate::models::class::Class;
use crate::models::common::EntityType;
use crate::models::enrollment::Enrollment;
use crate::models::relationship::Relationship;
use crate::models::school::School;
use crate::models::term::Term;
use crate::models::user::User;
use crate::pager::{Page, PageRequest, PageToken, Pager};

/// Clever caps `limit` at 10 000; stay well below it.
const MAX_PAGE_SIZE: u64 = 1000;

pub struct CleverAdapter {
    tenant_id: String,
    provider_id: String,
    client: ApiClient,
    pager: Pager,
    ctx: AdapterContext,
    token_url: String,
}

impl CleverAdapter {
    pub fn new(config: &ProviderConfig, ctx: &AdapterContext) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| SyncError::Config(format!("provider {}: base_url is required", config.id)))?;
        let token_url = config
            .token_url
            .clone()
            .unwrap_or_else(|| format!("{}/oauth/tokens", base_url.trim_end_matches('/')));
        Ok(Self {
            tenant_id: config.tenant_id.clone(),
            provider_id: config.id.clone(),
            client: ctx.api_client(base_url),
            pager: Pager::new(ctx.page_size.min(MAX_PAGE_SIZE), ctx.retry.clone()),
            ctx: ctx.clone(),
            token_url,
        })
    }

    fn endpoint(entity_type: EntityType) -> &'static str {
        match entity_type {
            EntityType::School => "/v3.0/schools",
            EntityType::Term => "/v3.0/terms",
            EntityType::Class | EntityType::Enrollment => "/v3.0/sections",
            EntityType::User | EntityType::Relationship => "/v3.0/users",
        }
    }

    async fn fetch_page(&self, endpoint: &str, request: PageRequest) -> Result<Page<Value>> {
        let limit = ("limit".to_string(), request.limit.to_string());
        let response = match request.cursor {
            Some(PageToken::Url(ref uri)) => self.client.get(uri, &[]).await?,
            Some(PageToken::Cursor(ref after)) => {
                let query = [limit, ("starting_after".to_string(), after.clone())];
                self.client.get(endpoint, &query).await?
            }
            _ => self.client.get(endpoint, &[limit]).await?,
        };

        let items: Vec<Value> = response
            .body
            .get("data")
            .and_then(Value::as_array)
            .map(|envelopes| {
                envelopes
                    .iter()
                    .filter_map(|e| e.get("data").cloned())
                    .collect()
            })
            .unwrap_or_default();

        let next = next_uri(&response.body).map(PageToken::Url).or_else(|| {
            // Without links, continue after the last ID of a full page.
            (items.len() as u64 >= request.limit)
                .then(|| items.last().and_then(record_id))
                .flatten()
                .map(PageToken::Cursor)
        });

        Ok(Page {
            items,
            next,
            total_hint: None,
        })
    }

    async fn fetch_values(&self, entity_type: EntityType) -> Result<Vec<Value>> {
        let endpoint = Self::endpoint(entity_type);
        let values = self
            .pager
            .collect(endpoint, |req| self.fetch_page(endpoint, req))
            .await?;
        info!(endpoint, count = values.len(), "Fetched Clever collection");
        Ok(values)
    }

    async fn fetch_mapped<T>(
        &self,
        entity_type: EntityType,
        map: impl Fn(&str, Value) -> Result<T>,
    ) -> Result<FetchResult<T>> {
        let mut result = FetchResult::default();
        for value in self.fetch_values(entity_type).await? {
            let id = record_id(&value);
            result.push(map(&self.tenant_id, value), id);
        }
        Ok(result)
    }

    /// Records derived from a parent collection (enrollments from sections,
    /// relationships from users).
    async fn fetch_derived<T>(
        &self,
        entity_type: EntityType,
        derive: impl Fn(&str, &Value) -> Result<Vec<T>>,
    ) -> Result<FetchResult<T>> {
        let mut result = FetchResult::default();
        for value in self.fetch_values(entity_type).await? {
            match derive(&self.tenant_id, &value) {
                Ok(records) => result.records.extend(records),
                Err(e) => result
                    .rejected
                    .push(super::RejectedRecord::new(record_id(&value), e.to_string())),
            }
        }
        Ok(result)
    }
}

fn record_id(value: &Value) -> Option<String> {
    value.get("id").and_then(Value::as_str).map(str::to_string)
}

/// `links: [{"rel": "next", "uri": "/v3.0/users?starting_after=..."}]`
fn next_uri(body: &Value) -> Option<String> {
    body.get("links")?
        .as_array()?
        .iter()
        .find(|link| link.get("rel").and_then(Value::as_str) == Some("next"))
        .and_then(|link| link.get("uri"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl ProviderAdapter for CleverAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Clever
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_delta: false,
            supports_deletion_detection: true,
            supports_modified_since: false,
        }
    }

    #[instrument(skip(self, credentials), fields(tenant = %self.tenant_id, provider = %self.provider_id))]
    async fn initialize(&self, credentials: &Credentials) -> Result<()> {
        let manager = self.ctx.token_manager(
            &self.tenant_id,
            &self.provider_id,
            &self.token_url,
            credentials,
        )?;
        manager.access_token().await?;
        self.client.set_token_manager(manager).await;
        self.client.get_with_retry("/v3.0/districts", &[]).await?;
        info!("Clever adapter initialized");
        Ok(())
    }

    async fn fetch_schools(&self, _query: &FetchQuery) -> Result<FetchResult<School>> {
        self.fetch_mapped(EntityType::School, CleverMapper::map_school)
            .await
    }

    async fn fetch_terms(&self, _query: &FetchQuery) -> Result<FetchResult<Term>> {
        self.fetch_mapped(EntityType::Term, CleverMapper::map_term).await
    }

    async fn fetch_classes(&self, _query: &FetchQuery) -> Result<FetchResult<Class>> {
        self.fetch_mapped(EntityType::Class, CleverMapper::map_section)
            .await
    }

    async fn fetch_users(&self, _query: &FetchQuery) -> Result<FetchResult<User>> {
        self.fetch_mapped(EntityType::User, CleverMapper::map_user).await
    }

    async fn fetch_enrollments(&self, _query: &FetchQuery) -> Result<FetchResult<Enrollment>> {
        self.fetch_derived(EntityType::Enrollment, CleverMapper::section_enrollments)
            .await
    }

    async fn fetch_relationships(&self, _query: &FetchQuery) -> Result<FetchResult<Relationship>> {
        self.fetch_derived(EntityType::Relationship, CleverMapper::contact_relationships)
            .await
    }

    async fn get_all_source_ids(&self, entity_type: EntityType) -> Result<Vec<String>> {
        match entity_type {
            EntityType::Enrollment => Ok(self
                .fetch_enrollments(&FetchQuery::all())
                .await?
                .records
                .into_iter()
                .map(|e| e.source_id)
                .collect()),
            EntityType::Relationship => Ok(self
                .fetch_relationships(&FetchQuery::all())
                .await?
                .records
                .into_iter()
                .map(|r| r.source_id)
                .collect()),
            other => Ok(self
                .fetch_values(other)
                .await?
                .iter()
                .filter_map(record_id)
                .collect()),
        }
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(manager) = self.client.token_manager().await {
            manager.discard().await?;
        }
        Ok(())
    }
}
