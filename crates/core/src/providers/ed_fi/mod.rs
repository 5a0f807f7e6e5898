//! Ed-Fi ODS/API adapter.
//!
//! Full fetches page through `/data/v3/ed-fi/{resource}` with offset/limit.
//! Native deltas use the change-query API: the window upper bound comes from
//! `/changeQueries/v1/availableChangeVersions`, upserts from
//! `{resource}?minChangeVersion=&maxChangeVersion=` and removals from
//! `{resource}/deletes`.

pub mod mapper;
pub mod models;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use self::mapper::EdFiMapper;
use self::models::{AvailableChangeVersions, DeletedResource};
use super::http::ApiClient;
use super::{
    AdapterContext, Capabilities, ChangeBatch, ChangeType, Credentials, FetchQuery, FetchResult,
    NativeChange, ProviderAdapter, ProviderKind, RejectedRecord,
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
use crate::pager::{Page, PageRequest, Pager};

/// Largest page the ODS/API accepts.
const MAX_PAGE_SIZE: u64 = 500;

/// Ed-Fi resources read by the adapter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    Schools,
    Sessions,
    Sections,
    Students,
    Staffs,
    Parents,
    StudentSectionAssociations,
    StaffSectionAssociations,
    StudentParentAssociations,
}

impl Resource {
    pub fn path(&self) -> &'static str {
        match self {
            Resource::Schools => "schools",
            Resource::Sessions => "sessions",
            Resource::Sections => "sections",
            Resource::Students => "students",
            Resource::Staffs => "staffs",
            Resource::Parents => "parents",
            Resource::StudentSectionAssociations => "studentSectionAssociations",
            Resource::StaffSectionAssociations => "staffSectionAssociations",
            Resource::StudentParentAssociations => "studentParentAssociations",
        }
    }

    /// Resources that feed a canonical entity type, in fetch order.
    pub fn for_entity(entity_type: EntityType) -> &'static [Resource] {
        match entity_type {
            EntityType::School => &[Resource::Schools],
            EntityType::Term => &[Resource::Sessions],
            EntityType::Class => &[Resource::Sections],
            EntityType::User => &[Resource::Students, Resource::Staffs, Resource::Parents],
            EntityType::Enrollment => &[
                Resource::StudentSectionAssociations,
                Resource::StaffSectionAssociations,
            ],
            EntityType::Relationship => &[Resource::StudentParentAssociations],
        }
    }
}

pub struct EdFiAdapter {
    tenant_id: String,
    provider_id: String,
    client: ApiClient,
    pager: Pager,
    ctx: AdapterContext,
    school_year: Option<u16>,
}

impl EdFiAdapter {
    pub fn new(config: &ProviderConfig, ctx: &AdapterContext) -> Result<Self> {
        let base_url = config
            .base_url
            .as_deref()
            .ok_or_else(|| SyncError::Config(format!("provider {}: base_url is required", config.id)))?;
        let page_size = ctx.page_size.min(MAX_PAGE_SIZE);
        Ok(Self {
            tenant_id: config.tenant_id.clone(),
            provider_id: config.id.clone(),
            client: ctx.api_client(base_url),
            pager: Pager::new(page_size, ctx.retry.clone()),
            ctx: ctx.clone(),
            school_year: config.school_year,
        })
    }

    fn data_path(&self, resource: Resource) -> String {
        match self.school_year {
            Some(year) => format!("/data/v3/{year}/ed-fi/{}", resource.path()),
            None => format!("/data/v3/ed-fi/{}", resource.path()),
        }
    }

    fn change_versions_path(&self) -> String {
        match self.school_year {
            Some(year) => format!("/changeQueries/v1/{year}/availableChangeVersions"),
            None => "/changeQueries/v1/availableChangeVersions".to_string(),
        }
    }

    async fn fetch_page(
        &self,
        path: &str,
        request: PageRequest,
        extra: &[(String, String)],
    ) -> Result<Page<Value>> {
        let mut query = vec![
            ("offset".to_string(), request.offset.to_string()),
            ("limit".to_string(), request.limit.to_string()),
        ];
        if request.offset == 0 {
            query.push(("totalCount".to_string(), "true".to_string()));
        }
        query.extend_from_slice(extra);

        let response = self.client.get(path, &query).await?;
        let items = match response.body {
            Value::Array(ref items) => items.clone(),
            Value::Null => Vec::new(),
            _ => {
                return Err(SyncError::Provider(format!(
                    "{path}: expected a JSON array"
                )))
            }
        };
        Ok(Page::offset(items, &request, response.header_u64("total-count")))
    }

    async fn fetch_all(&self, resource: Resource, extra: &[(String, String)]) -> Result<Vec<Value>> {
        let path = self.data_path(resource);
        self.pager
            .collect(resource.path(), |req| self.fetch_page(&path, req, extra))
            .await
    }

    async fn fetch_mapped<T>(
        &self,
        entity_type: EntityType,
        map: impl Fn(Resource, &str, Value) -> Result<T>,
    ) -> Result<FetchResult<T>> {
        let mut result = FetchResult::default();
        for &resource in Resource::for_entity(entity_type) {
            let values = self.fetch_all(resource, &[]).await?;
            info!(resource = resource.path(), count = values.len(), "Fetched Ed-Fi resource");
            for value in values {
                let id = value.get("id").and_then(Value::as_str).map(str::to_string);
                result.push(map(resource, &self.tenant_id, value), id);
            }
        }
        Ok(result)
    }

    async fn available_change_versions(&self) -> Result<AvailableChangeVersions> {
        let response = self
            .client
            .get_with_retry(&self.change_versions_path(), &[])
            .await
            .map_err(change_query_error)?;
        serde_json::from_value(response.body).map_err(|e| {
            SyncError::Provider(format!("invalid availableChangeVersions response: {e}"))
        })
    }
}

/// A 404 from the change-query surface means the ODS has change queries
/// disabled (or predates them).
fn change_query_error(e: SyncError) -> SyncError {
    match e {
        SyncError::NotFound(path) => {
            SyncError::CapabilityUnsupported(format!("change queries unavailable: {path}"))
        }
        other => other,
    }
}

#[async_trait]
impl ProviderAdapter for EdFiAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::EdFi
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_delta: true,
            supports_deletion_detection: true,
            supports_modified_since: false,
        }
    }

    #[instrument(skip(self, credentials), fields(tenant = %self.tenant_id, provider = %self.provider_id))]
    async fn initialize(&self, credentials: &Credentials) -> Result<()> {
        let token_url = format!("{}/oauth/token", self.client.base_url());
        let manager =
            self.ctx
                .token_manager(&self.tenant_id, &self.provider_id, &token_url, credentials)?;
        manager.access_token().await?;
        self.client.set_token_manager(manager).await;
        info!("Ed-Fi adapter initialized");
        Ok(())
    }

    async fn fetch_schools(&self, _query: &FetchQuery) -> Result<FetchResult<School>> {
        self.fetch_mapped(EntityType::School, |_, tenant, v| {
            EdFiMapper::map_school(tenant, v)
        })
        .await
    }

    async fn fetch_terms(&self, _query: &FetchQuery) -> Result<FetchResult<Term>> {
        self.fetch_mapped(EntityType::Term, |_, tenant, v| {
            EdFiMapper::map_session(tenant, v)
        })
        .await
    }

    async fn fetch_classes(&self, _query: &FetchQuery) -> Result<FetchResult<Class>> {
        self.fetch_mapped(EntityType::Class, |_, tenant, v| {
            EdFiMapper::map_section(tenant, v)
        })
        .await
    }

    async fn fetch_users(&self, _query: &FetchQuery) -> Result<FetchResult<User>> {
        self.fetch_mapped(EntityType::User, EdFiMapper::map_user).await
    }

    async fn fetch_enrollments(&self, _query: &FetchQuery) -> Result<FetchResult<Enrollment>> {
        self.fetch_mapped(EntityType::Enrollment, EdFiMapper::map_enrollment)
            .await
    }

    async fn fetch_relationships(&self, _query: &FetchQuery) -> Result<FetchResult<Relationship>> {
        self.fetch_mapped(EntityType::Relationship, |_, tenant, v| {
            EdFiMapper::map_relationship(tenant, v)
        })
        .await
    }

    #[instrument(skip(self), fields(tenant = %self.tenant_id, provider = %self.provider_id))]
    async fn fetch_delta(
        &self,
        entity_type: EntityType,
        min_change_version: i64,
    ) -> Result<ChangeBatch> {
        let versions = self.available_change_versions().await?;
        let newest = versions.newest_change_version;
        if newest <= min_change_version {
            debug!(newest, min_change_version, "No new change versions");
            return Ok(ChangeBatch {
                changes: Vec::new(),
                max_change_version: Some(min_change_version),
                rejected: Vec::new(),
            });
        }

        // The ODS bounds are inclusive and the cursor has been consumed.
        let lower = if min_change_version == 0 {
            0
        } else {
            min_change_version + 1
        };
        let window = [
            ("minChangeVersion".to_string(), lower.to_string()),
            ("maxChangeVersion".to_string(), newest.to_string()),
        ];
        let upsert_type = if min_change_version == 0 {
            ChangeType::Add
        } else {
            ChangeType::Update
        };

        let mut batch = ChangeBatch {
            changes: Vec::new(),
            max_change_version: Some(newest),
            rejected: Vec::new(),
        };

        for &resource in Resource::for_entity(entity_type) {
            // Deletes first so a delete-then-recreate inside one window ends active.
            let deletes_path = format!("{}/deletes", self.data_path(resource));
            let deleted = self
                .pager
                .collect(resource.path(), |req| self.fetch_page(&deletes_path, req, &window))
                .await
                .map_err(change_query_error)?;
            for value in deleted {
                let parsed: std::result::Result<DeletedResource, _> = serde_json::from_value(value);
                match parsed
                    .map_err(|e| SyncError::MalformedRecord(format!("{}: {e}", resource.path())))
                    .and_then(|d| {
                        EdFiMapper::delete_source_id(resource, &d)
                            .map(|id| (id, d.change_version.unwrap_or(newest)))
                    }) {
                    Ok((source_id, change_version)) => batch.changes.push(NativeChange {
                        source_id,
                        change_version,
                        change_type: ChangeType::Delete,
                        target: None,
                    }),
                    Err(e) => batch.rejected.push(RejectedRecord::new(None, e.to_string())),
                }
            }

            let path = self.data_path(resource);
            let upserts = self
                .pager
                .collect(resource.path(), |req| self.fetch_page(&path, req, &window))
                .await
                .map_err(change_query_error)?;
            for value in upserts {
                let id = value.get("id").and_then(Value::as_str).map(str::to_string);
                match EdFiMapper::map(resource, &self.tenant_id, value) {
                    Ok(entity) => batch.changes.push(NativeChange {
                        source_id: entity.source_id().to_string(),
                        change_version: newest,
                        change_type: upsert_type,
                        target: Some(entity),
                    }),
                    Err(e) => batch.rejected.push(RejectedRecord::new(id, e.to_string())),
                }
            }
        }

        info!(
            entity_type = %entity_type,
            count = batch.changes.len(),
            rejected = batch.rejected.len(),
            min_change_version,
            max_change_version = newest,
            "Fetched Ed-Fi changes"
        );
        Ok(batch)
    }

    /// Fails when any record cannot be keyed: an incomplete ID set would
    /// turn that record into a deletion.
    async fn get_all_source_ids(&self, entity_type: EntityType) -> Result<Vec<String>> {
        let mut ids = Vec::new();
        let mut unkeyed = 0usize;
        for &resource in Resource::for_entity(entity_type) {
            for value in self.fetch_all(resource, &[]).await? {
                match EdFiMapper::source_id(resource, &value) {
                    Ok(id) => ids.push(id),
                    Err(e) => {
                        unkeyed += 1;
                        debug!(resource = resource.path(), error = %e, "Unkeyable record");
                    }
                }
            }
        }
        if unkeyed > 0 {
            warn!(entity_type = %entity_type, unkeyed, "Records without a usable key");
            return Err(SyncError::MalformedRecord(format!(
                "{unkeyed} {entity_type} records have no usable key, id set incomplete"
            )));
        }
        Ok(ids)
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(manager) = self.client.token_manager().await {
            manager.discard().await?;
        }
        Ok(())
    }
}
