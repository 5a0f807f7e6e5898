//! Shared fixtures for unit tests.

use std::collections::{BTreeMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::{Result, SyncError};
use crate::models::class::Class;
use crate::models::common::{EntityStatus, EntityType, OrgType, UserRole};
use crate::models::enrollment::Enrollment;
use crate::models::relationship::Relationship;
use crate::models::school::School;
use crate::models::term::Term;
use crate::models::user::User;
use crate::models::delta::{ApplyOutcome, DeltaRecord};
use crate::models::CanonicalEntity;
use crate::providers::{
    Capabilities, ChangeBatch, Credentials, FetchQuery, FetchResult, ProviderAdapter, ProviderKind,
};
use crate::store::DeltaSink;
use crate::token::{AccessToken, CredentialKey, TokenSource};

pub fn credential_key() -> CredentialKey {
    CredentialKey {
        tenant_id: "t1".into(),
        provider_id: "p1".into(),
    }
}

/// Hands out `token-1`, `token-2`, ... valid for an hour.
#[derive(Default)]
pub struct SequenceTokenSource {
    calls: AtomicU32,
}

impl SequenceTokenSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenSource for SequenceTokenSource {
    async fn fetch_token(&self) -> Result<AccessToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccessToken {
            value: format!("token-{n}"),
            expires_at: Some(Utc::now() + chrono::Duration::hours(1)),
        })
    }
}

pub fn school(source_id: &str, name: &str) -> CanonicalEntity {
    School {
        source_id: source_id.into(),
        tenant_id: "t1".into(),
        name: name.into(),
        org_type: OrgType::School,
        identifier: None,
        parent_source_id: None,
        status: EntityStatus::Active,
        raw_data: serde_json::json!({"name": name}),
    }
    .into()
}

pub fn user(source_id: &str, given_name: &str) -> CanonicalEntity {
    User {
        source_id: source_id.into(),
        tenant_id: "t1".into(),
        role: UserRole::Student,
        given_name: given_name.into(),
        family_name: "Doe".into(),
        middle_name: None,
        email: None,
        username: None,
        identifier: None,
        grades: vec![],
        school_source_ids: vec![],
        enabled: true,
        status: EntityStatus::Active,
        raw_data: serde_json::Value::Null,
    }
    .into()
}

/// Sink that rejects every record.
pub struct FailingSink;

#[async_trait]
impl DeltaSink for FailingSink {
    async fn apply(&self, records: &[DeltaRecord]) -> Result<Vec<ApplyOutcome>> {
        Ok(records
            .iter()
            .map(|r| ApplyOutcome::Error(format!("constraint violation on {}", r.source_id)))
            .collect())
    }
}

/// Scriptable in-memory adapter.
pub struct MockAdapter {
    pub caps: Capabilities,
    pub records: Mutex<BTreeMap<EntityType, Vec<CanonicalEntity>>>,
    pub delta_script: Mutex<VecDeque<Result<ChangeBatch>>>,
    pub delta_calls: Mutex<Vec<(EntityType, i64)>>,
    pub fetch_calls: Mutex<Vec<(EntityType, FetchQuery)>>,
    pub failing: Mutex<HashSet<EntityType>>,
    pub init_error: Mutex<Option<SyncError>>,
    pub fetch_delay: Option<Duration>,
}

impl MockAdapter {
    pub fn new(caps: Capabilities) -> Self {
        Self {
            caps,
            records: Mutex::new(BTreeMap::new()),
            delta_script: Mutex::new(VecDeque::new()),
            delta_calls: Mutex::new(Vec::new()),
            fetch_calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            init_error: Mutex::new(None),
            fetch_delay: None,
        }
    }

    pub fn hash_only() -> Self {
        Self::new(Capabilities {
            supports_delta: false,
            supports_deletion_detection: true,
            supports_modified_since: false,
        })
    }

    pub fn set_records(&self, entity_type: EntityType, records: Vec<CanonicalEntity>) {
        self.records.lock().unwrap().insert(entity_type, records);
    }

    pub fn push_delta(&self, batch: Result<ChangeBatch>) {
        self.delta_script.lock().unwrap().push_back(batch);
    }

    pub fn fail(&self, entity_type: EntityType) {
        self.failing.lock().unwrap().insert(entity_type);
    }

    async fn fetch<T>(
        &self,
        entity_type: EntityType,
        query: &FetchQuery,
        extract: fn(CanonicalEntity) -> Option<T>,
    ) -> Result<FetchResult<T>> {
        if let Some(delay) = self.fetch_delay {
            tokio::time::sleep(delay).await;
        }
        self.fetch_calls
            .lock()
            .unwrap()
            .push((entity_type, query.clone()));
        if self.failing.lock().unwrap().contains(&entity_type) {
            return Err(SyncError::TransientNetwork(format!("{entity_type} unavailable")));
        }
        let records = self
            .records
            .lock()
            .unwrap()
            .get(&entity_type)
            .cloned()
            .unwrap_or_default();
        Ok(FetchResult {
            records: records.into_iter().filter_map(extract).collect(),
            rejected: Vec::new(),
        })
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OnerosterApi
    }

    fn tenant_id(&self) -> &str {
        "t1"
    }

    fn provider_id(&self) -> &str {
        "p1"
    }

    fn capabilities(&self) -> Capabilities {
        self.caps
    }

    async fn initialize(&self, _credentials: &Credentials) -> Result<()> {
        match self.init_error.lock().unwrap().take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    async fn fetch_schools(&self, query: &FetchQuery) -> Result<FetchResult<School>> {
        self.fetch(EntityType::School, query, |e| match e {
            CanonicalEntity::School(s) => Some(s),
            _ => None,
        })
        .await
    }

    async fn fetch_terms(&self, query: &FetchQuery) -> Result<FetchResult<Term>> {
        self.fetch(EntityType::Term, query, |e| match e {
            CanonicalEntity::Term(t) => Some(t),
            _ => None,
        })
        .await
    }

    async fn fetch_classes(&self, query: &FetchQuery) -> Result<FetchResult<Class>> {
        self.fetch(EntityType::Class, query, |e| match e {
            CanonicalEntity::Class(c) => Some(c),
            _ => None,
        })
        .await
    }

    async fn fetch_users(&self, query: &FetchQuery) -> Result<FetchResult<User>> {
        self.fetch(EntityType::User, query, |e| match e {
            CanonicalEntity::User(u) => Some(u),
            _ => None,
        })
        .await
    }

    async fn fetch_enrollments(&self, query: &FetchQuery) -> Result<FetchResult<Enrollment>> {
        self.fetch(EntityType::Enrollment, query, |e| match e {
            CanonicalEntity::Enrollment(x) => Some(x),
            _ => None,
        })
        .await
    }

    async fn fetch_relationships(&self, query: &FetchQuery) -> Result<FetchResult<Relationship>> {
        self.fetch(EntityType::Relationship, query, |e| match e {
            CanonicalEntity::Relationship(r) => Some(r),
            _ => None,
        })
        .await
    }

    async fn fetch_delta(
        &self,
        entity_type: EntityType,
        min_change_version: i64,
    ) -> Result<ChangeBatch> {
        self.delta_calls
            .lock()
            .unwrap()
            .push((entity_type, min_change_version));
        self.delta_script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ChangeBatch::default()))
    }

    async fn get_all_source_ids(&self, entity_type: EntityType) -> Result<Vec<String>> {
        if self.failing.lock().unwrap().contains(&entity_type) {
            return Err(SyncError::TransientNetwork(format!("{entity_type} unavailable")));
        }
        Ok(self
            .records
            .lock()
            .unwrap()
            .get(&entity_type)
            .map(|records| records.iter().map(|r| r.source_id().to_string()).collect())
            .unwrap_or_default())
    }
}
