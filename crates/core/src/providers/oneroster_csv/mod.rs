//! OneRoster 1.1 CSV drops read from a local directory.
//!
//! Files are re-read on every fetch so a new drop is picked up without
//! rebuilding the adapter. A `manifest.csv` decides which files are present
//! and whether they are complete (`bulk`) or partial (`delta`).

pub mod manifest;
pub mod rows;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use self::manifest::{Manifest, ProcessingMode};
use self::rows::{AcademicSessionCsvRow, ClassCsvRow, EnrollmentCsvRow, OrgCsvRow, UserCsvRow};
use super::oneroster::mapper::derive_relationships;
use super::{
    Capabilities, Credentials, FetchQuery, FetchResult, ProviderAdapter, ProviderKind,
    RejectedRecord,
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

const ORGS: &str = "orgs.csv";
const ACADEMIC_SESSIONS: &str = "academicSessions.csv";
const CLASSES: &str = "classes.csv";
const USERS: &str = "users.csv";
const ENROLLMENTS: &str = "enrollments.csv";

/// Rows that deserialized plus the lines that did not.
struct RowSet<R> {
    rows: Vec<R>,
    rejected: Vec<RejectedRecord>,
}

trait SourcedRow {
    fn sourced_id(&self) -> &str;
}

macro_rules! impl_sourced_row {
    ($($row:ty),*) => {
        $(
            impl SourcedRow for $row {
                fn sourced_id(&self) -> &str {
                    self.sourced_id.trim()
                }
            }
        )*
    };
}

impl_sourced_row!(OrgCsvRow, AcademicSessionCsvRow, ClassCsvRow, UserCsvRow, EnrollmentCsvRow);

pub struct OneRosterCsvAdapter {
    tenant_id: String,
    provider_id: String,
    dir: PathBuf,
}

impl OneRosterCsvAdapter {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let dir = config
            .csv_dir
            .clone()
            .ok_or_else(|| SyncError::Config(format!("provider {}: csv_dir is required", config.id)))?;
        Ok(Self {
            tenant_id: config.tenant_id.clone(),
            provider_id: config.id.clone(),
            dir,
        })
    }

    fn filename(entity_type: EntityType) -> &'static str {
        match entity_type {
            EntityType::School => ORGS,
            EntityType::Term => ACADEMIC_SESSIONS,
            EntityType::Class => CLASSES,
            EntityType::User | EntityType::Relationship => USERS,
            EntityType::Enrollment => ENROLLMENTS,
        }
    }

    fn mode(&self, filename: &str) -> Result<ProcessingMode> {
        let manifest = Manifest::from_dir(&self.dir)?;
        Ok(manifest.mode(&self.dir, filename))
    }

    /// Read one CSV file on the blocking pool. `None` when the drop does not
    /// include the file.
    async fn read_file<R>(&self, filename: &'static str) -> Result<Option<RowSet<R>>>
    where
        R: DeserializeOwned + Send + 'static,
    {
        if self.mode(filename)? == ProcessingMode::Absent {
            debug!(file = filename, "File absent from drop");
            return Ok(None);
        }
        let path = self.dir.join(filename);
        let set = tokio::task::spawn_blocking(move || read_rows::<R>(&path))
            .await
            .map_err(|e| SyncError::Provider(format!("CSV reader task failed: {e}")))??;
        info!(
            file = filename,
            rows = set.rows.len(),
            rejected = set.rejected.len(),
            "Read OneRoster CSV file"
        );
        Ok(Some(set))
    }

    async fn fetch_mapped<R, T>(
        &self,
        filename: &'static str,
        map: impl Fn(&R, &str) -> Result<T>,
    ) -> Result<FetchResult<T>>
    where
        R: DeserializeOwned + SourcedRow + Send + 'static,
    {
        let Some(set) = self.read_file::<R>(filename).await? else {
            return Ok(FetchResult::default());
        };
        let mut result = FetchResult {
            records: Vec::with_capacity(set.rows.len()),
            rejected: set.rejected,
        };
        for row in &set.rows {
            let id = Some(row.sourced_id().to_string()).filter(|s| !s.is_empty());
            result.push(map(row, &self.tenant_id), id);
        }
        Ok(result)
    }

    /// Only a bulk file lists every current record.
    fn require_bulk(&self, filename: &str) -> Result<()> {
        match self.mode(filename)? {
            ProcessingMode::Bulk => Ok(()),
            ProcessingMode::Delta => Err(SyncError::CapabilityUnsupported(format!(
                "{filename} is a delta file and cannot list current IDs"
            ))),
            ProcessingMode::Absent => Err(SyncError::CapabilityUnsupported(format!(
                "{filename} is not part of this drop"
            ))),
        }
    }

    /// The sourcedId column of a bulk file.
    async fn bulk_ids(&self, filename: &'static str) -> Result<Vec<String>> {
        self.require_bulk(filename)?;
        let path = self.dir.join(filename);
        tokio::task::spawn_blocking(move || read_sourced_ids(&path))
            .await
            .map_err(|e| SyncError::Provider(format!("CSV reader task failed: {e}")))?
    }
}

fn read_rows<R: DeserializeOwned>(path: &Path) -> Result<RowSet<R>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::Headers)
        .from_path(path)
        .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;

    let mut set = RowSet {
        rows: Vec::new(),
        rejected: Vec::new(),
    };
    for result in rdr.deserialize() {
        match result {
            Ok(row) => set.rows.push(row),
            Err(e) => {
                let line = e.position().map(|p| p.line()).unwrap_or_default();
                warn!(file = %path.display(), line, error = %e, "Rejected CSV row");
                set.rejected.push(RejectedRecord::new(
                    None,
                    format!("{} line {line}: {e}", path.display()),
                ));
            }
        }
    }
    Ok(set)
}

fn read_sourced_ids(path: &Path) -> Result<Vec<String>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;
    let column = rdr
        .headers()
        .map_err(|e| SyncError::Serialization(format!("{}: {e}", path.display())))?
        .iter()
        .position(|h| h == "sourcedId")
        .ok_or_else(|| {
            SyncError::Provider(format!("{} has no sourcedId column", path.display()))
        })?;

    let mut ids = Vec::new();
    for record in rdr.records() {
        let record =
            record.map_err(|e| SyncError::Serialization(format!("{}: {e}", path.display())))?;
        if let Some(id) = record.get(column).filter(|id| !id.is_empty()) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

#[async_trait]
impl ProviderAdapter for OneRosterCsvAdapter {
    fn kind(&self) -> ProviderKind {
        ProviderKind::OnerosterCsv
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

    async fn initialize(&self, _credentials: &Credentials) -> Result<()> {
        if !self.dir.is_dir() {
            return Err(SyncError::Config(format!(
                "CSV directory not found: {}",
                self.dir.display()
            )));
        }
        let manifest = Manifest::from_dir(&self.dir)?;
        info!(
            dir = %self.dir.display(),
            manifest_version = manifest.manifest_version.as_deref().unwrap_or("none"),
            oneroster_version = manifest.oneroster_version.as_deref().unwrap_or("unknown"),
            "OneRoster CSV drop ready"
        );
        Ok(())
    }

    async fn fetch_schools(&self, _query: &FetchQuery) -> Result<FetchResult<School>> {
        self.fetch_mapped(ORGS, OrgCsvRow::to_school).await
    }

    async fn fetch_terms(&self, _query: &FetchQuery) -> Result<FetchResult<Term>> {
        self.fetch_mapped(ACADEMIC_SESSIONS, AcademicSessionCsvRow::to_term)
            .await
    }

    async fn fetch_classes(&self, _query: &FetchQuery) -> Result<FetchResult<Class>> {
        self.fetch_mapped(CLASSES, ClassCsvRow::to_class).await
    }

    async fn fetch_users(&self, _query: &FetchQuery) -> Result<FetchResult<User>> {
        self.fetch_mapped(USERS, UserCsvRow::to_user).await
    }

    async fn fetch_enrollments(&self, _query: &FetchQuery) -> Result<FetchResult<Enrollment>> {
        self.fetch_mapped(ENROLLMENTS, EnrollmentCsvRow::to_enrollment)
            .await
    }

    async fn fetch_relationships(&self, _query: &FetchQuery) -> Result<FetchResult<Relationship>> {
        let Some(set) = self.read_file::<UserCsvRow>(USERS).await? else {
            return Ok(FetchResult::default());
        };
        let links: Vec<_> = set.rows.iter().map(UserCsvRow::agent_link).collect();
        Ok(FetchResult {
            records: derive_relationships(&self.tenant_id, &links),
            rejected: set.rejected,
        })
    }

    async fn get_all_source_ids(&self, entity_type: EntityType) -> Result<Vec<String>> {
        if entity_type == EntityType::Relationship {
            self.require_bulk(USERS)?;
            let relationships = self.fetch_relationships(&FetchQuery::all()).await?;
            return Ok(relationships
                .records
                .into_iter()
                .map(|r| r.source_id)
                .collect());
        }
        self.bulk_ids(Self::filename(entity_type)).await
    }
}
