use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{apply_to, check_monotonic, CanonicalRecord, DeltaSink, StateStore};
use crate::error::{Result, SyncError};
use crate::models::common::EntityType;
use crate::models::cursor::{CursorValue, SyncCursor, SyncScope};
use crate::models::delta::{ApplyOutcome, DeltaRecord};
use crate::models::sync::{SyncRunReport, SyncRunStatus, SyncStats};
use crate::token::{AccessToken, CredentialKey, CredentialStore};

/// SQLite-backed engine state. Also serves as the canonical record sink and
/// the token store of the CLI.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and run migrations.
    pub async fn connect(path: &str) -> Result<Self> {
        let pool = SqlitePool::connect(&format!("sqlite:{path}?mode=rwc")).await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// In-memory database on a single connection. Useful for testing.
    pub async fn memory() -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(pool: &SqlitePool) -> Result<()> {
        sqlx::query("PRAGMA foreign_keys = ON;")
            .execute(pool)
            .await?;

        let migrations: &[&str] = &[include_str!(
            "../../../../migrations/sqlite/001_engine_state.sql"
        )];

        for migration_sql in migrations {
            for statement in migration_sql.split(';') {
                let trimmed = strip_comments(statement);
                if !trimmed.is_empty() && !trimmed.starts_with("PRAGMA") {
                    let result = sqlx::query(&trimmed).execute(pool).await;
                    if let Err(e) = &result {
                        let msg = e.to_string();
                        if msg.contains("duplicate column") || msg.contains("already exists") {
                            continue;
                        }
                        result?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Canonical row for a source record, if the sink has ever seen it.
    pub async fn record(
        &self,
        tenant_id: &str,
        source_system: &str,
        entity_type: EntityType,
        source_id: &str,
    ) -> Result<Option<CanonicalRecord>> {
        let row = sqlx::query(
            "SELECT * FROM canonical_records
             WHERE tenant_id = ?1 AND source_system = ?2 AND entity_type = ?3 AND source_id = ?4",
        )
        .bind(tenant_id)
        .bind(source_system)
        .bind(entity_type.as_str())
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_record(&r)).transpose()
    }

    /// Active canonical rows per entity type for one source system.
    pub async fn active_counts(
        &self,
        tenant_id: &str,
        source_system: &str,
    ) -> Result<Vec<(EntityType, u64)>> {
        let rows = sqlx::query(
            "SELECT entity_type, COUNT(*) AS n FROM canonical_records
             WHERE tenant_id = ?1 AND source_system = ?2 AND active = 1
             GROUP BY entity_type",
        )
        .bind(tenant_id)
        .bind(source_system)
        .fetch_all(&self.pool)
        .await?;

        let mut counts = Vec::with_capacity(rows.len());
        for r in rows {
            let entity_type = parse_entity_type(r.get("entity_type"))?;
            let n: i64 = r.get("n");
            counts.push((entity_type, n as u64));
        }
        counts.sort_by_key(|(t, _)| *t);
        Ok(counts)
    }
}

fn strip_comments(statement: &str) -> String {
    statement
        .lines()
        .filter(|l| !l.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string()
}

fn parse_entity_type(s: String) -> Result<EntityType> {
    s.parse().map_err(SyncError::Serialization)
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| SyncError::Serialization(format!("bad timestamp {s}: {e}")))
}

fn parse_uuid(s: &str) -> Result<Uuid> {
    Uuid::parse_str(s).map_err(|e| SyncError::Serialization(format!("bad uuid {s}: {e}")))
}

fn row_to_record(r: &SqliteRow) -> Result<CanonicalRecord> {
    let data: String = r.get("data");
    let updated_at: String = r.get("updated_at");
    let entity_id: String = r.get("entity_id");
    Ok(CanonicalRecord {
        entity_id: parse_uuid(&entity_id)?,
        tenant_id: r.get("tenant_id"),
        source_system: r.get("source_system"),
        entity_type: parse_entity_type(r.get("entity_type"))?,
        source_id: r.get("source_id"),
        data: serde_json::from_str(&data)?,
        hash: r.get("hash"),
        active: r.get("active"),
        updated_at: parse_datetime(&updated_at)?,
    })
}

fn row_to_run(r: &SqliteRow) -> Result<SyncRunReport> {
    let run_id: String = r.get("run_id");
    let status: String = r.get("status");
    let started_at: String = r.get("started_at");
    let completed_at: Option<String> = r.get("completed_at");
    let stats: String = r.get("stats");
    let error_messages: String = r.get("error_messages");
    Ok(SyncRunReport {
        run_id: parse_uuid(&run_id)?,
        tenant_id: r.get("tenant_id"),
        provider_id: r.get("provider_id"),
        status: status
            .parse::<SyncRunStatus>()
            .map_err(SyncError::Serialization)?,
        started_at: parse_datetime(&started_at)?,
        completed_at: completed_at.as_deref().map(parse_datetime).transpose()?,
        stats: serde_json::from_str::<SyncStats>(&stats)?,
        error_messages: serde_json::from_str(&error_messages)?,
    })
}

#[async_trait]
impl StateStore for SqliteStore {
    async fn load_cursor(&self, scope: &SyncScope) -> Result<Option<SyncCursor>> {
        let row = sqlx::query(
            "SELECT cursor_kind, cursor_value, updated_at FROM sync_cursors
             WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.provider_id)
        .bind(scope.entity_type.as_str())
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };
        let kind: String = r.get("cursor_kind");
        let value: String = r.get("cursor_value");
        let updated_at: String = r.get("updated_at");
        let value = CursorValue::decode(&kind, &value).ok_or_else(|| {
            SyncError::Serialization(format!("unreadable {kind} cursor for {scope}: {value}"))
        })?;
        Ok(Some(SyncCursor {
            scope: scope.clone(),
            value,
            updated_at: parse_datetime(&updated_at)?,
        }))
    }

    async fn commit_cursor(&self, scope: &SyncScope, value: &CursorValue) -> Result<()> {
        let current = self.load_cursor(scope).await?;
        check_monotonic(scope, current.as_ref().map(|c| &c.value), value)?;

        sqlx::query(
            "INSERT INTO sync_cursors (tenant_id, provider_id, entity_type, cursor_kind, cursor_value, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(tenant_id, provider_id, entity_type) DO UPDATE SET
                cursor_kind = excluded.cursor_kind,
                cursor_value = excluded.cursor_value,
                updated_at = excluded.updated_at",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.provider_id)
        .bind(scope.entity_type.as_str())
        .bind(value.kind())
        .bind(value.encode())
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn clear_cursor(&self, scope: &SyncScope) -> Result<()> {
        sqlx::query(
            "DELETE FROM sync_cursors WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.provider_id)
        .bind(scope.entity_type.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load_known_ids(&self, scope: &SyncScope) -> Result<Option<HashSet<String>>> {
        let scanned = sqlx::query(
            "SELECT scanned_at FROM known_id_scans
             WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.provider_id)
        .bind(scope.entity_type.as_str())
        .fetch_optional(&self.pool)
        .await?;
        if scanned.is_none() {
            return Ok(None);
        }

        let rows = sqlx::query(
            "SELECT source_id FROM known_source_ids
             WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.provider_id)
        .bind(scope.entity_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(Some(rows.iter().map(|r| r.get("source_id")).collect()))
    }

    async fn replace_known_ids(&self, scope: &SyncScope, ids: &HashSet<String>) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "DELETE FROM known_source_ids WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.provider_id)
        .bind(scope.entity_type.as_str())
        .execute(&mut *tx)
        .await?;

        for id in ids {
            sqlx::query(
                "INSERT INTO known_source_ids (tenant_id, provider_id, entity_type, source_id)
                 VALUES (?1, ?2, ?3, ?4)",
            )
            .bind(&scope.tenant_id)
            .bind(&scope.provider_id)
            .bind(scope.entity_type.as_str())
            .bind(id)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            "INSERT INTO known_id_scans (tenant_id, provider_id, entity_type, scanned_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant_id, provider_id, entity_type) DO UPDATE SET scanned_at = excluded.scanned_at",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.provider_id)
        .bind(scope.entity_type.as_str())
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_hashes(&self, scope: &SyncScope) -> Result<HashMap<String, String>> {
        let rows = sqlx::query(
            "SELECT source_id, hash FROM record_hashes
             WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3",
        )
        .bind(&scope.tenant_id)
        .bind(&scope.provider_id)
        .bind(scope.entity_type.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| (r.get("source_id"), r.get("hash")))
            .collect())
    }

    async fn put_hashes(&self, scope: &SyncScope, hashes: &[(String, Option<String>)]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for (source_id, hash) in hashes {
            match hash {
                Some(h) => {
                    sqlx::query(
                        "INSERT INTO record_hashes (tenant_id, provider_id, entity_type, source_id, hash)
                         VALUES (?1, ?2, ?3, ?4, ?5)
                         ON CONFLICT(tenant_id, provider_id, entity_type, source_id) DO UPDATE SET hash = excluded.hash",
                    )
                    .bind(&scope.tenant_id)
                    .bind(&scope.provider_id)
                    .bind(scope.entity_type.as_str())
                    .bind(source_id)
                    .bind(h)
                    .execute(&mut *tx)
                    .await?;
                }
                None => {
                    sqlx::query(
                        "DELETE FROM record_hashes
                         WHERE tenant_id = ?1 AND provider_id = ?2 AND entity_type = ?3 AND source_id = ?4",
                    )
                    .bind(&scope.tenant_id)
                    .bind(&scope.provider_id)
                    .bind(scope.entity_type.as_str())
                    .bind(source_id)
                    .execute(&mut *tx)
                    .await?;
                }
            }
        }
        tx.commit().await?;
        Ok(())
    }

    async fn record_run(&self, report: &SyncRunReport) -> Result<()> {
        sqlx::query(
            "INSERT INTO sync_runs (run_id, tenant_id, provider_id, status, started_at, completed_at, stats, error_messages)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(run_id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at,
                stats = excluded.stats,
                error_messages = excluded.error_messages",
        )
        .bind(report.run_id.to_string())
        .bind(&report.tenant_id)
        .bind(&report.provider_id)
        .bind(report.status.as_str())
        .bind(report.started_at.to_rfc3339())
        .bind(report.completed_at.map(|t| t.to_rfc3339()))
        .bind(serde_json::to_string(&report.stats)?)
        .bind(serde_json::to_string(&report.error_messages)?)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn latest_run(
        &self,
        tenant_id: &str,
        provider_id: &str,
    ) -> Result<Option<SyncRunReport>> {
        let row = sqlx::query(
            "SELECT * FROM sync_runs WHERE tenant_id = ?1 AND provider_id = ?2
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(tenant_id)
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| row_to_run(&r)).transpose()
    }

    async fn run_count(&self, tenant_id: &str, provider_id: &str) -> Result<u64> {
        let row = sqlx::query(
            "SELECT COUNT(*) AS n FROM sync_runs WHERE tenant_id = ?1 AND provider_id = ?2",
        )
        .bind(tenant_id)
        .bind(provider_id)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n as u64)
    }

    async fn clear_provider(&self, tenant_id: &str, provider_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for table in [
            "sync_cursors",
            "known_source_ids",
            "known_id_scans",
            "record_hashes",
        ] {
            sqlx::query(&format!(
                "DELETE FROM {table} WHERE tenant_id = ?1 AND provider_id = ?2"
            ))
            .bind(tenant_id)
            .bind(provider_id)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl DeltaSink for SqliteStore {
    async fn apply(&self, records: &[DeltaRecord]) -> Result<Vec<ApplyOutcome>> {
        let mut outcomes = Vec::with_capacity(records.len());
        for record in records {
            let existing = self
                .record(
                    &record.tenant_id,
                    &record.source_system,
                    record.entity_type,
                    &record.source_id,
                )
                .await?;
            let (outcome, row) = apply_to(existing.as_ref(), record);
            if let Some(row) = row {
                sqlx::query(
                    "INSERT INTO canonical_records
                        (tenant_id, source_system, entity_type, source_id, entity_id, data, hash, active, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                     ON CONFLICT(tenant_id, source_system, entity_type, source_id) DO UPDATE SET
                        entity_id = excluded.entity_id,
                        data = excluded.data,
                        hash = excluded.hash,
                        active = excluded.active,
                        updated_at = excluded.updated_at",
                )
                .bind(&row.tenant_id)
                .bind(&row.source_system)
                .bind(row.entity_type.as_str())
                .bind(&row.source_id)
                .bind(row.entity_id.to_string())
                .bind(serde_json::to_string(&row.data)?)
                .bind(&row.hash)
                .bind(row.active)
                .bind(row.updated_at.to_rfc3339())
                .execute(&self.pool)
                .await?;
            }
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn load_token(&self, key: &CredentialKey) -> Result<Option<AccessToken>> {
        let row = sqlx::query(
            "SELECT access_token, expires_at FROM provider_tokens
             WHERE tenant_id = ?1 AND provider_id = ?2",
        )
        .bind(&key.tenant_id)
        .bind(&key.provider_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(r) = row else {
            return Ok(None);
        };
        let expires_at: Option<String> = r.get("expires_at");
        Ok(Some(AccessToken {
            value: r.get("access_token"),
            expires_at: expires_at.as_deref().map(parse_datetime).transpose()?,
        }))
    }

    async fn save_token(&self, key: &CredentialKey, token: &AccessToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO provider_tokens (tenant_id, provider_id, access_token, expires_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(tenant_id, provider_id) DO UPDATE SET
                access_token = excluded.access_token,
                expires_at = excluded.expires_at",
        )
        .bind(&key.tenant_id)
        .bind(&key.provider_id)
        .bind(&token.value)
        .bind(token.expires_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn discard_token(&self, key: &CredentialKey) -> Result<()> {
        sqlx::query("DELETE FROM provider_tokens WHERE tenant_id = ?1 AND provider_id = ?2")
            .bind(&key.tenant_id)
            .bind(&key.provider_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
