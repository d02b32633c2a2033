//! SQLite-backed storage for captured callback sessions.

use chrono::{Duration, Utc};
use rusqlite::{params, Row};
use serde::Serialize;
use std::path::{Path, PathBuf};

use super::{parse_datetime, parse_datetime_opt, RepositoryError, Result};
use crate::models::Session;

/// Upper bound on rows examined per healthy-session query.
const HEALTHY_QUERY_LIMIT: usize = 50;

/// Default retention for retired and stale rows, in days.
pub const DEFAULT_RETENTION_DAYS: i64 = 7;

/// SQLite-backed session repository.
pub struct SessionRepository {
    db_path: PathBuf,
}

impl SessionRepository {
    /// Create a repository, initializing the schema if needed.
    pub fn new(db_path: &Path) -> Result<Self> {
        let repo = Self {
            db_path: db_path.to_path_buf(),
        };
        repo.init_schema()?;
        Ok(repo)
    }

    fn connect(&self) -> Result<rusqlite::Connection> {
        super::connect(&self.db_path)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.connect()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sessions (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                target TEXT NOT NULL,
                region TEXT NOT NULL,
                source_pool TEXT NOT NULL,
                created_at TEXT NOT NULL,
                last_used_at TEXT,
                success_count INTEGER NOT NULL DEFAULT 0,
                failure_count INTEGER NOT NULL DEFAULT 0,
                active INTEGER NOT NULL DEFAULT 1
            );
            CREATE INDEX IF NOT EXISTS idx_sessions_region_active
                ON sessions(region, active);
            CREATE INDEX IF NOT EXISTS idx_sessions_created_at
                ON sessions(created_at);
        "#,
        )?;
        Ok(())
    }

    /// Insert a new session, returning it with the assigned row id.
    pub fn insert(&self, session: &Session) -> Result<Session> {
        let conn = self.connect()?;
        conn.execute(
            r#"
            INSERT INTO sessions
                (target, region, source_pool, created_at, last_used_at,
                 success_count, failure_count, active)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
            params![
                session.target,
                session.region,
                session.source_pool,
                session.created_at.to_rfc3339(),
                session.last_used_at.map(|dt| dt.to_rfc3339()),
                session.success_count,
                session.failure_count,
                session.active,
            ],
        )?;

        let mut saved = session.clone();
        saved.id = Some(conn.last_insert_rowid());
        Ok(saved)
    }

    /// Load one session by row id.
    pub fn get(&self, id: i64) -> Result<Option<Session>> {
        let conn = self.connect()?;
        let mut stmt = conn.prepare(
            "SELECT id, target, region, source_pool, created_at, last_used_at,
                    success_count, failure_count, active
             FROM sessions WHERE id = ?1",
        )?;
        super::to_option(stmt.query_row(params![id], row_to_session))
    }

    /// Write back a mutated session. The session must have been inserted.
    pub fn update(&self, session: &Session) -> Result<()> {
        let id = session.id.ok_or(RepositoryError::Unsaved)?;
        let conn = self.connect()?;
        conn.execute(
            r#"
            UPDATE sessions
            SET last_used_at = ?1, success_count = ?2, failure_count = ?3, active = ?4
            WHERE id = ?5
            "#,
            params![
                session.last_used_at.map(|dt| dt.to_rfc3339()),
                session.success_count,
                session.failure_count,
                session.active,
                id,
            ],
        )?;
        Ok(())
    }

    /// Load healthy sessions, most recently used first.
    ///
    /// SQL narrows to active rows for the region; expiry and success-ratio
    /// checks run in memory through the same predicate callers use, so the
    /// store can never disagree with the model about health.
    pub fn healthy(&self, region: Option<&str>) -> Result<Vec<Session>> {
        let sessions = self.load_active(region, HEALTHY_QUERY_LIMIT)?;
        Ok(sessions.into_iter().filter(|s| s.is_healthy()).collect())
    }

    fn load_active(&self, region: Option<&str>, limit: usize) -> Result<Vec<Session>> {
        let conn = self.connect()?;
        let mut sql = String::from(
            "SELECT id, target, region, source_pool, created_at, last_used_at,
                    success_count, failure_count, active
             FROM sessions WHERE active = 1",
        );
        if region.is_some() {
            sql.push_str(" AND region = ?1");
        }
        sql.push_str(" ORDER BY last_used_at DESC, created_at DESC LIMIT ");
        sql.push_str(&limit.to_string());

        let mut stmt = conn.prepare(&sql)?;
        let rows = match region {
            Some(r) => stmt.query_map(params![r], row_to_session)?,
            None => stmt.query_map([], row_to_session)?,
        };
        let sessions = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// List sessions for inspection, newest first.
    pub fn list(&self, region: Option<&str>, include_retired: bool) -> Result<Vec<Session>> {
        let conn = self.connect()?;
        let mut sql = String::from(
            "SELECT id, target, region, source_pool, created_at, last_used_at,
                    success_count, failure_count, active
             FROM sessions WHERE 1 = 1",
        );
        if !include_retired {
            sql.push_str(" AND active = 1");
        }
        if region.is_some() {
            sql.push_str(" AND region = ?1");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut stmt = conn.prepare(&sql)?;
        let rows = match region {
            Some(r) => stmt.query_map(params![r], row_to_session)?,
            None => stmt.query_map([], row_to_session)?,
        };
        let sessions = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    /// Administratively deactivate a row. Returns false if the id is unknown.
    pub fn retire(&self, id: i64) -> Result<bool> {
        let conn = self.connect()?;
        let changed = conn.execute("UPDATE sessions SET active = 0 WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    }

    /// Delete rows captured more than `days` days ago. Returns rows removed.
    pub fn prune_older_than(&self, days: i64) -> Result<usize> {
        let cutoff = (Utc::now() - Duration::days(days)).to_rfc3339();
        let conn = self.connect()?;
        let removed = conn.execute(
            "DELETE FROM sessions WHERE created_at < ?1",
            params![cutoff],
        )?;
        Ok(removed)
    }

    /// Aggregate counts over the whole store.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.connect()?;
        let (total, active, successes, failures): (u32, u32, u64, u64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(active), 0),
                    COALESCE(SUM(success_count), 0),
                    COALESCE(SUM(failure_count), 0)
             FROM sessions",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        let mut stmt = conn.prepare(
            "SELECT region, COUNT(*), COALESCE(SUM(active), 0)
             FROM sessions GROUP BY region ORDER BY region",
        )?;
        let regions = stmt
            .query_map([], |row| {
                Ok(RegionCount {
                    region: row.get(0)?,
                    total: row.get(1)?,
                    active: row.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let uses = successes + failures;
        let success_rate = if uses > 0 {
            successes as f64 / uses as f64
        } else {
            0.0
        };

        Ok(StoreStats {
            total,
            active,
            regions,
            total_successes: successes,
            total_failures: failures,
            success_rate,
        })
    }
}

/// Per-region row counts.
#[derive(Debug, Clone, Serialize)]
pub struct RegionCount {
    pub region: String,
    pub total: u32,
    pub active: u32,
}

/// Store-wide aggregates for status output.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub total: u32,
    pub active: u32,
    pub regions: Vec<RegionCount>,
    pub total_successes: u64,
    pub total_failures: u64,
    pub success_rate: f64,
}

fn row_to_session(row: &Row) -> rusqlite::Result<Session> {
    Ok(Session {
        id: Some(row.get("id")?),
        target: row.get("target")?,
        region: row.get("region")?,
        source_pool: row.get("source_pool")?,
        created_at: parse_datetime(&row.get::<_, String>("created_at")?),
        last_used_at: parse_datetime_opt(row.get::<_, Option<String>>("last_used_at")?),
        success_count: row.get("success_count")?,
        failure_count: row.get("failure_count")?,
        active: row.get("active")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn test_repo() -> (TempDir, SessionRepository) {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionRepository::new(&dir.path().join("sessions.db")).unwrap();
        (dir, repo)
    }

    fn session(region: &str) -> Session {
        Session::new(
            format!("https://shopping.example.com/callback?r={region}"),
            region.to_string(),
            "pool_a".to_string(),
        )
    }

    #[test]
    fn test_insert_assigns_id_and_round_trips() {
        let (_dir, repo) = test_repo();
        let mut original = session("US-West");
        original.report_failure();
        original.report_success();

        let saved = repo.insert(&original).unwrap();
        let id = saved.id.unwrap();

        let loaded = repo.get(id).unwrap().unwrap();
        assert_eq!(loaded, saved);
        assert_eq!(loaded.success_count, 1);
        assert_eq!(loaded.failure_count, 0);
        assert!(loaded.last_used_at.is_some());
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (_dir, repo) = test_repo();
        assert!(repo.get(999).unwrap().is_none());
    }

    #[test]
    fn test_update_persists_mutations() {
        let (_dir, repo) = test_repo();
        let mut saved = repo.insert(&session("US-East")).unwrap();

        saved.report_failure();
        saved.report_failure();
        saved.report_failure();
        repo.update(&saved).unwrap();

        let loaded = repo.get(saved.id.unwrap()).unwrap().unwrap();
        assert_eq!(loaded.failure_count, 3);
        assert!(!loaded.active);
    }

    #[test]
    fn test_update_unsaved_session_is_rejected() {
        let (_dir, repo) = test_repo();
        let unsaved = session("US-West");
        assert!(matches!(
            repo.update(&unsaved),
            Err(RepositoryError::Unsaved)
        ));
    }

    #[test]
    fn test_healthy_excludes_retired_expired_and_rate_failed() {
        let (_dir, repo) = test_repo();

        let good = repo.insert(&session("US-West")).unwrap();

        let mut retired = session("US-West");
        retired.report_failure();
        retired.report_failure();
        retired.report_failure();
        repo.insert(&retired).unwrap();

        let mut expired = session("US-West");
        expired.created_at = Utc::now() - Duration::minutes(90);
        repo.insert(&expired).unwrap();

        let mut degraded = session("US-West");
        degraded.success_count = 2;
        degraded.failure_count = 3;
        repo.insert(&degraded).unwrap();

        let healthy = repo.healthy(Some("US-West")).unwrap();
        assert_eq!(healthy.len(), 1);
        assert_eq!(healthy[0].id, good.id);
    }

    #[test]
    fn test_healthy_filters_by_region() {
        let (_dir, repo) = test_repo();
        repo.insert(&session("US-West")).unwrap();
        repo.insert(&session("US-East")).unwrap();

        assert_eq!(repo.healthy(Some("US-West")).unwrap().len(), 1);
        assert_eq!(repo.healthy(None).unwrap().len(), 2);
        assert!(repo.healthy(Some("EU-Central")).unwrap().is_empty());
    }

    #[test]
    fn test_healthy_orders_most_recently_used_first() {
        let (_dir, repo) = test_repo();

        let mut used_long_ago = session("US-West");
        used_long_ago.last_used_at = Some(Utc::now() - Duration::minutes(30));
        let used_long_ago = repo.insert(&used_long_ago).unwrap();

        let mut used_recently = session("US-West");
        used_recently.last_used_at = Some(Utc::now() - Duration::minutes(1));
        let used_recently = repo.insert(&used_recently).unwrap();

        let healthy = repo.healthy(Some("US-West")).unwrap();
        assert_eq!(healthy[0].id, used_recently.id);
        assert_eq!(healthy[1].id, used_long_ago.id);
    }

    #[test]
    fn test_list_includes_retired_only_on_request() {
        let (_dir, repo) = test_repo();
        let saved = repo.insert(&session("US-West")).unwrap();
        repo.retire(saved.id.unwrap()).unwrap();

        assert!(repo.list(None, false).unwrap().is_empty());
        assert_eq!(repo.list(None, true).unwrap().len(), 1);
    }

    #[test]
    fn test_retire_marks_row_inactive() {
        let (_dir, repo) = test_repo();
        let saved = repo.insert(&session("US-West")).unwrap();
        let id = saved.id.unwrap();

        assert!(repo.retire(id).unwrap());
        let loaded = repo.get(id).unwrap().unwrap();
        assert!(!loaded.active);

        assert!(!repo.retire(12345).unwrap());
    }

    #[test]
    fn test_prune_removes_only_old_rows() {
        let (_dir, repo) = test_repo();

        let mut old = session("US-West");
        old.created_at = Utc::now() - Duration::days(10);
        repo.insert(&old).unwrap();
        repo.insert(&session("US-West")).unwrap();

        let removed = repo.prune_older_than(DEFAULT_RETENTION_DAYS).unwrap();
        assert_eq!(removed, 1);
        assert_eq!(repo.list(None, true).unwrap().len(), 1);
    }

    #[test]
    fn test_stats_aggregates() {
        let (_dir, repo) = test_repo();

        let mut west = session("US-West");
        west.success_count = 6;
        west.failure_count = 2;
        repo.insert(&west).unwrap();

        let mut east = session("US-East");
        east.active = false;
        repo.insert(&east).unwrap();

        let stats = repo.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.total_successes, 6);
        assert_eq!(stats.total_failures, 2);
        assert!((stats.success_rate - 0.75).abs() < f64::EPSILON);
        assert_eq!(stats.regions.len(), 2);
        assert_eq!(stats.regions[0].region, "US-East");
        assert_eq!(stats.regions[0].active, 0);
    }
}
