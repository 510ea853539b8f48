//! The mapping store (C4): an embedded, transactional, single-writer,
//! crash-safe SQLite database holding `projects` and `issues` rows — the
//! sole source of truth for "do A and B refer to the same logical issue?".
//!
//! Writes are serialized by `tokio_rusqlite::Connection` (one actor thread
//! owns the connection); readers always see a consistent snapshot of a
//! single row. WAL mode keeps concurrent reads cheap while writes are
//! serialized.

use std::path::Path;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio_rusqlite::Connection;
use uuid::Uuid;

use crate::types::{CrossIds, Issue, IssueStatus, ParentIds, Priority, Project, SourceObservations, Tombstones};

#[derive(Debug, Error)]
pub enum MappingStoreError {
    #[error("database error: {0}")]
    Db(#[from] tokio_rusqlite::Error),
    #[error("unknown project: {0}")]
    UnknownProject(String),
    #[error("corrupt row: {0}")]
    CorruptRow(String),
}

pub type Result<T> = std::result::Result<T, MappingStoreError>;

fn enum_to_sql<T: serde::Serialize>(val: &T) -> String {
    let s = serde_json::to_string(val).expect("serialize enum");
    s.trim_matches('"').to_string()
}

fn enum_from_sql<T: serde::de::DeserializeOwned>(raw: &str) -> T {
    let quoted = format!("\"{}\"", raw);
    serde_json::from_str(&quoted).expect("deserialize enum")
}

fn ts_to_sql(ts: Option<DateTime<Utc>>) -> Option<String> {
    ts.map(|t| t.to_rfc3339())
}

fn ts_from_sql(raw: Option<String>) -> Option<DateTime<Utc>> {
    raw.and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|d| d.with_timezone(&Utc))
}

/// Async SQLite-backed mapping store.
pub struct MappingStore {
    conn: Connection,
}

impl MappingStore {
    /// Open (or create) the mapping store at the given file path (`DB_PATH`).
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    /// In-memory store, used by tests and by the dry-run CLI entrypoint.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        let store = Self { conn };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<()> {
        self.conn
            .call(|conn| {
                conn.execute_batch(
                    "
                    PRAGMA journal_mode=WAL;
                    PRAGMA synchronous=NORMAL;
                    PRAGMA cache_size=-64000;
                    PRAGMA mmap_size=268435456;
                    PRAGMA temp_store=MEMORY;
                    PRAGMA busy_timeout=5000;
                    PRAGMA foreign_keys=ON;

                    CREATE TABLE IF NOT EXISTS projects (
                        project_identifier TEXT PRIMARY KEY,
                        display_name       TEXT NOT NULL,
                        filesystem_path    TEXT,
                        v_project_id       TEXT,
                        last_sync_at       TEXT,
                        external_agent_id  TEXT
                    );

                    CREATE TABLE IF NOT EXISTS issues (
                        project_identifier TEXT NOT NULL REFERENCES projects(project_identifier),
                        h_identifier        TEXT NOT NULL,
                        title                TEXT NOT NULL,
                        description          TEXT NOT NULL DEFAULT '',
                        status               TEXT NOT NULL,
                        priority             TEXT NOT NULL,
                        h_id                 TEXT,
                        v_task_id            TEXT,
                        b_issue_id           TEXT,
                        parent_h_id          TEXT,
                        parent_v_id          TEXT,
                        parent_b_id          TEXT,
                        modified_at_h        TEXT,
                        modified_at_v        TEXT,
                        modified_at_b        TEXT,
                        status_h             TEXT,
                        status_v             TEXT,
                        status_b             TEXT,
                        sub_issue_count      INTEGER NOT NULL DEFAULT 0,
                        deleted_from_v       INTEGER NOT NULL DEFAULT 0,
                        deleted_from_b       INTEGER NOT NULL DEFAULT 0,
                        PRIMARY KEY (project_identifier, h_identifier)
                    );

                    CREATE INDEX IF NOT EXISTS idx_issues_project  ON issues(project_identifier);
                    CREATE INDEX IF NOT EXISTS idx_issues_b_id     ON issues(b_issue_id);
                    CREATE INDEX IF NOT EXISTS idx_issues_v_id     ON issues(v_task_id);
                    CREATE INDEX IF NOT EXISTS idx_issues_title    ON issues(project_identifier, title);
                    ",
                )?;
                Ok(())
            })
            .await
            .map_err(MappingStoreError::from)
    }

    // -----------------------------------------------------------------------
    // Projects
    // -----------------------------------------------------------------------

    pub async fn upsert_project(&self, project: &Project) -> Result<()> {
        let p = project.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO projects (project_identifier, display_name, filesystem_path, v_project_id, last_sync_at, external_agent_id)
                     VALUES (?1,?2,?3,?4,?5,?6)
                     ON CONFLICT(project_identifier) DO UPDATE SET
                        display_name=excluded.display_name,
                        filesystem_path=COALESCE(excluded.filesystem_path, projects.filesystem_path),
                        v_project_id=COALESCE(excluded.v_project_id, projects.v_project_id),
                        last_sync_at=COALESCE(excluded.last_sync_at, projects.last_sync_at),
                        external_agent_id=COALESCE(excluded.external_agent_id, projects.external_agent_id)",
                    rusqlite::params![
                        p.project_identifier,
                        p.display_name,
                        p.filesystem_path,
                        p.v_project_id.map(|u| u.to_string()),
                        ts_to_sql(p.last_sync_at),
                        p.external_agent_id,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(MappingStoreError::from)
    }

    pub async fn get_project(&self, project_identifier: &str) -> Result<Option<Project>> {
        let key = project_identifier.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT project_identifier, display_name, filesystem_path, v_project_id, last_sync_at, external_agent_id
                     FROM projects WHERE project_identifier = ?1",
                )?;
                let mut rows = stmt.query(rusqlite::params![key])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_project(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(MappingStoreError::from)
    }

    // -----------------------------------------------------------------------
    // Issues
    // -----------------------------------------------------------------------

    /// Upsert an issue row. Retains existing cross-IDs/parents/statuses when
    /// the new value is `None` (partial updates never clobber known state),
    /// and clamps each `modified_at_<source>` to be monotonic (invariant 3).
    pub async fn upsert_issue(&self, issue: &Issue) -> Result<()> {
        let existing = self.get_issue(&issue.project_identifier, &issue.h_identifier).await?;
        let merged = match existing {
            Some(current) => merge_issue(current, issue.clone()),
            None => issue.clone(),
        };
        let i = merged;

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO issues (
                        project_identifier, h_identifier, title, description, status, priority,
                        h_id, v_task_id, b_issue_id, parent_h_id, parent_v_id, parent_b_id,
                        modified_at_h, modified_at_v, modified_at_b,
                        status_h, status_v, status_b,
                        sub_issue_count, deleted_from_v, deleted_from_b
                     ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18,?19,?20,?21)
                     ON CONFLICT(project_identifier, h_identifier) DO UPDATE SET
                        title=excluded.title, description=excluded.description,
                        status=excluded.status, priority=excluded.priority,
                        h_id=excluded.h_id, v_task_id=excluded.v_task_id, b_issue_id=excluded.b_issue_id,
                        parent_h_id=excluded.parent_h_id, parent_v_id=excluded.parent_v_id, parent_b_id=excluded.parent_b_id,
                        modified_at_h=excluded.modified_at_h, modified_at_v=excluded.modified_at_v, modified_at_b=excluded.modified_at_b,
                        status_h=excluded.status_h, status_v=excluded.status_v, status_b=excluded.status_b,
                        sub_issue_count=excluded.sub_issue_count,
                        deleted_from_v=excluded.deleted_from_v, deleted_from_b=excluded.deleted_from_b",
                    rusqlite::params![
                        i.project_identifier,
                        i.h_identifier,
                        i.title,
                        i.description,
                        enum_to_sql(&i.status),
                        enum_to_sql(&i.priority),
                        i.cross_ids.h_id,
                        i.cross_ids.v_task_id.map(|u| u.to_string()),
                        i.cross_ids.b_issue_id,
                        i.parent_ids.parent_h_id,
                        i.parent_ids.parent_v_id.map(|u| u.to_string()),
                        i.parent_ids.parent_b_id,
                        ts_to_sql(i.observations.modified_at_h),
                        ts_to_sql(i.observations.modified_at_v),
                        ts_to_sql(i.observations.modified_at_b),
                        i.observations.status_h,
                        i.observations.status_v,
                        i.observations.status_b,
                        i.sub_issue_count,
                        i.tombstones.deleted_from_v as i64,
                        i.tombstones.deleted_from_b as i64,
                    ],
                )?;
                Ok(())
            })
            .await
            .map_err(MappingStoreError::from)
    }

    pub async fn get_issue(&self, project_identifier: &str, h_identifier: &str) -> Result<Option<Issue>> {
        let project = project_identifier.to_string();
        let h_identifier = h_identifier.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE project_identifier = ?1 AND h_identifier = ?2", SELECT_ISSUE))?;
                let mut rows = stmt.query(rusqlite::params![project, h_identifier])?;
                match rows.next()? {
                    Some(row) => Ok(Some(row_to_issue(row)?)),
                    None => Ok(None),
                }
            })
            .await
            .map_err(MappingStoreError::from)
    }

    /// All issues in a project — used to build the dedupe index (C3).
    pub async fn get_project_issues(&self, project_identifier: &str) -> Result<Vec<Issue>> {
        let project = project_identifier.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!("{} WHERE project_identifier = ?1", SELECT_ISSUE))?;
                let mut rows = stmt.query(rusqlite::params![project])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_issue(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(MappingStoreError::from)
    }

    /// Reconciliation scan: issues mapped to a V task.
    pub async fn get_issues_with_v_id(&self, project_identifier: &str) -> Result<Vec<Issue>> {
        let project = project_identifier.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE project_identifier = ?1 AND v_task_id IS NOT NULL",
                    SELECT_ISSUE
                ))?;
                let mut rows = stmt.query(rusqlite::params![project])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_issue(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(MappingStoreError::from)
    }

    /// Reconciliation scan: issues mapped to a B issue.
    pub async fn get_issues_with_b_id(&self, project_identifier: &str) -> Result<Vec<Issue>> {
        let project = project_identifier.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "{} WHERE project_identifier = ?1 AND b_issue_id IS NOT NULL",
                    SELECT_ISSUE
                ))?;
                let mut rows = stmt.query(rusqlite::params![project])?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    out.push(row_to_issue(row)?);
                }
                Ok(out)
            })
            .await
            .map_err(MappingStoreError::from)
    }

    /// Set the sticky `deleted_from_v` tombstone without touching any other field.
    pub async fn mark_deleted_from_v(&self, project_identifier: &str, h_identifier: &str) -> Result<()> {
        let project = project_identifier.to_string();
        let h = h_identifier.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE issues SET deleted_from_v = 1 WHERE project_identifier = ?1 AND h_identifier = ?2",
                    rusqlite::params![project, h],
                )?;
                Ok(())
            })
            .await
            .map_err(MappingStoreError::from)
    }

    pub async fn mark_deleted_from_b(&self, project_identifier: &str, h_identifier: &str) -> Result<()> {
        let project = project_identifier.to_string();
        let h = h_identifier.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE issues SET deleted_from_b = 1 WHERE project_identifier = ?1 AND h_identifier = ?2",
                    rusqlite::params![project, h],
                )?;
                Ok(())
            })
            .await
            .map_err(MappingStoreError::from)
    }

    /// Reconciliation action when `RECONCILIATION_ACTION=hard_delete`: remove
    /// the row entirely rather than leaving a tombstone.
    pub async fn hard_delete_issue(&self, project_identifier: &str, h_identifier: &str) -> Result<()> {
        let project = project_identifier.to_string();
        let h = h_identifier.to_string();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM issues WHERE project_identifier = ?1 AND h_identifier = ?2",
                    rusqlite::params![project, h],
                )?;
                Ok(())
            })
            .await
            .map_err(MappingStoreError::from)
    }
}

const SELECT_ISSUE: &str = "SELECT project_identifier, h_identifier, title, description, status, priority, \
     h_id, v_task_id, b_issue_id, parent_h_id, parent_v_id, parent_b_id, \
     modified_at_h, modified_at_v, modified_at_b, status_h, status_v, status_b, \
     sub_issue_count, deleted_from_v, deleted_from_b FROM issues";

/// Merge a freshly observed issue into the previously stored row: unset
/// fields on `new` retain the old value; `modified_at_*` is clamped to
/// monotonic non-decreasing per source (invariant 3); tombstones are sticky
/// and only ever flip from false to true here (invariant 4 enforcement lives
/// in the explicit `mark_deleted_from_*` calls, not in plain upserts, so a
/// plain re-observation can never accidentally clear one).
fn merge_issue(old: Issue, new: Issue) -> Issue {
    Issue {
        project_identifier: new.project_identifier,
        h_identifier: new.h_identifier,
        title: new.title,
        description: new.description,
        status: new.status,
        priority: new.priority,
        cross_ids: CrossIds {
            h_id: new.cross_ids.h_id.or(old.cross_ids.h_id),
            v_task_id: new.cross_ids.v_task_id.or(old.cross_ids.v_task_id),
            b_issue_id: new.cross_ids.b_issue_id.or(old.cross_ids.b_issue_id),
        },
        parent_ids: ParentIds {
            parent_h_id: new.parent_ids.parent_h_id.or(old.parent_ids.parent_h_id),
            parent_v_id: new.parent_ids.parent_v_id.or(old.parent_ids.parent_v_id),
            parent_b_id: new.parent_ids.parent_b_id.or(old.parent_ids.parent_b_id),
        },
        observations: SourceObservations {
            modified_at_h: clamp_monotonic(old.observations.modified_at_h, new.observations.modified_at_h),
            modified_at_v: clamp_monotonic(old.observations.modified_at_v, new.observations.modified_at_v),
            modified_at_b: clamp_monotonic(old.observations.modified_at_b, new.observations.modified_at_b),
            status_h: new.observations.status_h.or(old.observations.status_h),
            status_v: new.observations.status_v.or(old.observations.status_v),
            status_b: new.observations.status_b.or(old.observations.status_b),
        },
        sub_issue_count: new.sub_issue_count,
        tombstones: Tombstones {
            deleted_from_v: old.tombstones.deleted_from_v || new.tombstones.deleted_from_v,
            deleted_from_b: old.tombstones.deleted_from_b || new.tombstones.deleted_from_b,
        },
    }
}

fn clamp_monotonic(old: Option<DateTime<Utc>>, new: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (old, new) {
        (Some(o), Some(n)) => Some(if n >= o { n } else { o }),
        (None, Some(n)) => Some(n),
        (old, None) => old,
    }
}

fn row_to_project(row: &rusqlite::Row<'_>) -> rusqlite::Result<Project> {
    let v_project_id: Option<String> = row.get(3)?;
    let last_sync_at: Option<String> = row.get(4)?;
    Ok(Project {
        project_identifier: row.get(0)?,
        display_name: row.get(1)?,
        filesystem_path: row.get(2)?,
        v_project_id: v_project_id.and_then(|s| Uuid::parse_str(&s).ok()),
        last_sync_at: ts_from_sql(last_sync_at),
        external_agent_id: row.get(5)?,
    })
}

fn row_to_issue(row: &rusqlite::Row<'_>) -> rusqlite::Result<Issue> {
    let status_str: String = row.get(4)?;
    let priority_str: String = row.get(5)?;
    let v_task_id: Option<String> = row.get(7)?;
    let parent_v_id: Option<String> = row.get(10)?;
    let modified_at_h: Option<String> = row.get(12)?;
    let modified_at_v: Option<String> = row.get(13)?;
    let modified_at_b: Option<String> = row.get(14)?;
    let deleted_from_v: i64 = row.get(19)?;
    let deleted_from_b: i64 = row.get(20)?;

    Ok(Issue {
        project_identifier: row.get(0)?,
        h_identifier: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        status: enum_from_sql::<IssueStatus>(&status_str),
        priority: enum_from_sql::<Priority>(&priority_str),
        cross_ids: CrossIds {
            h_id: row.get(6)?,
            v_task_id: v_task_id.and_then(|s| Uuid::parse_str(&s).ok()),
            b_issue_id: row.get(8)?,
        },
        parent_ids: ParentIds {
            parent_h_id: row.get(9)?,
            parent_v_id: parent_v_id.and_then(|s| Uuid::parse_str(&s).ok()),
            parent_b_id: row.get(11)?,
        },
        observations: SourceObservations {
            modified_at_h: ts_from_sql(modified_at_h),
            modified_at_v: ts_from_sql(modified_at_v),
            modified_at_b: ts_from_sql(modified_at_b),
            status_h: row.get(15)?,
            status_v: row.get(16)?,
            status_b: row.get(17)?,
        },
        sub_issue_count: row.get::<_, i64>(18)? as u32,
        tombstones: Tombstones {
            deleted_from_v: deleted_from_v != 0,
            deleted_from_b: deleted_from_b != 0,
        },
    })
}
