use crate::errors::ServerError;
use chrono::{NaiveDateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::db::connection::Database;

/// What a sync execution did, record by record.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub processed: u32,
    pub created: u32,
    pub updated: u32,
    pub skipped: u32,
    pub failed: u32,
}

/// One per-record failure captured during a run. The run keeps going.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncRecordError {
    pub record_id: String,
    pub message: String,
    pub timestamp: NaiveDateTime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncKind {
    Pull,
    Push,
    Full,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Pull => "pull",
            SyncKind::Push => "push",
            SyncKind::Full => "full",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ServerError> {
        match s {
            "pull" => Ok(SyncKind::Pull),
            "push" => Ok(SyncKind::Push),
            "full" => Ok(SyncKind::Full),
            other => Err(ServerError::Validation(format!(
                "unknown sync kind: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Running,
    Completed,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Running => "running",
            SyncRunStatus::Completed => "completed",
            SyncRunStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Result<Self, ServerError> {
        match s {
            "running" => Ok(SyncRunStatus::Running),
            "completed" => Ok(SyncRunStatus::Completed),
            "failed" => Ok(SyncRunStatus::Failed),
            other => Err(ServerError::Validation(format!(
                "unknown sync run status: {other}"
            ))),
        }
    }
}

/// Audit record for one sync execution. Mutated in place while running,
/// left alone once it reaches completed or failed.
#[derive(Debug, Serialize)]
pub struct SyncRun {
    pub id: i64,
    pub kind: SyncKind,
    pub status: SyncRunStatus,
    pub started_at: NaiveDateTime,
    pub completed_at: Option<NaiveDateTime>,
    pub summary: SyncSummary,
    pub errors: Vec<SyncRecordError>,
    pub error_message: Option<String>,
    pub triggered_by: Option<i64>,
}

pub fn start_run(
    db: &Database,
    kind: SyncKind,
    triggered_by: Option<i64>,
) -> Result<i64, ServerError> {
    let now = Utc::now().naive_utc();
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO sync_runs (kind, status, started_at, triggered_by) VALUES (?1, ?2, ?3, ?4)",
            params![
                kind.as_str(),
                SyncRunStatus::Running.as_str(),
                now,
                triggered_by
            ],
        )?;
        Ok(conn.last_insert_rowid())
    })
}

/// Stamps the summary and marks the run completed. Individual record failures
/// do not prevent completion; they live in the errors column.
pub fn finish_run(
    db: &Database,
    run_id: i64,
    summary: &SyncSummary,
    errors: &[SyncRecordError],
) -> Result<NaiveDateTime, ServerError> {
    let now = Utc::now().naive_utc();
    let errors_json = serde_json::to_string(errors)
        .map_err(|e| ServerError::DbError(format!("serialize sync errors: {e}")))?;

    db.with_conn(|conn| {
        conn.execute(
            r#"
            UPDATE sync_runs
            SET status = ?1, completed_at = ?2,
                processed = ?3, created = ?4, updated = ?5, skipped = ?6, failed = ?7,
                errors = ?8
            WHERE id = ?9
            "#,
            params![
                SyncRunStatus::Completed.as_str(),
                now,
                summary.processed,
                summary.created,
                summary.updated,
                summary.skipped,
                summary.failed,
                errors_json,
                run_id,
            ],
        )?;
        Ok(now)
    })
}

/// Marks a run failed before it could process records (auth failure, transport
/// failure on the fetch). A failed run never becomes a watermark.
pub fn fail_run(db: &Database, run_id: i64, message: &str) -> Result<(), ServerError> {
    let now = Utc::now().naive_utc();
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE sync_runs SET status = ?1, completed_at = ?2, error_message = ?3 WHERE id = ?4",
            params![SyncRunStatus::Failed.as_str(), now, message, run_id],
        )?;
        Ok(())
    })
}

/// The watermark source: completion time of the most recent successfully
/// completed run of this kind.
pub fn last_completed(db: &Database, kind: SyncKind) -> Result<Option<SyncRun>, ServerError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(&format!(
            "{SELECT_RUN} WHERE kind = ?1 AND status = ?2 ORDER BY completed_at DESC LIMIT 1"
        ))?;
        let run = stmt
            .query_row(
                params![kind.as_str(), SyncRunStatus::Completed.as_str()],
                row_to_run,
            )
            .optional()?;
        run.map(finish_row).transpose()
    })
}

/// Recent runs for the admin listing, optionally filtered by kind and status.
pub fn recent_runs(
    db: &Database,
    kind: Option<SyncKind>,
    status: Option<SyncRunStatus>,
    limit: usize,
) -> Result<Vec<SyncRun>, ServerError> {
    db.with_conn(|conn| {
        let mut sql = String::from(SELECT_RUN);
        sql.push_str(" WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
        if let Some(kind) = kind {
            sql.push_str(" AND kind = ?");
            args.push(Box::new(kind.as_str()));
        }
        if let Some(status) = status {
            sql.push_str(" AND status = ?");
            args.push(Box::new(status.as_str()));
        }
        sql.push_str(" ORDER BY started_at DESC, id DESC LIMIT ?");
        args.push(Box::new(limit as i64));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(args.iter()), row_to_run)?;

        let mut runs = Vec::new();
        for row in rows {
            runs.push(finish_row(row?)?);
        }
        Ok(runs)
    })
}

const SELECT_RUN: &str = r#"
    SELECT id, kind, status, started_at, completed_at,
           processed, created, updated, skipped, failed,
           errors, error_message, triggered_by
    FROM sync_runs
"#;

// Raw row before the text columns are parsed into enums/structs.
type RawRun = (SyncRun, String, String, String);

fn row_to_run(row: &rusqlite::Row<'_>) -> rusqlite::Result<RawRun> {
    let kind_text: String = row.get(1)?;
    let status_text: String = row.get(2)?;
    let errors_text: String = row.get(10)?;
    Ok((
        SyncRun {
            id: row.get(0)?,
            kind: SyncKind::Pull,           // patched in finish_row
            status: SyncRunStatus::Running, // patched in finish_row
            started_at: row.get(3)?,
            completed_at: row.get(4)?,
            summary: SyncSummary {
                processed: row.get(5)?,
                created: row.get(6)?,
                updated: row.get(7)?,
                skipped: row.get(8)?,
                failed: row.get(9)?,
            },
            errors: Vec::new(),
            error_message: row.get(11)?,
            triggered_by: row.get(12)?,
        },
        kind_text,
        status_text,
        errors_text,
    ))
}

fn finish_row(raw: RawRun) -> Result<SyncRun, ServerError> {
    let (mut run, kind_text, status_text, errors_text) = raw;
    run.kind = SyncKind::parse(&kind_text)
        .map_err(|_| ServerError::DbError(format!("corrupt sync kind in storage: {kind_text}")))?;
    run.status = SyncRunStatus::parse(&status_text).map_err(|_| {
        ServerError::DbError(format!("corrupt sync status in storage: {status_text}"))
    })?;
    run.errors = serde_json::from_str(&errors_text)
        .map_err(|e| ServerError::DbError(format!("corrupt sync error list: {e}")))?;
    Ok(run)
}

/// Used by tests to assert nothing advanced.
#[allow(dead_code)]
pub fn get_run(db: &Database, run_id: i64) -> Result<SyncRun, ServerError> {
    db.with_conn(|conn| get_run_conn(conn, run_id))
}

fn get_run_conn(conn: &Connection, run_id: i64) -> Result<SyncRun, ServerError> {
    let mut stmt = conn.prepare(&format!("{SELECT_RUN} WHERE id = ?1"))?;
    let raw = stmt
        .query_row(params![run_id], row_to_run)
        .optional()?
        .ok_or(ServerError::NotFound)?;
    finish_row(raw)
}
