//! Durable job/segment/correction state, backed by an embedded relational
//! store (libsql/SQLite) configured for concurrent readers with a single
//! writer. The atomic claim primitive is the load-bearing operation here:
//! it is what lets an HTTP upload handler and a worker process share one
//! database file safely.

mod error;
mod types;

pub use error::{Error, Result};
pub use types::{Correction, Job, JobStatus, NewCorrection, NewSegment, Segment};

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use libsql::{Connection, Database, Row, params};

const BUSY_TIMEOUT_MS: u64 = 5_000;

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS jobs (
        id TEXT PRIMARY KEY,
        user_id TEXT NOT NULL,
        status TEXT NOT NULL,
        source_path TEXT NOT NULL,
        original_filename TEXT NOT NULL,
        transcript TEXT,
        processing_started INTEGER,
        processing_ended INTEGER,
        error_message TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_jobs_status ON jobs(status)",
    "CREATE INDEX IF NOT EXISTS idx_jobs_user_status ON jobs(user_id, status)",
    "CREATE TABLE IF NOT EXISTS segments (
        id TEXT PRIMARY KEY,
        job_id TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
        word TEXT NOT NULL,
        start_time REAL NOT NULL,
        end_time REAL NOT NULL,
        confidence REAL NOT NULL
    )",
    "CREATE INDEX IF NOT EXISTS idx_segments_job ON segments(job_id)",
    "CREATE INDEX IF NOT EXISTS idx_segments_job_confidence ON segments(job_id, confidence)",
    "CREATE TABLE IF NOT EXISTS corrections (
        id TEXT PRIMARY KEY,
        segment_id TEXT NOT NULL REFERENCES segments(id) ON DELETE CASCADE,
        original_text TEXT NOT NULL,
        corrected_text TEXT NOT NULL,
        trigger_confidence REAL NOT NULL,
        clip_path TEXT,
        clip_start REAL NOT NULL,
        clip_end REAL NOT NULL,
        edit_distance INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    )",
];

const JOB_COLUMNS: &str = "id, user_id, status, source_path, original_filename, transcript, \
     processing_started, processing_ended, error_message, created_at, updated_at";

fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub struct Store {
    // Kept alive for the lifetime of the store; libsql connections borrow
    // against the database's internal state.
    _db: Database,
    conn: Connection,
}

impl Store {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                libsql::Error::ConnectionFailed(format!("could not create {parent:?}: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path.as_ref()).build().await?;
        let conn = db.connect()?;

        conn.execute("PRAGMA journal_mode=WAL", ()).await?;
        conn.execute(&format!("PRAGMA busy_timeout={BUSY_TIMEOUT_MS}"), ())
            .await?;
        conn.execute("PRAGMA foreign_keys=ON", ()).await?;

        for stmt in SCHEMA {
            conn.execute(stmt, ()).await?;
        }

        Ok(Self { _db: db, conn })
    }

    /// Test/upload-handler primitive: inserts a new `PENDING` job. The HTTP
    /// upload endpoint (out of scope for this crate) is the real caller in
    /// production; tests use it to seed the queue.
    pub async fn enqueue(
        &self,
        user_id: &str,
        source_path: &str,
        original_filename: &str,
    ) -> Result<Job> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();

        self.conn
            .execute(
                "INSERT INTO jobs (id, user_id, status, source_path, original_filename, \
                 transcript, processing_started, processing_ended, error_message, \
                 created_at, updated_at) \
                 VALUES (?1, ?2, 'PENDING', ?3, ?4, NULL, NULL, NULL, NULL, ?5, ?5)",
                params![id.clone(), user_id, source_path, original_filename, now],
            )
            .await?;

        self.find_job(&id).await?.ok_or(Error::JobNotFound(id))
    }

    pub async fn find_job(&self, job_id: &str) -> Result<Option<Job>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id = ?1"),
                params![job_id],
            )
            .await?;
        match rows.next().await? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Atomically selects the oldest `PENDING` job and transitions it to
    /// `PROCESSING`. The `WHERE id = (SELECT ...) AND status = 'PENDING'`
    /// shape (rather than a separate SELECT + UPDATE) is what makes this
    /// safe under concurrent claimants: SQLite serializes the single
    /// UPDATE statement, so only one caller's subquery can still see the
    /// row as PENDING by the time the outer guard is checked.
    pub async fn claim_next_pending(&self) -> Result<Option<Job>> {
        let now = now_millis();

        let mut rows = self
            .conn
            .query(
                &format!(
                    "UPDATE jobs SET status = 'PROCESSING', processing_started = ?1, \
                     updated_at = ?1 \
                     WHERE id = (SELECT id FROM jobs WHERE status = 'PENDING' \
                                 ORDER BY created_at ASC LIMIT 1) \
                       AND status = 'PENDING' \
                     RETURNING {JOB_COLUMNS}"
                ),
                params![now],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_job(&row)?)),
            None => Ok(None),
        }
    }

    /// Bulk, all-or-nothing insert of first-pass ASR words.
    pub async fn save_segments(&self, job_id: &str, words: &[NewSegment]) -> Result<()> {
        if words.is_empty() {
            return Ok(());
        }

        let tx = self.conn.transaction().await?;
        for word in words {
            let id = uuid::Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO segments (id, job_id, word, start_time, end_time, confidence) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![id, job_id, word.word.clone(), word.start, word.end, word.confidence],
            )
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn list_segments(&self, job_id: &str) -> Result<Vec<Segment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_id, word, start_time, end_time, confidence \
                 FROM segments WHERE job_id = ?1 ORDER BY start_time ASC",
                params![job_id],
            )
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            out.push(row_to_segment(&row)?);
        }
        Ok(out)
    }

    /// Any segment fully contained in `[start, end]`; used only as a
    /// foreign-key anchor for a Correction row, never for alignment.
    pub async fn find_segment_in_range(
        &self,
        job_id: &str,
        start: f64,
        end: f64,
    ) -> Result<Option<Segment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, job_id, word, start_time, end_time, confidence \
                 FROM segments \
                 WHERE job_id = ?1 AND start_time >= ?2 AND end_time <= ?3 \
                 ORDER BY start_time ASC LIMIT 1",
                params![job_id, start, end],
            )
            .await?;

        match rows.next().await? {
            Some(row) => Ok(Some(row_to_segment(&row)?)),
            None => Ok(None),
        }
    }

    pub async fn save_correction(&self, rec: NewCorrection) -> Result<Correction> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_millis();

        self.conn
            .execute(
                "INSERT INTO corrections (id, segment_id, original_text, corrected_text, \
                 trigger_confidence, clip_path, clip_start, clip_end, edit_distance, created_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    id.clone(),
                    rec.segment_id.clone(),
                    rec.original_text.clone(),
                    rec.corrected_text.clone(),
                    rec.trigger_confidence,
                    rec.clip_path.clone(),
                    rec.clip_start,
                    rec.clip_end,
                    rec.edit_distance,
                    now,
                ],
            )
            .await?;

        Ok(Correction {
            id,
            segment_id: rec.segment_id,
            original_text: rec.original_text,
            corrected_text: rec.corrected_text,
            trigger_confidence: rec.trigger_confidence,
            clip_path: rec.clip_path,
            clip_start: rec.clip_start,
            clip_end: rec.clip_end,
            edit_distance: rec.edit_distance,
            created_at: now,
        })
    }

    pub async fn finalize_success(&self, job_id: &str, transcript: &str) -> Result<()> {
        let now = now_millis();
        self.conn
            .execute(
                "UPDATE jobs SET status = 'COMPLETED', transcript = ?1, \
                 processing_ended = ?2, updated_at = ?2 WHERE id = ?3",
                params![transcript, now, job_id],
            )
            .await?;
        Ok(())
    }

    pub async fn finalize_failure(&self, job_id: &str, error_message: &str) -> Result<()> {
        let now = now_millis();
        self.conn
            .execute(
                "UPDATE jobs SET status = 'FAILED', error_message = ?1, \
                 processing_ended = ?2, updated_at = ?2 WHERE id = ?3",
                params![error_message, now, job_id],
            )
            .await?;
        Ok(())
    }

    /// Moves jobs stuck in `PROCESSING` (from a worker that crashed
    /// mid-pipeline) to `FAILED`. Run once at worker startup, never from
    /// the main loop — see the "Orphaned PROCESSING jobs" open question.
    pub async fn sweep_stale_processing(&self, older_than: Duration) -> Result<Vec<String>> {
        let cutoff = now_millis() - older_than.as_millis() as i64;
        let now = now_millis();

        let mut rows = self
            .conn
            .query(
                "UPDATE jobs SET status = 'FAILED', \
                 error_message = 'reclaimed from stale PROCESSING state at worker startup', \
                 processing_ended = ?1, updated_at = ?1 \
                 WHERE status = 'PROCESSING' AND processing_started < ?2 \
                 RETURNING id",
                params![now, cutoff],
            )
            .await?;

        let mut ids = Vec::new();
        while let Some(row) = rows.next().await? {
            ids.push(row.get::<String>(0)?);
        }
        Ok(ids)
    }

    pub async fn count_by_status(&self) -> Result<Vec<(JobStatus, i64)>> {
        let mut rows = self
            .conn
            .query("SELECT status, COUNT(*) FROM jobs GROUP BY status", ())
            .await?;

        let mut out = Vec::new();
        while let Some(row) = rows.next().await? {
            let status = JobStatus::from_str(&row.get::<String>(0)?)?;
            let count = row.get::<i64>(1)?;
            out.push((status, count));
        }
        Ok(out)
    }
}

fn row_to_job(row: &Row) -> Result<Job> {
    Ok(Job {
        id: row.get::<String>(0)?,
        user_id: row.get::<String>(1)?,
        status: JobStatus::from_str(&row.get::<String>(2)?)?,
        source_path: row.get::<String>(3)?,
        original_filename: row.get::<String>(4)?,
        transcript: row.get::<Option<String>>(5)?,
        processing_started: row.get::<Option<i64>>(6)?,
        processing_ended: row.get::<Option<i64>>(7)?,
        error_message: row.get::<Option<String>>(8)?,
        created_at: row.get::<i64>(9)?,
        updated_at: row.get::<i64>(10)?,
    })
}

fn row_to_segment(row: &Row) -> Result<Segment> {
    Ok(Segment {
        id: row.get::<String>(0)?,
        job_id: row.get::<String>(1)?,
        word: row.get::<String>(2)?,
        start: row.get::<f64>(3)?,
        end: row.get::<f64>(4)?,
        confidence: row.get::<f64>(5)?,
    })
}
