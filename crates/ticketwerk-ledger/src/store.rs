// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// SQLite-backed job ledger.
//
// One row per job id. Transitions run in IMMEDIATE transactions with
// `synchronous=FULL`, so once a call returns the new state survives a
// power cut. Payloads and rendered bytes are never stored; only the
// payload hash is kept to spot a backend re-sending a changed job.

use std::path::Path;
use std::str::FromStr;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior, params};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use ticketwerk_core::{
    AttemptToken, ErrorClass, Job, JobId, LedgerEntry, LifecycleState, Outcome, Result,
    TicketwerkError,
};

use crate::ledger::{Ledger, LedgerStats};

/// SQLite schema for the ledger table.
const CREATE_TABLE_SQL: &str = r#"
    CREATE TABLE IF NOT EXISTS ledger (
        job_id TEXT PRIMARY KEY,
        state TEXT NOT NULL,
        attempt_count INTEGER NOT NULL DEFAULT 0,
        max_attempts INTEGER NOT NULL,
        last_error TEXT,
        error_class TEXT,
        payload_hash TEXT,
        attempt_id TEXT,
        received_at TEXT NOT NULL,
        updated_at TEXT NOT NULL,
        reported INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS ledger_state ON ledger (state);
"#;

/// Column list matching `row_to_entry`.
const ENTRY_COLUMNS: &str = "job_id, state, attempt_count, max_attempts, last_error, \
     error_class, payload_hash, attempt_id, received_at, updated_at, reported";

/// How long a second process (e.g. `ticketwerk status`) waits for the lock.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Job ledger backed by a SQLite database.
pub struct JobLedger {
    conn: Mutex<Connection>,
    /// Attempt budget stamped on newly observed jobs.
    max_attempts: u32,
}

impl JobLedger {
    /// Open (or create) the ledger database at `path`.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open(path: impl AsRef<Path>, max_attempts: u32) -> Result<Self> {
        let conn = Connection::open(path.as_ref()).map_err(|e| storage("open", e))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| storage("WAL pragma", e))?;
        conn.pragma_update(None, "synchronous", "FULL")
            .map_err(|e| storage("synchronous pragma", e))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| storage("busy timeout", e))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| storage("create table", e))?;

        info!("job ledger opened");
        Ok(Self {
            conn: Mutex::new(conn),
            max_attempts,
        })
    }

    /// Open an in-memory database (useful for tests).
    pub fn open_in_memory(max_attempts: u32) -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| storage("open in-memory", e))?;
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| storage("create table", e))?;

        debug!("in-memory job ledger opened");
        Ok(Self {
            conn: Mutex::new(conn),
            max_attempts,
        })
    }

    /// All entries in `state`, oldest first.
    #[instrument(skip(self))]
    pub fn entries_in(&self, state: LifecycleState) -> Result<Vec<LedgerEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger WHERE state = ?1 ORDER BY rowid ASC"
            ))
            .map_err(|e| storage("prepare entries_in", e))?;
        let entries = stmt
            .query_map(params![state.as_str()], row_to_entry)
            .map_err(|e| storage("query entries_in", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| storage("collect rows", e))?;
        Ok(entries)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| TicketwerkError::Ledger("connection lock poisoned".into()))
    }

    /// Run `f` inside an IMMEDIATE transaction and commit if it succeeds.
    fn write<T>(&self, what: &str, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction_with_behavior(TransactionBehavior::Immediate)
            .map_err(|e| storage(what, e))?;
        let value = f(&tx)?;
        tx.commit().map_err(|e| storage(what, e))?;
        Ok(value)
    }
}

impl Ledger for JobLedger {
    #[instrument(skip(self, job, payload_hash), fields(job_id = %job.job_id))]
    fn observe(&self, job: &Job, payload_hash: &str) -> Result<LedgerEntry> {
        self.write("observe", |tx| {
            let now = Utc::now().to_rfc3339();
            let inserted = tx
                .execute(
                    "INSERT OR IGNORE INTO ledger
                     (job_id, state, attempt_count, max_attempts, payload_hash,
                      received_at, updated_at, reported)
                     VALUES (?1, ?2, 0, ?3, ?4, ?5, ?6, 0)",
                    params![
                        job.job_id.as_str(),
                        LifecycleState::Pending.as_str(),
                        self.max_attempts,
                        payload_hash,
                        job.received_at.to_rfc3339(),
                        now,
                    ],
                )
                .map_err(|e| storage("insert", e))?;

            let entry = select_entry(tx, &job.job_id)?
                .ok_or_else(|| TicketwerkError::UnknownJob(job.job_id.clone()))?;
            if inserted == 1 {
                info!(job_id = %job.job_id, "job recorded as pending");
            } else if entry.payload_hash.as_deref() != Some(payload_hash) {
                warn!(
                    job_id = %job.job_id,
                    state = %entry.state,
                    "backend re-sent job with a different payload"
                );
            }
            Ok(entry)
        })
    }

    fn entry(&self, job_id: &JobId) -> Result<Option<LedgerEntry>> {
        let conn = self.lock()?;
        select_entry(&conn, job_id)
    }

    fn is_settled(&self, job_id: &JobId) -> Result<bool> {
        let conn = self.lock()?;
        Ok(select_state(&conn, job_id)?.is_some_and(|state| state.is_settled()))
    }

    fn outcome(&self, job_id: &JobId) -> Result<Option<Outcome>> {
        let conn = self.lock()?;
        Ok(select_state(&conn, job_id)?.and_then(|state| state.outcome()))
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    fn mark_rendering(&self, job_id: &JobId) -> Result<()> {
        self.write("mark_rendering", |tx| {
            match current_state(tx, job_id)? {
                LifecycleState::Pending => {
                    set_state(tx, job_id, LifecycleState::Rendering)?;
                    Ok(())
                }
                LifecycleState::Rendering => Ok(()),
                other => Err(not_open(job_id, other)),
            }
        })
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    fn begin_attempt(&self, job_id: &JobId) -> Result<AttemptToken> {
        let token = self.write("begin_attempt", |tx| {
            let (state, attempt_count) = tx
                .query_row(
                    "SELECT state, attempt_count FROM ledger WHERE job_id = ?1",
                    params![job_id.as_str()],
                    |row| Ok((parse_state(row, 0)?, row.get::<_, u32>(1)?)),
                )
                .optional()
                .map_err(|e| storage("select", e))?
                .ok_or_else(|| TicketwerkError::UnknownJob(job_id.clone()))?;

            if !matches!(state, LifecycleState::Pending | LifecycleState::Rendering) {
                return Err(not_open(job_id, state));
            }

            let token = AttemptToken::issue(job_id.clone(), attempt_count + 1);
            tx.execute(
                "UPDATE ledger SET state = ?1, attempt_id = ?2, updated_at = ?3
                 WHERE job_id = ?4",
                params![
                    LifecycleState::Printing.as_str(),
                    token.attempt_id.to_string(),
                    Utc::now().to_rfc3339(),
                    job_id.as_str(),
                ],
            )
            .map_err(|e| storage("begin attempt", e))?;
            Ok(token)
        })?;

        info!(
            job_id = %job_id,
            attempt = token.attempt_number,
            "attempt started"
        );
        Ok(token)
    }

    #[instrument(skip(self, token), fields(job_id = %token.job_id))]
    fn commit(&self, token: &AttemptToken) -> Result<()> {
        self.write("commit", |tx| {
            let (state, attempt_id) = select_attempt(tx, &token.job_id)?;
            let same_attempt = attempt_id == Some(token.attempt_id);
            match state {
                LifecycleState::Delivered if same_attempt => {
                    debug!(job_id = %token.job_id, "commit repeated for delivered job");
                    Ok(())
                }
                LifecycleState::Printing if same_attempt => {
                    tx.execute(
                        "UPDATE ledger SET state = ?1, reported = 0, last_error = NULL,
                                error_class = NULL, updated_at = ?2
                         WHERE job_id = ?3",
                        params![
                            LifecycleState::Delivered.as_str(),
                            Utc::now().to_rfc3339(),
                            token.job_id.as_str(),
                        ],
                    )
                    .map_err(|e| storage("commit", e))?;
                    info!(job_id = %token.job_id, "job delivered");
                    Ok(())
                }
                other => Err(stale(&token.job_id, other)),
            }
        })
    }

    #[instrument(skip(self, token), fields(job_id = %token.job_id))]
    fn fail(
        &self,
        token: &AttemptToken,
        error: &str,
        class: ErrorClass,
    ) -> Result<LifecycleState> {
        self.write("fail", |tx| {
            let (state, attempt_id) = select_attempt(tx, &token.job_id)?;
            if state != LifecycleState::Printing || attempt_id != Some(token.attempt_id) {
                return Err(stale(&token.job_id, state));
            }

            let (attempt_count, max_attempts): (u32, u32) = tx
                .query_row(
                    "SELECT attempt_count, max_attempts FROM ledger WHERE job_id = ?1",
                    params![token.job_id.as_str()],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .map_err(|e| storage("select attempts", e))?;

            let attempt_count = attempt_count + 1;
            let next = if attempt_count < max_attempts {
                LifecycleState::Pending
            } else {
                LifecycleState::Failed
            };
            tx.execute(
                "UPDATE ledger SET state = ?1, attempt_count = ?2, last_error = ?3,
                        error_class = ?4, reported = 0, updated_at = ?5
                 WHERE job_id = ?6",
                params![
                    next.as_str(),
                    attempt_count,
                    error,
                    class.as_str(),
                    Utc::now().to_rfc3339(),
                    token.job_id.as_str(),
                ],
            )
            .map_err(|e| storage("fail", e))?;

            if next == LifecycleState::Failed {
                warn!(
                    job_id = %token.job_id,
                    attempts = attempt_count,
                    error,
                    "attempts exhausted, job failed"
                );
            } else {
                debug!(
                    job_id = %token.job_id,
                    attempts = attempt_count,
                    max_attempts,
                    "attempt failed, job pending again"
                );
            }
            Ok(next)
        })
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    fn reject(&self, job_id: &JobId, error: &str) -> Result<()> {
        self.write("reject", |tx| {
            let state = current_state(tx, job_id)?;
            if !matches!(state, LifecycleState::Pending | LifecycleState::Rendering) {
                return Err(not_open(job_id, state));
            }
            tx.execute(
                "UPDATE ledger SET state = ?1, last_error = ?2, error_class = ?3,
                        reported = 0, updated_at = ?4
                 WHERE job_id = ?5",
                params![
                    LifecycleState::Failed.as_str(),
                    error,
                    ErrorClass::Permanent.as_str(),
                    Utc::now().to_rfc3339(),
                    job_id.as_str(),
                ],
            )
            .map_err(|e| storage("reject", e))?;
            warn!(job_id = %job_id, error, "job rejected permanently");
            Ok(())
        })
    }

    #[instrument(skip(self))]
    fn reconcile_on_startup(&self) -> Result<Vec<JobId>> {
        let ambiguous = self.write("reconcile", |tx| {
            let now = Utc::now().to_rfc3339();
            let ids = {
                let mut stmt = tx
                    .prepare("SELECT job_id FROM ledger WHERE state = ?1 ORDER BY rowid ASC")
                    .map_err(|e| storage("prepare reconcile", e))?;
                stmt.query_map(params![LifecycleState::Printing.as_str()], |row| {
                    row.get::<_, String>(0)
                })
                .map_err(|e| storage("query reconcile", e))?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| storage("collect rows", e))?
            };

            tx.execute(
                "UPDATE ledger SET state = ?1, reported = 0,
                        last_error = 'interrupted during device write', updated_at = ?2
                 WHERE state = ?3",
                params![
                    LifecycleState::Ambiguous.as_str(),
                    now,
                    LifecycleState::Printing.as_str(),
                ],
            )
            .map_err(|e| storage("mark ambiguous", e))?;
            let requeued = tx
                .execute(
                    "UPDATE ledger SET state = ?1, updated_at = ?2 WHERE state = ?3",
                    params![
                        LifecycleState::Pending.as_str(),
                        now,
                        LifecycleState::Rendering.as_str(),
                    ],
                )
                .map_err(|e| storage("reset rendering", e))?;
            if requeued > 0 {
                debug!(count = requeued, "interrupted renders returned to pending");
            }
            Ok(ids.into_iter().map(JobId::from).collect::<Vec<_>>())
        })?;

        for job_id in &ambiguous {
            warn!(job_id = %job_id, "job was mid-write at shutdown; marked ambiguous");
        }
        Ok(ambiguous)
    }

    fn unreported(&self) -> Result<Vec<LedgerEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {ENTRY_COLUMNS} FROM ledger
                 WHERE reported = 0 AND state IN (?1, ?2, ?3)
                 ORDER BY rowid ASC"
            ))
            .map_err(|e| storage("prepare unreported", e))?;
        let entries = stmt
            .query_map(
                params![
                    LifecycleState::Delivered.as_str(),
                    LifecycleState::Failed.as_str(),
                    LifecycleState::Ambiguous.as_str(),
                ],
                row_to_entry,
            )
            .map_err(|e| storage("query unreported", e))?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| storage("collect rows", e))?;
        Ok(entries)
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    fn mark_reported(&self, job_id: &JobId) -> Result<()> {
        self.write("mark_reported", |tx| {
            let state = current_state(tx, job_id)?;
            if !state.is_terminal() {
                return Err(stale(job_id, state));
            }
            tx.execute(
                "UPDATE ledger SET reported = 1, updated_at = ?1 WHERE job_id = ?2",
                params![Utc::now().to_rfc3339(), job_id.as_str()],
            )
            .map_err(|e| storage("mark reported", e))?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(job_id = %job_id))]
    fn requeue(&self, job_id: &JobId) -> Result<()> {
        self.write("requeue", |tx| {
            let state = current_state(tx, job_id)?;
            if state != LifecycleState::Ambiguous {
                return Err(TicketwerkError::NotAmbiguous {
                    job_id: job_id.clone(),
                    state,
                });
            }
            tx.execute(
                "UPDATE ledger SET state = ?1, attempt_count = 0, attempt_id = NULL,
                        last_error = 'requeued by operator', error_class = NULL,
                        reported = 1, updated_at = ?2
                 WHERE job_id = ?3",
                params![
                    LifecycleState::Pending.as_str(),
                    Utc::now().to_rfc3339(),
                    job_id.as_str(),
                ],
            )
            .map_err(|e| storage("requeue", e))?;
            info!(job_id = %job_id, "ambiguous job requeued by operator");
            Ok(())
        })
    }

    fn prune(&self, older_than: Duration) -> Result<usize> {
        let age = chrono::Duration::from_std(older_than)
            .map_err(|e| TicketwerkError::Config(format!("retention {older_than:?}: {e}")))?;
        let cutoff = (Utc::now() - age).to_rfc3339();
        let removed = self.write("prune", |tx| {
            tx.execute(
                "DELETE FROM ledger
                 WHERE reported = 1 AND state IN (?1, ?2) AND updated_at < ?3",
                params![
                    LifecycleState::Delivered.as_str(),
                    LifecycleState::Failed.as_str(),
                    cutoff,
                ],
            )
            .map_err(|e| storage("prune", e))
        })?;
        if removed > 0 {
            info!(removed, %cutoff, "pruned settled jobs from ledger");
        }
        Ok(removed)
    }

    fn stats(&self) -> Result<LedgerStats> {
        let conn = self.lock()?;
        let mut stats = LedgerStats::default();
        let mut stmt = conn
            .prepare("SELECT state, COUNT(*) FROM ledger GROUP BY state")
            .map_err(|e| storage("prepare stats", e))?;
        let rows = stmt
            .query_map([], |row| Ok((parse_state(row, 0)?, row.get::<_, i64>(1)?)))
            .map_err(|e| storage("query stats", e))?;
        for row in rows {
            let (state, count) = row.map_err(|e| storage("stats row", e))?;
            stats.add(state, count.max(0) as u64);
        }
        stats.unreported = conn
            .query_row(
                "SELECT COUNT(*) FROM ledger
                 WHERE reported = 0 AND state IN (?1, ?2, ?3)",
                params![
                    LifecycleState::Delivered.as_str(),
                    LifecycleState::Failed.as_str(),
                    LifecycleState::Ambiguous.as_str(),
                ],
                |row| row.get::<_, i64>(0),
            )
            .map_err(|e| storage("count unreported", e))?
            .max(0) as u64;
        Ok(stats)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn storage(what: &str, e: rusqlite::Error) -> TicketwerkError {
    TicketwerkError::Ledger(format!("{what}: {e}"))
}

/// Error for a transition out of a state that does not allow it.
fn not_open(job_id: &JobId, state: LifecycleState) -> TicketwerkError {
    match state {
        LifecycleState::Delivered | LifecycleState::Ambiguous => TicketwerkError::AlreadySettled {
            job_id: job_id.clone(),
            state,
        },
        LifecycleState::Failed => TicketwerkError::AlreadyFailed(job_id.clone()),
        other => stale(job_id, other),
    }
}

fn stale(job_id: &JobId, state: LifecycleState) -> TicketwerkError {
    TicketwerkError::StaleAttempt {
        job_id: job_id.clone(),
        detail: format!("job is {state}"),
    }
}

fn select_entry(conn: &Connection, job_id: &JobId) -> Result<Option<LedgerEntry>> {
    conn.query_row(
        &format!("SELECT {ENTRY_COLUMNS} FROM ledger WHERE job_id = ?1"),
        params![job_id.as_str()],
        row_to_entry,
    )
    .optional()
    .map_err(|e| storage("select entry", e))
}

fn select_state(conn: &Connection, job_id: &JobId) -> Result<Option<LifecycleState>> {
    conn.query_row(
        "SELECT state FROM ledger WHERE job_id = ?1",
        params![job_id.as_str()],
        |row| parse_state(row, 0),
    )
    .optional()
    .map_err(|e| storage("select state", e))
}

fn current_state(conn: &Connection, job_id: &JobId) -> Result<LifecycleState> {
    select_state(conn, job_id)?.ok_or_else(|| TicketwerkError::UnknownJob(job_id.clone()))
}

fn select_attempt(conn: &Connection, job_id: &JobId) -> Result<(LifecycleState, Option<Uuid>)> {
    conn.query_row(
        "SELECT state, attempt_id FROM ledger WHERE job_id = ?1",
        params![job_id.as_str()],
        |row| {
            let attempt_id: Option<String> = row.get(1)?;
            let attempt_id = attempt_id
                .map(|s| Uuid::parse_str(&s))
                .transpose()
                .map_err(|e| conversion(1, e))?;
            Ok((parse_state(row, 0)?, attempt_id))
        },
    )
    .optional()
    .map_err(|e| storage("select attempt", e))?
    .ok_or_else(|| TicketwerkError::UnknownJob(job_id.clone()))
}

fn set_state(conn: &Connection, job_id: &JobId, state: LifecycleState) -> Result<()> {
    conn.execute(
        "UPDATE ledger SET state = ?1, updated_at = ?2 WHERE job_id = ?3",
        params![state.as_str(), Utc::now().to_rfc3339(), job_id.as_str()],
    )
    .map_err(|e| storage("set state", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn conversion(
    idx: usize,
    e: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
}

fn parse_state(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<LifecycleState> {
    let raw: String = row.get(idx)?;
    LifecycleState::from_str(&raw).map_err(|e| conversion(idx, e))
}

fn parse_time(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion(idx, e))
}

/// Map a SQLite row to a `LedgerEntry`.
///
/// Column indices must match `ENTRY_COLUMNS`.
fn row_to_entry(row: &rusqlite::Row<'_>) -> rusqlite::Result<LedgerEntry> {
    let job_id: String = row.get(0)?;
    let error_class: Option<String> = row.get(5)?;
    let attempt_id: Option<String> = row.get(7)?;

    Ok(LedgerEntry {
        job_id: JobId(job_id),
        state: parse_state(row, 1)?,
        attempt_count: row.get(2)?,
        max_attempts: row.get(3)?,
        last_error: row.get(4)?,
        error_class: error_class
            .map(|s| ErrorClass::from_str(&s))
            .transpose()
            .map_err(|e| conversion(5, e))?,
        payload_hash: row.get(6)?,
        attempt_id: attempt_id
            .map(|s| Uuid::parse_str(&s))
            .transpose()
            .map_err(|e| conversion(7, e))?,
        received_at: parse_time(row, 8)?,
        updated_at: parse_time(row, 9)?,
        reported: row.get(10)?,
    })
}
