//! SQLite persistence.
//!
//! Every operation opens its own connection, so two threads of one process and two separate
//! processes sharing the database file see the same guarantees. Invariants that must survive
//! concurrent writers live in the schema itself:
//!
//! - one target row and at most one offer per `(request_id, provider_id)`,
//! - an offer row can only reference an existing target (composite foreign key),
//! - at most one non-terminal request per `(requester_id, source_document_id)`,
//! - at most one `accepted` offer per request.
//!
//! Multi-row writes run inside `BEGIN IMMEDIATE` transactions via [`Store::write`], which
//! retries a bounded number of times when SQLite reports the database as busy.

use crate::config::CoreConfig;
use crate::{QuoteError, QuoteResult};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use rusqlite::{Connection, ErrorCode, Transaction, TransactionBehavior};
use std::sync::Arc;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS providers (
    id          TEXT PRIMARY KEY,
    name        TEXT NOT NULL,
    kind        TEXT NOT NULL CHECK (kind IN ('medication', 'lab_test')),
    active      INTEGER NOT NULL,
    verified    INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS source_documents (
    id          TEXT PRIMARY KEY,
    owner_id    TEXT NOT NULL,
    medications TEXT NOT NULL DEFAULT '[]',
    lab_tests   TEXT NOT NULL DEFAULT '[]',
    created_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS fulfillment_requests (
    id                 TEXT PRIMARY KEY,
    kind               TEXT NOT NULL CHECK (kind IN ('medication', 'lab_test')),
    requester_id       TEXT NOT NULL,
    source_document_id TEXT NOT NULL,
    items              TEXT NOT NULL,
    notes              TEXT,
    status             TEXT NOT NULL
        CHECK (status IN ('pending', 'quoted', 'accepted', 'rejected', 'cancelled')),
    created_at         TEXT NOT NULL,
    updated_at         TEXT NOT NULL
);

DROP INDEX IF EXISTS ux_requests_open_per_document;
CREATE UNIQUE INDEX IF NOT EXISTS ux_requests_open_per_document_kind
    ON fulfillment_requests (requester_id, source_document_id, kind)
    WHERE status IN ('pending', 'quoted');

CREATE INDEX IF NOT EXISTS ix_requests_requester
    ON fulfillment_requests (requester_id, created_at);

CREATE TABLE IF NOT EXISTS provider_targets (
    request_id  TEXT NOT NULL REFERENCES fulfillment_requests (id),
    provider_id TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    PRIMARY KEY (request_id, provider_id)
);

CREATE INDEX IF NOT EXISTS ix_targets_provider
    ON provider_targets (provider_id);

CREATE TABLE IF NOT EXISTS quotation_offers (
    id                         TEXT PRIMARY KEY,
    request_id                 TEXT NOT NULL REFERENCES fulfillment_requests (id),
    provider_id                TEXT NOT NULL,
    line_items                 TEXT NOT NULL,
    subtotal                   REAL NOT NULL,
    delivery_charge            REAL NOT NULL DEFAULT 0 CHECK (delivery_charge >= 0),
    total_amount               REAL NOT NULL,
    notes                      TEXT,
    estimated_fulfillment_time TEXT,
    status                     TEXT NOT NULL
        CHECK (status IN ('quoted', 'accepted', 'rejected', 'cancelled')),
    created_at                 TEXT NOT NULL,
    updated_at                 TEXT NOT NULL,
    UNIQUE (request_id, provider_id),
    FOREIGN KEY (request_id, provider_id)
        REFERENCES provider_targets (request_id, provider_id)
);

CREATE UNIQUE INDEX IF NOT EXISTS ux_offers_one_accepted
    ON quotation_offers (request_id)
    WHERE status = 'accepted';

CREATE INDEX IF NOT EXISTS ix_offers_provider
    ON quotation_offers (provider_id, created_at);
"#;

/// Which storage constraint rejected a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Constraint {
    Unique,
    ForeignKey,
    Other,
}

/// Handle on the marketplace database.
#[derive(Clone, Debug)]
pub struct Store {
    cfg: Arc<CoreConfig>,
}

impl Store {
    pub fn new(cfg: Arc<CoreConfig>) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &CoreConfig {
        &self.cfg
    }

    /// Creates the database file (and parent directory) and applies the schema.
    ///
    /// Safe to call on every startup.
    ///
    /// # Errors
    ///
    /// Returns `QuoteError::InvalidInput` if the parent directory cannot be created and
    /// `QuoteError::Database` if the schema cannot be applied.
    pub fn initialise(&self) -> QuoteResult<()> {
        if let Some(parent) = self.cfg.database_path().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    QuoteError::InvalidInput(format!(
                        "cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let conn = self.connect()?;
        let mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.execute_batch(SCHEMA)?;

        tracing::info!(
            "database ready at {} (journal_mode={})",
            self.cfg.database_path().display(),
            mode
        );
        Ok(())
    }

    pub(crate) fn connect(&self) -> QuoteResult<Connection> {
        let conn = Connection::open(self.cfg.database_path())?;
        conn.busy_timeout(self.cfg.busy_timeout())?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(conn)
    }

    /// Runs a read-only closure on a fresh connection.
    pub(crate) fn read<T>(&self, f: impl FnOnce(&Connection) -> QuoteResult<T>) -> QuoteResult<T> {
        let conn = self.connect()?;
        f(&conn)
    }

    /// Runs `f` inside an immediate (write-locking) transaction and commits it.
    ///
    /// `f` may be called more than once: when SQLite reports the database as busy or locked
    /// the whole transaction is retried, up to `allocation_attempts` times, after which the
    /// operation fails with `QuoteError::Conflict`. Any other error rolls back and is returned
    /// unchanged.
    pub(crate) fn write<T>(
        &self,
        operation: &str,
        mut f: impl FnMut(&Transaction<'_>) -> QuoteResult<T>,
    ) -> QuoteResult<T> {
        let attempts = self.cfg.allocation_attempts();

        for attempt in 1..=attempts {
            let mut conn = self.connect()?;
            match run_transaction(&mut conn, &mut f) {
                Err(e) if is_busy(&e) => {
                    tracing::warn!(
                        "{} hit storage contention (attempt {}/{}): {}",
                        operation,
                        attempt,
                        attempts,
                        e
                    );
                }
                outcome => return outcome,
            }
        }

        Err(QuoteError::Conflict(format!(
            "{operation}: storage remained busy after {attempts} attempts"
        )))
    }
}

fn run_transaction<T>(
    conn: &mut Connection,
    f: &mut impl FnMut(&Transaction<'_>) -> QuoteResult<T>,
) -> QuoteResult<T> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    let value = f(&tx)?;
    tx.commit()?;
    Ok(value)
}

fn is_busy(err: &QuoteError) -> bool {
    matches!(
        err,
        QuoteError::Database(rusqlite::Error::SqliteFailure(e, _))
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// Classifies a constraint violation, or `None` for any other error.
pub(crate) fn constraint_violation(err: &rusqlite::Error) -> Option<Constraint> {
    match err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::ConstraintViolation => {
            Some(match e.extended_code {
                rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                | rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY => Constraint::Unique,
                rusqlite::ffi::SQLITE_CONSTRAINT_FOREIGNKEY => Constraint::ForeignKey,
                _ => Constraint::Other,
            })
        }
        _ => None,
    }
}

/// The current time at the precision timestamps are stored with.
pub(crate) fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Fixed-width RFC 3339 so that text ordering in SQL matches time ordering.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_timestamp(value: &str) -> QuoteResult<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| QuoteError::CorruptRecord(format!("invalid timestamp: {value}")))
}
