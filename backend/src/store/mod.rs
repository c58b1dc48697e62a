//! SQLite-backed persistence for users, usage counters, receipts, files and
//! extraction jobs.
//!
//! All access goes through a single connection behind a mutex. Operations that
//! touch more than one table run inside one transaction, so a failed quota
//! reservation never leaves a half-written receipt behind.

mod files;
mod jobs;
mod receipts;
mod usage;
mod users;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use receipt_common::{ReceiptStatus, ResourceKind, UnknownPlanTier};
use rusqlite::{Connection, Row};

pub use files::{FileObject, UploadTarget};
pub use jobs::{ExtractionJob, JobStep};
pub use receipts::ReceiptQuery;
pub use users::{BillingDetails, NewUser, User};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("User already exists")]
    AlreadyExists,
    #[error("Monthly {0} quota exceeded")]
    QuotaExceeded(ResourceKind),
    #[error("{0}")]
    PlanRestricted(String),
    #[error(transparent)]
    InvalidPlanTier(#[from] UnknownPlanTier),
    #[error("Cannot change receipt status from {from} to {to}")]
    InvalidTransition {
        from: ReceiptStatus,
        to: ReceiptStatus,
    },
    #[error("Upload URL has expired")]
    UploadTargetExpired,
    #[error("Upload URL has already been used")]
    UploadTargetUsed,
    #[error("Database error: {0}")]
    DatabaseError(String),
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    email TEXT,
    name TEXT,
    plan_tier TEXT NOT NULL,
    quota_receipts INTEGER NOT NULL,
    quota_ai_summaries INTEGER,
    subscription_id TEXT,
    customer_id TEXT,
    billing_period_start TEXT,
    billing_period_end TEXT,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS usage_tracking (
    user_id TEXT NOT NULL,
    month TEXT NOT NULL,
    receipts_uploaded INTEGER NOT NULL DEFAULT 0,
    ai_summaries_generated INTEGER NOT NULL DEFAULT 0,
    last_updated TEXT NOT NULL,
    PRIMARY KEY (user_id, month)
);

CREATE TABLE IF NOT EXISTS receipts (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    file_id TEXT NOT NULL,
    file_name TEXT NOT NULL,
    merchant TEXT,
    date TEXT,
    total REAL,
    items TEXT,
    category TEXT,
    status TEXT NOT NULL,
    processing_error TEXT,
    ai_summary TEXT,
    created_at TEXT NOT NULL,
    last_modified TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_receipts_user_created ON receipts(user_id, created_at);

CREATE TABLE IF NOT EXISTS files (
    id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    content_type TEXT NOT NULL,
    size INTEGER NOT NULL,
    sha256 TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS upload_targets (
    token_hash TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    created_at TEXT NOT NULL,
    expires_at TEXT NOT NULL,
    used_at TEXT,
    file_id TEXT
);

CREATE TABLE IF NOT EXISTS extraction_jobs (
    receipt_id TEXT PRIMARY KEY,
    user_id TEXT NOT NULL,
    file_id TEXT NOT NULL,
    step TEXT NOT NULL,
    file_url TEXT,
    extracted TEXT,
    error TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_extraction_jobs_step ON extraction_jobs(step);
";

/// Persistent store for the receipt tracker.
#[derive(Debug)]
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    pub fn new(database_url: &str) -> Result<Self, StoreError> {
        // Parse sqlite: prefix if present
        let path = database_url.strip_prefix("sqlite:").unwrap_or(database_url);

        if let Some(parent) = Path::new(path).parent() {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::IoError(e.to_string()))?;
        }

        let conn = Connection::open(path).map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;

        tracing::info!("Store initialized with database: {}", path);

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Store backed by a private in-memory database.
    pub fn in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        conn.execute_batch(SCHEMA).map_err(db_err)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| StoreError::DatabaseError(e.to_string()))
    }
}

pub(crate) fn db_err(e: rusqlite::Error) -> StoreError {
    StoreError::DatabaseError(e.to_string())
}

/// Fixed-width UTC timestamps so that text ordering matches time ordering.
pub(crate) fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_time(idx, &raw)
}

pub(crate) fn opt_time_column(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|raw| parse_time(idx, &raw)).transpose()
}

fn parse_time(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
}
