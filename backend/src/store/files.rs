use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::{db_err, opt_time_column, time_column, timestamp, Store, StoreError};

/// Metadata of an uploaded blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileObject {
    pub id: String,
    pub user_id: String,
    pub content_type: String,
    pub size: u64,
    /// Hex-encoded SHA-256 of the content
    pub sha256: String,
    pub created_at: DateTime<Utc>,
}

/// A single-use upload slot, keyed by the hash of its token.
#[derive(Debug, Clone, PartialEq)]
pub struct UploadTarget {
    pub token_hash: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
}

impl UploadTarget {
    /// Fails unless the target can still accept an upload at `now`.
    pub fn check_usable(&self, now: DateTime<Utc>) -> Result<(), StoreError> {
        if self.used_at.is_some() {
            return Err(StoreError::UploadTargetUsed);
        }
        if now >= self.expires_at {
            return Err(StoreError::UploadTargetExpired);
        }
        Ok(())
    }
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<FileObject> {
    Ok(FileObject {
        id: row.get(0)?,
        user_id: row.get(1)?,
        content_type: row.get(2)?,
        size: row.get(3)?,
        sha256: row.get(4)?,
        created_at: time_column(row, 5)?,
    })
}

fn find_target(conn: &Connection, token_hash: &str) -> Result<Option<UploadTarget>, StoreError> {
    conn.query_row(
        "SELECT token_hash, user_id, created_at, expires_at, used_at FROM upload_targets WHERE token_hash = ?1",
        params![token_hash],
        |row| {
            Ok(UploadTarget {
                token_hash: row.get(0)?,
                user_id: row.get(1)?,
                created_at: time_column(row, 2)?,
                expires_at: time_column(row, 3)?,
                used_at: opt_time_column(row, 4)?,
            })
        },
    )
    .optional()
    .map_err(db_err)
}

impl Store {
    pub fn insert_upload_target(&self, target: &UploadTarget) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO upload_targets (token_hash, user_id, created_at, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![
                target.token_hash,
                target.user_id,
                timestamp(target.created_at),
                timestamp(target.expires_at)
            ],
        )
        .map_err(db_err)?;
        Ok(())
    }

    pub fn get_upload_target(&self, token_hash: &str) -> Result<UploadTarget, StoreError> {
        let conn = self.conn()?;
        find_target(&conn, token_hash)?.ok_or(StoreError::NotFound("Upload URL"))
    }

    /// Record the file for an upload target and consume the target.
    ///
    /// The target is re-checked inside the transaction, so of two racing
    /// uploads to the same target only one succeeds.
    pub fn complete_upload(&self, token_hash: &str, file: &FileObject, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let target = find_target(&tx, token_hash)?.ok_or(StoreError::NotFound("Upload URL"))?;
        target.check_usable(now)?;

        tx.execute(
            "INSERT INTO files (id, user_id, content_type, size, sha256, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                file.id,
                file.user_id,
                file.content_type,
                file.size,
                file.sha256,
                timestamp(file.created_at)
            ],
        )
        .map_err(db_err)?;

        tx.execute(
            "UPDATE upload_targets SET used_at = ?1, file_id = ?2 WHERE token_hash = ?3",
            params![timestamp(now), file.id, token_hash],
        )
        .map_err(db_err)?;

        tx.commit().map_err(db_err)
    }

    pub fn get_file(&self, file_id: &str) -> Result<FileObject, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "SELECT id, user_id, content_type, size, sha256, created_at FROM files WHERE id = ?1",
            params![file_id],
            file_from_row,
        )
        .optional()
        .map_err(db_err)?
        .ok_or(StoreError::NotFound("File"))
    }

    pub fn delete_file(&self, file_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let deleted = conn
            .execute("DELETE FROM files WHERE id = ?1", params![file_id])
            .map_err(db_err)?;
        if deleted == 0 {
            return Err(StoreError::NotFound("File"));
        }
        Ok(())
    }
}
