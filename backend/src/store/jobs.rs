//! Extraction job rows with per-step completion markers.
//!
//! A job is written together with its receipt and records the last workflow
//! step that completed, plus the intermediate results the later steps need.
//! Re-running a job therefore resumes after the last recorded step.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use receipt_common::{ExtractedFields, Receipt, ReceiptPatch, ReceiptStatus};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::receipts::{find_receipt, patch_in};
use super::{db_err, time_column, timestamp, Store, StoreError};

/// Last completed step of an extraction job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum JobStep {
    Queued,
    FileResolved,
    Extracted,
    Committed,
    Emitted,
    Failed,
}

impl JobStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStep::Queued => "queued",
            JobStep::FileResolved => "file_resolved",
            JobStep::Extracted => "extracted",
            JobStep::Committed => "committed",
            JobStep::Emitted => "emitted",
            JobStep::Failed => "failed",
        }
    }

    /// No further work remains for the job.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStep::Emitted | JobStep::Failed)
    }
}

impl FromStr for JobStep {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobStep::Queued),
            "file_resolved" => Ok(JobStep::FileResolved),
            "extracted" => Ok(JobStep::Extracted),
            "committed" => Ok(JobStep::Committed),
            "emitted" => Ok(JobStep::Emitted),
            "failed" => Ok(JobStep::Failed),
            other => Err(format!("unknown job step: {}", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractionJob {
    pub receipt_id: String,
    pub user_id: String,
    pub file_id: String,
    pub step: JobStep,
    /// Set once the file has been resolved
    pub file_url: Option<String>,
    /// Set once extraction has produced fields
    pub extracted: Option<ExtractedFields>,
    pub error: Option<String>,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const JOB_COLUMNS: &str =
    "receipt_id, user_id, file_id, step, file_url, extracted, error, attempts, created_at, updated_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<ExtractionJob> {
    let step: String = row.get(3)?;
    let step = step
        .parse::<JobStep>()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into()))?;

    let extracted: Option<String> = row.get(5)?;
    let extracted = extracted
        .map(|raw| serde_json::from_str::<ExtractedFields>(&raw))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e)))?;

    Ok(ExtractionJob {
        receipt_id: row.get(0)?,
        user_id: row.get(1)?,
        file_id: row.get(2)?,
        step,
        file_url: row.get(4)?,
        extracted,
        error: row.get(6)?,
        attempts: row.get(7)?,
        created_at: time_column(row, 8)?,
        updated_at: time_column(row, 9)?,
    })
}

pub(super) fn insert_job(
    conn: &Connection,
    receipt_id: &str,
    user_id: &str,
    file_id: &str,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    conn.execute(
        "INSERT INTO extraction_jobs (receipt_id, user_id, file_id, step, attempts, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 0, ?5, ?5)",
        params![receipt_id, user_id, file_id, JobStep::Queued.as_str(), timestamp(now)],
    )
    .map_err(db_err)?;
    Ok(())
}

fn set_step(conn: &Connection, receipt_id: &str, step: JobStep, now: DateTime<Utc>) -> Result<(), StoreError> {
    let updated = conn
        .execute(
            "UPDATE extraction_jobs SET step = ?1, updated_at = ?2 WHERE receipt_id = ?3",
            params![step.as_str(), timestamp(now), receipt_id],
        )
        .map_err(db_err)?;
    if updated == 0 {
        return Err(StoreError::NotFound("Extraction job"));
    }
    Ok(())
}

fn delete_job_in(conn: &Connection, receipt_id: &str) -> Result<(), StoreError> {
    conn.execute("DELETE FROM extraction_jobs WHERE receipt_id = ?1", params![receipt_id])
        .map_err(db_err)?;
    Ok(())
}

/// The receipt a job may still write to, or `None` if it was deleted or has
/// left `processing`. In the latter case the job is removed.
fn writable_receipt(conn: &Connection, receipt_id: &str) -> Result<Option<Receipt>, StoreError> {
    match find_receipt(conn, receipt_id)? {
        Some(receipt) if receipt.status == ReceiptStatus::Processing => Ok(Some(receipt)),
        _ => {
            delete_job_in(conn, receipt_id)?;
            Ok(None)
        }
    }
}

impl Store {
    pub fn get_job(&self, receipt_id: &str) -> Result<Option<ExtractionJob>, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            &format!("SELECT {} FROM extraction_jobs WHERE receipt_id = ?1", JOB_COLUMNS),
            params![receipt_id],
            job_from_row,
        )
        .optional()
        .map_err(db_err)
    }

    /// Jobs with work left, oldest first.
    pub fn unfinished_jobs(&self) -> Result<Vec<ExtractionJob>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM extraction_jobs WHERE step NOT IN (?1, ?2) ORDER BY created_at, rowid",
                JOB_COLUMNS
            ))
            .map_err(db_err)?;
        let jobs = stmt
            .query_map(
                params![JobStep::Emitted.as_str(), JobStep::Failed.as_str()],
                job_from_row,
            )
            .map_err(db_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(db_err)?;
        Ok(jobs)
    }

    /// Count a run of the job.
    pub fn start_attempt(&self, receipt_id: &str, now: DateTime<Utc>) -> Result<u32, StoreError> {
        let conn = self.conn()?;
        conn.query_row(
            "UPDATE extraction_jobs SET attempts = attempts + 1, updated_at = ?1
             WHERE receipt_id = ?2 RETURNING attempts",
            params![timestamp(now), receipt_id],
            |row| row.get(0),
        )
        .optional()
        .map_err(db_err)?
        .ok_or(StoreError::NotFound("Extraction job"))
    }

    pub fn record_file_resolved(&self, receipt_id: &str, file_url: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE extraction_jobs SET file_url = ?1 WHERE receipt_id = ?2",
            params![file_url, receipt_id],
        )
        .map_err(db_err)?;
        set_step(&conn, receipt_id, JobStep::FileResolved, now)
    }

    pub fn record_extracted(
        &self,
        receipt_id: &str,
        fields: &ExtractedFields,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let extracted = serde_json::to_string(fields).map_err(|e| StoreError::DatabaseError(e.to_string()))?;
        let conn = self.conn()?;
        conn.execute(
            "UPDATE extraction_jobs SET extracted = ?1 WHERE receipt_id = ?2",
            params![extracted, receipt_id],
        )
        .map_err(db_err)?;
        set_step(&conn, receipt_id, JobStep::Extracted, now)
    }

    /// Write extracted fields to the receipt and mark it completed.
    ///
    /// Returns `None` without writing when the receipt is gone or no longer
    /// `processing`; the job is retired in that case.
    pub fn commit_extraction(
        &self,
        receipt_id: &str,
        fields: &ExtractedFields,
        now: DateTime<Utc>,
    ) -> Result<Option<Receipt>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        if writable_receipt(&tx, receipt_id)?.is_none() {
            tx.commit().map_err(db_err)?;
            return Ok(None);
        }

        let receipt = patch_in(&tx, receipt_id, &ReceiptPatch::completed(fields), now)?;
        set_step(&tx, receipt_id, JobStep::Committed, now)?;
        tx.commit().map_err(db_err)?;
        Ok(Some(receipt))
    }

    /// Mark the receipt failed with `message`, under the same rules as
    /// [`Store::commit_extraction`].
    pub fn fail_extraction(
        &self,
        receipt_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Receipt>, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        if writable_receipt(&tx, receipt_id)?.is_none() {
            tx.commit().map_err(db_err)?;
            return Ok(None);
        }

        let receipt = patch_in(&tx, receipt_id, &ReceiptPatch::failed(message), now)?;
        tx.execute(
            "UPDATE extraction_jobs SET error = ?1 WHERE receipt_id = ?2",
            params![message, receipt_id],
        )
        .map_err(db_err)?;
        set_step(&tx, receipt_id, JobStep::Failed, now)?;
        tx.commit().map_err(db_err)?;
        Ok(Some(receipt))
    }

    pub fn record_emitted(&self, receipt_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        set_step(&conn, receipt_id, JobStep::Emitted, now)
    }

    /// Drop a job that has nothing left to do.
    pub fn retire_job(&self, receipt_id: &str) -> Result<(), StoreError> {
        let conn = self.conn()?;
        delete_job_in(&conn, receipt_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use claim::assert_none;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn sample_fields() -> ExtractedFields {
        ExtractedFields {
            merchant: Some("Sample Store".to_string()),
            date: Some("2024-03-01".to_string()),
            total: Some(42.99),
            items: Some(vec![]),
        }
    }

    #[test]
    fn test_new_receipt_has_queued_job() {
        let store = Store::in_memory().unwrap();
        let receipt = store.create_receipt("user123", "file1", "a.pdf", now()).unwrap();

        let job = store.get_job(&receipt.id).unwrap().unwrap();
        assert_eq!(job.step, JobStep::Queued);
        assert_eq!(job.file_id, "file1");
        assert_eq!(job.attempts, 0);
        assert_eq!(store.unfinished_jobs().unwrap(), vec![job]);
    }

    #[test]
    fn test_steps_persist_intermediate_results() {
        let store = Store::in_memory().unwrap();
        let receipt = store.create_receipt("user123", "file1", "a.pdf", now()).unwrap();

        assert_eq!(store.start_attempt(&receipt.id, now()).unwrap(), 1);
        store.record_file_resolved(&receipt.id, "http://files/file1", now()).unwrap();
        store.record_extracted(&receipt.id, &sample_fields(), now()).unwrap();

        let job = store.get_job(&receipt.id).unwrap().unwrap();
        assert_eq!(job.step, JobStep::Extracted);
        assert_eq!(job.file_url.as_deref(), Some("http://files/file1"));
        assert_eq!(job.extracted, Some(sample_fields()));
    }

    #[test]
    fn test_commit_extraction_completes_receipt() {
        let store = Store::in_memory().unwrap();
        let receipt = store.create_receipt("user123", "file1", "a.pdf", now()).unwrap();

        let committed = store.commit_extraction(&receipt.id, &sample_fields(), now()).unwrap().unwrap();
        assert_eq!(committed.status, ReceiptStatus::Completed);
        assert_eq!(committed.merchant.as_deref(), Some("Sample Store"));
        assert_eq!(committed.total, Some(42.99));

        store.record_emitted(&receipt.id, now()).unwrap();
        assert!(store.unfinished_jobs().unwrap().is_empty());
        assert_eq!(store.get_job(&receipt.id).unwrap().unwrap().step, JobStep::Emitted);
    }

    #[test]
    fn test_commit_skips_manually_edited_receipt() {
        let store = Store::in_memory().unwrap();
        let receipt = store.create_receipt("user123", "file1", "a.pdf", now()).unwrap();
        let edit: ReceiptPatch =
            serde_json::from_str(r#"{"merchant": "Typed by hand", "status": "manual_edit"}"#).unwrap();
        store.patch_receipt(&receipt.id, &edit, now()).unwrap();

        assert_none!(store.commit_extraction(&receipt.id, &sample_fields(), now()).unwrap());

        let stored = store.get_receipt(&receipt.id).unwrap();
        assert_eq!(stored.merchant.as_deref(), Some("Typed by hand"));
        assert_eq!(stored.status, ReceiptStatus::ManualEdit);
        assert_none!(store.get_job(&receipt.id).unwrap());
    }

    #[test]
    fn test_fail_extraction_records_error() {
        let store = Store::in_memory().unwrap();
        let receipt = store.create_receipt("user123", "file1", "a.pdf", now()).unwrap();

        let failed = store
            .fail_extraction(&receipt.id, "File not found or URL is missing", now())
            .unwrap()
            .unwrap();
        assert_eq!(failed.status, ReceiptStatus::Failed);
        assert_eq!(failed.processing_error.as_deref(), Some("File not found or URL is missing"));

        let job = store.get_job(&receipt.id).unwrap().unwrap();
        assert_eq!(job.step, JobStep::Failed);
        assert!(store.unfinished_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_fail_extraction_on_deleted_receipt() {
        let store = Store::in_memory().unwrap();
        let receipt = store.create_receipt("user123", "file1", "a.pdf", now()).unwrap();
        store.delete_receipt(&receipt.id).unwrap();

        assert_none!(store.fail_extraction(&receipt.id, "boom", now()).unwrap());
    }

    #[test]
    fn test_step_order() {
        assert!(JobStep::Queued < JobStep::FileResolved);
        assert!(JobStep::FileResolved < JobStep::Extracted);
        assert!(JobStep::Extracted < JobStep::Committed);
        assert!(JobStep::Committed < JobStep::Emitted);
        assert!(JobStep::Failed.is_terminal());
        assert!(!JobStep::Committed.is_terminal());
    }
}
