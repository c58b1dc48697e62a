use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Duration, Utc};
use receipt_common::{
    parse_receipt_date, CategoryAmount, FieldUpdate, LineItem, MonthlySummary, Receipt,
    ReceiptPatch, ReceiptStatus, ResourceKind, UserStats,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::jobs::insert_job;
use super::usage::reserve_in;
use super::{db_err, time_column, timestamp, Store, StoreError};

const RECEIPT_COLUMNS: &str = "id, user_id, file_id, file_name, merchant, date, total, items, \
     category, status, processing_error, ai_summary, created_at, last_modified";

const UNCATEGORIZED: &str = "Uncategorized";

/// Filters for listing a user's receipts.
#[derive(Debug, Clone, Default)]
pub struct ReceiptQuery {
    /// Return at most this many receipts
    pub limit: Option<usize>,
    /// Only receipts whose date is at or after this instant
    pub date_from: Option<DateTime<Utc>>,
    /// Only receipts whose date is at or before this instant
    pub date_to: Option<DateTime<Utc>>,
}

impl ReceiptQuery {
    pub fn recent(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Default::default()
        }
    }

    fn has_date_filter(&self) -> bool {
        self.date_from.is_some() || self.date_to.is_some()
    }

    fn matches(&self, receipt: &Receipt) -> bool {
        if !self.has_date_filter() {
            return true;
        }
        let Some(date) = receipt.date.as_deref().and_then(parse_receipt_date) else {
            return false;
        };
        self.date_from.map_or(true, |from| date >= from) && self.date_to.map_or(true, |to| date <= to)
    }
}

fn receipt_from_row(row: &Row<'_>) -> rusqlite::Result<Receipt> {
    let items: Option<String> = row.get(7)?;
    let items = items
        .map(|raw| serde_json::from_str::<Vec<LineItem>>(&raw))
        .transpose()
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(7, rusqlite::types::Type::Text, Box::new(e)))?;

    let status: String = row.get(9)?;
    let status = status.parse::<ReceiptStatus>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(9, rusqlite::types::Type::Text, e.into())
    })?;

    Ok(Receipt {
        id: row.get(0)?,
        user_id: row.get(1)?,
        file_id: row.get(2)?,
        file_name: row.get(3)?,
        merchant: row.get(4)?,
        date: row.get(5)?,
        total: row.get(6)?,
        items,
        category: row.get(8)?,
        status,
        processing_error: row.get(10)?,
        ai_summary: row.get(11)?,
        created_at: time_column(row, 12)?,
        last_modified: time_column(row, 13)?,
    })
}

fn items_json(items: &Option<Vec<LineItem>>) -> Result<Option<String>, StoreError> {
    items
        .as_ref()
        .map(serde_json::to_string)
        .transpose()
        .map_err(|e| StoreError::DatabaseError(e.to_string()))
}

pub(super) fn find_receipt(conn: &Connection, receipt_id: &str) -> Result<Option<Receipt>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM receipts WHERE id = ?1", RECEIPT_COLUMNS),
        params![receipt_id],
        receipt_from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Validate and apply `patch` to the stored receipt on `conn`.
///
/// Shared by user edits and the extraction workflow so both go through the
/// same transition rules.
pub(super) fn patch_in(
    conn: &Connection,
    receipt_id: &str,
    patch: &ReceiptPatch,
    now: DateTime<Utc>,
) -> Result<Receipt, StoreError> {
    let mut receipt = find_receipt(conn, receipt_id)?.ok_or(StoreError::NotFound("Receipt"))?;

    if let Some(next) = patch.status {
        if next != receipt.status && !receipt.status.can_transition_to(next) {
            return Err(StoreError::InvalidTransition {
                from: receipt.status,
                to: next,
            });
        }
        receipt.status = next;
    }

    if let FieldUpdate::Set(_) = patch.ai_summary {
        reserve_in(conn, &receipt.user_id, ResourceKind::AiSummaries, now)?;
    }

    patch.apply_fields(&mut receipt);
    receipt.last_modified = now;

    conn.execute(
        "UPDATE receipts SET merchant = ?1, date = ?2, total = ?3, items = ?4, category = ?5,
             status = ?6, processing_error = ?7, ai_summary = ?8, last_modified = ?9
         WHERE id = ?10",
        params![
            receipt.merchant,
            receipt.date,
            receipt.total,
            items_json(&receipt.items)?,
            receipt.category,
            receipt.status.as_str(),
            receipt.processing_error,
            receipt.ai_summary,
            timestamp(now),
            receipt.id,
        ],
    )
    .map_err(db_err)?;

    Ok(receipt)
}

impl Store {
    /// Create a `processing` receipt and queue its extraction.
    ///
    /// Consumes one unit of receipt quota; the reservation, the receipt and
    /// the queued job commit together or not at all.
    pub fn create_receipt(
        &self,
        user_id: &str,
        file_id: &str,
        file_name: &str,
        now: DateTime<Utc>,
    ) -> Result<Receipt, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        reserve_in(&tx, user_id, ResourceKind::Receipts, now)?;

        let receipt = Receipt {
            id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            file_id: file_id.to_string(),
            file_name: file_name.to_string(),
            merchant: None,
            date: None,
            total: None,
            items: None,
            category: None,
            status: ReceiptStatus::Processing,
            processing_error: None,
            ai_summary: None,
            created_at: now,
            last_modified: now,
        };

        tx.execute(
            "INSERT INTO receipts (id, user_id, file_id, file_name, status, created_at, last_modified)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                receipt.id,
                receipt.user_id,
                receipt.file_id,
                receipt.file_name,
                receipt.status.as_str(),
                timestamp(now),
                timestamp(now),
            ],
        )
        .map_err(db_err)?;

        insert_job(&tx, &receipt.id, user_id, file_id, now)?;
        tx.commit().map_err(db_err)?;

        tracing::info!("Created receipt {} for {} (file {})", receipt.id, user_id, file_id);
        Ok(receipt)
    }

    /// Apply a partial update. Omitted fields keep their values.
    pub fn patch_receipt(
        &self,
        receipt_id: &str,
        patch: &ReceiptPatch,
        now: DateTime<Utc>,
    ) -> Result<Receipt, StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        let receipt = patch_in(&tx, receipt_id, patch, now)?;
        tx.commit().map_err(db_err)?;
        Ok(receipt)
    }

    pub fn get_receipt(&self, receipt_id: &str) -> Result<Receipt, StoreError> {
        let conn = self.conn()?;
        find_receipt(&conn, receipt_id)?.ok_or(StoreError::NotFound("Receipt"))
    }

    /// A user's receipts, most recently created first.
    pub fn list_receipts(&self, user_id: &str, query: &ReceiptQuery) -> Result<Vec<Receipt>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn
            .prepare(&format!(
                "SELECT {} FROM receipts WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC",
                RECEIPT_COLUMNS
            ))
            .map_err(db_err)?;

        let rows = stmt
            .query_map(params![user_id], receipt_from_row)
            .map_err(db_err)?;

        let mut receipts = Vec::new();
        for row in rows {
            let receipt = row.map_err(db_err)?;
            if !query.matches(&receipt) {
                continue;
            }
            receipts.push(receipt);
            if query.limit.is_some_and(|limit| receipts.len() >= limit) {
                break;
            }
        }
        Ok(receipts)
    }

    /// Delete a receipt and its extraction job. Quota is not refunded.
    pub fn delete_receipt(&self, receipt_id: &str) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;

        let deleted = tx
            .execute("DELETE FROM receipts WHERE id = ?1", params![receipt_id])
            .map_err(db_err)?;
        if deleted == 0 {
            return Err(StoreError::NotFound("Receipt"));
        }
        tx.execute("DELETE FROM extraction_jobs WHERE receipt_id = ?1", params![receipt_id])
            .map_err(db_err)?;

        tx.commit().map_err(db_err)?;
        tracing::info!("Deleted receipt {}", receipt_id);
        Ok(())
    }

    /// Dashboard counters relative to `now`.
    ///
    /// Month and week buckets use the receipt's own date; receipts without a
    /// parseable date only count towards the total.
    pub fn user_stats(&self, user_id: &str, now: DateTime<Utc>) -> Result<UserStats, StoreError> {
        let receipts = self.list_receipts(user_id, &ReceiptQuery::default())?;
        let week_ago = now - Duration::days(7);

        let mut stats = UserStats {
            total: receipts.len() as u64,
            this_month: 0,
            this_week: 0,
            last_uploaded: receipts.iter().map(|r| r.created_at).max(),
        };

        for date in receipts.iter().filter_map(|r| r.date.as_deref().and_then(parse_receipt_date)) {
            if date.year() == now.year() && date.month() == now.month() {
                stats.this_month += 1;
            }
            if date >= week_ago {
                stats.this_week += 1;
            }
        }

        Ok(stats)
    }

    /// Spending between `start` and `end` (both inclusive), grouped by category.
    pub fn monthly_summary(
        &self,
        user_id: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MonthlySummary, StoreError> {
        let query = ReceiptQuery {
            limit: None,
            date_from: Some(start),
            date_to: Some(end),
        };
        let receipts = self.list_receipts(user_id, &query)?;

        let mut total = 0.0;
        let mut by_category: BTreeMap<String, f64> = BTreeMap::new();
        for receipt in &receipts {
            let amount = receipt.total.unwrap_or(0.0);
            total += amount;
            let category = receipt.category.clone().unwrap_or_else(|| UNCATEGORIZED.to_string());
            *by_category.entry(category).or_insert(0.0) += amount;
        }

        Ok(MonthlySummary {
            total,
            by_category: by_category
                .into_iter()
                .map(|(name, amount)| CategoryAmount { name, amount })
                .collect(),
        })
    }
}
