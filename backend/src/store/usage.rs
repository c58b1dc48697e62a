use chrono::{DateTime, Utc};
use receipt_common::{month_key, PlanTier, ResourceKind, UsageCounters};
use rusqlite::{params, Connection, OptionalExtension};

use super::users::{ensure_user, find_user};
use super::{db_err, opt_time_column, timestamp, Store, StoreError};

fn counter_column(kind: ResourceKind) -> &'static str {
    match kind {
        ResourceKind::Receipts => "receipts_uploaded",
        ResourceKind::AiSummaries => "ai_summaries_generated",
    }
}

fn plan_restricted(kind: ResourceKind) -> StoreError {
    match PlanTier::cheapest_with(kind) {
        Some(PlanTier::Pro) => StoreError::PlanRestricted(
            "AI summaries are only available for Pro users".to_string(),
        ),
        _ => StoreError::PlanRestricted(format!("Your plan does not include {}", kind)),
    }
}

fn read_usage(conn: &Connection, user_id: &str, month: &str) -> Result<UsageCounters, StoreError> {
    let usage = conn
        .query_row(
            "SELECT receipts_uploaded, ai_summaries_generated, last_updated
             FROM usage_tracking WHERE user_id = ?1 AND month = ?2",
            params![user_id, month],
            |row| {
                Ok(UsageCounters {
                    month: month.to_string(),
                    receipts_uploaded: row.get(0)?,
                    ai_summaries_generated: row.get(1)?,
                    last_updated: opt_time_column(row, 2)?,
                })
            },
        )
        .optional()
        .map_err(db_err)?;

    Ok(usage.unwrap_or_else(|| UsageCounters::empty(month)))
}

/// Reserve one unit of `kind` for the month containing `now`.
///
/// Runs on the caller's connection so it can share a transaction with the
/// write that consumes the unit. The increment is conditional on the counter
/// being below the limit, so concurrent callers cannot overshoot it.
pub(super) fn reserve_in(
    conn: &Connection,
    user_id: &str,
    kind: ResourceKind,
    now: DateTime<Utc>,
) -> Result<(), StoreError> {
    ensure_user(conn, user_id, now)?;
    let user = find_user(conn, user_id)?.ok_or(StoreError::NotFound("User"))?;
    let limit = user.quota.limit_for(kind).ok_or_else(|| plan_restricted(kind))?;

    let month = month_key(now);
    conn.execute(
        "INSERT OR IGNORE INTO usage_tracking (user_id, month, receipts_uploaded, ai_summaries_generated, last_updated)
         VALUES (?1, ?2, 0, 0, ?3)",
        params![user_id, month, timestamp(now)],
    )
    .map_err(db_err)?;

    let column = counter_column(kind);
    let reserved = conn
        .execute(
            &format!(
                "UPDATE usage_tracking SET {column} = {column} + 1, last_updated = ?1
                 WHERE user_id = ?2 AND month = ?3 AND {column} < ?4"
            ),
            params![timestamp(now), user_id, month, limit],
        )
        .map_err(db_err)?;

    if reserved == 0 {
        tracing::info!("Quota exceeded for {}: {} limit {} in {}", user_id, kind, limit, month);
        return Err(StoreError::QuotaExceeded(kind));
    }
    Ok(())
}

impl Store {
    /// Read-only quota check for the month containing `now`.
    ///
    /// Users without a record are checked against the free plan.
    pub fn check_quota(&self, user_id: &str, kind: ResourceKind, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        let quota = find_user(&conn, user_id)?
            .map(|user| user.quota)
            .unwrap_or_else(|| PlanTier::Free.quota());
        let limit = quota.limit_for(kind).ok_or_else(|| plan_restricted(kind))?;

        let usage = read_usage(&conn, user_id, &month_key(now))?;
        if usage.count(kind) >= limit {
            return Err(StoreError::QuotaExceeded(kind));
        }
        Ok(())
    }

    /// Atomically check and consume one unit of `kind`.
    pub fn reserve(&self, user_id: &str, kind: ResourceKind, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let tx = conn.transaction().map_err(db_err)?;
        reserve_in(&tx, user_id, kind, now)?;
        tx.commit().map_err(db_err)
    }

    /// Counters for the month containing `now`; zeros when nothing was used.
    pub fn usage(&self, user_id: &str, now: DateTime<Utc>) -> Result<UsageCounters, StoreError> {
        let conn = self.conn()?;
        read_usage(&conn, user_id, &month_key(now))
    }
}
