use chrono::{DateTime, Utc};
use receipt_common::{PlanTier, Quota, UserPlan};
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::{Deserialize, Serialize};

use super::{db_err, time_column, timestamp, Store, StoreError};

/// A user record with plan and billing information.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub plan_tier: PlanTier,
    pub quota: Quota,
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub billing_period_start: Option<String>,
    pub billing_period_end: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl User {
    pub fn plan(&self) -> UserPlan {
        UserPlan {
            plan_tier: self.plan_tier,
            quota: self.quota,
            billing_period_start: self.billing_period_start.clone(),
            billing_period_end: self.billing_period_end.clone(),
        }
    }
}

/// Parameters for explicit user creation.
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub id: String,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl NewUser {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            ..Default::default()
        }
    }
}

/// Billing fields written together with a plan change. Absent fields are cleared.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BillingDetails {
    pub subscription_id: Option<String>,
    pub customer_id: Option<String>,
    pub billing_period_start: Option<String>,
    pub billing_period_end: Option<String>,
}

const USER_COLUMNS: &str = "id, email, name, plan_tier, quota_receipts, quota_ai_summaries, \
     subscription_id, customer_id, billing_period_start, billing_period_end, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    let tier: String = row.get(3)?;
    let plan_tier = tier.parse::<PlanTier>().map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2)?,
        plan_tier,
        quota: Quota {
            receipts: row.get(4)?,
            ai_summaries: row.get(5)?,
        },
        subscription_id: row.get(6)?,
        customer_id: row.get(7)?,
        billing_period_start: row.get(8)?,
        billing_period_end: row.get(9)?,
        created_at: time_column(row, 10)?,
    })
}

pub(super) fn find_user(conn: &Connection, user_id: &str) -> Result<Option<User>, StoreError> {
    conn.query_row(
        &format!("SELECT {} FROM users WHERE id = ?1", USER_COLUMNS),
        params![user_id],
        user_from_row,
    )
    .optional()
    .map_err(db_err)
}

/// Insert a free-tier user unless one already exists.
pub(super) fn ensure_user(conn: &Connection, user_id: &str, now: DateTime<Utc>) -> Result<(), StoreError> {
    let quota = PlanTier::Free.quota();
    let inserted = conn
        .execute(
            "INSERT OR IGNORE INTO users (id, plan_tier, quota_receipts, quota_ai_summaries, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                user_id,
                PlanTier::Free.as_str(),
                quota.receipts,
                quota.ai_summaries,
                timestamp(now)
            ],
        )
        .map_err(db_err)?;

    if inserted > 0 {
        tracing::info!("Created free-tier user on first use: {}", user_id);
    }
    Ok(())
}

impl Store {
    /// Create a user on the free tier. Fails if the id is taken.
    pub fn create_user(&self, new_user: NewUser) -> Result<User, StoreError> {
        let conn = self.conn()?;
        if find_user(&conn, &new_user.id)?.is_some() {
            return Err(StoreError::AlreadyExists);
        }

        let now = Utc::now();
        let quota = PlanTier::Free.quota();
        conn.execute(
            "INSERT INTO users (id, email, name, plan_tier, quota_receipts, quota_ai_summaries, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                new_user.id,
                new_user.email,
                new_user.name,
                PlanTier::Free.as_str(),
                quota.receipts,
                quota.ai_summaries,
                timestamp(now)
            ],
        )
        .map_err(db_err)?;

        tracing::info!(
            "Created user: {} ({})",
            new_user.id,
            new_user.email.as_deref().unwrap_or("no email")
        );

        Ok(User {
            id: new_user.id,
            email: new_user.email,
            name: new_user.name,
            plan_tier: PlanTier::Free,
            quota,
            subscription_id: None,
            customer_id: None,
            billing_period_start: None,
            billing_period_end: None,
            created_at: now,
        })
    }

    pub fn get_user(&self, user_id: &str) -> Result<User, StoreError> {
        let conn = self.conn()?;
        find_user(&conn, user_id)?.ok_or(StoreError::NotFound("User"))
    }

    pub fn user_exists(&self, user_id: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        Ok(find_user(&conn, user_id)?.is_some())
    }

    /// Plan for a user, or the free plan when the user has no record yet.
    pub fn get_user_plan(&self, user_id: &str) -> Result<UserPlan, StoreError> {
        let conn = self.conn()?;
        Ok(find_user(&conn, user_id)?
            .map(|user| user.plan())
            .unwrap_or_else(UserPlan::default_free))
    }

    /// Move a user to another tier, rewriting tier, quota and billing together.
    pub fn update_plan_tier(
        &self,
        user_id: &str,
        tier_name: &str,
        billing: &BillingDetails,
    ) -> Result<User, StoreError> {
        let tier: PlanTier = tier_name.parse()?;
        let quota = tier.quota();

        let conn = self.conn()?;
        let updated = conn
            .execute(
                "UPDATE users SET plan_tier = ?1, quota_receipts = ?2, quota_ai_summaries = ?3,
                 subscription_id = ?4, customer_id = ?5, billing_period_start = ?6, billing_period_end = ?7
                 WHERE id = ?8",
                params![
                    tier.as_str(),
                    quota.receipts,
                    quota.ai_summaries,
                    billing.subscription_id,
                    billing.customer_id,
                    billing.billing_period_start,
                    billing.billing_period_end,
                    user_id
                ],
            )
            .map_err(db_err)?;
        if updated == 0 {
            return Err(StoreError::NotFound("User"));
        }

        tracing::info!("Updated plan for {} to {}", user_id, tier);
        find_user(&conn, user_id)?.ok_or(StoreError::NotFound("User"))
    }
}
