//! Monthly usage counters.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ResourceKind;

/// Usage of quota-consuming resources for one user in one month.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageCounters {
    /// Month in `YYYY-MM` format (UTC)
    pub month: String,
    pub receipts_uploaded: u32,
    pub ai_summaries_generated: u32,
    pub last_updated: Option<DateTime<Utc>>,
}

impl UsageCounters {
    pub fn empty(month: &str) -> Self {
        Self {
            month: month.to_string(),
            receipts_uploaded: 0,
            ai_summaries_generated: 0,
            last_updated: None,
        }
    }

    pub fn count(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::Receipts => self.receipts_uploaded,
            ResourceKind::AiSummaries => self.ai_summaries_generated,
        }
    }
}

/// Usage bucket key for an instant, e.g. `2024-03`.
pub fn month_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m").to_string()
}
