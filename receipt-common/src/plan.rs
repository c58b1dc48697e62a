//! Plan tiers and their monthly quotas.

use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription tier of a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanTier {
    #[default]
    Free,
    Starter,
    Pro,
}

impl PlanTier {
    /// All tiers, cheapest first.
    pub const ALL: [PlanTier; 3] = [PlanTier::Free, PlanTier::Starter, PlanTier::Pro];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanTier::Free => "free",
            PlanTier::Starter => "starter",
            PlanTier::Pro => "pro",
        }
    }

    /// Monthly limits granted by this tier.
    pub fn quota(&self) -> Quota {
        match self {
            PlanTier::Free => Quota {
                receipts: 10,
                ai_summaries: None,
            },
            PlanTier::Starter => Quota {
                receipts: 50,
                ai_summaries: None,
            },
            PlanTier::Pro => Quota {
                receipts: 200,
                ai_summaries: Some(50),
            },
        }
    }

    /// Cheapest tier whose quota includes the given resource at all.
    pub fn cheapest_with(kind: ResourceKind) -> Option<PlanTier> {
        PlanTier::ALL
            .into_iter()
            .find(|tier| tier.quota().limit_for(kind).is_some())
    }
}

impl std::fmt::Display for PlanTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Invalid plan tier: {0}")]
pub struct UnknownPlanTier(pub String);

impl FromStr for PlanTier {
    type Err = UnknownPlanTier;

    /// Case-insensitive, surrounding whitespace ignored.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "free" => Ok(PlanTier::Free),
            "starter" => Ok(PlanTier::Starter),
            "pro" => Ok(PlanTier::Pro),
            _ => Err(UnknownPlanTier(s.to_string())),
        }
    }
}

/// Monthly limits for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Quota {
    /// Receipts that may be uploaded per month
    pub receipts: u32,
    /// AI summaries that may be generated per month, absent when the tier has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_summaries: Option<u32>,
}

impl Quota {
    pub fn limit_for(&self, kind: ResourceKind) -> Option<u32> {
        match kind {
            ResourceKind::Receipts => Some(self.receipts),
            ResourceKind::AiSummaries => self.ai_summaries,
        }
    }
}

/// A quota-consuming resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Receipts,
    AiSummaries,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceKind::Receipts => write!(f, "receipt"),
            ResourceKind::AiSummaries => write!(f, "AI summary"),
        }
    }
}

/// Plan information as shown to the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPlan {
    pub plan_tier: PlanTier,
    pub quota: Quota,
    pub billing_period_start: Option<String>,
    pub billing_period_end: Option<String>,
}

impl UserPlan {
    /// Plan reported for users that have no record yet.
    pub fn default_free() -> Self {
        Self {
            plan_tier: PlanTier::Free,
            quota: PlanTier::Free.quota(),
            billing_period_start: None,
            billing_period_end: None,
        }
    }
}
