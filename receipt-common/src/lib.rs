//! Receipt Tracker Common Types
//!
//! Shared types used by the backend and by anything that consumes its API or signals.

pub mod plan;
pub mod receipt;
pub mod signal;
pub mod usage;

pub use plan::{PlanTier, Quota, ResourceKind, UnknownPlanTier, UserPlan};
pub use receipt::{
    parse_receipt_date, CategoryAmount, ExtractedFields, FieldUpdate, LineItem, MonthlySummary,
    Receipt, ReceiptPatch, ReceiptStatus, UserStats,
};
pub use signal::{ReceiptError, ReceiptExtracted, ReceiptUploaded, Signal};
pub use usage::{month_key, UsageCounters};
