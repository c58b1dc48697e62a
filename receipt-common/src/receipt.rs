//! Receipt records, partial updates and the aggregates derived from them.

use std::str::FromStr;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Lifecycle status of a receipt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReceiptStatus {
    /// Uploaded, extraction pending or running
    Processing,
    /// Extraction succeeded
    Completed,
    /// Extraction failed, see `processing_error`
    Failed,
    /// Edited by the owner
    ManualEdit,
}

impl ReceiptStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReceiptStatus::Processing => "processing",
            ReceiptStatus::Completed => "completed",
            ReceiptStatus::Failed => "failed",
            ReceiptStatus::ManualEdit => "manual_edit",
        }
    }

    /// Transitions only move forward out of `processing`; a manual edit is
    /// reachable from every status.
    pub fn can_transition_to(&self, next: ReceiptStatus) -> bool {
        match (self, next) {
            (_, ReceiptStatus::ManualEdit) => true,
            (ReceiptStatus::Processing, ReceiptStatus::Completed | ReceiptStatus::Failed) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for ReceiptStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReceiptStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "processing" => Ok(ReceiptStatus::Processing),
            "completed" => Ok(ReceiptStatus::Completed),
            "failed" => Ok(ReceiptStatus::Failed),
            "manual_edit" => Ok(ReceiptStatus::ManualEdit),
            other => Err(format!("unknown receipt status: {}", other)),
        }
    }
}

/// A single line on a receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineItem {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit_price: Option<f64>,
    /// Line total, usually quantity * unit price
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_price: Option<f64>,
}

/// A stored receipt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub id: String,
    pub user_id: String,
    /// Uploaded file backing this receipt, never changes after creation
    pub file_id: String,
    pub file_name: String,
    pub merchant: Option<String>,
    /// Purchase date as written by extraction or the user (ISO-8601)
    pub date: Option<String>,
    pub total: Option<f64>,
    pub items: Option<Vec<LineItem>>,
    pub category: Option<String>,
    pub status: ReceiptStatus,
    pub processing_error: Option<String>,
    pub ai_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// Fields produced by extraction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFields {
    #[serde(default)]
    pub merchant: Option<String>,
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub total: Option<f64>,
    #[serde(default)]
    pub items: Option<Vec<LineItem>>,
}

/// Update to a single optional field.
///
/// On the wire an absent key is `Keep`, `null` is `Clear` and any value is `Set`.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum FieldUpdate<T> {
    #[default]
    Keep,
    Clear,
    Set(T),
}

impl<T> FieldUpdate<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, FieldUpdate::Keep)
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            FieldUpdate::Set(value) => Some(value),
            _ => None,
        }
    }
}

impl<T: Clone> FieldUpdate<T> {
    /// Write this update into `target`, leaving it untouched for `Keep`.
    pub fn apply(&self, target: &mut Option<T>) {
        match self {
            FieldUpdate::Keep => {}
            FieldUpdate::Clear => *target = None,
            FieldUpdate::Set(value) => *target = Some(value.clone()),
        }
    }
}

impl<T> From<Option<T>> for FieldUpdate<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => FieldUpdate::Set(v),
            None => FieldUpdate::Clear,
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for FieldUpdate<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(FieldUpdate::from)
    }
}

impl<T: Serialize> Serialize for FieldUpdate<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            FieldUpdate::Set(value) => serializer.serialize_some(value),
            _ => serializer.serialize_none(),
        }
    }
}

/// Partial update of a receipt. `file_id`, `user_id` and timestamps are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptPatch {
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub merchant: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub date: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub total: FieldUpdate<f64>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub items: FieldUpdate<Vec<LineItem>>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub category: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<ReceiptStatus>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub processing_error: FieldUpdate<String>,
    #[serde(default, skip_serializing_if = "FieldUpdate::is_keep")]
    pub ai_summary: FieldUpdate<String>,
}

impl ReceiptPatch {
    /// Patch written when extraction succeeds.
    pub fn completed(fields: &ExtractedFields) -> Self {
        Self {
            merchant: fields.merchant.clone().into(),
            date: fields.date.clone().into(),
            total: fields.total.into(),
            items: fields.items.clone().into(),
            status: Some(ReceiptStatus::Completed),
            ..Default::default()
        }
    }

    /// Patch written when extraction fails.
    pub fn failed(message: &str) -> Self {
        Self {
            status: Some(ReceiptStatus::Failed),
            processing_error: FieldUpdate::Set(message.to_string()),
            ..Default::default()
        }
    }

    /// True when any user-editable data field is touched (status and
    /// processing error excluded).
    pub fn touches_data(&self) -> bool {
        !(self.merchant.is_keep()
            && self.date.is_keep()
            && self.total.is_keep()
            && self.items.is_keep()
            && self.category.is_keep()
            && self.ai_summary.is_keep())
    }

    /// A user's data edit without an explicit status marks the receipt as
    /// manually edited, which stops any extraction still in flight.
    pub fn into_user_edit(mut self) -> Self {
        if self.status.is_none() && self.touches_data() {
            self.status = Some(ReceiptStatus::ManualEdit);
        }
        self
    }

    /// Apply every field except the status, which the store validates first.
    pub fn apply_fields(&self, receipt: &mut Receipt) {
        self.merchant.apply(&mut receipt.merchant);
        self.date.apply(&mut receipt.date);
        self.total.apply(&mut receipt.total);
        self.items.apply(&mut receipt.items);
        self.category.apply(&mut receipt.category);
        self.processing_error.apply(&mut receipt.processing_error);
        self.ai_summary.apply(&mut receipt.ai_summary);
    }
}

/// Per-user receipt statistics for the dashboard.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total: u64,
    pub this_month: u64,
    pub this_week: u64,
    pub last_uploaded: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryAmount {
    pub name: String,
    pub amount: f64,
}

/// Spending over a date range, grouped by category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonthlySummary {
    pub total: f64,
    pub by_category: Vec<CategoryAmount>,
}

/// Parse a receipt date: RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS`, or a bare
/// `YYYY-MM-DD` (midnight UTC).
pub fn parse_receipt_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(naive.and_utc());
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_receipt() -> Receipt {
        let now = Utc::now();
        Receipt {
            id: "r1".to_string(),
            user_id: "user123".to_string(),
            file_id: "f1".to_string(),
            file_name: "lunch.pdf".to_string(),
            merchant: Some("Cafe".to_string()),
            date: Some("2024-01-15".to_string()),
            total: Some(12.5),
            items: None,
            category: Some("Food".to_string()),
            status: ReceiptStatus::Completed,
            processing_error: None,
            ai_summary: None,
            created_at: now,
            last_modified: now,
        }
    }

    #[test]
    fn test_status_serialization() {
        let json = serde_json::to_string(&ReceiptStatus::ManualEdit).unwrap();
        assert_eq!(json, r#""manual_edit""#);
        assert_eq!("manual_edit".parse::<ReceiptStatus>(), Ok(ReceiptStatus::ManualEdit));
        assert!("done".parse::<ReceiptStatus>().is_err());
    }

    #[test]
    fn test_status_transitions_from_processing() {
        let processing = ReceiptStatus::Processing;
        assert!(processing.can_transition_to(ReceiptStatus::Completed));
        assert!(processing.can_transition_to(ReceiptStatus::Failed));
        assert!(processing.can_transition_to(ReceiptStatus::ManualEdit));
        assert!(!processing.can_transition_to(ReceiptStatus::Processing));
    }

    #[test]
    fn test_status_transitions_from_terminal_states() {
        for status in [ReceiptStatus::Completed, ReceiptStatus::Failed, ReceiptStatus::ManualEdit] {
            assert!(status.can_transition_to(ReceiptStatus::ManualEdit));
            assert!(!status.can_transition_to(ReceiptStatus::Processing));
            assert!(!status.can_transition_to(ReceiptStatus::Completed));
            assert!(!status.can_transition_to(ReceiptStatus::Failed));
        }
    }

    #[test]
    fn test_patch_distinguishes_absent_null_and_value() {
        let patch: ReceiptPatch =
            serde_json::from_str(r#"{"merchant": "Shop", "category": null}"#).unwrap();
        assert_eq!(patch.merchant, FieldUpdate::Set("Shop".to_string()));
        assert_eq!(patch.category, FieldUpdate::Clear);
        assert_eq!(patch.total, FieldUpdate::Keep);
        assert!(patch.status.is_none());
    }

    #[test]
    fn test_patch_leaves_omitted_fields_alone() {
        let mut receipt = sample_receipt();
        let patch: ReceiptPatch = serde_json::from_str(r#"{"total": 20.0}"#).unwrap();
        patch.apply_fields(&mut receipt);

        assert_eq!(receipt.total, Some(20.0));
        assert_eq!(receipt.merchant.as_deref(), Some("Cafe"));
        assert_eq!(receipt.category.as_deref(), Some("Food"));
        assert_eq!(receipt.date.as_deref(), Some("2024-01-15"));
    }

    #[test]
    fn test_patch_clear_removes_value() {
        let mut receipt = sample_receipt();
        let patch: ReceiptPatch = serde_json::from_str(r#"{"category": null}"#).unwrap();
        patch.apply_fields(&mut receipt);
        assert!(receipt.category.is_none());
    }

    #[test]
    fn test_patch_serialization_skips_kept_fields() {
        let patch = ReceiptPatch::failed("boom");
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json, serde_json::json!({"status": "failed", "processingError": "boom"}));
    }

    #[test]
    fn test_completed_patch_carries_extracted_fields() {
        let fields = ExtractedFields {
            merchant: Some("Sample Store".to_string()),
            date: None,
            total: Some(42.99),
            items: Some(vec![]),
        };
        let patch = ReceiptPatch::completed(&fields);
        assert_eq!(patch.status, Some(ReceiptStatus::Completed));
        assert_eq!(patch.total, FieldUpdate::Set(42.99));
        assert_eq!(patch.date, FieldUpdate::Clear);
        assert!(patch.category.is_keep());
    }

    #[test]
    fn test_touches_data() {
        assert!(!ReceiptPatch::failed("x").touches_data());
        let patch: ReceiptPatch = serde_json::from_str(r#"{"category": "Food"}"#).unwrap();
        assert!(patch.touches_data());
    }

    #[test]
    fn test_user_edit_marks_manual_edit() {
        let patch: ReceiptPatch = serde_json::from_str(r#"{"merchant": "Corner Shop"}"#).unwrap();
        assert_eq!(patch.into_user_edit().status, Some(ReceiptStatus::ManualEdit));

        let empty = ReceiptPatch::default().into_user_edit();
        assert_eq!(empty.status, None);
    }

    #[test]
    fn test_line_item_camel_case() {
        let item: LineItem =
            serde_json::from_str(r#"{"name": "Milk", "quantity": 2, "unitPrice": 1.5, "totalPrice": 3.0}"#)
                .unwrap();
        assert_eq!(item.unit_price, Some(1.5));
        assert_eq!(item.total_price, Some(3.0));

        let json = serde_json::to_string(&LineItem {
            name: "Bread".to_string(),
            quantity: None,
            unit_price: None,
            total_price: None,
        })
        .unwrap();
        assert_eq!(json, r#"{"name":"Bread"}"#);
    }

    #[test]
    fn test_parse_receipt_date_formats() {
        let midnight = Utc.with_ymd_and_hms(2024, 1, 15, 0, 0, 0).unwrap();
        assert_eq!(parse_receipt_date("2024-01-15"), Some(midnight));
        assert_eq!(parse_receipt_date("2024-01-15T00:00:00Z"), Some(midnight));
        assert_eq!(parse_receipt_date("2024-01-15T00:00:00.000Z"), Some(midnight));
        assert_eq!(parse_receipt_date("2024-01-15T02:00:00+02:00"), Some(midnight));
        assert_eq!(parse_receipt_date("2024-01-15T00:00:00"), Some(midnight));
        assert_eq!(parse_receipt_date(""), None);
        assert_eq!(parse_receipt_date("yesterday"), None);
    }

    #[test]
    fn test_receipt_serializes_camel_case() {
        let json = serde_json::to_value(sample_receipt()).unwrap();
        assert_eq!(json["fileId"], "f1");
        assert_eq!(json["status"], "completed");
        assert!(json.get("lastModified").is_some());
        assert!(json["processingError"].is_null());
    }
}
