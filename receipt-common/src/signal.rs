//! Asynchronous signals emitted over a receipt's lifecycle.
//!
//! Signals are JSON objects of the form `{"name": "...", "data": {...}}`:
//!
//! - `receipt/uploaded`: a receipt was created and awaits extraction
//! - `receipt/extracted`: extraction finished and the fields were stored
//! - `receipt/error`: extraction failed (`receipt/extraction-failed` is accepted
//!   as an alias when decoding)

use serde::{Deserialize, Serialize};

use crate::{ExtractedFields, LineItem};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptUploaded {
    pub user_id: String,
    pub receipt_id: String,
    pub file_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptExtracted {
    pub user_id: String,
    pub receipt_id: String,
    pub merchant: Option<String>,
    pub date: Option<String>,
    pub total: Option<f64>,
    pub items: Option<Vec<LineItem>>,
}

impl ReceiptExtracted {
    pub fn new(user_id: &str, receipt_id: &str, fields: ExtractedFields) -> Self {
        Self {
            user_id: user_id.to_string(),
            receipt_id: receipt_id.to_string(),
            merchant: fields.merchant,
            date: fields.date,
            total: fields.total,
            items: fields.items,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiptError {
    pub user_id: String,
    pub receipt_id: String,
    pub error_message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", content = "data")]
pub enum Signal {
    #[serde(rename = "receipt/uploaded")]
    Uploaded(ReceiptUploaded),
    #[serde(rename = "receipt/extracted")]
    Extracted(ReceiptExtracted),
    #[serde(rename = "receipt/error", alias = "receipt/extraction-failed")]
    Error(ReceiptError),
}

impl Signal {
    pub fn name(&self) -> &'static str {
        match self {
            Signal::Uploaded(_) => "receipt/uploaded",
            Signal::Extracted(_) => "receipt/extracted",
            Signal::Error(_) => "receipt/error",
        }
    }

    pub fn user_id(&self) -> &str {
        match self {
            Signal::Uploaded(data) => &data.user_id,
            Signal::Extracted(data) => &data.user_id,
            Signal::Error(data) => &data.user_id,
        }
    }

    pub fn receipt_id(&self) -> &str {
        match self {
            Signal::Uploaded(data) => &data.receipt_id,
            Signal::Extracted(data) => &data.receipt_id,
            Signal::Error(data) => &data.receipt_id,
        }
    }

    /// Build a signal from a name and a loose JSON payload.
    pub fn from_parts(name: &str, data: serde_json::Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::json!({ "name": name, "data": data }))
    }
}
