//! Receipt field extraction.
//!
//! The `Extractor` trait hides where fields come from. The simulated extractor
//! returns fixed sample data; the HTTP extractor delegates to an external
//! document-understanding service.

mod http;
mod simulated;

pub use http::HttpExtractor;
pub use simulated::SimulatedExtractor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use receipt_common::ExtractedFields;

use crate::config::{ExtractionConfig, ExtractionProvider};

/// A document to extract fields from.
#[derive(Debug, Clone)]
pub struct ExtractionInput {
    pub receipt_id: String,
    pub file_id: String,
    pub file_url: String,
    pub content_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum ExtractionError {
    #[error("Extraction request failed: {0}")]
    RequestFailed(String),
    #[error("Extraction service returned {status}: {body}")]
    ServiceError { status: u16, body: String },
    #[error("Invalid extraction response: {0}")]
    InvalidResponse(String),
    #[error("Extractor misconfigured: {0}")]
    Config(String),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Extractor: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    async fn extract(&self, input: &ExtractionInput) -> Result<ExtractedFields, ExtractionError>;
}

/// Build the extractor selected in the configuration.
pub fn from_config(config: &ExtractionConfig) -> Result<Arc<dyn Extractor>, ExtractionError> {
    match config.provider {
        ExtractionProvider::Simulated => Ok(Arc::new(SimulatedExtractor::new(Duration::from_millis(
            config.simulated_delay_ms,
        )))),
        ExtractionProvider::Http => {
            let endpoint = config
                .endpoint
                .as_deref()
                .ok_or_else(|| ExtractionError::Config("extraction.endpoint is required for the http provider".to_string()))?;
            Ok(Arc::new(HttpExtractor::new(
                endpoint,
                config.api_key.clone(),
                Duration::from_secs(config.timeout_secs),
            )?))
        }
    }
}
