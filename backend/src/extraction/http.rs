use std::time::Duration;

use async_trait::async_trait;
use receipt_common::ExtractedFields;
use reqwest::multipart::{Form, Part};
use reqwest::Client;

use super::{ExtractionError, ExtractionInput, Extractor};

/// Client for an external extraction service.
///
/// The document is posted as `multipart/form-data` with a `file` part and
/// `receiptId`/`fileUrl` text fields. The service answers with
/// `{merchant, date, total, items}`, any of which may be null.
pub struct HttpExtractor {
    http_client: Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpExtractor {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, ExtractionError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ExtractionError::Config(e.to_string()))?;
        Ok(Self {
            http_client,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }
}

#[async_trait]
impl Extractor for HttpExtractor {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn extract(&self, input: &ExtractionInput) -> Result<ExtractedFields, ExtractionError> {
        let part = Part::bytes(input.content.clone())
            .file_name(input.file_id.clone())
            .mime_str(&input.content_type)
            .map_err(|e| ExtractionError::RequestFailed(e.to_string()))?;
        let form = Form::new()
            .text("receiptId", input.receipt_id.clone())
            .text("fileUrl", input.file_url.clone())
            .part("file", part);

        let mut request = self.http_client.post(&self.endpoint).multipart(form);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| ExtractionError::RequestFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ExtractionError::ServiceError {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ExtractedFields>()
            .await
            .map_err(|e| ExtractionError::InvalidResponse(e.to_string()))
    }
}
