use std::time::Duration;

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use receipt_common::{ExtractedFields, LineItem};

use super::{ExtractionError, ExtractionInput, Extractor};

/// Stand-in extractor that returns a fixed sample receipt after a delay.
pub struct SimulatedExtractor {
    delay: Duration,
}

impl SimulatedExtractor {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }

    fn sample() -> ExtractedFields {
        ExtractedFields {
            merchant: Some("Sample Store".to_string()),
            date: Some(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
            total: Some(42.99),
            items: Some(vec![
                LineItem {
                    name: "Item 1".to_string(),
                    quantity: Some(2.0),
                    unit_price: Some(9.99),
                    total_price: Some(19.98),
                },
                LineItem {
                    name: "Item 2".to_string(),
                    quantity: Some(1.0),
                    unit_price: Some(23.01),
                    total_price: Some(23.01),
                },
            ]),
        }
    }
}

#[async_trait]
impl Extractor for SimulatedExtractor {
    fn name(&self) -> &'static str {
        "simulated"
    }

    async fn extract(&self, input: &ExtractionInput) -> Result<ExtractedFields, ExtractionError> {
        tracing::debug!("Simulating extraction for receipt {}", input.receipt_id);
        tokio::time::sleep(self.delay).await;
        Ok(Self::sample())
    }
}
