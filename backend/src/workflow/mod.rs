//! Background extraction of receipt fields.
//!
//! A job moves through four steps, each recorded in the store once done:
//!
//! 1. resolve the uploaded file
//! 2. run the extractor (bounded by a timeout)
//! 3. write the fields to the receipt and mark it completed
//! 4. publish `receipt/extracted`
//!
//! Running a job again skips every step already recorded, so a job cut short
//! by a restart resumes where it stopped. An error in steps 1 to 3 marks the
//! receipt failed and publishes `receipt/error`; failed jobs are not retried.

mod dispatcher;

pub use dispatcher::ExtractionDispatcher;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use receipt_common::{ExtractedFields, ReceiptError, ReceiptExtracted, ReceiptStatus, Signal};

use crate::extraction::{ExtractionError, ExtractionInput, Extractor};
use crate::ingest::FileIngest;
use crate::signals::SignalBus;
use crate::store::{ExtractionJob, JobStep, Store, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("File not found or URL is missing")]
    FileMissing,
    #[error("Extraction timed out after {0}s")]
    Timeout(u64),
    #[error(transparent)]
    Extraction(#[from] ExtractionError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How a run of a job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// Fields were stored and `receipt/extracted` published
    Completed,
    /// The receipt was marked failed and `receipt/error` published
    Failed,
    /// The receipt was deleted or edited meanwhile; the job was dropped
    Retired,
    /// Nothing to do: no such job, or it already finished
    Skipped,
}

pub struct ExtractionWorkflow {
    store: Arc<Store>,
    files: Arc<FileIngest>,
    extractor: Arc<dyn Extractor>,
    signals: SignalBus,
    timeout: Duration,
}

impl ExtractionWorkflow {
    pub fn new(
        store: Arc<Store>,
        files: Arc<FileIngest>,
        extractor: Arc<dyn Extractor>,
        signals: SignalBus,
        timeout: Duration,
    ) -> Self {
        Self {
            store,
            files,
            extractor,
            signals,
            timeout,
        }
    }

    /// Run (or resume) the job for a receipt.
    pub async fn run(&self, receipt_id: &str) -> Result<JobOutcome, StoreError> {
        let Some(job) = self.store.get_job(receipt_id)? else {
            tracing::debug!("No extraction job for receipt {}", receipt_id);
            return Ok(JobOutcome::Skipped);
        };
        if job.step.is_terminal() {
            return Ok(JobOutcome::Skipped);
        }

        if job.step < JobStep::Committed && !self.receipt_is_processing(receipt_id)? {
            tracing::info!("Receipt {} is no longer processing, dropping its job", receipt_id);
            self.store.retire_job(receipt_id)?;
            return Ok(JobOutcome::Retired);
        }

        let attempt = self.store.start_attempt(receipt_id, Utc::now())?;
        tracing::info!(
            receipt_id,
            step = job.step.as_str(),
            attempt,
            extractor = self.extractor.name(),
            "Running extraction job"
        );

        let fields = match self.advance(&job).await {
            Ok(Some(fields)) => fields,
            Ok(None) => return Ok(JobOutcome::Retired),
            Err(e) => return self.fail(&job, &e),
        };

        self.signals.publish(Signal::Extracted(ReceiptExtracted::new(
            &job.user_id,
            &job.receipt_id,
            fields,
        )));
        self.store.record_emitted(receipt_id, Utc::now())?;

        tracing::info!("Extraction completed for receipt {}", receipt_id);
        Ok(JobOutcome::Completed)
    }

    fn receipt_is_processing(&self, receipt_id: &str) -> Result<bool, StoreError> {
        match self.store.get_receipt(receipt_id) {
            Ok(receipt) => Ok(receipt.status == ReceiptStatus::Processing),
            Err(StoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Steps 1 to 3. Returns the committed fields, or `None` if the receipt
    /// stopped accepting them.
    async fn advance(&self, job: &ExtractionJob) -> Result<Option<ExtractedFields>, WorkflowError> {
        if job.step >= JobStep::Committed {
            return match &job.extracted {
                Some(fields) => Ok(Some(fields.clone())),
                None => {
                    let receipt = self.store.get_receipt(&job.receipt_id)?;
                    Ok(Some(ExtractedFields {
                        merchant: receipt.merchant,
                        date: receipt.date,
                        total: receipt.total,
                        items: receipt.items,
                    }))
                }
            };
        }

        let file_url = match (&job.file_url, job.step >= JobStep::FileResolved) {
            (Some(url), true) => url.clone(),
            _ => self.resolve_file(job)?,
        };

        let fields = match (&job.extracted, job.step >= JobStep::Extracted) {
            (Some(fields), true) => fields.clone(),
            _ => self.extract(job, file_url).await?,
        };

        if self
            .store
            .commit_extraction(&job.receipt_id, &fields, Utc::now())?
            .is_none()
        {
            tracing::info!("Receipt {} changed during extraction, result discarded", job.receipt_id);
            return Ok(None);
        }

        Ok(Some(fields))
    }

    fn resolve_file(&self, job: &ExtractionJob) -> Result<String, WorkflowError> {
        let resolved = match self.files.resolve(&job.file_id) {
            Ok(resolved) => resolved,
            Err(StoreError::NotFound(_)) => return Err(WorkflowError::FileMissing),
            Err(e) => return Err(e.into()),
        };
        if resolved.url.is_empty() {
            return Err(WorkflowError::FileMissing);
        }

        self.store
            .record_file_resolved(&job.receipt_id, &resolved.url, Utc::now())?;
        Ok(resolved.url)
    }

    async fn extract(&self, job: &ExtractionJob, file_url: String) -> Result<ExtractedFields, WorkflowError> {
        let resolved = match self.files.resolve(&job.file_id) {
            Ok(resolved) => resolved,
            Err(StoreError::NotFound(_)) => return Err(WorkflowError::FileMissing),
            Err(e) => return Err(e.into()),
        };
        let content = match self.files.read(&job.file_id).await {
            Ok(content) => content,
            Err(StoreError::NotFound(_)) => return Err(WorkflowError::FileMissing),
            Err(e) => return Err(e.into()),
        };

        let input = ExtractionInput {
            receipt_id: job.receipt_id.clone(),
            file_id: job.file_id.clone(),
            file_url,
            content_type: resolved.file.content_type,
            content,
        };

        let fields = tokio::time::timeout(self.timeout, self.extractor.extract(&input))
            .await
            .map_err(|_| WorkflowError::Timeout(self.timeout.as_secs()))??;

        self.store
            .record_extracted(&job.receipt_id, &fields, Utc::now())?;
        Ok(fields)
    }

    fn fail(&self, job: &ExtractionJob, error: &WorkflowError) -> Result<JobOutcome, StoreError> {
        let message = error.to_string();
        tracing::warn!("Extraction failed for receipt {}: {}", job.receipt_id, message);

        if self
            .store
            .fail_extraction(&job.receipt_id, &message, Utc::now())?
            .is_none()
        {
            return Ok(JobOutcome::Retired);
        }

        self.signals.publish(Signal::Error(ReceiptError {
            user_id: job.user_id.clone(),
            receipt_id: job.receipt_id.clone(),
            error_message: message,
        }));
        Ok(JobOutcome::Failed)
    }
}
