//! Dispatcher for extraction jobs.
//!
//! Consumes `receipt/uploaded` triggers from the signal bus and runs the
//! workflow for each, with bounded concurrency. A periodic sweep re-enqueues
//! every job that has not finished, which covers jobs interrupted by a restart
//! and triggers dropped because the queue was full.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use receipt_common::ReceiptUploaded;
use tokio::sync::{mpsc, Mutex, Semaphore};

use super::ExtractionWorkflow;
use crate::store::Store;

pub struct ExtractionDispatcher {
    workflow: Arc<ExtractionWorkflow>,
    store: Arc<Store>,
    triggers: mpsc::Receiver<ReceiptUploaded>,
    permits: Arc<Semaphore>,
    /// Receipts with a spawned run that has not finished yet.
    in_flight: Arc<Mutex<HashSet<String>>>,
    recovery_interval: Duration,
}

impl ExtractionDispatcher {
    pub fn new(
        workflow: Arc<ExtractionWorkflow>,
        store: Arc<Store>,
        triggers: mpsc::Receiver<ReceiptUploaded>,
        max_concurrent: usize,
        recovery_interval: Duration,
    ) -> Self {
        Self {
            workflow,
            store,
            triggers,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            recovery_interval,
        }
    }

    /// Run the dispatcher loop until the trigger channel closes.
    ///
    /// The first recovery sweep runs immediately.
    pub async fn run(mut self) {
        let mut sweep = tokio::time::interval(self.recovery_interval);
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                trigger = self.triggers.recv() => {
                    match trigger {
                        Some(uploaded) => self.dispatch(uploaded.receipt_id).await,
                        None => {
                            tracing::info!("Signal bus closed, stopping extraction dispatcher");
                            break;
                        }
                    }
                }
                _ = sweep.tick() => {
                    self.recover().await;
                }
            }
        }
    }

    async fn recover(&self) {
        let jobs = match self.store.unfinished_jobs() {
            Ok(jobs) => jobs,
            Err(e) => {
                tracing::error!("Failed to load unfinished extraction jobs: {}", e);
                return;
            }
        };

        if !jobs.is_empty() {
            tracing::info!("Recovering {} unfinished extraction jobs", jobs.len());
        }
        for job in jobs {
            self.dispatch(job.receipt_id).await;
        }
    }

    async fn dispatch(&self, receipt_id: String) {
        if !self.in_flight.lock().await.insert(receipt_id.clone()) {
            tracing::debug!("Extraction for {} already in flight", receipt_id);
            return;
        }

        let workflow = self.workflow.clone();
        let permits = self.permits.clone();
        let in_flight = self.in_flight.clone();

        tokio::spawn(async move {
            match permits.acquire_owned().await {
                Ok(_permit) => match workflow.run(&receipt_id).await {
                    Ok(outcome) => {
                        tracing::debug!("Extraction job {} finished: {:?}", receipt_id, outcome);
                    }
                    Err(e) => {
                        tracing::error!("Extraction job {} stopped: {}", receipt_id, e);
                    }
                },
                Err(e) => tracing::error!("Extraction permits closed: {}", e),
            }
            in_flight.lock().await.remove(&receipt_id);
        });
    }
}
