//! In-process signal bus.
//!
//! Every signal is broadcast to live subscribers (the SSE stream). Uploaded
//! signals are additionally queued for the extraction dispatcher. The queue is
//! bounded; a signal that does not fit is dropped here and picked up later by
//! the dispatcher's recovery sweep, since its job row is already persisted.

use receipt_common::{ReceiptUploaded, Signal};
use tokio::sync::{broadcast, mpsc};

const BROADCAST_CAPACITY: usize = 256;

#[derive(Clone)]
pub struct SignalBus {
    events: broadcast::Sender<Signal>,
    triggers: mpsc::Sender<ReceiptUploaded>,
}

impl SignalBus {
    /// Create a bus and the receiving end of its extraction trigger queue.
    pub fn new(queue_capacity: usize) -> (Self, mpsc::Receiver<ReceiptUploaded>) {
        let (events, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (triggers, trigger_rx) = mpsc::channel(queue_capacity.max(1));
        (Self { events, triggers }, trigger_rx)
    }

    pub fn publish(&self, signal: Signal) {
        tracing::debug!(
            signal = signal.name(),
            receipt_id = signal.receipt_id(),
            "Publishing signal"
        );

        if let Signal::Uploaded(uploaded) = &signal {
            match self.triggers.try_send(uploaded.clone()) {
                Ok(()) => {}
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        "Extraction queue full, receipt {} left to recovery",
                        uploaded.receipt_id
                    );
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    tracing::warn!("Extraction dispatcher is not running");
                }
            }
        }

        // No subscribers is fine
        let _ = self.events.send(signal);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Signal> {
        self.events.subscribe()
    }
}
