pub mod auth;
pub mod config;
pub mod error;
pub mod extraction;
pub mod ingest;
pub mod logging;
pub mod routes;
pub mod signals;
pub mod store;
pub mod test_util;
pub mod workflow;

pub use auth::{AuthUser, JwksClient};
pub use config::Config;
pub use error::ApiError;
pub use ingest::FileIngest;
pub use signals::SignalBus;
pub use store::{Store, StoreError};
pub use workflow::{ExtractionDispatcher, ExtractionWorkflow};

use std::sync::Arc;
use std::time::Duration;

use receipt_common::ReceiptUploaded;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::auth::UserRateLimiter;
use crate::extraction::ExtractionError;

/// Shared application state.
pub struct AppState {
    pub config: Config,
    pub jwks_client: JwksClient,
    pub store: Arc<Store>,
    pub files: Arc<FileIngest>,
    /// Signal bus for receipt lifecycle events.
    pub signals: SignalBus,
    pub rate_limiter: UserRateLimiter,
}

impl AppState {
    /// Open the store and blob directory named in `config`.
    ///
    /// Returns the state and the trigger queue the extraction dispatcher reads.
    pub fn new(
        config: Config,
        jwks_client: JwksClient,
    ) -> Result<(Self, mpsc::Receiver<ReceiptUploaded>), StoreError> {
        let store = Arc::new(Store::new(&config.database.url)?);
        let files = Arc::new(FileIngest::new(store.clone(), &config.storage)?);
        let (signals, triggers) = SignalBus::new(config.extraction.queue_capacity);
        let rate_limiter = UserRateLimiter::new(config.rate_limit.requests_per_minute);

        let state = Self {
            config,
            jwks_client,
            store,
            files,
            signals,
            rate_limiter,
        };
        Ok((state, triggers))
    }

    /// Build the extraction workflow from the configuration and start its
    /// dispatcher in the background.
    pub fn spawn_extraction(
        &self,
        triggers: mpsc::Receiver<ReceiptUploaded>,
    ) -> Result<JoinHandle<()>, ExtractionError> {
        let settings = &self.config.extraction;
        let extractor = extraction::from_config(settings)?;
        tracing::info!("Using {} extractor", extractor.name());

        let workflow = Arc::new(ExtractionWorkflow::new(
            self.store.clone(),
            self.files.clone(),
            extractor,
            self.signals.clone(),
            Duration::from_secs(settings.timeout_secs),
        ));
        let dispatcher = ExtractionDispatcher::new(
            workflow,
            self.store.clone(),
            triggers,
            settings.max_concurrent,
            Duration::from_secs(settings.recovery_interval_secs),
        );

        Ok(tokio::spawn(dispatcher.run()))
    }
}
