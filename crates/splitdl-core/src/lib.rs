//! splitdl Core - Chunked download queue engine
//!
//! This crate accepts download requests (one per requester, bounded in
//! total), fetches each resource as a stream of size-capped part files, and
//! delivers those parts one per job per cycle through a pluggable sink.

mod delivery;
mod error;
mod fetch;
mod intake;
mod registry;
mod splitter;
mod storage;

#[cfg(test)]
mod testing;

pub use delivery::*;
pub use error::*;
pub use fetch::*;
pub use intake::*;
pub use registry::*;
pub use splitter::*;
pub use storage::*;

use splitdl_types::{Admission, CoreEvent, IncomingMessage, Settings};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// The main splitdl core instance
#[derive(Clone)]
pub struct SplitdlCore {
    /// Active downloads
    registry: Arc<Registry>,
    /// Settings captured at startup
    settings: Arc<Settings>,
    /// Event broadcaster
    event_tx: broadcast::Sender<CoreEvent>,
}

impl SplitdlCore {
    /// Create a core that fetches over HTTP
    pub fn new(settings: Settings) -> Result<Self, SplitdlError> {
        let fetcher = HttpFetcher::new()?;
        Self::with_fetcher(settings, Arc::new(fetcher))
    }

    /// Create a core on top of a custom transport
    pub fn with_fetcher(settings: Settings, fetcher: Arc<dyn Fetcher>) -> Result<Self, SplitdlError> {
        settings.validate().map_err(SplitdlError::InvalidSettings)?;

        let registry = Arc::new(Registry::new(&settings, fetcher));
        let (event_tx, _) = broadcast::channel(1000);

        info!(
            "splitdl core ready: part_size={} max_size={} delay={}s mode={} queue={}",
            settings.part_size, settings.max_size, settings.delay, settings.mode, settings.max_queue_size
        );

        Ok(Self {
            registry,
            settings: Arc::new(settings),
            event_tx,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Subscribe to core events
    pub fn subscribe(&self) -> broadcast::Receiver<CoreEvent> {
        self.event_tx.subscribe()
    }

    /// Emit an event
    pub fn emit(&self, event: CoreEvent) {
        let _ = self.event_tx.send(event);
    }

    // ========================================================================
    // Producer Operations
    // ========================================================================

    /// Ask for `url` to be downloaded on behalf of `key`
    pub fn enqueue(&self, key: &str, url: &str) -> Admission {
        match self.registry.enqueue(key, url) {
            Ok(()) => {
                self.emit(CoreEvent::JobQueued {
                    key: key.to_string(),
                    url: url.to_string(),
                });
                Admission::Accepted
            }
            Err(SplitdlError::AlreadyQueued(_)) => Admission::AlreadyQueued,
            Err(_) => Admission::QueueFull,
        }
    }

    /// Route a message through the configured mode. `None` means the
    /// message is not a download request.
    pub fn handle_message(&self, message: &IncomingMessage) -> Option<Admission> {
        let url = extract_url(self.settings.mode, message)?;
        Some(self.enqueue(&message.sender, &url))
    }

    // ========================================================================
    // Delivery
    // ========================================================================

    /// Build a delivery loop over this core's registry
    pub fn delivery_loop(&self, sink: Arc<dyn DeliverySink>) -> DeliveryLoop {
        DeliveryLoop::new(Arc::clone(&self.registry), sink, self.settings.delay_duration())
            .with_concurrency(self.settings.cycle_concurrency)
            .with_events(self.event_tx.clone())
    }

    /// Run the delivery loop in the background until `cancel` fires
    pub fn start_delivery(
        &self,
        sink: Arc<dyn DeliverySink>,
        cancel: CancellationToken,
    ) -> JoinHandle<()> {
        let delivery = self.delivery_loop(sink);
        tokio::spawn(delivery.run(cancel))
    }
}
