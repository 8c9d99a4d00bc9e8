//! Memory pressure notifications
//!
//! The cache does not watch the operating system itself. It consumes a
//! [`PressureSource`]; platform integrations forward their events into a
//! [`PressureNotifier`] or implement the trait directly.

use futures::{Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tracing::{debug, warn};

use crate::policy::MemoryPressureLevel;

/// Type alias for a boxed stream of pressure levels
pub type PressureStream = Pin<Box<dyn Stream<Item = MemoryPressureLevel> + Send>>;

/// Source of memory pressure events
pub trait PressureSource: Send + Sync {
    /// Start receiving events emitted from now on
    fn subscribe(&self) -> PressureStream;
}

/// Default channel capacity for [`PressureNotifier`]
const DEFAULT_CAPACITY: usize = 16;

/// Broadcast-backed pressure source
///
/// Every subscriber sees every event sent after it subscribed. A subscriber
/// that falls more than the channel capacity behind skips the missed events.
#[derive(Clone)]
pub struct PressureNotifier {
    sender: broadcast::Sender<MemoryPressureLevel>,
}

impl PressureNotifier {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Send an event to all current subscribers. Returns how many received it.
    pub fn notify(&self, level: MemoryPressureLevel) -> usize {
        match self.sender.send(level) {
            Ok(receivers) => {
                debug!("Delivered {} pressure event to {} subscribers", level, receivers);
                receivers
            }
            Err(_) => 0,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for PressureNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl PressureSource for PressureNotifier {
    fn subscribe(&self) -> PressureStream {
        let stream = BroadcastStream::new(self.sender.subscribe()).filter_map(|event| async move {
            match event {
                Ok(level) => Some(level),
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!("Pressure subscriber lagged, skipped {} events", missed);
                    None
                }
            }
        });
        Box::pin(stream)
    }
}
