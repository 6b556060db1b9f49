//! Broadcast of encoded frames to the registered destinations.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::destination::Destination;
use crate::event::{emit, EventCallback};
use crate::{DestinationError, RelayEvent, SbcFrame};

/// Default limit on a single destination write.
const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_millis(50);

/// Outcome of one [`Fanout::broadcast`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BroadcastReport {
    /// Destinations that accepted the frame.
    pub delivered: usize,
    /// Destinations whose write failed.
    pub failed: usize,
}

/// The dynamic set of destinations.
///
/// Destinations are identified by their `Arc` allocation, so adding the same
/// `Arc` twice registers it once. [`add`](Self::add) and
/// [`remove`](Self::remove) may be called from any task while a broadcast is
/// running; the lock is only held long enough to copy the current set.
///
/// Every write is bounded by the write timeout, so a stalled destination
/// costs at most that long per frame.
pub struct Fanout {
    destinations: Mutex<Vec<Arc<dyn Destination>>>,
    event_callback: Option<EventCallback>,
    write_timeout: Duration,
}

impl Fanout {
    /// Creates an empty fanout.
    pub fn new() -> Self {
        Self {
            destinations: Mutex::new(Vec::new()),
            event_callback: None,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }

    /// Sets the limit on a single destination write.
    #[must_use]
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the event callback.
    #[must_use]
    pub fn with_event_callback(mut self, callback: Option<EventCallback>) -> Self {
        self.event_callback = callback;
        self
    }

    /// Registers a destination. Returns `false` if it was already registered.
    pub fn add(&self, destination: Arc<dyn Destination>) -> bool {
        let mut destinations = self.destinations.lock();
        if destinations.iter().any(|d| same(d, &destination)) {
            return false;
        }
        tracing::debug!(destination = destination.name(), "destination added");
        destinations.push(destination);
        true
    }

    /// Unregisters a destination. Returns `false` if it was not registered.
    pub fn remove(&self, destination: &Arc<dyn Destination>) -> bool {
        let mut destinations = self.destinations.lock();
        let before = destinations.len();
        destinations.retain(|d| !same(d, destination));
        let removed = destinations.len() != before;
        if removed {
            tracing::debug!(destination = destination.name(), "destination removed");
        }
        removed
    }

    /// Returns `true` if `destination` is registered.
    pub fn contains(&self, destination: &Arc<dyn Destination>) -> bool {
        self.destinations
            .lock()
            .iter()
            .any(|d| same(d, destination))
    }

    /// Number of registered destinations.
    pub fn len(&self) -> usize {
        self.destinations.lock().len()
    }

    /// Returns `true` if no destination is registered.
    pub fn is_empty(&self) -> bool {
        self.destinations.lock().is_empty()
    }

    /// Writes `frame` to every registered destination concurrently.
    ///
    /// A failed or timed out write is reported and does not affect the other
    /// writes or the failing destination's registration.
    pub async fn broadcast(&self, frame: &SbcFrame) -> BroadcastReport {
        let snapshot: Vec<Arc<dyn Destination>> = self.destinations.lock().clone();
        let limit = self.write_timeout;

        let writes = snapshot.iter().map(|destination| async move {
            let result = tokio::time::timeout(limit, destination.write(frame))
                .await
                .unwrap_or(Err(DestinationError::TimedOut(limit)));
            match result {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(destination = destination.name(), error = %e, "write failed");
                    emit(
                        self.event_callback.as_ref(),
                        RelayEvent::DestinationError {
                            destination: destination.name().to_string(),
                            error: e.to_string(),
                        },
                    );
                    false
                }
            }
        });

        let results = futures::future::join_all(writes).await;
        let delivered = results.iter().filter(|ok| **ok).count();
        BroadcastReport {
            delivered,
            failed: results.len() - delivered,
        }
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Fanout {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fanout")
            .field("destinations", &self.len())
            .finish_non_exhaustive()
    }
}

fn same(a: &Arc<dyn Destination>, b: &Arc<dyn Destination>) -> bool {
    std::ptr::eq(Arc::as_ptr(a).cast::<()>(), Arc::as_ptr(b).cast::<()>())
}
