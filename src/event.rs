//! Runtime events for monitoring relay health.
//!
//! Events are non-fatal notifications. The relay keeps running after any
//! event is emitted; they're for logging and metrics, not error handling.

use std::sync::Arc;
use std::time::Duration;

use crate::server::{ModuleId, SampleFormat, SampleSpec};
use crate::SessionState;

/// Runtime events emitted by a running relay.
///
/// # Example
///
/// ```
/// use sbc_relay::RelayEvent;
///
/// fn handle_event(event: RelayEvent) {
///     match event {
///         RelayEvent::StateChanged { previous, current } => {
///             eprintln!("{previous:?} -> {current:?}");
///         }
///         RelayEvent::Reconnecting { attempt, delay } => {
///             eprintln!("reconnect attempt {attempt} in {delay:?}");
///         }
///         RelayEvent::DestinationError { destination, error } => {
///             eprintln!("destination '{destination}' failed: {error}");
///         }
///         other => eprintln!("{other:?}"),
///     }
/// }
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum RelayEvent {
    /// The session moved to a new state.
    StateChanged {
        /// State before the transition.
        previous: SessionState,
        /// State after the transition.
        current: SessionState,
    },

    /// The virtual sink exists and its monitor is about to be recorded.
    SinkReady {
        /// Module that owns the sink.
        module: ModuleId,
        /// Monitor source being recorded.
        monitor: String,
        /// Format the sink runs at.
        format: SampleSpec,
    },

    /// The connection was lost; another attempt is scheduled.
    Reconnecting {
        /// Number of consecutive failed attempts so far.
        attempt: u32,
        /// Time until the next attempt.
        delay: Duration,
    },

    /// The negotiated sample rate has no matching SBC frequency.
    ///
    /// The stream still runs with the encoder's configured frequency, so
    /// playback speed will be off.
    UnsupportedRate {
        /// Rate reported by the server.
        rate: u32,
    },

    /// The sink does not run on 16-bit samples; its monitor is recorded
    /// converted to `to` instead.
    FormatConverted {
        /// Sample format of the sink.
        from: SampleFormat,
        /// Sample format requested for capture.
        to: SampleFormat,
    },

    /// The server dropped captured audio because we fell behind.
    BufferOverflow,

    /// The server had no audio to deliver.
    BufferUnderflow,

    /// The encoder failed and a block of PCM was discarded.
    BlockDropped {
        /// PCM bytes discarded.
        bytes: usize,
    },

    /// A destination rejected a frame.
    ///
    /// The destination stays registered and receives the next frame.
    DestinationError {
        /// Name of the destination.
        destination: String,
        /// Description of the error.
        error: String,
    },
}

/// Callback type for receiving runtime events.
///
/// Register one via [`RelayBuilder::on_event()`].
///
/// [`RelayBuilder::on_event()`]: crate::RelayBuilder::on_event
pub type EventCallback = Arc<dyn Fn(RelayEvent) + Send + Sync>;

/// Creates an [`EventCallback`] from a closure.
///
/// # Example
///
/// ```
/// use sbc_relay::{event_callback, RelayEvent};
///
/// let callback = event_callback(|event| {
///     println!("Got event: {:?}", event);
/// });
/// callback(RelayEvent::BufferOverflow);
/// ```
pub fn event_callback<F>(f: F) -> EventCallback
where
    F: Fn(RelayEvent) + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) fn emit(callback: Option<&EventCallback>, event: RelayEvent) {
    if let Some(callback) = callback {
        callback(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relay_event_debug() {
        let event = RelayEvent::UnsupportedRate { rate: 44100 };
        let debug = format!("{:?}", event);
        assert!(debug.contains("UnsupportedRate"));
        assert!(debug.contains("44100"));
    }

    #[test]
    fn test_event_callback_helper() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let called = Arc::new(AtomicBool::new(false));
        let called_clone = called.clone();

        let callback = event_callback(move |_| {
            called_clone.store(true, Ordering::SeqCst);
        });

        emit(Some(&callback), RelayEvent::BufferOverflow);
        assert!(called.load(Ordering::SeqCst));
    }
}
