//! Destination trait and implementations for encoded frames.
//!
//! A [`Destination`] is any consumer of SBC frames. The crate provides two:
//!
//! - [`ChannelDestination`]: sends frames to a tokio mpsc channel
//! - [`WriterDestination`]: writes frames to any `AsyncWrite` (pipe, socket, file)
//!
//! Implement [`Destination`] for anything else, such as the audio report
//! channel of a connected controller.

mod channel;
mod writer;

pub use channel::ChannelDestination;
pub use writer::WriterDestination;

use crate::{DestinationError, SbcFrame};
use async_trait::async_trait;

/// A consumer of encoded frames.
///
/// Destinations are registered with the relay's fanout and receive every
/// frame broadcast while they are registered. Delivery is best effort: a
/// failed write is reported as a [`RelayEvent::DestinationError`] and the
/// destination stays registered.
///
/// Methods take `&self`; use interior mutability if state is needed.
///
/// [`RelayEvent::DestinationError`]: crate::RelayEvent::DestinationError
///
/// # Example
///
/// ```
/// use sbc_relay::{Destination, DestinationError, SbcFrame};
/// use async_trait::async_trait;
///
/// struct PrintDestination;
///
/// #[async_trait]
/// impl Destination for PrintDestination {
///     fn name(&self) -> &str {
///         "print"
///     }
///
///     async fn write(&self, frame: &SbcFrame) -> Result<(), DestinationError> {
///         println!("frame {} ({} bytes)", frame.sequence, frame.len());
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Destination: Send + Sync {
    /// Human-readable name for logging and error messages.
    fn name(&self) -> &str;

    /// Writes one frame.
    async fn write(&self, frame: &SbcFrame) -> Result<(), DestinationError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_destination_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Arc<dyn Destination>>();
    }
}
