//! Tokio mpsc channel destination.

use crate::destination::Destination;
use crate::{DestinationError, SbcFrame};
use async_trait::async_trait;
use tokio::sync::mpsc;

/// A destination that sends frames to a tokio mpsc channel.
///
/// Delivery is best effort: when the receiver has fallen behind and the
/// channel is full, the frame is dropped and the write fails with
/// [`DestinationError::Full`]. The broadcast never waits on a slow receiver.
///
/// # Example
///
/// ```
/// use sbc_relay::{ChannelDestination, SbcFrame};
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel::<SbcFrame>(64);
/// let destination = ChannelDestination::new(tx);
/// ```
pub struct ChannelDestination {
    name: String,
    sender: mpsc::Sender<SbcFrame>,
}

impl ChannelDestination {
    /// Creates a new channel destination.
    pub fn new(sender: mpsc::Sender<SbcFrame>) -> Self {
        Self::with_name("channel", sender)
    }

    /// Creates a new channel destination with a custom name.
    pub fn with_name(name: impl Into<String>, sender: mpsc::Sender<SbcFrame>) -> Self {
        Self {
            name: name.into(),
            sender,
        }
    }
}

#[async_trait]
impl Destination for ChannelDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, frame: &SbcFrame) -> Result<(), DestinationError> {
        self.sender.try_send(frame.clone()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DestinationError::Full,
            mpsc::error::TrySendError::Closed(_) => DestinationError::ChannelClosed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use std::time::Duration;

    #[tokio::test]
    async fn test_channel_destination_sends_frames() {
        let (tx, mut rx) = mpsc::channel(10);
        let destination = ChannelDestination::new(tx);

        let frame = SbcFrame::new(Bytes::from_static(&[0x9C, 1, 2]), 7, Duration::ZERO);
        destination.write(&frame).await.unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn test_channel_destination_closed() {
        let (tx, rx) = mpsc::channel(10);
        let destination = ChannelDestination::with_name("speaker", tx);
        drop(rx);

        let frame = SbcFrame::new(Bytes::new(), 0, Duration::ZERO);
        let result = destination.write(&frame).await;

        assert!(matches!(result, Err(DestinationError::ChannelClosed)));
        assert_eq!(destination.name(), "speaker");
    }

    #[tokio::test]
    async fn test_channel_destination_full_drops_frame() {
        let (tx, mut rx) = mpsc::channel(1);
        let destination = ChannelDestination::new(tx);

        let first = SbcFrame::new(Bytes::from_static(&[0x9C]), 0, Duration::ZERO);
        let second = SbcFrame::new(Bytes::from_static(&[0x9C]), 1, Duration::ZERO);
        destination.write(&first).await.unwrap();
        let result = destination.write(&second).await;
        assert!(matches!(result, Err(DestinationError::Full)));

        assert_eq!(rx.recv().await.unwrap().sequence, 0);
        assert!(rx.try_recv().is_err());
    }
}
