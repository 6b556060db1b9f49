//! Encoded SBC frame type.

use std::time::Duration;

use bytes::Bytes;

/// One encoded SBC frame, as delivered to destinations.
///
/// The payload is reference-counted, so fanning a frame out to many
/// destinations does not copy it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SbcFrame {
    /// The encoded frame, starting with the SBC syncword.
    pub data: Bytes,
    /// Position of this frame in the stream, starting at 0.
    pub sequence: u64,
    /// Stream time at the start of the frame.
    pub timestamp: Duration,
}

impl SbcFrame {
    /// Creates a new frame.
    pub fn new(data: Bytes, sequence: u64, timestamp: Duration) -> Self {
        Self {
            data,
            sequence,
            timestamp,
        }
    }

    /// Length of the encoded frame in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if the frame carries no data.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl AsRef<[u8]> for SbcFrame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_shares_payload() {
        let frame = SbcFrame::new(Bytes::from(vec![0x9C; 112]), 3, Duration::from_millis(12));
        let cloned = frame.clone();
        assert_eq!(frame.data.as_ptr(), cloned.data.as_ptr());
        assert_eq!(cloned.len(), 112);
        assert_eq!(cloned.sequence, 3);
    }
}
