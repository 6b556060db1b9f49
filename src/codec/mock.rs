//! Deterministic stand-in for a real SBC encoder.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::{BufMut, BytesMut};

use crate::codec::{Encoded, SbcConfig, SbcEncoder, SbcHeader, SBC_SYNCWORD};
use crate::CodecError;

#[derive(Debug, Default)]
struct Counters {
    inits: AtomicUsize,
    encodes: AtomicUsize,
    finishes: AtomicUsize,
}

/// Observes a [`MockEncoder`] after it has been moved into a relay.
#[derive(Debug, Clone)]
pub struct EncoderCounters {
    counters: Arc<Counters>,
}

impl EncoderCounters {
    /// Number of `init` calls.
    pub fn inits(&self) -> usize {
        self.counters.inits.load(Ordering::SeqCst)
    }

    /// Number of `encode` calls, including failed ones.
    pub fn encodes(&self) -> usize {
        self.counters.encodes.load(Ordering::SeqCst)
    }

    /// Number of `finish` calls.
    pub fn finishes(&self) -> usize {
        self.counters.finishes.load(Ordering::SeqCst)
    }
}

/// An [`SbcEncoder`] that emits frames with a valid SBC header and no audio.
///
/// Each frame is `frame_length()` bytes long. Byte 3 holds the first input
/// byte of the block and byte 4 the last, so tests can check which PCM a
/// frame was made from. Selected blocks (0-based) can be made to fail.
///
/// # Example
///
/// ```
/// use sbc_relay::codec::{MockEncoder, SbcConfig, SbcEncoder};
///
/// let mut encoder = MockEncoder::new();
/// encoder.init(&SbcConfig::default()).unwrap();
/// let encoded = encoder.encode(&[0u8; 512]).unwrap();
/// assert_eq!(encoded.frame.len(), 112);
/// ```
#[derive(Debug, Default)]
pub struct MockEncoder {
    config: Option<SbcConfig>,
    failures: HashSet<usize>,
    counters: Arc<Counters>,
}

impl MockEncoder {
    /// Creates an encoder that never fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fails the blocks with the given 0-based indices.
    #[must_use]
    pub fn with_failures(mut self, blocks: impl IntoIterator<Item = usize>) -> Self {
        self.failures.extend(blocks);
        self
    }

    /// Returns counters that stay valid after the encoder is moved.
    pub fn counters(&self) -> EncoderCounters {
        EncoderCounters {
            counters: self.counters.clone(),
        }
    }
}

impl SbcEncoder for MockEncoder {
    fn init(&mut self, config: &SbcConfig) -> Result<(), CodecError> {
        config.validate()?;
        self.config = Some(*config);
        self.counters.inits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn codesize(&self) -> usize {
        self.config.map_or(0, |c| c.codesize())
    }

    fn encode(&mut self, input: &[u8]) -> Result<Encoded, CodecError> {
        let config = self.config.ok_or(CodecError::NotConfigured)?;
        let index = self.counters.encodes.fetch_add(1, Ordering::SeqCst);
        let codesize = config.codesize();

        if input.len() < codesize {
            return Err(CodecError::ShortInput {
                needed: codesize,
                available: input.len(),
            });
        }
        if self.failures.contains(&index) {
            return Err(CodecError::EncodeFailed(format!("scripted failure on block {index}")));
        }

        let len = config.frame_length();
        let mut frame = BytesMut::with_capacity(len);
        frame.put_u8(SBC_SYNCWORD);
        frame.put_u8(SbcHeader::flags(&config));
        frame.put_u8(config.bitpool);
        frame.put_u8(input[0]);
        frame.put_u8(input[codesize - 1]);
        frame.resize(len, 0);

        Ok(Encoded {
            consumed: codesize,
            frame: frame.freeze(),
        })
    }

    fn finish(&mut self) {
        self.config = None;
        self.counters.finishes.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_parse_as_sbc() {
        let mut encoder = MockEncoder::new();
        encoder.init(&SbcConfig::default()).unwrap();

        let mut input = vec![0u8; 512];
        input[0] = 0xAA;
        input[511] = 0xBB;
        let encoded = encoder.encode(&input).unwrap();

        let header = SbcHeader::parse(&encoded.frame).unwrap();
        assert_eq!(header.config, SbcConfig::default());
        assert_eq!(encoded.frame[3], 0xAA);
        assert_eq!(encoded.frame[4], 0xBB);
    }

    #[test]
    fn test_scripted_failure() {
        let mut encoder = MockEncoder::new().with_failures([0]);
        encoder.init(&SbcConfig::default()).unwrap();
        assert!(matches!(
            encoder.encode(&[0; 512]),
            Err(CodecError::EncodeFailed(_))
        ));
        assert!(encoder.encode(&[0; 512]).is_ok());
        assert_eq!(encoder.counters().encodes(), 2);
    }
}
