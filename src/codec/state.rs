//! Encoder configuration plus one codec instance.

use bytes::Bytes;

use crate::codec::{Encoded, Endianness, Frequency, SbcConfig, SbcEncoder};
use crate::CodecError;

/// A configured SBC encoder.
///
/// [`configure`](Self::configure) runs exactly once and must precede the
/// first [`encode_one_block`](Self::encode_one_block). Frequency and byte
/// order can be adjusted through [`apply_format`](Self::apply_format) until
/// the first block is encoded; after that the format is locked.
pub struct CodecState {
    encoder: Box<dyn SbcEncoder>,
    config: SbcConfig,
    configured: bool,
    started: bool,
    dropped_blocks: u64,
}

impl CodecState {
    /// Wraps an encoder that has not been initialized yet.
    pub fn new(encoder: Box<dyn SbcEncoder>) -> Self {
        Self {
            encoder,
            config: SbcConfig::default(),
            configured: false,
            started: false,
            dropped_blocks: 0,
        }
    }

    /// Initializes the encoder with `config`.
    pub fn configure(&mut self, config: SbcConfig) -> Result<(), CodecError> {
        if self.configured {
            return Err(CodecError::AlreadyConfigured);
        }
        config.validate()?;
        self.encoder.init(&config)?;
        if self.encoder.codesize() == 0 {
            self.encoder.finish();
            return Err(CodecError::InvalidConfig(
                "encoder reports a zero-byte input block".to_string(),
            ));
        }
        self.config = config;
        self.configured = true;
        tracing::debug!(
            frequency = config.frequency.hz(),
            codesize = self.encoder.codesize(),
            frame_length = config.frame_length(),
            bitpool = config.bitpool,
            "codec configured"
        );
        Ok(())
    }

    /// Moves the encoder to a negotiated frequency and byte order.
    ///
    /// `None` keeps the current frequency. Returns `true` if the encoder was
    /// re-initialized. Fails with [`CodecError::FormatLocked`] if the format
    /// would change after encoding started.
    pub fn apply_format(
        &mut self,
        frequency: Option<Frequency>,
        endianness: Endianness,
    ) -> Result<bool, CodecError> {
        if !self.configured {
            return Err(CodecError::NotConfigured);
        }

        let mut next = self.config;
        if let Some(frequency) = frequency {
            next.frequency = frequency;
        }
        next.endianness = endianness;

        if next == self.config {
            return Ok(false);
        }
        if self.started {
            return Err(CodecError::FormatLocked);
        }

        self.encoder.init(&next)?;
        self.config = next;
        tracing::debug!(frequency = next.frequency.hz(), ?endianness, "codec format updated");
        Ok(true)
    }

    /// Bytes of PCM one block consumes.
    pub fn codesize(&self) -> usize {
        if self.configured {
            self.encoder.codesize()
        } else {
            self.config.codesize()
        }
    }

    /// Encodes exactly one block from the front of `input`.
    ///
    /// If the encoder fails, the block is still reported as consumed and the
    /// returned frame is empty. The block is not retried.
    pub fn encode_one_block(&mut self, input: &[u8]) -> Result<Encoded, CodecError> {
        if !self.configured {
            return Err(CodecError::NotConfigured);
        }
        let codesize = self.codesize();
        if input.len() < codesize {
            return Err(CodecError::ShortInput {
                needed: codesize,
                available: input.len(),
            });
        }

        self.started = true;
        match self.encoder.encode(&input[..codesize]) {
            Ok(encoded) if !encoded.frame.is_empty() => Ok(Encoded {
                consumed: codesize,
                frame: encoded.frame,
            }),
            Ok(_) => {
                self.dropped_blocks += 1;
                tracing::debug!(codesize, "encoder produced no frame");
                Ok(Encoded {
                    consumed: codesize,
                    frame: Bytes::new(),
                })
            }
            Err(e) => {
                self.dropped_blocks += 1;
                tracing::warn!(error = %e, codesize, "dropping block");
                Ok(Encoded {
                    consumed: codesize,
                    frame: Bytes::new(),
                })
            }
        }
    }

    /// Current configuration.
    pub fn config(&self) -> &SbcConfig {
        &self.config
    }

    /// Current frequency.
    pub fn frequency(&self) -> Frequency {
        self.config.frequency
    }

    /// Current input byte order.
    pub fn endianness(&self) -> Endianness {
        self.config.endianness
    }

    /// Returns `true` once [`configure`](Self::configure) succeeded.
    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Returns `true` once a block has been encoded.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Blocks dropped because the encoder failed.
    pub fn dropped_blocks(&self) -> u64 {
        self.dropped_blocks
    }

    /// Releases the codec working memory.
    pub fn finish(&mut self) {
        if self.configured {
            self.encoder.finish();
            self.configured = false;
        }
    }
}

impl Drop for CodecState {
    fn drop(&mut self) {
        self.finish();
    }
}

impl std::fmt::Debug for CodecState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CodecState")
            .field("config", &self.config)
            .field("configured", &self.configured)
            .field("started", &self.started)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::MockEncoder;

    fn configured(encoder: MockEncoder) -> CodecState {
        let mut state = CodecState::new(Box::new(encoder));
        state.configure(SbcConfig::default()).unwrap();
        state
    }

    /// Initializes fine but never asks for input.
    struct ZeroBlockEncoder;

    impl SbcEncoder for ZeroBlockEncoder {
        fn init(&mut self, _config: &SbcConfig) -> Result<(), CodecError> {
            Ok(())
        }

        fn codesize(&self) -> usize {
            0
        }

        fn encode(&mut self, _input: &[u8]) -> Result<Encoded, CodecError> {
            Err(CodecError::EncodeFailed("unreachable".to_string()))
        }

        fn finish(&mut self) {}
    }

    #[test]
    fn test_configure_rejects_zero_codesize() {
        let mut state = CodecState::new(Box::new(ZeroBlockEncoder));
        let result = state.configure(SbcConfig::default());
        assert!(matches!(result, Err(CodecError::InvalidConfig(_))));
        assert!(!state.is_configured());
    }

    #[test]
    fn test_encode_requires_configure() {
        let mut state = CodecState::new(Box::new(MockEncoder::new()));
        assert_eq!(
            state.encode_one_block(&[0; 512]),
            Err(CodecError::NotConfigured)
        );
    }

    #[test]
    fn test_configure_only_once() {
        let mut state = configured(MockEncoder::new());
        assert_eq!(
            state.configure(SbcConfig::default()),
            Err(CodecError::AlreadyConfigured)
        );
    }

    #[test]
    fn test_configure_rejects_invalid_bitpool() {
        let mut state = CodecState::new(Box::new(MockEncoder::new()));
        let config = SbcConfig {
            bitpool: 0,
            ..SbcConfig::default()
        };
        assert!(matches!(
            state.configure(config),
            Err(CodecError::InvalidConfig(_))
        ));
        assert!(!state.is_configured());
    }

    #[test]
    fn test_short_input_is_rejected() {
        let mut state = configured(MockEncoder::new());
        assert_eq!(
            state.encode_one_block(&[0; 511]),
            Err(CodecError::ShortInput {
                needed: 512,
                available: 511
            })
        );
        assert!(!state.is_started());
    }

    #[test]
    fn test_encode_one_block_consumes_codesize() {
        let mut state = configured(MockEncoder::new());
        let encoded = state.encode_one_block(&[7; 700]).unwrap();
        assert_eq!(encoded.consumed, 512);
        assert_eq!(encoded.frame.len(), 112);
    }

    #[test]
    fn test_encoder_failure_drops_block() {
        let mut state = configured(MockEncoder::new().with_failures([1]));
        assert!(!state.encode_one_block(&[0; 512]).unwrap().is_dropped());

        let dropped = state.encode_one_block(&[0; 512]).unwrap();
        assert_eq!(dropped.consumed, 512);
        assert!(dropped.is_dropped());
        assert_eq!(state.dropped_blocks(), 1);

        assert!(!state.encode_one_block(&[0; 512]).unwrap().is_dropped());
    }

    #[test]
    fn test_apply_format_before_first_encode() {
        let mut state = configured(MockEncoder::new());
        assert!(state
            .apply_format(Some(Frequency::Hz16000), Endianness::Big)
            .unwrap());
        assert_eq!(state.frequency(), Frequency::Hz16000);
        assert_eq!(state.endianness(), Endianness::Big);
        assert_eq!(state.codesize(), 512);
    }

    #[test]
    fn test_apply_format_locked_after_encode() {
        let mut state = configured(MockEncoder::new());
        state.encode_one_block(&[0; 512]).unwrap();

        // Same format is fine, a change is not.
        assert!(!state.apply_format(None, Endianness::Little).unwrap());
        assert_eq!(
            state.apply_format(Some(Frequency::Hz16000), Endianness::Little),
            Err(CodecError::FormatLocked)
        );
        assert_eq!(state.frequency(), Frequency::Hz32000);
    }

    #[test]
    fn test_finish_releases_encoder() {
        let encoder = MockEncoder::new();
        let counters = encoder.counters();
        let mut state = configured(encoder);
        state.finish();
        assert!(!state.is_configured());
        drop(state);
        assert_eq!(counters.finishes(), 1);
    }
}
