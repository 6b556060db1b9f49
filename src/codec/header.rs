//! SBC frame headers and frame splitting.

use bytes::{Buf, Bytes, BytesMut};

use crate::codec::{Allocation, Blocks, ChannelMode, Frequency, SbcConfig, Subbands};
use crate::CodecError;

/// First byte of every SBC frame.
pub const SBC_SYNCWORD: u8 = 0x9C;

/// Bytes needed to decode an SBC header (syncword, flags, bitpool).
const HEADER_LEN: usize = 3;

/// Decoded fixed part of an SBC frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SbcHeader {
    /// Parameters the frame was encoded with. Byte order is not carried in
    /// the header and is left at its default.
    pub config: SbcConfig,
}

impl SbcHeader {
    /// Parses the header at the start of `data`.
    pub fn parse(data: &[u8]) -> Result<Self, CodecError> {
        if data.len() < HEADER_LEN {
            return Err(CodecError::InvalidHeader(format!(
                "need {HEADER_LEN} bytes, have {}",
                data.len()
            )));
        }
        if data[0] != SBC_SYNCWORD {
            return Err(CodecError::InvalidHeader(format!(
                "bad syncword {:#04x}",
                data[0]
            )));
        }

        let flags = data[1];
        let config = SbcConfig {
            frequency: Frequency::from_code(flags >> 6),
            blocks: Blocks::from_code(flags >> 4),
            mode: ChannelMode::from_code(flags >> 2),
            allocation: if flags & 0b10 == 0 {
                Allocation::Loudness
            } else {
                Allocation::Snr
            },
            subbands: if flags & 0b1 == 0 {
                Subbands::Four
            } else {
                Subbands::Eight
            },
            bitpool: data[2],
            ..SbcConfig::default()
        };
        config.validate()?;
        Ok(Self { config })
    }

    /// Length of the whole frame this header starts.
    pub fn frame_length(&self) -> usize {
        self.config.frame_length()
    }

    /// Encodes the first two header bytes after the syncword.
    pub fn flags(config: &SbcConfig) -> u8 {
        (config.frequency.code() << 6)
            | (config.blocks.code() << 4)
            | (config.mode.code() << 2)
            | (config.allocation.code() << 1)
            | config.subbands.code()
    }
}

/// Cuts a byte stream into whole SBC frames.
///
/// Bytes before a syncword, or a syncword followed by an invalid header,
/// are skipped one at a time until a valid header is found.
///
/// # Example
///
/// ```
/// use sbc_relay::codec::FrameSplitter;
///
/// let mut splitter = FrameSplitter::new();
/// splitter.extend(&[0x00, 0x01]);
/// assert!(splitter.next_frame().is_none());
/// ```
#[derive(Debug, Default)]
pub struct FrameSplitter {
    buf: BytesMut,
    skipped: u64,
}

impl FrameSplitter {
    /// Creates an empty splitter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes read from the stream.
    pub fn extend(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Returns the next complete frame, if one is buffered.
    pub fn next_frame(&mut self) -> Option<Bytes> {
        loop {
            match self.buf.iter().position(|&b| b == SBC_SYNCWORD) {
                Some(0) => {}
                Some(n) => {
                    self.skip(n);
                }
                None => {
                    let n = self.buf.len();
                    self.skip(n);
                    return None;
                }
            }

            match SbcHeader::parse(&self.buf) {
                Ok(header) => {
                    let len = header.frame_length();
                    if self.buf.len() < len {
                        return None;
                    }
                    return Some(self.buf.split_to(len).freeze());
                }
                Err(_) if self.buf.len() < HEADER_LEN => return None,
                Err(_) => self.skip(1),
            }
        }
    }

    /// Bytes discarded while searching for a syncword.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    /// Bytes buffered but not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    fn skip(&mut self, n: usize) {
        if n > 0 {
            self.buf.advance(n);
            self.skipped += n as u64;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_frame(config: &SbcConfig, fill: u8) -> Vec<u8> {
        let mut frame = vec![fill; config.frame_length()];
        frame[0] = SBC_SYNCWORD;
        frame[1] = SbcHeader::flags(config);
        frame[2] = config.bitpool;
        frame
    }

    #[test]
    fn test_parse_default_header() {
        let config = SbcConfig::default();
        // 32 kHz, 16 blocks, stereo, loudness, 8 subbands
        assert_eq!(SbcHeader::flags(&config), 0b0111_1001);

        let header = SbcHeader::parse(&[0x9C, 0x79, 50]).unwrap();
        assert_eq!(header.config, config);
        assert_eq!(header.frame_length(), 112);
    }

    #[test]
    fn test_parse_rejects_bad_syncword() {
        assert!(matches!(
            SbcHeader::parse(&[0x00, 0x79, 50]),
            Err(CodecError::InvalidHeader(_))
        ));
        assert!(SbcHeader::parse(&[0x9C]).is_err());
    }

    #[test]
    fn test_splitter_across_reads() {
        let config = SbcConfig::default();
        let frame = fake_frame(&config, 0x11);

        let mut splitter = FrameSplitter::new();
        splitter.extend(&frame[..40]);
        assert!(splitter.next_frame().is_none());
        splitter.extend(&frame[40..]);
        splitter.extend(&frame[..10]);

        let out = splitter.next_frame().unwrap();
        assert_eq!(out.len(), 112);
        assert_eq!(&out[..], &frame[..]);
        assert!(splitter.next_frame().is_none());
        assert_eq!(splitter.pending(), 10);
    }

    #[test]
    fn test_splitter_resyncs_after_garbage() {
        let config = SbcConfig::default();
        let frame = fake_frame(&config, 0x22);

        let mut splitter = FrameSplitter::new();
        splitter.extend(&[0x01, 0x02, 0x03]);
        // Syncword followed by a zero bitpool is not a valid header.
        splitter.extend(&[SBC_SYNCWORD, 0x79, 0x00]);
        splitter.extend(&frame);

        let out = splitter.next_frame().unwrap();
        assert_eq!(&out[..], &frame[..]);
        assert_eq!(splitter.skipped(), 6);
    }
}
