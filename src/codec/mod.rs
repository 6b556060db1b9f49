//! SBC codec configuration and the encoder seam.
//!
//! The bit-level encoder lives behind [`SbcEncoder`]; this module owns the
//! parameters that describe a stream (frequency, blocks, subbands, channel
//! mode, allocation, bitpool, byte order) and the geometry derived from them.
//!
//! - [`CodecState`]: one configured encoder instance, driven by the capture stream
//! - [`SbcHeader`] / [`FrameSplitter`]: read frames back out of a byte stream
//! - `LibSbc` (feature `libsbc`): the system libsbc encoder
//! - [`MockEncoder`]: deterministic encoder for tests

mod header;
#[cfg(feature = "libsbc")]
mod libsbc;
mod mock;
mod state;

pub use header::{FrameSplitter, SbcHeader, SBC_SYNCWORD};
#[cfg(feature = "libsbc")]
pub use libsbc::LibSbc;
pub use mock::{EncoderCounters, MockEncoder};
pub use state::CodecState;

use bytes::Bytes;

use crate::CodecError;

/// SBC sampling frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Frequency {
    /// 16 kHz.
    Hz16000,
    /// 32 kHz, the rate the accessory speaker expects.
    #[default]
    Hz32000,
    /// 44.1 kHz.
    Hz44100,
    /// 48 kHz.
    Hz48000,
}

impl Frequency {
    /// Returns the frequency in Hz.
    pub fn hz(self) -> u32 {
        match self {
            Self::Hz16000 => 16000,
            Self::Hz32000 => 32000,
            Self::Hz44100 => 44100,
            Self::Hz48000 => 48000,
        }
    }

    /// Maps a rate in Hz to an SBC frequency.
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            16000 => Some(Self::Hz16000),
            32000 => Some(Self::Hz32000),
            44100 => Some(Self::Hz44100),
            48000 => Some(Self::Hz48000),
            _ => None,
        }
    }

    /// Two-bit field value used in frame headers and by libsbc.
    pub fn code(self) -> u8 {
        match self {
            Self::Hz16000 => 0,
            Self::Hz32000 => 1,
            Self::Hz44100 => 2,
            Self::Hz48000 => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => Self::Hz16000,
            1 => Self::Hz32000,
            2 => Self::Hz44100,
            _ => Self::Hz48000,
        }
    }
}

/// Number of blocks per SBC frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Blocks {
    /// 4 blocks.
    Four,
    /// 8 blocks.
    Eight,
    /// 12 blocks.
    Twelve,
    /// 16 blocks.
    #[default]
    Sixteen,
}

impl Blocks {
    /// Returns the block count.
    pub fn count(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
            Self::Twelve => 12,
            Self::Sixteen => 16,
        }
    }

    /// Two-bit field value used in frame headers and by libsbc.
    pub fn code(self) -> u8 {
        match self {
            Self::Four => 0,
            Self::Eight => 1,
            Self::Twelve => 2,
            Self::Sixteen => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => Self::Four,
            1 => Self::Eight,
            2 => Self::Twelve,
            _ => Self::Sixteen,
        }
    }
}

/// Number of subbands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Subbands {
    /// 4 subbands.
    Four,
    /// 8 subbands.
    #[default]
    Eight,
}

impl Subbands {
    /// Returns the subband count.
    pub fn count(self) -> usize {
        match self {
            Self::Four => 4,
            Self::Eight => 8,
        }
    }

    /// One-bit field value used in frame headers and by libsbc.
    pub fn code(self) -> u8 {
        match self {
            Self::Four => 0,
            Self::Eight => 1,
        }
    }
}

/// SBC channel mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChannelMode {
    /// Single channel.
    Mono,
    /// Two independently coded channels.
    DualChannel,
    /// Two channels sharing the bitpool.
    #[default]
    Stereo,
    /// Stereo with per-subband joint coding.
    JointStereo,
}

impl ChannelMode {
    /// Number of PCM channels this mode consumes.
    pub fn channels(self) -> usize {
        match self {
            Self::Mono => 1,
            Self::DualChannel | Self::Stereo | Self::JointStereo => 2,
        }
    }

    /// Two-bit field value used in frame headers and by libsbc.
    pub fn code(self) -> u8 {
        match self {
            Self::Mono => 0,
            Self::DualChannel => 1,
            Self::Stereo => 2,
            Self::JointStereo => 3,
        }
    }

    pub(crate) fn from_code(code: u8) -> Self {
        match code & 0b11 {
            0 => Self::Mono,
            1 => Self::DualChannel,
            2 => Self::Stereo,
            _ => Self::JointStereo,
        }
    }
}

/// Bit allocation method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Allocation {
    /// Loudness allocation.
    #[default]
    Loudness,
    /// Signal-to-noise allocation.
    Snr,
}

impl Allocation {
    /// One-bit field value used in frame headers and by libsbc.
    pub fn code(self) -> u8 {
        match self {
            Self::Loudness => 0,
            Self::Snr => 1,
        }
    }
}

/// Byte order of the 16-bit PCM fed to the encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Endianness {
    /// Little endian (`s16le`).
    #[default]
    Little,
    /// Big endian (`s16be`).
    Big,
}

impl Endianness {
    /// Value used by libsbc.
    pub fn code(self) -> u8 {
        match self {
            Self::Little => 0,
            Self::Big => 1,
        }
    }
}

/// Complete SBC encoder configuration.
///
/// The default matches the accessory speaker profile: 32 kHz, 16 blocks,
/// 8 subbands, stereo, loudness allocation, bitpool 50, little endian.
///
/// # Example
///
/// ```
/// use sbc_relay::codec::SbcConfig;
///
/// let config = SbcConfig::default();
/// assert_eq!(config.codesize(), 512);
/// assert_eq!(config.frame_length(), 112);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SbcConfig {
    /// Sampling frequency.
    pub frequency: Frequency,
    /// Blocks per frame.
    pub blocks: Blocks,
    /// Subbands per block.
    pub subbands: Subbands,
    /// Channel mode.
    pub mode: ChannelMode,
    /// Bit allocation method.
    pub allocation: Allocation,
    /// Quantization parameter.
    pub bitpool: u8,
    /// Byte order of the PCM input.
    pub endianness: Endianness,
}

impl Default for SbcConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::Hz32000,
            blocks: Blocks::Sixteen,
            subbands: Subbands::Eight,
            mode: ChannelMode::Stereo,
            allocation: Allocation::Loudness,
            bitpool: 50,
            endianness: Endianness::Little,
        }
    }
}

impl SbcConfig {
    /// Bytes of 16-bit PCM consumed by one encoded frame.
    pub fn codesize(&self) -> usize {
        self.subbands.count() * self.blocks.count() * self.mode.channels() * 2
    }

    /// PCM frames (one sample per channel) covered by one encoded frame.
    pub fn samples_per_frame(&self) -> usize {
        self.subbands.count() * self.blocks.count()
    }

    /// Length in bytes of one encoded SBC frame.
    pub fn frame_length(&self) -> usize {
        let subbands = self.subbands.count();
        let blocks = self.blocks.count();
        let channels = self.mode.channels();
        let bitpool = self.bitpool as usize;

        let header = 4 + (4 * subbands * channels) / 8;
        let payload_bits = match self.mode {
            ChannelMode::Mono | ChannelMode::DualChannel => blocks * channels * bitpool,
            ChannelMode::Stereo => blocks * bitpool,
            ChannelMode::JointStereo => subbands + blocks * bitpool,
        };
        header + payload_bits.div_ceil(8)
    }

    /// Encoded bit rate in bits per second.
    pub fn bitrate(&self) -> u32 {
        let bits = 8 * self.frame_length() as u64 * u64::from(self.frequency.hz());
        (bits / self.samples_per_frame() as u64) as u32
    }

    /// Checks the bitpool against the limits for the channel mode.
    pub fn validate(&self) -> Result<(), CodecError> {
        let max = match self.mode {
            ChannelMode::Mono | ChannelMode::DualChannel => 16 * self.subbands.count(),
            ChannelMode::Stereo | ChannelMode::JointStereo => 32 * self.subbands.count(),
        }
        .min(250);

        if self.bitpool < 2 || self.bitpool as usize > max {
            return Err(CodecError::InvalidConfig(format!(
                "bitpool {} outside 2..={max} for {:?} with {} subbands",
                self.bitpool,
                self.mode,
                self.subbands.count()
            )));
        }
        Ok(())
    }
}

/// Result of encoding one block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Encoded {
    /// PCM bytes consumed from the input.
    pub consumed: usize,
    /// The encoded frame; empty when the block was dropped.
    pub frame: Bytes,
}

impl Encoded {
    /// Returns `true` if the block produced no frame.
    pub fn is_dropped(&self) -> bool {
        self.frame.is_empty()
    }
}

/// The SBC codec service.
///
/// Implementations hold the codec working memory. They are driven from a
/// single task, so methods take `&mut self`.
pub trait SbcEncoder: Send {
    /// Initializes (or re-initializes) the codec with `config`.
    fn init(&mut self, config: &SbcConfig) -> Result<(), CodecError>;

    /// Bytes of PCM input required for one block.
    fn codesize(&self) -> usize;

    /// Encodes exactly one block from the front of `input`.
    fn encode(&mut self, input: &[u8]) -> Result<Encoded, CodecError>;

    /// Releases codec working memory.
    fn finish(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_geometry() {
        let config = SbcConfig::default();
        assert_eq!(config.codesize(), 512);
        assert_eq!(config.samples_per_frame(), 128);
        assert_eq!(config.frame_length(), 112);
    }

    #[test]
    fn test_frame_length_mono() {
        let config = SbcConfig {
            mode: ChannelMode::Mono,
            bitpool: 31,
            ..SbcConfig::default()
        };
        // 4 + 32/8 + ceil(16 * 31 / 8)
        assert_eq!(config.frame_length(), 4 + 4 + 62);
        assert_eq!(config.codesize(), 256);
    }

    #[test]
    fn test_frame_length_joint_stereo() {
        let config = SbcConfig {
            mode: ChannelMode::JointStereo,
            bitpool: 53,
            frequency: Frequency::Hz44100,
            ..SbcConfig::default()
        };
        // 4 + 8 + ceil((8 + 16 * 53) / 8)
        assert_eq!(config.frame_length(), 4 + 8 + 107);
    }

    #[test]
    fn test_bitrate() {
        let config = SbcConfig::default();
        // 8 * 112 * 32000 / 128
        assert_eq!(config.bitrate(), 224_000);
    }

    #[test]
    fn test_validate_bitpool_bounds() {
        assert!(SbcConfig::default().validate().is_ok());

        let too_small = SbcConfig {
            bitpool: 1,
            ..SbcConfig::default()
        };
        assert!(matches!(
            too_small.validate(),
            Err(CodecError::InvalidConfig(_))
        ));

        let too_large_mono = SbcConfig {
            mode: ChannelMode::Mono,
            subbands: Subbands::Four,
            bitpool: 65,
            ..SbcConfig::default()
        };
        assert!(too_large_mono.validate().is_err());
    }

    #[test]
    fn test_frequency_from_hz() {
        assert_eq!(Frequency::from_hz(16000), Some(Frequency::Hz16000));
        assert_eq!(Frequency::from_hz(32000), Some(Frequency::Hz32000));
        assert_eq!(Frequency::from_hz(22050), None);
    }

    #[test]
    fn test_field_codes_round_trip() {
        for f in [
            Frequency::Hz16000,
            Frequency::Hz32000,
            Frequency::Hz44100,
            Frequency::Hz48000,
        ] {
            assert_eq!(Frequency::from_code(f.code()), f);
        }
        for b in [Blocks::Four, Blocks::Eight, Blocks::Twelve, Blocks::Sixteen] {
            assert_eq!(Blocks::from_code(b.code()), b);
        }
    }
}
