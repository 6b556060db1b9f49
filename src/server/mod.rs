//! Audio-server seam.
//!
//! The relay talks to the sound server only through [`AudioServer`]. Every
//! request returns immediately; its completion arrives later as a typed
//! [`ServerEvent`] on the channel handed to [`AudioServer::connect`].
//! Completions for one request are delivered in the order they were issued.
//!
//! Two implementations ship with the crate:
//!
//! - [`MockServer`]: scripted server for tests and demos
//! - `PactlServer` (feature `pactl`): drives PulseAudio/PipeWire through
//!   the `pactl` and `parec` command-line tools

mod mock;
#[cfg(feature = "pactl")]
mod pactl;

pub use mock::{MockCall, MockControl, MockServer};
#[cfg(feature = "pactl")]
pub use pactl::PactlServer;

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::codec::Endianness;
use crate::ServerError;

/// Identifier the server assigns to a loaded module.
pub type ModuleId = u32;

/// Sample encoding reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// Unsigned 8-bit.
    U8,
    /// Signed 16-bit, little endian.
    S16Le,
    /// Signed 16-bit, big endian.
    S16Be,
    /// Signed 24-bit packed, little endian.
    S24Le,
    /// Signed 24-bit packed, big endian.
    S24Be,
    /// Signed 32-bit, little endian.
    S32Le,
    /// Signed 32-bit, big endian.
    S32Be,
    /// 32-bit float, little endian.
    F32Le,
    /// 32-bit float, big endian.
    F32Be,
}

impl SampleFormat {
    /// Parses the short name used by PulseAudio (`s16le`, `float32be`, ...).
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "u8" => Some(Self::U8),
            "s16le" => Some(Self::S16Le),
            "s16be" => Some(Self::S16Be),
            "s24le" => Some(Self::S24Le),
            "s24be" => Some(Self::S24Be),
            "s32le" => Some(Self::S32Le),
            "s32be" => Some(Self::S32Be),
            "float32le" | "f32le" => Some(Self::F32Le),
            "float32be" | "f32be" => Some(Self::F32Be),
            _ => None,
        }
    }

    /// Short name understood by `parec --format`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::U8 => "u8",
            Self::S16Le => "s16le",
            Self::S16Be => "s16be",
            Self::S24Le => "s24le",
            Self::S24Be => "s24be",
            Self::S32Le => "s32le",
            Self::S32Be => "s32be",
            Self::F32Le => "float32le",
            Self::F32Be => "float32be",
        }
    }

    /// Bytes per sample for one channel.
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16Le | Self::S16Be => 2,
            Self::S24Le | Self::S24Be => 3,
            Self::S32Le | Self::S32Be | Self::F32Le | Self::F32Be => 4,
        }
    }

    /// Signed 16-bit samples in the given byte order.
    pub fn s16(endianness: Endianness) -> Self {
        match endianness {
            Endianness::Little => Self::S16Le,
            Endianness::Big => Self::S16Be,
        }
    }

    /// Byte order, or `None` for single-byte formats.
    pub fn endianness(self) -> Option<Endianness> {
        match self {
            Self::U8 => None,
            Self::S16Le | Self::S24Le | Self::S32Le | Self::F32Le => Some(Endianness::Little),
            Self::S16Be | Self::S24Be | Self::S32Be | Self::F32Be => Some(Endianness::Big),
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Format of a sink or stream: encoding, rate and channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleSpec {
    /// Sample encoding and byte order.
    pub format: SampleFormat,
    /// Sample rate in Hz.
    pub rate: u32,
    /// Channel count.
    pub channels: u8,
}

impl SampleSpec {
    /// Creates a sample spec.
    pub fn new(format: SampleFormat, rate: u32, channels: u8) -> Self {
        Self {
            format,
            rate,
            channels,
        }
    }

    /// Bytes for one sample across all channels.
    pub fn frame_size(&self) -> usize {
        self.format.bytes_per_sample() * self.channels as usize
    }

    /// Bytes covering `duration` at this spec, rounded down to whole frames.
    pub fn duration_to_bytes(&self, duration: Duration) -> usize {
        let frames = duration.as_micros() * u128::from(self.rate) / 1_000_000;
        frames as usize * self.frame_size()
    }

    /// Parses the textual form `s16le 2ch 32000Hz` printed by `pactl`.
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let format = SampleFormat::parse(parts.next()?)?;
        let channels = parts.next()?.strip_suffix("ch")?.parse().ok()?;
        let rate = parts.next()?.strip_suffix("Hz")?.parse().ok()?;
        Some(Self::new(format, rate, channels))
    }
}

impl fmt::Display for SampleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}ch {}Hz", self.format, self.channels, self.rate)
    }
}

/// Connection state reported by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Connection attempt in progress.
    Connecting,
    /// Connected and accepting requests.
    Ready,
    /// The connection could not be established or was lost.
    Failed,
    /// The server closed the connection.
    Terminated,
}

/// One sink entry from an enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkInfo {
    /// Server-side index.
    pub index: u32,
    /// Sink name.
    pub name: String,
    /// Module that owns the sink, if any.
    pub owner_module: Option<ModuleId>,
    /// Format the sink runs at.
    pub sample_spec: SampleSpec,
}

/// An item of a sink enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SinkListItem {
    /// A sink.
    Entry(SinkInfo),
    /// The enumeration is complete.
    End,
}

/// Notification from an open record stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamNotice {
    /// The stream is connected; data follows.
    Ready,
    /// The stream failed and will deliver no more data.
    Failed(String),
    /// A fragment of captured PCM.
    Data(Bytes),
    /// The server dropped data because the reader fell behind.
    Overflow,
    /// The server ran out of data to deliver.
    Underflow,
}

/// Completion or notification from the server.
#[derive(Debug)]
pub enum ServerEvent {
    /// Connection state changed.
    State(ContextState),
    /// Completion of [`AudioServer::load_module`].
    ModuleLoaded(Result<ModuleId, ServerError>),
    /// One item of [`AudioServer::list_sinks`].
    SinkInfo(SinkListItem),
    /// Notification from the record stream.
    Stream(StreamNotice),
    /// Completion of [`AudioServer::unload_module`].
    ModuleUnloaded {
        /// Module the request was for.
        module: ModuleId,
        /// Whether the server accepted the unload.
        success: bool,
    },
}

/// Sender half the server uses to deliver [`ServerEvent`]s.
pub type ServerEvents = mpsc::UnboundedSender<ServerEvent>;

/// Parameters for [`AudioServer::open_record_stream`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordStreamRequest {
    /// Stream name shown by the server.
    pub stream_name: String,
    /// Source to record from (a sink's monitor).
    pub device: String,
    /// Format to record in.
    pub sample_spec: SampleSpec,
    /// Target fragment size in bytes.
    pub fragment_size: usize,
    /// Let the server raise latency under load.
    pub adjust_latency: bool,
}

/// Non-blocking client of a sound server.
///
/// All methods return as soon as the request is issued. A returned `Err`
/// means the request could not be issued at all; the outcome of an issued
/// request always arrives as a [`ServerEvent`].
pub trait AudioServer: Send + 'static {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Starts connecting. State changes are delivered on `events`, which
    /// replaces any channel from a previous connection.
    fn connect(&mut self, events: ServerEvents) -> Result<(), ServerError>;

    /// Drops the connection and everything bound to it.
    fn disconnect(&mut self);

    /// Loads module `name` with argument string `args`.
    fn load_module(&mut self, name: &str, args: &str) -> Result<(), ServerError>;

    /// Enumerates all sinks, terminated by [`SinkListItem::End`].
    fn list_sinks(&mut self) -> Result<(), ServerError>;

    /// Opens a record stream.
    fn open_record_stream(&mut self, request: &RecordStreamRequest) -> Result<(), ServerError>;

    /// Releases the fragment most recently delivered as [`StreamNotice::Data`].
    fn drop_fragment(&mut self);

    /// Unloads a module.
    fn unload_module(&mut self, module: ModuleId) -> Result<(), ServerError>;
}
