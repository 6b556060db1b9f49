//! PCM-to-frame pipeline.
//!
//! ```text
//! record stream → PCM buffer → codec (one block at a time) → fanout → destinations
//! ```
//!
//! - **PCM buffer**: absorbs the mismatch between fragment size and codec block size
//! - **Capture stream**: drives the buffer, the codec and the fanout per fragment
//! - **Fanout**: writes each frame to every registered destination

mod capture;
mod fanout;
mod pcm_buffer;

pub(crate) use capture::{CaptureConfig, CaptureStream};
pub use fanout::{BroadcastReport, Fanout};
pub use pcm_buffer::PcmBuffer;
