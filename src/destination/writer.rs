//! Byte-stream destination over any `AsyncWrite`.

use std::path::Path;

use crate::destination::Destination;
use crate::{DestinationError, SbcFrame};
use async_trait::async_trait;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// A destination that appends each frame to a byte stream.
///
/// Frames are written back to back with no extra framing; readers recover
/// frame boundaries from the SBC headers (see
/// [`FrameSplitter`](crate::codec::FrameSplitter)). Each write is flushed.
///
/// # Example
///
/// ```no_run
/// use sbc_relay::WriterDestination;
///
/// # async fn run() -> std::io::Result<()> {
/// let destination = WriterDestination::create("capture.sbc").await?;
/// # Ok(())
/// # }
/// ```
pub struct WriterDestination<W> {
    name: String,
    writer: Mutex<W>,
}

impl<W> WriterDestination<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wraps `writer`.
    pub fn new(name: impl Into<String>, writer: W) -> Self {
        Self {
            name: name.into(),
            writer: Mutex::new(writer),
        }
    }

    /// Returns the underlying writer.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterDestination<tokio::fs::File> {
    /// Creates (or truncates) a file and writes frames to it.
    pub async fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        let path = path.as_ref();
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::new(path.display().to_string(), file))
    }
}

#[async_trait]
impl<W> Destination for WriterDestination<W>
where
    W: AsyncWrite + Unpin + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, frame: &SbcFrame) -> Result<(), DestinationError> {
        let mut writer = self.writer.lock().await;
        writer.write_all(&frame.data).await?;
        writer.flush().await?;
        Ok(())
    }
}
