//! Capture stream: monitor PCM in, SBC frames out.
//!
//! The capture stream owns the codec and the PCM buffer for one session:
//! - Negotiating the codec format against the sink's sample spec
//! - Opening the record stream on the sink's monitor
//! - Cutting incoming fragments into codec blocks and encoding them
//! - Handing every encoded frame to the fanout

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::codec::{CodecState, Frequency};
use crate::event::{emit, EventCallback};
use crate::pipeline::{Fanout, PcmBuffer};
use crate::provision::LocatedSink;
use crate::server::{AudioServer, RecordStreamRequest, SampleFormat, SampleSpec};
use crate::session::StatsState;
use crate::{CodecError, RelayError, RelayEvent, SbcFrame};

/// Settings the capture stream takes from the relay configuration.
#[derive(Debug, Clone)]
pub(crate) struct CaptureConfig {
    pub stream_name: String,
    pub fragment_latency: Duration,
}

pub(crate) struct CaptureStream {
    codec: CodecState,
    buffer: PcmBuffer,
    fanout: Arc<Fanout>,
    stats: Arc<StatsState>,
    event_callback: Option<EventCallback>,
    config: CaptureConfig,
    format: Option<SampleSpec>,
    sequence: u64,
}

impl CaptureStream {
    pub fn new(
        codec: CodecState,
        fanout: Arc<Fanout>,
        stats: Arc<StatsState>,
        config: CaptureConfig,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            codec,
            buffer: PcmBuffer::new(),
            fanout,
            stats,
            event_callback,
            config,
            format: None,
            sequence: 0,
        }
    }

    /// Adapts the codec to the sink's format before data flows.
    ///
    /// Rates without an SBC frequency keep the configured one and are
    /// reported as unsupported. Single-byte formats keep the codec's byte
    /// order.
    pub fn negotiate(&mut self, format: &SampleSpec) -> Result<(), CodecError> {
        let endianness = format
            .format
            .endianness()
            .unwrap_or_else(|| self.codec.endianness());
        let frequency = match format.rate {
            16000 => Some(Frequency::Hz16000),
            32000 => Some(Frequency::Hz32000),
            rate => {
                tracing::warn!(
                    rate,
                    encoder_hz = self.codec.frequency().hz(),
                    "unsupported sample rate, keeping encoder frequency"
                );
                emit(
                    self.event_callback.as_ref(),
                    RelayEvent::UnsupportedRate { rate },
                );
                None
            }
        };

        self.codec.apply_format(frequency, endianness)?;
        Ok(())
    }

    /// The format to record the sink's monitor in.
    ///
    /// The encoder only takes signed 16-bit PCM, so the server is asked to
    /// convert to that in the codec's byte order and channel count. The rate
    /// stays the sink's.
    pub fn capture_spec(&self, sink: &SampleSpec) -> SampleSpec {
        let config = self.codec.config();
        SampleSpec {
            format: SampleFormat::s16(config.endianness),
            rate: sink.rate,
            channels: config.mode.channels() as u8,
        }
    }

    /// Builds the record request for `monitor`.
    ///
    /// The fragment covers the configured latency at `format`, in whole
    /// sample frames and never less than one.
    pub fn record_request(&self, monitor: &str, format: &SampleSpec) -> RecordStreamRequest {
        let frame_size = format.frame_size().max(1);
        let fragment = format.duration_to_bytes(self.config.fragment_latency);
        let fragment_size = (fragment / frame_size * frame_size).max(frame_size);

        RecordStreamRequest {
            stream_name: self.config.stream_name.clone(),
            device: monitor.to_string(),
            sample_spec: *format,
            fragment_size,
            adjust_latency: true,
        }
    }

    /// Negotiates the format and opens the record stream on the sink's monitor.
    pub fn open(
        &mut self,
        server: &mut dyn AudioServer,
        sink: &LocatedSink,
    ) -> Result<(), RelayError> {
        if let Err(e) = self.negotiate(&sink.sample_spec) {
            tracing::warn!(error = %e, spec = %sink.sample_spec, "keeping current codec format");
        }

        let spec = self.capture_spec(&sink.sample_spec);
        if spec.format != sink.sample_spec.format {
            tracing::warn!(
                sink_format = %sink.sample_spec.format,
                capture_format = %spec.format,
                "sink does not use 16-bit samples, recording converted PCM"
            );
            emit(
                self.event_callback.as_ref(),
                RelayEvent::FormatConverted {
                    from: sink.sample_spec.format,
                    to: spec.format,
                },
            );
        }

        let request = self.record_request(&sink.monitor, &spec);
        tracing::info!(
            device = %request.device,
            spec = %request.sample_spec,
            fragment = request.fragment_size,
            "opening record stream"
        );
        server.open_record_stream(&request)?;
        self.format = Some(spec);
        Ok(())
    }

    /// Appends a fragment and encodes every complete block.
    ///
    /// Returns the number of frames handed to the fanout.
    pub async fn on_data(&mut self, chunk: &[u8]) -> usize {
        self.stats.chunks_received.fetch_add(1, Ordering::Relaxed);
        self.stats
            .bytes_captured
            .fetch_add(chunk.len() as u64, Ordering::Relaxed);
        self.buffer.append(chunk);

        let codesize = self.codec.codesize();
        let mut produced = 0;

        while let Some(block) = self.buffer.front(codesize) {
            let encoded = match self.codec.encode_one_block(block) {
                Ok(encoded) => encoded,
                Err(e) => {
                    tracing::error!(error = %e, "encoder rejected a full block");
                    break;
                }
            };
            self.buffer.consume(encoded.consumed);

            if encoded.is_dropped() {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                emit(
                    self.event_callback.as_ref(),
                    RelayEvent::BlockDropped {
                        bytes: encoded.consumed,
                    },
                );
                continue;
            }

            let frame = SbcFrame::new(encoded.frame, self.sequence, self.timestamp());
            self.sequence += 1;
            self.stats.frames_encoded.fetch_add(1, Ordering::Relaxed);
            self.fanout.broadcast(&frame).await;
            produced += 1;
        }

        produced
    }

    pub fn on_overflow(&self) {
        tracing::warn!("record stream overflow");
        self.stats.overflows.fetch_add(1, Ordering::Relaxed);
        emit(self.event_callback.as_ref(), RelayEvent::BufferOverflow);
    }

    pub fn on_underflow(&self) {
        tracing::warn!("record stream underflow");
        self.stats.underflows.fetch_add(1, Ordering::Relaxed);
        emit(self.event_callback.as_ref(), RelayEvent::BufferUnderflow);
    }

    /// Forgets the stream's format. Buffered PCM is kept for the next stream.
    pub fn close(&mut self) {
        if let Some(format) = self.format.take() {
            tracing::debug!(%format, buffered = self.buffer.len(), "record stream closed");
        }
    }

    #[cfg(test)]
    pub fn format(&self) -> Option<&SampleSpec> {
        self.format.as_ref()
    }

    #[cfg(test)]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    #[cfg(test)]
    pub fn codec(&self) -> &CodecState {
        &self.codec
    }

    pub fn finish(&mut self) {
        self.codec.finish();
    }

    fn timestamp(&self) -> Duration {
        let config = self.codec.config();
        let samples = self.sequence * config.samples_per_frame() as u64;
        Duration::from_micros(samples * 1_000_000 / u64::from(config.frequency.hz()))
    }
}
