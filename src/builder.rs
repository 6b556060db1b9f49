//! Builder pattern for `SbcRelay`.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};

use crate::codec::{CodecState, SbcConfig, SbcEncoder};
use crate::controller::{Controller, ControllerConfig};
use crate::destination::Destination;
use crate::pipeline::{CaptureConfig, CaptureStream, Fanout};
use crate::provision::{Provisioner, SinkDescriptor};
use crate::server::AudioServer;
use crate::session::{Command, RelayHandle, StatsState};
use crate::{
    event_callback, CodecError, EventCallback, RelayConfig, RelayError, RelayEvent, SessionState,
};

/// Channel capacity for controller commands.
/// Commands are rare (connect and stop).
const COMMAND_CHANNEL_CAPACITY: usize = 4;

/// Entry point for building a relay.
///
/// # Example
///
/// ```ignore
/// use sbc_relay::{SbcRelay, ChannelDestination};
/// use sbc_relay::server::PactlServer;
/// use tokio::sync::mpsc;
///
/// let (tx, mut rx) = mpsc::channel(64);
///
/// let relay = SbcRelay::builder()
///     .sink_name("ds4")
///     .add_destination(ChannelDestination::new(tx))
///     .on_event(|e| tracing::warn!(?e, "relay event"))
///     .start(PactlServer::new())
///     .await?;
///
/// while let Some(frame) = rx.recv().await {
///     // Forward to the controller's audio report channel.
/// }
/// ```
pub struct SbcRelay;

impl SbcRelay {
    /// Creates a new builder.
    pub fn builder() -> RelayBuilder {
        RelayBuilder::new()
    }
}

/// Builder for configuring and starting a relay.
///
/// Use [`SbcRelay::builder()`] to create one.
pub struct RelayBuilder {
    config: RelayConfig,
    codec: SbcConfig,
    encoder: Option<Box<dyn SbcEncoder>>,
    destinations: Vec<Arc<dyn Destination>>,
    event_callback: Option<EventCallback>,
    connect_on_start: bool,
}

impl RelayBuilder {
    fn new() -> Self {
        Self {
            config: RelayConfig::default(),
            codec: SbcConfig::default(),
            encoder: None,
            destinations: Vec::new(),
            event_callback: None,
            connect_on_start: true,
        }
    }

    /// Replaces the whole relay configuration.
    #[must_use]
    pub fn config(mut self, config: RelayConfig) -> Self {
        self.config = config;
        self
    }

    /// Name of the null sink to create.
    #[must_use]
    pub fn sink_name(mut self, name: impl Into<String>) -> Self {
        self.config.sink_name = name.into();
        self
    }

    /// Description shown for the sink in mixers.
    #[must_use]
    pub fn sink_description(mut self, description: impl Into<String>) -> Self {
        self.config.sink_description = description.into();
        self
    }

    /// Sample rate the sink is created with.
    #[must_use]
    pub fn sample_rate(mut self, rate: u32) -> Self {
        self.config.sample_rate = rate;
        self
    }

    /// Delay between reconnect attempts.
    #[must_use]
    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.config.retry_delay = delay;
        self
    }

    /// Target latency used to size capture fragments.
    #[must_use]
    pub fn fragment_latency(mut self, latency: Duration) -> Self {
        self.config.fragment_latency = latency;
        self
    }

    /// Longest a single destination write may take.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.config.write_timeout = timeout;
        self
    }

    /// How long a failed record stream waits for a connection loss before
    /// it ends the session.
    #[must_use]
    pub fn stream_failure_grace(mut self, grace: Duration) -> Self {
        self.config.stream_failure_grace = grace;
        self
    }

    /// SBC parameters the encoder starts with.
    #[must_use]
    pub fn codec(mut self, codec: SbcConfig) -> Self {
        self.codec = codec;
        self
    }

    /// Encoder to use.
    ///
    /// Defaults to `LibSbc` when the `libsbc` feature is enabled; without
    /// it an encoder must be supplied.
    #[must_use]
    pub fn encoder(mut self, encoder: impl SbcEncoder + 'static) -> Self {
        self.encoder = Some(Box::new(encoder));
        self
    }

    /// Registers a destination before the relay starts.
    ///
    /// More can be added later through [`RelayHandle::add_destination`].
    #[must_use]
    pub fn add_destination(mut self, destination: impl Destination + 'static) -> Self {
        self.destinations.push(Arc::new(destination));
        self
    }

    /// Registers a destination the caller keeps a reference to.
    #[must_use]
    pub fn add_shared_destination(mut self, destination: Arc<dyn Destination>) -> Self {
        self.destinations.push(destination);
        self
    }

    /// Sets the callback for runtime events.
    #[must_use]
    pub fn on_event<F>(mut self, f: F) -> Self
    where
        F: Fn(RelayEvent) + Send + Sync + 'static,
    {
        self.event_callback = Some(event_callback(f));
        self
    }

    /// Whether [`start`](Self::start) connects right away. Default: `true`.
    ///
    /// When `false`, call [`RelayHandle::connect`] to begin.
    #[must_use]
    pub fn connect_on_start(mut self, connect: bool) -> Self {
        self.connect_on_start = connect;
        self
    }

    /// Configures the codec and starts the relay against `server`.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::Codec`] if no encoder is available or the codec
    /// configuration is rejected.
    pub async fn start<S: AudioServer>(self, server: S) -> Result<RelayHandle, RelayError> {
        let encoder = self
            .encoder
            .or_else(default_encoder)
            .ok_or(CodecError::Unavailable)?;
        let mut codec = CodecState::new(encoder);
        codec.configure(self.codec)?;

        let fanout = Arc::new(
            Fanout::new()
                .with_event_callback(self.event_callback.clone())
                .with_write_timeout(self.config.write_timeout),
        );
        for destination in self.destinations {
            fanout.add(destination);
        }

        let stats = Arc::new(StatsState::new());
        let capture = CaptureStream::new(
            codec,
            fanout.clone(),
            stats.clone(),
            CaptureConfig {
                stream_name: self.config.stream_name.clone(),
                fragment_latency: self.config.fragment_latency,
            },
            self.event_callback.clone(),
        );
        let provisioner = Provisioner::new(SinkDescriptor::new(
            self.config.sink_name.clone(),
            self.config.sink_description.clone(),
            self.config.sample_rate,
        ));

        let (state_tx, state_rx) = watch::channel(SessionState::Disconnected);
        let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);

        let controller = Controller::new(
            server,
            provisioner,
            capture,
            ControllerConfig {
                retry_delay: self.config.retry_delay,
                unload_timeout: self.config.unload_timeout,
                stream_failure_grace: self.config.stream_failure_grace,
            },
            state_tx,
            stats.clone(),
            self.event_callback,
        );
        let task = tokio::spawn(controller.run(cmd_rx));

        if self.connect_on_start {
            cmd_tx
                .send(Command::Connect)
                .await
                .map_err(|_| RelayError::ControllerGone)?;
        }

        Ok(RelayHandle::new(state_rx, stats, fanout, cmd_tx, task))
    }
}

#[cfg(feature = "libsbc")]
fn default_encoder() -> Option<Box<dyn SbcEncoder>> {
    Some(Box::new(crate::codec::LibSbc::new()))
}

#[cfg(not(feature = "libsbc"))]
fn default_encoder() -> Option<Box<dyn SbcEncoder>> {
    None
}
