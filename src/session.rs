//! Relay session handle and shared state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::destination::Destination;
use crate::pipeline::Fanout;
use crate::server::ModuleId;
use crate::RelayError;

/// Exit code reported once the relay has shut down.
pub const COMPLETION_CODE: i32 = 20;

/// Lifecycle state of a relay session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SessionState {
    /// No connection and none pending.
    #[default]
    Disconnected,
    /// A connection attempt is in progress.
    Connecting,
    /// Connected; provisioning is about to start.
    Ready,
    /// Creating the sink and opening the record stream.
    Provisioning,
    /// Frames are flowing.
    Streaming,
    /// The connection failed; a retry is scheduled.
    Failed,
}

/// Statistics about a relay session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelayStats {
    /// Capture fragments received.
    pub chunks_received: u64,
    /// PCM bytes received.
    pub bytes_captured: u64,
    /// Frames encoded and broadcast.
    pub frames_encoded: u64,
    /// Blocks dropped because the encoder failed.
    pub frames_dropped: u64,
    /// Overflows reported by the record stream.
    pub overflows: u64,
    /// Underflows reported by the record stream.
    pub underflows: u64,
    /// Reconnect attempts scheduled after a connection failure.
    pub reconnects: u64,
}

/// Counters shared between the handle and the controller task.
pub(crate) struct StatsState {
    pub chunks_received: AtomicU64,
    pub bytes_captured: AtomicU64,
    pub frames_encoded: AtomicU64,
    pub frames_dropped: AtomicU64,
    pub overflows: AtomicU64,
    pub underflows: AtomicU64,
    pub reconnects: AtomicU64,
}

impl StatsState {
    pub fn new() -> Self {
        Self {
            chunks_received: AtomicU64::new(0),
            bytes_captured: AtomicU64::new(0),
            frames_encoded: AtomicU64::new(0),
            frames_dropped: AtomicU64::new(0),
            overflows: AtomicU64::new(0),
            underflows: AtomicU64::new(0),
            reconnects: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            chunks_received: self.chunks_received.load(Ordering::SeqCst),
            bytes_captured: self.bytes_captured.load(Ordering::SeqCst),
            frames_encoded: self.frames_encoded.load(Ordering::SeqCst),
            frames_dropped: self.frames_dropped.load(Ordering::SeqCst),
            overflows: self.overflows.load(Ordering::SeqCst),
            underflows: self.underflows.load(Ordering::SeqCst),
            reconnects: self.reconnects.load(Ordering::SeqCst),
        }
    }
}

/// How a relay session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Shutdown {
    /// Completion code for the surrounding process, always [`COMPLETION_CODE`].
    pub code: i32,
    /// The sink module that was unloaded, if the server confirmed it.
    pub unloaded: Option<ModuleId>,
}

/// Command sent to the controller task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Command {
    Connect,
    Stop,
}

/// Handle to a running relay.
///
/// Returned by [`RelayBuilder::start()`]. The relay runs in a background
/// task until [`stop()`](Self::stop) is called, a fatal error ends it, or
/// the handle is dropped.
///
/// # Example
///
/// ```ignore
/// let relay = SbcRelay::builder()
///     .add_destination(WriterDestination::create("out.sbc").await?)
///     .start(PactlServer::new())
///     .await?;
///
/// relay.wait_for_state(SessionState::Streaming).await?;
/// tokio::signal::ctrl_c().await?;
///
/// let shutdown = relay.stop().await?;
/// std::process::exit(shutdown.code);
/// ```
///
/// [`RelayBuilder::start()`]: crate::RelayBuilder::start
pub struct RelayHandle {
    state_rx: watch::Receiver<SessionState>,
    stats: Arc<StatsState>,
    fanout: Arc<Fanout>,
    cmd_tx: mpsc::Sender<Command>,
    task: Option<JoinHandle<Result<Shutdown, RelayError>>>,
}

impl RelayHandle {
    pub(crate) fn new(
        state_rx: watch::Receiver<SessionState>,
        stats: Arc<StatsState>,
        fanout: Arc<Fanout>,
        cmd_tx: mpsc::Sender<Command>,
        task: JoinHandle<Result<Shutdown, RelayError>>,
    ) -> Self {
        Self {
            state_rx,
            stats,
            fanout,
            cmd_tx,
            task: Some(task),
        }
    }

    /// Current session state.
    pub fn state(&self) -> SessionState {
        *self.state_rx.borrow()
    }

    /// A receiver that observes every state change.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state_rx.clone()
    }

    /// Waits until the session reaches `target`.
    ///
    /// Fails with [`RelayError::ControllerGone`] if the relay ends first.
    pub async fn wait_for_state(&self, target: SessionState) -> Result<(), RelayError> {
        let mut rx = self.state_rx.clone();
        rx.wait_for(|state| *state == target)
            .await
            .map(|_| ())
            .map_err(|_| RelayError::ControllerGone)
    }

    /// Returns current session statistics.
    pub fn stats(&self) -> RelayStats {
        self.stats.snapshot()
    }

    /// The destination set frames are broadcast to.
    pub fn fanout(&self) -> &Arc<Fanout> {
        &self.fanout
    }

    /// Registers a destination. Returns `false` if it was already registered.
    pub fn add_destination(&self, destination: Arc<dyn Destination>) -> bool {
        self.fanout.add(destination)
    }

    /// Unregisters a destination. Returns `false` if it was not registered.
    pub fn remove_destination(&self, destination: &Arc<dyn Destination>) -> bool {
        self.fanout.remove(destination)
    }

    /// Starts connecting if the relay is disconnected or waiting to retry.
    ///
    /// Does nothing while a connection is in progress or established.
    pub async fn connect(&self) -> Result<(), RelayError> {
        self.cmd_tx
            .send(Command::Connect)
            .await
            .map_err(|_| RelayError::ControllerGone)
    }

    /// Stops the relay.
    ///
    /// If the sink was provisioned on a live connection, its module is
    /// unloaded first and the server's confirmation awaited.
    ///
    /// # Errors
    ///
    /// Returns the fatal error if the relay had already ended with one.
    pub async fn stop(mut self) -> Result<Shutdown, RelayError> {
        let _ = self.cmd_tx.send(Command::Stop).await;
        self.join().await
    }

    /// Waits for the relay to end on its own (after a fatal error).
    pub async fn wait(mut self) -> Result<Shutdown, RelayError> {
        self.join().await
    }

    async fn join(&mut self) -> Result<Shutdown, RelayError> {
        match self.task.take() {
            Some(task) => task.await.map_err(|_| RelayError::ControllerGone)?,
            None => Err(RelayError::ControllerGone),
        }
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        if self.task.is_some() {
            // Handle dropped without stop(); let the controller tear down.
            let _ = self.cmd_tx.try_send(Command::Stop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_state_snapshot() {
        let state = StatsState::new();
        state.frames_encoded.fetch_add(3, Ordering::SeqCst);
        state.reconnects.fetch_add(1, Ordering::SeqCst);

        let stats = state.snapshot();
        assert_eq!(stats.frames_encoded, 3);
        assert_eq!(stats.reconnects, 1);
        assert_eq!(stats.chunks_received, 0);
    }

    #[test]
    fn test_session_state_default() {
        assert_eq!(SessionState::default(), SessionState::Disconnected);
    }
}
