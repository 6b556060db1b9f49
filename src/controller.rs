//! Session controller task.
//!
//! One task owns the server client, the provisioner and the capture stream.
//! It reacts to four inputs:
//! - commands from the [`RelayHandle`](crate::RelayHandle)
//! - server events for the current connection attempt
//! - the reconnect timer
//! - the grace timer of a failed record stream
//!
//! Each connection attempt gets its own event channel, so completions from a
//! connection that has been abandoned are never seen by the next one.
//!
//! A record stream usually fails because the server went away, and the
//! connection loss may be reported after the stream failure. A failed stream
//! therefore only ends the session if the connection is not reported lost
//! within the grace period.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::time::Instant;

use crate::event::{emit, EventCallback};
use crate::pipeline::CaptureStream;
use crate::provision::{ProvisionPhase, Provisioner};
use crate::server::{AudioServer, ContextState, ModuleId, ServerEvent, StreamNotice};
use crate::session::{Command, StatsState};
use crate::{RelayError, RelayEvent, SessionState, Shutdown, COMPLETION_CODE};

pub(crate) struct ControllerConfig {
    pub retry_delay: Duration,
    pub unload_timeout: Duration,
    pub stream_failure_grace: Duration,
}

/// A record stream failure waiting to see whether the connection follows.
struct StreamFailure {
    endpoint: String,
    reason: String,
    deadline: Instant,
}

pub(crate) struct Controller<S> {
    server: S,
    provisioner: Provisioner,
    capture: CaptureStream,
    config: ControllerConfig,
    state: SessionState,
    state_tx: watch::Sender<SessionState>,
    stats: Arc<StatsState>,
    event_callback: Option<EventCallback>,
    events: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    retry_at: Option<Instant>,
    failures: u32,
    monitor: Option<String>,
    stale_module: Option<ModuleId>,
    stream_failure: Option<StreamFailure>,
}

impl<S: AudioServer> Controller<S> {
    pub fn new(
        server: S,
        provisioner: Provisioner,
        capture: CaptureStream,
        config: ControllerConfig,
        state_tx: watch::Sender<SessionState>,
        stats: Arc<StatsState>,
        event_callback: Option<EventCallback>,
    ) -> Self {
        Self {
            server,
            provisioner,
            capture,
            config,
            state: SessionState::Disconnected,
            state_tx,
            stats,
            event_callback,
            events: None,
            retry_at: None,
            failures: 0,
            monitor: None,
            stale_module: None,
            stream_failure: None,
        }
    }

    /// Runs until a stop command, a dropped handle, or a fatal error.
    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>) -> Result<Shutdown, RelayError> {
        tracing::info!(server = self.server.name(), "relay controller started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Connect) => self.connect(),
                    Some(Command::Stop) | None => return Ok(self.teardown().await),
                },
                event = next_event(&mut self.events) => match event {
                    Some(event) => {
                        if let Err(e) = self.handle_event(event).await {
                            if let RelayError::Server(e) = &e {
                                tracing::warn!(error = %e, "server request failed");
                                self.on_connection_lost();
                                continue;
                            }
                            tracing::error!(error = %e, "relay session failed");
                            self.teardown().await;
                            return Err(e);
                        }
                    }
                    None => {
                        tracing::debug!("server event channel closed");
                        self.on_connection_lost();
                    }
                },
                () = deadline(self.retry_at) => {
                    self.retry_at = None;
                    self.start_connection();
                }
                () = deadline(self.stream_failure.as_ref().map(|f| f.deadline)) => {
                    if let Some(failure) = self.stream_failure.take() {
                        let e = RelayError::Stream {
                            endpoint: failure.endpoint,
                            reason: failure.reason,
                        };
                        tracing::error!(error = %e, "relay session failed");
                        self.teardown().await;
                        return Err(e);
                    }
                }
            }
        }
    }

    fn connect(&mut self) {
        match self.state {
            SessionState::Disconnected | SessionState::Failed => {
                self.retry_at = None;
                self.start_connection();
            }
            state => tracing::debug!(?state, "connect ignored"),
        }
    }

    fn start_connection(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        self.events = Some(rx);
        self.set_state(SessionState::Connecting);

        if let Err(e) = self.server.connect(tx) {
            tracing::warn!(error = %e, "connect request failed");
            self.on_connection_lost();
        }
    }

    async fn handle_event(&mut self, event: ServerEvent) -> Result<(), RelayError> {
        match event {
            ServerEvent::State(ContextState::Connecting) => {}
            ServerEvent::State(ContextState::Ready) => self.on_ready()?,
            ServerEvent::State(ContextState::Failed | ContextState::Terminated) => {
                self.on_connection_lost();
            }
            ServerEvent::ModuleLoaded(result) => {
                if self.provisioner.phase() == ProvisionPhase::Requested {
                    self.provisioner.on_sink_created(&mut self.server, result)?;
                }
            }
            ServerEvent::SinkInfo(item) => {
                if let Some(sink) = self.provisioner.find_owned_sink(item)? {
                    emit(
                        self.event_callback.as_ref(),
                        RelayEvent::SinkReady {
                            module: sink.module,
                            monitor: sink.monitor.clone(),
                            format: sink.sample_spec,
                        },
                    );
                    self.monitor = Some(sink.monitor.clone());
                    self.capture.open(&mut self.server, &sink)?;
                }
            }
            ServerEvent::Stream(notice) => self.on_stream(notice).await?,
            ServerEvent::ModuleUnloaded { module, success } => {
                tracing::debug!(module, success, "module unloaded");
            }
        }
        Ok(())
    }

    fn on_ready(&mut self) -> Result<(), RelayError> {
        if self.state != SessionState::Connecting {
            return Ok(());
        }
        self.failures = 0;
        self.set_state(SessionState::Ready);

        // A sink left over from a dropped connection would shadow the new one.
        if let Some(stale) = self.stale_module.take() {
            tracing::debug!(module = stale, "unloading sink from previous connection");
            if let Err(e) = self.server.unload_module(stale) {
                tracing::warn!(module = stale, error = %e, "could not unload stale sink");
            }
        }

        self.set_state(SessionState::Provisioning);
        self.provisioner.request_sink(&mut self.server)
    }

    async fn on_stream(&mut self, notice: StreamNotice) -> Result<(), RelayError> {
        match notice {
            StreamNotice::Ready => {
                if self.state == SessionState::Provisioning
                    && self.provisioner.phase() == ProvisionPhase::Located
                {
                    self.set_state(SessionState::Streaming);
                }
            }
            StreamNotice::Data(chunk) => {
                if self.state == SessionState::Streaming {
                    self.capture.on_data(&chunk).await;
                }
                self.server.drop_fragment();
            }
            StreamNotice::Overflow => self.capture.on_overflow(),
            StreamNotice::Underflow => self.capture.on_underflow(),
            StreamNotice::Failed(reason) => {
                if self.stream_failure.is_none() {
                    let grace = self.config.stream_failure_grace;
                    tracing::warn!(%reason, ?grace, "record stream failed");
                    self.stream_failure = Some(StreamFailure {
                        endpoint: self.monitor.clone().unwrap_or_default(),
                        reason,
                        deadline: Instant::now() + grace,
                    });
                }
            }
        }
        Ok(())
    }

    fn on_connection_lost(&mut self) {
        if self.state == SessionState::Failed && self.retry_at.is_some() {
            return;
        }

        self.events = None;
        self.stream_failure = None;
        self.server.disconnect();
        self.capture.close();
        self.monitor = None;
        if let Some(module) = self.provisioner.reset() {
            self.stale_module = Some(module);
        }

        self.failures += 1;
        self.stats.reconnects.fetch_add(1, Ordering::Relaxed);
        self.set_state(SessionState::Failed);

        let delay = self.config.retry_delay;
        self.retry_at = Some(Instant::now() + delay);
        tracing::warn!(attempt = self.failures, ?delay, "connection lost, scheduling reconnect");
        emit(
            self.event_callback.as_ref(),
            RelayEvent::Reconnecting {
                attempt: self.failures,
                delay,
            },
        );
    }

    async fn teardown(&mut self) -> Shutdown {
        self.retry_at = None;
        self.stream_failure = None;

        let live = self.events.is_some()
            && matches!(
                self.state,
                SessionState::Ready | SessionState::Provisioning | SessionState::Streaming
            );

        let mut unloaded = None;
        if let Some(module) = self.provisioner.module().filter(|m| *m > 0) {
            if live {
                tracing::info!(module, "unloading sink module");
                match self.server.unload_module(module) {
                    Ok(()) => {
                        if self.wait_for_unload(module).await {
                            unloaded = Some(module);
                        }
                    }
                    Err(e) => tracing::warn!(module, error = %e, "unload request failed"),
                }
            }
        }

        self.events = None;
        self.server.disconnect();
        self.provisioner.reset();
        self.capture.finish();
        self.set_state(SessionState::Disconnected);
        tracing::info!(?unloaded, "relay stopped");

        Shutdown {
            code: COMPLETION_CODE,
            unloaded,
        }
    }

    async fn wait_for_unload(&mut self, module: ModuleId) -> bool {
        let Some(events) = self.events.as_mut() else {
            return false;
        };
        let deadline = tokio::time::sleep(self.config.unload_timeout);
        tokio::pin!(deadline);

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(ServerEvent::ModuleUnloaded { module: m, success }) if m == module => {
                        if !success {
                            tracing::warn!(module, "server refused to unload sink module");
                        }
                        return success;
                    }
                    Some(ServerEvent::Stream(StreamNotice::Data(_))) => self.server.drop_fragment(),
                    Some(_) => {}
                    None => return false,
                },
                () = &mut deadline => {
                    tracing::warn!(module, timeout = ?self.config.unload_timeout, "no unload confirmation");
                    return false;
                }
            }
        }
    }

    fn set_state(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        let previous = std::mem::replace(&mut self.state, next);
        tracing::info!(?previous, current = ?next, "session state changed");
        self.state_tx.send_replace(next);
        emit(
            self.event_callback.as_ref(),
            RelayEvent::StateChanged {
                previous,
                current: next,
            },
        );
    }
}

async fn next_event(events: &mut Option<mpsc::UnboundedReceiver<ServerEvent>>) -> Option<ServerEvent> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn deadline(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}
