//! Scripted in-memory audio server.

use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::server::{
    AudioServer, ContextState, ModuleId, RecordStreamRequest, SampleFormat, SampleSpec,
    ServerEvent, ServerEvents, SinkInfo, SinkListItem, StreamNotice,
};
use crate::ServerError;

/// A request recorded by [`MockServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCall {
    /// [`AudioServer::connect`].
    Connect,
    /// [`AudioServer::disconnect`].
    Disconnect,
    /// [`AudioServer::load_module`].
    LoadModule {
        /// Module name.
        name: String,
        /// Argument string.
        args: String,
    },
    /// [`AudioServer::list_sinks`].
    ListSinks,
    /// [`AudioServer::open_record_stream`].
    OpenRecordStream(RecordStreamRequest),
    /// [`AudioServer::drop_fragment`].
    DropFragment,
    /// [`AudioServer::unload_module`].
    UnloadModule(ModuleId),
}

struct MockShared {
    events: Option<ServerEvents>,
    calls: Vec<MockCall>,
    connect_failures: usize,
    manual_ready: bool,
    fail_load: bool,
    create_sink: bool,
    sink_spec: SampleSpec,
    sinks: Vec<SinkInfo>,
    next_module: ModuleId,
    next_index: u32,
    stream_open: bool,
}

impl MockShared {
    fn send(&self, event: ServerEvent) -> bool {
        match &self.events {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    fn connected(&self) -> Result<(), ServerError> {
        if self.events.is_some() {
            Ok(())
        } else {
            Err(ServerError::NotConnected)
        }
    }
}

/// An [`AudioServer`] that answers from a script.
///
/// Every request is recorded as a [`MockCall`]. Loading `module-null-sink`
/// creates a sink owned by the new module, named after the `sink_name`
/// argument. The paired [`MockControl`] injects connection failures and
/// stream data from the test side.
///
/// # Example
///
/// ```
/// use sbc_relay::server::MockServer;
///
/// let (server, control) = MockServer::new();
/// let server = server.with_connect_failures(3);
/// assert!(control.calls().is_empty());
/// # drop(server);
/// ```
pub struct MockServer {
    shared: Arc<Mutex<MockShared>>,
}

/// Test-side handle to a [`MockServer`].
#[derive(Clone)]
pub struct MockControl {
    shared: Arc<Mutex<MockShared>>,
}

impl MockServer {
    /// Creates a server that connects immediately and provisions a
    /// `s16le 2ch 32000Hz` sink.
    pub fn new() -> (Self, MockControl) {
        let shared = Arc::new(Mutex::new(MockShared {
            events: None,
            calls: Vec::new(),
            connect_failures: 0,
            manual_ready: false,
            fail_load: false,
            create_sink: true,
            sink_spec: SampleSpec::new(SampleFormat::S16Le, 32000, 2),
            sinks: Vec::new(),
            next_module: 1,
            next_index: 0,
            stream_open: false,
        }));
        (
            Self {
                shared: shared.clone(),
            },
            MockControl { shared },
        )
    }

    /// Fails the next `n` connection attempts.
    #[must_use]
    pub fn with_connect_failures(self, n: usize) -> Self {
        self.shared.lock().connect_failures = n;
        self
    }

    /// Stays in `Connecting` until [`MockControl::ready`] is called.
    #[must_use]
    pub fn manual_ready(self) -> Self {
        self.shared.lock().manual_ready = true;
        self
    }

    /// Format of sinks created by `module-null-sink`.
    #[must_use]
    pub fn with_sink_spec(self, spec: SampleSpec) -> Self {
        self.shared.lock().sink_spec = spec;
        self
    }

    /// Loads modules without creating a sink for them.
    #[must_use]
    pub fn without_created_sink(self) -> Self {
        self.shared.lock().create_sink = false;
        self
    }

    /// Rejects every `load_module` request.
    #[must_use]
    pub fn failing_load_module(self) -> Self {
        self.shared.lock().fail_load = true;
        self
    }

    /// Adds a sink that is present before any module is loaded.
    #[must_use]
    pub fn with_existing_sink(self, sink: SinkInfo) -> Self {
        self.shared.lock().sinks.push(sink);
        self
    }
}

impl AudioServer for MockServer {
    fn name(&self) -> &str {
        "mock"
    }

    fn connect(&mut self, events: ServerEvents) -> Result<(), ServerError> {
        let mut shared = self.shared.lock();
        shared.calls.push(MockCall::Connect);
        shared.events = Some(events);
        shared.send(ServerEvent::State(ContextState::Connecting));

        if shared.connect_failures > 0 {
            shared.connect_failures -= 1;
            shared.send(ServerEvent::State(ContextState::Failed));
            shared.events = None;
        } else if !shared.manual_ready {
            shared.send(ServerEvent::State(ContextState::Ready));
        }
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut shared = self.shared.lock();
        shared.calls.push(MockCall::Disconnect);
        shared.events = None;
        shared.stream_open = false;
    }

    fn load_module(&mut self, name: &str, args: &str) -> Result<(), ServerError> {
        let mut shared = self.shared.lock();
        shared.connected()?;
        shared.calls.push(MockCall::LoadModule {
            name: name.to_string(),
            args: args.to_string(),
        });

        if shared.fail_load {
            shared.send(ServerEvent::ModuleLoaded(Err(ServerError::Protocol(
                format!("module '{name}' refused to load"),
            ))));
            return Ok(());
        }

        let module = shared.next_module;
        shared.next_module += 1;

        if name == "module-null-sink" && shared.create_sink {
            let sink_name = arg_value(args, "sink_name").unwrap_or("null").to_string();
            let index = shared.next_index;
            shared.next_index += 1;
            let sample_spec = shared.sink_spec;
            shared.sinks.push(SinkInfo {
                index,
                name: sink_name,
                owner_module: Some(module),
                sample_spec,
            });
        }

        shared.send(ServerEvent::ModuleLoaded(Ok(module)));
        Ok(())
    }

    fn list_sinks(&mut self) -> Result<(), ServerError> {
        let mut shared = self.shared.lock();
        shared.connected()?;
        shared.calls.push(MockCall::ListSinks);
        for sink in &shared.sinks {
            shared.send(ServerEvent::SinkInfo(SinkListItem::Entry(sink.clone())));
        }
        shared.send(ServerEvent::SinkInfo(SinkListItem::End));
        Ok(())
    }

    fn open_record_stream(&mut self, request: &RecordStreamRequest) -> Result<(), ServerError> {
        let mut shared = self.shared.lock();
        shared.connected()?;
        shared.calls.push(MockCall::OpenRecordStream(request.clone()));
        shared.stream_open = true;
        shared.send(ServerEvent::Stream(StreamNotice::Ready));
        Ok(())
    }

    fn drop_fragment(&mut self) {
        self.shared.lock().calls.push(MockCall::DropFragment);
    }

    fn unload_module(&mut self, module: ModuleId) -> Result<(), ServerError> {
        let mut shared = self.shared.lock();
        shared.connected()?;
        shared.calls.push(MockCall::UnloadModule(module));
        let before = shared.sinks.len();
        shared.sinks.retain(|s| s.owner_module != Some(module));
        let success = module < shared.next_module || shared.sinks.len() != before;
        shared.send(ServerEvent::ModuleUnloaded { module, success });
        Ok(())
    }
}

impl MockControl {
    /// Completes a connection attempt held by [`MockServer::manual_ready`].
    pub fn ready(&self) -> bool {
        self.shared
            .lock()
            .send(ServerEvent::State(ContextState::Ready))
    }

    /// Drops the live connection as if the server went away.
    pub fn fail_connection(&self) -> bool {
        let mut shared = self.shared.lock();
        let sent = shared.send(ServerEvent::State(ContextState::Failed));
        shared.events = None;
        shared.stream_open = false;
        sent
    }

    /// Delivers a fragment on the open record stream.
    ///
    /// Returns `false` if no stream is open.
    pub fn push_data(&self, data: impl Into<Bytes>) -> bool {
        let shared = self.shared.lock();
        shared.stream_open && shared.send(ServerEvent::Stream(StreamNotice::Data(data.into())))
    }

    /// Reports an overflow on the open record stream.
    pub fn overflow(&self) -> bool {
        let shared = self.shared.lock();
        shared.stream_open && shared.send(ServerEvent::Stream(StreamNotice::Overflow))
    }

    /// Reports an underflow on the open record stream.
    pub fn underflow(&self) -> bool {
        let shared = self.shared.lock();
        shared.stream_open && shared.send(ServerEvent::Stream(StreamNotice::Underflow))
    }

    /// Fails the open record stream.
    pub fn fail_stream(&self, reason: &str) -> bool {
        let mut shared = self.shared.lock();
        let sent = shared.stream_open
            && shared.send(ServerEvent::Stream(StreamNotice::Failed(reason.to_string())));
        shared.stream_open = false;
        sent
    }

    /// Returns `true` while a record stream is open.
    pub fn is_streaming(&self) -> bool {
        self.shared.lock().stream_open
    }

    /// All requests recorded so far.
    pub fn calls(&self) -> Vec<MockCall> {
        self.shared.lock().calls.clone()
    }

    /// Number of recorded requests matching `predicate`.
    pub fn count(&self, predicate: impl Fn(&MockCall) -> bool) -> usize {
        self.shared.lock().calls.iter().filter(|c| predicate(c)).count()
    }

    /// Number of `load_module` requests.
    pub fn load_module_calls(&self) -> usize {
        self.count(|c| matches!(c, MockCall::LoadModule { .. }))
    }

    /// Number of `connect` requests.
    pub fn connect_calls(&self) -> usize {
        self.count(|c| matches!(c, MockCall::Connect))
    }

    /// Number of fragments released with `drop_fragment`.
    pub fn fragments_released(&self) -> usize {
        self.count(|c| matches!(c, MockCall::DropFragment))
    }

    /// Sinks currently known to the server.
    pub fn sinks(&self) -> Vec<SinkInfo> {
        self.shared.lock().sinks.clone()
    }
}

/// Extracts `key="value"` or `key=value` from a module argument string.
fn arg_value<'a>(args: &'a str, key: &str) -> Option<&'a str> {
    let start = args.find(&format!("{key}="))? + key.len() + 1;
    let rest = &args[start..];
    if let Some(quoted) = rest.strip_prefix('"') {
        quoted.split('"').next()
    } else {
        rest.split_whitespace().next()
    }
}
