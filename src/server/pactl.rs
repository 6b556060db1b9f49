//! PulseAudio / PipeWire backend built on `pactl` and `parec`.

use bytes::BytesMut;
use serde::Deserialize;
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::server::{
    AudioServer, ContextState, ModuleId, RecordStreamRequest, SampleSpec, ServerEvent,
    ServerEvents, SinkInfo, SinkListItem, StreamNotice,
};
use crate::ServerError;

/// Index value PulseAudio uses for "no module".
const INVALID_INDEX: u64 = u32::MAX as u64;

#[derive(Debug, Clone)]
struct Tools {
    pactl: String,
    parec: String,
    server: Option<String>,
}

impl Tools {
    fn command(&self, program: &str) -> Command {
        let mut cmd = Command::new(program);
        if let Some(server) = &self.server {
            cmd.arg(format!("--server={server}"));
        }
        cmd.stdin(Stdio::null()).kill_on_drop(true);
        cmd
    }

    async fn pactl(&self, args: &[&str]) -> Result<String, ServerError> {
        let output = self
            .command(&self.pactl)
            .args(args)
            .output()
            .await
            .map_err(|source| ServerError::Spawn {
                program: self.pactl.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(ServerError::CommandFailed {
                command: format!("{} {}", self.pactl, args.join(" ")),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Whether a failed command means the server itself is gone.
    ///
    /// A missing `pactl` can never reach the server. Any other failure is
    /// checked against `pactl info`.
    async fn lost_connection(&self, error: &ServerError) -> bool {
        match error {
            ServerError::Spawn { .. } | ServerError::NotConnected => true,
            _ => self.pactl(&["info"]).await.is_err(),
        }
    }
}

enum Request {
    LoadModule { name: String, args: String },
    ListSinks,
    OpenRecordStream(RecordStreamRequest),
    UnloadModule(ModuleId),
}

/// [`AudioServer`] that shells out to the PulseAudio client tools.
///
/// A background worker owns the connection: it checks the server with
/// `pactl info`, keeps `pactl subscribe` running to notice the server going
/// away, and executes requests one at a time so completions keep their
/// issue order. Capture runs `parec` in raw mode; giving it a latency makes
/// it request adjustable latency from the server.
///
/// Works against both PulseAudio and PipeWire's `pipewire-pulse`.
///
/// # Example
///
/// ```no_run
/// use sbc_relay::server::PactlServer;
///
/// let server = PactlServer::new().with_server("unix:/run/user/1000/pulse/native");
/// ```
pub struct PactlServer {
    tools: Tools,
    requests: Option<mpsc::UnboundedSender<Request>>,
    worker: Option<JoinHandle<()>>,
}

impl PactlServer {
    /// Uses `pactl` and `parec` from `PATH` against the default server.
    pub fn new() -> Self {
        Self {
            tools: Tools {
                pactl: "pactl".to_string(),
                parec: "parec".to_string(),
                server: None,
            },
            requests: None,
            worker: None,
        }
    }

    /// Connects to `server` instead of the default one.
    #[must_use]
    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.tools.server = Some(server.into());
        self
    }

    /// Overrides the paths of the `pactl` and `parec` binaries.
    #[must_use]
    pub fn with_programs(mut self, pactl: impl Into<String>, parec: impl Into<String>) -> Self {
        self.tools.pactl = pactl.into();
        self.tools.parec = parec.into();
        self
    }

    fn request(&self, request: Request) -> Result<(), ServerError> {
        self.requests
            .as_ref()
            .ok_or(ServerError::NotConnected)?
            .send(request)
            .map_err(|_| ServerError::NotConnected)
    }
}

impl Default for PactlServer {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PactlServer {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }
}

impl AudioServer for PactlServer {
    fn name(&self) -> &str {
        "pactl"
    }

    fn connect(&mut self, events: ServerEvents) -> Result<(), ServerError> {
        self.disconnect();
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| ServerError::NoRuntime)?;

        let (tx, rx) = mpsc::unbounded_channel();
        self.requests = Some(tx);
        self.worker = Some(runtime.spawn(run_worker(self.tools.clone(), events, rx)));
        Ok(())
    }

    fn disconnect(&mut self) {
        self.requests = None;
        if let Some(worker) = self.worker.take() {
            worker.abort();
        }
    }

    fn load_module(&mut self, name: &str, args: &str) -> Result<(), ServerError> {
        self.request(Request::LoadModule {
            name: name.to_string(),
            args: args.to_string(),
        })
    }

    fn list_sinks(&mut self) -> Result<(), ServerError> {
        self.request(Request::ListSinks)
    }

    fn open_record_stream(&mut self, request: &RecordStreamRequest) -> Result<(), ServerError> {
        self.request(Request::OpenRecordStream(request.clone()))
    }

    fn drop_fragment(&mut self) {
        // parec hands over owned bytes through the pipe; nothing to release.
    }

    fn unload_module(&mut self, module: ModuleId) -> Result<(), ServerError> {
        self.request(Request::UnloadModule(module))
    }
}

async fn run_worker(
    tools: Tools,
    events: ServerEvents,
    mut requests: mpsc::UnboundedReceiver<Request>,
) {
    let _ = events.send(ServerEvent::State(ContextState::Connecting));

    if let Err(e) = tools.pactl(&["info"]).await {
        tracing::warn!(error = %e, "audio server not reachable");
        let _ = events.send(ServerEvent::State(ContextState::Failed));
        return;
    }

    let mut subscribe = match tools
        .command(&tools.pactl)
        .arg("subscribe")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
    {
        Ok(child) => child,
        Err(source) => {
            tracing::warn!(error = %source, "failed to watch audio server");
            let _ = events.send(ServerEvent::State(ContextState::Failed));
            return;
        }
    };

    tracing::debug!("pactl connection ready");
    let _ = events.send(ServerEvent::State(ContextState::Ready));

    // Aborts the record stream reader when the worker goes away.
    let mut streams = JoinSet::new();

    loop {
        tokio::select! {
            status = subscribe.wait() => {
                tracing::warn!(?status, "lost connection to audio server");
                let _ = events.send(ServerEvent::State(ContextState::Failed));
                break;
            }
            request = requests.recv() => match request {
                Some(request) => {
                    if !handle_request(&tools, &events, &mut streams, request).await {
                        tracing::warn!("audio server went away during a request");
                        let _ = events.send(ServerEvent::State(ContextState::Failed));
                        break;
                    }
                }
                None => break,
            },
        }
    }
}

/// Executes one request and reports its completion.
///
/// Returns `false` if the request failed because the server is gone; the
/// completion is then not reported and the caller fails the connection.
async fn handle_request(
    tools: &Tools,
    events: &ServerEvents,
    streams: &mut JoinSet<()>,
    request: Request,
) -> bool {
    match request {
        Request::LoadModule { name, args } => {
            let result = match tools.pactl(&["load-module", name.as_str(), args.as_str()]).await {
                Ok(out) => parse_module_index(&out),
                Err(e) => {
                    if tools.lost_connection(&e).await {
                        return false;
                    }
                    Err(e)
                }
            };
            let _ = events.send(ServerEvent::ModuleLoaded(result));
        }
        Request::ListSinks => {
            match tools.pactl(&["--format=json", "list", "sinks"]).await {
                Ok(out) => match parse_sink_list(&out) {
                    Ok(sinks) => {
                        for sink in sinks {
                            let _ = events.send(ServerEvent::SinkInfo(SinkListItem::Entry(sink)));
                        }
                    }
                    Err(e) => tracing::warn!(error = %e, "unreadable sink list"),
                },
                Err(e) => {
                    if tools.lost_connection(&e).await {
                        return false;
                    }
                    tracing::warn!(error = %e, "sink enumeration failed");
                }
            }
            let _ = events.send(ServerEvent::SinkInfo(SinkListItem::End));
        }
        Request::OpenRecordStream(request) => {
            streams.abort_all();
            match spawn_parec(tools, &request) {
                Ok(child) => {
                    let _ = events.send(ServerEvent::Stream(StreamNotice::Ready));
                    streams.spawn(read_stream(
                        tools.clone(),
                        child,
                        request.fragment_size,
                        events.clone(),
                    ));
                }
                Err(e) => {
                    let _ = events.send(ServerEvent::Stream(StreamNotice::Failed(e.to_string())));
                }
            }
        }
        Request::UnloadModule(module) => {
            let id = module.to_string();
            let (success, connected) = match tools.pactl(&["unload-module", id.as_str()]).await {
                Ok(_) => (true, true),
                Err(e) => {
                    tracing::warn!(module, error = %e, "unload-module failed");
                    (false, !tools.lost_connection(&e).await)
                }
            };
            let _ = events.send(ServerEvent::ModuleUnloaded { module, success });
            return connected;
        }
    }
    true
}

fn spawn_parec(
    tools: &Tools,
    request: &RecordStreamRequest,
) -> Result<tokio::process::Child, ServerError> {
    let spec = request.sample_spec;
    let mut cmd = tools.command(&tools.parec);
    cmd.arg(format!("--device={}", request.device))
        .arg(format!("--format={}", spec.format))
        .arg(format!("--rate={}", spec.rate))
        .arg(format!("--channels={}", spec.channels))
        .arg(format!("--stream-name={}", request.stream_name))
        .arg("--raw")
        .stdout(Stdio::piped())
        .stderr(Stdio::null());
    if request.adjust_latency {
        cmd.arg(format!("--latency={}", request.fragment_size));
    }

    tracing::debug!(device = %request.device, %spec, fragment = request.fragment_size, "starting parec");
    cmd.spawn().map_err(|source| ServerError::Spawn {
        program: tools.parec.clone(),
        source,
    })
}

async fn read_stream(
    tools: Tools,
    mut child: tokio::process::Child,
    fragment_size: usize,
    events: ServerEvents,
) {
    let Some(mut stdout) = child.stdout.take() else {
        let _ = events.send(ServerEvent::Stream(StreamNotice::Failed(
            "parec has no stdout".to_string(),
        )));
        return;
    };

    let capacity = fragment_size.max(1);
    loop {
        let mut buf = BytesMut::with_capacity(capacity);
        match stdout.read_buf(&mut buf).await {
            Ok(0) => {
                // parec ends when the server goes away.
                let notice = if tools.pactl(&["info"]).await.is_err() {
                    ServerEvent::State(ContextState::Failed)
                } else {
                    ServerEvent::Stream(StreamNotice::Failed("parec exited".to_string()))
                };
                let _ = events.send(notice);
                break;
            }
            Ok(_) => {
                if events
                    .send(ServerEvent::Stream(StreamNotice::Data(buf.freeze())))
                    .is_err()
                {
                    break;
                }
            }
            Err(e) => {
                let _ = events.send(ServerEvent::Stream(StreamNotice::Failed(e.to_string())));
                break;
            }
        }
    }
    let _ = child.kill().await;
}

fn parse_module_index(stdout: &str) -> Result<ModuleId, ServerError> {
    stdout
        .trim()
        .parse()
        .map_err(|_| ServerError::Protocol(format!("expected a module index, got '{}'", stdout.trim())))
}

#[derive(Deserialize)]
struct JsonSink {
    index: u32,
    name: String,
    #[serde(default)]
    owner_module: Option<serde_json::Value>,
    sample_specification: String,
}

fn owner_module(value: Option<&serde_json::Value>) -> Option<ModuleId> {
    let id = match value? {
        serde_json::Value::Number(n) => n.as_u64()?,
        serde_json::Value::String(s) => s.parse().ok()?,
        _ => return None,
    };
    if id >= INVALID_INDEX {
        return None;
    }
    ModuleId::try_from(id).ok()
}

fn parse_sink_list(json: &str) -> Result<Vec<SinkInfo>, ServerError> {
    let sinks: Vec<JsonSink> =
        serde_json::from_str(json).map_err(|e| ServerError::Protocol(e.to_string()))?;

    let mut out = Vec::with_capacity(sinks.len());
    for sink in sinks {
        let Some(sample_spec) = SampleSpec::parse(&sink.sample_specification) else {
            tracing::debug!(sink = %sink.name, spec = %sink.sample_specification, "skipping sink with unknown format");
            continue;
        };
        out.push(SinkInfo {
            index: sink.index,
            owner_module: owner_module(sink.owner_module.as_ref()),
            name: sink.name,
            sample_spec,
        });
    }
    Ok(out)
}
