//! Integration tests for sbc-relay.
//!
//! All tests run against the scripted `MockServer` and `MockEncoder`; none
//! need a sound server or libsbc.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use sbc_relay::codec::{FrameSplitter, MockEncoder};
use sbc_relay::server::{MockCall, MockControl, MockServer};
use sbc_relay::{
    ChannelDestination, Destination, DestinationError, RelayBuilder, RelayError, RelayEvent,
    SbcFrame, SbcRelay, SessionState, WriterDestination,
};
use tokio::sync::mpsc;

const BLOCK: usize = 512;

/// A test destination that counts writes.
struct CountingDestination {
    name: String,
    count: AtomicUsize,
    fail: bool,
}

impl CountingDestination {
    fn new(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            count: AtomicUsize::new(0),
            fail: false,
        })
    }

    fn failing(name: &str) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            count: AtomicUsize::new(0),
            fail: true,
        })
    }

    fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Destination for CountingDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, _frame: &SbcFrame) -> Result<(), DestinationError> {
        self.count.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(DestinationError::write_failed("speaker gone"));
        }
        Ok(())
    }
}

fn relay() -> RelayBuilder {
    SbcRelay::builder()
        .encoder(MockEncoder::new())
        .retry_delay(Duration::from_secs(1))
        .write_timeout(Duration::from_secs(5))
}

/// Polls `condition` until it holds or a second passes.
async fn eventually(condition: impl Fn() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn state_log(builder: RelayBuilder) -> (RelayBuilder, Arc<Mutex<Vec<SessionState>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let sink = log.clone();
    let builder = builder.on_event(move |e| {
        if let RelayEvent::StateChanged { current, .. } = e {
            sink.lock().push(current);
        }
    });
    (builder, log)
}

#[tokio::test]
async fn test_full_lifecycle() {
    let (server, control) = MockServer::new();
    let (tx, mut rx) = mpsc::channel(16);
    let (builder, states) = state_log(relay().add_destination(ChannelDestination::new(tx)));

    let handle = builder.start(server).await.unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    assert!(control.push_data(vec![0u8; BLOCK * 2 + 10]));
    assert_eq!(rx.recv().await.unwrap().sequence, 0);
    assert_eq!(rx.recv().await.unwrap().sequence, 1);
    assert!(eventually(|| control.fragments_released() == 1).await);

    let stats = handle.stats();
    assert_eq!(stats.frames_encoded, 2);
    assert_eq!(stats.bytes_captured, (BLOCK * 2 + 10) as u64);

    let shutdown = handle.stop().await.unwrap();
    assert_eq!(shutdown.code, sbc_relay::COMPLETION_CODE);
    assert_eq!(shutdown.unloaded, Some(1));

    assert_eq!(
        *states.lock(),
        vec![
            SessionState::Connecting,
            SessionState::Ready,
            SessionState::Provisioning,
            SessionState::Streaming,
            SessionState::Disconnected,
        ]
    );
}

#[tokio::test]
async fn test_chunks_smaller_and_larger_than_a_block() {
    let (server, control) = MockServer::new();
    let (tx, mut rx) = mpsc::channel(16);
    let handle = relay()
        .add_destination(ChannelDestination::new(tx))
        .start(server)
        .await
        .unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    // 0.5, 0.6 and 2.0 blocks: 3.1 blocks in total.
    control.push_data(vec![1u8; BLOCK / 2]);
    control.push_data(vec![2u8; BLOCK * 6 / 10]);
    control.push_data(vec![3u8; BLOCK * 2]);

    let mut frames = Vec::new();
    for _ in 0..3 {
        frames.push(rx.recv().await.unwrap());
    }
    assert!(eventually(|| control.fragments_released() == 3).await);
    assert!(rx.try_recv().is_err());
    assert_eq!(frames[0].data[3], 1);
    assert_eq!(frames[2].data[4], 3);

    let stats = handle.stats();
    let residual = stats.bytes_captured - stats.frames_encoded * BLOCK as u64;
    assert_eq!(residual, (BLOCK * 6 / 10 - BLOCK / 2) as u64);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_connect_twice_provisions_once() {
    let (server, control) = MockServer::new();
    let server = server.manual_ready();

    let handle = relay().start(server).await.unwrap();
    handle.wait_for_state(SessionState::Connecting).await.unwrap();

    handle.connect().await.unwrap();
    handle.connect().await.unwrap();
    assert!(control.ready());
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    assert_eq!(control.connect_calls(), 1);
    assert_eq!(control.load_module_calls(), 1);
    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_reconnects_after_failures() {
    let (server, control) = MockServer::new();
    let server = server.with_connect_failures(3);
    let (tx, mut rx) = mpsc::channel(16);

    let reconnects = Arc::new(AtomicUsize::new(0));
    let counter = reconnects.clone();
    let handle = relay()
        .add_destination(ChannelDestination::new(tx))
        .on_event(move |e| {
            if matches!(e, RelayEvent::Reconnecting { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .start(server)
        .await
        .unwrap();

    // Nothing can be captured while the connection keeps failing.
    assert!(!control.push_data(vec![0u8; BLOCK]));

    handle.wait_for_state(SessionState::Streaming).await.unwrap();
    assert_eq!(control.connect_calls(), 4);
    assert_eq!(control.load_module_calls(), 1);
    assert_eq!(reconnects.load(Ordering::SeqCst), 3);
    assert_eq!(handle.stats().reconnects, 3);
    assert_eq!(handle.stats().chunks_received, 0);
    assert!(rx.try_recv().is_err());

    assert!(control.push_data(vec![0u8; BLOCK]));
    assert_eq!(rx.recv().await.unwrap().sequence, 0);
    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_connection_loss_while_streaming() {
    let (server, control) = MockServer::new();
    let handle = relay().start(server).await.unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    let mut states = handle.subscribe_state();
    assert!(control.fail_connection());
    states.wait_for(|s| *s == SessionState::Failed).await.unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    // The sink from the first connection is unloaded and a new one created.
    let calls = control.calls();
    assert!(calls.contains(&MockCall::UnloadModule(1)));
    assert_eq!(control.load_module_calls(), 2);
    assert_eq!(control.sinks().len(), 1);
    assert_eq!(control.sinks()[0].owner_module, Some(2));

    let shutdown = handle.stop().await.unwrap();
    assert_eq!(shutdown.unloaded, Some(2));
}

#[tokio::test]
async fn test_missing_sink_is_fatal() {
    let (server, control) = MockServer::new();
    let server = server.without_created_sink();

    let handle = relay().start(server).await.unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, RelayError::SinkNotFound { module: 1 }));

    // The module that was loaded is still cleaned up.
    assert!(control.calls().contains(&MockCall::UnloadModule(1)));
}

#[tokio::test]
async fn test_rejected_module_is_fatal() {
    let (server, control) = MockServer::new();
    let server = server.failing_load_module();

    let handle = relay().start(server).await.unwrap();
    let err = handle.wait().await.unwrap_err();
    assert!(matches!(err, RelayError::Provisioning { .. }));
    assert_eq!(control.count(|c| matches!(c, MockCall::UnloadModule(_))), 0);
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_on_live_connection_is_fatal() {
    let (server, control) = MockServer::new();
    let handle = relay()
        .stream_failure_grace(Duration::from_millis(200))
        .start(server)
        .await
        .unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    // No connection loss follows, so the grace period runs out.
    assert!(control.fail_stream("source gone"));
    match handle.wait().await {
        Err(RelayError::Stream { endpoint, reason }) => {
            assert_eq!(endpoint, "ds4.monitor");
            assert_eq!(reason, "source gone");
        }
        other => panic!("expected stream error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_stop_before_provisioning_skips_unload() {
    let (server, control) = MockServer::new();
    let handle = relay().connect_on_start(false).start(server).await.unwrap();

    let shutdown = handle.stop().await.unwrap();
    assert_eq!(shutdown.code, 20);
    assert_eq!(shutdown.unloaded, None);
    assert_eq!(control.count(|c| matches!(c, MockCall::UnloadModule(_))), 0);
}

#[tokio::test]
async fn test_destinations_change_while_streaming() {
    let (server, control) = MockServer::new();
    let handle = relay().start(server).await.unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    let a = CountingDestination::new("a");
    let b = CountingDestination::failing("b");
    let c = CountingDestination::new("c");
    let a_dyn: Arc<dyn Destination> = a.clone();
    let b_dyn: Arc<dyn Destination> = b.clone();
    handle.add_destination(a_dyn.clone());
    handle.add_destination(b_dyn.clone());
    handle.add_destination(c.clone());

    control.push_data(vec![0u8; BLOCK]);
    assert!(eventually(|| c.count() == 1).await);
    assert_eq!(a.count(), 1);
    assert_eq!(b.count(), 1);

    // A failing destination stays registered until removed.
    assert_eq!(handle.fanout().len(), 3);
    assert!(handle.remove_destination(&b_dyn));

    control.push_data(vec![0u8; BLOCK]);
    assert!(eventually(|| c.count() == 2).await);
    assert_eq!(a.count(), 2);
    assert_eq!(b.count(), 1);

    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_writer_destination_produces_sbc_stream() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("relay.sbc");

    let (server, control) = MockServer::new();
    let handle = relay()
        .add_destination(WriterDestination::create(&path).await.unwrap())
        .start(server)
        .await
        .unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    control.push_data(vec![9u8; BLOCK * 4]);
    assert!(eventually(|| handle.stats().frames_encoded == 4).await);
    wait_for_fragments(&control, 1).await;
    handle.stop().await.unwrap();

    let bytes = std::fs::read(&path).unwrap();
    let mut splitter = FrameSplitter::new();
    splitter.extend(&bytes);
    let mut frames = 0;
    while splitter.next_frame().is_some() {
        frames += 1;
    }
    assert_eq!(frames, 4);
    assert_eq!(splitter.skipped(), 0);
}

async fn wait_for_fragments(control: &MockControl, n: usize) {
    assert!(eventually(|| control.fragments_released() >= n).await);
}

#[tokio::test]
async fn test_overflow_and_underflow_are_reported() {
    let (server, control) = MockServer::new();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let log = seen.clone();
    let handle = relay()
        .on_event(move |e| {
            if matches!(e, RelayEvent::BufferOverflow | RelayEvent::BufferUnderflow) {
                log.lock().push(e);
            }
        })
        .start(server)
        .await
        .unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    assert!(control.overflow());
    assert!(control.underflow());
    assert!(eventually(|| seen.lock().len() == 2).await);
    assert_eq!(
        *seen.lock(),
        vec![RelayEvent::BufferOverflow, RelayEvent::BufferUnderflow]
    );

    let stats = handle.stats();
    assert_eq!((stats.overflows, stats.underflows), (1, 1));
    // The session keeps streaming.
    assert_eq!(handle.state(), SessionState::Streaming);
    handle.stop().await.unwrap();
}

#[tokio::test]
async fn test_encoder_failure_drops_one_block() {
    let (server, control) = MockServer::new();
    let (tx, mut rx) = mpsc::channel(16);
    let handle = SbcRelay::builder()
        .encoder(MockEncoder::new().with_failures([1]))
        .add_destination(ChannelDestination::new(tx))
        .start(server)
        .await
        .unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    control.push_data(vec![0u8; BLOCK * 3]);
    assert_eq!(rx.recv().await.unwrap().sequence, 0);
    assert_eq!(rx.recv().await.unwrap().sequence, 1);
    assert!(eventually(|| control.fragments_released() == 1).await);

    let stats = handle.stats();
    assert_eq!(stats.frames_encoded, 2);
    assert_eq!(stats.frames_dropped, 1);
    handle.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stream_failure_followed_by_connection_loss_reconnects() {
    let (server, control) = MockServer::new();
    let handle = relay().start(server).await.unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    // A dying server takes the record stream down before the connection.
    let mut states = handle.subscribe_state();
    assert!(control.fail_stream("parec exited"));
    assert!(control.fail_connection());
    states.wait_for(|s| *s == SessionState::Failed).await.unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    assert_eq!(control.load_module_calls(), 2);
    assert!(control.calls().contains(&MockCall::UnloadModule(1)));

    let shutdown = handle.stop().await.unwrap();
    assert_eq!(shutdown.unloaded, Some(2));
}

#[tokio::test]
async fn test_stop_with_undrained_receiver() {
    let (server, control) = MockServer::new();
    let (tx, _rx) = mpsc::channel(1);
    let errors = Arc::new(AtomicUsize::new(0));
    let counter = errors.clone();
    let handle = relay()
        .add_destination(ChannelDestination::new(tx))
        .on_event(move |e| {
            if matches!(e, RelayEvent::DestinationError { .. }) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })
        .start(server)
        .await
        .unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    for _ in 0..4 {
        assert!(control.push_data(vec![0u8; BLOCK]));
    }
    assert!(eventually(|| control.fragments_released() == 4).await);
    assert_eq!(handle.stats().frames_encoded, 4);
    // One frame fits in the channel; the rest are dropped.
    assert_eq!(errors.load(Ordering::SeqCst), 3);

    let shutdown = tokio::time::timeout(Duration::from_secs(3), handle.stop())
        .await
        .expect("stop did not return")
        .unwrap();
    assert_eq!(shutdown.unloaded, Some(1));
}

#[tokio::test]
async fn test_fragments_released_during_teardown() {
    let (server, control) = MockServer::new();
    let handle = relay().start(server).await.unwrap();
    handle.wait_for_state(SessionState::Streaming).await.unwrap();

    for _ in 0..3 {
        assert!(control.push_data(vec![0u8; 100]));
    }
    let shutdown = handle.stop().await.unwrap();

    assert_eq!(shutdown.unloaded, Some(1));
    assert_eq!(control.fragments_released(), 3);
}
