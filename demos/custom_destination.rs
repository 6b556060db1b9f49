//! Custom destination example.
//!
//! Demonstrates how to implement the Destination trait, driven by the
//! scripted mock server and encoder so it runs without a sound server.
//!
//! Run with: cargo run --example custom_destination

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use sbc_relay::codec::MockEncoder;
use sbc_relay::server::MockServer;
use sbc_relay::{Destination, DestinationError, SbcFrame, SbcRelay, SessionState};

/// Tracks how much SBC data a consumer would have received.
struct MeterDestination {
    name: String,
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl MeterDestination {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            frames: AtomicU64::new(0),
            bytes: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl Destination for MeterDestination {
    fn name(&self) -> &str {
        &self.name
    }

    async fn write(&self, frame: &SbcFrame) -> Result<(), DestinationError> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(frame.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let (server, control) = MockServer::new();
    let meter = Arc::new(MeterDestination::new("meter"));

    let relay = SbcRelay::builder()
        .encoder(MockEncoder::new())
        .add_shared_destination(meter.clone())
        .start(server)
        .await?;
    relay.wait_for_state(SessionState::Streaming).await?;

    // 5 ms fragments of 32 kHz stereo s16.
    for _ in 0..100 {
        control.push_data(vec![0u8; 640]);
        tokio::task::yield_now().await;
    }
    while relay.stats().chunks_received < 100 {
        tokio::task::yield_now().await;
    }

    let shutdown = relay.stop().await?;
    println!(
        "[{}] {} frames, {} bytes; sink module {:?} unloaded",
        meter.name(),
        meter.frames.load(Ordering::Relaxed),
        meter.bytes.load(Ordering::Relaxed),
        shutdown.unloaded
    );

    Ok(())
}
