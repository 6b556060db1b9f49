//! Relay example.
//!
//! Creates a `ds4` null sink on the local sound server and writes the SBC
//! stream of its monitor to a file until Ctrl+C.
//!
//! Run with: cargo run --example relay --features libsbc -- out.sbc

use sbc_relay::server::PactlServer;
use sbc_relay::{RelayEvent, SbcRelay, SessionState, WriterDestination};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let path = std::env::args().nth(1).unwrap_or_else(|| "relay.sbc".to_string());

    let relay = SbcRelay::builder()
        .sink_name("ds4")
        .sink_description("DualShock 4")
        .add_destination(WriterDestination::create(&path).await?)
        .on_event(|e| match e {
            RelayEvent::SinkReady { monitor, format, .. } => {
                println!("Capturing {monitor} ({format})");
            }
            RelayEvent::Reconnecting { attempt, delay } => {
                println!("Connection lost, retry {attempt} in {delay:?}");
            }
            _ => {}
        })
        .start(PactlServer::new())
        .await?;

    relay.wait_for_state(SessionState::Streaming).await?;
    println!("Streaming to {path}. Select the 'DualShock 4' output and press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;

    let stats = relay.stats();
    let shutdown = relay.stop().await?;
    println!("Frames: {}, dropped: {}", stats.frames_encoded, stats.frames_dropped);

    std::process::exit(shutdown.code);
}
