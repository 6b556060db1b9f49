//! # sbc-relay
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Relay a sound server's output to SBC consumers.
//!
//! `sbc-relay` creates a virtual ("null") sink on a PulseAudio or PipeWire
//! server, records its monitor, encodes the PCM to SBC and broadcasts every
//! frame to a dynamic set of destinations, such as the speaker of a
//! Bluetooth game controller. Connection loss is survived by reconnecting
//! on a timer.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sbc_relay::{SbcRelay, ChannelDestination, SessionState};
//! use sbc_relay::server::PactlServer;
//! use tokio::sync::mpsc;
//!
//! let (tx, mut rx) = mpsc::channel(64);
//!
//! let relay = SbcRelay::builder()
//!     .sink_name("ds4")
//!     .sink_description("DualShock 4")
//!     .add_destination(ChannelDestination::new(tx))
//!     .on_event(|e| tracing::warn!(?e, "relay event"))
//!     .start(PactlServer::new())
//!     .await?;
//!
//! while let Some(frame) = rx.recv().await {
//!     // Pack into the controller's audio report.
//! }
//!
//! let shutdown = relay.stop().await?;
//! ```
//!
//! ## Architecture
//!
//! A single controller task owns the whole pipeline:
//!
//! - **Server client** ([`server::AudioServer`]): non-blocking requests whose
//!   completions come back as typed events
//! - **Provisioner**: loads `module-null-sink` and finds the sink it created
//! - **Capture stream**: buffers monitor PCM and encodes it block by block
//! - **Fanout** ([`Fanout`]): the only state shared with other tasks;
//!   destinations can be added and removed while frames flow

// unsafe_code lint is configured in Cargo.toml as "deny"; the libsbc bindings opt out locally
#![warn(missing_docs)]
// Sample-rate and byte-count arithmetic casts between integer widths
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]

mod builder;
pub mod codec;
mod config;
mod controller;
mod destination;
mod error;
mod event;
mod frame;
mod pipeline;
pub mod provision;
pub mod server;
mod session;

pub use builder::{RelayBuilder, SbcRelay};
pub use config::RelayConfig;
pub use destination::{ChannelDestination, Destination, WriterDestination};
pub use error::{CodecError, DestinationError, RelayError, ServerError};
pub use event::{event_callback, EventCallback, RelayEvent};
pub use frame::SbcFrame;
pub use pipeline::{BroadcastReport, Fanout, PcmBuffer};
pub use session::{RelayHandle, RelayStats, SessionState, Shutdown, COMPLETION_CODE};
