//! `sr-over-udp` — selective-repeat reliable delivery over UDP.
//!
//! # Architecture
//!
//! ```text
//!   initiator                                      responder
//!  ┌────────────────────┐                    ┌──────────────────────┐
//!  │     Connection     │  SYN / FIN         │        Server        │
//!  │  (state machine)   │───────────────────▶│  (one task/datagram) │
//!  │  ┌──────────────┐  │                    │  ┌────────────────┐  │
//!  │  │ SenderEngine │  │  DATA (byte budget)│  │ PeerState per  │  │
//!  │  │ timers / RTT │──┼───────────────────▶│  │ remote address │  │
//!  │  └──────────────┘  │◀───────────────────┼──│ reorder buffer │  │
//!  └─────────┬──────────┘  ACK per unit      │  └────────────────┘  │
//!            │                               └──────────┬───────────┘
//!       ┌────▼─────┐                               ┌────▼─────┐
//!       │  Socket  │◀──────── UDP datagrams ──────▶│  Socket  │
//!       └──────────┘                               └──────────┘
//! ```
//!
//! Modules:
//! - [`packet`]     — 12-byte header codec and XOR checksum
//! - [`connection`] — initiator handshake, transfer and teardown
//! - [`sender`]     — byte-budget window, per-unit timers, ACK processing
//! - [`receiver`]   — per-peer receive window and in-order delivery
//! - [`server`]     — responder dispatch and peer table
//! - [`rtt`]        — retransmission-timeout estimate
//! - [`timer`]      — cancellable retransmission timers
//! - [`simulator`]  — synthetic loss and corruption
//! - [`event`]      — protocol events and their log rendering
//! - [`stats`]      — end-of-run sender statistics
//! - [`state`]      — connection states
//! - [`socket`]     — async UDP socket abstraction
//! - [`config`]     — tunables and their defaults

pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod packet;
pub mod receiver;
pub mod rtt;
pub mod sender;
pub mod server;
pub mod simulator;
pub mod socket;
pub mod state;
pub mod stats;
pub mod timer;

pub use config::{ClientConfig, PayloadSize, RtoConfig, ServerConfig, SimulatorConfig};
pub use connection::{Connection, TeardownOutcome};
pub use error::{Error, Result};
pub use event::{Event, EventSink, LogSink, NullSink};
pub use server::Server;
pub use stats::SenderStats;
