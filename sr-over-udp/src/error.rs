//! Crate-wide error type.

use thiserror::Error;

use crate::packet::PacketError;
use crate::state::ConnectionState;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Datagram could not be parsed (shorter than a header, unknown type).
    #[error(transparent)]
    Packet(#[from] PacketError),

    #[error("checksum mismatch on seq {seq}: header 0x{expected:04x}, payload 0x{actual:04x}")]
    ChecksumMismatch { seq: u8, expected: u16, actual: u16 },

    #[error("seq {seq} outside receive window [{window_start}, {window_end}]")]
    OutOfWindow {
        seq: u8,
        window_start: u8,
        window_end: u8,
    },

    /// Handshake gave up.  Fatal to this connection attempt.
    #[error("connect failed after {attempts} SYN attempts")]
    ConnectFailed { attempts: u32 },

    /// One SYN went unanswered.  Recovered by retrying.
    #[error("no SYN-ACK for attempt {attempt}")]
    HandshakeTimeout { attempt: u32 },

    /// FIN went unanswered.  The connection is closed locally anyway.
    #[error("no FIN reply before timeout")]
    TeardownTimeout,

    #[error("connection is {state}, not established")]
    NotEstablished { state: ConnectionState },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }
}
