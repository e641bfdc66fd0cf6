//! Connection finite-state machine (FSM) types.
//!
//! ```text
//!  CLOSED ──SYN sent──▶ HANDSHAKE_SENT ──SYN-ACK──▶ ESTABLISHED
//!    ▲   ◀── 5 attempts ──┘                            │
//!    │                                       FIN sent  │
//!    │                                                 ▼
//!    └──────── FIN reply / timeout ──────────── TEARDOWN_SENT
//! ```
//!
//! Transitions are driven by [`crate::connection::Connection`]; only the
//! ESTABLISHED state may carry DATA.

/// All possible states of the initiator FSM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection exists; initial and terminal state.
    #[default]
    Closed,
    /// SYN sent; waiting for SYN-ACK.
    HandshakeSent,
    /// Handshake complete; data transfer allowed.
    Established,
    /// FIN sent; waiting for the peer's FIN.
    TeardownSent,
}

impl ConnectionState {
    pub fn can_send_data(self) -> bool {
        self == Self::Established
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Closed => "CLOSED",
            Self::HandshakeSent => "HANDSHAKE_SENT",
            Self::Established => "ESTABLISHED",
            Self::TeardownSent => "TEARDOWN_SENT",
        };
        f.write_str(name)
    }
}
