//! Protocol events and the observer interface that narrates them.
//!
//! Both engines report what they do as [`Event`] values handed to an
//! [`EventSink`].  Sinks only observe; nothing they do can influence protocol
//! state.  [`LogSink`] renders every event as one line through the `log`
//! facade and is what the binary uses.

use std::fmt;
use std::net::SocketAddr;
use std::time::Duration;

use crate::packet::PacketError;

/// Inclusive range of payload bytes carried by one unit, counted from the
/// start of the transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub len: usize,
}

impl fmt::Display for ByteRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let end = (self.start + self.len as u64).saturating_sub(1);
        write!(f, "bytes {}~{}", self.start, end)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    // Initiator.
    HandshakeSent { peer: SocketAddr, attempt: u32 },
    HandshakeTimedOut { peer: SocketAddr, attempt: u32 },
    Established { peer: SocketAddr },
    ConnectFailed { peer: SocketAddr, attempts: u32 },
    DataSent {
        seq: u32,
        bytes: ByteRange,
        size: usize,
        corrupted: bool,
    },
    Retransmitted {
        seq: u32,
        retries: u32,
        bytes: ByteRange,
        size: usize,
        corrupted: bool,
    },
    Acked {
        seq: u32,
        rtt: Duration,
        bytes: ByteRange,
        size: usize,
    },
    TeardownSent { peer: SocketAddr },
    TeardownAcked { peer: SocketAddr },
    TeardownTimedOut { peer: SocketAddr },

    // Responder.
    SynReceived { peer: SocketAddr },
    SynAckSent { peer: SocketAddr },
    SynAckWithheld { peer: SocketAddr },
    Buffered { peer: SocketAddr, seq: u8 },
    DuplicateData { peer: SocketAddr, seq: u8 },
    Delivered { peer: SocketAddr, seq: u8 },
    DataLost { peer: SocketAddr, seq: u8 },
    ChecksumMismatch { peer: SocketAddr, seq: u8 },
    OutOfWindow {
        peer: SocketAddr,
        seq: u8,
        window_start: u8,
        window_end: u8,
    },
    DataWithoutConnection { peer: SocketAddr, seq: u8 },
    FinReceived { peer: SocketAddr },
    FinAckSent { peer: SocketAddr },
    FinAckWithheld { peer: SocketAddr },
    Malformed {
        peer: SocketAddr,
        len: usize,
        error: PacketError,
    },
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Event::HandshakeSent { peer, attempt } => {
                write!(f, "SYN sent to {peer} (attempt {attempt})")
            }
            Event::HandshakeTimedOut { peer, attempt } => {
                write!(f, "no SYN-ACK from {peer} for attempt {attempt}, retrying")
            }
            Event::Established { peer } => write!(f, "SYN-ACK from {peer}, connection established"),
            Event::ConnectFailed { peer, attempts } => {
                write!(f, "gave up on {peer} after {attempts} SYN attempts")
            }
            Event::DataSent {
                seq,
                bytes,
                size,
                corrupted,
            } => {
                write!(f, "unit {seq} ({bytes}) sent, {size} bytes")?;
                if *corrupted {
                    write!(f, " [corrupted]")?;
                }
                Ok(())
            }
            Event::Retransmitted {
                seq,
                retries,
                bytes,
                size,
                corrupted,
            } => {
                write!(f, "unit {seq} ({bytes}) retransmitted (retry {retries}), {size} bytes")?;
                if *corrupted {
                    write!(f, " [corrupted]")?;
                }
                Ok(())
            }
            Event::Acked {
                seq,
                rtt,
                bytes,
                size,
            } => write!(
                f,
                "unit {seq} ({bytes}) acknowledged, RTT {:.3} ms, {size} bytes",
                rtt.as_secs_f64() * 1000.0
            ),
            Event::TeardownSent { peer } => write!(f, "FIN sent to {peer}"),
            Event::TeardownAcked { peer } => write!(f, "FIN reply from {peer}, connection closed"),
            Event::TeardownTimedOut { peer } => {
                write!(f, "no FIN reply from {peer}, closing anyway")
            }
            Event::SynReceived { peer } => write!(f, "SYN from {peer}"),
            Event::SynAckSent { peer } => write!(f, "SYN-ACK sent to {peer}"),
            Event::SynAckWithheld { peer } => write!(f, "SYN-ACK to {peer} lost (simulated)"),
            Event::Buffered { peer, seq } => {
                write!(f, "unit {seq} from {peer} buffered, ACK sent")
            }
            Event::DuplicateData { peer, seq } => {
                write!(f, "duplicate unit {seq} from {peer}, ACK re-sent")
            }
            Event::Delivered { peer, seq } => write!(f, "unit {seq} from {peer} delivered"),
            Event::DataLost { peer, seq } => write!(f, "unit {seq} from {peer} lost (simulated)"),
            Event::ChecksumMismatch { peer, seq } => {
                write!(f, "unit {seq} from {peer} failed checksum")
            }
            Event::OutOfWindow {
                peer,
                seq,
                window_start,
                window_end,
            } => write!(
                f,
                "unit {seq} from {peer} outside window [{window_start}, {window_end}]"
            ),
            Event::DataWithoutConnection { peer, seq } => {
                write!(f, "unit {seq} from {peer} before handshake, ignored")
            }
            Event::FinReceived { peer } => write!(f, "FIN from {peer}"),
            Event::FinAckSent { peer } => write!(f, "FIN reply sent to {peer}, connection closed"),
            Event::FinAckWithheld { peer } => write!(f, "FIN reply to {peer} lost (simulated)"),
            Event::Malformed { peer, len, error } => {
                write!(f, "discarding {len}-byte datagram from {peer}: {error}")
            }
        }
    }
}

/// Observer for protocol events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: &Event);
}

/// Renders events through the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: &Event) {
        match event {
            Event::HandshakeTimedOut { .. }
            | Event::ConnectFailed { .. }
            | Event::TeardownTimedOut { .. }
            | Event::Malformed { .. } => log::warn!("{event}"),
            Event::DataLost { .. }
            | Event::SynAckWithheld { .. }
            | Event::FinAckWithheld { .. }
            | Event::ChecksumMismatch { .. }
            | Event::OutOfWindow { .. }
            | Event::DataWithoutConnection { .. }
            | Event::DuplicateData { .. } => log::debug!("{event}"),
            _ => log::info!("{event}"),
        }
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: &Event) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_range_is_inclusive() {
        let r = ByteRange { start: 100, len: 41 };
        assert_eq!(r.to_string(), "bytes 100~140");
    }

    #[test]
    fn event_lines_name_the_unit() {
        let e = Event::DataSent {
            seq: 3,
            bytes: ByteRange { start: 0, len: 28 },
            size: 40,
            corrupted: true,
        };
        assert_eq!(e.to_string(), "unit 3 (bytes 0~27) sent, 40 bytes [corrupted]");
    }
}
