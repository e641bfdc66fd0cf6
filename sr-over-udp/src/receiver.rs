//! Selective-repeat receive side for one peer.
//!
//! [`PeerState`] holds the receive window and the reorder buffer for a single
//! remote address.  It only manages state; the server sends the ACKs and
//! reports the outcome.
//!
//! ```text
//!   window_start == expected_seq            window_end
//!        │                                      │
//!   ─────┼──────┬──────┬──────┬─────────────────┼─────▶ seq (mod 256)
//!        │ gap  │ buf  │ gap  │ buf             │
//!        └──────┴──────┴──────┴─────────────────┘
//!          drained in order as the gap at expected_seq fills
//! ```
//!
//! Sequence numbers are 8-bit and compared with wrapping arithmetic, which
//! is sound because the window never exceeds half the sequence space.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::packet::checksum;
use crate::simulator::Simulator;

/// What [`PeerState::on_data`] did with a DATA unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataOutcome {
    /// The simulator dropped the unit: no ACK, no buffering.
    Lost,
    /// The unit verified and must be acknowledged.
    Accepted {
        /// Already buffered; acknowledged again but not re-inserted.
        duplicate: bool,
        /// Sequence numbers drained by this arrival, in delivery order.
        delivered: Vec<u8>,
    },
}

/// Per-peer receive state.
#[derive(Debug, Clone)]
pub struct PeerState {
    connected: bool,
    expected_seq: u8,
    reorder_buffer: BTreeMap<u8, Vec<u8>>,
    window_start: u8,
    window_size: u8,
    delivered_total: u64,
}

impl PeerState {
    /// A fresh, connected record with window `[0, window_size - 1]`.
    ///
    /// `window_size` is validated by `ServerConfig` to lie in `1..=128`.
    pub fn new(window_size: usize) -> Self {
        Self {
            connected: true,
            expected_seq: 0,
            reorder_buffer: BTreeMap::new(),
            window_start: 0,
            window_size: window_size.clamp(1, 128) as u8,
            delivered_total: 0,
        }
    }

    /// A SYN (re)initializes the record.
    pub fn on_syn(&mut self) {
        self.connected = true;
        self.expected_seq = 0;
        self.reorder_buffer.clear();
        self.window_start = 0;
    }

    pub fn on_fin(&mut self) {
        self.connected = false;
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn expected_seq(&self) -> u8 {
        self.expected_seq
    }

    /// `(window_start, window_end)`, both inclusive.
    pub fn window(&self) -> (u8, u8) {
        (
            self.window_start,
            self.window_start.wrapping_add(self.window_size - 1),
        )
    }

    pub fn in_window(&self, seq: u8) -> bool {
        seq.wrapping_sub(self.window_start) < self.window_size
    }

    pub fn buffered(&self) -> usize {
        self.reorder_buffer.len()
    }

    pub fn is_buffered(&self, seq: u8) -> bool {
        self.reorder_buffer.contains_key(&seq)
    }

    /// Units delivered in order since the record was created.
    pub fn delivered_total(&self) -> u64 {
        self.delivered_total
    }

    /// Process a DATA unit.
    ///
    /// Checks run in this order: window, simulated loss, checksum.  An
    /// out-of-window or corrupted unit is returned as an error and leaves
    /// the state untouched.
    pub fn on_data(
        &mut self,
        seq: u8,
        payload: &[u8],
        header_checksum: u16,
        simulator: &Simulator,
    ) -> Result<DataOutcome> {
        if !self.in_window(seq) {
            let (window_start, window_end) = self.window();
            return Err(Error::OutOfWindow {
                seq,
                window_start,
                window_end,
            });
        }

        if simulator.should_drop_seq(seq) {
            return Ok(DataOutcome::Lost);
        }

        let actual = checksum(payload);
        if actual != header_checksum {
            return Err(Error::ChecksumMismatch {
                seq,
                expected: header_checksum,
                actual,
            });
        }

        let duplicate = self.reorder_buffer.contains_key(&seq);
        if !duplicate {
            self.reorder_buffer.insert(seq, payload.to_vec());
        }
        let delivered = self.drain();
        Ok(DataOutcome::Accepted {
            duplicate,
            delivered,
        })
    }

    fn drain(&mut self) -> Vec<u8> {
        let mut delivered = Vec::new();
        while self.reorder_buffer.remove(&self.expected_seq).is_some() {
            delivered.push(self.expected_seq);
            self.expected_seq = self.expected_seq.wrapping_add(1);
        }
        self.window_start = self.expected_seq;
        self.delivered_total += delivered.len() as u64;
        delivered
    }
}
