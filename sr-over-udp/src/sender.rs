//! Selective-repeat send side.
//!
//! Split in two layers, the same way the connection code separates state
//! from I/O:
//!
//! - [`SenderState`]: pure bookkeeping: admission against the byte budget,
//!   in-flight records, the acknowledged set, `base_seq` garbage collection,
//!   RTT sampling and the per-unit timers.  No socket access.
//! - [`SenderEngine`]: owns the socket side: the blocking send/poll loop,
//!   timer-fired retransmissions and ACK processing.  All three run under
//!   one `tokio::sync::Mutex<SenderState>`, held across the datagram send so
//!   that admission, retransmission and acknowledgment of the same unit can
//!   never interleave.
//!
//! # Sequence-number layout
//!
//! ```text
//!  base_seq                       next_seq
//!      │                              │
//!  ────┼──────────────────────────────┼──────────────────▶ logical index
//!      │ unacked / acked-above-a-gap  │ <── admissible ──▶
//! ```
//!
//! Units are numbered with a 32-bit logical index; the wire carries the
//! index modulo 256.  `next_seq - base_seq` never exceeds [`MAX_SEQ_SPAN`],
//! so every wire sequence number maps back to exactly one index.

use std::collections::{BTreeMap, BTreeSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::Rng;
use tokio::sync::Mutex;

use crate::config::{ClientConfig, PayloadSize, RtoConfig};
use crate::error::{Error, Result};
use crate::event::{ByteRange, Event, EventSink};
use crate::packet::{corrupt_checksum, timestamp_now, Packet, PacketType, HEADER_LEN};
use crate::rtt::RttEstimator;
use crate::simulator::Simulator;
use crate::socket::{self, Socket};
use crate::stats::SenderStats;
use crate::timer::RetransmitTimers;

/// Maximum distance between `base_seq` and `next_seq`: half of the 8-bit
/// wire sequence space.
pub const MAX_SEQ_SPAN: u32 = 128;

// ---------------------------------------------------------------------------
// In-flight bookkeeping
// ---------------------------------------------------------------------------

/// A unit that has been transmitted at least once.
#[derive(Debug, Clone)]
pub struct InFlight {
    /// The unit as first built, with its true checksum.
    pub packet: Packet,
    /// Time of the most recent transmission.
    pub sent_at: Instant,
    pub retries: u32,
    pub bytes: ByteRange,
    /// Size on the wire, header included.
    pub size: usize,
}

/// A unit accepted into the window by [`SenderState::admit_next`].
#[derive(Debug, Clone)]
pub struct Admitted {
    pub seq: u32,
    pub packet: Packet,
    pub bytes: ByteRange,
    pub size: usize,
}

/// A unit due for retransmission.
#[derive(Debug, Clone)]
pub struct Retransmission {
    pub packet: Packet,
    pub retries: u32,
    pub bytes: ByteRange,
    pub size: usize,
}

/// Result of a first-time acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AckInfo {
    pub seq: u32,
    pub rtt: Duration,
    pub bytes: ByteRange,
    pub size: usize,
}

/// Send-side state for one connection.
#[derive(Debug)]
pub struct SenderState {
    window_bytes: usize,
    payload: PayloadSize,
    next_seq: u32,
    base_seq: u32,
    in_flight: BTreeMap<u32, InFlight>,
    /// Acknowledged indices at or above `base_seq`.
    acked: BTreeSet<u32>,
    in_flight_bytes: usize,
    payload_bytes_sent: u64,
    /// Payload for `next_seq`, fixed once drawn so its size is stable until
    /// admission.
    pending: Option<Vec<u8>>,
    estimator: RttEstimator,
    timers: RetransmitTimers<u32>,
    total_packets_sent: u64,
    retransmissions: u64,
    acks_received: u64,
}

impl SenderState {
    pub fn new(window_bytes: usize, payload: PayloadSize, rto: RtoConfig) -> Self {
        Self {
            window_bytes,
            payload,
            next_seq: 0,
            base_seq: 0,
            in_flight: BTreeMap::new(),
            acked: BTreeSet::new(),
            in_flight_bytes: 0,
            payload_bytes_sent: 0,
            pending: None,
            estimator: RttEstimator::new(rto),
            timers: RetransmitTimers::new(),
            total_packets_sent: 0,
            retransmissions: 0,
            acks_received: 0,
        }
    }

    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    pub fn base_seq(&self) -> u32 {
        self.base_seq
    }

    /// Bytes (headers included) of units sent but not yet acknowledged.
    pub fn in_flight_bytes(&self) -> usize {
        self.in_flight_bytes
    }

    pub fn window_bytes(&self) -> usize {
        self.window_bytes
    }

    pub fn is_acked(&self, seq: u32) -> bool {
        seq < self.base_seq || self.acked.contains(&seq)
    }

    pub fn is_outstanding(&self, seq: u32) -> bool {
        self.in_flight.contains_key(&seq) && !self.acked.contains(&seq)
    }

    /// `true` once every admitted unit has been acknowledged.
    pub fn all_acked(&self) -> bool {
        self.base_seq == self.next_seq
    }

    /// Would a unit of `size` bytes fit right now?
    pub fn can_admit(&self, size: usize) -> bool {
        self.in_flight_bytes + size <= self.window_bytes
            && self.next_seq - self.base_seq < MAX_SEQ_SPAN
    }

    /// Wire size of the unit `next_seq` would carry.
    pub fn next_unit_size(&mut self) -> usize {
        HEADER_LEN + self.pending_payload().len()
    }

    fn pending_payload(&mut self) -> &Vec<u8> {
        let seq = self.next_seq;
        let policy = self.payload;
        self.pending
            .get_or_insert_with(|| make_payload(seq, draw_size(policy)))
    }

    /// Admit the next unit if it fits in the window.
    ///
    /// Records the in-flight entry and advances `next_seq`; arming the timer
    /// and the actual transmission are the caller's job.
    pub fn admit_next(&mut self, now: Instant) -> Option<Admitted> {
        let size = self.next_unit_size();
        if !self.can_admit(size) {
            return None;
        }
        let payload = self.pending.take()?;
        let seq = self.next_seq;
        let bytes = ByteRange {
            start: self.payload_bytes_sent,
            len: payload.len(),
        };
        let packet = Packet::data(seq as u8, payload, timestamp_now());

        self.in_flight.insert(
            seq,
            InFlight {
                packet: packet.clone(),
                sent_at: now,
                retries: 0,
                bytes,
                size,
            },
        );
        self.in_flight_bytes += size;
        self.payload_bytes_sent += bytes.len as u64;
        self.total_packets_sent += 1;
        self.next_seq += 1;

        Some(Admitted {
            seq,
            packet,
            bytes,
            size,
        })
    }

    /// Map a wire sequence number onto the logical index it acknowledges.
    pub fn resolve(&self, wire_seq: u8) -> Option<u32> {
        let offset = u32::from(wire_seq.wrapping_sub(self.base_seq as u8));
        let seq = self.base_seq + offset;
        (seq < self.next_seq).then_some(seq)
    }

    /// Process an ACK.  Returns `None` for duplicates and for sequence
    /// numbers that match nothing in flight.
    pub fn on_ack(&mut self, wire_seq: u8, now: Instant) -> Option<AckInfo> {
        let seq = self.resolve(wire_seq)?;
        if self.acked.contains(&seq) {
            return None;
        }
        let record = self.in_flight.get(&seq)?;
        let info = AckInfo {
            seq,
            rtt: now.saturating_duration_since(record.sent_at),
            bytes: record.bytes,
            size: record.size,
        };

        self.acked.insert(seq);
        self.acks_received += 1;
        self.estimator.observe(info.rtt);
        self.timers.cancel(seq);
        self.in_flight_bytes -= info.size;

        // Garbage-collect the contiguous acknowledged prefix.
        while self.acked.remove(&self.base_seq) {
            self.in_flight.remove(&self.base_seq);
            self.base_seq += 1;
        }
        Some(info)
    }

    /// Bump the retry count and timestamp of an outstanding unit.  Returns
    /// `None` when `seq` is no longer outstanding.
    pub fn prepare_retransmit(&mut self, seq: u32, now: Instant) -> Option<Retransmission> {
        if self.acked.contains(&seq) {
            return None;
        }
        let record = self.in_flight.get_mut(&seq)?;
        record.retries += 1;
        record.sent_at = now;
        let rt = Retransmission {
            packet: record.packet.clone(),
            retries: record.retries,
            bytes: record.bytes,
            size: record.size,
        };
        self.total_packets_sent += 1;
        self.retransmissions += 1;
        Some(rt)
    }

    pub fn current_timeout(&self) -> Duration {
        self.estimator.current_timeout()
    }

    pub fn timers_mut(&mut self) -> &mut RetransmitTimers<u32> {
        &mut self.timers
    }

    pub fn stats(&self) -> SenderStats {
        SenderStats {
            total_packets_sent: self.total_packets_sent,
            retransmission_count: self.retransmissions,
            acks_received: self.acks_received,
            payload_bytes_sent: self.payload_bytes_sent,
            rtt: self.estimator.summary(),
            rtt_sample_history: self.estimator.samples().collect(),
        }
    }
}

/// `Packet data {seq}` padded with spaces (or truncated) to `size` bytes.
pub fn make_payload(seq: u32, size: usize) -> Vec<u8> {
    let mut payload = format!("Packet data {seq}").into_bytes();
    payload.resize(size, b' ');
    payload
}

fn draw_size(policy: PayloadSize) -> usize {
    match policy {
        PayloadSize::Fixed(n) => n,
        PayloadSize::Random { min, max } => rand::rng().random_range(min..=max),
    }
}

/// Encode `packet`, optionally with a checksum that will not verify.
fn encode_for_wire(packet: &Packet, corrupted: bool) -> Vec<u8> {
    if !corrupted {
        return packet.encode();
    }
    let mut damaged = packet.clone();
    damaged.header.checksum = corrupt_checksum(damaged.header.checksum);
    damaged.encode()
}

// ---------------------------------------------------------------------------
// SenderEngine
// ---------------------------------------------------------------------------

struct Shared {
    socket: Arc<Socket>,
    peer: SocketAddr,
    simulator: Simulator,
    events: Arc<dyn EventSink>,
    recv_timeout: Duration,
    /// Set on teardown; fired timers stop re-arming once it is seen.
    closed: AtomicBool,
    state: Mutex<SenderState>,
}

/// Drives [`SenderState`] against a socket.
pub struct SenderEngine {
    shared: Arc<Shared>,
}

impl SenderEngine {
    pub fn new(
        socket: Arc<Socket>,
        peer: SocketAddr,
        config: &ClientConfig,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let state = SenderState::new(config.window_bytes, config.payload, config.rto.clone());
        Self {
            shared: Arc::new(Shared {
                socket,
                peer,
                simulator: Simulator::new(&config.simulator),
                events,
                recv_timeout: config.recv_timeout,
                closed: AtomicBool::new(false),
                state: Mutex::new(state),
            }),
        }
    }

    /// The sender-side fault injector, for scheduling forced drops.
    pub fn simulator(&self) -> &Simulator {
        &self.shared.simulator
    }

    /// Transmit units until indices `0..total` have all been sent once.
    ///
    /// Fills the window, then blocks on one acknowledgment poll (bounded by
    /// the receive timeout) before trying to admit more.  Returns once the
    /// last unit has been admitted and one more poll has run; units still
    /// unacknowledged stay under timer control (see [`flush`](Self::flush)).
    pub async fn send(&self, total: u32) -> Result<()> {
        loop {
            let all_sent = {
                let mut st = self.shared.state.lock().await;
                while st.next_seq() < total {
                    let Some(unit) = st.admit_next(Instant::now()) else {
                        break;
                    };
                    self.shared.transmit(&mut st, unit).await;
                }
                st.next_seq() >= total
            };

            self.shared.poll_ack().await?;
            if all_sent {
                return Ok(());
            }
        }
    }

    /// Keep polling for acknowledgments until every unit is acknowledged or
    /// `linger` has passed.  Returns `true` when nothing is left in flight.
    pub async fn flush(&self, linger: Duration) -> Result<bool> {
        let deadline = Instant::now() + linger;
        loop {
            if self.shared.state.lock().await.all_acked() {
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            self.shared.poll_ack().await?;
        }
    }

    /// Stop all retransmission activity.
    pub async fn cancel_timers(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.state.lock().await.timers_mut().cancel_all();
    }

    pub async fn stats(&self) -> SenderStats {
        self.shared.state.lock().await.stats()
    }

    /// Run `f` against the locked state.
    pub async fn with_state<R>(&self, f: impl FnOnce(&SenderState) -> R) -> R {
        f(&*self.shared.state.lock().await)
    }
}

impl Drop for SenderEngine {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        if let Ok(mut st) = self.shared.state.try_lock() {
            st.timers_mut().cancel_all();
        }
    }
}

impl Shared {
    /// First transmission of an admitted unit, plus its timer.
    async fn transmit(self: &Arc<Self>, st: &mut SenderState, unit: Admitted) {
        let corrupted = self.simulator.should_drop_seq(unit.packet.header.seq);
        let wire = encode_for_wire(&unit.packet, corrupted);
        if let Err(e) = self.socket.send_bytes(&wire, self.peer).await {
            log::warn!("send of unit {} failed: {e}", unit.seq);
        }
        self.events.emit(&Event::DataSent {
            seq: unit.seq,
            bytes: unit.bytes,
            size: unit.size,
            corrupted,
        });
        self.arm_timer(st, unit.seq);
    }

    fn arm_timer(self: &Arc<Self>, st: &mut SenderState, seq: u32) {
        let delay = st.current_timeout();
        let shared = Arc::clone(self);
        st.timers_mut().arm(seq, delay, move |generation| {
            Box::pin(shared.on_timer(seq, generation))
                as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        });
    }

    /// Timer callback.  A fire for a unit that has since been acknowledged,
    /// or from a superseded generation, does nothing.
    async fn on_timer(self: Arc<Self>, seq: u32, generation: u64) {
        let mut st = self.state.lock().await;
        if !st.timers_mut().take_fired(seq, generation) || self.closed.load(Ordering::SeqCst) {
            return;
        }
        let Some(rt) = st.prepare_retransmit(seq, Instant::now()) else {
            return;
        };

        let corrupted = self.simulator.should_drop_seq(rt.packet.header.seq);
        let wire = encode_for_wire(&rt.packet, corrupted);
        if let Err(e) = self.socket.send_bytes(&wire, self.peer).await {
            log::warn!("retransmission of unit {seq} failed: {e}");
        }
        self.events.emit(&Event::Retransmitted {
            seq,
            retries: rt.retries,
            bytes: rt.bytes,
            size: rt.size,
            corrupted,
        });
        self.arm_timer(&mut st, seq);
    }

    /// Wait up to the receive timeout for one datagram and process it if it
    /// is an ACK from the peer.
    async fn poll_ack(&self) -> Result<()> {
        let (packet, from) = match self.socket.recv_timeout(self.recv_timeout).await {
            Ok(Some(received)) => received,
            Ok(None) => return Ok(()),
            Err(Error::Packet(e)) => {
                log::warn!("discarding malformed datagram: {e}");
                return Ok(());
            }
            Err(e) if socket::is_transient(&e) => {
                log::warn!("receive failed: {e}");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if from != self.peer {
            log::debug!("ignoring {} from unexpected {from}", packet.header.kind);
            return Ok(());
        }
        if packet.header.kind != PacketType::Ack {
            log::debug!("ignoring {} while sending", packet.header.kind);
            return Ok(());
        }

        let mut st = self.state.lock().await;
        if let Some(info) = st.on_ack(packet.header.seq, Instant::now()) {
            self.events.emit(&Event::Acked {
                seq: info.seq,
                rtt: info.rtt,
                bytes: info.bytes,
                size: info.size,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
