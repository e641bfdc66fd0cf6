//! Responder: datagram dispatch and the per-peer table.
//!
//! ```text
//!  recv loop ──datagram──▶ spawn(handle) ──▶ decode
//!                                              │
//!             ┌──────────────┬─────────────────┼──────────────┐
//!             ▼              ▼                 ▼              ▼
//!            SYN            DATA              FIN          other
//!     (re)init record   PeerState::on_data   reply FIN     ignored
//!     reply SYN-ACK     reply ACK on accept  disconnect
//! ```
//!
//! Every datagram is handled on its own tokio task.  Each peer's
//! [`PeerState`] sits behind its own mutex, so concurrent datagrams from the
//! same address serialize on that record while other peers proceed
//! independently.  The table lock is held only long enough to look up or
//! insert a record.
//!
//! Nothing a peer sends can stop the loop: malformed datagrams, rejected
//! units and transient socket errors are reported and skipped.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventSink, LogSink};
use crate::packet::{Packet, PacketType};
use crate::receiver::{DataOutcome, PeerState};
use crate::simulator::Simulator;
use crate::socket::{self, Socket};

type PeerTable = HashMap<SocketAddr, Arc<Mutex<PeerState>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A bound responder.  Call [`run`](Server::run) to start serving.
pub struct Server {
    inner: Arc<Inner>,
}

struct Inner {
    socket: Socket,
    config: ServerConfig,
    simulator: Simulator,
    events: Arc<dyn EventSink>,
    peers: Mutex<PeerTable>,
}

impl Server {
    /// Bind to `addr`, narrating through [`LogSink`].
    pub async fn bind(addr: SocketAddr, config: ServerConfig) -> Result<Self> {
        Self::bind_with_events(addr, config, Arc::new(LogSink)).await
    }

    pub async fn bind_with_events(
        addr: SocketAddr,
        config: ServerConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let socket = Socket::bind(addr).await?;
        log::info!(
            "listening on {} (window {}, loss rate {})",
            socket.local_addr,
            config.window_size,
            config.simulator.loss_rate
        );
        Ok(Self {
            inner: Arc::new(Inner {
                socket,
                simulator: Simulator::new(&config.simulator),
                config,
                events,
                peers: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.inner.socket.local_addr
    }

    /// The responder's fault injector, for scheduling forced drops.
    pub fn simulator(&self) -> &Simulator {
        &self.inner.simulator
    }

    /// Snapshot of the record for `peer`, if one exists.
    pub fn peer(&self, peer: SocketAddr) -> Option<PeerState> {
        let record = lock(&self.inner.peers).get(&peer).cloned()?;
        let snapshot = lock(&record).clone();
        Some(snapshot)
    }

    pub fn peer_count(&self) -> usize {
        lock(&self.inner.peers).len()
    }

    /// Serve forever.  Returns only on a non-transient socket error.
    pub async fn run(&self) -> Result<()> {
        self.run_until(std::future::pending::<()>()).await
    }

    /// Serve until `shutdown` completes.
    pub async fn run_until<F: Future>(&self, shutdown: F) -> Result<()> {
        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    log::info!("shutting down");
                    return Ok(());
                }
                received = self.inner.socket.recv_datagram_timeout(self.inner.config.recv_timeout) => {
                    match received {
                        Ok(Some((bytes, from))) => {
                            let inner = Arc::clone(&self.inner);
                            tokio::spawn(async move { inner.handle(bytes, from).await });
                        }
                        Ok(None) => {}
                        Err(e) if socket::is_transient(&e) => log::warn!("receive failed: {e}"),
                        Err(e) => return Err(e),
                    }
                }
            }
        }
    }
}

impl Inner {
    async fn handle(&self, bytes: Vec<u8>, from: SocketAddr) {
        let packet = match Packet::decode(&bytes) {
            Ok(packet) => packet,
            Err(error) => {
                self.events.emit(&Event::Malformed {
                    peer: from,
                    len: bytes.len(),
                    error,
                });
                return;
            }
        };

        let reply = match packet.header.kind {
            PacketType::Syn => self.on_syn(from),
            PacketType::Data => self.on_data(from, &packet),
            PacketType::Fin => self.on_fin(from),
            PacketType::SynAck | PacketType::Ack => {
                log::debug!("ignoring {} from {from}", packet.header.kind);
                None
            }
        };

        if let Some(reply) = reply {
            if let Err(e) = self.socket.send_to(&reply, from).await {
                log::warn!("{} to {from} failed: {e}", reply.header.kind);
            }
        }
    }

    fn on_syn(&self, from: SocketAddr) -> Option<Packet> {
        self.events.emit(&Event::SynReceived { peer: from });
        if self.simulator.should_drop() {
            self.events.emit(&Event::SynAckWithheld { peer: from });
            return None;
        }

        {
            let mut peers = lock(&self.peers);
            match peers.get(&from) {
                Some(record) => lock(record).on_syn(),
                None => {
                    let record = PeerState::new(self.config.window_size);
                    peers.insert(from, Arc::new(Mutex::new(record)));
                }
            }
        }
        self.events.emit(&Event::SynAckSent { peer: from });
        Some(Packet::control(PacketType::SynAck, 0))
    }

    fn on_data(&self, from: SocketAddr, packet: &Packet) -> Option<Packet> {
        let seq = packet.header.seq;
        let record = lock(&self.peers).get(&from).cloned();
        let Some(record) = record else {
            self.events
                .emit(&Event::DataWithoutConnection { peer: from, seq });
            return None;
        };

        // Events are emitted under the record lock so deliveries are
        // reported in drain order.
        let mut peer = lock(&record);
        let outcome = if peer.is_connected() {
            Some(peer.on_data(
                seq,
                &packet.payload,
                packet.header.checksum,
                &self.simulator,
            ))
        } else {
            None
        };

        match outcome {
            None => {
                self.events
                    .emit(&Event::DataWithoutConnection { peer: from, seq });
                None
            }
            Some(Ok(DataOutcome::Lost)) => {
                self.events.emit(&Event::DataLost { peer: from, seq });
                None
            }
            Some(Ok(DataOutcome::Accepted {
                duplicate,
                delivered,
            })) => {
                if duplicate {
                    self.events.emit(&Event::DuplicateData { peer: from, seq });
                } else {
                    self.events.emit(&Event::Buffered { peer: from, seq });
                }
                for seq in delivered {
                    self.events.emit(&Event::Delivered { peer: from, seq });
                }
                Some(Packet::control(PacketType::Ack, seq))
            }
            Some(Err(Error::OutOfWindow {
                seq,
                window_start,
                window_end,
            })) => {
                self.events.emit(&Event::OutOfWindow {
                    peer: from,
                    seq,
                    window_start,
                    window_end,
                });
                None
            }
            Some(Err(Error::ChecksumMismatch { seq, .. })) => {
                self.events
                    .emit(&Event::ChecksumMismatch { peer: from, seq });
                None
            }
            Some(Err(e)) => {
                log::warn!("unit {seq} from {from}: {e}");
                None
            }
        }
    }

    fn on_fin(&self, from: SocketAddr) -> Option<Packet> {
        self.events.emit(&Event::FinReceived { peer: from });
        if self.simulator.should_drop() {
            self.events.emit(&Event::FinAckWithheld { peer: from });
            return None;
        }
        if let Some(record) = lock(&self.peers).get(&from).cloned() {
            lock(&record).on_fin();
        }
        self.events.emit(&Event::FinAckSent { peer: from });
        Some(Packet::control(PacketType::Fin, 0))
    }
}
