//! Initiator side of a connection.
//!
//! A [`Connection`] drives the state machine in [`crate::state`]:
//!
//! 1. [`open`](Connection::open) (or [`connect`](Connection::connect),
//!    which builds and opens in one step) moves CLOSED to HANDSHAKE_SENT,
//!    sends SYN and waits one receive timeout for a SYN-ACK, retrying up to
//!    the configured number of attempts.
//! 2. [`send`](Connection::send) and [`flush`](Connection::flush) hand the
//!    transfer to the [`SenderEngine`].
//! 3. [`close`](Connection::close) cancels every retransmission timer, sends
//!    FIN and waits once for the peer's FIN.  Teardown is best-effort: the
//!    connection is CLOSED afterwards whether or not the reply arrived.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::event::{Event, EventSink, LogSink};
use crate::packet::{Packet, PacketType};
use crate::sender::SenderEngine;
use crate::simulator::Simulator;
use crate::socket::{self, Socket};
use crate::state::ConnectionState;
use crate::stats::SenderStats;

/// How a [`Connection::close`] ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TeardownOutcome {
    /// The peer answered FIN with FIN.
    Acknowledged,
    /// No reply within the receive timeout; closed locally anyway.
    TimedOut,
    /// The connection was not established.
    NotConnected,
}

/// The initiator's connection to one responder.
pub struct Connection {
    state: ConnectionState,
    socket: Arc<Socket>,
    peer: SocketAddr,
    config: ClientConfig,
    events: Arc<dyn EventSink>,
    sender: SenderEngine,
}

impl Connection {
    /// Handshake with `peer`, narrating through [`LogSink`].
    pub async fn connect(socket: Socket, peer: SocketAddr, config: ClientConfig) -> Result<Self> {
        Self::connect_with_events(socket, peer, config, Arc::new(LogSink)).await
    }

    /// Handshake with `peer`.
    ///
    /// Fails with [`Error::ConnectFailed`] once every SYN attempt has gone
    /// unanswered.
    pub async fn connect_with_events(
        socket: Socket,
        peer: SocketAddr,
        config: ClientConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        let mut conn = Self::new(socket, peer, config, events)?;
        conn.open().await?;
        Ok(conn)
    }

    /// A CLOSED connection to `peer`; nothing is sent until
    /// [`open`](Connection::open).
    pub fn new(
        socket: Socket,
        peer: SocketAddr,
        config: ClientConfig,
        events: Arc<dyn EventSink>,
    ) -> Result<Self> {
        config.validate()?;
        let socket = Arc::new(socket);
        let sender = SenderEngine::new(Arc::clone(&socket), peer, &config, Arc::clone(&events));
        Ok(Self {
            state: ConnectionState::Closed,
            socket,
            peer,
            config,
            events,
            sender,
        })
    }

    /// Run the handshake: HANDSHAKE_SENT while SYNs are outstanding, then
    /// ESTABLISHED, or back to CLOSED once the attempts run out.
    ///
    /// If the returned future is dropped mid-handshake the connection stays
    /// in HANDSHAKE_SENT and `open` may be called again.
    pub async fn open(&mut self) -> Result<()> {
        if self.state == ConnectionState::Established {
            return Ok(());
        }
        self.state = ConnectionState::HandshakeSent;
        match handshake(&self.socket, self.peer, &self.config, self.events.as_ref()).await {
            Ok(()) => {
                self.state = ConnectionState::Established;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Closed;
                Err(e)
            }
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// The sender-side fault injector.
    pub fn simulator(&self) -> &Simulator {
        self.sender.simulator()
    }

    /// Transmit units `0..total`.  See [`SenderEngine::send`].
    pub async fn send(&mut self, total: u32) -> Result<()> {
        self.require_established()?;
        self.sender.send(total).await
    }

    /// Wait, up to the configured linger, for outstanding acknowledgments.
    /// Returns `true` when everything sent has been acknowledged.
    pub async fn flush(&mut self) -> Result<bool> {
        self.require_established()?;
        self.sender.flush(self.config.linger).await
    }

    /// Tear the connection down.
    pub async fn close(&mut self) -> Result<TeardownOutcome> {
        if self.state != ConnectionState::Established {
            self.state = ConnectionState::Closed;
            return Ok(TeardownOutcome::NotConnected);
        }
        self.sender.cancel_timers().await;

        if let Err(e) = self
            .socket
            .send_to(&Packet::control(PacketType::Fin, 0), self.peer)
            .await
        {
            if !socket::is_transient(&e) {
                self.state = ConnectionState::Closed;
                return Err(e);
            }
            log::warn!("FIN to {} failed: {e}", self.peer);
        }
        self.state = ConnectionState::TeardownSent;
        self.events.emit(&Event::TeardownSent { peer: self.peer });

        let reply = expect_reply(
            &self.socket,
            self.peer,
            PacketType::Fin,
            self.config.recv_timeout,
            Error::TeardownTimeout,
        )
        .await;
        self.state = ConnectionState::Closed;

        match reply {
            Ok(()) => {
                self.events.emit(&Event::TeardownAcked { peer: self.peer });
                Ok(TeardownOutcome::Acknowledged)
            }
            Err(Error::TeardownTimeout) => {
                self.events.emit(&Event::TeardownTimedOut { peer: self.peer });
                Ok(TeardownOutcome::TimedOut)
            }
            Err(e) => Err(e),
        }
    }

    pub async fn stats(&self) -> SenderStats {
        self.sender.stats().await
    }

    /// Access the send-side bookkeeping, mainly for inspection in tests.
    pub fn sender(&self) -> &SenderEngine {
        &self.sender
    }

    fn require_established(&self) -> Result<()> {
        if self.state.can_send_data() {
            Ok(())
        } else {
            Err(Error::NotEstablished { state: self.state })
        }
    }
}

async fn handshake(
    socket: &Socket,
    peer: SocketAddr,
    config: &ClientConfig,
    events: &dyn EventSink,
) -> Result<()> {
    let attempts = config.max_handshake_attempts;
    for attempt in 1..=attempts {
        if let Err(e) = socket
            .send_to(&Packet::control(PacketType::Syn, 0), peer)
            .await
        {
            if !socket::is_transient(&e) {
                return Err(e);
            }
            log::warn!("SYN to {peer} failed: {e}");
        }
        events.emit(&Event::HandshakeSent { peer, attempt });

        match expect_reply(
            socket,
            peer,
            PacketType::SynAck,
            config.recv_timeout,
            Error::HandshakeTimeout { attempt },
        )
        .await
        {
            Ok(()) => {
                events.emit(&Event::Established { peer });
                return Ok(());
            }
            Err(Error::HandshakeTimeout { attempt }) => {
                events.emit(&Event::HandshakeTimedOut { peer, attempt });
            }
            Err(e) => return Err(e),
        }
    }

    events.emit(&Event::ConnectFailed { peer, attempts });
    Err(Error::ConnectFailed { attempts })
}

/// Wait up to `wait` for a `kind` datagram from `peer`, skipping anything
/// else.  Returns `on_timeout` if none arrives.
async fn expect_reply(
    socket: &Socket,
    peer: SocketAddr,
    kind: PacketType,
    wait: Duration,
    on_timeout: Error,
) -> Result<()> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(on_timeout);
        }
        match socket.recv_timeout(remaining).await {
            Ok(Some((packet, from))) if from == peer && packet.header.kind == kind => {
                return Ok(());
            }
            Ok(Some((packet, from))) => {
                log::debug!("ignoring {} from {from} while waiting for {kind}", packet.header.kind);
            }
            Ok(None) => return Err(on_timeout),
            Err(Error::Packet(e)) => log::warn!("discarding malformed datagram: {e}"),
            Err(e) if socket::is_transient(&e) => log::warn!("receive failed: {e}"),
            Err(e) => return Err(e),
        }
    }
}
