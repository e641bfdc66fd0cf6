//! Async UDP socket abstraction.
//!
//! [`Socket`] is a thin wrapper around `tokio::net::UdpSocket` that speaks
//! [`crate::packet::Packet`] instead of raw bytes.  All protocol logic lives
//! elsewhere; this module owns only byte I/O.

use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::UdpSocket;

use crate::config::MAX_DATAGRAM;
use crate::error::{Error, Result};
use crate::packet::Packet;

/// An async, packet-oriented UDP socket.
///
/// All methods are `&self` so the socket can be shared between the send
/// loop, timer tasks and per-datagram handlers through an `Arc`.
#[derive(Debug)]
pub struct Socket {
    /// Address this socket is bound to (filled in after OS assigns ephemeral port).
    pub local_addr: SocketAddr,
    inner: UdpSocket,
}

impl Socket {
    /// Bind a new socket to `local_addr`.
    ///
    /// Passing `0.0.0.0:0` lets the OS choose an ephemeral port.
    pub async fn bind(local_addr: SocketAddr) -> Result<Self> {
        let inner = UdpSocket::bind(local_addr).await?;
        let local_addr = inner.local_addr()?;
        Ok(Self { local_addr, inner })
    }

    /// Encode `packet` and send it as a single UDP datagram to `dest`.
    pub async fn send_to(&self, packet: &Packet, dest: SocketAddr) -> Result<()> {
        self.send_bytes(&packet.encode(), dest).await
    }

    /// Send an already-encoded datagram.
    pub async fn send_bytes(&self, bytes: &[u8], dest: SocketAddr) -> Result<()> {
        self.inner.send_to(bytes, dest).await?;
        Ok(())
    }

    /// Receive the next raw datagram.
    pub async fn recv_datagram(&self) -> Result<(Vec<u8>, SocketAddr)> {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        let (n, addr) = self.inner.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok((buf, addr))
    }

    /// Receive the next datagram and decode it into a [`Packet`].
    ///
    /// Datagrams that fail to decode are returned as `Err(Error::Packet)`;
    /// the caller decides whether to keep reading.
    pub async fn recv_from(&self) -> Result<(Packet, SocketAddr)> {
        let (bytes, addr) = self.recv_datagram().await?;
        let packet = Packet::decode(&bytes)?;
        Ok((packet, addr))
    }

    /// Like [`recv_from`](Socket::recv_from) but gives up after `wait`,
    /// returning `Ok(None)`.
    pub async fn recv_timeout(&self, wait: Duration) -> Result<Option<(Packet, SocketAddr)>> {
        match tokio::time::timeout(wait, self.recv_from()).await {
            Ok(Ok(received)) => Ok(Some(received)),
            Ok(Err(e)) => Err(e),
            Err(_elapsed) => Ok(None),
        }
    }

    /// Like [`recv_datagram`](Socket::recv_datagram) with a timeout.
    pub async fn recv_datagram_timeout(
        &self,
        wait: Duration,
    ) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        match tokio::time::timeout(wait, self.recv_datagram()).await {
            Ok(result) => result.map(Some),
            Err(_elapsed) => Ok(None),
        }
    }
}

/// `true` for receive/send failures that only concern one datagram or one
/// peer and should not stop a receive loop.
pub fn is_transient(err: &Error) -> bool {
    use std::io::ErrorKind;
    match err {
        Error::Io(e) => matches!(
            e.kind(),
            ErrorKind::ConnectionReset
                | ErrorKind::ConnectionRefused
                | ErrorKind::WouldBlock
                | ErrorKind::Interrupted
                | ErrorKind::TimedOut
        ),
        Error::Packet(_) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::PacketError;
    use std::io;

    #[test]
    fn per_datagram_failures_are_transient() {
        assert!(is_transient(&Error::Io(io::ErrorKind::ConnectionReset.into())));
        assert!(is_transient(&Error::Io(io::ErrorKind::ConnectionRefused.into())));
        assert!(is_transient(&Error::Packet(PacketError::TooShort { len: 3 })));
    }

    #[test]
    fn other_errors_are_fatal() {
        assert!(!is_transient(&Error::Io(io::ErrorKind::AddrInUse.into())));
        assert!(!is_transient(&Error::Config("bad".into())));
        assert!(!is_transient(&Error::ConnectFailed { attempts: 5 }));
        assert!(!is_transient(&Error::TeardownTimeout));
    }

    #[tokio::test]
    async fn recv_timeout_returns_none_when_idle() {
        let socket = Socket::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let got = socket
            .recv_timeout(Duration::from_millis(20))
            .await
            .unwrap();
        assert!(got.is_none());
    }
}
