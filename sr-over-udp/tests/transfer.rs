//! Integration tests for selective-repeat data transfer.
//!
//! A real [`Server`] runs on loopback; the initiator sends numbered units and
//! the tests check what the server delivered and what the sender counted.

mod common;

use std::time::Duration;

use common::{ephemeral, lossless_client, lossless_server, RecordingSink, RunningServer};
use sr_over_udp::{
    packet::{corrupt_checksum, Packet, PacketType},
    ClientConfig, Connection, Event, PayloadSize, SimulatorConfig, TeardownOutcome,
};

const GUARD: Duration = Duration::from_secs(20);

// ---------------------------------------------------------------------------
// Clean path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn clean_transfer_delivers_in_order() {
    let server = RunningServer::start(lossless_server(8)).await;
    let events = RecordingSink::new();

    let stats = tokio::time::timeout(GUARD, async {
        let mut conn =
            Connection::connect_with_events(ephemeral().await, server.addr, lossless_client(20), events.clone())
                .await
                .expect("connect");
        conn.send(5).await.expect("send");
        assert!(conn.flush().await.expect("flush"), "all units acknowledged");
        conn.close().await.expect("close");
        conn.stats().await
    })
    .await
    .expect("transfer timed out");

    assert_eq!(server.events.delivered(), vec![0, 1, 2, 3, 4]);
    assert_eq!(stats.acks_received, 5);
    assert_eq!(stats.retransmission_count, 0);
    assert_eq!(stats.total_packets_sent, 5);
    assert_eq!(stats.payload_bytes_sent, 100);
    assert_eq!(stats.rtt.count(), 5);
    assert_eq!(events.count(|e| matches!(e, Event::Acked { .. })), 5);

    server.stop().await;
}

#[tokio::test]
async fn small_window_still_completes() {
    // Room for exactly two 40-byte units at a time.
    let server = RunningServer::start(lossless_server(4)).await;
    let config = lossless_client(28).with_window_bytes(80);

    let stats = tokio::time::timeout(GUARD, async {
        let mut conn = Connection::connect(ephemeral().await, server.addr, config)
            .await
            .expect("connect");
        conn.send(12).await.expect("send");
        assert!(conn.flush().await.expect("flush"));
        let in_flight = conn.sender().with_state(|st| st.in_flight_bytes()).await;
        assert_eq!(in_flight, 0);
        conn.stats().await
    })
    .await
    .expect("transfer timed out");

    assert_eq!(server.events.delivered(), (0..12).collect::<Vec<u8>>());
    assert_eq!(stats.acks_received, 12);

    server.stop().await;
}

// ---------------------------------------------------------------------------
// Loss recovery
// ---------------------------------------------------------------------------

#[tokio::test]
async fn forced_drop_is_retransmitted_once() {
    let server = RunningServer::start(lossless_server(8)).await;
    server.server.simulator().force_drop(2, 1);

    let config = lossless_client(20).with_fixed_rto(Duration::from_millis(50));
    let events = RecordingSink::new();

    let stats = tokio::time::timeout(GUARD, async {
        let mut conn = Connection::connect_with_events(ephemeral().await, server.addr, config, events.clone())
            .await
            .expect("connect");
        conn.send(5).await.expect("send");
        assert!(conn.flush().await.expect("flush"));
        conn.close().await.expect("close");
        conn.stats().await
    })
    .await
    .expect("transfer timed out");

    assert_eq!(stats.retransmission_count, 1);
    assert_eq!(stats.acks_received, 5);
    let retransmitted: Vec<u32> = events
        .events()
        .iter()
        .filter_map(|e| match e {
            Event::Retransmitted { seq, .. } => Some(*seq),
            _ => None,
        })
        .collect();
    assert_eq!(retransmitted, vec![2]);

    assert_eq!(server.events.delivered(), vec![0, 1, 2, 3, 4]);
    assert_eq!(
        server.events.count(|e| matches!(e, Event::DataLost { seq: 2, .. })),
        1
    );

    server.stop().await;
}

#[tokio::test]
async fn corrupted_first_send_is_recovered() {
    let server = RunningServer::start(lossless_server(8)).await;
    let config = lossless_client(20).with_fixed_rto(Duration::from_millis(50));

    let stats = tokio::time::timeout(GUARD, async {
        let mut conn = Connection::connect(ephemeral().await, server.addr, config)
            .await
            .expect("connect");
        conn.simulator().force_drop(1, 1);
        conn.send(3).await.expect("send");
        assert!(conn.flush().await.expect("flush"));
        conn.stats().await
    })
    .await
    .expect("transfer timed out");

    assert_eq!(stats.retransmission_count, 1);
    assert_eq!(stats.total_packets_sent, 4);
    assert_eq!(server.events.delivered(), vec![0, 1, 2]);
    assert_eq!(
        server
            .events
            .count(|e| matches!(e, Event::ChecksumMismatch { seq: 1, .. })),
        1
    );

    server.stop().await;
}

#[tokio::test]
async fn lossy_transfer_completes_in_order() {
    let mut server_config = lossless_server(4);
    server_config.simulator = SimulatorConfig {
        loss_rate: 0.1,
        seed: Some(7),
    };
    let server = RunningServer::start(server_config).await;

    let mut config = ClientConfig::default()
        .with_simulator(SimulatorConfig {
            loss_rate: 0.3,
            seed: Some(11),
        })
        .with_payload(PayloadSize::Random { min: 28, max: 68 })
        .with_linger(Duration::from_secs(15));
    config.max_handshake_attempts = 20;

    let stats = tokio::time::timeout(Duration::from_secs(30), async {
        let mut conn = Connection::connect(ephemeral().await, server.addr, config)
            .await
            .expect("connect");
        conn.send(30).await.expect("send");
        assert!(conn.flush().await.expect("flush"));
        conn.stats().await
    })
    .await
    .expect("transfer timed out");

    assert_eq!(server.events.delivered(), (0..30).collect::<Vec<u8>>());
    assert_eq!(stats.acks_received, 30);
    assert!(stats.total_packets_sent >= 30);
    assert_eq!(
        stats.total_packets_sent,
        30 + stats.retransmission_count
    );

    server.stop().await;
}

// ---------------------------------------------------------------------------
// Hostile and malformed input
// ---------------------------------------------------------------------------

/// Complete a handshake from a raw socket.
async fn raw_handshake(socket: &sr_over_udp::socket::Socket, server: std::net::SocketAddr) {
    socket
        .send_to(&Packet::control(PacketType::Syn, 0), server)
        .await
        .unwrap();
    let (reply, _) = socket
        .recv_timeout(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("SYN-ACK");
    assert_eq!(reply.header.kind, PacketType::SynAck);
}

#[tokio::test]
async fn corrupted_checksum_gets_no_ack() {
    let server = RunningServer::start(lossless_server(4)).await;
    let socket = ephemeral().await;
    raw_handshake(&socket, server.addr).await;

    let mut unit = Packet::data(0, b"Packet data 0".to_vec(), 0);
    let good = unit.clone();
    unit.header.checksum = corrupt_checksum(unit.header.checksum);
    socket.send_to(&unit, server.addr).await.unwrap();

    let reply = socket.recv_timeout(Duration::from_millis(200)).await.unwrap();
    assert!(reply.is_none(), "corrupted unit must not be acknowledged");
    let peer = server.server.peer(socket.local_addr).unwrap();
    assert_eq!(peer.buffered(), 0);
    assert_eq!(peer.expected_seq(), 0);
    assert_eq!(
        server
            .events
            .count(|e| matches!(e, Event::ChecksumMismatch { seq: 0, .. })),
        1
    );

    // The intact copy is acknowledged.
    socket.send_to(&good, server.addr).await.unwrap();
    let (ack, _) = socket
        .recv_timeout(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("ACK");
    assert_eq!(ack.header.kind, PacketType::Ack);
    assert_eq!(ack.header.seq, 0);

    server.stop().await;
}

#[tokio::test]
async fn out_of_window_unit_is_dropped_silently() {
    let server = RunningServer::start(lossless_server(4)).await;
    let socket = ephemeral().await;
    raw_handshake(&socket, server.addr).await;

    let unit = Packet::data(9, b"Packet data 9".to_vec(), 0);
    socket.send_to(&unit, server.addr).await.unwrap();
    assert!(socket
        .recv_timeout(Duration::from_millis(200))
        .await
        .unwrap()
        .is_none());
    assert!(server.events.events().iter().any(|e| matches!(
        e,
        Event::OutOfWindow {
            seq: 9,
            window_start: 0,
            window_end: 3,
            ..
        }
    )));

    server.stop().await;
}

#[tokio::test]
async fn data_before_handshake_is_ignored() {
    let server = RunningServer::start(lossless_server(4)).await;
    let socket = ephemeral().await;

    socket
        .send_to(&Packet::data(0, b"early".to_vec(), 0), server.addr)
        .await
        .unwrap();
    assert!(socket
        .recv_timeout(Duration::from_millis(200))
        .await
        .unwrap()
        .is_none());
    assert_eq!(
        server
            .events
            .count(|e| matches!(e, Event::DataWithoutConnection { .. })),
        1
    );

    server.stop().await;
}

#[tokio::test]
async fn malformed_datagram_does_not_disturb_server() {
    let server = RunningServer::start(lossless_server(4)).await;
    let socket = ephemeral().await;

    socket.send_bytes(&[1, 2, 3, 4, 5], server.addr).await.unwrap();
    socket.send_bytes(&[0xEE; 12], server.addr).await.unwrap();

    assert!(
        server
            .events
            .wait_for(Duration::from_secs(2), |events| {
                events
                    .iter()
                    .filter(|e| matches!(e, Event::Malformed { .. }))
                    .count()
                    == 2
            })
            .await
    );
    assert!(server
        .events
        .events()
        .iter()
        .any(|e| matches!(e, Event::Malformed { len: 5, .. })));

    // The server keeps serving.
    raw_handshake(&socket, server.addr).await;
    socket
        .send_to(&Packet::data(0, b"Packet data 0".to_vec(), 0), server.addr)
        .await
        .unwrap();
    let (ack, _) = socket
        .recv_timeout(Duration::from_secs(2))
        .await
        .unwrap()
        .expect("ACK");
    assert_eq!(ack.header.seq, 0);
    assert_eq!(server.events.delivered(), vec![0]);

    server.stop().await;
}

#[tokio::test]
async fn duplicate_unit_is_acked_again() {
    let server = RunningServer::start(lossless_server(4)).await;
    let socket = ephemeral().await;
    raw_handshake(&socket, server.addr).await;

    // Unit 1 waits in the reorder buffer for unit 0.
    let unit = Packet::data(1, b"Packet data 1".to_vec(), 0);
    for _ in 0..2 {
        socket.send_to(&unit, server.addr).await.unwrap();
        let (ack, _) = socket
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("ACK");
        assert_eq!(ack.header.seq, 1);
    }
    let peer = server.server.peer(socket.local_addr).unwrap();
    assert_eq!(peer.buffered(), 1);
    assert_eq!(
        server
            .events
            .count(|e| matches!(e, Event::DuplicateData { seq: 1, .. })),
        1
    );

    socket
        .send_to(&Packet::data(0, b"Packet data 0".to_vec(), 0), server.addr)
        .await
        .unwrap();
    socket.recv_timeout(Duration::from_secs(2)).await.unwrap();
    assert_eq!(server.events.delivered(), vec![0, 1]);

    server.stop().await;
}

// ---------------------------------------------------------------------------
// Teardown and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn close_stops_retransmissions() {
    // Completes the handshake and answers FIN, but never acknowledges DATA.
    let responder = ephemeral().await;
    let responder_addr = responder.local_addr;
    let responder_task = tokio::spawn(async move {
        loop {
            let Ok((packet, from)) = responder.recv_from().await else {
                continue;
            };
            let reply = match packet.header.kind {
                PacketType::Syn => PacketType::SynAck,
                PacketType::Fin => PacketType::Fin,
                _ => continue,
            };
            let _ = responder.send_to(&Packet::control(reply, 0), from).await;
        }
    });

    let mut config = lossless_client(20).with_fixed_rto(Duration::from_millis(30));
    config.recv_timeout = Duration::from_millis(50);
    let events = RecordingSink::new();
    let mut conn = Connection::connect_with_events(ephemeral().await, responder_addr, config, events.clone())
        .await
        .expect("connect");

    conn.send(3).await.expect("send");
    tokio::time::sleep(Duration::from_millis(150)).await;
    let retransmitted = |e: &Event| matches!(e, Event::Retransmitted { .. });
    assert!(events.count(retransmitted) > 0, "unacknowledged units are retransmitted");

    assert_eq!(conn.close().await.expect("close"), TeardownOutcome::Acknowledged);
    let at_close = events.count(retransmitted);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(events.count(retransmitted), at_close, "no retransmission after close");

    responder_task.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_units_from_one_peer_deliver_in_order() {
    const UNITS: u8 = 60;
    let server = RunningServer::start(lossless_server(64)).await;
    let socket = ephemeral().await;
    raw_handshake(&socket, server.addr).await;

    for seq in (0..UNITS).rev() {
        let unit = Packet::data(seq, format!("Packet data {seq}").into_bytes(), 0);
        socket.send_to(&unit, server.addr).await.unwrap();
    }

    let mut acked = std::collections::BTreeSet::new();
    while acked.len() < UNITS as usize {
        let (ack, _) = socket
            .recv_timeout(Duration::from_secs(2))
            .await
            .unwrap()
            .expect("ACK");
        assert_eq!(ack.header.kind, PacketType::Ack);
        acked.insert(ack.header.seq);
    }
    assert_eq!(acked, (0..UNITS).collect());

    assert_eq!(server.events.delivered(), (0..UNITS).collect::<Vec<u8>>());
    let peer = server.server.peer(socket.local_addr).unwrap();
    assert_eq!(peer.expected_seq(), UNITS);
    assert_eq!(peer.window().0, UNITS);
    assert_eq!(peer.buffered(), 0);

    server.stop().await;
}
