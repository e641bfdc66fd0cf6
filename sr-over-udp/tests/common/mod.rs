//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use sr_over_udp::{
    socket::Socket, ClientConfig, Event, EventSink, PayloadSize, Server, ServerConfig,
    SimulatorConfig,
};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Bind a socket to an OS-assigned port on loopback.
pub async fn ephemeral() -> Socket {
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    Socket::bind(addr).await.expect("bind failed")
}

/// Keeps every event for later inspection.
#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<Event>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, pred: impl Fn(&Event) -> bool) -> usize {
        self.events.lock().unwrap().iter().filter(|e| pred(e)).count()
    }

    /// Sequence numbers delivered to the application, in order.
    pub fn delivered(&self) -> Vec<u8> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter_map(|e| match e {
                Event::Delivered { seq, .. } => Some(*seq),
                _ => None,
            })
            .collect()
    }

    /// Poll until `pred` holds for the recorded events, or `limit` passes.
    pub async fn wait_for(&self, limit: Duration, pred: impl Fn(&[Event]) -> bool) -> bool {
        let deadline = tokio::time::Instant::now() + limit;
        loop {
            if pred(&self.events.lock().unwrap()) {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}

/// A lossless client sending fixed-size units through a generous window.
pub fn lossless_client(unit: usize) -> ClientConfig {
    ClientConfig::default()
        .with_window_bytes(4096)
        .with_payload(PayloadSize::Fixed(unit))
        .with_simulator(SimulatorConfig::lossless())
        .with_linger(Duration::from_secs(5))
}

pub fn lossless_server(window: usize) -> ServerConfig {
    ServerConfig::default()
        .with_window_size(window)
        .with_simulator(SimulatorConfig::lossless())
}

/// A server running on loopback until the handle is dropped or stopped.
pub struct RunningServer {
    pub server: Arc<Server>,
    pub addr: SocketAddr,
    pub events: Arc<RecordingSink>,
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl RunningServer {
    pub async fn start(config: ServerConfig) -> Self {
        let events = RecordingSink::new();
        let server = Server::bind_with_events(
            "127.0.0.1:0".parse().unwrap(),
            config,
            events.clone(),
        )
        .await
        .expect("bind server");
        let server = Arc::new(server);
        let addr = server.local_addr();

        let (stop, stopped) = oneshot::channel::<()>();
        let runner = Arc::clone(&server);
        let task = tokio::spawn(async move {
            runner
                .run_until(async {
                    let _ = stopped.await;
                })
                .await
                .expect("server loop failed");
        });

        Self {
            server,
            addr,
            events,
            stop: Some(stop),
            task: Some(task),
        }
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            task.await.expect("server task panicked");
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
