//! Entry point for `sr-over-udp`.
//!
//! Parses CLI arguments and dispatches into either **server** or **client**
//! mode.  All protocol work is delegated to the library; `main.rs` owns only
//! process setup (logging, signal handling, argument parsing) and the
//! end-of-run summary.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use sr_over_udp::{
    socket::Socket, ClientConfig, Connection, PayloadSize, Server, ServerConfig, SimulatorConfig,
};

/// Selective-repeat reliable delivery over UDP.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Accept connections and deliver units in order.
    Server {
        /// Local address to bind.
        #[arg(short, long, default_value = "0.0.0.0:5000")]
        bind: SocketAddr,
        /// Receive window, in units.
        #[arg(short, long, default_value_t = 4)]
        window: usize,
        /// Probability of withholding a reply or losing a DATA unit.
        #[arg(long, default_value_t = 0.1)]
        loss: f64,
        /// Seed for the loss simulator.
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Connect to a server and transfer a number of units.
    Client {
        /// Remote server address (e.g. 127.0.0.1:5000).
        #[arg(short, long)]
        server: SocketAddr,
        /// Local address to bind.
        #[arg(long, default_value = "0.0.0.0:0")]
        bind: SocketAddr,
        /// Number of units to send.
        #[arg(short, long, default_value_t = 30)]
        count: u32,
        /// Budget for unacknowledged bytes, headers included.
        #[arg(long, default_value_t = 400)]
        window_bytes: usize,
        /// Probability of corrupting a DATA transmission.
        #[arg(long, default_value_t = 0.3)]
        loss: f64,
        #[arg(long, default_value_t = 28)]
        payload_min: usize,
        #[arg(long, default_value_t = 68)]
        payload_max: usize,
        /// Use a constant retransmission timeout instead of the RTT estimate.
        #[arg(long)]
        fixed_rto_ms: Option<u64>,
        /// Seed for the loss simulator.
        #[arg(long)]
        seed: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.mode {
        Mode::Server {
            bind,
            window,
            loss,
            seed,
        } => {
            let config = ServerConfig::default()
                .with_window_size(window)
                .with_simulator(SimulatorConfig {
                    loss_rate: loss,
                    seed,
                });
            let server = Server::bind(bind, config)
                .await
                .with_context(|| format!("starting server on {bind}"))?;
            server
                .run_until(async {
                    if let Err(e) = tokio::signal::ctrl_c().await {
                        log::error!("waiting for Ctrl-C failed: {e}");
                    }
                })
                .await?;
        }
        Mode::Client {
            server,
            bind,
            count,
            window_bytes,
            loss,
            payload_min,
            payload_max,
            fixed_rto_ms,
            seed,
        } => {
            let payload = if payload_min == payload_max {
                PayloadSize::Fixed(payload_min)
            } else {
                PayloadSize::Random {
                    min: payload_min,
                    max: payload_max,
                }
            };
            let mut config = ClientConfig::default()
                .with_window_bytes(window_bytes)
                .with_payload(payload)
                .with_simulator(SimulatorConfig {
                    loss_rate: loss,
                    seed,
                });
            if let Some(ms) = fixed_rto_ms {
                config = config.with_fixed_rto(Duration::from_millis(ms));
            }
            run_client(bind, server, count, config).await?;
        }
    }
    Ok(())
}

async fn run_client(bind: SocketAddr, server: SocketAddr, count: u32, config: ClientConfig) -> Result<()> {
    let socket = Socket::bind(bind)
        .await
        .with_context(|| format!("binding {bind}"))?;
    let mut conn = Connection::connect(socket, server, config)
        .await
        .with_context(|| format!("connecting to {server}"))?;

    let transfer = async {
        conn.send(count).await?;
        if !conn.flush().await? {
            log::warn!("some units were still unacknowledged when the linger expired");
        }
        Ok::<_, sr_over_udp::Error>(())
    };
    let result = transfer.await;

    if let Err(e) = conn.close().await {
        log::warn!("teardown failed: {e}");
    }
    println!("{}", conn.stats().await);

    result.context("transfer failed")
}
