//! Configuration for both endpoints.
//!
//! Defaults reproduce the reference setup: a 400-byte send budget with
//! 28–68 byte payloads and 30% sender-side impairment on the client; a
//! four-unit receive window with 10% impairment on the server; a 300 ms
//! receive timeout everywhere.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::packet::HEADER_LEN;

/// Largest datagram either side will read.
pub const MAX_DATAGRAM: usize = 1024;

/// Receive windows are capped at half the 8-bit sequence space so that
/// wrapped sequence numbers stay unambiguous.
pub const MAX_RECEIVE_WINDOW: usize = 128;

/// Fixed per-call receive timeout.
pub const RECV_TIMEOUT: Duration = Duration::from_millis(300);

/// Fault model shared by both endpoints.
#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    /// Probability in `[0.0, 1.0]` that a single draw signals a drop.
    pub loss_rate: f64,
    /// Seed for reproducible draws; `None` seeds from the OS.
    pub seed: Option<u64>,
}

impl SimulatorConfig {
    pub fn lossless() -> Self {
        Self {
            loss_rate: 0.0,
            seed: None,
        }
    }

    pub fn with_loss_rate(loss_rate: f64) -> Self {
        Self {
            loss_rate,
            seed: None,
        }
    }

    fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.loss_rate) {
            return Err(Error::config(format!(
                "loss rate {} not in [0, 1]",
                self.loss_rate
            )));
        }
        Ok(())
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::lossless()
    }
}

/// Retransmission-timeout parameters.
#[derive(Debug, Clone)]
pub struct RtoConfig {
    /// Timeout used before any RTT sample exists.
    pub initial: Duration,
    /// Upper bound on the estimated timeout.
    pub ceiling: Duration,
    /// Number of recent RTT samples the estimate averages over.
    pub history: usize,
    /// When set, every timer uses this value and samples are only recorded.
    pub fixed: Option<Duration>,
}

impl Default for RtoConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_millis(300),
            ceiling: Duration::from_millis(300),
            history: 1024,
            fixed: None,
        }
    }
}

/// How large each DATA payload is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadSize {
    Fixed(usize),
    /// Uniform draw in `min..=max` per unit.
    Random { min: usize, max: usize },
}

impl PayloadSize {
    pub fn max(&self) -> usize {
        match *self {
            Self::Fixed(n) => n,
            Self::Random { max, .. } => max,
        }
    }
}

impl Default for PayloadSize {
    fn default() -> Self {
        Self::Random { min: 28, max: 68 }
    }
}

/// Initiator (client) settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Budget for unacknowledged bytes in flight, headers included.
    pub window_bytes: usize,
    pub payload: PayloadSize,
    pub simulator: SimulatorConfig,
    pub recv_timeout: Duration,
    pub max_handshake_attempts: u32,
    pub rto: RtoConfig,
    /// How long `flush` keeps waiting for outstanding acknowledgments.
    pub linger: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            window_bytes: 400,
            payload: PayloadSize::default(),
            simulator: SimulatorConfig::with_loss_rate(0.3),
            recv_timeout: RECV_TIMEOUT,
            max_handshake_attempts: 5,
            rto: RtoConfig::default(),
            linger: Duration::from_secs(3),
        }
    }
}

impl ClientConfig {
    pub fn with_window_bytes(mut self, window_bytes: usize) -> Self {
        self.window_bytes = window_bytes;
        self
    }

    pub fn with_payload(mut self, payload: PayloadSize) -> Self {
        self.payload = payload;
        self
    }

    pub fn with_simulator(mut self, simulator: SimulatorConfig) -> Self {
        self.simulator = simulator;
        self
    }

    pub fn with_fixed_rto(mut self, rto: Duration) -> Self {
        self.rto.fixed = Some(rto);
        self
    }

    pub fn with_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.simulator.validate()?;

        match self.payload {
            PayloadSize::Fixed(_) => {}
            PayloadSize::Random { min, max } if min <= max => {}
            PayloadSize::Random { min, max } => {
                return Err(Error::config(format!(
                    "payload range {min}..={max} is empty"
                )));
            }
        }
        let largest_unit = HEADER_LEN + self.payload.max();
        if largest_unit > MAX_DATAGRAM {
            return Err(Error::config(format!(
                "unit of {largest_unit} bytes exceeds the {MAX_DATAGRAM}-byte datagram limit"
            )));
        }
        if self.window_bytes < largest_unit {
            return Err(Error::config(format!(
                "window of {} bytes cannot hold a {largest_unit}-byte unit",
                self.window_bytes
            )));
        }
        if self.recv_timeout.is_zero() {
            return Err(Error::config("receive timeout must be non-zero"));
        }
        if self.max_handshake_attempts == 0 {
            return Err(Error::config("at least one handshake attempt is required"));
        }
        if self.rto.history == 0 {
            return Err(Error::config("RTT history must hold at least one sample"));
        }
        if self.rto.initial.is_zero() || self.rto.fixed.is_some_and(|d| d.is_zero()) {
            return Err(Error::config("retransmission timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Responder (server) settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Receive window, in units.
    pub window_size: usize,
    pub simulator: SimulatorConfig,
    pub recv_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            window_size: 4,
            simulator: SimulatorConfig::with_loss_rate(0.1),
            recv_timeout: RECV_TIMEOUT,
        }
    }
}

impl ServerConfig {
    pub fn with_window_size(mut self, window_size: usize) -> Self {
        self.window_size = window_size;
        self
    }

    pub fn with_simulator(mut self, simulator: SimulatorConfig) -> Self {
        self.simulator = simulator;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.simulator.validate()?;
        if self.window_size == 0 || self.window_size > MAX_RECEIVE_WINDOW {
            return Err(Error::config(format!(
                "receive window {} not in 1..={MAX_RECEIVE_WINDOW}",
                self.window_size
            )));
        }
        if self.recv_timeout.is_zero() {
            return Err(Error::config("receive timeout must be non-zero"));
        }
        Ok(())
    }
}
