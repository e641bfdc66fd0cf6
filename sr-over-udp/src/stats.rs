//! Read-only transfer statistics for end-of-run reporting.
//!
//! Nothing in here feeds back into protocol decisions.

use std::fmt;
use std::time::Duration;

/// Running min / max / mean / variance over every RTT sample, in constant
/// memory (Welford's algorithm).
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RttSummary {
    count: u64,
    min_ms: f64,
    max_ms: f64,
    mean_ms: f64,
    m2: f64,
}

impl RttSummary {
    pub fn record(&mut self, rtt: Duration) {
        let x = rtt.as_nanos() as f64 / 1e6;
        if self.count == 0 {
            self.min_ms = x;
            self.max_ms = x;
        } else {
            self.min_ms = self.min_ms.min(x);
            self.max_ms = self.max_ms.max(x);
        }
        self.count += 1;
        let delta = x - self.mean_ms;
        self.mean_ms += delta / self.count as f64;
        self.m2 += delta * (x - self.mean_ms);
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min_ms(&self) -> Option<f64> {
        (self.count > 0).then_some(self.min_ms)
    }

    pub fn max_ms(&self) -> Option<f64> {
        (self.count > 0).then_some(self.max_ms)
    }

    pub fn mean_ms(&self) -> Option<f64> {
        (self.count > 0).then_some(self.mean_ms)
    }

    /// Sample standard deviation; needs at least two samples.
    pub fn stddev_ms(&self) -> Option<f64> {
        (self.count > 1).then(|| (self.m2 / (self.count - 1) as f64).sqrt())
    }
}

/// Snapshot of the sender's counters.
#[derive(Debug, Clone, Default)]
pub struct SenderStats {
    /// Every DATA transmission, retransmissions and impaired sends included.
    pub total_packets_sent: u64,
    pub retransmission_count: u64,
    /// Distinct sequence numbers acknowledged.
    pub acks_received: u64,
    /// Payload bytes handed to the wire on first transmission.
    pub payload_bytes_sent: u64,
    pub rtt: RttSummary,
    /// The estimator's recent sample window, oldest first.
    pub rtt_sample_history: Vec<Duration>,
}

impl SenderStats {
    /// `retransmissions / total_packets_sent`, or `None` before any send.
    pub fn loss_ratio(&self) -> Option<f64> {
        (self.total_packets_sent > 0)
            .then(|| self.retransmission_count as f64 / self.total_packets_sent as f64)
    }
}

impl fmt::Display for SenderStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "total packets sent: {}", self.total_packets_sent)?;
        writeln!(f, "retransmissions:    {}", self.retransmission_count)?;
        writeln!(f, "acknowledged:       {}", self.acks_received)?;
        if let Some(ratio) = self.loss_ratio() {
            writeln!(f, "loss ratio:         {:.2}%", ratio * 100.0)?;
        }
        match (self.rtt.min_ms(), self.rtt.max_ms(), self.rtt.mean_ms()) {
            (Some(min), Some(max), Some(mean)) => {
                writeln!(f, "max RTT:            {max:.3} ms")?;
                writeln!(f, "min RTT:            {min:.3} ms")?;
                writeln!(f, "mean RTT:           {mean:.3} ms")?;
                match self.rtt.stddev_ms() {
                    Some(sd) => write!(f, "RTT stddev:         {sd:.3} ms"),
                    None => write!(f, "RTT stddev:         n/a"),
                }
            }
            _ => write!(f, "no RTT samples"),
        }
    }
}
