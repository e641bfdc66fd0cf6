//! Synthetic network impairment.
//!
//! Real networks drop and corrupt datagrams.  To exercise the reliability
//! mechanisms on loopback, both endpoints consult a [`Simulator`] at the
//! points where a unit could be lost:
//!
//! | Where                        | What a drop means                          |
//! |------------------------------|--------------------------------------------|
//! | Sender, DATA (first or re-)  | The unit goes out with a corrupted checksum |
//! | Receiver, accepted DATA      | Neither ACK nor buffering                  |
//! | Receiver, SYN / FIN reply    | The reply is silently withheld             |
//!
//! Every call is an independent uniform draw.  A seeded generator makes runs
//! reproducible, and [`Simulator::force_drop`] schedules exact drops for a
//! given sequence number regardless of the rate.

use std::collections::HashMap;
use std::sync::Mutex;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::SimulatorConfig;

/// Rate-driven fault injector.  The RNG and the forced-drop schedule each
/// sit behind their own short-lived lock, so one instance is shared freely.
#[derive(Debug)]
pub struct Simulator {
    loss_rate: f64,
    rng: Mutex<StdRng>,
    forced: Mutex<HashMap<u8, u32>>,
}

impl Simulator {
    pub fn new(config: &SimulatorConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };
        Self {
            loss_rate: config.loss_rate,
            rng: Mutex::new(rng),
            forced: Mutex::new(HashMap::new()),
        }
    }

    /// A simulator that never drops on its own.
    pub fn lossless() -> Self {
        Self::new(&SimulatorConfig::lossless())
    }

    pub fn loss_rate(&self) -> f64 {
        self.loss_rate
    }

    /// `true` with probability `loss_rate`.
    pub fn should_drop(&self) -> bool {
        if self.loss_rate <= 0.0 {
            return false;
        }
        if self.loss_rate >= 1.0 {
            return true;
        }
        let draw: f64 = match self.rng.lock() {
            Ok(mut rng) => rng.random(),
            Err(poisoned) => poisoned.into_inner().random(),
        };
        draw < self.loss_rate
    }

    /// Draw for a unit carrying `seq`.  A pending forced drop for `seq` is
    /// consumed first; otherwise this is an ordinary [`should_drop`] draw.
    ///
    /// [`should_drop`]: Simulator::should_drop
    pub fn should_drop_seq(&self, seq: u8) -> bool {
        if self.take_forced(seq) {
            return true;
        }
        self.should_drop()
    }

    /// Make the next `times` draws for `seq` signal a drop.
    pub fn force_drop(&self, seq: u8, times: u32) {
        if times == 0 {
            return;
        }
        let mut forced = match self.forced.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *forced.entry(seq).or_insert(0) += times;
    }

    fn take_forced(&self, seq: u8) -> bool {
        let mut forced = match self.forced.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match forced.get_mut(&seq) {
            Some(remaining) => {
                *remaining -= 1;
                if *remaining == 0 {
                    forced.remove(&seq);
                }
                true
            }
            None => false,
        }
    }
}

impl Default for Simulator {
    fn default() -> Self {
        Self::lossless()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded(loss_rate: f64, seed: u64) -> Simulator {
        Simulator::new(&SimulatorConfig {
            loss_rate,
            seed: Some(seed),
        })
    }

    #[test]
    fn zero_rate_never_drops() {
        let sim = seeded(0.0, 1);
        assert!((0..1000).all(|_| !sim.should_drop()));
    }

    #[test]
    fn full_rate_always_drops() {
        let sim = seeded(1.0, 1);
        assert!((0..1000).all(|_| sim.should_drop()));
    }

    #[test]
    fn rate_is_roughly_honoured() {
        let sim = seeded(0.3, 42);
        let drops = (0..10_000).filter(|_| sim.should_drop()).count();
        assert!((2_500..3_500).contains(&drops), "drops = {drops}");
    }

    #[test]
    fn same_seed_same_draws() {
        let a = seeded(0.5, 7);
        let b = seeded(0.5, 7);
        let xs: Vec<bool> = (0..64).map(|_| a.should_drop()).collect();
        let ys: Vec<bool> = (0..64).map(|_| b.should_drop()).collect();
        assert_eq!(xs, ys);
    }

    #[test]
    fn forced_drop_consumed_exactly() {
        let sim = Simulator::lossless();
        sim.force_drop(2, 1);
        assert!(!sim.should_drop_seq(1));
        assert!(sim.should_drop_seq(2));
        assert!(!sim.should_drop_seq(2));
    }

    #[test]
    fn forced_drops_accumulate() {
        let sim = Simulator::lossless();
        sim.force_drop(9, 2);
        sim.force_drop(9, 1);
        assert!(sim.should_drop_seq(9));
        assert!(sim.should_drop_seq(9));
        assert!(sim.should_drop_seq(9));
        assert!(!sim.should_drop_seq(9));
    }
}
