//! Per-unit retransmission timers.
//!
//! Every in-flight unit owns one timer: a delayed tokio task that calls back
//! into the sender when it expires.  [`RetransmitTimers`] keeps the handle
//! for each key and a **generation** number that changes every time the key
//! is re-armed.
//!
//! Aborting a tokio task is asynchronous: the task may already be past its
//! sleep and waiting for the sender's lock when the ACK that cancels it is
//! processed.  The fired task therefore has to confirm it is still the
//! current timer for its key with [`RetransmitTimers::take_fired`] before
//! doing anything.  A stale fire finds a different generation (or no entry)
//! and returns without effect.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::task::AbortHandle;

#[derive(Debug)]
struct Armed {
    generation: u64,
    handle: AbortHandle,
}

/// Set of armed timers keyed by `K` (the sender uses its logical sequence
/// index).
#[derive(Debug)]
pub struct RetransmitTimers<K> {
    armed: HashMap<K, Armed>,
    next_generation: u64,
}

impl<K: Copy + Eq + Hash> RetransmitTimers<K> {
    pub fn new() -> Self {
        Self {
            armed: HashMap::new(),
            next_generation: 0,
        }
    }

    /// Schedule `on_fire(generation)` to run after `delay`.
    ///
    /// Any timer already armed for `key` is aborted and replaced.  Must be
    /// called from within a tokio runtime.
    pub fn arm<F, Fut>(&mut self, key: K, delay: Duration, on_fire: F) -> u64
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let generation = self.next_generation;
        self.next_generation += 1;

        let fire = on_fire(generation);
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            fire.await;
        });

        let entry = Armed {
            generation,
            handle: task.abort_handle(),
        };
        if let Some(previous) = self.armed.insert(key, entry) {
            previous.handle.abort();
        }
        generation
    }

    /// Cancel the timer for `key`.  Returns `false` when nothing was armed;
    /// cancelling twice is harmless.
    pub fn cancel(&mut self, key: K) -> bool {
        match self.armed.remove(&key) {
            Some(armed) => {
                armed.handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&mut self) {
        for (_, armed) in self.armed.drain() {
            armed.handle.abort();
        }
    }

    /// Called by a fired task.  Returns `true` and forgets the entry (without
    /// aborting the caller) only when `generation` is still the one armed for
    /// `key`.
    pub fn take_fired(&mut self, key: K, generation: u64) -> bool {
        match self.armed.get(&key) {
            Some(armed) if armed.generation == generation => {
                self.armed.remove(&key);
                true
            }
            _ => false,
        }
    }

    pub fn is_armed(&self, key: K) -> bool {
        self.armed.contains_key(&key)
    }

    pub fn len(&self) -> usize {
        self.armed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.armed.is_empty()
    }
}

impl<K: Copy + Eq + Hash> Default for RetransmitTimers<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K> Drop for RetransmitTimers<K> {
    fn drop(&mut self) {
        for armed in self.armed.values() {
            armed.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn noop(_generation: u64) -> std::future::Ready<()> {
        std::future::ready(())
    }

    #[tokio::test]
    async fn armed_timer_fires() {
        let fired = Arc::new(AtomicU32::new(0));
        let fired2 = Arc::clone(&fired);
        let mut timers = RetransmitTimers::new();
        timers.arm(1u32, Duration::from_millis(10), move |_| async move {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancelled_timer_does_not_fire() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = RetransmitTimers::new();
        let fired2 = Arc::clone(&fired);
        timers.arm(7u32, Duration::from_millis(20), move |_| async move {
            fired2.fetch_add(1, Ordering::SeqCst);
        });
        assert!(timers.cancel(7));
        assert!(!timers.cancel(7), "second cancel is a no-op");
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(timers.is_empty());
    }

    #[tokio::test]
    async fn rearm_replaces_previous_generation() {
        let mut timers = RetransmitTimers::new();
        let g1 = timers.arm(3u32, Duration::from_secs(60), noop);
        let g2 = timers.arm(3u32, Duration::from_secs(60), noop);
        assert_ne!(g1, g2);
        assert_eq!(timers.len(), 1);

        // A late fire from the first generation is stale.
        assert!(!timers.take_fired(3, g1));
        assert!(timers.is_armed(3));
        assert!(timers.take_fired(3, g2));
        assert!(!timers.is_armed(3));
        timers.cancel_all();
    }

    #[tokio::test]
    async fn take_fired_after_cancel_is_stale() {
        let mut timers = RetransmitTimers::new();
        let g = timers.arm(0u32, Duration::from_secs(60), noop);
        timers.cancel(0);
        assert!(!timers.take_fired(0, g));
    }

    #[tokio::test]
    async fn cancel_all_clears_every_timer() {
        let fired = Arc::new(AtomicU32::new(0));
        let mut timers = RetransmitTimers::new();
        for key in 0u32..5 {
            let fired = Arc::clone(&fired);
            timers.arm(key, Duration::from_millis(20), move |_| async move {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }
        timers.cancel_all();
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
