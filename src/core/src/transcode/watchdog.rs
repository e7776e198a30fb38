//! Per-session inactivity timer.
//!
//! At most one firing is pending at any time. Every `arm`/`disarm` bumps a
//! generation counter, so a firing that already left its sleep when fresh
//! activity arrived can recognise itself as stale.

use std::future::Future;
use std::time::Duration;

use tokio::task::JoinHandle;

pub struct Watchdog {
    timeout: Duration,
    generation: u64,
    pending: Option<JoinHandle<()>>,
}

impl Watchdog {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            generation: 0,
            pending: None,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn is_armed(&self) -> bool {
        self.pending.is_some()
    }

    /// Replaces any pending firing with a new one that runs `on_fire` after
    /// the full timeout. `on_fire` receives the generation it was armed with.
    pub fn arm<F, Fut>(&mut self, on_fire: F)
    where
        F: FnOnce(u64) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.disarm();
        let generation = self.generation;
        let timeout = self.timeout;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            on_fire(generation).await;
        }));
    }

    /// Cancels the pending firing, if any.
    pub fn disarm(&mut self) {
        self.generation = self.generation.wrapping_add(1);
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }

    /// Called from inside a firing. Returns true and releases the pending
    /// handle (without aborting the running task) when `generation` is still
    /// current; returns false for a stale firing.
    pub fn claim_firing(&mut self, generation: u64) -> bool {
        if self.pending.is_none() || generation != self.generation {
            return false;
        }
        self.generation = self.generation.wrapping_add(1);
        self.pending = None;
        true
    }
}

impl Drop for Watchdog {
    fn drop(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counter_callback(
        fired: &Arc<AtomicUsize>,
    ) -> impl FnOnce(u64) -> std::future::Ready<()> + Send + 'static {
        let fired = Arc::clone(fired);
        move |_| {
            fired.fetch_add(1, Ordering::SeqCst);
            std::future::ready(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_timeout() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut watchdog = Watchdog::new(Duration::from_secs(5));
        watchdog.arm(counter_callback(&fired));
        assert!(watchdog.is_armed());

        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(2)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn rearming_replaces_the_pending_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut watchdog = Watchdog::new(Duration::from_secs(5));
        watchdog.arm(counter_callback(&fired));

        tokio::time::sleep(Duration::from_secs(3)).await;
        watchdog.arm(counter_callback(&fired));

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn disarm_cancels_the_firing() {
        let fired = Arc::new(AtomicUsize::new(0));
        let mut watchdog = Watchdog::new(Duration::from_secs(1));
        watchdog.arm(counter_callback(&fired));
        watchdog.disarm();
        assert!(!watchdog.is_armed());

        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn stale_generation_is_not_claimed() {
        let mut watchdog = Watchdog::new(Duration::from_secs(60));
        watchdog.arm(|_| std::future::ready(()));
        let stale = watchdog.generation;
        watchdog.arm(|_| std::future::ready(()));
        let current = watchdog.generation;

        assert!(!watchdog.claim_firing(stale));
        assert!(watchdog.claim_firing(current));
        assert!(!watchdog.is_armed());
        assert!(!watchdog.claim_firing(current));
    }
}
