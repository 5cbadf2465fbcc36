//! A broadcast shutdown signal. The server clones one handle per session
//! task; any handle can trip it, and every waiter observes it even when it
//! fired before the wait began.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A struct which can be used to shut down the process's sessions.
/// You can create multiple connected handles by cloning.
#[derive(Debug, Clone)]
pub struct Shutdown {
    /// Set once, never cleared.
    tripped: Arc<AtomicBool>,
    /// This channel is sent on when the signal trips.
    notify: broadcast::Sender<()>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (notify, _) = broadcast::channel(1);
        Self {
            tripped: Arc::new(AtomicBool::new(false)),
            notify,
        }
    }

    /// Signals every handle cloned from this one.
    pub fn shut_down(&self) {
        self.tripped.store(true, Ordering::Release);
        let _ = self.notify.send(());
    }

    pub fn is_shut_down(&self) -> bool {
        self.tripped.load(Ordering::Acquire)
    }

    /// Suspends until the signal trips. Returns immediately if it already
    /// has.
    pub async fn wait(&self) {
        let mut receiver = self.notify.subscribe();
        loop {
            if self.is_shut_down() {
                return;
            }
            // A lagged receiver only means we missed duplicate signals.
            let _ = receiver.recv().await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn all_handles_observe_the_signal() {
        let shutdown = Shutdown::new();
        let handles = [shutdown.clone(), shutdown.clone(), shutdown.clone()];

        shutdown.shut_down();

        for handle in handles {
            handle.wait().await;
            assert!(handle.is_shut_down());
        }
    }

    #[tokio::test]
    async fn waiters_started_before_the_signal_wake_up() {
        let shutdown = Shutdown::new();
        let waiter = {
            let shutdown = shutdown.clone();
            tokio::spawn(async move { shutdown.wait().await })
        };
        tokio::task::yield_now().await;
        shutdown.shut_down();
        waiter.await.unwrap();
    }
}
