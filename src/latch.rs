use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Countdown latch: waiters block until `count_down` has been called `count` times.
///
/// Any number of tasks may wait, including ones that start waiting after the
/// latch has already opened. Counting below zero is ignored.
#[derive(Debug, Clone)]
pub struct CountdownLatch {
    tx: Arc<watch::Sender<usize>>,
}

/// Returned when a bounded `wait_timeout` expires with units still outstanding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LatchTimeout {
    pub remaining: usize,
}

impl CountdownLatch {
    /// A latch that opens after `count` calls to `count_down`. Zero starts open.
    pub fn new(count: usize) -> Self {
        let (tx, _rx) = watch::channel(count);
        Self { tx: Arc::new(tx) }
    }

    /// Release one unit. Returns `true` if this call opened the latch.
    pub fn count_down(&self) -> bool {
        let mut opened = false;
        self.tx.send_if_modified(|n| {
            if *n == 0 {
                return false;
            }
            *n -= 1;
            opened = *n == 0;
            true
        });
        opened
    }

    /// Units still outstanding.
    pub fn count(&self) -> usize {
        *self.tx.borrow()
    }

    /// True once every unit has been released.
    pub fn is_open(&self) -> bool {
        self.count() == 0
    }

    /// Wait until the latch opens. Returns at once if it already has.
    pub async fn wait(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this cannot fail.
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Like `wait`, but gives up after `timeout` and reports what is still outstanding.
    pub async fn wait_timeout(&self, timeout: Duration) -> Result<(), LatchTimeout> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .map_err(|_| LatchTimeout {
                remaining: self.count(),
            })
    }
}
