/// Bridges termination requests to the poll loop and holds process exit
/// until the consumer has been closed.
use crate::latch::CountdownLatch;
use crate::poll_loop::{PollLoopHandle, ShutdownHandle};
use crate::signals::SignalHandler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

pub struct ShutdownCoordinator {
    trigger: ShutdownHandle,
    completion: CountdownLatch,
    drain_timeout: Option<Duration>,
    fired: AtomicBool,
}

impl ShutdownCoordinator {
    /// `drain_timeout` of `None` waits for cleanup however long it takes.
    pub fn new(poll_loop: &PollLoopHandle, drain_timeout: Option<Duration>) -> Self {
        Self {
            trigger: poll_loop.shutdown_handle(),
            completion: poll_loop.completion(),
            drain_timeout,
            fired: AtomicBool::new(false),
        }
    }

    /// Interrupt the poll loop and wait for it to close the consumer.
    ///
    /// Only the first call does anything; later calls return `Ok` at once.
    pub async fn on_termination_requested(&self) -> Result<(), ShutdownError> {
        if self.fired.swap(true, Ordering::SeqCst) {
            tracing::debug!("termination already requested");
            return Ok(());
        }

        self.trigger.request_shutdown();

        match self.drain_timeout {
            None => self.completion.wait().await,
            Some(timeout) => {
                if let Err(e) = self.completion.wait_timeout(timeout).await {
                    tracing::error!(
                        timeout_secs = timeout.as_secs(),
                        outstanding = e.remaining,
                        "consumer did not close before the drain deadline"
                    );
                    return Err(ShutdownError::DeadlineExceeded { timeout });
                }
            }
        }

        tracing::info!("consumer drained, shutdown complete");
        Ok(())
    }

    /// Block until the poll loop has closed the consumer, for whatever reason.
    pub async fn main_wait(&self) {
        self.completion.wait().await;
        tracing::info!("consumer closed, application exiting");
    }

    /// Spawn the hook that turns the first termination trigger into a shutdown.
    ///
    /// Triggers arriving while the shutdown is in progress are logged and ignored.
    pub fn install(self: Arc<Self>, mut signals: SignalHandler) -> JoinHandle<Result<(), ShutdownError>> {
        tokio::spawn(async move {
            let cause = signals.recv().await;
            tracing::info!(%cause, "caught termination request");

            let shutdown = self.on_termination_requested();
            tokio::pin!(shutdown);
            loop {
                tokio::select! {
                    result = &mut shutdown => return result,
                    cause = signals.recv() => {
                        tracing::warn!(%cause, "shutdown already in progress, ignoring");
                    }
                }
            }
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
    /// The poll loop did not close the consumer within the drain timeout.
    DeadlineExceeded { timeout: Duration },
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::DeadlineExceeded { timeout } => write!(
                f,
                "consumer did not shut down within {}s",
                timeout.as_secs_f64()
            ),
        }
    }
}

impl std::error::Error for ShutdownError {}
