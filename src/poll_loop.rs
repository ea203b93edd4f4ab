/// The background poll loop.
///
/// Owns the broker client, polls it with a bounded timeout on its own task,
/// dispatches records to a handler and, however it ends, closes the client
/// exactly once before releasing the completion latch.
use crate::client::{BrokerClient, BrokerError, Record};
use crate::config::{ConfigError, Settings};
use crate::handler::{HandlerError, RecordHandler};
use crate::latch::CountdownLatch;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::retry::{RetryDecision, RetryPolicy};
use std::time::Duration;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

/// Result of a single interruptible poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The poll completed; empty when the wait elapsed without records.
    Records(Vec<Record>),
    /// A shutdown request preempted the poll.
    Interrupted,
}

/// Why the loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopExit {
    Interrupted,
    Fatal(BrokerError),
    HandlerAborted(HandlerError),
}

impl LoopExit {
    pub fn is_clean(&self) -> bool {
        matches!(self, LoopExit::Interrupted)
    }

    /// Process exit status for this outcome.
    pub fn exit_code(&self) -> u8 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

impl std::fmt::Display for LoopExit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LoopExit::Interrupted => write!(f, "interrupted by shutdown request"),
            LoopExit::Fatal(e) => write!(f, "{e}"),
            LoopExit::HandlerAborted(e) => write!(f, "{e}"),
        }
    }
}

/// Counters accumulated over the life of the loop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub polls: u64,
    pub records: u64,
    pub handler_errors: u64,
    pub transient_errors: u64,
}

/// How a poll loop ended and what it did on the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub exit: LoopExit,
    pub stats: LoopStats,
}

/// Race one bounded poll against the cancellation token.
///
/// Cancellation wins ties and preempts a poll that is already waiting: the
/// poll future is dropped and `Interrupted` returned.
pub async fn poll_interruptible<C: BrokerClient>(
    client: &mut C,
    cancel: &CancellationToken,
    timeout: Duration,
) -> Result<PollOutcome, BrokerError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Ok(PollOutcome::Interrupted),
        result = client.poll(timeout) => result.map(PollOutcome::Records),
    }
}

/// Cloneable trigger that asks a poll loop to stop.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    cancel: CancellationToken,
    lifecycle: Lifecycle,
}

impl ShutdownHandle {
    /// Ask the loop to stop. Safe from any thread; repeat calls are no-ops.
    pub fn request_shutdown(&self) {
        if self.lifecycle.advance(LifecycleState::ShutdownRequested) {
            tracing::info!("shutdown requested, interrupting poll");
        } else {
            tracing::debug!(state = %self.lifecycle.state(), "shutdown already underway");
        }
        self.cancel.cancel();
    }

    pub fn is_requested(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

/// Handle to a running poll loop.
pub struct PollLoopHandle {
    shutdown: ShutdownHandle,
    completion: CountdownLatch,
    lifecycle: Lifecycle,
    task: JoinHandle<LoopReport>,
}

impl PollLoopHandle {
    /// Ask the loop to stop; same as `ShutdownHandle::request_shutdown`.
    pub fn request_shutdown(&self) {
        self.shutdown.request_shutdown();
    }

    /// A cloneable trigger for other tasks.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Opens once the client has been closed.
    pub fn completion(&self) -> CountdownLatch {
        self.completion.clone()
    }

    /// Observe the loop's lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the loop task and collect its report.
    ///
    /// Fails only if the task panicked or was aborted; the client has been
    /// closed either way.
    pub async fn join(self) -> Result<LoopReport, JoinError> {
        self.task.await
    }
}

/// A configured, subscribed poll loop that has not been spawned yet.
pub struct PollLoop<C, H> {
    client: C,
    handler: H,
    poll_timeout: Duration,
    abort_on_handler_error: bool,
    retry: RetryPolicy,
    cancel: CancellationToken,
    completion: CountdownLatch,
    lifecycle: Lifecycle,
}

impl<C: BrokerClient, H: RecordHandler> PollLoop<C, H> {
    /// Validate settings and subscribe. Nothing is polled until `spawn`.
    ///
    /// On failure the client is closed before the error is returned.
    pub fn new(settings: &Settings, mut client: C, handler: H) -> Result<Self, ConfigError> {
        settings.validate()?;

        let consumer = &settings.consumer;
        if let Err(e) = client.subscribe(&consumer.topics) {
            client.close();
            return Err(e);
        }
        tracing::info!(
            topics = ?consumer.topics,
            group_id = %consumer.group_id,
            offset_reset = consumer.auto_offset_reset.as_str(),
            "subscribed"
        );

        Ok(Self {
            client,
            handler,
            poll_timeout: consumer.poll_timeout(),
            abort_on_handler_error: consumer.abort_on_handler_error,
            retry: RetryPolicy::new(&settings.retry),
            cancel: CancellationToken::new(),
            completion: CountdownLatch::new(1),
            lifecycle: Lifecycle::new(),
        })
    }

    /// Validate, subscribe and spawn in one step.
    pub fn start(settings: &Settings, client: C, handler: H) -> Result<PollLoopHandle, ConfigError> {
        Ok(Self::new(settings, client, handler)?.spawn())
    }

    /// A trigger usable before the loop is spawned.
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            cancel: self.cancel.clone(),
            lifecycle: self.lifecycle.clone(),
        }
    }

    /// Hand the loop to a tokio task and return its handle.
    pub fn spawn(self) -> PollLoopHandle {
        let shutdown = self.shutdown_handle();
        let completion = self.completion.clone();
        let lifecycle = self.lifecycle.clone();
        let task = tokio::spawn(self.run());
        PollLoopHandle {
            shutdown,
            completion,
            lifecycle,
            task,
        }
    }

    async fn run(self) -> LoopReport {
        let PollLoop {
            client,
            mut handler,
            poll_timeout,
            abort_on_handler_error,
            mut retry,
            cancel,
            completion,
            lifecycle,
        } = self;

        let mut closer = Closer {
            client,
            closed: false,
            completion,
            lifecycle,
        };
        let mut stats = LoopStats::default();

        tracing::info!(
            poll_timeout_ms = poll_timeout.as_millis() as u64,
            "poll loop started"
        );

        let exit = 'poll: loop {
            let outcome = poll_interruptible(&mut closer.client, &cancel, poll_timeout).await;
            let records = match outcome {
                Ok(PollOutcome::Interrupted) => {
                    tracing::info!("poll interrupted by shutdown request");
                    break 'poll LoopExit::Interrupted;
                }
                Ok(PollOutcome::Records(records)) => {
                    stats.polls += 1;
                    retry.reset();
                    records
                }
                Err(e) if e.is_fatal() => {
                    stats.polls += 1;
                    if cancel.is_cancelled() {
                        tracing::warn!(error = %e, "broker failed after shutdown was requested");
                        break 'poll LoopExit::Interrupted;
                    }
                    tracing::error!(error = %e, "fatal broker error, stopping consumer");
                    break 'poll LoopExit::Fatal(e);
                }
                Err(e) => {
                    stats.polls += 1;
                    stats.transient_errors += 1;
                    match retry.evaluate() {
                        RetryDecision::Retry { attempt, delay } => {
                            tracing::warn!(
                                error = %e,
                                attempt,
                                delay_ms = delay.as_millis() as u64,
                                "transient broker error, retrying"
                            );
                            let interrupted = tokio::select! {
                                biased;
                                _ = cancel.cancelled() => true,
                                _ = tokio::time::sleep(delay) => false,
                            };
                            if interrupted {
                                tracing::info!("backoff interrupted by shutdown request");
                                break 'poll LoopExit::Interrupted;
                            }
                        }
                        RetryDecision::GiveUp { attempts } => {
                            tracing::error!(error = %e, attempts, "transient errors exhausted, stopping consumer");
                            break 'poll LoopExit::Fatal(BrokerError::Fatal(format!(
                                "gave up after {attempts} consecutive errors: {e}"
                            )));
                        }
                    }
                    continue;
                }
            };

            if !records.is_empty() {
                tracing::debug!(count = records.len(), "dispatching records");
            }
            for record in &records {
                stats.records += 1;
                if let Err(e) = handler.handle(record) {
                    stats.handler_errors += 1;
                    if e.is_fatal() || abort_on_handler_error {
                        if cancel.is_cancelled() {
                            tracing::warn!(
                                error = %e,
                                offset = record.offset,
                                "handler failed after shutdown was requested"
                            );
                            break 'poll LoopExit::Interrupted;
                        }
                        tracing::error!(
                            error = %e,
                            topic = %record.topic,
                            partition = record.partition,
                            offset = record.offset,
                            "handler failed, stopping consumer"
                        );
                        break 'poll LoopExit::HandlerAborted(e);
                    }
                    tracing::warn!(
                        error = %e,
                        topic = %record.topic,
                        partition = record.partition,
                        offset = record.offset,
                        "handler failed, skipping record"
                    );
                }
            }
        };

        closer.close();
        tracing::info!(
            exit = %exit,
            polls = stats.polls,
            records = stats.records,
            handler_errors = stats.handler_errors,
            transient_errors = stats.transient_errors,
            "poll loop finished"
        );
        LoopReport { exit, stats }
    }
}

/// Runs the close-then-release sequence once, including on panic or abort.
struct Closer<C: BrokerClient> {
    client: C,
    closed: bool,
    completion: CountdownLatch,
    lifecycle: Lifecycle,
}

impl<C: BrokerClient> Closer<C> {
    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        self.lifecycle.advance(LifecycleState::Draining);
        self.client.close();
        // Closed must be visible before any waiter wakes on the latch.
        self.lifecycle.advance(LifecycleState::Closed);
        self.completion.count_down();
    }
}

impl<C: BrokerClient> Drop for Closer<C> {
    fn drop(&mut self) {
        if !self.closed {
            tracing::warn!("poll loop ended abnormally, closing consumer");
            self.close();
        }
    }
}
