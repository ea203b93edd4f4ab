//! Scripted in-memory broker client for tests.
use crate::client::{BrokerClient, BrokerError, Record};
use crate::config::ConfigError;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// What the next `poll` call does.
#[derive(Debug, Clone)]
pub(crate) enum Step {
    /// Return these records immediately.
    Records(Vec<Record>),
    /// Wait out the full timeout and return an empty batch.
    Idle,
    Transient(&'static str),
    Fatal(&'static str),
}

#[derive(Debug, Default)]
pub(crate) struct MockStats {
    pub polls: AtomicUsize,
    pub closes: AtomicUsize,
    pub subscribed: Mutex<Vec<String>>,
}

impl MockStats {
    pub fn polls(&self) -> usize {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Plays back `script` one step per poll, then idles forever.
pub(crate) struct MockClient {
    script: VecDeque<Step>,
    stats: Arc<MockStats>,
    reject_subscribe: bool,
}

impl MockClient {
    pub fn new(script: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: script.into_iter().collect(),
            stats: Arc::new(MockStats::default()),
            reject_subscribe: false,
        }
    }

    pub fn idle() -> Self {
        Self::new([])
    }

    pub fn rejecting_subscribe(mut self) -> Self {
        self.reject_subscribe = true;
        self
    }

    pub fn stats(&self) -> Arc<MockStats> {
        Arc::clone(&self.stats)
    }
}

impl BrokerClient for MockClient {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), ConfigError> {
        if self.reject_subscribe {
            return Err(ConfigError::Client(format!("unknown topics {topics:?}")));
        }
        *self.stats.subscribed.lock().unwrap() = topics.to_vec();
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>, BrokerError> {
        self.stats.polls.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front().unwrap_or(Step::Idle) {
            Step::Records(records) => Ok(records),
            Step::Idle => {
                tokio::time::sleep(timeout).await;
                Ok(Vec::new())
            }
            Step::Transient(msg) => Err(BrokerError::Transient(msg.to_string())),
            Step::Fatal(msg) => Err(BrokerError::Fatal(msg.to_string())),
        }
    }

    fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}
