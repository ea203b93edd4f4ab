/// The broker client seam: everything the poll loop needs from a consumer library.
use crate::config::ConfigError;
use std::future::Future;
use std::time::Duration;

/// A record received from the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub key: Option<String>,
    pub value: Option<String>,
    pub partition: i32,
    pub offset: i64,
}

impl Record {
    /// Build a record from borrowed key and value text.
    pub fn new(
        topic: impl Into<String>,
        key: Option<&str>,
        value: Option<&str>,
        partition: i32,
        offset: i64,
    ) -> Self {
        Self {
            topic: topic.into(),
            key: key.map(str::to_string),
            value: value.map(str::to_string),
            partition,
            offset,
        }
    }
}

/// An open subscription to the broker.
///
/// Owned exclusively by the poll loop. Interrupting a poll is done by dropping
/// its future, so implementations must leave the client usable (or at least
/// closable) when a `poll` future is dropped mid-wait.
pub trait BrokerClient: Send + 'static {
    /// Subscribe to the given topics, replacing any previous subscription.
    fn subscribe(&mut self, topics: &[String]) -> Result<(), ConfigError>;

    /// Wait up to `timeout` for records. An empty batch means the wait elapsed.
    fn poll(
        &mut self,
        timeout: Duration,
    ) -> impl Future<Output = Result<Vec<Record>, BrokerError>> + Send;

    /// Release network resources. Calling it again is a no-op.
    fn close(&mut self);
}

/// Errors a broker client can report from `poll`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker is temporarily unreachable; the next poll may succeed.
    Transient(String),
    /// The client is in a state it cannot recover from.
    Fatal(String),
}

impl BrokerError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, BrokerError::Fatal(_))
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Transient(msg) => write!(f, "transient broker error: {msg}"),
            BrokerError::Fatal(msg) => write!(f, "fatal broker error: {msg}"),
        }
    }
}

impl std::error::Error for BrokerError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_new_copies_fields() {
        let record = Record::new("first_topic", Some("k1"), Some("v1"), 0, 0);
        assert_eq!(record.topic, "first_topic");
        assert_eq!(record.key.as_deref(), Some("k1"));
        assert_eq!(record.value.as_deref(), Some("v1"));
        assert_eq!((record.partition, record.offset), (0, 0));
    }

    #[test]
    fn test_tombstone_record_has_no_value() {
        let record = Record::new("t", Some("k"), None, 3, 42);
        assert!(record.value.is_none());
    }

    #[test]
    fn test_broker_error_fatality() {
        assert!(BrokerError::Fatal("corrupt".into()).is_fatal());
        assert!(!BrokerError::Transient("down".into()).is_fatal());
    }

    #[test]
    fn test_broker_error_display() {
        let err = BrokerError::Transient("connection refused".into());
        assert_eq!(err.to_string(), "transient broker error: connection refused");
    }
}
