/// Record handlers: the caller-supplied processing the poll loop dispatches to.
use crate::client::Record;

/// Processes one record at a time, in the order the broker returned them.
pub trait RecordHandler: Send + 'static {
    fn handle(&mut self, record: &Record) -> Result<(), HandlerError>;
}

impl<F> RecordHandler for F
where
    F: FnMut(&Record) -> Result<(), HandlerError> + Send + 'static,
{
    fn handle(&mut self, record: &Record) -> Result<(), HandlerError> {
        self(record)
    }
}

/// Error raised by record processing.
///
/// Only errors built with [`HandlerError::fatal`] stop the poll loop, unless
/// the consumer is configured to abort on every handler error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerError {
    message: String,
    fatal: bool,
}

impl HandlerError {
    pub fn recoverable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: false,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            fatal: true,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for HandlerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.fatal {
            write!(f, "fatal handler error: {}", self.message)
        } else {
            write!(f, "handler error: {}", self.message)
        }
    }
}

impl std::error::Error for HandlerError {}

/// Logs every record it sees.
#[derive(Debug, Default)]
pub struct LogHandler {
    seen: u64,
}

impl LogHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seen(&self) -> u64 {
        self.seen
    }
}

impl RecordHandler for LogHandler {
    fn handle(&mut self, record: &Record) -> Result<(), HandlerError> {
        self.seen += 1;
        tracing::info!(
            topic = %record.topic,
            key = record.key.as_deref().unwrap_or("<none>"),
            value = record.value.as_deref().unwrap_or("<none>"),
            partition = record.partition,
            offset = record.offset,
            "record received"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_closure_handler() {
        let keys = Arc::new(Mutex::new(Vec::new()));
        let mut handler = {
            let keys = Arc::clone(&keys);
            move |record: &Record| -> Result<(), HandlerError> {
                keys.lock().unwrap().push(record.key.clone());
                Ok(())
            }
        };
        RecordHandler::handle(&mut handler, &Record::new("t", Some("k1"), Some("v1"), 0, 0))
            .unwrap();
        RecordHandler::handle(&mut handler, &Record::new("t", None, Some("v2"), 0, 1)).unwrap();
        assert_eq!(*keys.lock().unwrap(), vec![Some("k1".to_string()), None]);
    }

    #[test]
    fn test_log_handler_counts_records() {
        let mut handler = LogHandler::new();
        for offset in 0..3 {
            handler
                .handle(&Record::new("t", None, None, 0, offset))
                .unwrap();
        }
        assert_eq!(handler.seen(), 3);
    }

    #[test]
    fn test_handler_error_kinds() {
        let soft = HandlerError::recoverable("bad payload");
        let hard = HandlerError::fatal("database gone");
        assert!(!soft.is_fatal());
        assert!(hard.is_fatal());
        assert_eq!(soft.message(), "bad payload");
        assert_eq!(hard.to_string(), "fatal handler error: database gone");
    }
}
