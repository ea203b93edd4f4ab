/// Kafka-backed broker client built on rdkafka's `StreamConsumer`.
use crate::client::{BrokerClient, BrokerError, Record};
use crate::config::{ConfigError, ConsumerConfig};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{BorrowedMessage, Message};
use std::time::Duration;

pub struct KafkaClient {
    consumer: Option<StreamConsumer>,
    max_poll_records: usize,
    /// Error read while draining a batch, reported by the next `poll`.
    pending_error: Option<BrokerError>,
}

impl KafkaClient {
    /// Create the consumer. No broker traffic happens until `subscribe`.
    pub fn connect(config: &ConsumerConfig) -> Result<Self, ConfigError> {
        let mut client_config = ClientConfig::new();
        client_config
            .set("bootstrap.servers", config.bootstrap_servers.join(","))
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", config.auto_offset_reset.as_str())
            .set("enable.partition.eof", "false");

        if let Some(client_id) = &config.client_id {
            client_config.set("client.id", client_id);
        }
        for (key, value) in &config.extra {
            client_config.set(key, value);
        }

        let consumer: StreamConsumer = client_config
            .create()
            .map_err(|e| ConfigError::Client(e.to_string()))?;

        Ok(Self {
            consumer: Some(consumer),
            max_poll_records: config.max_poll_records,
            pending_error: None,
        })
    }
}

impl BrokerClient for KafkaClient {
    fn subscribe(&mut self, topics: &[String]) -> Result<(), ConfigError> {
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| ConfigError::Client("consumer already closed".to_string()))?;
        let topics: Vec<&str> = topics.iter().map(String::as_str).collect();
        consumer
            .subscribe(&topics)
            .map_err(|e| ConfigError::Client(format!("failed to subscribe to {topics:?}: {e}")))
    }

    async fn poll(&mut self, timeout: Duration) -> Result<Vec<Record>, BrokerError> {
        if let Some(e) = self.pending_error.take() {
            return Err(e);
        }
        let consumer = self
            .consumer
            .as_ref()
            .ok_or_else(|| BrokerError::Fatal("consumer already closed".to_string()))?;

        let mut batch = Batch::new(self.max_poll_records);
        let first = match tokio::time::timeout(timeout, consumer.recv()).await {
            Err(_) => return Ok(Vec::new()),
            Ok(result) => result.map(|message| to_record(&message)).map_err(classify),
        };

        // Drain whatever is already buffered without waiting again
        let mut more = batch.offer(first);
        while more {
            match tokio::time::timeout(Duration::ZERO, consumer.recv()).await {
                Ok(result) => {
                    more = batch.offer(result.map(|message| to_record(&message)).map_err(classify))
                }
                Err(_) => break,
            }
        }

        let (result, pending) = batch.finish();
        if let Some(e) = &pending {
            tracing::warn!(error = %e, "error behind buffered messages, reporting it on the next poll");
        }
        self.pending_error = pending;
        result
    }

    fn close(&mut self) {
        if let Some(consumer) = self.consumer.take() {
            consumer.unsubscribe();
            tracing::debug!("kafka consumer unsubscribed and dropped");
        }
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> Record {
    Record {
        topic: message.topic().to_string(),
        key: message
            .key()
            .map(|k| String::from_utf8_lossy(k).into_owned()),
        value: message
            .payload()
            .map(|v| String::from_utf8_lossy(v).into_owned()),
        partition: message.partition(),
        offset: message.offset(),
    }
}

/// Records collected by one `poll`, stopping at the size limit or the first
/// error. An error that follows records is held back so the records that were
/// already taken off the queue still reach the handler.
struct Batch {
    records: Vec<Record>,
    limit: usize,
    error: Option<BrokerError>,
}

impl Batch {
    fn new(limit: usize) -> Self {
        Self {
            records: Vec::new(),
            limit: limit.max(1),
            error: None,
        }
    }

    /// Add one receive result. Returns false once collection should stop.
    fn offer(&mut self, item: Result<Record, BrokerError>) -> bool {
        match item {
            Ok(record) => {
                self.records.push(record);
                self.records.len() < self.limit
            }
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }

    /// The result for this poll, plus any error to report on the next one.
    fn finish(self) -> (Result<Vec<Record>, BrokerError>, Option<BrokerError>) {
        match self.error {
            Some(e) if self.records.is_empty() => (Err(e), None),
            error => (Ok(self.records), error),
        }
    }
}

/// Consumer-state failures and rejected credentials cannot be retried away;
/// everything else (transport, broker down, rebalances) can.
fn classify(e: KafkaError) -> BrokerError {
    let fatal = match &e {
        KafkaError::MessageConsumptionFatal(_) => true,
        KafkaError::Global(RDKafkaErrorCode::Authentication) => true,
        other => other.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal),
    };
    if fatal {
        BrokerError::Fatal(e.to_string())
    } else {
        BrokerError::Transient(e.to_string())
    }
}
