use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration loaded from consumer.toml.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
#[derive(Default)]
pub struct Settings {
    pub consumer: ConsumerConfig,
    pub retry: RetryConfig,
    pub shutdown: ShutdownConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub bootstrap_servers: Vec<String>,
    pub group_id: String,
    pub topics: Vec<String>,
    pub auto_offset_reset: OffsetReset,
    pub client_id: Option<String>,
    pub poll_timeout_ms: u64,
    pub max_poll_records: usize,
    /// Treat every handler error as fatal, not just the ones the handler flags.
    pub abort_on_handler_error: bool,
    /// Extra client properties passed through to the broker client verbatim.
    pub extra: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OffsetReset {
    Earliest,
    Latest,
    /// Fail when the group has no committed offset.
    Error,
}

impl OffsetReset {
    pub fn as_str(&self) -> &'static str {
        match self {
            OffsetReset::Earliest => "earliest",
            OffsetReset::Latest => "latest",
            OffsetReset::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    /// 0 retries transient errors forever.
    pub max_consecutive_errors: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
#[derive(Default)]
pub struct ShutdownConfig {
    /// 0 waits for the poll loop indefinitely.
    pub drain_timeout_secs: u64,
    pub stop_file: Option<PathBuf>,
    pub status_file: Option<PathBuf>,
}

// --- Default implementations ---

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            bootstrap_servers: vec!["127.0.0.1:9092".to_string()],
            group_id: "my-fourth-app".to_string(),
            topics: vec!["first_topic".to_string()],
            auto_offset_reset: OffsetReset::Earliest,
            client_id: None,
            poll_timeout_ms: 100,
            max_poll_records: 500,
            abort_on_handler_error: false,
            extra: BTreeMap::new(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            initial_backoff_ms: 100,
            max_backoff_ms: 10_000,
            max_consecutive_errors: 0,
        }
    }
}

impl ConsumerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }
}

impl ShutdownConfig {
    /// The bounded drain wait, or `None` to wait as long as cleanup takes.
    pub fn drain_timeout(&self) -> Option<Duration> {
        match self.drain_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

impl Settings {
    /// Check the settings before anything touches the network.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let consumer = &self.consumer;
        if consumer.topics.is_empty() {
            return Err(ConfigError::Invalid("no topics configured".to_string()));
        }
        if let Some(blank) = consumer.topics.iter().position(|t| t.trim().is_empty()) {
            return Err(ConfigError::Invalid(format!(
                "topic #{} is blank",
                blank + 1
            )));
        }
        if consumer.group_id.trim().is_empty() {
            return Err(ConfigError::Invalid("group_id is empty".to_string()));
        }
        if consumer.bootstrap_servers.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::Invalid(
                "no bootstrap servers configured".to_string(),
            ));
        }
        if consumer.poll_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "poll_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if consumer.max_poll_records == 0 {
            return Err(ConfigError::Invalid(
                "max_poll_records must be greater than zero".to_string(),
            ));
        }
        if self.retry.initial_backoff_ms > self.retry.max_backoff_ms {
            return Err(ConfigError::Invalid(format!(
                "retry.initial_backoff_ms ({}) exceeds retry.max_backoff_ms ({})",
                self.retry.initial_backoff_ms, self.retry.max_backoff_ms
            )));
        }
        Ok(())
    }
}

/// Load settings from a TOML file. A missing file yields the defaults.
pub fn load(path: &Path) -> Result<Settings, ConfigError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Settings::default());
        }
        Err(e) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        source: e,
    })
}

/// Errors raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    /// Settings parsed but are unusable (empty topic list, blank group id, ...).
    Invalid(String),
    /// The broker client rejected the subscription or its client settings.
    Client(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config {}: {}", path.display(), source)
            }
            ConfigError::Parse { path, source } => {
                write!(f, "failed to parse config {}: {}", path.display(), source)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {msg}"),
            ConfigError::Client(msg) => write!(f, "broker client rejected configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse { source, .. } => Some(source),
            ConfigError::Invalid(_) | ConfigError::Client(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.consumer.group_id, "my-fourth-app");
        assert_eq!(settings.consumer.topics, vec!["first_topic"]);
        assert_eq!(settings.consumer.auto_offset_reset, OffsetReset::Earliest);
        assert_eq!(settings.consumer.poll_timeout(), Duration::from_millis(100));
        assert_eq!(settings.shutdown.drain_timeout(), None);
    }

    #[test]
    fn test_empty_topics_rejected() {
        let mut settings = Settings::default();
        settings.consumer.topics.clear();
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("no topics"));
    }

    #[test]
    fn test_blank_topic_rejected() {
        let mut settings = Settings::default();
        settings.consumer.topics = vec!["orders".to_string(), "  ".to_string()];
        let err = settings.validate().unwrap_err();
        assert!(err.to_string().contains("topic #2 is blank"));
    }

    #[test]
    fn test_empty_group_id_rejected() {
        let mut settings = Settings::default();
        settings.consumer.group_id = String::new();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_missing_brokers_rejected() {
        let mut settings = Settings::default();
        settings.consumer.bootstrap_servers = vec![String::new()];
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_zero_poll_timeout_rejected() {
        let mut settings = Settings::default();
        settings.consumer.poll_timeout_ms = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_backoff_bounds_checked() {
        let mut settings = Settings::default();
        settings.retry.initial_backoff_ms = 500;
        settings.retry.max_backoff_ms = 100;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_drain_timeout_nonzero() {
        let shutdown = ShutdownConfig {
            drain_timeout_secs: 30,
            ..Default::default()
        };
        assert_eq!(shutdown.drain_timeout(), Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let settings = load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(settings.consumer.group_id, "my-fourth-app");
    }

    #[test]
    fn test_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consumer.toml");
        std::fs::write(
            &path,
            r#"
[consumer]
group_id = "billing"
topics = ["invoices", "refunds"]
auto_offset_reset = "latest"

[consumer.extra]
"session.timeout.ms" = "6000"

[shutdown]
drain_timeout_secs = 10
stop_file = "STOP"
"#,
        )
        .unwrap();

        let settings = load(&path).unwrap();
        assert_eq!(settings.consumer.group_id, "billing");
        assert_eq!(settings.consumer.topics, vec!["invoices", "refunds"]);
        assert_eq!(settings.consumer.auto_offset_reset, OffsetReset::Latest);
        assert_eq!(
            settings.consumer.extra.get("session.timeout.ms").map(String::as_str),
            Some("6000")
        );
        // Unspecified fields keep their defaults
        assert_eq!(settings.consumer.poll_timeout_ms, 100);
        assert_eq!(settings.retry.max_backoff_ms, 10_000);
        assert_eq!(settings.shutdown.drain_timeout(), Some(Duration::from_secs(10)));
        assert_eq!(settings.shutdown.stop_file, Some(PathBuf::from("STOP")));
    }

    #[test]
    fn test_load_malformed_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("consumer.toml");
        std::fs::write(&path, "[consumer\ngroup_id = ").unwrap();
        let err = load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("consumer.toml"));
    }

    #[test]
    fn test_unknown_offset_reset_rejected() {
        let result: Result<Settings, _> = toml::from_str("[consumer]\nauto_offset_reset = \"middle\"\n");
        assert!(result.is_err());
    }
}
