/// Status file: rewrites a JSON snapshot of the consumer on every lifecycle transition.
///
/// Uses atomic write pattern: write to temp file then rename.
use crate::config::ConsumerConfig;
use crate::lifecycle::{Lifecycle, LifecycleState};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tokio::task::JoinHandle;

/// The JSON payload written to the status file.
#[derive(Debug, Clone, Serialize)]
pub struct StatusData {
    pub pid: u32,
    pub state: LifecycleState,
    pub group_id: String,
    pub topics: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
}

/// Manages the status file location and writes.
pub struct StatusFile {
    path: PathBuf,
}

impl StatusFile {
    /// Create a new StatusFile writer for the given path.
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Atomically write status data to the status file.
    ///
    /// Writes to a temporary file in the same directory, then renames
    /// so readers never see a partial write.
    pub fn write(&self, data: &StatusData) -> Result<(), StatusError> {
        let json =
            serde_json::to_string_pretty(data).map_err(|e| StatusError::Serialize { source: e })?;

        let dir = self.path.parent().unwrap_or(Path::new("."));
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "status".to_string());
        let tmp_path = dir.join(format!(".{file_name}.tmp.{}", std::process::id()));

        std::fs::write(&tmp_path, json.as_bytes()).map_err(|e| StatusError::Write {
            path: tmp_path.clone(),
            source: e,
        })?;

        std::fs::rename(&tmp_path, &self.path).map_err(|e| StatusError::Rename {
            from: tmp_path,
            to: self.path.clone(),
            source: e,
        })?;

        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Follow `lifecycle` and rewrite the status file on each change until `Closed`.
///
/// Write failures are logged and do not affect the consumer.
pub fn spawn_writer(
    file: StatusFile,
    lifecycle: &Lifecycle,
    consumer: &ConsumerConfig,
) -> JoinHandle<()> {
    let mut rx = lifecycle.subscribe();
    let mut data = StatusData {
        pid: std::process::id(),
        state: lifecycle.state(),
        group_id: consumer.group_id.clone(),
        topics: consumer.topics.clone(),
        started_at: Utc::now(),
        last_update: Utc::now(),
    };

    tokio::spawn(async move {
        loop {
            data.state = *rx.borrow_and_update();
            data.last_update = Utc::now();
            match file.write(&data) {
                Ok(()) => tracing::debug!(state = %data.state, path = %file.path().display(), "status written"),
                Err(e) => tracing::warn!(error = %e, "failed to write status file"),
            }
            if data.state == LifecycleState::Closed || rx.changed().await.is_err() {
                break;
            }
        }
    })
}

/// Errors from status file operations.
#[derive(Debug)]
pub enum StatusError {
    Serialize {
        source: serde_json::Error,
    },
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    Rename {
        from: PathBuf,
        to: PathBuf,
        source: std::io::Error,
    },
}

impl std::fmt::Display for StatusError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatusError::Serialize { source } => write!(f, "failed to serialize status: {source}"),
            StatusError::Write { path, source } => {
                write!(
                    f,
                    "failed to write temp status file {}: {source}",
                    path.display()
                )
            }
            StatusError::Rename { from, to, source } => {
                write!(
                    f,
                    "failed to rename {} -> {}: {source}",
                    from.display(),
                    to.display()
                )
            }
        }
    }
}

impl std::error::Error for StatusError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StatusError::Serialize { source } => Some(source),
            StatusError::Write { source, .. } => Some(source),
            StatusError::Rename { source, .. } => Some(source),
        }
    }
}
