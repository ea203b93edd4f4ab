/// Termination triggers for graceful shutdown.
///
/// Handles SIGINT (Ctrl-C), SIGTERM, and STOP file detection. Every trigger
/// means the same thing: stop polling, close the consumer, exit.
use std::path::{Path, PathBuf};
use std::time::Duration;

#[cfg(unix)]
use tokio::signal::unix::{signal, Signal, SignalKind};

const STOP_FILE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// What asked the process to terminate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminationCause {
    Interrupt,
    Terminate,
    StopFile(PathBuf),
}

impl std::fmt::Display for TerminationCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminationCause::Interrupt => write!(f, "SIGINT"),
            TerminationCause::Terminate => write!(f, "SIGTERM"),
            TerminationCause::StopFile(path) => write!(f, "stop file {}", path.display()),
        }
    }
}

pub struct SignalHandler {
    #[cfg(unix)]
    sigint: Signal,
    #[cfg(unix)]
    sigterm: Signal,
    stop_file: Option<PathBuf>,
}

impl SignalHandler {
    /// Register OS signal handlers. Must be called inside a tokio runtime.
    pub fn install(stop_file: Option<PathBuf>) -> std::io::Result<SignalHandler> {
        if let Some(path) = &stop_file {
            if path.exists() {
                tracing::warn!(
                    path = %path.display(),
                    "stop file already present, consumer will stop right away"
                );
            }
        }
        Ok(SignalHandler {
            #[cfg(unix)]
            sigint: signal(SignalKind::interrupt())?,
            #[cfg(unix)]
            sigterm: signal(SignalKind::terminate())?,
            stop_file,
        })
    }

    /// Wait for the next termination trigger.
    ///
    /// The stop file fires once; later calls only wait for signals.
    pub async fn recv(&mut self) -> TerminationCause {
        #[cfg(unix)]
        let cause = tokio::select! {
            _ = self.sigint.recv() => TerminationCause::Interrupt,
            _ = self.sigterm.recv() => TerminationCause::Terminate,
            path = wait_for_stop_file(self.stop_file.as_deref()) => TerminationCause::StopFile(path),
        };

        #[cfg(not(unix))]
        let cause = tokio::select! {
            _ = tokio::signal::ctrl_c() => TerminationCause::Interrupt,
            path = wait_for_stop_file(self.stop_file.as_deref()) => TerminationCause::StopFile(path),
        };

        if matches!(cause, TerminationCause::StopFile(_)) {
            self.stop_file = None;
        }
        cause
    }
}

async fn wait_for_stop_file(path: Option<&Path>) -> PathBuf {
    let Some(path) = path else {
        return std::future::pending().await;
    };
    loop {
        if path.exists() {
            return path.to_path_buf();
        }
        tokio::time::sleep(STOP_FILE_POLL_INTERVAL).await;
    }
}
