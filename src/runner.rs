/// Wires a poll loop, the shutdown coordinator, OS signals and the optional
/// status file into one run that returns when the consumer has closed.
use crate::client::BrokerClient;
use crate::config::{ConfigError, Settings};
use crate::handler::RecordHandler;
use crate::poll_loop::{LoopReport, PollLoop};
use crate::shutdown::{ShutdownCoordinator, ShutdownError};
use crate::signals::SignalHandler;
use crate::status::{self, StatusFile};
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};

/// Run `client` until a termination trigger fires or the loop fails.
///
/// A loop that ends on its own (fatal broker or handler error) is reported
/// through `LoopReport::exit`, not as an `Err`.
pub async fn run<C, H>(settings: &Settings, client: C, handler: H) -> Result<LoopReport, RunError>
where
    C: BrokerClient,
    H: RecordHandler,
{
    let handle = PollLoop::start(settings, client, handler).map_err(RunError::Config)?;

    let status_writer = settings.shutdown.status_file.clone().map(|path| {
        status::spawn_writer(StatusFile::new(path), &handle.lifecycle(), &settings.consumer)
    });

    let signals = match SignalHandler::install(settings.shutdown.stop_file.clone()) {
        Ok(signals) => signals,
        Err(e) => {
            tracing::error!(error = %e, "failed to install signal handlers");
            handle.request_shutdown();
            if let Err(join_error) = handle.join().await {
                tracing::error!(error = %join_error, "poll loop panicked while stopping");
            }
            stop_status_writer(status_writer, true).await;
            return Err(RunError::Signals(e));
        }
    };

    let coordinator = Arc::new(ShutdownCoordinator::new(
        &handle,
        settings.shutdown.drain_timeout(),
    ));
    let mut hook = Arc::clone(&coordinator).install(signals);

    let drained = tokio::select! {
        _ = coordinator.main_wait() => Ok(()),
        result = &mut hook => match result {
            Ok(Err(e)) => Err(e),
            Ok(Ok(())) => {
                coordinator.main_wait().await;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "shutdown hook task failed");
                coordinator.main_wait().await;
                Ok(())
            }
        },
    };
    hook.abort();

    if let Err(e) = drained {
        stop_status_writer(status_writer, false).await;
        return Err(RunError::Shutdown(e));
    }
    stop_status_writer(status_writer, true).await;

    handle.join().await.map_err(RunError::Panicked)
}

/// Let the status writer record `closed` and finish, or abort it when the
/// consumer is still running and will not reach `closed` before we return.
async fn stop_status_writer(writer: Option<JoinHandle<()>>, closed: bool) {
    let Some(writer) = writer else {
        return;
    };
    if !closed {
        writer.abort();
    }
    match writer.await {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {
            tracing::warn!("status writer stopped before the consumer closed")
        }
        Err(e) => tracing::warn!(error = %e, "status writer task failed"),
    }
}

#[derive(Debug)]
pub enum RunError {
    Config(ConfigError),
    Signals(std::io::Error),
    Shutdown(ShutdownError),
    /// The poll loop task panicked; the consumer was still closed.
    Panicked(JoinError),
}

impl RunError {
    pub fn exit_code(&self) -> u8 {
        match self {
            RunError::Config(_) => 2,
            _ => 1,
        }
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunError::Config(e) => write!(f, "{e}"),
            RunError::Signals(e) => write!(f, "failed to install signal handlers: {e}"),
            RunError::Shutdown(e) => write!(f, "{e}"),
            RunError::Panicked(e) => write!(f, "poll loop panicked: {e}"),
        }
    }
}

impl std::error::Error for RunError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RunError::Config(e) => Some(e),
            RunError::Signals(e) => Some(e),
            RunError::Shutdown(e) => Some(e),
            RunError::Panicked(e) => Some(e),
        }
    }
}
