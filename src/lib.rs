//! A broker consumer runtime: a background poll loop that can be interrupted
//! mid-poll from any task, and a shutdown coordinator that holds process exit
//! until the consumer has been closed exactly once.

pub mod client;
pub mod config;
pub mod handler;
#[cfg(feature = "kafka")]
pub mod kafka;
pub mod latch;
pub mod lifecycle;
pub mod poll_loop;
pub mod retry;
pub mod runner;
pub mod shutdown;
pub mod signals;
pub mod status;

#[cfg(test)]
mod mock;

pub use client::{BrokerClient, BrokerError, Record};
pub use config::{ConfigError, Settings};
pub use handler::{HandlerError, LogHandler, RecordHandler};
pub use poll_loop::{LoopExit, LoopReport, PollLoop, PollLoopHandle, PollOutcome, ShutdownHandle};
pub use shutdown::{ShutdownCoordinator, ShutdownError};
