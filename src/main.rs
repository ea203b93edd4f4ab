use clap::Parser;
use graceful_consumer::config::{self, OffsetReset, Settings};
use std::path::PathBuf;
use std::process::ExitCode;

/// Consume a topic in a background poll loop, log every record, and shut
/// down cleanly on SIGINT/SIGTERM or when a stop file appears.
#[derive(Parser, Debug)]
#[command(name = "graceful-consumer", version, about)]
pub struct Cli {
    /// Config file path (missing file means defaults)
    #[arg(short, long, default_value = "consumer.toml")]
    config: PathBuf,

    /// Bootstrap servers, comma separated (overrides config)
    #[arg(short, long, value_delimiter = ',')]
    brokers: Option<Vec<String>>,

    /// Consumer group id (overrides config)
    #[arg(short, long)]
    group_id: Option<String>,

    /// Topic to subscribe to; repeat for several (overrides config)
    #[arg(short, long = "topic")]
    topics: Vec<String>,

    /// Where to start when the group has no committed offset (overrides config)
    #[arg(long, value_enum)]
    offset_reset: Option<OffsetReset>,

    /// Bounded wait per poll in milliseconds (overrides config)
    #[arg(long)]
    poll_timeout_ms: Option<u64>,

    /// Give up waiting for the consumer to close after this many seconds, 0 = never
    #[arg(long)]
    drain_timeout_secs: Option<u64>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Extra logging (every poll, retry decisions)
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn apply_overrides(&self, settings: &mut Settings) {
        if let Some(brokers) = &self.brokers {
            settings.consumer.bootstrap_servers = brokers.clone();
        }
        if let Some(group_id) = &self.group_id {
            settings.consumer.group_id = group_id.clone();
        }
        if !self.topics.is_empty() {
            settings.consumer.topics = self.topics.clone();
        }
        if let Some(offset_reset) = self.offset_reset {
            settings.consumer.auto_offset_reset = offset_reset;
        }
        if let Some(ms) = self.poll_timeout_ms {
            settings.consumer.poll_timeout_ms = ms;
        }
        if let Some(secs) = self.drain_timeout_secs {
            settings.shutdown.drain_timeout_secs = secs;
        }
    }

    fn default_log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.default_log_level())),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut settings = match config::load(&cli.config) {
        Ok(settings) => settings,
        Err(e) => {
            tracing::error!(error = %e, "failed to load configuration");
            return ExitCode::from(2);
        }
    };
    cli.apply_overrides(&mut settings);

    if let Err(e) = settings.validate() {
        tracing::error!(error = %e, "configuration rejected");
        return ExitCode::from(2);
    }

    if cli.dry_run {
        match toml::to_string_pretty(&settings) {
            Ok(resolved) => {
                println!("Dry run: configuration is valid.\n\n{resolved}");
                return ExitCode::SUCCESS;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to render settings");
                return ExitCode::FAILURE;
            }
        }
    }

    run(settings).await
}

#[cfg(feature = "kafka")]
async fn run(settings: Settings) -> ExitCode {
    use graceful_consumer::kafka::KafkaClient;
    use graceful_consumer::{runner, LogHandler};

    tracing::info!(brokers = ?settings.consumer.bootstrap_servers, "creating the consumer");
    let client = match KafkaClient::connect(&settings.consumer) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "failed to create kafka consumer");
            return ExitCode::from(2);
        }
    };

    match runner::run(&settings, client, LogHandler::new()).await {
        Ok(report) => {
            if report.exit.is_clean() {
                tracing::info!(records = report.stats.records, "application has exited");
            } else {
                tracing::error!(exit = %report.exit, "consumer stopped on error");
            }
            ExitCode::from(report.exit.exit_code())
        }
        Err(e) => {
            tracing::error!(error = %e, "consumer failed");
            ExitCode::from(e.exit_code())
        }
    }
}

#[cfg(not(feature = "kafka"))]
async fn run(_settings: Settings) -> ExitCode {
    tracing::error!("built without a broker client; rebuild with `--features kafka`");
    ExitCode::from(2)
}
