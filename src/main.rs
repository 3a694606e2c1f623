use anyhow::Context;
use clap::Parser;
use feedwatch::cli::{self, Cli, Commands};
use feedwatch::config::{AppConfig, LoggingConfig};
use feedwatch::coordination::{install_signal_handlers, GracefulShutdown};
use feedwatch::overlay::ToolCommands;
use feedwatch::supervisor::{Harness, ToolProbe};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = cli.load_config().context("loading configuration")?;

    match cli.command.clone().unwrap_or(Commands::Run) {
        Commands::Run => {
            init_logging(&cfg.logging);
            run_supervisor(cfg).await?;
        }
        Commands::Probe { feed } => {
            init_logging_simple();
            if !cli::probe_feed(&cfg, &feed).await? {
                std::process::exit(1);
            }
        }
        Commands::Feeds => cli::list_feeds(&cfg)?,
        Commands::Command { feed } => cli::show_command(&cfg, &feed)?,
    }

    Ok(())
}

async fn run_supervisor(cfg: AppConfig) -> anyhow::Result<()> {
    info!("Starting feed monitor");

    let feeds = cfg.feed_list()?;
    let commands = ToolCommands::new(&cfg)?;
    let probe = Arc::new(ToolProbe::new(
        commands.clone(),
        Duration::from_secs(cfg.probe.timeout_secs),
    ));

    let shutdown = Arc::new(GracefulShutdown::new());
    install_signal_handlers(shutdown.clone()).context("installing signal handlers")?;

    let harness = Harness::new(
        feeds,
        probe,
        Arc::new(commands),
        cfg.settings(),
        cfg.supervisor.restart_mode,
    );
    harness.run(shutdown).await?;
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(logging.level.as_str()));

    // Optional file copy of the log, enabled by FEEDWATCH_LOG_DIR
    let file_layer = std::env::var("FEEDWATCH_LOG_DIR").ok().and_then(|log_dir| {
        // `tracing_appender::rolling::daily` panics if it can't create the
        // initial log file, so check writability first.
        if std::fs::create_dir_all(&log_dir).is_err() {
            eprintln!(
                "Warning: Could not create log directory {}, file logging disabled",
                log_dir
            );
            return None;
        }
        let test_path = std::path::Path::new(&log_dir).join(".feedwatch_write_test");
        match std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&test_path)
        {
            Ok(_) => {
                let _ = std::fs::remove_file(&test_path);

                let file_appender = tracing_appender::rolling::daily(&log_dir, "feedwatch.log");
                let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

                // Keep the guard alive for the life of the process
                Box::leak(Box::new(guard));

                Some(
                    tracing_subscriber::fmt::layer()
                        .with_writer(non_blocking)
                        .with_ansi(false)
                        .with_target(true),
                )
            }
            Err(e) => {
                eprintln!(
                    "Warning: Could not write to log directory {} ({}), file logging disabled",
                    log_dir, e
                );
                None
            }
        }
    });

    let (console_plain, console_json) = if logging.json {
        (
            None,
            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stdout),
            ),
        )
    } else {
        (
            Some(
                tracing_subscriber::fmt::layer()
                    .with_writer(std::io::stdout)
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            ),
            None,
        )
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(console_plain)
        .with(console_json)
        .with(file_layer)
        .init();
}

fn init_logging_simple() {
    // Minimal logging for one-shot commands
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .try_init();
}
