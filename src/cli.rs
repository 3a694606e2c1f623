use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::config::AppConfig;
use crate::error::{FeedwatchError, Result};
use crate::feed::Feed;
use crate::overlay::ToolCommands;
use crate::supervisor::{LivenessProbe, ProbeAttempt, ToolProbe};

#[derive(Parser, Debug)]
#[command(name = "feedwatch")]
#[command(version)]
#[command(about = "Keeps one ffmpeg overlay worker running per live feed", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,

    /// Config file path (overrides --config-dir)
    #[arg(short, long, env = "FEEDWATCH_CONFIG")]
    pub config: Option<PathBuf>,

    /// Directory holding default.toml and environment overlays
    #[arg(long, env = "FEEDWATCH_CONFIG_DIR", default_value = "config")]
    pub config_dir: PathBuf,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Commands {
    /// Supervise all configured feeds (default)
    Run,
    /// Probe one feed once and report whether it is transmitting
    Probe {
        /// Feed name
        feed: String,
    },
    /// List configured feeds with labels and addresses
    Feeds,
    /// Print the worker command line for a feed
    Command {
        /// Feed name
        feed: String,
    },
}

impl Cli {
    /// Load configuration from the explicit file or the config directory
    pub fn load_config(&self) -> Result<AppConfig> {
        let cfg = match &self.config {
            Some(path) => AppConfig::load_file(path)?,
            None => AppConfig::load_from(&self.config_dir)?,
        };
        cfg.validate()
            .map_err(|errors| FeedwatchError::Validation(errors.join("; ")))?;
        Ok(cfg)
    }
}

fn configured_feed(cfg: &AppConfig, name: &str) -> Result<Feed> {
    cfg.feed_list()?
        .into_iter()
        .find(|f| f.name() == name)
        .ok_or_else(|| {
            FeedwatchError::InvalidFeedName(format!("{} is not a configured feed", name))
        })
}

/// Run a single probe and print the verdict
pub async fn probe_feed(cfg: &AppConfig, name: &str) -> Result<bool> {
    let feed = configured_feed(cfg, name)?;
    let probe = ToolProbe::new(
        ToolCommands::new(cfg)?,
        Duration::from_secs(cfg.probe.timeout_secs),
    );

    match probe.check(&feed).await {
        ProbeAttempt::Success => {
            println!("\x1b[32m✓ {} is transmitting\x1b[0m", feed);
            Ok(true)
        }
        ProbeAttempt::Failed { reason } => {
            println!("\x1b[31m✗ {} is not transmitting: {}\x1b[0m", feed, reason);
            Ok(false)
        }
    }
}

pub fn list_feeds(cfg: &AppConfig) -> Result<()> {
    let feeds = cfg.feed_list()?;

    println!("  {:<12} {:<12} {:<40} {}", "FEED", "LABEL", "INPUT", "OUTPUT");
    println!("  {}", "-".repeat(100));
    for feed in &feeds {
        println!(
            "  {:<12} {:<12} {:<40} {}",
            feed.name(),
            feed.label(),
            cfg.endpoints.input_url(feed),
            cfg.endpoints.output_url(feed)
        );
    }
    Ok(())
}

pub fn show_command(cfg: &AppConfig, name: &str) -> Result<()> {
    let feed = configured_feed(cfg, name)?;
    let spec = ToolCommands::new(cfg)?.worker(&feed)?;
    println!("{}", spec);
    Ok(())
}
