use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::feed::{feeds_from_names, Feed};

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub tool: ToolConfig,
    pub endpoints: EndpointConfig,
    /// Static list of feed names to supervise
    pub feeds: Vec<String>,
    pub probe: ProbeConfig,
    pub supervisor: SupervisorConfig,
    pub profile: ProfileConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tool: ToolConfig::default(),
            endpoints: EndpointConfig::default(),
            feeds: default_feeds(),
            probe: ProbeConfig::default(),
            supervisor: SupervisorConfig::default(),
            profile: ProfileConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_feeds() -> Vec<String> {
    (1..=5).map(|n| format!("vant{}", n)).collect()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ToolConfig {
    /// Path to the ffmpeg binary used for probes and workers
    pub ffmpeg_path: String,
    /// Animated graphic composited over every feed
    pub overlay_asset: String,
    /// Font used to draw the feed label
    pub font_path: String,
    /// Custom filter graph; `{overlay_width}`, `{label}` and `{font}` are substituted
    pub overlay_template: Option<String>,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: "/usr/bin/ffmpeg".to_string(),
            overlay_asset: "/var/www/html/livevideo/img/Drone_aspas_girando.gif".to_string(),
            font_path: "/usr/share/fonts/truetype/dejavu/DejaVuSans-Bold.ttf".to_string(),
            overlay_template: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EndpointConfig {
    /// Input address prefix; the feed name is appended
    pub input_base_url: String,
    /// Output address prefix; the feed name is appended
    pub output_base_url: String,
    /// Appended after the feed name on output, keeps it apart from the input namespace
    pub output_suffix: String,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            input_base_url: "rtmp://localhost:1935/cov/".to_string(),
            output_base_url: "rtsp://localhost:8554/".to_string(),
            output_suffix: String::new(),
        }
    }
}

impl EndpointConfig {
    pub fn input_url(&self, feed: &Feed) -> String {
        format!("{}{}", self.input_base_url, feed.name())
    }

    pub fn output_url(&self, feed: &Feed) -> String {
        format!("{}{}{}", self.output_base_url, feed.name(), self.output_suffix)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    /// Hard limit on a single probe invocation (default: 8s)
    pub timeout_secs: u64,
    /// Seconds of input the probe reads (default: 3)
    pub duration_secs: u64,
    /// Socket read/write timeout passed to the tool, in microseconds
    pub rw_timeout_us: u64,
    /// Consecutive probe failures before a feed is considered gone (default: 1)
    pub failure_threshold: u32,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 8,
            duration_secs: 3,
            rw_timeout_us: 5_000_000,
            failure_threshold: 1,
        }
    }
}

/// What the run harness does when the reconciler escalates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartMode {
    /// Discard supervisor state and start a new generation in-process
    Reinitialize,
    /// Replace the process image with the same executable and arguments
    ReExec,
}

impl std::fmt::Display for RestartMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RestartMode::Reinitialize => write!(f, "reinitialize"),
            RestartMode::ReExec => write!(f, "re_exec"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Sleep between supervision cycles (default: 10s)
    pub poll_interval_secs: u64,
    /// Wait after SIGTERM before killing a worker (default: 5s)
    pub stop_grace_secs: u64,
    /// Pause between stopping and restarting a worker (default: 2s)
    pub restart_cooldown_secs: u64,
    /// Consecutive restart cycles before a full supervisor restart (default: 1)
    pub escalation_threshold: u32,
    pub restart_mode: RestartMode,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 10,
            stop_grace_secs: 5,
            restart_cooldown_secs: 2,
            escalation_threshold: 1,
            restart_mode: RestartMode::Reinitialize,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileConfig {
    /// Keyframe interval in frames
    pub gop: u32,
    /// Constant video bitrate, ffmpeg notation (e.g. "3000k")
    pub bitrate: String,
    /// Width the overlay graphic is scaled to
    pub overlay_width: u32,
}

impl Default for ProfileConfig {
    fn default() -> Self {
        Self {
            gop: 30,
            bitrate: "3000k".to_string(),
            overlay_width: 200,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Enable JSON formatted logs
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Runtime timings derived from configuration
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub poll_interval: Duration,
    pub stop_grace: Duration,
    pub restart_cooldown: Duration,
    pub escalation_threshold: u32,
    pub probe_failure_threshold: u32,
}

impl From<&AppConfig> for SupervisorSettings {
    fn from(cfg: &AppConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(cfg.supervisor.poll_interval_secs),
            stop_grace: Duration::from_secs(cfg.supervisor.stop_grace_secs),
            restart_cooldown: Duration::from_secs(cfg.supervisor.restart_cooldown_secs),
            escalation_threshold: cfg.supervisor.escalation_threshold,
            probe_failure_threshold: cfg.probe.failure_threshold,
        }
    }
}

impl AppConfig {
    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g., config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("FEEDWATCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            .add_source(env_source());

        builder.build()?.try_deserialize()
    }

    /// Load a single explicit config file, still honoring environment overrides
    pub fn load_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::from(path.as_ref()).required(true))
            .add_source(env_source())
            .build()?
            .try_deserialize()
    }

    /// Validated feeds in configured order
    pub fn feed_list(&self) -> crate::error::Result<Vec<Feed>> {
        feeds_from_names(&self.feeds)
    }

    pub fn settings(&self) -> SupervisorSettings {
        SupervisorSettings::from(self)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.feeds.is_empty() {
            errors.push("at least one feed must be configured".to_string());
        }
        if let Err(e) = self.feed_list() {
            errors.push(e.to_string());
        }

        if self.tool.ffmpeg_path.trim().is_empty() {
            errors.push("tool.ffmpeg_path must not be empty".to_string());
        }
        if self.tool.overlay_asset.trim().is_empty() {
            errors.push("tool.overlay_asset must not be empty".to_string());
        }
        if self.tool.font_path.trim().is_empty() {
            errors.push("tool.font_path must not be empty".to_string());
        }

        if self.endpoints.input_base_url.is_empty() || self.endpoints.output_base_url.is_empty() {
            errors.push("endpoints.input_base_url and output_base_url are required".to_string());
        }
        if self.endpoints.input_base_url == self.endpoints.output_base_url
            && self.endpoints.output_suffix.is_empty()
        {
            errors.push(
                "output would overwrite input: set a different output_base_url or an output_suffix"
                    .to_string(),
            );
        }

        if self.probe.failure_threshold == 0 {
            errors.push("probe.failure_threshold must be at least 1".to_string());
        }
        if self.probe.timeout_secs == 0 {
            errors.push("probe.timeout_secs must be positive".to_string());
        }
        if self.probe.duration_secs >= self.probe.timeout_secs {
            errors.push("probe.duration_secs should be less than probe.timeout_secs".to_string());
        }

        if self.supervisor.escalation_threshold == 0 {
            errors.push("supervisor.escalation_threshold must be at least 1".to_string());
        }
        if self.supervisor.poll_interval_secs == 0 {
            errors.push("supervisor.poll_interval_secs must be positive".to_string());
        }

        if self.profile.gop == 0 {
            errors.push("profile.gop must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

/// Environment overrides (FEEDWATCH__SUPERVISOR__POLL_INTERVAL_SECS, FEEDWATCH__FEEDS=a,b, ...)
fn env_source() -> Environment {
    Environment::with_prefix("FEEDWATCH")
        .separator("__")
        .try_parsing(true)
        .list_separator(",")
        .with_list_parse_key("feeds")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.feeds, vec!["vant1", "vant2", "vant3", "vant4", "vant5"]);
        assert_eq!(cfg.probe.failure_threshold, 1);
        assert_eq!(cfg.supervisor.escalation_threshold, 1);
        assert_eq!(cfg.supervisor.restart_mode, RestartMode::Reinitialize);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_restart_mode_display_matches_config_names() {
        assert_eq!(RestartMode::Reinitialize.to_string(), "reinitialize");
        assert_eq!(RestartMode::ReExec.to_string(), "re_exec");
    }

    #[test]
    fn test_settings_durations() {
        let settings = AppConfig::default().settings();
        assert_eq!(settings.poll_interval, Duration::from_secs(10));
        assert_eq!(settings.stop_grace, Duration::from_secs(5));
        assert_eq!(settings.restart_cooldown, Duration::from_secs(2));
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut cfg = AppConfig::default();
        cfg.feeds = vec!["vant1".to_string(), "bad name".to_string()];
        cfg.probe.failure_threshold = 0;
        cfg.supervisor.escalation_threshold = 0;

        let errors = cfg.validate().unwrap_err();
        assert_eq!(errors.len(), 3);
    }

    #[test]
    fn test_output_must_not_shadow_input() {
        let mut cfg = AppConfig::default();
        cfg.endpoints.output_base_url = cfg.endpoints.input_base_url.clone();
        assert!(cfg.validate().is_err());

        cfg.endpoints.output_suffix = "_overlay".to_string();
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_endpoint_urls() {
        let mut endpoints = EndpointConfig::default();
        endpoints.output_suffix = "_ov".to_string();
        let feed = Feed::new("vant2").unwrap();

        assert_eq!(endpoints.input_url(&feed), "rtmp://localhost:1935/cov/vant2");
        assert_eq!(endpoints.output_url(&feed), "rtsp://localhost:8554/vant2_ov");
    }

    #[test]
    fn test_load_from_missing_dir_uses_defaults() {
        let cfg = AppConfig::load_from("/nonexistent/feedwatch-config").unwrap();
        assert_eq!(cfg.logging.level, "info");
        assert_eq!(cfg.supervisor.poll_interval_secs, 10);
    }
}
