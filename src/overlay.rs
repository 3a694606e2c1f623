//! Tool Command Construction
//!
//! Builds the argument vectors for probe and worker invocations of the
//! transcoding tool. The filter graph is an [`OverlayTemplate`] with a fixed
//! set of placeholders; substituted values are checked against allow-lists
//! so a feed label or asset path can never break out of its filter option.

use std::collections::HashMap;
use std::process::Stdio;

use crate::config::AppConfig;
use crate::error::{FeedwatchError, Result};
use crate::feed::Feed;

/// Blinking label under an animated graphic in the top-left corner
pub const DEFAULT_OVERLAY_TEMPLATE: &str = concat!(
    "[1:v]format=rgba,scale={overlay_width}:-1[gif];",
    "[0:v][gif]overlay=10:10[tmp];",
    "[tmp]drawtext=text='{label}':",
    "fontfile='{font}':fontcolor=white:fontsize=26:",
    "borderw=2:bordercolor=black@0.7:shadowx=2:shadowy=2:",
    "x=10+(({overlay_width}-text_w)/2):y=10+110:",
    "enable='lt(mod(t\\,2)\\,1)'[outv]"
);

const PLACEHOLDERS: [&str; 3] = ["overlay_width", "label", "font"];

/// Filter graph with validated substitution points
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayTemplate {
    raw: String,
}

impl OverlayTemplate {
    /// Parse a template, rejecting unknown or unterminated placeholders
    pub fn new(raw: &str) -> Result<Self> {
        let mut rest = raw;
        while let Some(start) = rest.find('{') {
            let after = &rest[start + 1..];
            let end = after.find('}').ok_or_else(|| {
                FeedwatchError::InvalidOverlay(format!("unterminated placeholder in {:?}", raw))
            })?;
            let name = &after[..end];
            if !PLACEHOLDERS.contains(&name) {
                return Err(FeedwatchError::InvalidOverlay(format!(
                    "unknown placeholder {{{}}}",
                    name
                )));
            }
            rest = &after[end + 1..];
        }
        Ok(Self {
            raw: raw.to_string(),
        })
    }

    /// Substitute values in a single pass; substituted text is never rescanned
    pub fn render(&self, label: &str, font: &str, overlay_width: u32) -> Result<String> {
        check_label(label)?;
        check_font(font)?;

        let width = overlay_width.to_string();
        let values: HashMap<&str, &str> = [
            ("overlay_width", width.as_str()),
            ("label", label),
            ("font", font),
        ]
        .into_iter()
        .collect();

        let mut out = String::with_capacity(self.raw.len() + 64);
        let mut rest = self.raw.as_str();
        while let Some(start) = rest.find('{') {
            out.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            // Placeholders were checked in new()
            let end = after.find('}').unwrap_or(after.len());
            let name = &after[..end];
            out.push_str(values.get(name).copied().unwrap_or_default());
            rest = after.get(end + 1..).unwrap_or_default();
        }
        out.push_str(rest);
        Ok(out)
    }
}

impl Default for OverlayTemplate {
    fn default() -> Self {
        Self {
            raw: DEFAULT_OVERLAY_TEMPLATE.to_string(),
        }
    }
}

fn check_label(label: &str) -> Result<()> {
    if label.is_empty()
        || !label
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == ' ' || c == '_' || c == '-')
    {
        return Err(FeedwatchError::InvalidOverlay(format!(
            "label {:?} must be non-empty and use only [A-Za-z0-9 _-]",
            label
        )));
    }
    Ok(())
}

fn check_font(font: &str) -> Result<()> {
    if font.is_empty() || font.contains(['\'', ':', ';', '\\', '[', ']']) {
        return Err(FeedwatchError::InvalidOverlay(format!(
            "font path {:?} contains characters not allowed in a filter option",
            font
        )));
    }
    Ok(())
}

/// A program and its arguments, ready to spawn
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandSpec {
    /// Async command with stdin closed and stdout discarded; caller decides stderr
    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::null());
        cmd
    }
}

impl std::fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.program)?;
        for arg in &self.args {
            if arg.contains([' ', '\'', ';', '[']) {
                write!(f, " \"{}\"", arg)?;
            } else {
                write!(f, " {}", arg)?;
            }
        }
        Ok(())
    }
}

/// Builds probe and worker invocations from configuration
#[derive(Debug, Clone)]
pub struct ToolCommands {
    config: AppConfig,
    template: OverlayTemplate,
}

impl ToolCommands {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let template = match &config.tool.overlay_template {
            Some(raw) => OverlayTemplate::new(raw)?,
            None => OverlayTemplate::default(),
        };
        check_font(&config.tool.font_path)?;
        Ok(Self {
            config: config.clone(),
            template,
        })
    }

    /// Short diagnostic read of the feed's input. Logs at info so the input
    /// dump reaches stderr.
    pub fn probe(&self, feed: &Feed) -> CommandSpec {
        let probe = &self.config.probe;
        CommandSpec {
            program: self.config.tool.ffmpeg_path.clone(),
            args: vec![
                "-hide_banner".to_string(),
                "-nostats".to_string(),
                "-rw_timeout".to_string(),
                probe.rw_timeout_us.to_string(),
                "-i".to_string(),
                self.config.endpoints.input_url(feed),
                "-v".to_string(),
                "info".to_string(),
                "-t".to_string(),
                probe.duration_secs.to_string(),
                "-f".to_string(),
                "null".to_string(),
                "null".to_string(),
            ],
        }
    }

    /// Long-running overlay transcode from the feed's input to its output
    pub fn worker(&self, feed: &Feed) -> Result<CommandSpec> {
        let tool = &self.config.tool;
        let profile = &self.config.profile;
        let graph = self
            .template
            .render(feed.label(), &tool.font_path, profile.overlay_width)?;

        let rw_timeout = self.config.probe.rw_timeout_us.to_string();
        let gop = profile.gop.to_string();
        let input = self.config.endpoints.input_url(feed);
        let output = self.config.endpoints.output_url(feed);

        let args: Vec<String> = vec![
            "-fflags",
            "+genpts+discardcorrupt",
            "-rw_timeout",
            rw_timeout.as_str(),
            "-analyzeduration",
            "1000000",
            "-probesize",
            "1000000",
            "-i",
            input.as_str(),
            "-err_detect",
            "ignore_err",
            "-ignore_loop",
            "0",
            "-i",
            tool.overlay_asset.as_str(),
            "-filter_complex",
            graph.as_str(),
            "-map",
            "[outv]",
            "-an",
            "-c:v",
            "libx264",
            "-preset",
            "ultrafast",
            "-tune",
            "zerolatency",
            "-g",
            gop.as_str(),
            "-b:v",
            profile.bitrate.as_str(),
            "-f",
            "rtsp",
            "-rtsp_transport",
            "tcp",
            "-muxdelay",
            "0.1",
            "-muxpreload",
            "0",
            output.as_str(),
        ]
        .into_iter()
        .map(String::from)
        .collect();

        Ok(CommandSpec {
            program: tool.ffmpeg_path.clone(),
            args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_template_renders_label_and_font() {
        let graph = OverlayTemplate::default()
            .render("VANT-3", "/fonts/Bold.ttf", 200)
            .unwrap();
        assert!(graph.contains("drawtext=text='VANT-3'"));
        assert!(graph.contains("fontfile='/fonts/Bold.ttf'"));
        assert!(graph.contains("scale=200:-1"));
        assert!(graph.contains("x=10+((200-text_w)/2)"));
        assert!(graph.ends_with("enable='lt(mod(t\\,2)\\,1)'[outv]"));
        assert!(!graph.contains('{'));
    }

    #[test]
    fn test_unsafe_label_rejected() {
        let template = OverlayTemplate::default();
        assert!(template.render("VANT'1", "/f.ttf", 200).is_err());
        assert!(template.render("A:B", "/f.ttf", 200).is_err());
        assert!(template.render("", "/f.ttf", 200).is_err());
        assert!(template.render("A", "/f'.ttf", 200).is_err());
    }

    #[test]
    fn test_substituted_values_not_rescanned() {
        let template = OverlayTemplate::new("{label}|{font}").unwrap();
        // A label containing a placeholder name must come out verbatim
        let out = template.render("font", "/x.ttf", 1).unwrap();
        assert_eq!(out, "font|/x.ttf");
    }

    #[test]
    fn test_unknown_placeholder_rejected() {
        assert!(OverlayTemplate::new("text='{name}'").is_err());
        assert!(OverlayTemplate::new("text='{label'").is_err());
    }

    #[test]
    fn test_worker_command_profile() {
        let mut cfg = AppConfig::default();
        cfg.endpoints.output_suffix = "_ov".to_string();
        let commands = ToolCommands::new(&cfg).unwrap();
        let feed = Feed::new("vant1").unwrap();

        let spec = commands.worker(&feed).unwrap();
        assert_eq!(spec.program, "/usr/bin/ffmpeg");
        assert_eq!(spec.args.last().unwrap(), "rtsp://localhost:8554/vant1_ov");

        let pos = |flag: &str| spec.args.iter().position(|a| a == flag).unwrap();
        assert_eq!(spec.args[pos("-g") + 1], "30");
        assert_eq!(spec.args[pos("-b:v") + 1], "3000k");
        assert_eq!(spec.args[pos("-tune") + 1], "zerolatency");
        assert_eq!(spec.args[pos("-i") + 1], "rtmp://localhost:1935/cov/vant1");
        assert!(spec.args[pos("-filter_complex") + 1].contains("'VANT-1'"));
    }

    #[test]
    fn test_probe_command() {
        let commands = ToolCommands::new(&AppConfig::default()).unwrap();
        let feed = Feed::new("vant4").unwrap();
        let spec = commands.probe(&feed);

        assert_eq!(
            spec.args,
            vec![
                "-hide_banner",
                "-nostats",
                "-rw_timeout",
                "5000000",
                "-i",
                "rtmp://localhost:1935/cov/vant4",
                "-v",
                "info",
                "-t",
                "3",
                "-f",
                "null",
                "null"
            ]
        );
    }

    #[test]
    fn test_custom_template_from_config() {
        let mut cfg = AppConfig::default();
        cfg.tool.overlay_template = Some("[0:v]drawtext=text='{label}'[outv]".to_string());
        let commands = ToolCommands::new(&cfg).unwrap();
        let spec = commands.worker(&Feed::new("north").unwrap()).unwrap();
        assert!(spec.args.contains(&"[0:v]drawtext=text='NORTH'[outv]".to_string()));
    }
}
