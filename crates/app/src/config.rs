//! Command-line configuration for the control surface.
//!
//! Translates CLI arguments into an `AppConfig` consumed by `main` without
//! re-parsing flags.

use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Result, bail};
use clap::{Parser, ValueEnum};
use vision_control::{
    ConfigSource, OverlayLabel, TelemetryOptions, VisibilitySet,
    pipeline::{config::TelemetryArgs, heartbeat::HEARTBEAT_STALE_THRESHOLD_MS},
};

/// Name of the pipeline configuration file looked up next to the executable.
pub const CONFIG_FILE_NAME: &str = "body_pose_estimation.json";
/// Copy shipped with the crate sources, used when none sits next to the binary.
pub const BUNDLED_CONFIG_PATH: &str =
    concat!(env!("CARGO_MANIFEST_DIR"), "/body_pose_estimation.json");

/// `body_pose_estimation.json` in the executable's directory, falling back to
/// the bundled copy when the binary has no config beside it.
pub fn default_config_path() -> PathBuf {
    let exe_dir = env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(Path::to_path_buf));
    resolve_config_path(exe_dir.as_deref())
}

fn resolve_config_path(exe_dir: Option<&Path>) -> PathBuf {
    exe_dir
        .map(|dir| dir.join(CONFIG_FILE_NAME))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| PathBuf::from(BUNDLED_CONFIG_PATH))
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
/// Where the pipeline acquires frames.
pub enum CaptureSource {
    /// Live V4L2 camera; the stream never ends on its own.
    V4l2,
    /// Pre-recorded clip played back once.
    Replayer,
}

impl CaptureSource {
    pub fn label(self) -> &'static str {
        match self {
            CaptureSource::V4l2 => "v4l2",
            CaptureSource::Replayer => "replayer",
        }
    }
}

/// Body pose estimation control surface.
#[derive(Debug, Parser)]
#[command(name = "pose-control", version, about)]
pub struct AppArgs {
    /// Pipeline configuration file [default: body_pose_estimation.json next to
    /// the executable].
    #[arg(long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,
    /// Frame source handed to the pipeline.
    #[arg(long = "source", value_enum, default_value_t = CaptureSource::V4l2)]
    pub source: CaptureSource,
    /// Start with an overlay unchecked (repeatable).
    #[arg(long = "hide", value_name = "LABEL")]
    pub hide: Vec<OverlayLabel>,
    /// Warn when the pipeline has not polled for updates in this long.
    #[arg(long = "stale-after-ms", value_name = "MS", default_value_t = HEARTBEAT_STALE_THRESHOLD_MS)]
    pub stale_after_ms: u64,
    #[command(flatten)]
    pub telemetry: TelemetryArgs,
}

#[derive(Clone, Debug)]
/// Settings shared by the control surface and the pipeline launch.
pub struct AppConfig {
    pub config_source: ConfigSource,
    pub capture: CaptureSource,
    /// Checkbox state at startup.
    pub initial: VisibilitySet,
    pub stale_after: Duration,
    pub telemetry: TelemetryOptions,
}

impl TryFrom<AppArgs> for AppConfig {
    type Error = anyhow::Error;

    fn try_from(args: AppArgs) -> Result<Self> {
        if args.stale_after_ms == 0 {
            bail!("--stale-after-ms must be at least 1");
        }

        let mut initial = VisibilitySet::all();
        for label in &args.hide {
            initial.remove(*label);
        }

        Ok(Self {
            config_source: ConfigSource::from(args.config.unwrap_or_else(default_config_path)),
            capture: args.source,
            initial,
            stale_after: Duration::from_millis(args.stale_after_ms),
            telemetry: args.telemetry.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> AppConfig {
        let args = AppArgs::try_parse_from(std::iter::once("pose-control").chain(args.iter().copied()))
            .unwrap();
        AppConfig::try_from(args).unwrap()
    }

    #[test]
    fn test_defaults_check_every_overlay() {
        let config = parse(&[]);
        assert_eq!(config.initial, VisibilitySet::all());
        assert_eq!(config.capture, CaptureSource::V4l2);
        assert_eq!(config.config_source.as_path(), default_config_path());
        assert_eq!(
            config.stale_after,
            Duration::from_millis(HEARTBEAT_STALE_THRESHOLD_MS)
        );
        assert_eq!(config.telemetry, TelemetryOptions::default());
    }

    #[test]
    fn test_hide_unchecks_labels() {
        let config = parse(&["--hide", "boxes", "--hide", "BODYPOSE"]);
        assert!(config.initial.is_empty());

        let config = parse(&["--hide", "bodypose"]);
        assert_eq!(config.initial, VisibilitySet::from([OverlayLabel::Boxes]));
    }

    #[test]
    fn test_unknown_label_is_rejected() {
        let result = AppArgs::try_parse_from(["pose-control", "--hide", "faces"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_source_and_telemetry_flags() {
        let config = parse(&[
            "--source",
            "replayer",
            "--config",
            "/tmp/pose.json",
            "--print-metrics",
            "--log",
            "debug",
        ]);
        assert_eq!(config.capture, CaptureSource::Replayer);
        assert_eq!(config.config_source.as_path(), Path::new("/tmp/pose.json"));
        assert!(config.telemetry.prometheus);
        assert_eq!(config.telemetry.default_filter.as_deref(), Some("debug"));
    }

    #[test]
    fn test_zero_stale_threshold_is_rejected() {
        let args = AppArgs::try_parse_from(["pose-control", "--stale-after-ms", "0"]).unwrap();
        assert!(AppConfig::try_from(args).is_err());
    }

    #[test]
    fn test_config_beside_executable_wins_over_bundled_copy() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(
            resolve_config_path(Some(dir.path())),
            PathBuf::from(BUNDLED_CONFIG_PATH)
        );

        let beside = dir.path().join(CONFIG_FILE_NAME);
        std::fs::write(&beside, "{}").unwrap();
        assert_eq!(resolve_config_path(Some(dir.path())), beside);
        assert_eq!(resolve_config_path(None), PathBuf::from(BUNDLED_CONFIG_PATH));
    }
}
