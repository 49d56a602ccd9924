//! Stand-in for the body pose estimation application.
//!
//! Paces a frame loop at the configured rate, forwards overlay visibility
//! updates once per frame and keeps per-overlay draw counts in place of real
//! rendering.

use std::{
    fs, io,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use serde::Deserialize;
use tracing::{debug, info, warn};
use vision_control::{
    ConfigError, ConfigSource, OverlayLabel, ParameterPump, Pipeline, VisibilitySet,
};

use crate::config::CaptureSource;

/// Length of the bundled clip played by the replayer source.
pub const REPLAY_LENGTH_FRAMES: u64 = 900;
const MAX_FRAME_RATE: u32 = 240;
const HEARTBEAT_EVERY_FRAMES: u64 = 30;

fn default_frame_rate() -> u32 {
    30
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
/// Contents of the pipeline configuration file.
pub struct SimulationSettings {
    #[serde(default = "default_frame_rate")]
    pub frame_rate: u32,
    /// Stop after this many frames. Unset means the source decides.
    #[serde(default)]
    pub max_frames: Option<u64>,
    /// Leave the run loop when the control surface requests a stop.
    #[serde(default)]
    pub honor_stop: bool,
}

impl SimulationSettings {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.frame_rate == 0 || self.frame_rate > MAX_FRAME_RATE {
            return Err(ConfigError::Invalid(format!(
                "frame_rate must be between 1 and {MAX_FRAME_RATE}, got {}",
                self.frame_rate
            )));
        }
        if self.max_frames == Some(0) {
            return Err(ConfigError::Invalid("max_frames must be positive".into()));
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
/// Frames produced and overlays drawn so far.
pub struct FrameStats {
    pub frames: u64,
    pub boxes_drawn: u64,
    pub poses_drawn: u64,
}

/// Handle to the pipeline's display window.
///
/// Closing it ends the run loop whether or not the pipeline honours stop
/// requests, the same way closing the real application's window does.
#[derive(Clone, Debug, Default)]
pub struct PipelineWindow {
    closed: Arc<AtomicBool>,
}

impl PipelineWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` when this call closed an open window.
    pub fn close(&self) -> bool {
        !self.closed.swap(true, Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[derive(Debug)]
pub struct SimulatedPoseApp {
    capture: CaptureSource,
    window: PipelineWindow,
    settings: Option<SimulationSettings>,
    visible: VisibilitySet,
    stats: FrameStats,
}

impl SimulatedPoseApp {
    pub fn new(capture: CaptureSource, window: PipelineWindow) -> Self {
        Self {
            capture,
            window,
            settings: None,
            visible: VisibilitySet::all(),
            stats: FrameStats::default(),
        }
    }

    fn frame_limit(&self, settings: &SimulationSettings) -> Option<u64> {
        settings.max_frames.or(match self.capture {
            CaptureSource::Replayer => Some(REPLAY_LENGTH_FRAMES),
            CaptureSource::V4l2 => None,
        })
    }

    fn render_frame(&mut self) {
        self.stats.frames += 1;
        for label in self.visible.iter() {
            match label {
                OverlayLabel::Boxes => self.stats.boxes_drawn += 1,
                OverlayLabel::BodyPose => self.stats.poses_drawn += 1,
            }
        }
    }
}

impl Pipeline for SimulatedPoseApp {
    fn configure(&mut self, source: &ConfigSource) -> Result<(), ConfigError> {
        let path = source.as_path();
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(ConfigError::Missing {
                    path: path.to_path_buf(),
                });
            }
            Err(err) => {
                return Err(ConfigError::Other(
                    anyhow::Error::new(err).context(format!("reading {}", path.display())),
                ));
            }
        };
        let settings: SimulationSettings =
            serde_json::from_str(&raw).map_err(|err| ConfigError::Parse {
                path: path.to_path_buf(),
                source: err.into(),
            })?;
        settings.validate()?;

        info!(
            source = self.capture.label(),
            frame_rate = settings.frame_rate,
            max_frames = ?settings.max_frames,
            honor_stop = settings.honor_stop,
            "pose pipeline configured"
        );
        self.settings = Some(settings);
        Ok(())
    }

    fn run(&mut self, pump: &ParameterPump) {
        let Some(settings) = self.settings.clone() else {
            warn!("pose pipeline run without configuration");
            return;
        };
        let frame_interval = Duration::from_secs_f64(1.0 / f64::from(settings.frame_rate));
        let limit = self.frame_limit(&settings);

        loop {
            if limit.is_some_and(|limit| self.stats.frames >= limit) {
                info!(frames = self.stats.frames, "end of stream; closing display");
                break;
            }
            if self.window.is_closed() {
                info!(frames = self.stats.frames, "pipeline window closed");
                break;
            }
            if settings.honor_stop && pump.stop_requested() {
                info!(frames = self.stats.frames, "stop requested; closing display");
                break;
            }

            let start = Instant::now();
            pump.apply(self);
            self.render_frame();

            if self.stats.frames % HEARTBEAT_EVERY_FRAMES == 0 {
                debug!(
                    "Pipeline heartbeat: frame #{}, overlays {}",
                    self.stats.frames, self.visible
                );
            }

            let elapsed = start.elapsed();
            if elapsed < frame_interval {
                thread::sleep(frame_interval - elapsed);
            }
        }

        info!(
            frames = self.stats.frames,
            boxes_drawn = self.stats.boxes_drawn,
            poses_drawn = self.stats.poses_drawn,
            "pose pipeline finished"
        );
    }

    fn set_parameters(&mut self, visible: VisibilitySet) {
        if visible != self.visible {
            info!(from = %self.visible, to = %visible, "overlay visibility changed");
        }
        self.visible = visible;
    }
}
