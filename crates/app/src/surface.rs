//! Checkbox state for the overlay toggles and the close/escape handling of the
//! control window.

use std::{
    fmt,
    io::{self, Write},
    sync::Arc,
    time::Duration,
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use tracing::{error, info, warn};
use vision_control::{
    Completion, CompletionKind, OverlayLabel, PipelineSupervisor, SupervisorState, VisibilitySet,
};

/// Printed when the control window is closed while the pipeline may still be
/// showing its own window.
pub const CLOSE_NOTICE: &str =
    "Note: To close this application, please close the pipeline window first.";

#[derive(Clone, Debug, PartialEq, Eq)]
/// Result of a checkbox change.
pub enum ToggleOutcome {
    /// The full checked set was handed to the pipeline.
    Published(VisibilitySet),
    /// The pipeline is no longer running; only local state changed.
    Detached,
}

#[derive(Clone, Debug)]
/// Snapshot rendered by the `status` command.
pub struct SurfaceStatus {
    pub state: SupervisorState,
    pub checked: VisibilitySet,
    pub polls: u64,
    /// Set when the running pipeline has not polled within the threshold.
    pub stale_for: Option<Duration>,
    pub last_completion: Option<Completion>,
}

impl fmt::Display for SurfaceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "pipeline {} | overlays {} | polls {}",
            self.state, self.checked, self.polls
        )?;
        if let Some(stale) = self.stale_for {
            write!(f, " | no poll for {stale:.1?}")?;
        }
        if let Some(completion) = &self.last_completion {
            match &completion.kind {
                CompletionKind::Returned => {
                    write!(f, " | exited after {:.1?}", completion.run_time)?
                }
                CompletionKind::Panicked { message } => write!(
                    f,
                    " | panicked after {:.1?}: {message}",
                    completion.run_time
                )?,
            }
        }
        Ok(())
    }
}

/// Control window state bound to one supervised pipeline.
pub struct ControlSurface {
    supervisor: Arc<PipelineSupervisor>,
    completions: Receiver<Completion>,
    checked: VisibilitySet,
    last_completion: Option<Completion>,
}

impl ControlSurface {
    /// Bind to `supervisor` and publish the initial checkbox state so the
    /// pipeline and the window agree from the first frame.
    pub fn new(supervisor: Arc<PipelineSupervisor>, initial: VisibilitySet) -> Self {
        let completions = supervisor.completions();
        let surface = Self {
            supervisor,
            completions,
            checked: initial,
            last_completion: None,
        };
        if !surface.supervisor.channel().publish(surface.checked.clone()) {
            warn!("initial overlay state not delivered: pipeline already detached");
        }
        surface
    }

    pub fn checked(&self) -> &VisibilitySet {
        &self.checked
    }

    pub fn supervisor(&self) -> &PipelineSupervisor {
        &self.supervisor
    }

    /// Receiver the console selects on to learn about pipeline exit.
    pub fn completions(&self) -> &Receiver<Completion> {
        &self.completions
    }

    pub fn last_completion(&self) -> Option<&Completion> {
        self.last_completion.as_ref()
    }

    pub fn toggle(&mut self, label: OverlayLabel) -> ToggleOutcome {
        self.checked.toggle(label);
        self.publish()
    }

    pub fn set(&mut self, label: OverlayLabel, on: bool) -> ToggleOutcome {
        self.checked.set(label, on);
        self.publish()
    }

    pub fn set_all(&mut self, on: bool) -> ToggleOutcome {
        self.checked = if on {
            VisibilitySet::all()
        } else {
            VisibilitySet::empty()
        };
        self.publish()
    }

    fn publish(&self) -> ToggleOutcome {
        if self.supervisor.channel().publish(self.checked.clone()) {
            ToggleOutcome::Published(self.checked.clone())
        } else {
            ToggleOutcome::Detached
        }
    }

    /// Window-close path: print the notice, then stop and wait for the
    /// pipeline to exit.
    pub fn close(&mut self, out: &mut dyn Write) -> io::Result<()> {
        writeln!(out, "{CLOSE_NOTICE}")?;
        out.flush()?;
        info!("control window closed");
        self.shutdown();
        Ok(())
    }

    /// Escape path: stop and wait without the notice.
    pub fn escape(&mut self) {
        info!("escape pressed");
        self.shutdown();
    }

    /// Request a stop without waiting for the pipeline.
    pub fn detach(&self) {
        self.supervisor.request_stop();
    }

    /// Wait up to `timeout` for the pipeline to report its exit.
    ///
    /// Returns whether the pipeline has exited.
    pub fn settle(&mut self, timeout: Duration) -> bool {
        if self.poll_completion().is_some() {
            return true;
        }
        match self.supervisor.state() {
            SupervisorState::Idle => return true,
            SupervisorState::Stopped if self.last_completion.is_some() => return true,
            _ => {}
        }
        match self.completions.recv_timeout(timeout) {
            Ok(completion) => {
                self.note_completion(completion);
                true
            }
            Err(RecvTimeoutError::Timeout) => false,
            Err(RecvTimeoutError::Disconnected) => true,
        }
    }

    /// Non-blocking check for a pipeline exit since the last poll.
    pub fn poll_completion(&mut self) -> Option<&Completion> {
        let completion = self.completions.try_recv().ok()?;
        Some(self.note_completion(completion))
    }

    /// Record a completion received from [`ControlSurface::completions`].
    pub fn note_completion(&mut self, completion: Completion) -> &Completion {
        match &completion.kind {
            CompletionKind::Returned if completion.stop_requested => {
                info!("pipeline stopped on request");
            }
            CompletionKind::Returned => {
                info!("pipeline exited on its own; overlay toggles are detached");
            }
            CompletionKind::Panicked { message } => {
                error!("pipeline crashed: {message}");
            }
        }
        self.last_completion.insert(completion)
    }

    pub fn status(&self, stale_after: Duration) -> SurfaceStatus {
        let state = self.supervisor.state();
        let heartbeat = self.supervisor.heartbeat();
        SurfaceStatus {
            state,
            checked: self.checked.clone(),
            polls: heartbeat.beats(),
            stale_for: if state == SupervisorState::Running {
                heartbeat.stale_for(stale_after)
            } else {
                None
            },
            last_completion: self.last_completion.clone(),
        }
    }

    fn shutdown(&mut self) {
        self.supervisor.request_stop();
        self.supervisor.await_stop();
        self.poll_completion();
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use vision_control::{ConfigSource, ParameterChannel};

    use super::*;
    use crate::{
        config::CaptureSource,
        simulated::{PipelineWindow, SimulatedPoseApp},
    };

    const WAIT: Duration = Duration::from_secs(5);

    fn config_file(body: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(body.as_bytes()).unwrap();
        file
    }

    fn started(body: &str) -> (ControlSurface, tempfile::NamedTempFile) {
        let file = config_file(body);
        let supervisor = Arc::new(PipelineSupervisor::new(ParameterChannel::new()));
        let surface = ControlSurface::new(supervisor.clone(), VisibilitySet::all());
        supervisor
            .start(ConfigSource::new(file.path()), || {
                SimulatedPoseApp::new(CaptureSource::V4l2, PipelineWindow::new())
            })
            .unwrap();
        (surface, file)
    }

    #[test]
    fn test_initial_state_is_published_before_start() {
        let supervisor = Arc::new(PipelineSupervisor::new(ParameterChannel::new()));
        let surface = ControlSurface::new(supervisor.clone(), VisibilitySet::all());
        assert_eq!(surface.checked(), &VisibilitySet::all());
        assert_eq!(supervisor.channel().try_take(), Some(VisibilitySet::all()));
    }

    #[test]
    fn test_toggles_publish_full_set() {
        let supervisor = Arc::new(PipelineSupervisor::new(ParameterChannel::new()));
        let mut surface = ControlSurface::new(supervisor.clone(), VisibilitySet::all());

        assert_eq!(
            surface.toggle(OverlayLabel::Boxes),
            ToggleOutcome::Published(VisibilitySet::from([OverlayLabel::BodyPose]))
        );
        assert_eq!(
            surface.set(OverlayLabel::BodyPose, false),
            ToggleOutcome::Published(VisibilitySet::empty())
        );
        assert_eq!(
            surface.set_all(true),
            ToggleOutcome::Published(VisibilitySet::all())
        );
        assert_eq!(supervisor.channel().try_take(), Some(VisibilitySet::all()));
    }

    #[test]
    fn test_escape_stops_cooperative_pipeline_and_detaches_toggles() {
        let (mut surface, _file) = started(r#"{ "frame_rate": 240, "honor_stop": true }"#);
        assert_eq!(surface.supervisor().state(), SupervisorState::Running);

        surface.escape();

        assert_eq!(surface.supervisor().state(), SupervisorState::Stopped);
        let completion = surface.last_completion().cloned().unwrap();
        assert!(completion.stop_requested);
        assert_eq!(surface.toggle(OverlayLabel::Boxes), ToggleOutcome::Detached);
        assert_eq!(
            surface.checked(),
            &VisibilitySet::from([OverlayLabel::BodyPose])
        );
    }

    #[test]
    fn test_close_prints_notice_before_waiting() {
        let (mut surface, _file) = started(r#"{ "frame_rate": 240, "honor_stop": true }"#);
        let mut out = Vec::new();

        surface.close(&mut out).unwrap();

        assert_eq!(String::from_utf8(out).unwrap(), format!("{CLOSE_NOTICE}\n"));
        assert_eq!(surface.supervisor().state(), SupervisorState::Stopped);
    }

    #[test]
    fn test_pipeline_exit_is_noticed_and_reported() {
        let (mut surface, _file) = started(r#"{ "frame_rate": 240, "max_frames": 3 }"#);

        assert!(surface.settle(WAIT));
        let completion = surface.last_completion().cloned().unwrap();
        assert!(!completion.stop_requested);
        assert_eq!(completion.kind, CompletionKind::Returned);
        assert!(surface.poll_completion().is_none());

        assert_eq!(
            surface.set(OverlayLabel::Boxes, false),
            ToggleOutcome::Detached
        );
        let status = surface.status(Duration::from_millis(10));
        assert_eq!(status.state, SupervisorState::Stopped);
        assert_eq!(status.stale_for, None);
        assert!(status.to_string().contains("exited after"));

        // Closing after the pipeline already exited returns at once.
        surface.close(&mut Vec::new()).unwrap();
        assert_eq!(surface.supervisor().state(), SupervisorState::Stopped);
    }

    #[test]
    fn test_detach_does_not_wait() {
        let (mut surface, _file) = started(r#"{ "frame_rate": 240 }"#);
        surface.detach();
        assert_eq!(surface.supervisor().state(), SupervisorState::StopRequested);
        assert!(!surface.settle(Duration::from_millis(50)));
    }
}
