//! Pipeline supervisor owning the single background worker that runs an
//! opaque, blocking pipeline.
//!
//! The worker builds the pipeline, applies its configuration, reports the
//! outcome back to [`PipelineSupervisor::start`] over a one-shot channel and
//! then blocks inside [`Pipeline::run`]. When `run` comes back (or panics) the
//! worker closes the parameter channel, moves the state to
//! [`SupervisorState::Stopped`] and emits exactly one [`Completion`].
//!
//! Stopping is cooperative only. [`PipelineSupervisor::request_stop`] raises
//! the pump's stop flag and detaches the control surface, but it cannot
//! preempt `run`; only [`PipelineSupervisor::await_stop`] waits for the worker
//! to exit.

use std::{
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::{
    error::{ConfigError, StartupError},
    pipeline::{
        channel::{ParameterChannel, ParameterPump},
        collaborator::{ConfigSource, Pipeline},
        heartbeat::PumpHeartbeat,
        telemetry,
    },
};

/// Name given to the worker thread running the pipeline.
pub const WORKER_THREAD_NAME: &str = "pipeline-worker";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
/// Lifecycle of the supervised worker.
pub enum SupervisorState {
    /// No worker has been started, or the last start failed.
    #[default]
    Idle,
    /// Worker spawned, configuration not yet applied.
    Starting,
    /// Worker is inside `run`.
    Running,
    /// Stop requested; the worker may still be inside `run`.
    StopRequested,
    /// Worker exited.
    Stopped,
}

impl SupervisorState {
    /// Human readable label used in log messages and metrics.
    pub fn label(self) -> &'static str {
        match self {
            SupervisorState::Idle => "idle",
            SupervisorState::Starting => "starting",
            SupervisorState::Running => "running",
            SupervisorState::StopRequested => "stop-requested",
            SupervisorState::Stopped => "stopped",
        }
    }

    /// Whether a worker currently holds the pipeline.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SupervisorState::Starting | SupervisorState::Running | SupervisorState::StopRequested
        )
    }

    fn gauge_value(self) -> f64 {
        match self {
            SupervisorState::Idle => 0.0,
            SupervisorState::Starting => 1.0,
            SupervisorState::Running => 2.0,
            SupervisorState::StopRequested => 3.0,
            SupervisorState::Stopped => 4.0,
        }
    }
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// How the worker left `run`.
pub enum CompletionKind {
    /// `run` returned. A graceful exit and an internal failure look the same.
    Returned,
    /// `run` panicked; the payload message is kept when it was a string.
    Panicked { message: String },
}

#[derive(Clone, Debug, PartialEq, Eq)]
/// Notification emitted once per run when the worker exits.
pub struct Completion {
    pub kind: CompletionKind,
    /// Whether a stop had been requested before the worker exited.
    pub stop_requested: bool,
    /// Visibility updates forwarded to the pipeline during the run.
    pub updates_applied: u64,
    pub run_time: Duration,
}

impl Completion {
    pub fn panicked(&self) -> bool {
        matches!(self.kind, CompletionKind::Panicked { .. })
    }
}

#[derive(Debug, Default)]
struct StateCell {
    state: Mutex<SupervisorState>,
    exited: Condvar,
}

impl StateCell {
    fn lock(&self) -> MutexGuard<'_, SupervisorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Owns the lifecycle of exactly one background pipeline worker.
///
/// All operations take `&self`, so the supervisor can be shared between the
/// control-surface thread and signal handlers behind an `Arc`.
pub struct PipelineSupervisor {
    channel: ParameterChannel,
    cell: Arc<StateCell>,
    stop: Arc<AtomicBool>,
    heartbeat: Arc<PumpHeartbeat>,
    worker: Mutex<Option<thread::JoinHandle<()>>>,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
}

impl PipelineSupervisor {
    /// Create an idle supervisor sharing `channel` with the control surface.
    pub fn new(channel: ParameterChannel) -> Self {
        let (completion_tx, completion_rx) = crossbeam_channel::unbounded();
        Self {
            channel,
            cell: Arc::new(StateCell::default()),
            stop: Arc::new(AtomicBool::new(false)),
            heartbeat: Arc::new(PumpHeartbeat::new()),
            worker: Mutex::new(None),
            completion_tx,
            completion_rx,
        }
    }

    /// Build the pipeline on a dedicated worker, configure it and enter `run`.
    ///
    /// Blocks until the configuration outcome is known. Fails when a worker is
    /// already active, when configuration fails, or when the worker cannot be
    /// spawned; in the last two cases the supervisor returns to `Idle`.
    pub fn start<P, F>(&self, source: ConfigSource, factory: F) -> Result<(), StartupError>
    where
        P: Pipeline + 'static,
        F: FnOnce() -> P + Send + 'static,
    {
        let mut worker_slot = self.lock_worker();
        {
            let mut state = self.cell.lock();
            if state.is_active() {
                warn!(state = %*state, "rejecting start: pipeline already active");
                return Err(StartupError::AlreadyActive { state: *state });
            }
            *state = SupervisorState::Starting;
            metrics::gauge!("vision_supervisor_state").set(state.gauge_value());
        }

        if let Some(previous) = worker_slot.take() {
            let _ = previous.join();
        }

        self.stop.store(false, Ordering::SeqCst);
        self.heartbeat.reset();
        self.channel.reopen();

        let span = tracing::info_span!("pipeline.start", source = %source);
        let _span_guard = span.enter();

        let (init_tx, init_rx) = crossbeam_channel::bounded::<Result<(), ConfigError>>(1);
        let worker = Worker {
            source,
            cell: self.cell.clone(),
            channel: self.channel.clone(),
            pump: ParameterPump::attached(
                self.channel.clone(),
                self.stop.clone(),
                self.heartbeat.clone(),
            ),
            init_tx,
            completion_tx: self.completion_tx.clone(),
        };

        let handle = match telemetry::spawn_thread(WORKER_THREAD_NAME, move || worker.run(factory))
        {
            Ok(handle) => handle,
            Err(err) => {
                error!("failed to spawn pipeline worker: {err}");
                self.channel.close();
                self.set_state(SupervisorState::Idle);
                return Err(StartupError::Spawn(err));
            }
        };

        match init_rx.recv() {
            Ok(Ok(())) => {
                *worker_slot = Some(handle);
                metrics::counter!("vision_pipeline_runs_total").increment(1);
                info!("pipeline worker started");
                Ok(())
            }
            Ok(Err(err)) => {
                let _ = handle.join();
                self.channel.close();
                self.set_state(SupervisorState::Idle);
                warn!("pipeline configuration failed: {err}");
                Err(StartupError::Configure(err))
            }
            Err(_) => {
                let _ = handle.join();
                self.channel.close();
                self.set_state(SupervisorState::Idle);
                error!("pipeline worker exited before reporting configuration");
                Err(StartupError::WorkerLost)
            }
        }
    }

    /// Ask the pipeline to stop and detach the control surface from it.
    ///
    /// Never blocks and never fails. The worker keeps running until the
    /// pipeline leaves `run` on its own; pipelines that watch
    /// [`ParameterPump::stop_requested`] do so promptly, opaque ones only when
    /// their own window is closed.
    pub fn request_stop(&self) {
        let mut state = self.cell.lock();
        match *state {
            SupervisorState::Starting | SupervisorState::Running => {
                *state = SupervisorState::StopRequested;
                metrics::gauge!("vision_supervisor_state").set(state.gauge_value());
                drop(state);
                self.stop.store(true, Ordering::SeqCst);
                self.channel.close();
                info!("stop requested; waiting for the pipeline to leave its run loop");
            }
            other => {
                debug!(state = %other, "stop request ignored");
            }
        }
    }

    /// Block until the worker has fully exited. No timeout.
    ///
    /// Returns immediately when no worker is active. Once this returns the
    /// pipeline has been dropped and will not be called again.
    pub fn await_stop(&self) {
        let handle = self.lock_worker().take();
        if let Some(handle) = handle {
            debug!("joining pipeline worker");
            if handle.join().is_err() {
                error!("pipeline worker terminated abnormally");
            }
        }

        let mut state = self.cell.lock();
        while state.is_active() {
            state = self
                .cell
                .exited
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn state(&self) -> SupervisorState {
        *self.cell.lock()
    }

    /// Whether a worker currently holds the pipeline.
    pub fn is_running(&self) -> bool {
        self.state().is_active()
    }

    /// Receiver on which one [`Completion`] arrives per run.
    pub fn completions(&self) -> Receiver<Completion> {
        self.completion_rx.clone()
    }

    /// Polling liveness of the current run.
    pub fn heartbeat(&self) -> Arc<PumpHeartbeat> {
        self.heartbeat.clone()
    }

    /// Channel shared with the control surface.
    pub fn channel(&self) -> &ParameterChannel {
        &self.channel
    }

    fn set_state(&self, next: SupervisorState) {
        let mut state = self.cell.lock();
        *state = next;
        metrics::gauge!("vision_supervisor_state").set(next.gauge_value());
        self.cell.exited.notify_all();
    }

    fn lock_worker(&self) -> MutexGuard<'_, Option<thread::JoinHandle<()>>> {
        self.worker.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for PipelineSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineSupervisor")
            .field("state", &self.state())
            .field("stop_requested", &self.stop.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl Drop for PipelineSupervisor {
    fn drop(&mut self) {
        self.request_stop();
        let handle = self
            .worker
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            if handle.is_finished() {
                let _ = handle.join();
            } else {
                warn!("supervisor dropped while the pipeline is still running; detaching worker");
            }
        }
    }
}

/// State moved onto the worker thread.
struct Worker {
    source: ConfigSource,
    cell: Arc<StateCell>,
    channel: ParameterChannel,
    pump: ParameterPump,
    init_tx: Sender<Result<(), ConfigError>>,
    completion_tx: Sender<Completion>,
}

impl Worker {
    fn run<P, F>(self, factory: F)
    where
        P: Pipeline,
        F: FnOnce() -> P,
    {
        let span = tracing::info_span!("pipeline.worker", source = %self.source);
        let _span_guard = span.enter();

        let mut pipeline = factory();
        if let Err(err) = pipeline.configure(&self.source) {
            let _ = self.init_tx.send(Err(err));
            return;
        }

        {
            let mut state = self.cell.lock();
            if *state == SupervisorState::Starting {
                *state = SupervisorState::Running;
                metrics::gauge!("vision_supervisor_state").set(state.gauge_value());
            }
        }
        if self.init_tx.send(Ok(())).is_err() {
            warn!("supervisor stopped listening before the pipeline started");
        }
        drop(self.init_tx);

        info!("entering pipeline run loop");
        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| pipeline.run(&self.pump)));
        drop(pipeline);

        let kind = match outcome {
            Ok(()) => CompletionKind::Returned,
            Err(payload) => CompletionKind::Panicked {
                message: panic_message(payload.as_ref()),
            },
        };
        let completion = Completion {
            kind,
            stop_requested: self.pump.stop_requested(),
            updates_applied: self.pump.applied(),
            run_time: started.elapsed(),
        };

        {
            let mut state = self.cell.lock();
            self.channel.close();
            *state = SupervisorState::Stopped;
            metrics::gauge!("vision_supervisor_state").set(state.gauge_value());
            self.cell.exited.notify_all();
        }

        match &completion.kind {
            CompletionKind::Returned => {
                metrics::counter!("vision_pipeline_completions_total", "kind" => "returned")
                    .increment(1);
                info!(
                    stop_requested = completion.stop_requested,
                    updates = completion.updates_applied,
                    "pipeline run loop returned after {:.1?}",
                    completion.run_time
                );
            }
            CompletionKind::Panicked { message } => {
                metrics::counter!("vision_pipeline_completions_total", "kind" => "panicked")
                    .increment(1);
                error!("pipeline panicked after {:.1?}: {message}", completion.run_time);
            }
        }

        let _ = self.completion_tx.send(completion);
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(!SupervisorState::Idle.is_active());
        assert!(SupervisorState::Starting.is_active());
        assert!(SupervisorState::Running.is_active());
        assert!(SupervisorState::StopRequested.is_active());
        assert!(!SupervisorState::Stopped.is_active());
    }

    #[test]
    fn test_new_supervisor_is_idle_and_stops_trivially() {
        let supervisor = PipelineSupervisor::new(ParameterChannel::new());
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        supervisor.request_stop();
        supervisor.await_stop();
        assert_eq!(supervisor.state(), SupervisorState::Idle);
        assert!(supervisor.completions().try_recv().is_err());
    }

    #[test]
    fn test_panic_message_extraction() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(payload.as_ref()), "boom");
        let payload: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        assert_eq!(panic_message(payload.as_ref()), "bang");
        let payload: Box<dyn std::any::Any + Send> = Box::new(7_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
