mod config;
mod console;
mod simulated;
mod surface;

use std::{
    io,
    sync::{Arc, Once},
    time::Duration,
};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};
use vision_control::{ParameterChannel, PipelineSupervisor, pipeline::telemetry};

use crate::{
    config::{AppArgs, AppConfig},
    console::{ConsoleExit, InterruptAction, InterruptRelay},
    simulated::{PipelineWindow, SimulatedPoseApp},
    surface::ControlSurface,
};

static CTRL_HANDLER: Once = Once::new();

/// How long a detached exit waits for a cooperative pipeline to finish.
const DETACH_GRACE: Duration = Duration::from_secs(2);

fn main() {
    if let Err(err) = run() {
        eprintln!("{err:?}");
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let config = AppConfig::try_from(AppArgs::parse())?;
    let _telemetry = telemetry::enter_runtime(&config.telemetry);

    let supervisor = Arc::new(PipelineSupervisor::new(ParameterChannel::new()));
    let mut surface = ControlSurface::new(supervisor.clone(), config.initial.clone());

    let capture = config.capture;
    let window = PipelineWindow::new();
    let pipeline_window = window.clone();
    supervisor
        .start(config.config_source.clone(), move || {
            SimulatedPoseApp::new(capture, pipeline_window)
        })
        .with_context(|| {
            format!(
                "failed to start the pose pipeline from {}",
                config.config_source
            )
        })?;
    info!(source = capture.label(), "pose pipeline running");

    let (interrupt_tx, interrupt_rx) = crossbeam_channel::bounded(1);
    let relay = InterruptRelay::new(window.clone(), interrupt_tx);
    CTRL_HANDLER.call_once(move || {
        if let Err(err) = ctrlc::set_handler(move || {
            if relay.on_interrupt() == InterruptAction::ForceExit {
                eprintln!("interrupted again; exiting without waiting for the pipeline");
                std::process::exit(130);
            }
        }) {
            warn!("Failed to install Ctrl+C handler: {err}");
        }
    });

    let (lines_tx, lines_rx) = crossbeam_channel::unbounded();
    console::spawn_input_reader(lines_tx).context("failed to spawn console reader")?;

    let exit = console::run_console(
        &mut surface,
        &window,
        lines_rx,
        interrupt_rx,
        config.stale_after,
        &mut io::stdout(),
    )
    .context("console output failed")?;

    match exit {
        ConsoleExit::Closed | ConsoleExit::Escaped => {}
        ConsoleExit::EndOfInput | ConsoleExit::Interrupted => {
            if !surface.settle(DETACH_GRACE) {
                warn!(
                    "pipeline still inside its run loop after {DETACH_GRACE:?}; exiting without it"
                );
            }
        }
    }
    match surface.last_completion() {
        Some(completion) => info!(
            ?exit,
            stop_requested = completion.stop_requested,
            updates = completion.updates_applied,
            "control surface closed after the pipeline finished"
        ),
        None => info!(?exit, "control surface closed"),
    }

    if config.telemetry.prometheus {
        if let Some(handle) = telemetry::prometheus_handle() {
            println!("{}", handle.render());
        }
    }
    Ok(())
}
