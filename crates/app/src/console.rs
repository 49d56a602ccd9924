//! Line-oriented terminal front-end driving the control surface.

use std::{
    io::{self, BufRead, Write},
    str::FromStr,
    sync::atomic::{AtomicU32, Ordering},
    thread,
    time::Duration,
};

use crossbeam_channel::{Receiver, Sender};
use thiserror::Error;
use tracing::{debug, warn};
use vision_control::{
    OverlayLabel, ParseLabelError, SupervisorState, pipeline::telemetry,
};

use crate::{
    simulated::PipelineWindow,
    surface::{ControlSurface, ToggleOutcome},
};

const HEARTBEAT_CHECK_INTERVAL: Duration = Duration::from_millis(250);
/// Ctrl+C presses after which the process exits without waiting.
pub const FORCE_EXIT_PRESSES: u32 = 2;

pub const HELP: &str = "\
commands:
  boxes | bodypose      toggle an overlay
  show <label>          check an overlay
  hide <label>          uncheck an overlay
  all | none            check or uncheck every overlay
  status                show pipeline and overlay state
  close                 close the control window and wait for the pipeline
  esc                   stop the pipeline and wait without the notice
  window                close the pipeline window, ending the pipeline
  help                  show this message
Ctrl+C closes the pipeline window and exits; press it again to exit at once.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Toggle(OverlayLabel),
    Show(OverlayLabel),
    Hide(OverlayLabel),
    All,
    None,
    Status,
    Close,
    Escape,
    CloseWindow,
    Help,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseCommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    Unknown(String),
    #[error("`{0}` expects an overlay label")]
    MissingLabel(&'static str),
    #[error(transparent)]
    Label(#[from] ParseLabelError),
}

impl FromStr for Command {
    type Err = ParseCommandError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(ParseCommandError::Empty);
        };
        let verb = verb.to_ascii_lowercase();

        let command = match verb.as_str() {
            "show" => Command::Show(label_argument(words.next(), "show")?),
            "hide" => Command::Hide(label_argument(words.next(), "hide")?),
            "all" => Command::All,
            "none" => Command::None,
            "status" => Command::Status,
            "close" => Command::Close,
            "esc" | "escape" => Command::Escape,
            "window" => Command::CloseWindow,
            "help" | "?" => Command::Help,
            other => match other.parse::<OverlayLabel>() {
                Ok(label) => Command::Toggle(label),
                Err(_) => return Err(ParseCommandError::Unknown(line.trim().to_string())),
            },
        };
        if words.next().is_some() {
            return Err(ParseCommandError::Unknown(line.trim().to_string()));
        }
        Ok(command)
    }
}

fn label_argument(
    word: Option<&str>,
    verb: &'static str,
) -> Result<OverlayLabel, ParseCommandError> {
    let word = word.ok_or(ParseCommandError::MissingLabel(verb))?;
    Ok(word.parse()?)
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
/// Why the console loop ended.
pub enum ConsoleExit {
    /// `close` command; the pipeline has exited.
    Closed,
    /// `esc` command; the pipeline has exited.
    Escaped,
    /// Stdin reached end of file; a stop was requested but not awaited.
    EndOfInput,
    /// Ctrl+C; a stop was requested but not awaited.
    Interrupted,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum InterruptAction {
    /// The pipeline window was closed and the console notified.
    Forwarded,
    /// Repeated interrupt; the caller should exit immediately.
    ForceExit,
}

/// State behind the Ctrl+C handler.
///
/// The first press closes the pipeline window, so a console blocked waiting
/// for the pipeline is released, and wakes the console loop. Later presses
/// ask for an immediate exit.
#[derive(Debug)]
pub struct InterruptRelay {
    presses: AtomicU32,
    window: PipelineWindow,
    notify: Sender<()>,
}

impl InterruptRelay {
    pub fn new(window: PipelineWindow, notify: Sender<()>) -> Self {
        Self {
            presses: AtomicU32::new(0),
            window,
            notify,
        }
    }

    pub fn on_interrupt(&self) -> InterruptAction {
        let presses = self.presses.fetch_add(1, Ordering::SeqCst) + 1;
        if presses >= FORCE_EXIT_PRESSES {
            return InterruptAction::ForceExit;
        }
        self.window.close();
        let _ = self.notify.try_send(());
        InterruptAction::Forwarded
    }
}

/// Read standard input on its own thread, one line per message.
pub fn spawn_input_reader(lines: Sender<String>) -> io::Result<thread::JoinHandle<()>> {
    telemetry::spawn_thread("console-input", move || {
        for line in io::stdin().lock().lines() {
            match line {
                Ok(line) => {
                    if lines.send(line).is_err() {
                        break;
                    }
                }
                Err(err) => {
                    warn!("failed to read from stdin: {err}");
                    break;
                }
            }
        }
    })
}

/// Drive `surface` from console lines until the window is closed, input ends
/// or an interrupt arrives.
pub fn run_console(
    surface: &mut ControlSurface,
    window: &PipelineWindow,
    lines: Receiver<String>,
    interrupt: Receiver<()>,
    stale_after: Duration,
    out: &mut dyn Write,
) -> io::Result<ConsoleExit> {
    let completions = surface.completions().clone();
    let ticker = crossbeam_channel::tick(HEARTBEAT_CHECK_INTERVAL);
    let never = crossbeam_channel::never();
    let mut interrupt_live = true;
    let mut stale_reported = false;

    writeln!(out, "overlays {}; type `help` for commands", surface.checked())?;
    loop {
        crossbeam_channel::select! {
            recv(lines) -> line => match line {
                Ok(line) => {
                    if line.trim().is_empty() {
                        continue;
                    }
                    if let Some(exit) = handle_line(surface, window, &line, stale_after, out)? {
                        return Ok(exit);
                    }
                }
                Err(_) => {
                    debug!("console input closed");
                    surface.detach();
                    return Ok(ConsoleExit::EndOfInput);
                }
            },
            recv(if interrupt_live { &interrupt } else { &never }) -> signal => match signal {
                Ok(()) => {
                    writeln!(out, "interrupted; detaching from the pipeline")?;
                    surface.detach();
                    return Ok(ConsoleExit::Interrupted);
                }
                // No Ctrl+C handler; stop watching the dropped sender.
                Err(_) => interrupt_live = false,
            },
            recv(completions) -> completion => {
                if let Ok(completion) = completion {
                    let completion = surface.note_completion(completion);
                    if completion.panicked() {
                        writeln!(out, "pipeline crashed; overlay toggles no longer apply")?;
                    } else {
                        writeln!(out, "pipeline is no longer running")?;
                    }
                }
            },
            recv(ticker) -> _ => {
                let stale = surface.status(stale_after).stale_for;
                match stale {
                    Some(elapsed) if !stale_reported => {
                        warn!("pipeline has not polled for overlay updates in {elapsed:.1?}");
                        stale_reported = true;
                    }
                    None => stale_reported = false,
                    Some(_) => {}
                }
            },
        }
    }
}

fn handle_line(
    surface: &mut ControlSurface,
    window: &PipelineWindow,
    line: &str,
    stale_after: Duration,
    out: &mut dyn Write,
) -> io::Result<Option<ConsoleExit>> {
    let command = match line.parse::<Command>() {
        Ok(command) => command,
        Err(err) => {
            writeln!(out, "{err}\n{HELP}")?;
            return Ok(None);
        }
    };

    let outcome = match command {
        Command::Toggle(label) => surface.toggle(label),
        Command::Show(label) => surface.set(label, true),
        Command::Hide(label) => surface.set(label, false),
        Command::All => surface.set_all(true),
        Command::None => surface.set_all(false),
        Command::Status => {
            writeln!(out, "{}", surface.status(stale_after))?;
            return Ok(None);
        }
        Command::Help => {
            writeln!(out, "{HELP}")?;
            return Ok(None);
        }
        Command::Close => {
            if surface.supervisor().state() != SupervisorState::Stopped {
                writeln!(
                    out,
                    "waiting for the pipeline to exit (Ctrl+C closes the pipeline window)"
                )?;
            }
            surface.close(out)?;
            return Ok(Some(ConsoleExit::Closed));
        }
        Command::Escape => {
            surface.escape();
            return Ok(Some(ConsoleExit::Escaped));
        }
        Command::CloseWindow => {
            if window.close() {
                writeln!(out, "pipeline window closed")?;
            } else {
                writeln!(out, "pipeline window already closed")?;
            }
            return Ok(None);
        }
    };

    match outcome {
        ToggleOutcome::Published(visible) => writeln!(out, "overlays {visible}")?,
        ToggleOutcome::Detached => writeln!(
            out,
            "overlays {} (pipeline is no longer running)",
            surface.checked()
        )?,
    }
    Ok(None)
}
