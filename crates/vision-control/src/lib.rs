//! Supervision of a blocking perception pipeline and the overlay-visibility
//! hand-off between a control surface and the pipeline's frame loop.
//!
//! The crate is split into focused modules:
//! - `visibility`: overlay labels and the set of labels currently shown.
//! - `pipeline::channel`: last-write-wins parameter mailbox and the
//!   pipeline-side pump that forwards updates.
//! - `pipeline::supervisor`: worker lifecycle, start/stop state machine and
//!   completion notification.
//! - `pipeline::collaborator`: the three-operation surface a pipeline exposes.
//! - `pipeline::heartbeat`: polling liveness of the pipeline.
//! - `pipeline::telemetry`: tracing subscribers and metrics recorder.
//! - `error`: startup and configuration errors.

pub mod error;
pub mod pipeline;
pub mod visibility;

pub use error::{ConfigError, StartupError};
pub use pipeline::{
    channel::{ParameterChannel, ParameterPump},
    collaborator::{ConfigSource, Pipeline},
    config::TelemetryOptions,
    heartbeat::PumpHeartbeat,
    supervisor::{Completion, CompletionKind, PipelineSupervisor, SupervisorState},
};
pub use visibility::{OverlayLabel, ParseLabelError, VisibilitySet};
