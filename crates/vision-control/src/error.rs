//! Error types surfaced by the supervisor and by pipeline configuration.

use std::{io, path::PathBuf};

use thiserror::Error;

use crate::pipeline::supervisor::SupervisorState;

/// Failure applying a configuration source to a pipeline.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("configuration file {path:?} not found")]
    Missing { path: PathBuf },
    #[error("failed to parse configuration {path:?}")]
    Parse {
        path: PathBuf,
        #[source]
        source: anyhow::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Failure reported synchronously by [`PipelineSupervisor::start`].
///
/// [`PipelineSupervisor::start`]: crate::PipelineSupervisor::start
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("a pipeline is already active (state: {state})")]
    AlreadyActive { state: SupervisorState },
    #[error("pipeline configuration failed")]
    Configure(#[from] ConfigError),
    #[error("failed to spawn pipeline worker thread")]
    Spawn(#[source] io::Error),
    #[error("pipeline worker exited before reporting its configuration outcome")]
    WorkerLost,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_active_names_state() {
        let err = StartupError::AlreadyActive {
            state: SupervisorState::Running,
        };
        assert!(err.to_string().contains("running"));
    }

    #[test]
    fn test_configure_keeps_source() {
        let err: StartupError = ConfigError::Invalid("frame_rate must be positive".into()).into();
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(
            source.as_deref(),
            Some("invalid configuration: frame_rate must be positive")
        );
    }
}
