//! Capability surface a supervised pipeline must expose.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use crate::{error::ConfigError, pipeline::channel::ParameterPump, visibility::VisibilitySet};

/// External configuration artifact consumed by the pipeline at start.
///
/// The format belongs to the pipeline; the supervisor only carries the path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigSource(PathBuf);

impl ConfigSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for ConfigSource {
    fn from(path: PathBuf) -> Self {
        Self(path)
    }
}

impl From<&str> for ConfigSource {
    fn from(path: &str) -> Self {
        Self(PathBuf::from(path))
    }
}

/// Opaque long-running perception pipeline.
///
/// The pipeline is built and driven entirely on the supervisor's worker
/// thread, so implementations need not be `Send`.
pub trait Pipeline {
    /// Apply the configuration artifact. Called once, before [`Pipeline::run`].
    fn configure(&mut self, source: &ConfigSource) -> Result<(), ConfigError>;

    /// Block until the pipeline terminates on its own.
    ///
    /// Implementations poll `pump` at a cadence they control (typically once
    /// per frame); [`ParameterPump::apply`] forwards pending visibility
    /// updates into [`Pipeline::set_parameters`]. Observing
    /// [`ParameterPump::stop_requested`] is optional.
    fn run(&mut self, pump: &ParameterPump);

    /// Replace the set of overlays drawn from the next frame on.
    fn set_parameters(&mut self, visible: VisibilitySet);
}

impl<P: Pipeline + ?Sized> Pipeline for Box<P> {
    fn configure(&mut self, source: &ConfigSource) -> Result<(), ConfigError> {
        (**self).configure(source)
    }

    fn run(&mut self, pump: &ParameterPump) {
        (**self).run(pump)
    }

    fn set_parameters(&mut self, visible: VisibilitySet) {
        (**self).set_parameters(visible)
    }
}
