//! Control-channel plumbing between a control surface and one blocking
//! pipeline worker.

pub mod channel;
pub mod collaborator;
pub mod config;
pub mod heartbeat;
pub mod supervisor;
pub mod telemetry;
