//! Simulator errors

use ecusim_transport::TransportError;
use thiserror::Error;

use crate::cases::CaseTableError;
use crate::config::ConfigError;

/// Operator command rejected by the mode controller
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModeError {
    /// The controller was terminated; no further commands are accepted
    #[error("Simulator is terminated")]
    Terminated,

    #[error("Unknown job '{0}'")]
    UnknownJob(String),

    #[error("Job '{0}' has no override configured")]
    NoOverride(String),
}

/// Startup failures; all of them are fatal
#[derive(Debug, Error)]
pub enum SimError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Case table error: {0}")]
    Cases(#[from] CaseTableError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}
