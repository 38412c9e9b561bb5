//! Runtime error types

use loom_core::LoomError;
use thiserror::Error;

/// Runtime errors
#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error(transparent)]
    Loom(#[from] LoomError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("telemetry setup failed: {0}")]
    Telemetry(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;
