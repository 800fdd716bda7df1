//! Error types for the grid search

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invocation failed: {0}")]
    Invocation(#[from] InvocationError),

    #[error("All workers have retired with {unresolved} grid points unresolved")]
    PoolExhausted { unresolved: usize },

    #[error("Plotter error: {0}")]
    PlotError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// Failure of a single trainer invocation.
///
/// Returned by [`Executor::invoke`](crate::core::Executor::invoke); a worker
/// receiving one requeues its job and retires.
#[derive(Error, Debug)]
pub enum InvocationError {
    #[error("could not launch `{command}`: {source}")]
    Launch {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {host} failed: {reason}")]
    Connection { host: String, reason: String },

    #[error("no cross-validation result in trainer output")]
    NoRate,

    #[error("unparsable cross-validation rate: {0:?}")]
    InvalidRate(String),

    #[error("trainer did not finish within {0:?}")]
    Timeout(std::time::Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GridError>;
