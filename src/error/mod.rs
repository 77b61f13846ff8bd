//! Error handling module for the caching pool

use thiserror::Error;
use tokio::time::error::Elapsed;

/// Custom error type for the caching pool and its collaborators
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    /// The underlying factory could not produce a service. The pool hands this
    /// back to the acquiring caller untouched.
    #[error("Service creation failed: {0}")]
    ServiceCreation(String),

    /// A pending acquire was interrupted by its caller before a service arrived.
    #[error("Write failed, acquire interrupted: {0}")]
    WriteInterrupted(String),

    #[error("Service closed")]
    ServiceClosed,

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("Unknown error: {0}")]
    Unknown(String),

    #[error("Timeout error: {0}")]
    Timeout(#[from] Elapsed),
}

/// Result type for the caching pool
pub type Result<T> = std::result::Result<T, Error>;

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Unknown(err.to_string())
    }
}

impl Error {
    /// True for the failure kind produced by an interrupted acquire
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Error::WriteInterrupted(_))
    }
}
