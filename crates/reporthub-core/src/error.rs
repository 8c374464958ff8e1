use thiserror::Error;

/// Errors raised by the core crate itself (config loading, wiring).
///
/// Subsystem crates define their own error enums; this one is only for
/// failures that happen before any subsystem exists.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;
