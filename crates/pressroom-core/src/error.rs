//! Crate-level error type for configuration and bootstrap failures.

use thiserror::Error;

/// Errors raised while loading or persisting Pressroom configuration.
#[derive(Debug, Error)]
pub enum PressroomError {
    #[error("config: {0}")]
    Config(String),

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PressroomError>;
