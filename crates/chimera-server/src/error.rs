use chimera_protocol::{ErrorType, PayloadError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChimeraError {
    #[error("Module '{0}' not found")]
    UnknownModule(String),

    #[error("Module '{0}' is defined more than once")]
    DuplicateModule(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(#[from] PayloadError),

    #[error("Invalid limit {limit}: must be between 1 and {max}")]
    InvalidLimit { limit: usize, max: usize },

    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

pub type Result<T> = std::result::Result<T, ChimeraError>;

impl ChimeraError {
    /// Taxonomy bucket reported to the transport alongside the message.
    pub fn error_type(&self) -> ErrorType {
        match self {
            ChimeraError::UnknownModule(_) => ErrorType::UnknownModule,
            ChimeraError::InvalidEvent(_) | ChimeraError::InvalidLimit { .. } => ErrorType::Validation,
            ChimeraError::DuplicateModule(_) | ChimeraError::Config(_) => ErrorType::Processing,
        }
    }
}
