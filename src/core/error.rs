use thiserror::Error;

/// Engine-level error taxonomy
#[derive(Error, Debug)]
pub enum EngineError {
    /// Completion endpoint unreachable or returned a non-2xx status
    #[error("Completion transport error: {0}")]
    Transport(String),

    /// Completion call exceeded its per-call deadline
    #[error("Completion timed out: {0}")]
    Timeout(String),

    /// Completion body could not be interpreted
    #[error("Completion protocol error: {0}")]
    Protocol(String),

    /// Factory was asked for a role nobody registered
    #[error("Unknown cell type: {0}")]
    UnknownCellType(String),

    /// Model output that could not be parsed as requested
    #[error("Malformed proposal: {0}")]
    MalformedProposal(String),

    /// Rollback asked for a history entry that does not exist
    #[error("Invalid rollback index {index} (history holds {len} records)")]
    InvalidRollbackIndex { index: usize, len: usize },

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Persistence errors
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Normalized completion-layer errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        status: Option<u16>,
    },

    #[error("Completion timed out after {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Protocol error: {message}")]
    Protocol { message: String },
}

impl CompletionError {
    /// Convenience to construct a Transport error without a status
    pub fn transport(message: impl Into<String>) -> Self {
        CompletionError::Transport {
            message: message.into(),
            status: None,
        }
    }

    /// Convenience to construct a Protocol error
    pub fn protocol(message: impl Into<String>) -> Self {
        CompletionError::Protocol {
            message: message.into(),
        }
    }

    /// Transport failures and timeouts are worth another attempt; a body we
    /// could not parse will not improve by asking again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CompletionError::Transport { .. } | CompletionError::Timeout { .. }
        )
    }
}

impl From<CompletionError> for EngineError {
    fn from(err: CompletionError) -> Self {
        match err {
            CompletionError::Transport { message, status } => match status {
                Some(code) => EngineError::Transport(format!("{} (status {})", message, code)),
                None => EngineError::Transport(message),
            },
            CompletionError::Timeout { timeout_ms } => {
                EngineError::Timeout(format!("no response within {} ms", timeout_ms))
            }
            CompletionError::Protocol { message } => EngineError::Protocol(message),
        }
    }
}
