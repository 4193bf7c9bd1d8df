use thiserror::Error;

#[derive(Debug, Error)]
#[error(transparent)]
pub struct Error(Box<ErrorKind>);

impl Error {
    pub fn kind(&self) -> &ErrorKind {
        self.0.as_ref()
    }

    pub fn into_kind(self) -> ErrorKind {
        *self.0
    }

    pub fn empty_stack() -> Error {
        ErrorKind::EmptyStack.into()
    }

    pub fn empty_queue() -> Error {
        ErrorKind::EmptyQueue.into()
    }

    pub fn invalid_arg(name: impl Into<String>, message: impl Into<String>) -> Error {
        ErrorKind::InvalidArgument {
            name: name.into(),
            message: message.into(),
        }
        .into()
    }

    pub fn invalid_state(operation: impl Into<String>, reason: impl Into<String>) -> Error {
        ErrorKind::InvalidState {
            operation: operation.into(),
            reason: reason.into(),
        }
        .into()
    }

    pub fn quota_aborted(reason: impl Into<String>) -> Error {
        ErrorKind::QuotaAborted {
            reason: reason.into(),
        }
        .into()
    }

    /// Builds a `WorkerPanicked` error from the payload returned by a failed
    /// `std::thread::JoinHandle::join`.
    pub fn worker_panicked(payload: Box<dyn std::any::Any + Send + 'static>) -> Error {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        ErrorKind::WorkerPanicked { message }.into()
    }

    pub fn spawn(name: impl Into<String>, source: std::io::Error) -> Error {
        ErrorKind::Spawn {
            name: name.into(),
            source,
        }
        .into()
    }

    pub fn is_empty_stack(&self) -> bool {
        matches!(self.kind(), ErrorKind::EmptyStack)
    }

    pub fn is_empty_queue(&self) -> bool {
        matches!(self.kind(), ErrorKind::EmptyQueue)
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self.kind(), ErrorKind::InvalidState { .. })
    }

    pub fn is_quota_aborted(&self) -> bool {
        matches!(self.kind(), ErrorKind::QuotaAborted { .. })
    }
}

#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("pop from an empty stack")]
    EmptyStack,

    #[error("pop from an empty queue")]
    EmptyQueue,

    #[error("invalid argument {name}: {message}")]
    InvalidArgument { name: String, message: String },

    #[error("invalid state for {operation}: {reason}")]
    InvalidState { operation: String, reason: String },

    #[error("quota aborted: {reason}")]
    QuotaAborted { reason: String },

    #[error("worker thread panicked: {message}")]
    WorkerPanicked { message: String },

    #[error("failed to spawn thread '{name}': {source}")]
    Spawn {
        name: String,
        source: std::io::Error,
    },
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error(kind.into())
    }
}
