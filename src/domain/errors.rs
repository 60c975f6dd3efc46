use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    #[error("Configuración inválida en '{field}': {reason}")]
    ConfigInvalid { field: String, reason: String },
    #[error("No se pudo conectar a {address}: {reason}")]
    ConnectFailed { address: String, reason: String },
    #[error("Tiempo de conexión agotado ({timeout_ms} ms) para {address}")]
    ConnectTimeout { address: String, timeout_ms: u64 },
    #[error("no frames available")]
    FrameTimeout,
    #[error("Error leyendo frame: {0}")]
    ReadFailure(String),
    #[error("Error de inferencia: {0}")]
    InferenceError(String),
    #[error("Error de persistencia: {0}")]
    PersistFailure(String),
    #[error("No encontrado: {0}")]
    NotFound(String),
    #[error("Entrada inválida: {0}")]
    InvalidInput(String),
}

/// Discriminante sin datos de [`PipelineError`], útil para comparar en tests y logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ConfigInvalid,
    ConnectFailed,
    ConnectTimeout,
    FrameTimeout,
    ReadFailure,
    InferenceError,
    PersistFailure,
    NotFound,
    InvalidInput,
}

impl PipelineError {
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConfigInvalid { field: field.into(), reason: reason.into() }
    }

    pub fn connect(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ConnectFailed { address: address.into(), reason: reason.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConfigInvalid { .. } => ErrorKind::ConfigInvalid,
            Self::ConnectFailed { .. } => ErrorKind::ConnectFailed,
            Self::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Self::FrameTimeout => ErrorKind::FrameTimeout,
            Self::ReadFailure(_) => ErrorKind::ReadFailure,
            Self::InferenceError(_) => ErrorKind::InferenceError,
            Self::PersistFailure(_) => ErrorKind::PersistFailure,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::InvalidInput(_) => ErrorKind::InvalidInput,
        }
    }

    /// Solo los fallos de conexión fuerzan la reconstrucción del Runner.
    pub fn is_fatal(&self) -> bool {
        matches!(self.kind(), ErrorKind::ConnectFailed | ErrorKind::ConnectTimeout)
    }
}

pub type DomainResult<T> = Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timeout_message_is_stable() {
        assert_eq!(PipelineError::FrameTimeout.to_string(), "no frames available");
    }

    #[test]
    fn only_connection_failures_are_fatal() {
        assert!(PipelineError::connect("rtsp://cam/1", "refused").is_fatal());
        assert!(PipelineError::ConnectTimeout { address: "x".into(), timeout_ms: 5 }.is_fatal());
        assert!(!PipelineError::FrameTimeout.is_fatal());
        assert!(!PipelineError::InferenceError("nan".into()).is_fatal());
        assert!(!PipelineError::config("fps", "vacío").is_fatal());
    }
}
