use thiserror::Error;

/// Core error types for service lifecycle operations
#[derive(Error, Debug)]
pub enum LayerError {
    #[error("Bind request failed: {0}")]
    BindFailed(String),

    #[error("Unbind request failed: {0}")]
    UnbindFailed(String),

    #[error("Connection is not bound")]
    NotBound,

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Process management error: {0}")]
    ProcessError(String),

    #[error("Timeout occurred: {0}")]
    Timeout(String),

    #[error("Service stopped before becoming ready")]
    Stopped,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl LayerError {
    /// Check if starting again may succeed
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            LayerError::BindFailed(_)
                | LayerError::ProcessError(_)
                | LayerError::Timeout(_)
                | LayerError::Stopped
                | LayerError::Io(_)
        )
    }

    /// Check if this error indicates a permanent failure
    pub fn is_permanent(&self) -> bool {
        matches!(self, LayerError::ConfigurationError(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let error = LayerError::BindFailed("no binary".to_string());
        assert!(format!("{error}").contains("Bind request failed"));

        let error = LayerError::Timeout("30s".to_string());
        assert!(format!("{error}").contains("30s"));
    }

    #[test]
    fn test_error_categorization() {
        assert!(LayerError::BindFailed("test".to_string()).is_retryable());
        assert!(LayerError::Stopped.is_retryable());
        assert!(LayerError::Timeout("test".to_string()).is_retryable());

        assert!(!LayerError::NotBound.is_retryable());
        assert!(!LayerError::ConfigurationError("test".to_string()).is_retryable());
        assert!(LayerError::ConfigurationError("test".to_string()).is_permanent());
        assert!(!LayerError::UnbindFailed("test".to_string()).is_permanent());
    }

    #[test]
    fn test_io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let error: LayerError = io.into();
        assert!(matches!(error, LayerError::Io(_)));
        assert!(error.is_retryable());
    }
}
