use thiserror::Error;

/// Monitor-wide error type
///
/// Every variant except `Configuration` is recovered inside the poll loop:
/// a single bad line, file or delivery never aborts a tick.
#[derive(Debug, Error)]
pub enum AppError {
    /// Timestamp string matched none of the supported formats
    #[error("Unparseable timestamp: {0}")]
    TimestampParse(String),

    /// Log line was not a JSON object
    #[error("Invalid log line: {0}")]
    LogParse(String),

    /// Log file could not be stat'ed, opened or read
    #[error("File access failed: {0}")]
    FileAccess(String),

    /// Transport-level delivery failure (retryable)
    #[error("Delivery failed: {0}")]
    Delivery(String),

    /// A single delivery attempt exceeded its deadline (retryable)
    #[error("Timed out: {0}")]
    Timeout(String),

    /// Missing or malformed settings for a component
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Error code used in log lines
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::TimestampParse(_) => "MON_TS",
            AppError::LogParse(_) => "MON_PARSE",
            AppError::FileAccess(_) => "MON_FILE",
            AppError::Delivery(_) => "MON_DELIVERY",
            AppError::Timeout(_) => "MON_TIMEOUT",
            AppError::Configuration(_) => "MON_CONFIG",
            AppError::Internal(_) => "MON_INTERNAL",
        }
    }

    /// Transient failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::Delivery(_) | AppError::Timeout(_))
    }
}

/// 편의 함수들
impl AppError {
    pub fn timestamp_parse(msg: impl Into<String>) -> Self {
        AppError::TimestampParse(msg.into())
    }

    pub fn log_parse(msg: impl Into<String>) -> Self {
        AppError::LogParse(msg.into())
    }

    pub fn file_access(msg: impl Into<String>) -> Self {
        AppError::FileAccess(msg.into())
    }

    pub fn delivery(msg: impl Into<String>) -> Self {
        AppError::Delivery(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        AppError::Timeout(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::Configuration(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_mark_delivery_and_timeout_as_retryable() {
        // Arrange
        let delivery = AppError::delivery("connection reset");
        let timeout = AppError::timeout("attempt 2");

        // Act & Assert
        assert!(delivery.is_retryable());
        assert!(timeout.is_retryable());
    }

    #[test]
    fn should_not_retry_configuration_errors() {
        // Arrange
        let error = AppError::configuration("SMTP_FROM is not a valid mailbox");

        // Act & Assert
        assert!(!error.is_retryable());
        assert_eq!(error.error_code(), "MON_CONFIG");
    }

    #[test]
    fn should_format_message_with_context() {
        // Arrange
        let error = AppError::file_access("logs/security.log: permission denied");

        // Act
        let message = error.to_string();

        // Assert
        assert_eq!(
            message,
            "File access failed: logs/security.log: permission denied"
        );
    }
}
