// src/utils/error.rs

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub type ChaosLabResult<T> = Result<T, ChaosLabError>;

/// Custom error details for additional context
pub type ErrorDetails = HashMap<String, serde_json::Value>;

/// Main error type for the chaos lab pipeline
/// Optimized for size by boxing large fields
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChaosLabError {
    pub message: String,
    pub details: Option<Box<ErrorDetails>>, // Boxed to reduce enum size
    pub status: Option<u16>,
    pub error_code: Option<String>,
    pub kind: ErrorKind,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    #[default]
    UnknownError,
    ValidationError,
    NotFoundError,
    NotReady,
    SandboxError,
    TransportError,
    TimeoutError,
    ExternalServiceError,
    SerializationError,
    StorageError,
    ConfigurationError,
    Internal,
}

impl fmt::Display for ChaosLabError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for ChaosLabError {}

impl ChaosLabError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            details: None,
            status: None,
            error_code: None,
            kind,
        }
    }

    pub fn with_details(mut self, details: ErrorDetails) -> Self {
        self.details = Some(Box::new(details));
        self
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, error_code: impl Into<String>) -> Self {
        self.error_code = Some(error_code.into());
        self
    }

    pub fn with_detail(mut self, key: &str, value: serde_json::Value) -> Self {
        self.details
            .get_or_insert_with(|| Box::new(ErrorDetails::new()))
            .insert(key.to_string(), value);
        self
    }

    // Convenience constructors for common error types
    pub fn validation_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ValidationError, message)
            .with_status(400)
            .with_code("VALIDATION_ERROR")
    }

    pub fn not_found<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::NotFoundError, message)
            .with_status(404)
            .with_code("NOT_FOUND")
    }

    pub fn not_ready(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotReady, message)
            .with_status(409)
            .with_code("NOT_READY")
    }

    pub fn sandbox_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::SandboxError, message)
            .with_status(502)
            .with_code("SANDBOX_ERROR")
    }

    pub fn transport_error<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::TransportError, message)
            .with_status(503)
            .with_code("TRANSPORT_ERROR")
    }

    pub fn timeout_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TimeoutError, message)
            .with_status(408)
            .with_code("TIMEOUT_ERROR")
    }

    pub fn external_service_error(service: &str, message: impl Into<String>) -> Self {
        let mut details = ErrorDetails::new();
        details.insert(
            "service".to_string(),
            serde_json::Value::String(service.to_string()),
        );

        Self::new(ErrorKind::ExternalServiceError, message)
            .with_details(details)
            .with_status(502)
            .with_code("EXTERNAL_SERVICE_ERROR")
    }

    pub fn serialization_error<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::SerializationError, message)
            .with_status(500)
            .with_code("SERIALIZATION_ERROR")
    }

    pub fn storage_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::StorageError, message)
            .with_status(500)
            .with_code("STORAGE_ERROR")
    }

    pub fn config_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConfigurationError, message)
            .with_status(500)
            .with_code("CONFIG_ERROR")
    }

    pub fn internal_error<T: Into<String>>(message: T) -> Self {
        Self::new(ErrorKind::Internal, message)
            .with_status(500)
            .with_code("INTERNAL_ERROR")
    }

    /// Transport and timeout failures are worth retrying at provisioning time.
    pub fn is_transient(&self) -> bool {
        matches!(self.kind, ErrorKind::TransportError | ErrorKind::TimeoutError)
    }
}

// Implement From conversions for common error types
impl From<serde_json::Error> for ChaosLabError {
    fn from(err: serde_json::Error) -> Self {
        ChaosLabError::serialization_error(format!("JSON error: {}", err))
    }
}

impl From<std::io::Error> for ChaosLabError {
    fn from(err: std::io::Error) -> Self {
        ChaosLabError::storage_error(format!("IO error: {}", err))
    }
}

impl From<url::ParseError> for ChaosLabError {
    fn from(err: url::ParseError) -> Self {
        ChaosLabError::config_error(format!("URL parse error: {}", err))
    }
}

impl From<reqwest::Error> for ChaosLabError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ChaosLabError::timeout_error(format!("HTTP request timed out: {}", err))
        } else if err.is_decode() {
            ChaosLabError::serialization_error(format!("HTTP response decode error: {}", err))
        } else {
            ChaosLabError::transport_error(format!("HTTP transport error: {}", err))
        }
    }
}

// Helper macro for creating errors with context
#[macro_export]
macro_rules! chaos_error {
    ($kind:expr, $msg:expr) => {
        $crate::utils::error::ChaosLabError::new($kind, $msg)
    };
    ($kind:expr, $msg:expr, $($key:expr => $value:expr),+) => {{
        let mut details = std::collections::HashMap::new();
        $(
            details.insert($key.to_string(), serde_json::json!($value));
        )+
        $crate::utils::error::ChaosLabError::new($kind, $msg).with_details(details)
    }};
}
