//! Error types for Folio
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for different failure modes
//! - HTTP status code mapping
//! - Structured error responses
//! - Error codes for client handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    EmptyQuery,

    // Resource errors (4xxx)
    NotFound,
    SessionNotFound,
    ModelNotFound,

    // Rate limiting (6xxx)
    RateLimited,

    // Storage errors (7xxx)
    StoreError,

    // Inference backend errors (8xxx)
    UpstreamError,
    EmbeddingError,
    SearchFailed,
    ModelLoading,
    BackendUnavailable,
    GenerationFailed,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
    DimensionMismatch,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::EmptyQuery => 1002,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::SessionNotFound => 4002,
            ErrorCode::ModelNotFound => 4003,

            // Rate limits (6xxx)
            ErrorCode::RateLimited => 6001,

            // Storage (7xxx)
            ErrorCode::StoreError => 7001,

            // Backend (8xxx)
            ErrorCode::UpstreamError => 8001,
            ErrorCode::EmbeddingError => 8002,
            ErrorCode::SearchFailed => 8003,
            ErrorCode::ModelLoading => 8004,
            ErrorCode::BackendUnavailable => 8005,
            ErrorCode::GenerationFailed => 8006,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
            ErrorCode::DimensionMismatch => 9004,
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>
    },

    #[error("Query text is empty")]
    EmptyQuery,

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Model not found: {model}")]
    ModelNotFound { model: String },

    // Rate limiting
    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Storage errors
    #[error("Chunk store error: {message}")]
    StoreError { message: String },

    // Inference backend errors
    #[error("Embedding service error: {message}")]
    EmbeddingError { message: String },

    #[error("Semantic search failed: {message}")]
    SearchFailed { message: String },

    #[error("Model is still loading: {model}")]
    ModelLoading { model: String },

    #[error("Inference backend unavailable: {message}")]
    BackendUnavailable { message: String },

    #[error("Generation failed: {message}")]
    GenerationFailed { message: String },

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    // Internal errors
    #[error("Embedding dimension mismatch: {left} vs {right}")]
    DimensionMismatch { left: usize, right: usize },

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::EmptyQuery => ErrorCode::EmptyQuery,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            AppError::ModelNotFound { .. } => ErrorCode::ModelNotFound,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::StoreError { .. } => ErrorCode::StoreError,
            AppError::EmbeddingError { .. } => ErrorCode::EmbeddingError,
            AppError::SearchFailed { .. } => ErrorCode::SearchFailed,
            AppError::ModelLoading { .. } => ErrorCode::ModelLoading,
            AppError::BackendUnavailable { .. } => ErrorCode::BackendUnavailable,
            AppError::GenerationFailed { .. } => ErrorCode::GenerationFailed,
            AppError::HttpClient(_) => ErrorCode::UpstreamError,
            AppError::DimensionMismatch { .. } => ErrorCode::DimensionMismatch,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            // 400 Bad Request
            AppError::Validation { .. } |
            AppError::EmptyQuery => StatusCode::BAD_REQUEST,

            // 404 Not Found
            AppError::NotFound { .. } |
            AppError::SessionNotFound { .. } |
            AppError::ModelNotFound { .. } => StatusCode::NOT_FOUND,

            // 429 Too Many Requests
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,

            // 500 Internal Server Error
            AppError::StoreError { .. } |
            AppError::DimensionMismatch { .. } |
            AppError::Internal { .. } |
            AppError::Configuration { .. } |
            AppError::Serialization(_) |
            AppError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,

            // 502 Bad Gateway
            AppError::EmbeddingError { .. } |
            AppError::SearchFailed { .. } |
            AppError::GenerationFailed { .. } |
            AppError::HttpClient(_) => StatusCode::BAD_GATEWAY,

            // 503 Service Unavailable
            AppError::ModelLoading { .. } |
            AppError::BackendUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }

    /// The backend is warming a model up; the call may succeed if repeated
    pub fn is_model_loading(&self) -> bool {
        matches!(self, AppError::ModelLoading { .. })
    }

    /// Short text shown in place of a failed message
    pub fn user_message(&self) -> String {
        match self {
            AppError::ModelLoading { model } => {
                format!("The model '{}' is still loading. Please try again in a moment.", model)
            }
            AppError::ModelNotFound { model } => {
                format!("The model '{}' is not installed in Ollama.", model)
            }
            AppError::BackendUnavailable { .. } | AppError::HttpClient(_) => {
                "Cannot reach Ollama. Make sure the Ollama service is running.".to_string()
            }
            AppError::EmbeddingError { .. } | AppError::SearchFailed { .. } => {
                "Searching your documents failed. Please try again.".to_string()
            }
            other => format!("Error: {}", other),
        }
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();
        let message = self.to_string();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %message,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                message,
                details: None,
                request_id: None,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string()
        }
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Configuration {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        let err = AppError::SessionNotFound { id: "test".into() };
        assert_eq!(err.code(), ErrorCode::SessionNotFound);
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_validation_error() {
        let err = AppError::Validation {
            message: "Query too long".into(),
            field: Some("text".into()),
        };
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert!(!err.is_server_error());
        assert!(err.is_client_error());
    }

    #[test]
    fn test_model_loading_is_recoverable() {
        let err = AppError::ModelLoading { model: "llama3".into() };
        assert!(err.is_model_loading());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(!AppError::EmptyQuery.is_model_loading());
    }

    #[test]
    fn test_user_message_for_connectivity() {
        let err = AppError::BackendUnavailable { message: "connection refused".into() };
        assert!(err.user_message().contains("Ollama"));
    }

    #[test]
    fn test_dimension_mismatch_is_server_error() {
        let err = AppError::DimensionMismatch { left: 768, right: 384 };
        assert_eq!(err.code().as_code(), 9004);
        assert!(err.is_server_error());
    }
}
