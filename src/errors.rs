// ABOUTME: Centralized error handling and error types for the Mnemograph API
// ABOUTME: Defines error codes, HTTP status mapping, and the JSON error response shape
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Mnemograph Contributors

//! # Unified Error Handling
//!
//! Every fallible operation in the server returns [`AppResult`]. Errors carry
//! an [`ErrorCode`] that maps to an HTTP status and a human-readable message.
//! The wire shape is `{ "error": string, "details"?: string }`.
//!
//! Policy: hard failures (store, invalid input, missing resources) surface to
//! the client; soft degradations (LLM parse failures, vector index outages)
//! are swallowed at the adapter layer and never reach this type.

use std::fmt;
use std::io;

use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error as ThisError;
use tracing::warn;
use uuid::Error as UuidError;

/// Standard error codes used throughout the application
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Validation
    /// Input validation failed
    InvalidInput,
    /// Required field is missing from request
    MissingRequiredField,

    // Resource Management
    /// Requested resource was not found
    ResourceNotFound,

    // External Services
    /// External service returned an error
    ExternalServiceError,

    // Configuration
    /// Configuration error occurred
    ConfigError,

    // Internal Errors
    /// Internal server error
    InternalError,
    /// Database operation failed
    DatabaseError,
    /// Serialization/deserialization failed
    SerializationError,
}

impl ErrorCode {
    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(self) -> u16 {
        match self {
            Self::InvalidInput | Self::MissingRequiredField => 400,
            Self::ResourceNotFound => 404,
            Self::ExternalServiceError => 502,
            Self::ConfigError
            | Self::InternalError
            | Self::DatabaseError
            | Self::SerializationError => 500,
        }
    }

    /// Get a user-friendly description of this error
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::InvalidInput => "The provided input is invalid",
            Self::MissingRequiredField => "A required field is missing from the request",
            Self::ResourceNotFound => "The requested resource was not found",
            Self::ExternalServiceError => "An external service encountered an error",
            Self::ConfigError => "Configuration error encountered",
            Self::InternalError => "An internal server error occurred",
            Self::DatabaseError => "Database operation failed",
            Self::SerializationError => "Data serialization failed",
        }
    }

    /// Whether the message attached to this code is safe to expose verbatim
    const fn message_is_client_safe(self) -> bool {
        matches!(
            self,
            Self::InvalidInput | Self::MissingRequiredField | Self::ResourceNotFound
        )
    }
}

/// Application error type
#[derive(Debug, Clone, ThisError)]
pub struct AppError {
    /// Error code
    pub code: ErrorCode,
    /// Human-readable error message
    pub message: String,
}

impl AppError {
    /// Create a new `AppError` with the given code and message
    #[must_use]
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Get the HTTP status code for this error
    #[must_use]
    pub const fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    /// Full error details for internal logging. Never sent to clients.
    #[must_use]
    pub fn internal_details(&self) -> String {
        format!("{:?}: {}", self.code, self.message)
    }

    /// Invalid input
    #[must_use]
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Required field missing
    #[must_use]
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingRequiredField,
            format!("Missing required field: {field}"),
        )
    }

    /// Resource not found
    #[must_use]
    pub fn not_found(resource: impl Into<String>) -> Self {
        let resource_str = resource.into();
        Self::new(
            ErrorCode::ResourceNotFound,
            format!("{resource_str} not found"),
        )
    }

    /// Internal server error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Database error
    #[must_use]
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Configuration error
    #[must_use]
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigError, message)
    }

    /// External service error
    #[must_use]
    pub fn external_service(service: impl Into<String>, message: impl Into<String>) -> Self {
        let service_str = service.into();
        let message_str = message.into();
        Self::new(
            ErrorCode::ExternalServiceError,
            format!("{service_str}: {message_str}"),
        )
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code.description(), self.message)
    }
}

/// Result type alias for convenience
pub type AppResult<T> = Result<T, AppError>;

/// HTTP error response body: `{ "error": string, "details"?: string }`
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Short error description
    pub error: String,
    /// Optional additional detail, only for client-safe codes
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl From<AppError> for ErrorBody {
    fn from(error: AppError) -> Self {
        // Log full details internally before sanitizing
        warn!("API error: {}", error.internal_details());

        if error.code.message_is_client_safe() {
            Self {
                error: error.message,
                details: None,
            }
        } else {
            Self {
                error: error.code.description().to_owned(),
                details: None,
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        use axum::http::StatusCode;
        use axum::Json;

        let status = StatusCode::from_u16(self.code.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ErrorBody::from(self);

        (status, Json(body)).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(error: sqlx::Error) -> Self {
        Self::database(format!("Database operation failed: {error}"))
    }
}

impl From<io::Error> for AppError {
    fn from(error: io::Error) -> Self {
        Self::new(ErrorCode::InternalError, format!("IO error: {error}"))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(error: serde_json::Error) -> Self {
        Self::new(ErrorCode::SerializationError, format!("JSON error: {error}"))
    }
}

impl From<UuidError> for AppError {
    fn from(error: UuidError) -> Self {
        Self::new(ErrorCode::InvalidInput, format!("UUID error: {error}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_expose_their_message() {
        let body = ErrorBody::from(AppError::invalid_input("topics must not be empty"));
        assert_eq!(body.error, "topics must not be empty");
        assert!(body.details.is_none());
    }

    #[test]
    fn internal_errors_are_sanitized() {
        let body = ErrorBody::from(AppError::database("UNIQUE constraint failed: users.id"));
        assert_eq!(body.error, "Database operation failed");
    }

    #[test]
    fn status_mapping() {
        assert_eq!(AppError::missing_field("userId").http_status(), 400);
        assert_eq!(AppError::not_found("Conversation").http_status(), 404);
        assert_eq!(AppError::internal("boom").http_status(), 500);
    }
}
