//! Error handling for the Stock Ledger Engine
//!
//! Every ledger failure propagates synchronously to the caller; nothing is
//! swallowed at this layer. Callers decide whether to retry.

use thiserror::Error;

use shared::ConversionError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation error on {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Resource not found: {0}")]
    NotFound(String),

    // Business logic errors
    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Incompatible units: {0}")]
    IncompatibleUnits(String),

    #[error("Invalid conversion: {0}")]
    InvalidConversion(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    // Database errors
    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    // Internal errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Internal error")]
    InternalError(#[from] anyhow::Error),
}

impl AppError {
    /// Shorthand for a field-level validation failure
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        AppError::Validation {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

impl From<ConversionError> for AppError {
    fn from(err: ConversionError) -> Self {
        match err {
            ConversionError::UnknownUnit(id) => AppError::NotFound(format!("Unit {id}")),
            ConversionError::IncompatibleUnits { .. } => {
                AppError::IncompatibleUnits(err.to_string())
            }
            ConversionError::InvalidRatio(_) | ConversionError::CircularReference(_) => {
                AppError::InvalidConversion(err.to_string())
            }
        }
    }
}

/// Result type alias for ledger operations
pub type AppResult<T> = Result<T, AppError>;
