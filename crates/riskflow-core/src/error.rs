//! Error types for RiskFlow Core

use thiserror::Error;

/// Core error type
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CoreError {
    /// A request field failed validation
    #[error("Invalid field '{field}': {message}")]
    InvalidField { field: String, message: String },

    /// A stored value could not be interpreted
    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl CoreError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        CoreError::InvalidField {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, CoreError>;
