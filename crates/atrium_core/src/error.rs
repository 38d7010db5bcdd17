//! Core error types for ATRIUM.

use std::fmt;

/// Core result type
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors raised while declaring the type hierarchy
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// A referenced entry is not declared
    NotFound {
        /// What was looked up
        kind: String,
        /// Name it was looked up by
        id: String,
    },

    /// An entry is declared twice
    AlreadyExists {
        /// What was declared
        kind: String,
        /// Name it was declared under
        id: String,
    },
}

impl fmt::Display for CoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound { kind, id } => write!(f, "{} not found: {}", kind, id),
            Self::AlreadyExists { kind, id } => write!(f, "{} already exists: {}", kind, id),
        }
    }
}

impl std::error::Error for CoreError {}
