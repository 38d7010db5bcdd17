//! Runtime failure value routed by the escalation procedure.

use crate::types::{TypeName, ASYNC_TIMEOUT, CANCELLED, ILLEGAL_STATE, PANIC};
use std::any::Any;
use std::sync::Arc;

/// A failure raised while executing a function, duty, governance callback or
/// managed object operation.
///
/// The `kind` names a type in the office's type hierarchy; escalation
/// handlers are matched against its ancestry.
#[derive(Debug, Clone)]
pub struct Escalation {
    kind: TypeName,
    message: String,
    cause: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl Escalation {
    /// Create an escalation of the given type
    #[must_use]
    pub fn new(kind: impl Into<TypeName>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
            cause: None,
        }
    }

    /// Wrap an error as an escalation of the given type
    #[must_use]
    pub fn from_error<E>(kind: impl Into<TypeName>, error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self {
            kind: kind.into(),
            message: error.to_string(),
            cause: Some(Arc::new(error)),
        }
    }

    /// Attach an underlying cause
    #[must_use]
    pub fn with_cause<E>(mut self, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Process was cancelled
    #[must_use]
    pub fn cancelled() -> Self {
        Self::new(CANCELLED, "process cancelled")
    }

    /// Asynchronous operation exceeded its timeout
    #[must_use]
    pub fn timeout(operation: impl std::fmt::Display) -> Self {
        Self::new(ASYNC_TIMEOUT, format!("timed out waiting on {}", operation))
    }

    /// Operation attempted in the wrong state
    #[must_use]
    pub fn illegal_state(reason: impl Into<String>) -> Self {
        Self::new(ILLEGAL_STATE, reason)
    }

    /// Convert a caught panic payload
    #[must_use]
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        Self::new(PANIC, message)
    }

    /// Type of the escalation
    #[must_use]
    pub fn kind(&self) -> &TypeName {
        &self.kind
    }

    /// Human readable message
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Check if this escalation is a cancellation
    #[must_use]
    pub fn is_cancellation(&self) -> bool {
        self.kind.as_str() == CANCELLED
    }
}

/// Run a user callback, converting a panic into a `Panic` escalation
///
/// # Errors
///
/// Returns the callback's escalation, or the converted panic
pub fn contain_panic<T>(callback: impl FnOnce() -> Result<T, Escalation>) -> Result<T, Escalation> {
    std::panic::catch_unwind(std::panic::AssertUnwindSafe(callback))
        .unwrap_or_else(|payload| Err(Escalation::from_panic(payload)))
}

impl std::fmt::Display for Escalation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Escalation {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause
            .as_ref()
            .map(|cause| &**cause as &(dyn std::error::Error + 'static))
    }
}
