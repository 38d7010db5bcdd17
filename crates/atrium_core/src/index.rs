//! Compile-time object slots.
//!
//! Every object a function can reach is addressed by an [`ObjectIndex`]
//! resolved while the office is built, so nothing is looked up by name once
//! the office is running.

use serde::{Deserialize, Serialize};

/// Lifetime of a managed object instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectScope {
    /// One instance per function execution
    Function,
    /// One instance per thread (flow of control) of a process
    Thread,
    /// One instance per process (invocation)
    Process,
}

impl ObjectScope {
    /// Rank used to compare scope breadth (wider scopes rank higher)
    #[must_use]
    pub const fn breadth(self) -> u8 {
        match self {
            Self::Function => 0,
            Self::Thread => 1,
            Self::Process => 2,
        }
    }

    /// Whether an object of this scope may depend on an object of `other`
    #[must_use]
    pub const fn may_depend_on(self, other: ObjectScope) -> bool {
        other.breadth() >= self.breadth()
    }
}

impl std::fmt::Display for ObjectScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Function => write!(f, "FUNCTION"),
            Self::Thread => write!(f, "THREAD"),
            Self::Process => write!(f, "PROCESS"),
        }
    }
}

/// Slot of an object reachable by a function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ObjectIndex {
    /// The argument passed to the function
    Parameter,
    /// A managed object at a position within its scope
    Scoped {
        /// Scope holding the object
        scope: ObjectScope,
        /// Position within the scope
        index: usize,
    },
}

impl ObjectIndex {
    /// Create a scoped index
    #[must_use]
    pub const fn scoped(scope: ObjectScope, index: usize) -> Self {
        Self::Scoped { scope, index }
    }

    /// Scope of the slot, `None` for the parameter
    #[must_use]
    pub const fn scope(&self) -> Option<ObjectScope> {
        match self {
            Self::Parameter => None,
            Self::Scoped { scope, .. } => Some(*scope),
        }
    }

    /// Check if this is the parameter slot
    #[must_use]
    pub const fn is_parameter(&self) -> bool {
        matches!(self, Self::Parameter)
    }
}

impl std::fmt::Display for ObjectIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Parameter => write!(f, "PARAMETER"),
            Self::Scoped { scope, index } => write!(f, "{}[{}]", scope, index),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_dependencies() {
        assert!(ObjectScope::Function.may_depend_on(ObjectScope::Process));
        assert!(ObjectScope::Thread.may_depend_on(ObjectScope::Thread));
        assert!(!ObjectScope::Process.may_depend_on(ObjectScope::Function));
        assert!(!ObjectScope::Process.may_depend_on(ObjectScope::Thread));
    }

    #[test]
    fn test_index_display() {
        assert_eq!(ObjectIndex::Parameter.to_string(), "PARAMETER");
        assert_eq!(ObjectIndex::scoped(ObjectScope::Thread, 2).to_string(), "THREAD[2]");
    }

    #[test]
    fn test_index_scope() {
        assert_eq!(ObjectIndex::Parameter.scope(), None);
        assert_eq!(
            ObjectIndex::scoped(ObjectScope::Process, 0).scope(),
            Some(ObjectScope::Process)
        );
        assert!(ObjectIndex::Parameter.is_parameter());
    }
}
