//! Escalation procedure: failure type to handler function.

use crate::metadata::FunctionIndex;
use atrium_core::types::FAILURE;
use atrium_core::{TypeHierarchy, TypeName};

/// Handler registered for a failure type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EscalationEntry {
    /// Failure type handled
    pub kind: TypeName,
    /// Handler function
    pub handler: FunctionIndex,
}

/// Ordered table of escalation handlers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EscalationProcedure {
    entries: Vec<EscalationEntry>,
}

impl EscalationProcedure {
    /// Create an empty procedure
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create from entries in registration order
    #[must_use]
    pub fn from_entries(entries: Vec<EscalationEntry>) -> Self {
        Self { entries }
    }

    /// Registered entries
    #[must_use]
    pub fn entries(&self) -> &[EscalationEntry] {
        &self.entries
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the handler for a failure of type `kind`.
    ///
    /// The entry whose type is the nearest ancestor of `kind` wins; among
    /// equally near entries the first registered wins. A kind missing from
    /// the hierarchy is treated as a direct subtype of `Failure`.
    #[must_use]
    pub fn resolve(&self, types: &TypeHierarchy, kind: &str) -> Option<&EscalationEntry> {
        let mut best: Option<(usize, &EscalationEntry)> = None;

        for entry in &self.entries {
            let Some(distance) = Self::distance(types, kind, entry.kind.as_str()) else {
                continue;
            };
            if best.is_none_or(|(nearest, _)| distance < nearest) {
                best = Some((distance, entry));
            }
        }

        best.map(|(_, entry)| entry)
    }

    fn distance(types: &TypeHierarchy, kind: &str, handled: &str) -> Option<usize> {
        if types.contains(kind) {
            types.distance(kind, handled)
        } else if kind == handled {
            Some(0)
        } else {
            types.distance(FAILURE, handled).map(|d| d + 1)
        }
    }
}
