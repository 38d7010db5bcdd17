//! Explicit type hierarchy.
//!
//! Parameter unification, object compatibility checks and escalation routing
//! all ask questions of the form "is A assignable to B". The answers come from
//! this table of declared types rather than from runtime type discovery.

use crate::error::{CoreError, CoreResult};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::VecDeque;

/// Root of every type
pub const OBJECT: &str = "Object";
/// Root of every escalation type
pub const FAILURE: &str = "Failure";
/// Raised when a process is cancelled
pub const CANCELLED: &str = "Cancelled";
/// Raised when an asynchronous operation exceeds its timeout
pub const ASYNC_TIMEOUT: &str = "AsyncTimeout";
/// Raised when an operation is attempted in the wrong state
pub const ILLEGAL_STATE: &str = "IllegalState";
/// Raised when a user callback panics
pub const PANIC: &str = "Panic";

/// Name of a declared type
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeName(String);

impl TypeName {
    /// Create a type name
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Get as str
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for TypeName {
    fn from(name: &str) -> Self {
        Self(name.to_string())
    }
}

impl From<String> for TypeName {
    fn from(name: String) -> Self {
        Self(name)
    }
}

impl Borrow<str> for TypeName {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TypeName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Table of declared types and their direct supertypes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeHierarchy {
    types: IndexMap<TypeName, Vec<TypeName>>,
}

impl TypeHierarchy {
    /// Create a hierarchy seeded with the built-in types
    #[must_use]
    pub fn new() -> Self {
        let mut types = IndexMap::new();
        types.insert(TypeName::from(OBJECT), Vec::new());
        types.insert(TypeName::from(FAILURE), vec![TypeName::from(OBJECT)]);
        for builtin in [CANCELLED, ASYNC_TIMEOUT, ILLEGAL_STATE, PANIC] {
            types.insert(TypeName::from(builtin), vec![TypeName::from(FAILURE)]);
        }
        Self { types }
    }

    /// Declare a type with its direct supertypes.
    ///
    /// A type declared without supertypes extends `Object`. Supertypes must
    /// already be declared, so the hierarchy can never contain a cycle.
    ///
    /// # Errors
    ///
    /// Returns error if the type already exists or a supertype is unknown
    pub fn declare<I, S>(&mut self, name: impl Into<TypeName>, supertypes: I) -> CoreResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<TypeName>,
    {
        let name = name.into();
        if self.types.contains_key(&name) {
            return Err(CoreError::AlreadyExists {
                kind: "Type".to_string(),
                id: name.to_string(),
            });
        }

        let mut supers: Vec<TypeName> = supertypes.into_iter().map(Into::into).collect();
        for sup in &supers {
            if !self.types.contains_key(sup) {
                return Err(CoreError::NotFound {
                    kind: "Type".to_string(),
                    id: sup.to_string(),
                });
            }
        }
        if supers.is_empty() {
            supers.push(TypeName::from(OBJECT));
        }

        self.types.insert(name, supers);
        Ok(())
    }

    /// Check whether a type is declared
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Get the direct supertypes of a type
    #[must_use]
    pub fn supertypes(&self, name: &str) -> Option<&[TypeName]> {
        self.types.get(name).map(Vec::as_slice)
    }

    /// Number of declared types (built-ins included)
    #[must_use]
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Always false: the built-in types are present from construction
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// All ancestors of a type (itself first) with their breadth-first
    /// distance. Direct supertypes are visited in declaration order.
    #[must_use]
    pub fn ancestry(&self, name: &str) -> Vec<(TypeName, usize)> {
        let mut result = Vec::new();
        let Some((start, _)) = self.types.get_key_value(name) else {
            return result;
        };

        let mut seen = IndexSet::new();
        let mut queue = VecDeque::new();
        queue.push_back((start.clone(), 0usize));

        while let Some((current, depth)) = queue.pop_front() {
            if !seen.insert(current.clone()) {
                continue;
            }
            if let Some(supers) = self.types.get(&current) {
                for sup in supers {
                    queue.push_back((sup.clone(), depth + 1));
                }
            }
            result.push((current, depth));
        }

        result
    }

    /// Distance from `sub` up to `sup`, or `None` if not assignable
    #[must_use]
    pub fn distance(&self, sub: &str, sup: &str) -> Option<usize> {
        self.ancestry(sub)
            .into_iter()
            .find(|(name, _)| name.as_str() == sup)
            .map(|(_, depth)| depth)
    }

    /// Check whether a value of type `sub` may be used where `sup` is required
    #[must_use]
    pub fn is_assignable(&self, sub: &str, sup: &str) -> bool {
        self.distance(sub, sup).is_some()
    }

    /// The more specific of two types, if one is assignable to the other
    #[must_use]
    pub fn most_specific(&self, a: &TypeName, b: &TypeName) -> Option<TypeName> {
        if self.is_assignable(a.as_str(), b.as_str()) {
            Some(a.clone())
        } else if self.is_assignable(b.as_str(), a.as_str()) {
            Some(b.clone())
        } else {
            None
        }
    }
}

impl Default for TypeHierarchy {
    fn default() -> Self {
        Self::new()
    }
}
