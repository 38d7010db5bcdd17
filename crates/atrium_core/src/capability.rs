//! Extension capabilities declared by managed objects.
//!
//! Governance never probes an object for the views it supports. Each managed
//! object declares its capabilities up front: the extension type it exposes
//! and the factory that produces that view from the loaded object.

use crate::escalation::Escalation;
use crate::object::{ManagedObject, Object};
use crate::types::TypeName;
use std::sync::Arc;

/// Produces an extension view of a loaded managed object
pub trait ExtensionFactory: Send + Sync {
    /// Create the extension
    ///
    /// # Errors
    ///
    /// Returns the escalation if the extension can not be created
    fn create_extension(&self, managed_object: &dyn ManagedObject) -> Result<Object, Escalation>;
}

/// Extension that is the managed object's own object
#[derive(Debug, Clone, Copy, Default)]
pub struct SelfExtension;

impl ExtensionFactory for SelfExtension {
    fn create_extension(&self, managed_object: &dyn ManagedObject) -> Result<Object, Escalation> {
        managed_object.object()
    }
}

struct FnExtension<F>(F);

impl<F> ExtensionFactory for FnExtension<F>
where
    F: Fn(&dyn ManagedObject) -> Result<Object, Escalation> + Send + Sync,
{
    fn create_extension(&self, managed_object: &dyn ManagedObject) -> Result<Object, Escalation> {
        (self.0)(managed_object)
    }
}

/// Build an extension factory from a closure
#[must_use]
pub fn extension_fn<F>(f: F) -> Arc<dyn ExtensionFactory>
where
    F: Fn(&dyn ManagedObject) -> Result<Object, Escalation> + Send + Sync + 'static,
{
    Arc::new(FnExtension(f))
}

/// A declared extension capability
#[derive(Clone)]
pub struct Capability {
    /// Type of the extension view
    pub extension_type: TypeName,
    /// Factory producing the view
    pub factory: Arc<dyn ExtensionFactory>,
}

impl Capability {
    /// Create a capability
    #[must_use]
    pub fn new(extension_type: impl Into<TypeName>, factory: Arc<dyn ExtensionFactory>) -> Self {
        Self {
            extension_type: extension_type.into(),
            factory,
        }
    }
}

impl std::fmt::Debug for Capability {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Capability")
            .field("extension_type", &self.extension_type)
            .finish_non_exhaustive()
    }
}
