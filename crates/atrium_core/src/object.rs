//! Managed object seam.
//!
//! A [`ManagedObjectSource`] hands out [`ManagedObject`]s, possibly from
//! another thread and possibly long after it was asked. The runtime wraps
//! each one in a container that drives the lifecycle; implementations here
//! only ever see the narrow callback traits below.

use crate::escalation::Escalation;
use std::any::Any;
use std::sync::{Arc, OnceLock};

/// Any value handed to or produced by a function
pub type Object = Arc<dyn Any + Send + Sync>;

/// Wrap a value as an [`Object`]
#[must_use]
pub fn object<T: Any + Send + Sync>(value: T) -> Object {
    Arc::new(value)
}

/// Downcast an [`Object`] to a concrete type
///
/// # Errors
///
/// Returns an `IllegalState` escalation if the object is of another type
pub fn downcast<T: Any + Send + Sync>(value: Object, what: &str) -> Result<Arc<T>, Escalation> {
    value.downcast::<T>().map_err(|_| {
        Escalation::illegal_state(format!(
            "{} is not of type {}",
            what,
            std::any::type_name::<T>()
        ))
    })
}

/// Supplies managed objects
pub trait ManagedObjectSource: Send + Sync {
    /// Provide a managed object to the user, now or later from any thread
    fn source(&self, user: Box<dyn ObjectUser>);
}

/// Receives the outcome of sourcing a managed object
pub trait ObjectUser: Send {
    /// The managed object is available
    fn set_managed_object(self: Box<Self>, managed_object: Box<dyn ManagedObject>);

    /// Sourcing failed
    fn set_failure(self: Box<Self>, failure: Escalation);
}

/// A resource under kernel management
pub trait ManagedObject: Send + Sync {
    /// The object handed to functions
    ///
    /// # Errors
    ///
    /// Returns the escalation if the object can not be provided
    fn object(&self) -> Result<Object, Escalation>;

    /// Coordinate with dependencies once sourced.
    ///
    /// Call [`LoadContext::start_async`] to finish later from another thread.
    ///
    /// # Errors
    ///
    /// Returns the escalation if coordination fails
    fn load_objects(&self, ctx: &mut dyn LoadContext) -> Result<(), Escalation> {
        let _ = ctx;
        Ok(())
    }

    /// Persist external state; signal `completion` when done
    ///
    /// # Errors
    ///
    /// Returns the escalation if the store can not start
    fn store(&self, completion: Box<dyn AsyncCompletion>) -> Result<(), Escalation> {
        completion.complete(Ok(()));
        Ok(())
    }

    /// Discard external state; signal `completion` when done
    ///
    /// # Errors
    ///
    /// Returns the escalation if the invalidation can not start
    fn invalidate(&self, completion: Box<dyn AsyncCompletion>) -> Result<(), Escalation> {
        completion.complete(Ok(()));
        Ok(())
    }

    /// Release the object once its scope ended
    fn recycle(&self) {}
}

/// View of a managed object's dependencies while coordinating
pub trait LoadContext {
    /// Dependency at the declared position
    ///
    /// # Errors
    ///
    /// Returns an escalation if there is no such dependency
    fn dependency(&self, index: usize) -> Result<Object, Escalation>;

    /// Number of declared dependencies
    fn dependency_count(&self) -> usize;

    /// Finish loading asynchronously; the owning function stays suspended
    /// until the returned completion is signalled
    fn start_async(&mut self) -> Box<dyn AsyncCompletion>;
}

/// Signals the end of an asynchronous managed object operation
pub trait AsyncCompletion: Send {
    /// Complete the operation
    fn complete(self: Box<Self>, result: Result<(), Escalation>);
}

/// Managed object holding a ready value
pub struct ValueObject {
    value: Object,
}

impl ValueObject {
    /// Create from a value
    #[must_use]
    pub fn new(value: Object) -> Self {
        Self { value }
    }
}

impl ManagedObject for ValueObject {
    fn object(&self) -> Result<Object, Escalation> {
        Ok(self.value.clone())
    }
}

/// Source creating a fresh value synchronously
pub struct SyncSource<F> {
    factory: F,
}

impl<F> SyncSource<F>
where
    F: Fn() -> Result<Object, Escalation> + Send + Sync,
{
    /// Create a source from a factory closure
    #[must_use]
    pub fn new(factory: F) -> Self {
        Self { factory }
    }
}

impl<F> ManagedObjectSource for SyncSource<F>
where
    F: Fn() -> Result<Object, Escalation> + Send + Sync,
{
    fn source(&self, user: Box<dyn ObjectUser>) {
        match (self.factory)() {
            Ok(value) => user.set_managed_object(Box::new(ValueObject::new(value))),
            Err(failure) => user.set_failure(failure),
        }
    }
}

/// Source whose value is derived from its dependencies during coordination
pub struct DerivedSource<F> {
    derive: Arc<F>,
}

impl<F> DerivedSource<F>
where
    F: Fn(&[Object]) -> Result<Object, Escalation> + Send + Sync + 'static,
{
    /// Create a source from a derivation closure
    #[must_use]
    pub fn new(derive: F) -> Self {
        Self {
            derive: Arc::new(derive),
        }
    }
}

impl<F> ManagedObjectSource for DerivedSource<F>
where
    F: Fn(&[Object]) -> Result<Object, Escalation> + Send + Sync + 'static,
{
    fn source(&self, user: Box<dyn ObjectUser>) {
        user.set_managed_object(Box::new(DerivedObject {
            derive: self.derive.clone(),
            value: OnceLock::new(),
        }));
    }
}

struct DerivedObject<F> {
    derive: Arc<F>,
    value: OnceLock<Object>,
}

impl<F> ManagedObject for DerivedObject<F>
where
    F: Fn(&[Object]) -> Result<Object, Escalation> + Send + Sync,
{
    fn object(&self) -> Result<Object, Escalation> {
        self.value
            .get()
            .cloned()
            .ok_or_else(|| Escalation::illegal_state("derived object used before load"))
    }

    fn load_objects(&self, ctx: &mut dyn LoadContext) -> Result<(), Escalation> {
        let dependencies = (0..ctx.dependency_count())
            .map(|index| ctx.dependency(index))
            .collect::<Result<Vec<_>, _>>()?;
        let value = (self.derive)(&dependencies)?;
        let _ = self.value.set(value);
        Ok(())
    }
}
