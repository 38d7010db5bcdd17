//! Governance seam.
//!
//! A governance instance lives for one thread of a process. It is created on
//! activation, receives every governed extension, and is resolved exactly once
//! by either [`Governance::enforce`] or [`Governance::disregard`].

use crate::escalation::Escalation;
use crate::flow::FlowContext;
use crate::object::Object;
use std::sync::Arc;

/// Cross-cutting control over object extensions
pub trait Governance: Send {
    /// Take control of an extension
    ///
    /// # Errors
    ///
    /// Returns the escalation raised by the governance
    fn govern(&mut self, extension: Object, ctx: &mut dyn GovernanceContext)
        -> Result<(), Escalation>;

    /// Commit the governed work
    ///
    /// # Errors
    ///
    /// Returns the escalation raised by the governance
    fn enforce(&mut self, ctx: &mut dyn GovernanceContext) -> Result<(), Escalation>;

    /// Abandon the governed work
    ///
    /// # Errors
    ///
    /// Returns the escalation raised by the governance
    fn disregard(&mut self, ctx: &mut dyn GovernanceContext) -> Result<(), Escalation>;
}

/// What a governance callback sees of its execution
pub trait GovernanceContext: FlowContext {
    /// Name of the governance
    fn governance_name(&self) -> &str;
}

/// Creates governance instances
pub trait GovernanceFactory: Send + Sync {
    /// New instance for one thread
    fn create_governance(&self) -> Box<dyn Governance>;
}

struct FnGovernanceFactory<F>(F);

impl<F> GovernanceFactory for FnGovernanceFactory<F>
where
    F: Fn() -> Box<dyn Governance> + Send + Sync,
{
    fn create_governance(&self) -> Box<dyn Governance> {
        (self.0)()
    }
}

/// Build a governance factory from a closure
#[must_use]
pub fn governance_fn<F>(f: F) -> Arc<dyn GovernanceFactory>
where
    F: Fn() -> Box<dyn Governance> + Send + Sync + 'static,
{
    Arc::new(FnGovernanceFactory(f))
}
