//! Administration duty seam.

use crate::escalation::Escalation;
use crate::flow::FlowContext;
use crate::object::Object;
use std::sync::Arc;

/// Hook run before or after a function body
pub trait Duty: Send + Sync {
    /// Administer the extensions of the administered objects.
    ///
    /// `extensions` follows the order the administration lists its objects.
    ///
    /// # Errors
    ///
    /// A returned escalation is routed as if raised by the function
    fn administer(&self, extensions: &[Object], ctx: &mut dyn DutyContext)
        -> Result<(), Escalation>;
}

/// What a duty sees of its execution
pub trait DutyContext: FlowContext {
    /// Activate the governance linked at `governance`
    ///
    /// # Errors
    ///
    /// Returns an escalation if no governance is linked there
    fn activate_governance(&mut self, governance: usize) -> Result<(), Escalation>;

    /// Enforce the governance linked at `governance`
    ///
    /// # Errors
    ///
    /// Returns an escalation if no governance is linked there
    fn enforce_governance(&mut self, governance: usize) -> Result<(), Escalation>;

    /// Disregard the governance linked at `governance`
    ///
    /// # Errors
    ///
    /// Returns an escalation if no governance is linked there
    fn disregard_governance(&mut self, governance: usize) -> Result<(), Escalation>;
}

struct FnDuty<F>(F);

impl<F> Duty for FnDuty<F>
where
    F: Fn(&[Object], &mut dyn DutyContext) -> Result<(), Escalation> + Send + Sync,
{
    fn administer(
        &self,
        extensions: &[Object],
        ctx: &mut dyn DutyContext,
    ) -> Result<(), Escalation> {
        (self.0)(extensions, ctx)
    }
}

/// Build a duty from a closure
#[must_use]
pub fn duty_fn<F>(f: F) -> Arc<dyn Duty>
where
    F: Fn(&[Object], &mut dyn DutyContext) -> Result<(), Escalation> + Send + Sync + 'static,
{
    Arc::new(FnDuty(f))
}
