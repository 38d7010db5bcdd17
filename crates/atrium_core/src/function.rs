//! Managed function seam.

use crate::escalation::Escalation;
use crate::flow::FlowContext;
use crate::id::ProcessId;
use crate::object::{downcast, Object};
use std::any::Any;
use std::sync::Arc;

/// Outcome of a function body
pub type FunctionResult = Result<Option<Object>, Escalation>;

/// A unit of business logic
pub trait ManagedFunction: Send + Sync {
    /// Run the body.
    ///
    /// # Errors
    ///
    /// A returned escalation is routed to the matching handler
    fn execute(&self, ctx: &mut dyn FunctionContext) -> FunctionResult;
}

struct FnFunction<F>(F);

impl<F> ManagedFunction for FnFunction<F>
where
    F: Fn(&mut dyn FunctionContext) -> FunctionResult + Send + Sync,
{
    fn execute(&self, ctx: &mut dyn FunctionContext) -> FunctionResult {
        (self.0)(ctx)
    }
}

/// Build a managed function from a closure
#[must_use]
pub fn function_fn<F>(f: F) -> Arc<dyn ManagedFunction>
where
    F: Fn(&mut dyn FunctionContext) -> FunctionResult + Send + Sync + 'static,
{
    Arc::new(FnFunction(f))
}

/// What a function body sees of its execution
pub trait FunctionContext: FlowContext {
    /// Name of the running function
    fn function_name(&self) -> &str;

    /// Process the function belongs to
    fn process_id(&self) -> ProcessId;

    /// Object linked at `index`; the parameter if that link is a parameter link
    ///
    /// # Errors
    ///
    /// Returns an escalation if nothing is linked there or the object failed
    fn object(&self, index: usize) -> Result<Object, Escalation>;

    /// Argument the function was invoked with
    fn parameter(&self) -> Option<Object>;

    /// Start storing the managed object linked at `index`.
    ///
    /// A store that does not complete before the body returns keeps the
    /// function suspended until it does; a failed store is escalated then.
    ///
    /// # Errors
    ///
    /// Returns an escalation if no managed object is linked there or it
    /// already has a store or invalidation in flight
    fn store(&mut self, index: usize) -> Result<(), Escalation>;

    /// Start invalidating the managed object linked at `index`.
    ///
    /// Completes like [`FunctionContext::store`]; the object can not be used
    /// afterwards.
    ///
    /// # Errors
    ///
    /// Returns an escalation if no managed object is linked there or it
    /// already has a store or invalidation in flight
    fn invalidate(&mut self, index: usize) -> Result<(), Escalation>;
}

/// Typed access helpers for any [`FunctionContext`]
pub trait FunctionContextExt {
    /// Linked object downcast to `T`
    ///
    /// # Errors
    ///
    /// Returns an escalation if the object is missing or of another type
    fn object_as<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, Escalation>;

    /// Parameter downcast to `T`
    ///
    /// # Errors
    ///
    /// Returns an escalation if there is no parameter or it is of another type
    fn parameter_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>, Escalation>;
}

impl<C: FunctionContext + ?Sized> FunctionContextExt for C {
    fn object_as<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, Escalation> {
        downcast(self.object(index)?, &format!("object {}", index))
    }

    fn parameter_as<T: Any + Send + Sync>(&self) -> Result<Arc<T>, Escalation> {
        let parameter = self
            .parameter()
            .ok_or_else(|| Escalation::illegal_state("no parameter"))?;
        downcast(parameter, "parameter")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::object;

    struct StubContext {
        objects: Vec<Object>,
        parameter: Option<Object>,
        flows: Vec<usize>,
        stored: Vec<usize>,
    }

    impl FlowContext for StubContext {
        fn do_flow(&mut self, flow: usize, _argument: Option<Object>) -> Result<(), Escalation> {
            self.flows.push(flow);
            Ok(())
        }
    }

    impl FunctionContext for StubContext {
        fn function_name(&self) -> &str {
            "stub"
        }

        fn process_id(&self) -> ProcessId {
            ProcessId::from_bytes([0; 16])
        }

        fn object(&self, index: usize) -> Result<Object, Escalation> {
            self.objects
                .get(index)
                .cloned()
                .ok_or_else(|| Escalation::illegal_state("no object"))
        }

        fn parameter(&self) -> Option<Object> {
            self.parameter.clone()
        }

        fn store(&mut self, index: usize) -> Result<(), Escalation> {
            self.stored.push(index);
            Ok(())
        }

        fn invalidate(&mut self, _index: usize) -> Result<(), Escalation> {
            Err(Escalation::illegal_state("read only"))
        }
    }

    #[test]
    fn test_function_fn() {
        let function = function_fn(|ctx| {
            let base = ctx.object_as::<u32>(0)?;
            let add = ctx.parameter_as::<u32>()?;
            ctx.do_flow(1, None)?;
            ctx.store(0)?;
            Ok(Some(object(*base + *add)))
        });

        let mut ctx = StubContext {
            objects: vec![object(40u32)],
            parameter: Some(object(2u32)),
            flows: Vec::new(),
            stored: Vec::new(),
        };
        let result = function.execute(&mut ctx).unwrap().unwrap();

        assert_eq!(*downcast::<u32>(result, "result").unwrap(), 42);
        assert_eq!(ctx.flows, vec![1]);
        assert_eq!(ctx.stored, vec![0]);
    }

    #[test]
    fn test_missing_parameter() {
        let ctx = StubContext {
            objects: Vec::new(),
            parameter: None,
            flows: Vec::new(),
            stored: Vec::new(),
        };
        assert!(ctx.parameter_as::<u32>().is_err());
        assert!(ctx.object_as::<u32>(0).is_err());
    }
}
