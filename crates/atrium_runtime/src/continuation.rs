//! Per-thread continuation: what runs next and who handles escalations.
//!
//! A thread's remaining work is a stack of activations. The bottom one is the
//! thread's own chain; every sequential flow pushes an activation owned by
//! the function that instigated it. Escalations not handled by the failing
//! function walk the stack outward, consulting each owner's escalation table.

use crate::executor::FunctionJob;
use crate::process::ProcessOutcome;
use atrium_core::{object, Escalation, Object};
use atrium_graph::{FunctionIndex, FunctionMetadata, OfficeMetadata};
use std::collections::VecDeque;

/// A unit of pending work
pub(crate) enum Work {
    /// Start a function
    Call {
        function: FunctionIndex,
        argument: Option<Object>,
    },
    /// Continue a function that yielded to its sequential flows
    Resume(Box<FunctionJob>),
}

impl Work {
    pub(crate) fn call(function: FunctionIndex, argument: Option<Object>) -> Self {
        Self::Call { function, argument }
    }
}

struct Activation {
    /// Function whose escalation table guards this activation
    owner: Option<FunctionIndex>,
    pending: VecDeque<Work>,
}

impl Activation {
    fn new(owner: Option<FunctionIndex>, work: Work) -> Self {
        Self {
            owner,
            pending: VecDeque::from([work]),
        }
    }
}

/// Where an escalation went
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Routing {
    /// A handler was scheduled
    Handled { handler: FunctionIndex },
    /// No handler anywhere; fatal to the process
    Unhandled,
}

pub(crate) struct Continuation {
    activations: Vec<Activation>,
    last_value: Option<Object>,
    handled: Option<Escalation>,
    failure: Option<Escalation>,
}

impl Continuation {
    pub(crate) fn new(function: FunctionIndex, argument: Option<Object>) -> Self {
        Self {
            activations: vec![Activation::new(None, Work::call(function, argument))],
            last_value: None,
            handled: None,
            failure: None,
        }
    }

    /// Next unit of work, or `None` when the thread has nothing left
    pub(crate) fn next(&mut self) -> Option<Work> {
        while let Some(top) = self.activations.last_mut() {
            if let Some(work) = top.pending.pop_front() {
                return Some(work);
            }
            self.activations.pop();
        }
        None
    }

    /// Record a completed function and schedule what follows it: its
    /// sequential flows in instigation order, then its next function.
    pub(crate) fn complete(
        &mut self,
        function: &FunctionMetadata,
        value: Option<Object>,
        sequential: Vec<Work>,
    ) {
        if let Some(next) = &function.next {
            self.current().push_front(Work::call(next.function, value.clone()));
        }
        self.last_value = value;
        self.push_flows(Some(function.index), sequential);
    }

    /// Park a function behind sequential flows it instigated before its body
    pub(crate) fn yield_to_flows(&mut self, job: Box<FunctionJob>, sequential: Vec<Work>) {
        let owner = job.function();
        self.current().push_front(Work::Resume(job));
        self.push_flows(Some(owner), sequential);
    }

    /// Schedule sequential flows, each in its own activation, first flow on top
    pub(crate) fn push_flows(&mut self, owner: Option<FunctionIndex>, sequential: Vec<Work>) {
        for work in sequential.into_iter().rev() {
            self.activations.push(Activation::new(owner, work));
        }
    }

    fn current(&mut self) -> &mut VecDeque<Work> {
        if self.activations.is_empty() {
            self.activations.push(Activation {
                owner: None,
                pending: VecDeque::new(),
            });
        }
        let last = self.activations.len() - 1;
        &mut self.activations[last].pending
    }

    /// Route an escalation raised by `failing`.
    ///
    /// Work discarded by the routing is returned so the caller can drop it
    /// outside any lock.
    pub(crate) fn escalate(
        &mut self,
        office: &OfficeMetadata,
        failing: FunctionIndex,
        escalation: &Escalation,
    ) -> (Routing, Vec<Work>) {
        let kind = escalation.kind().as_str();
        let mut discarded = Vec::new();

        let own = office
            .function(failing)
            .and_then(|function| function.escalations.resolve(&office.types, kind));
        if let Some(entry) = own {
            let handler = entry.handler;
            self.handle(escalation, handler, true);
            return (Routing::Handled { handler }, discarded);
        }

        while let Some(activation) = self.activations.pop() {
            let owner = activation.owner;
            discarded.extend(activation.pending);

            let entry = owner
                .and_then(|owner| office.function(owner))
                .and_then(|function| function.escalations.resolve(&office.types, kind));
            if let Some(entry) = entry {
                let handler = entry.handler;
                self.handle(escalation, handler, false);
                return (Routing::Handled { handler }, discarded);
            }
        }

        let handler = office
            .escalations
            .resolve(&office.types, kind)
            .map(|entry| entry.handler)
            .or(office.default_escalation_handler);
        match handler {
            Some(handler) => {
                self.handle(escalation, handler, false);
                (Routing::Handled { handler }, discarded)
            }
            None => (Routing::Unhandled, discarded),
        }
    }

    fn handle(&mut self, escalation: &Escalation, handler: FunctionIndex, own: bool) {
        let work = Work::call(handler, Some(object(escalation.clone())));
        if own {
            // replaces the failing function within its own activation
            self.current().push_front(work);
        } else {
            // runs in place of the scope that handled it
            self.activations.push(Activation::new(None, work));
        }
        self.handled = Some(escalation.clone());
    }

    /// Fail the thread, discarding all remaining work
    pub(crate) fn fail(&mut self, failure: Escalation) -> Vec<Work> {
        if self.failure.is_none() {
            self.failure = Some(failure);
        }
        self.activations
            .drain(..)
            .flat_map(|activation| activation.pending)
            .collect()
    }

    /// Check if the thread failed
    pub(crate) fn has_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Check if work remains
    pub(crate) fn has_work(&self) -> bool {
        self.activations
            .iter()
            .any(|activation| !activation.pending.is_empty())
    }

    /// Outcome of the thread so far
    pub(crate) fn outcome(&self) -> ProcessOutcome {
        match (&self.failure, &self.handled) {
            (Some(failure), _) => ProcessOutcome::Failed(failure.clone()),
            (None, Some(handled)) => ProcessOutcome::Recovered {
                handled: handled.clone(),
                value: self.last_value.clone(),
            },
            (None, None) => ProcessOutcome::Completed(self.last_value.clone()),
        }
    }
}
