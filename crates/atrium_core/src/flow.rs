//! Flow instigation.

use crate::escalation::Escalation;
use crate::object::Object;
use serde::{Deserialize, Serialize};

/// How an instigated flow runs relative to its instigator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstigationStrategy {
    /// Runs to completion before the instigator continues
    #[default]
    Sequential,
    /// Runs concurrently within the same process
    Parallel,
    /// Runs as a new independent process
    Asynchronous,
}

impl std::fmt::Display for InstigationStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sequential => write!(f, "sequential"),
            Self::Parallel => write!(f, "parallel"),
            Self::Asynchronous => write!(f, "asynchronous"),
        }
    }
}

/// Anything able to instigate its linked flows
pub trait FlowContext {
    /// Instigate the flow at `flow` with an optional argument.
    ///
    /// The flow starts once the current callback returns; the strategy of the
    /// flow link decides whether the caller waits for it.
    ///
    /// # Errors
    ///
    /// Returns an escalation if no flow is linked at that index
    fn do_flow(&mut self, flow: usize, argument: Option<Object>) -> Result<(), Escalation>;
}

/// A flow instigated during a callback, dispatched once the callback returns
#[derive(Debug, Clone)]
pub struct FlowRequest {
    /// Flow index
    pub flow: usize,
    /// Argument passed to the flow's function
    pub argument: Option<Object>,
}

/// Records instigated flows against a fixed number of flow links
#[derive(Debug, Default)]
pub struct FlowRecorder {
    linked: usize,
    requests: Vec<FlowRequest>,
}

impl FlowRecorder {
    /// Create a recorder accepting flow indices below `linked`
    #[must_use]
    pub fn new(linked: usize) -> Self {
        Self {
            linked,
            requests: Vec::new(),
        }
    }

    /// Recorded requests in instigation order
    #[must_use]
    pub fn requests(&self) -> &[FlowRequest] {
        &self.requests
    }

    /// Take the recorded requests
    #[must_use]
    pub fn into_requests(self) -> Vec<FlowRequest> {
        self.requests
    }
}

impl FlowContext for FlowRecorder {
    fn do_flow(&mut self, flow: usize, argument: Option<Object>) -> Result<(), Escalation> {
        if flow >= self.linked {
            return Err(Escalation::illegal_state(format!(
                "No flow linked at index {}",
                flow
            )));
        }
        self.requests.push(FlowRequest { flow, argument });
        Ok(())
    }
}
