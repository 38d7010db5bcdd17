//! Governance container state machine.
//!
//! One container per governance per thread. The container is either
//! inactive or holds the live governance instance together with the gates of
//! every object it governs:
//!
//! ```text
//! Inactive --activate--> Active --enforce / disregard--> Inactive
//!                          |  ^
//!                          +--+ govern
//! ```

use crate::gate::{DeferredUnload, UnloadGate};
use atrium_core::{
    contain_panic, Escalation, FlowContext, FlowRecorder, Governance, GovernanceContext, Object,
};
use atrium_graph::{FlowMetadata, GovernanceIndex, GovernanceMetadata};
use std::sync::Arc;

/// A flow instigated by a callback, resolved against its flow link
#[derive(Debug, Clone)]
pub struct InstigatedFlow {
    /// Flow link
    pub flow: FlowMetadata,
    /// Argument for the flow's function
    pub argument: Option<Object>,
}

/// What a governance callback left behind for the runtime
#[derive(Default)]
pub struct GovernanceOutcome {
    /// First escalation raised, if any
    pub failure: Option<Escalation>,
    /// Flows to dispatch
    pub flows: Vec<InstigatedFlow>,
    /// Unloads released by the gate, to run now
    pub unloads: Vec<DeferredUnload>,
}

impl GovernanceOutcome {
    /// Check if the callback succeeded
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.failure.is_none()
    }

    /// Fold another outcome into this one, keeping the first failure
    pub fn merge(&mut self, other: GovernanceOutcome) {
        if self.failure.is_none() {
            self.failure = other.failure;
        }
        self.flows.extend(other.flows);
        self.unloads.extend(other.unloads);
    }

    fn failed(failure: Escalation) -> Self {
        Self {
            failure: Some(failure),
            ..Self::default()
        }
    }
}

impl std::fmt::Debug for GovernanceOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceOutcome")
            .field("failure", &self.failure)
            .field("flows", &self.flows)
            .field("unloads", &self.unloads.len())
            .finish()
    }
}

/// Context handed to governance callbacks
struct CallbackContext<'a> {
    name: &'a str,
    recorder: FlowRecorder,
}

impl FlowContext for CallbackContext<'_> {
    fn do_flow(&mut self, flow: usize, argument: Option<Object>) -> Result<(), Escalation> {
        self.recorder.do_flow(flow, argument)
    }
}

impl GovernanceContext for CallbackContext<'_> {
    fn governance_name(&self) -> &str {
        self.name
    }
}

enum State {
    Inactive,
    Active {
        instance: Box<dyn Governance>,
        governed: Vec<Arc<UnloadGate>>,
    },
}

/// Per-thread state of one governance
pub struct GovernanceContainer {
    index: GovernanceIndex,
    state: State,
}

impl GovernanceContainer {
    /// Create an inactive container
    #[must_use]
    pub fn new(index: GovernanceIndex) -> Self {
        Self {
            index,
            state: State::Inactive,
        }
    }

    /// Governance index
    #[must_use]
    pub fn index(&self) -> GovernanceIndex {
        self.index
    }

    /// Check if active
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.state, State::Active { .. })
    }

    /// Number of objects currently governed
    #[must_use]
    pub fn governed_count(&self) -> usize {
        match &self.state {
            State::Inactive => 0,
            State::Active { governed, .. } => governed.len(),
        }
    }

    /// Check if the object behind `gate` is governed
    #[must_use]
    pub fn is_governing(&self, gate: &Arc<UnloadGate>) -> bool {
        match &self.state {
            State::Inactive => false,
            State::Active { governed, .. } => governed.iter().any(|held| Arc::ptr_eq(held, gate)),
        }
    }

    /// Create the governance instance unless already active.
    ///
    /// Returns `true` when the governance was activated by this call.
    ///
    /// # Errors
    ///
    /// Returns the escalation of a panicking factory
    pub fn activate(&mut self, metadata: &GovernanceMetadata) -> Result<bool, Escalation> {
        if self.is_active() {
            return Ok(false);
        }

        let instance = contain_panic(|| Ok(metadata.factory.create_governance()))?;
        tracing::debug!(governance = %metadata.name, "governance activated");
        self.state = State::Active {
            instance,
            governed: Vec::new(),
        };
        Ok(true)
    }

    /// Place an object's extension under governance.
    ///
    /// The object's gate is held until the governance is resolved. An object
    /// already governed is skipped.
    pub fn govern(
        &mut self,
        metadata: &GovernanceMetadata,
        extension: Object,
        gate: &Arc<UnloadGate>,
    ) -> GovernanceOutcome {
        let State::Active { instance, governed } = &mut self.state else {
            return GovernanceOutcome::failed(Escalation::illegal_state(format!(
                "Governance {} is not active",
                metadata.name
            )));
        };
        if governed.iter().any(|held| Arc::ptr_eq(held, gate)) {
            return GovernanceOutcome::default();
        }

        gate.hold();
        governed.push(Arc::clone(gate));

        let mut ctx = CallbackContext {
            name: &metadata.name,
            recorder: FlowRecorder::new(metadata.flows.len()),
        };
        let result = contain_panic(|| instance.govern(extension, &mut ctx));
        Self::outcome(metadata, result, ctx.recorder, Vec::new())
    }

    /// Commit: call `enforce` and release every governed object
    pub fn enforce(&mut self, metadata: &GovernanceMetadata) -> GovernanceOutcome {
        self.resolve(metadata, true)
    }

    /// Roll back: call `disregard` and release every governed object
    pub fn disregard(&mut self, metadata: &GovernanceMetadata) -> GovernanceOutcome {
        self.resolve(metadata, false)
    }

    fn resolve(&mut self, metadata: &GovernanceMetadata, enforce: bool) -> GovernanceOutcome {
        let State::Active {
            mut instance,
            governed,
        } = std::mem::replace(&mut self.state, State::Inactive)
        else {
            return GovernanceOutcome::default();
        };

        let mut ctx = CallbackContext {
            name: &metadata.name,
            recorder: FlowRecorder::new(metadata.flows.len()),
        };
        let result = contain_panic(|| {
            if enforce {
                instance.enforce(&mut ctx)
            } else {
                instance.disregard(&mut ctx)
            }
        });
        tracing::debug!(
            governance = %metadata.name,
            enforce,
            governed = governed.len(),
            success = result.is_ok(),
            "governance resolved"
        );

        let unloads = governed.iter().filter_map(|gate| gate.release()).collect();
        Self::outcome(metadata, result, ctx.recorder, unloads)
    }

    fn outcome(
        metadata: &GovernanceMetadata,
        result: Result<(), Escalation>,
        recorder: FlowRecorder,
        unloads: Vec<DeferredUnload>,
    ) -> GovernanceOutcome {
        let flows = recorder
            .into_requests()
            .into_iter()
            .filter_map(|request| {
                metadata.flows.get(request.flow).map(|flow| InstigatedFlow {
                    flow: flow.clone(),
                    argument: request.argument,
                })
            })
            .collect();

        GovernanceOutcome {
            failure: result.err(),
            flows,
            unloads,
        }
    }
}

impl std::fmt::Debug for GovernanceContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceContainer")
            .field("index", &self.index)
            .field("active", &self.is_active())
            .field("governed", &self.governed_count())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use atrium_core::{object, GovernanceFactory, InstigationStrategy, TypeName};
    use parking_lot::Mutex;

    /// Governance recording its callbacks into a shared log
    pub(crate) struct Recording {
        pub(crate) log: Arc<Mutex<Vec<String>>>,
        pub(crate) fail_enforce: bool,
        pub(crate) flow_on_enforce: bool,
    }

    impl Governance for Recording {
        fn govern(
            &mut self,
            extension: Object,
            _ctx: &mut dyn GovernanceContext,
        ) -> Result<(), Escalation> {
            let value = extension.downcast_ref::<u32>().copied().unwrap_or_default();
            self.log.lock().push(format!("govern {}", value));
            Ok(())
        }

        fn enforce(&mut self, ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
            self.log.lock().push(format!("enforce {}", ctx.governance_name()));
            if self.flow_on_enforce {
                ctx.do_flow(0, Some(object(9u32)))?;
            }
            if self.fail_enforce {
                return Err(Escalation::new("CommitFailed", "enforce failed"));
            }
            Ok(())
        }

        fn disregard(&mut self, ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
            self.log.lock().push(format!("disregard {}", ctx.governance_name()));
            Ok(())
        }
    }

    pub(crate) struct RecordingFactory {
        pub(crate) log: Arc<Mutex<Vec<String>>>,
        pub(crate) fail_enforce: bool,
        pub(crate) flow_on_enforce: bool,
    }

    impl GovernanceFactory for RecordingFactory {
        fn create_governance(&self) -> Box<dyn Governance> {
            self.log.lock().push("create".to_string());
            Box::new(Recording {
                log: Arc::clone(&self.log),
                fail_enforce: self.fail_enforce,
                flow_on_enforce: self.flow_on_enforce,
            })
        }
    }

    pub(crate) fn metadata(
        index: GovernanceIndex,
        log: &Arc<Mutex<Vec<String>>>,
        fail_enforce: bool,
    ) -> GovernanceMetadata {
        GovernanceMetadata {
            name: format!("TX{}", index),
            index,
            extension_type: TypeName::from("Transaction"),
            factory: Arc::new(RecordingFactory {
                log: Arc::clone(log),
                fail_enforce,
                flow_on_enforce: true,
            }),
            team: None,
            flows: vec![FlowMetadata {
                function: 4,
                strategy: InstigationStrategy::Parallel,
                argument_type: None,
            }],
        }
    }

    #[test]
    fn test_activate_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let metadata = metadata(0, &log, false);
        let mut container = GovernanceContainer::new(0);

        assert!(container.activate(&metadata).unwrap());
        assert!(!container.activate(&metadata).unwrap());
        assert!(container.is_active());
        assert_eq!(log.lock().as_slice(), ["create"]);
    }

    #[test]
    fn test_govern_requires_active() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let metadata = metadata(0, &log, false);
        let mut container = GovernanceContainer::new(0);
        let gate = Arc::new(UnloadGate::new());

        let outcome = container.govern(&metadata, object(1u32), &gate);
        assert!(!outcome.is_success());
        assert!(gate.is_unload_permitted());
    }

    #[test]
    fn test_govern_holds_gate_once() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let metadata = metadata(0, &log, false);
        let mut container = GovernanceContainer::new(0);
        let gate = Arc::new(UnloadGate::new());

        container.activate(&metadata).unwrap();
        assert!(container.govern(&metadata, object(1u32), &gate).is_success());
        assert!(container.govern(&metadata, object(1u32), &gate).is_success());

        assert_eq!(gate.holds(), 1);
        assert_eq!(container.governed_count(), 1);
        assert!(container.is_governing(&gate));
        assert_eq!(log.lock().as_slice(), ["create", "govern 1"]);
    }

    #[test]
    fn test_enforce_releases_and_flows() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let metadata = metadata(0, &log, false);
        let mut container = GovernanceContainer::new(0);
        let gate = Arc::new(UnloadGate::new());

        container.activate(&metadata).unwrap();
        let _ = container.govern(&metadata, object(1u32), &gate);
        assert!(gate.request_unload(Box::new(|| {})).is_none());

        let outcome = container.enforce(&metadata);
        assert!(outcome.is_success());
        assert_eq!(outcome.unloads.len(), 1);
        assert_eq!(outcome.flows.len(), 1);
        assert_eq!(outcome.flows[0].flow.function, 4);
        assert!(!container.is_active());
        assert!(gate.is_unload_permitted());
    }

    #[test]
    fn test_failed_enforce_still_releases() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let metadata = metadata(0, &log, true);
        let mut container = GovernanceContainer::new(0);
        let gate = Arc::new(UnloadGate::new());

        container.activate(&metadata).unwrap();
        let _ = container.govern(&metadata, object(1u32), &gate);

        let outcome = container.enforce(&metadata);
        assert_eq!(outcome.failure.unwrap().kind().as_str(), "CommitFailed");
        assert!(gate.is_unload_permitted());
        assert!(!container.is_active());
    }

    #[test]
    fn test_inactive_resolution_is_noop() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let metadata = metadata(0, &log, false);
        let mut container = GovernanceContainer::new(0);

        let outcome = container.disregard(&metadata);
        assert!(outcome.is_success());
        assert!(outcome.flows.is_empty());
        assert!(log.lock().is_empty());
    }

    #[test]
    fn test_panicking_governance_contained() {
        struct Panicking;
        impl Governance for Panicking {
            fn govern(&mut self, _: Object, _: &mut dyn GovernanceContext) -> Result<(), Escalation> {
                panic!("govern exploded")
            }
            fn enforce(&mut self, _: &mut dyn GovernanceContext) -> Result<(), Escalation> {
                Ok(())
            }
            fn disregard(&mut self, _: &mut dyn GovernanceContext) -> Result<(), Escalation> {
                Ok(())
            }
        }

        let metadata = GovernanceMetadata {
            name: "P".to_string(),
            index: 0,
            extension_type: TypeName::from("Transaction"),
            factory: atrium_core::governance_fn(|| Box::new(Panicking) as Box<dyn Governance>),
            team: None,
            flows: Vec::new(),
        };
        let mut container = GovernanceContainer::new(0);
        let gate = Arc::new(UnloadGate::new());

        container.activate(&metadata).unwrap();
        let outcome = container.govern(&metadata, object(1u32), &gate);
        assert_eq!(outcome.failure.unwrap().message(), "govern exploded");

        // still held until resolution
        assert_eq!(gate.holds(), 1);
        let _ = container.disregard(&metadata);
        assert!(gate.is_unload_permitted());
    }
}
