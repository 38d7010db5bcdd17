//! Per-thread governance engine.

use crate::container::{GovernanceContainer, GovernanceOutcome};
use crate::gate::UnloadGate;
use atrium_core::{Escalation, Object, TypeHierarchy};
use atrium_graph::{GovernanceIndex, GovernanceMetadata};
use std::sync::Arc;

/// Governance state of one thread.
///
/// Holds a [`GovernanceContainer`] for every governance of the office. The
/// runtime activates governance as functions enter, governs the extensions of
/// loaded objects, and resolves whatever is still active when the thread
/// ends.
#[derive(Debug)]
pub struct GovernanceEngine {
    containers: Vec<GovernanceContainer>,
}

impl GovernanceEngine {
    /// Create an engine with every governance inactive
    #[must_use]
    pub fn new(governances: &[GovernanceMetadata]) -> Self {
        Self {
            containers: governances
                .iter()
                .map(|governance| GovernanceContainer::new(governance.index))
                .collect(),
        }
    }

    /// Check if governance `index` is active
    #[must_use]
    pub fn is_active(&self, index: GovernanceIndex) -> bool {
        self.containers
            .get(index)
            .is_some_and(GovernanceContainer::is_active)
    }

    /// Active governances in office order
    #[must_use]
    pub fn active(&self) -> Vec<GovernanceIndex> {
        self.containers
            .iter()
            .filter(|container| container.is_active())
            .map(GovernanceContainer::index)
            .collect()
    }

    /// Check if any governance is active
    #[must_use]
    pub fn has_active(&self) -> bool {
        self.containers.iter().any(GovernanceContainer::is_active)
    }

    /// Whether an extension of type `extension_type` falls under the governance
    #[must_use]
    pub fn governs_type(
        types: &TypeHierarchy,
        metadata: &GovernanceMetadata,
        extension_type: &str,
    ) -> bool {
        types.is_assignable(extension_type, metadata.extension_type.as_str())
    }

    /// Activate a governance for this thread.
    ///
    /// # Errors
    ///
    /// Returns an escalation for an unknown governance or a failing factory
    pub fn activate(&mut self, metadata: &GovernanceMetadata) -> Result<bool, Escalation> {
        self.container(metadata)?.activate(metadata)
    }

    /// Govern an object's extension under an active governance
    pub fn govern(
        &mut self,
        metadata: &GovernanceMetadata,
        extension: Object,
        gate: &Arc<UnloadGate>,
    ) -> GovernanceOutcome {
        match self.container(metadata) {
            Ok(container) => container.govern(metadata, extension, gate),
            Err(failure) => GovernanceOutcome {
                failure: Some(failure),
                ..GovernanceOutcome::default()
            },
        }
    }

    /// Check if an active governance already governs the object behind `gate`
    #[must_use]
    pub fn is_governing(&self, index: GovernanceIndex, gate: &Arc<UnloadGate>) -> bool {
        self.containers
            .get(index)
            .is_some_and(|container| container.is_governing(gate))
    }

    /// Enforce a governance
    pub fn enforce(&mut self, metadata: &GovernanceMetadata) -> GovernanceOutcome {
        self.resolve(metadata, true)
    }

    /// Disregard a governance
    pub fn disregard(&mut self, metadata: &GovernanceMetadata) -> GovernanceOutcome {
        self.resolve(metadata, false)
    }

    fn resolve(&mut self, metadata: &GovernanceMetadata, enforce: bool) -> GovernanceOutcome {
        match self.container(metadata) {
            Ok(container) if enforce => container.enforce(metadata),
            Ok(container) => container.disregard(metadata),
            Err(failure) => GovernanceOutcome {
                failure: Some(failure),
                ..GovernanceOutcome::default()
            },
        }
    }

    fn container(
        &mut self,
        metadata: &GovernanceMetadata,
    ) -> Result<&mut GovernanceContainer, Escalation> {
        self.containers.get_mut(metadata.index).ok_or_else(|| {
            Escalation::illegal_state(format!("Unknown governance {}", metadata.name))
        })
    }
}
