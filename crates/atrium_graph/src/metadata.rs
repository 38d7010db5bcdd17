//! Immutable execution metadata.
//!
//! Everything here is produced once by the builder and then shared read-only
//! by every process the office runs. Cross references are plain indices into
//! the tables of [`crate::office::OfficeMetadata`].

use crate::config::TeamStrategy;
use crate::escalation::EscalationProcedure;
use atrium_core::{
    Capability, Duty, GovernanceFactory, InstigationStrategy, ManagedFunction,
    ManagedObjectSource, ObjectIndex, ObjectScope, TypeName,
};
use std::sync::Arc;
use std::time::Duration;

/// Position of a function in the office function table
pub type FunctionIndex = usize;

/// Position of a team in the office team table
pub type TeamIndex = usize;

/// Position of a governance in the office governance table
pub type GovernanceIndex = usize;

/// A team and how it executes jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TeamManagement {
    /// Team name
    pub name: String,
    /// Execution strategy
    pub strategy: TeamStrategy,
}

/// Resolved bound managed object
pub struct ManagedObjectMetadata {
    /// Bound name
    pub bound_name: String,
    /// Slot of the object within its scope
    pub index: ObjectIndex,
    /// Source of instances
    pub source: Arc<dyn ManagedObjectSource>,
    /// Type of the object
    pub object_type: TypeName,
    /// Dependencies in declared order
    pub dependencies: Vec<ObjectIndex>,
    /// Declared extension capabilities
    pub capabilities: Vec<Capability>,
    /// Bound on asynchronous operations
    pub async_timeout: Option<Duration>,
    /// Team recycling the object, `None` for the office default team
    pub recycle_team: Option<TeamIndex>,
}

impl ManagedObjectMetadata {
    /// Scope of the object
    #[must_use]
    pub fn scope(&self) -> ObjectScope {
        self.index.scope().unwrap_or(ObjectScope::Function)
    }
}

impl std::fmt::Debug for ManagedObjectMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedObjectMetadata")
            .field("bound_name", &self.bound_name)
            .field("index", &self.index)
            .field("object_type", &self.object_type)
            .field("dependencies", &self.dependencies)
            .field("capabilities", &self.capabilities)
            .field("async_timeout", &self.async_timeout)
            .field("recycle_team", &self.recycle_team)
            .finish_non_exhaustive()
    }
}

/// Resolved flow link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMetadata {
    /// Target function
    pub function: FunctionIndex,
    /// Instigation strategy
    pub strategy: InstigationStrategy,
    /// Declared argument type
    pub argument_type: Option<TypeName>,
}

/// Resolved governance
pub struct GovernanceMetadata {
    /// Governance name
    pub name: String,
    /// Position in the office governance table
    pub index: GovernanceIndex,
    /// Extension type governed
    pub extension_type: TypeName,
    /// Instance factory
    pub factory: Arc<dyn GovernanceFactory>,
    /// Team running the callbacks
    pub team: Option<TeamIndex>,
    /// Flows the callbacks may instigate
    pub flows: Vec<FlowMetadata>,
}

impl std::fmt::Debug for GovernanceMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GovernanceMetadata")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("extension_type", &self.extension_type)
            .field("team", &self.team)
            .field("flows", &self.flows)
            .finish_non_exhaustive()
    }
}

/// Object administered by a duty
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdministeredObject {
    /// Slot of the object
    pub index: ObjectIndex,
    /// Position of the matching capability on the object
    pub capability: usize,
}

/// Resolved pre or post administration
pub struct AdministrationMetadata {
    /// Administration name
    pub name: String,
    /// Duty run
    pub duty: Arc<dyn Duty>,
    /// Team running the duty
    pub team: Option<TeamIndex>,
    /// Extension type administered
    pub extension_type: TypeName,
    /// Administered objects
    pub objects: Vec<AdministeredObject>,
    /// Linked governances, by duty governance index
    pub governances: Vec<GovernanceIndex>,
    /// Flows the duty may instigate
    pub flows: Vec<FlowMetadata>,
}

impl std::fmt::Debug for AdministrationMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdministrationMetadata")
            .field("name", &self.name)
            .field("team", &self.team)
            .field("extension_type", &self.extension_type)
            .field("objects", &self.objects)
            .field("governances", &self.governances)
            .field("flows", &self.flows)
            .finish_non_exhaustive()
    }
}

/// Resolved function
pub struct FunctionMetadata {
    /// Function name
    pub name: String,
    /// Position in the office function table
    pub index: FunctionIndex,
    /// Body
    pub function: Arc<dyn ManagedFunction>,
    /// Responsible team
    pub team: Option<TeamIndex>,
    /// Slot read for each object link index
    pub object_links: Vec<ObjectIndex>,
    /// Managed objects to load, dependencies first
    pub required_objects: Vec<ObjectIndex>,
    /// Unified parameter type
    pub parameter_type: Option<TypeName>,
    /// Flow links by flow index
    pub flows: Vec<FlowMetadata>,
    /// Escalations handled by this function
    pub escalations: EscalationProcedure,
    /// Governances activated on entry; `None` under manual governance
    pub governance: Option<Vec<bool>>,
    /// Duties before the body
    pub pre_administration: Vec<AdministrationMetadata>,
    /// Duties after the body
    pub post_administration: Vec<AdministrationMetadata>,
    /// Function continuing the thread
    pub next: Option<FlowMetadata>,
    /// Type of the returned value
    pub return_type: Option<TypeName>,
}

impl FunctionMetadata {
    /// Whether the function activates governance `index` on entry
    #[must_use]
    pub fn activates_governance(&self, index: GovernanceIndex) -> bool {
        self.governance
            .as_ref()
            .and_then(|bits| bits.get(index).copied())
            .unwrap_or(false)
    }
}

impl std::fmt::Debug for FunctionMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionMetadata")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("team", &self.team)
            .field("object_links", &self.object_links)
            .field("required_objects", &self.required_objects)
            .field("parameter_type", &self.parameter_type)
            .field("flows", &self.flows)
            .field("escalations", &self.escalations)
            .field("governance", &self.governance)
            .field("pre_administration", &self.pre_administration)
            .field("post_administration", &self.post_administration)
            .field("next", &self.next)
            .field("return_type", &self.return_type)
            .finish_non_exhaustive()
    }
}
