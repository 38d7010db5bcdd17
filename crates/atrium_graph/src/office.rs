//! Compiled office.

use crate::escalation::EscalationProcedure;
use crate::metadata::{
    FunctionIndex, FunctionMetadata, GovernanceMetadata, ManagedObjectMetadata, TeamIndex,
    TeamManagement,
};
use atrium_core::{ObjectIndex, ObjectScope, TypeHierarchy};
use indexmap::IndexMap;

/// The immutable result of building an office
#[derive(Debug)]
pub struct OfficeMetadata {
    /// Office name
    pub name: String,
    /// Declared types
    pub types: TypeHierarchy,
    /// Teams
    pub teams: Vec<TeamManagement>,
    /// Team for functions without a responsible team
    pub default_team: Option<TeamIndex>,
    /// One instance per process
    pub process_objects: Vec<ManagedObjectMetadata>,
    /// One instance per thread
    pub thread_objects: Vec<ManagedObjectMetadata>,
    /// One instance per function execution
    pub function_objects: Vec<ManagedObjectMetadata>,
    /// Governances
    pub governances: Vec<GovernanceMetadata>,
    /// Functions
    pub functions: Vec<FunctionMetadata>,
    /// Office-wide escalation handlers
    pub escalations: EscalationProcedure,
    /// Handler of last resort
    pub default_escalation_handler: Option<FunctionIndex>,
    /// Governance only activated by duties
    pub manual_governance: bool,
    pub(crate) function_names: IndexMap<String, FunctionIndex>,
}

impl OfficeMetadata {
    /// Function by index
    #[must_use]
    pub fn function(&self, index: FunctionIndex) -> Option<&FunctionMetadata> {
        self.functions.get(index)
    }

    /// Function by name
    #[must_use]
    pub fn function_by_name(&self, name: &str) -> Option<&FunctionMetadata> {
        self.function_names
            .get(name)
            .and_then(|index| self.functions.get(*index))
    }

    /// Managed objects of a scope
    #[must_use]
    pub fn objects(&self, scope: ObjectScope) -> &[ManagedObjectMetadata] {
        match scope {
            ObjectScope::Function => &self.function_objects,
            ObjectScope::Thread => &self.thread_objects,
            ObjectScope::Process => &self.process_objects,
        }
    }

    /// Managed object at a slot
    #[must_use]
    pub fn managed_object(&self, index: ObjectIndex) -> Option<&ManagedObjectMetadata> {
        match index {
            ObjectIndex::Parameter => None,
            ObjectIndex::Scoped { scope, index } => self.objects(scope).get(index),
        }
    }

    /// Team index by name
    #[must_use]
    pub fn team_by_name(&self, name: &str) -> Option<TeamIndex> {
        self.teams.iter().position(|team| team.name == name)
    }

    /// Iterate over all managed objects, process scope first
    pub fn all_objects(&self) -> impl Iterator<Item = &ManagedObjectMetadata> {
        self.process_objects
            .iter()
            .chain(&self.thread_objects)
            .chain(&self.function_objects)
    }
}
