//! ATRIUM Dependency Graph Builder
//!
//! Turns a declarative [`OfficeConfiguration`] plus registered [`Factories`]
//! into immutable [`OfficeMetadata`]: functions with resolved object slots,
//! dependency-ordered managed objects, flow, escalation and governance links.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod builder;
pub mod config;
pub mod escalation;
pub mod factories;
pub mod metadata;
pub mod office;
pub mod ordering;

pub use builder::OfficeBuilder;
pub use config::{
    AdministrationConfiguration, ConfigError, EscalationConfiguration, ExtensionConfiguration,
    FlowConfiguration, FunctionConfiguration, GovernanceConfiguration, ManagedObjectConfiguration,
    NextConfiguration, ObjectLink, ObjectLinkKind, OfficeConfiguration, TeamConfiguration,
    TeamStrategy, TypeDeclaration,
};
pub use escalation::{EscalationEntry, EscalationProcedure};
pub use factories::Factories;
pub use metadata::{
    AdministeredObject, AdministrationMetadata, FlowMetadata, FunctionIndex, FunctionMetadata,
    GovernanceIndex, GovernanceMetadata, ManagedObjectMetadata, TeamIndex, TeamManagement,
};
pub use office::OfficeMetadata;
pub use ordering::{order_dependencies, CyclicDependency};
