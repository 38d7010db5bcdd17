//! ATRIUM Core Types
//!
//! Value types and seam traits shared by every ATRIUM crate. Nothing here
//! schedules or owns threads; the graph builder and runtime depend on these
//! definitions and user code implements the seam traits.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod capability;
pub mod duty;
pub mod error;
pub mod escalation;
pub mod flow;
pub mod function;
pub mod governance;
pub mod id;
pub mod index;
pub mod issues;
pub mod object;
pub mod types;

// Re-exports
pub use capability::{extension_fn, Capability, ExtensionFactory, SelfExtension};
pub use duty::{duty_fn, Duty, DutyContext};
pub use error::{CoreError, CoreResult};
pub use escalation::{contain_panic, Escalation};
pub use flow::{FlowContext, FlowRecorder, FlowRequest, InstigationStrategy};
pub use function::{function_fn, FunctionContext, FunctionContextExt, FunctionResult, ManagedFunction};
pub use governance::{governance_fn, Governance, GovernanceContext, GovernanceFactory};
pub use id::{JobId, ProcessId, ThreadId};
pub use index::{ObjectIndex, ObjectScope};
pub use issues::{AssetKind, Issue, IssueCollector, IssueReporter};
pub use object::{
    downcast, object, AsyncCompletion, DerivedSource, LoadContext, ManagedObject,
    ManagedObjectSource, Object, ObjectUser, SyncSource, ValueObject,
};
pub use types::{TypeHierarchy, TypeName};
