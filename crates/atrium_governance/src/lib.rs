//! ATRIUM Governance
//!
//! Cross-cutting control over the extension views of managed objects.
//! Governance is activated per thread, governs every matching object a
//! function loads, and is resolved by enforce or disregard. Objects under
//! governance cannot be unloaded until that resolution.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod container;
pub mod engine;
pub mod gate;

pub use container::{GovernanceContainer, GovernanceOutcome, InstigatedFlow};
pub use engine::GovernanceEngine;
pub use gate::{DeferredUnload, UnloadGate};
