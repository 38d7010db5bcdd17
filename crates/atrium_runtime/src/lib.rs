//! ATRIUM Runtime
//!
//! Runs compiled offices: teams execute function jobs, managed objects are
//! loaded and recycled per scope, escalations are routed to handlers and
//! governance is resolved when each thread ends.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod continuation;
pub mod engine;
pub mod executor;
pub mod lifecycle;
pub mod monitor;
pub mod process;
pub mod team;

pub use config::{KernelConfig, LeakDetection};
pub use engine::{Office, OfficeError};
pub use executor::{Command, FunctionJob, RecycleTask, ThreadCompletion};
pub use lifecycle::{Acquire, ContainerPhase, ManagedObjectContainer, SuspendLatch, Waiter};
pub use monitor::{Leak, Metrics, MetricsSnapshot};
pub use process::{ProcessCallback, ProcessHandle, ProcessOutcome};
pub use team::{LeaderFollowerTeam, PassiveTeam, Team, TeamError};
