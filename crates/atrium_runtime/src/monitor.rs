//! Office monitor: runtime metrics, asynchronous timeouts and leak detection.
//!
//! Every managed object container the office creates is registered here. A
//! background thread sweeps the registry at the configured interval and fails
//! asynchronous operations that outlived their timeout. On close the
//! registry reports containers that were loaded but never unloaded.

use crate::config::KernelConfig;
use crate::lifecycle::{ContainerPhase, ManagedObjectContainer};
use crate::process::ProcessOutcome;
use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Runtime counters of an office
#[derive(Debug, Default)]
pub struct Metrics {
    processes_started: AtomicU64,
    processes_completed: AtomicU64,
    processes_recovered: AtomicU64,
    processes_failed: AtomicU64,
    functions_executed: AtomicU64,
    escalations_handled: AtomicU64,
    escalations_unhandled: AtomicU64,
    async_timeouts: AtomicU64,
    objects_recycled: AtomicU64,
    commands_rejected: AtomicU64,
}

impl Metrics {
    /// Create zeroed metrics
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a process start
    pub fn record_process_started(&self) {
        self.processes_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a process ended
    pub fn record_process_outcome(&self, outcome: &ProcessOutcome) {
        let counter = match outcome {
            ProcessOutcome::Completed(_) => &self.processes_completed,
            ProcessOutcome::Recovered { .. } => &self.processes_recovered,
            ProcessOutcome::Failed(_) => &self.processes_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a function body execution
    pub fn record_function(&self) {
        self.functions_executed.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a routed escalation
    pub fn record_escalation(&self, handled: bool) {
        let counter = if handled {
            &self.escalations_handled
        } else {
            &self.escalations_unhandled
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record an asynchronous timeout
    pub fn record_timeout(&self) {
        self.async_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a recycle handed to a team
    pub fn record_recycle(&self) {
        self.objects_recycled.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a command refused by a stopped team
    pub fn record_rejected(&self) {
        self.commands_rejected.fetch_add(1, Ordering::Relaxed);
    }

    /// Capture the current values
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let load = |counter: &AtomicU64| counter.load(Ordering::Relaxed);
        MetricsSnapshot {
            processes_started: load(&self.processes_started),
            processes_completed: load(&self.processes_completed),
            processes_recovered: load(&self.processes_recovered),
            processes_failed: load(&self.processes_failed),
            functions_executed: load(&self.functions_executed),
            escalations_handled: load(&self.escalations_handled),
            escalations_unhandled: load(&self.escalations_unhandled),
            async_timeouts: load(&self.async_timeouts),
            objects_recycled: load(&self.objects_recycled),
            commands_rejected: load(&self.commands_rejected),
        }
    }
}

/// Point-in-time copy of [`Metrics`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Processes started
    pub processes_started: u64,
    /// Processes that completed normally
    pub processes_completed: u64,
    /// Processes that completed after handling an escalation
    pub processes_recovered: u64,
    /// Processes that failed
    pub processes_failed: u64,
    /// Function bodies executed
    pub functions_executed: u64,
    /// Escalations taken by a handler
    pub escalations_handled: u64,
    /// Escalations no handler took
    pub escalations_unhandled: u64,
    /// Asynchronous operations failed by timeout
    pub async_timeouts: u64,
    /// Managed objects recycled
    pub objects_recycled: u64,
    /// Commands refused by stopped teams
    pub commands_rejected: u64,
}

impl MetricsSnapshot {
    /// Processes that finished either way
    #[must_use]
    pub fn processes_finished(&self) -> u64 {
        self.processes_completed + self.processes_recovered + self.processes_failed
    }

    /// Get success rate (0.0 - 1.0)
    #[must_use]
    pub fn success_rate(&self) -> f64 {
        let finished = self.processes_finished();
        if finished == 0 {
            return 1.0;
        }
        (self.processes_completed + self.processes_recovered) as f64 / finished as f64
    }

    /// Get failure rate (0.0 - 1.0)
    #[must_use]
    pub fn failure_rate(&self) -> f64 {
        let finished = self.processes_finished();
        if finished == 0 {
            return 0.0;
        }
        self.processes_failed as f64 / finished as f64
    }
}

/// A container still loaded when the office closed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Leak {
    /// Bound name of the managed object
    pub bound_name: String,
    /// Phase it was left in
    pub phase: ContainerPhase,
}

#[derive(Default)]
struct Shared {
    metrics: Metrics,
    containers: Mutex<Vec<Weak<ManagedObjectContainer>>>,
    stopped: Mutex<bool>,
    wake: Condvar,
}

impl Shared {
    fn live(&self) -> Vec<Arc<ManagedObjectContainer>> {
        let mut containers = self.containers.lock();
        containers.retain(|container| container.strong_count() > 0);
        containers.iter().filter_map(Weak::upgrade).collect()
    }

    fn sweep(&self, now: Instant) -> usize {
        // checked outside the registry lock: a timeout resumes waiters, which
        // may run jobs that register new containers
        let mut timed_out = 0;
        for container in self.live() {
            if container.async_timeout().is_some() && container.check_timeout(now) {
                self.metrics.record_timeout();
                timed_out += 1;
            }
        }
        timed_out
    }
}

/// Sweeps asynchronous timeouts on a background thread
pub(crate) struct Monitor {
    shared: Arc<Shared>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Monitor {
    /// Start the sweep thread
    pub(crate) fn start(config: &KernelConfig) -> std::io::Result<Self> {
        let shared = Arc::new(Shared::default());
        let interval = config.monitor_interval();
        let handle = {
            let shared = Arc::clone(&shared);
            std::thread::Builder::new()
                .name(format!("{}-monitor", config.thread_name_prefix))
                .spawn(move || Self::run(&shared, interval))?
        };
        tracing::debug!(?interval, "monitor started");
        Ok(Self {
            shared,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn run(shared: &Shared, interval: Duration) {
        loop {
            {
                let mut stopped = shared.stopped.lock();
                if !*stopped {
                    shared.wake.wait_for(&mut stopped, interval);
                }
                if *stopped {
                    return;
                }
            }
            let timed_out = shared.sweep(Instant::now());
            if timed_out > 0 {
                tracing::debug!(timed_out, "monitor sweep");
            }
        }
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        &self.shared.metrics
    }

    pub(crate) fn register(&self, container: &Arc<ManagedObjectContainer>) {
        self.shared.containers.lock().push(Arc::downgrade(container));
    }

    /// Check every registered container now
    pub(crate) fn sweep(&self, now: Instant) -> usize {
        self.shared.sweep(now)
    }

    /// Containers loaded but never unloaded
    pub(crate) fn leaks(&self) -> Vec<Leak> {
        self.shared
            .live()
            .into_iter()
            .map(|container| Leak {
                bound_name: container.bound_name().to_string(),
                phase: container.phase(),
            })
            .filter(|leak| !matches!(leak.phase, ContainerPhase::Uncreated | ContainerPhase::Unloaded))
            .collect()
    }

    pub(crate) fn stop(&self) {
        *self.shared.stopped.lock() = true;
        self.shared.wake.notify_all();
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != std::thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for Monitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Monitor")
            .field("metrics", &self.shared.metrics.snapshot())
            .finish_non_exhaustive()
    }
}
