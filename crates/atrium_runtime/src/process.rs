//! Processes, threads and suspensions.
//!
//! A process is one invocation of the office. It owns the PROCESS scoped
//! managed objects and counts its live threads; the last thread to finish
//! unloads the process objects and reports the outcome. A thread is one flow
//! of control: it owns the THREAD scoped objects, the continuation that
//! decides what runs next and the thread's governance.

use crate::continuation::{Continuation, Work};
use crate::engine::OfficeShared;
use crate::executor::{Command, FunctionJob, ThreadCompletion};
use crate::lifecycle::{ManagedObjectContainer, Waiter};
use atrium_core::{contain_panic, Escalation, Object, ObjectScope, ProcessId, ThreadId};
use atrium_governance::GovernanceEngine;
use atrium_graph::{FunctionIndex, TeamIndex};
use parking_lot::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

/// Receives the outcome of a process
pub type ProcessCallback = Box<dyn FnOnce(ProcessOutcome) + Send>;

/// How a process ended
#[derive(Debug, Clone)]
pub enum ProcessOutcome {
    /// The function chain completed with its last value
    Completed(Option<Object>),
    /// An escalation was handled; the handler's value stands
    Recovered {
        /// The escalation that was handled
        handled: Escalation,
        /// Value of the last function to complete
        value: Option<Object>,
    },
    /// The process failed
    Failed(Escalation),
}

impl ProcessOutcome {
    /// Check if the process did not fail
    #[must_use]
    pub fn is_success(&self) -> bool {
        !matches!(self, Self::Failed(_))
    }

    /// Value the process completed with
    #[must_use]
    pub fn value(&self) -> Option<&Object> {
        match self {
            Self::Completed(value) | Self::Recovered { value, .. } => value.as_ref(),
            Self::Failed(_) => None,
        }
    }

    /// Escalation the process failed with
    #[must_use]
    pub fn failure(&self) -> Option<&Escalation> {
        match self {
            Self::Failed(failure) => Some(failure),
            _ => None,
        }
    }

    pub(crate) fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Recovered { .. } => "recovered",
            Self::Failed(_) => "failed",
        }
    }
}

#[derive(Default)]
struct Completion {
    main: Option<ProcessOutcome>,
    fatal: Option<Escalation>,
    callback: Option<ProcessCallback>,
}

pub(crate) struct ProcessState {
    id: ProcessId,
    office: Arc<OfficeShared>,
    objects: Vec<Arc<ManagedObjectContainer>>,
    cancelled: AtomicBool,
    complete: AtomicBool,
    threads: AtomicUsize,
    completion: Mutex<Completion>,
    suspensions: Mutex<Vec<Weak<Suspension>>>,
}

impl ProcessState {
    /// Start a process whose main thread runs `function`
    pub(crate) fn start(
        office: &Arc<OfficeShared>,
        function: FunctionIndex,
        argument: Option<Object>,
        callback: Option<ProcessCallback>,
        current: Option<TeamIndex>,
    ) -> Arc<Self> {
        let objects = office
            .metadata()
            .objects(ObjectScope::Process)
            .iter()
            .map(|metadata| office.container(metadata))
            .collect();
        let process = Arc::new(Self {
            id: ProcessId::new(),
            office: Arc::clone(office),
            objects,
            cancelled: AtomicBool::new(false),
            complete: AtomicBool::new(false),
            threads: AtomicUsize::new(1),
            completion: Mutex::new(Completion {
                callback,
                ..Completion::default()
            }),
            suspensions: Mutex::new(Vec::new()),
        });

        office.metrics().record_process_started();
        tracing::debug!(process = %process.id, function, "process started");
        ThreadState::new(&process, function, argument, true).start(current);
        process
    }

    pub(crate) fn id(&self) -> ProcessId {
        self.id
    }

    pub(crate) fn office(&self) -> &Arc<OfficeShared> {
        &self.office
    }

    pub(crate) fn objects(&self) -> &[Arc<ManagedObjectContainer>] {
        &self.objects
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }

    /// Cancel the process, waking every suspended job so it observes the
    /// cancellation
    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::debug!(process = %self.id, "process cancelled");
        let suspensions = std::mem::take(&mut *self.suspensions.lock());
        for suspension in suspensions.iter().filter_map(Weak::upgrade) {
            suspension.resume();
        }
    }

    /// Record an escalation no handler took and cancel the process
    pub(crate) fn fatal(&self, failure: Escalation) {
        {
            let mut completion = self.completion.lock();
            if completion.fatal.is_none() {
                completion.fatal = Some(failure);
            }
        }
        self.cancel();
    }

    /// Make `suspension` reachable by cancellation
    pub(crate) fn track(&self, suspension: &Arc<Suspension>) {
        {
            let mut suspensions = self.suspensions.lock();
            suspensions.retain(|held| held.strong_count() > 0);
            suspensions.push(Arc::downgrade(suspension));
        }
        if self.is_cancelled() {
            suspension.resume();
        }
    }

    /// Start a parallel thread in this process
    pub(crate) fn spawn_thread(
        self: &Arc<Self>,
        function: FunctionIndex,
        argument: Option<Object>,
        current: Option<TeamIndex>,
    ) {
        self.threads.fetch_add(1, Ordering::AcqRel);
        ThreadState::new(self, function, argument, false).start(current);
    }

    pub(crate) fn thread_finished(&self, main: bool, outcome: ProcessOutcome) {
        if main {
            self.completion.lock().main = Some(outcome);
        } else if let ProcessOutcome::Failed(failure) = outcome {
            if !failure.is_cancellation() {
                self.fatal(failure);
            }
        }

        if self.threads.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.finish();
        }
    }

    fn finish(&self) {
        for container in &self.objects {
            container.unload(self.office.recycler(container.recycle_team()));
        }

        let (outcome, callback) = {
            let mut completion = self.completion.lock();
            let outcome = match (completion.fatal.take(), completion.main.take()) {
                (Some(fatal), _) => ProcessOutcome::Failed(fatal),
                (None, Some(main)) => main,
                (None, None) => ProcessOutcome::Failed(Escalation::illegal_state(
                    "Process finished without an outcome",
                )),
            };
            (outcome, completion.callback.take())
        };
        self.complete.store(true, Ordering::Release);
        self.office.metrics().record_process_outcome(&outcome);

        match outcome.failure() {
            Some(failure) => tracing::info!(process = %self.id, %failure, "process failed"),
            None => tracing::info!(process = %self.id, outcome = outcome.label(), "process finished"),
        }

        if let Some(callback) = callback {
            if let Err(failure) = contain_panic(|| {
                callback(outcome);
                Ok(())
            }) {
                tracing::warn!(process = %self.id, %failure, "process callback panicked");
            }
        }
    }
}

impl std::fmt::Debug for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessState")
            .field("id", &self.id)
            .field("cancelled", &self.is_cancelled())
            .field("threads", &self.threads.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

pub(crate) struct ThreadState {
    id: ThreadId,
    process: Arc<ProcessState>,
    main: bool,
    objects: Vec<Arc<ManagedObjectContainer>>,
    continuation: Mutex<Continuation>,
    governance: Mutex<GovernanceEngine>,
    cancellation_routed: AtomicBool,
}

impl ThreadState {
    fn new(
        process: &Arc<ProcessState>,
        function: FunctionIndex,
        argument: Option<Object>,
        main: bool,
    ) -> Arc<Self> {
        let office = process.office();
        let objects = office
            .metadata()
            .objects(ObjectScope::Thread)
            .iter()
            .map(|metadata| office.container(metadata))
            .collect();
        Arc::new(Self {
            id: ThreadId::new(),
            process: Arc::clone(process),
            main,
            objects,
            continuation: Mutex::new(Continuation::new(function, argument)),
            governance: Mutex::new(GovernanceEngine::new(&office.metadata().governances)),
            cancellation_routed: AtomicBool::new(false),
        })
    }

    /// Hand the thread's first function to its team
    fn start(self: &Arc<Self>, current: Option<TeamIndex>) {
        match self.advance(current) {
            Command::Function(mut job) => {
                let team = job.home();
                job.set_team(team);
                self.process.office().dispatch(team, Command::Function(job));
            }
            other => other.run(),
        }
    }

    pub(crate) fn id(&self) -> ThreadId {
        self.id
    }

    pub(crate) fn process(&self) -> &Arc<ProcessState> {
        &self.process
    }

    pub(crate) fn office(&self) -> &Arc<OfficeShared> {
        self.process.office()
    }

    pub(crate) fn is_main(&self) -> bool {
        self.main
    }

    pub(crate) fn objects(&self) -> &[Arc<ManagedObjectContainer>] {
        &self.objects
    }

    pub(crate) fn continuation(&self) -> MutexGuard<'_, Continuation> {
        self.continuation.lock()
    }

    pub(crate) fn governance(&self) -> MutexGuard<'_, GovernanceEngine> {
        self.governance.lock()
    }

    /// Check if the process was cancelled and this thread has yet to raise it
    pub(crate) fn cancellation_pending(&self) -> bool {
        self.process.is_cancelled() && !self.cancellation_routed.load(Ordering::Acquire)
    }

    /// Claim the cancellation for routing. Returns `true` once per thread,
    /// and only after the process was cancelled.
    pub(crate) fn take_cancellation(&self) -> bool {
        self.process.is_cancelled() && !self.cancellation_routed.swap(true, Ordering::AcqRel)
    }

    /// Make `suspension` reachable by a cancellation this thread has not
    /// raised yet
    pub(crate) fn track(&self, suspension: &Arc<Suspension>) {
        if !self.cancellation_routed.load(Ordering::Acquire) {
            self.process.track(suspension);
        }
    }

    /// Command for the thread's next unit of work, or its completion
    pub(crate) fn advance(self: &Arc<Self>, current: Option<TeamIndex>) -> Command {
        let work = self.continuation().next();
        match work {
            Some(Work::Call { function, argument }) => {
                Command::Function(FunctionJob::new(self, function, argument, current))
            }
            Some(Work::Resume(mut job)) => {
                job.set_team(current);
                Command::Function(job)
            }
            None => Command::CompleteThread(ThreadCompletion::new(self, current)),
        }
    }

    /// Fail the thread, discarding its remaining work
    pub(crate) fn fail(&self, failure: Escalation) {
        tracing::debug!(thread = %self.id, %failure, "thread failed");
        let discarded = self.continuation().fail(failure);
        drop(discarded);
    }
}

impl std::fmt::Debug for ThreadState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadState")
            .field("id", &self.id)
            .field("process", &self.process.id)
            .field("main", &self.main)
            .finish_non_exhaustive()
    }
}

enum Parking {
    Empty,
    Parked(Box<FunctionJob>),
    Signalled,
    Resumed,
}

/// A job waiting on a managed object.
///
/// Resumed at most once, by whichever comes first: the container settling,
/// a timeout or cancellation. A signal that arrives before the job parks
/// hands the job straight back to the parker.
pub(crate) struct Suspension {
    state: Mutex<Parking>,
}

impl Suspension {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(Parking::Empty),
        })
    }

    /// Park `job`. Returns the job if the suspension was already signalled.
    pub(crate) fn park(&self, job: Box<FunctionJob>) -> Option<Box<FunctionJob>> {
        let mut state = self.state.lock();
        match *state {
            Parking::Empty => {
                *state = Parking::Parked(job);
                None
            }
            Parking::Signalled => {
                *state = Parking::Resumed;
                Some(job)
            }
            // a suspension parks once
            Parking::Parked(_) | Parking::Resumed => Some(job),
        }
    }
}

impl Waiter for Suspension {
    fn resume(&self) {
        let job = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, Parking::Resumed) {
                Parking::Empty => {
                    *state = Parking::Signalled;
                    None
                }
                Parking::Parked(job) => Some(job),
                Parking::Signalled => {
                    *state = Parking::Signalled;
                    None
                }
                Parking::Resumed => None,
            }
        };
        if let Some(job) = job {
            job.redispatch();
        }
    }
}

/// Handle to a running process
#[derive(Clone)]
pub struct ProcessHandle {
    process: Arc<ProcessState>,
}

impl ProcessHandle {
    pub(crate) fn new(process: Arc<ProcessState>) -> Self {
        Self { process }
    }

    /// Process id
    #[must_use]
    pub fn id(&self) -> ProcessId {
        self.process.id()
    }

    /// Cancel the process.
    ///
    /// Each thread raises one `Cancelled` escalation: suspended jobs wake to
    /// it, running jobs see it at their next stage. It is routed like any
    /// other escalation, so a handler for `Cancelled` (or an ancestor) runs
    /// and the process recovers; unhandled it fails the process. Recycling
    /// still happens.
    pub fn cancel(&self) {
        self.process.cancel();
    }

    /// Check if cancelled
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.process.is_cancelled()
    }

    /// Check if every thread of the process finished
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.process.is_complete()
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("id", &self.process.id())
            .field("cancelled", &self.is_cancelled())
            .field("complete", &self.is_complete())
            .finish()
    }
}
