//! Managed object lifecycle.
//!
//! A [`ManagedObjectContainer`] owns one instance of a bound managed object
//! for the lifetime of its scope (one function execution, thread or
//! process). Its state lives in a single enum behind a single lock:
//!
//! ```text
//! Uncreated -> Loading(Sourcing -> Coordinating) -> Ready
//! Ready -> Mutating(Store) -> Ready
//! Ready -> Mutating(Invalidate) -> Invalid
//! any non-terminal -> Failed
//! any -> Unloaded
//! ```
//!
//! Nothing here blocks. Callers that find the object still loading register
//! a [`Waiter`] under the same lock that observed the state, and every waiter
//! is resumed once the container settles. Asynchronous completions are
//! matched against the [`SuspendLatch`] so late or duplicated completions are
//! ignored.

use crate::executor::RecycleTask;
use atrium_core::{
    contain_panic, AsyncCompletion, Escalation, LoadContext, ManagedObject, ManagedObjectSource,
    Object, ObjectIndex, ObjectUser,
};
use atrium_governance::{DeferredUnload, UnloadGate};
use atrium_graph::{ManagedObjectMetadata, TeamIndex};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Something parked until a container settles
pub trait Waiter: Send + Sync {
    /// Called once the container is ready, failed or unloaded
    fn resume(&self);
}

/// Tracks whether the container is waiting on an asynchronous completion.
///
/// `flag_waiting` enters the waiting state at most once per cycle and
/// `flag_complete` only reports completion when a wait is outstanding, so a
/// stray or repeated completion is a no-op.
#[derive(Debug, Default)]
pub struct SuspendLatch {
    waiting: AtomicBool,
    suspends: AtomicU64,
}

impl SuspendLatch {
    /// Create an idle latch
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Enter the waiting state. Returns `true` if this call suspended.
    pub fn flag_waiting(&self) -> bool {
        let entered = self
            .waiting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if entered {
            self.suspends.fetch_add(1, Ordering::Relaxed);
        }
        entered
    }

    /// Leave the waiting state. Returns `true` if a wait was outstanding.
    pub fn flag_complete(&self) -> bool {
        self.waiting
            .compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Check if a completion is outstanding
    #[must_use]
    pub fn is_waiting(&self) -> bool {
        self.waiting.load(Ordering::Acquire)
    }

    /// Number of suspend cycles so far
    #[must_use]
    pub fn suspend_count(&self) -> u64 {
        self.suspends.load(Ordering::Relaxed)
    }
}

/// Result of asking a container for its object
#[derive(Debug, Clone)]
pub enum Acquire {
    /// Object is ready
    Ready,
    /// Object failed; the failure is surfaced at the point of use
    Failed(Escalation),
    /// Object is still loading; the waiter was registered
    Pending,
}

/// Observable phase of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerPhase {
    /// Not yet requested
    Uncreated,
    /// Waiting on the source
    Sourcing,
    /// Waiting on dependency coordination
    Coordinating,
    /// Usable
    Ready,
    /// Store in flight
    Storing,
    /// Invalidation in flight
    Invalidating,
    /// Invalidated
    Invalid,
    /// Failed
    Failed,
    /// Recycled or discarded
    Unloaded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Operation {
    Load,
    Store,
    Invalidate,
}

enum State {
    Uncreated,
    Sourcing {
        since: Instant,
    },
    Coordinating {
        since: Instant,
        object: Arc<dyn ManagedObject>,
    },
    Ready {
        object: Arc<dyn ManagedObject>,
        value: Object,
    },
    Mutating {
        operation: Operation,
        since: Instant,
        object: Arc<dyn ManagedObject>,
        value: Object,
    },
    Invalid {
        object: Arc<dyn ManagedObject>,
    },
    Failed {
        failure: Escalation,
        object: Option<Arc<dyn ManagedObject>>,
    },
    Unloaded,
}

impl State {
    fn phase(&self) -> ContainerPhase {
        match self {
            Self::Uncreated => ContainerPhase::Uncreated,
            Self::Sourcing { .. } => ContainerPhase::Sourcing,
            Self::Coordinating { .. } => ContainerPhase::Coordinating,
            Self::Ready { .. } => ContainerPhase::Ready,
            Self::Mutating {
                operation: Operation::Invalidate,
                ..
            } => ContainerPhase::Invalidating,
            Self::Mutating { .. } => ContainerPhase::Storing,
            Self::Invalid { .. } => ContainerPhase::Invalid,
            Self::Failed { .. } => ContainerPhase::Failed,
            Self::Unloaded => ContainerPhase::Unloaded,
        }
    }

    fn since(&self) -> Option<Instant> {
        match self {
            Self::Sourcing { since }
            | Self::Coordinating { since, .. }
            | Self::Mutating { since, .. } => Some(*since),
            _ => None,
        }
    }

    fn into_object(self) -> Option<Arc<dyn ManagedObject>> {
        match self {
            Self::Coordinating { object, .. }
            | Self::Ready { object, .. }
            | Self::Mutating { object, .. }
            | Self::Invalid { object } => Some(object),
            Self::Failed { object, .. } => object,
            Self::Uncreated | Self::Sourcing { .. } | Self::Unloaded => None,
        }
    }
}

struct Inner {
    state: State,
    waiters: Vec<Arc<dyn Waiter>>,
}

impl Inner {
    /// Move to `Failed`, returning waiters to resume, or `None` if the
    /// container had already settled
    fn fail(&mut self, failure: Escalation) -> Option<Vec<Arc<dyn Waiter>>> {
        let object = match std::mem::replace(&mut self.state, State::Unloaded) {
            State::Uncreated | State::Sourcing { .. } => None,
            State::Coordinating { object, .. } | State::Mutating { object, .. } => Some(object),
            settled => {
                self.state = settled;
                return None;
            }
        };
        self.state = State::Failed { failure, object };
        Some(std::mem::take(&mut self.waiters))
    }
}

/// One scoped instance of a bound managed object
pub struct ManagedObjectContainer {
    bound_name: String,
    index: ObjectIndex,
    source: Arc<dyn ManagedObjectSource>,
    async_timeout: Option<Duration>,
    recycle_team: Option<TeamIndex>,
    inner: Mutex<Inner>,
    latch: SuspendLatch,
    gate: Arc<UnloadGate>,
}

impl ManagedObjectContainer {
    /// Create an uncreated container for a bound object
    #[must_use]
    pub fn new(metadata: &ManagedObjectMetadata) -> Arc<Self> {
        Arc::new(Self {
            bound_name: metadata.bound_name.clone(),
            index: metadata.index,
            source: Arc::clone(&metadata.source),
            async_timeout: metadata.async_timeout,
            recycle_team: metadata.recycle_team,
            inner: Mutex::new(Inner {
                state: State::Uncreated,
                waiters: Vec::new(),
            }),
            latch: SuspendLatch::new(),
            gate: Arc::new(UnloadGate::new()),
        })
    }

    /// Bound name
    #[must_use]
    pub fn bound_name(&self) -> &str {
        &self.bound_name
    }

    /// Slot of the object
    #[must_use]
    pub fn index(&self) -> ObjectIndex {
        self.index
    }

    /// Team the object is recycled on
    #[must_use]
    pub fn recycle_team(&self) -> Option<TeamIndex> {
        self.recycle_team
    }

    /// Bound on asynchronous operations
    #[must_use]
    pub fn async_timeout(&self) -> Option<Duration> {
        self.async_timeout
    }

    /// Current phase
    #[must_use]
    pub fn phase(&self) -> ContainerPhase {
        self.inner.lock().state.phase()
    }

    /// Latch of the asynchronous operation in flight
    #[must_use]
    pub fn latch(&self) -> &SuspendLatch {
        &self.latch
    }

    /// Gate held by governance
    #[must_use]
    pub fn gate(&self) -> &Arc<UnloadGate> {
        &self.gate
    }

    /// Ask for the object, starting the load on first use.
    ///
    /// `dependencies` is only called by the first loader; the objects it
    /// returns are handed to the managed object for coordination. When the
    /// result is [`Acquire::Pending`] the waiter has been registered and will
    /// be resumed exactly once.
    pub fn acquire<F>(self: &Arc<Self>, dependencies: F, waiter: Arc<dyn Waiter>) -> Acquire
    where
        F: FnOnce() -> Result<Vec<Object>, Escalation>,
    {
        {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, State::Uncreated) {
                return Self::settle(&mut inner, &self.bound_name, waiter);
            }
            inner.state = State::Sourcing {
                since: Instant::now(),
            };
        }
        tracing::debug!(object = %self.bound_name, "sourcing managed object");

        match dependencies() {
            Ok(dependencies) => self.source(dependencies),
            Err(failure) => {
                self.fail(failure);
            }
        }

        let mut inner = self.inner.lock();
        Self::settle(&mut inner, &self.bound_name, waiter)
    }

    fn settle(inner: &mut Inner, bound_name: &str, waiter: Arc<dyn Waiter>) -> Acquire {
        match &inner.state {
            State::Ready { .. } => Acquire::Ready,
            State::Failed { failure, .. } => Acquire::Failed(failure.clone()),
            State::Sourcing { .. } | State::Coordinating { .. } | State::Mutating { .. } => {
                inner.waiters.push(waiter);
                Acquire::Pending
            }
            State::Invalid { .. } => Acquire::Failed(Escalation::illegal_state(format!(
                "Managed object {} has been invalidated",
                bound_name
            ))),
            State::Uncreated | State::Unloaded => Acquire::Failed(Escalation::illegal_state(
                format!("Managed object {} is not loaded", bound_name),
            )),
        }
    }

    /// The object, or the failure that prevented it
    ///
    /// # Errors
    ///
    /// Returns the stored failure, or an illegal state escalation when the
    /// object is not ready
    pub fn object(&self) -> Result<Object, Escalation> {
        match &self.inner.lock().state {
            State::Ready { value, .. } | State::Mutating { value, .. } => Ok(Arc::clone(value)),
            State::Failed { failure, .. } => Err(failure.clone()),
            other => Err(Escalation::illegal_state(format!(
                "Managed object {} is {:?}",
                self.bound_name,
                other.phase()
            ))),
        }
    }

    /// The managed object once sourced
    #[must_use]
    pub fn managed_object(&self) -> Option<Arc<dyn ManagedObject>> {
        match &self.inner.lock().state {
            State::Coordinating { object, .. }
            | State::Ready { object, .. }
            | State::Mutating { object, .. }
            | State::Invalid { object } => Some(Arc::clone(object)),
            State::Failed { object, .. } => object.clone(),
            _ => None,
        }
    }

    /// Start storing the object.
    ///
    /// # Errors
    ///
    /// Rejects the request while another store or invalidation is in flight
    /// or the object is not ready
    pub fn store(self: &Arc<Self>) -> Result<(), Escalation> {
        self.mutate(Operation::Store)
    }

    /// Start invalidating the object.
    ///
    /// # Errors
    ///
    /// Rejects the request while another store or invalidation is in flight
    /// or the object is not ready
    pub fn invalidate(self: &Arc<Self>) -> Result<(), Escalation> {
        self.mutate(Operation::Invalidate)
    }

    fn mutate(self: &Arc<Self>, operation: Operation) -> Result<(), Escalation> {
        let object = {
            let mut inner = self.inner.lock();
            let (object, value) = match &inner.state {
                State::Ready { object, value } => (Arc::clone(object), Arc::clone(value)),
                State::Mutating { .. } => {
                    return Err(Escalation::illegal_state(format!(
                        "Managed object {} already has a store or invalidation in flight",
                        self.bound_name
                    )));
                }
                other => {
                    return Err(Escalation::illegal_state(format!(
                        "Managed object {} can not be mutated while {:?}",
                        self.bound_name,
                        other.phase()
                    )));
                }
            };
            inner.state = State::Mutating {
                operation,
                since: Instant::now(),
                object: Arc::clone(&object),
                value,
            };
            object
        };

        self.latch.flag_waiting();
        let completion = Box::new(Completion {
            container: Arc::clone(self),
            operation,
        });
        let started = contain_panic(|| match operation {
            Operation::Invalidate => object.invalidate(completion),
            _ => object.store(completion),
        });
        if let Err(failure) = started {
            if self.latch.flag_complete() {
                self.finish(operation, Err(failure));
            }
        }
        Ok(())
    }

    /// Wait for a store or invalidation in flight.
    ///
    /// Returns [`Acquire::Pending`] with the waiter registered while the
    /// mutation runs, the failure if it failed, and [`Acquire::Ready`]
    /// otherwise.
    pub fn await_mutation(&self, waiter: Arc<dyn Waiter>) -> Acquire {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        match &inner.state {
            State::Mutating { .. } => {
                inner.waiters.push(waiter);
                Acquire::Pending
            }
            State::Failed { failure, .. } => Acquire::Failed(failure.clone()),
            _ => Acquire::Ready,
        }
    }

    /// Fail the container unless it already settled. Returns `true` if it
    /// failed now.
    pub fn fail(&self, failure: Escalation) -> bool {
        let waiters = self.inner.lock().fail(failure.clone());
        match waiters {
            Some(waiters) => {
                tracing::debug!(object = %self.bound_name, %failure, "managed object failed");
                Self::resume(waiters);
                true
            }
            None => false,
        }
    }

    /// Fail an asynchronous operation that outlived its timeout. Returns
    /// `true` if the container timed out now.
    pub fn check_timeout(&self, now: Instant) -> bool {
        let Some(timeout) = self.async_timeout else {
            return false;
        };
        let waiters = {
            let mut inner = self.inner.lock();
            match inner.state.since() {
                Some(since) if now.saturating_duration_since(since) >= timeout => {
                    inner.fail(Escalation::timeout(&self.bound_name))
                }
                _ => None,
            }
        };
        match waiters {
            Some(waiters) => {
                tracing::warn!(object = %self.bound_name, ?timeout, "asynchronous operation timed out");
                Self::resume(waiters);
                true
            }
            None => false,
        }
    }

    /// Unload the container once governance permits it.
    ///
    /// `recycle` receives the recycle task for the sourced object, if any.
    /// Unloading twice is a no-op.
    pub fn unload<R>(self: &Arc<Self>, recycle: R)
    where
        R: FnOnce(RecycleTask) + Send + 'static,
    {
        let container = Arc::clone(self);
        let unload: DeferredUnload = Box::new(move || container.complete_unload(recycle));
        if let Some(unload) = self.gate.request_unload(unload) {
            unload();
        }
    }

    fn complete_unload<R>(&self, recycle: R)
    where
        R: FnOnce(RecycleTask),
    {
        let (previous, waiters) = {
            let mut inner = self.inner.lock();
            let previous = std::mem::replace(&mut inner.state, State::Unloaded);
            (previous, std::mem::take(&mut inner.waiters))
        };
        if matches!(previous, State::Unloaded) {
            return;
        }
        tracing::debug!(object = %self.bound_name, "managed object unloaded");
        Self::resume(waiters);

        if let Some(object) = previous.into_object() {
            recycle(RecycleTask::new(self.bound_name.clone(), object));
        }
    }

    fn source(self: &Arc<Self>, dependencies: Vec<Object>) {
        let user = Box::new(ContainerUser {
            container: Arc::clone(self),
            dependencies,
        });
        let source = Arc::clone(&self.source);
        if let Err(failure) = contain_panic(|| {
            source.source(user);
            Ok(())
        }) {
            self.fail(failure);
        }
    }

    fn sourced(self: &Arc<Self>, managed_object: Box<dyn ManagedObject>, dependencies: Vec<Object>) {
        let object: Arc<dyn ManagedObject> = Arc::from(managed_object);
        let discard = {
            let mut inner = self.inner.lock();
            if let State::Sourcing { since } = inner.state {
                inner.state = State::Coordinating {
                    since,
                    object: Arc::clone(&object),
                };
                false
            } else if let State::Failed { object: held @ None, .. } = &mut inner.state {
                // arrived after a timeout; keep it so unload recycles it
                *held = Some(Arc::clone(&object));
                return;
            } else {
                true
            }
        };
        if discard {
            tracing::debug!(object = %self.bound_name, "late managed object recycled");
            let _ = contain_panic(|| {
                object.recycle();
                Ok(())
            });
            return;
        }

        let mut ctx = Coordination {
            container: Arc::clone(self),
            dependencies,
            asynchronous: false,
        };
        match contain_panic(|| object.load_objects(&mut ctx)) {
            Err(failure) => {
                self.fail(failure);
            }
            Ok(()) if !ctx.asynchronous => self.finish(Operation::Load, Ok(())),
            Ok(()) => {}
        }
    }

    fn finish(&self, operation: Operation, result: Result<(), Escalation>) {
        if let Err(failure) = result {
            self.fail(failure);
            return;
        }

        let waiters = match operation {
            Operation::Load => {
                let object = match &self.inner.lock().state {
                    State::Coordinating { object, .. } => Arc::clone(object),
                    _ => return,
                };
                let value = contain_panic(|| object.object());

                let mut inner = self.inner.lock();
                if !matches!(inner.state, State::Coordinating { .. }) {
                    return;
                }
                match value {
                    Ok(value) => {
                        inner.state = State::Ready { object, value };
                        std::mem::take(&mut inner.waiters)
                    }
                    Err(failure) => match inner.fail(failure) {
                        Some(waiters) => waiters,
                        None => return,
                    },
                }
            }
            Operation::Store | Operation::Invalidate => {
                let mut inner = self.inner.lock();
                let (object, value) = match &inner.state {
                    State::Mutating { object, value, .. } => (Arc::clone(object), Arc::clone(value)),
                    _ => return,
                };
                inner.state = match operation {
                    Operation::Invalidate => State::Invalid { object },
                    _ => State::Ready { object, value },
                };
                std::mem::take(&mut inner.waiters)
            }
        };

        tracing::debug!(object = %self.bound_name, ?operation, "managed object settled");
        Self::resume(waiters);
    }

    fn resume(waiters: Vec<Arc<dyn Waiter>>) {
        for waiter in waiters {
            waiter.resume();
        }
    }
}

impl std::fmt::Debug for ManagedObjectContainer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagedObjectContainer")
            .field("bound_name", &self.bound_name)
            .field("index", &self.index)
            .field("phase", &self.phase())
            .field("latch", &self.latch)
            .field("gate", &self.gate)
            .finish_non_exhaustive()
    }
}

struct ContainerUser {
    container: Arc<ManagedObjectContainer>,
    dependencies: Vec<Object>,
}

impl ObjectUser for ContainerUser {
    fn set_managed_object(self: Box<Self>, managed_object: Box<dyn ManagedObject>) {
        let ContainerUser {
            container,
            dependencies,
        } = *self;
        container.sourced(managed_object, dependencies);
    }

    fn set_failure(self: Box<Self>, failure: Escalation) {
        self.container.fail(failure);
    }
}

struct Coordination {
    container: Arc<ManagedObjectContainer>,
    dependencies: Vec<Object>,
    asynchronous: bool,
}

impl LoadContext for Coordination {
    fn dependency(&self, index: usize) -> Result<Object, Escalation> {
        self.dependencies.get(index).cloned().ok_or_else(|| {
            Escalation::illegal_state(format!(
                "Managed object {} has no dependency {}",
                self.container.bound_name, index
            ))
        })
    }

    fn dependency_count(&self) -> usize {
        self.dependencies.len()
    }

    fn start_async(&mut self) -> Box<dyn AsyncCompletion> {
        self.asynchronous = true;
        self.container.latch.flag_waiting();
        Box::new(Completion {
            container: Arc::clone(&self.container),
            operation: Operation::Load,
        })
    }
}

struct Completion {
    container: Arc<ManagedObjectContainer>,
    operation: Operation,
}

impl AsyncCompletion for Completion {
    fn complete(self: Box<Self>, result: Result<(), Escalation>) {
        if self.container.latch.flag_complete() {
            self.container.finish(self.operation, result);
        } else {
            tracing::debug!(
                object = %self.container.bound_name,
                operation = ?self.operation,
                "stray completion ignored"
            );
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use atrium_core::types::ASYNC_TIMEOUT;
    use atrium_core::{object, DerivedSource, ObjectScope, SyncSource, TypeName, ValueObject};
    use std::sync::atomic::AtomicUsize;

    #[derive(Default)]
    pub(crate) struct CountingWaiter {
        pub(crate) resumed: AtomicUsize,
    }

    impl Waiter for CountingWaiter {
        fn resume(&self) {
            self.resumed.fetch_add(1, Ordering::SeqCst);
        }
    }

    impl CountingWaiter {
        fn count(&self) -> usize {
            self.resumed.load(Ordering::SeqCst)
        }
    }

    /// Source handing its user to the test for later completion
    #[derive(Default)]
    struct ParkedSource {
        user: Arc<Mutex<Option<Box<dyn ObjectUser>>>>,
    }

    impl ManagedObjectSource for ParkedSource {
        fn source(&self, user: Box<dyn ObjectUser>) {
            *self.user.lock() = Some(user);
        }
    }

    /// Managed object whose coordination, store and invalidation complete
    /// only when the test says so
    #[derive(Default)]
    struct ParkedObject {
        completions: Arc<Mutex<Vec<Box<dyn AsyncCompletion>>>>,
        recycled: Arc<AtomicUsize>,
        async_load: bool,
    }

    impl ManagedObject for ParkedObject {
        fn object(&self) -> Result<Object, Escalation> {
            Ok(object("connection".to_string()))
        }

        fn load_objects(&self, ctx: &mut dyn LoadContext) -> Result<(), Escalation> {
            if self.async_load {
                let completion = ctx.start_async();
                self.completions.lock().push(completion);
            }
            Ok(())
        }

        fn store(&self, completion: Box<dyn AsyncCompletion>) -> Result<(), Escalation> {
            self.completions.lock().push(completion);
            Ok(())
        }

        fn invalidate(&self, completion: Box<dyn AsyncCompletion>) -> Result<(), Escalation> {
            self.completions.lock().push(completion);
            Ok(())
        }

        fn recycle(&self) {
            self.recycled.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct ObjectSource {
        object: Mutex<Option<ParkedObject>>,
    }

    impl ManagedObjectSource for ObjectSource {
        fn source(&self, user: Box<dyn ObjectUser>) {
            match self.object.lock().take() {
                Some(object) => user.set_managed_object(Box::new(object)),
                None => user.set_failure(Escalation::illegal_state("sourced twice")),
            }
        }
    }

    pub(crate) fn metadata(source: Arc<dyn ManagedObjectSource>) -> ManagedObjectMetadata {
        ManagedObjectMetadata {
            bound_name: "db".to_string(),
            index: ObjectIndex::scoped(ObjectScope::Process, 0),
            source,
            object_type: TypeName::from("Connection"),
            dependencies: Vec::new(),
            capabilities: Vec::new(),
            async_timeout: None,
            recycle_team: None,
        }
    }

    fn no_dependencies() -> Result<Vec<Object>, Escalation> {
        Ok(Vec::new())
    }

    type Completions = Arc<Mutex<Vec<Box<dyn AsyncCompletion>>>>;

    fn parked(async_load: bool) -> (Arc<ManagedObjectContainer>, Completions, Arc<AtomicUsize>) {
        let completions = Arc::new(Mutex::new(Vec::new()));
        let recycled = Arc::new(AtomicUsize::new(0));
        let object = ParkedObject {
            completions: Arc::clone(&completions),
            recycled: Arc::clone(&recycled),
            async_load,
        };
        let source = Arc::new(ObjectSource {
            object: Mutex::new(Some(object)),
        });
        (ManagedObjectContainer::new(&metadata(source)), completions, recycled)
    }

    #[test]
    fn test_latch_double_waiting_suspends_once() {
        let latch = SuspendLatch::new();
        assert!(latch.flag_waiting());
        assert!(!latch.flag_waiting());
        assert_eq!(latch.suspend_count(), 1);
        assert!(latch.flag_complete());
        assert!(!latch.is_waiting());
    }

    #[test]
    fn test_latch_stray_complete_is_noop() {
        let latch = SuspendLatch::new();
        assert!(!latch.flag_complete());
        assert!(!latch.is_waiting());
        assert_eq!(latch.suspend_count(), 0);

        latch.flag_waiting();
        assert!(latch.flag_complete());
        assert!(!latch.flag_complete());
    }

    #[test]
    fn test_sync_source_ready_immediately() {
        let source = Arc::new(SyncSource::new(|| Ok(object(42u32))));
        let container = ManagedObjectContainer::new(&metadata(source));
        let waiter = Arc::new(CountingWaiter::default());

        let result = container.acquire(no_dependencies, waiter.clone());
        assert!(matches!(result, Acquire::Ready));
        assert_eq!(container.phase(), ContainerPhase::Ready);
        assert_eq!(*container.object().unwrap().downcast_ref::<u32>().unwrap(), 42);
        assert_eq!(waiter.count(), 0);
    }

    #[test]
    fn test_sync_failure_surfaced_at_use() {
        let source = Arc::new(SyncSource::new(|| Err(Escalation::new("SQLException", "down"))));
        let container = ManagedObjectContainer::new(&metadata(source));

        let result = container.acquire(no_dependencies, Arc::new(CountingWaiter::default()));
        assert!(matches!(result, Acquire::Failed(ref e) if e.kind().as_str() == "SQLException"));
        assert_eq!(container.object().unwrap_err().message(), "down");
    }

    #[test]
    fn test_async_source_resumes_every_waiter_once() {
        let source = Arc::new(ParkedSource::default());
        let user = Arc::clone(&source.user);
        let container = ManagedObjectContainer::new(&metadata(source));
        let first = Arc::new(CountingWaiter::default());
        let second = Arc::new(CountingWaiter::default());

        assert!(matches!(container.acquire(no_dependencies, first.clone()), Acquire::Pending));
        assert!(matches!(container.acquire(no_dependencies, second.clone()), Acquire::Pending));
        assert_eq!(container.phase(), ContainerPhase::Sourcing);

        let user = user.lock().take().unwrap();
        user.set_managed_object(Box::new(ValueObject::new(object(1u8))));

        assert_eq!(container.phase(), ContainerPhase::Ready);
        assert_eq!(first.count(), 1);
        assert_eq!(second.count(), 1);
    }

    #[test]
    fn test_async_coordination_uses_latch() {
        let (container, completions, _) = parked(true);
        let waiter = Arc::new(CountingWaiter::default());

        assert!(matches!(container.acquire(no_dependencies, waiter.clone()), Acquire::Pending));
        assert_eq!(container.phase(), ContainerPhase::Coordinating);
        assert!(container.latch().is_waiting());

        let completion = completions.lock().pop().unwrap();
        completion.complete(Ok(()));
        assert_eq!(container.phase(), ContainerPhase::Ready);
        assert_eq!(waiter.count(), 1);
        assert!(!container.latch().is_waiting());
    }

    #[test]
    fn test_coordination_receives_dependencies() {
        let source = Arc::new(DerivedSource::new(|deps: &[Object]| {
            let base = deps[0].downcast_ref::<u32>().copied().unwrap_or_default();
            Ok(object(base * 2))
        }));
        let container = ManagedObjectContainer::new(&metadata(source));

        let result = container.acquire(|| Ok(vec![object(21u32)]), Arc::new(CountingWaiter::default()));
        assert!(matches!(result, Acquire::Ready));
        assert_eq!(*container.object().unwrap().downcast_ref::<u32>().unwrap(), 42);
    }

    #[test]
    fn test_dependency_failure_fails_container() {
        let source = Arc::new(SyncSource::new(|| Ok(object(1u8))));
        let container = ManagedObjectContainer::new(&metadata(source));

        let result = container.acquire(
            || Err(Escalation::new("IOException", "dependency gone")),
            Arc::new(CountingWaiter::default()),
        );
        assert!(matches!(result, Acquire::Failed(_)));
        assert_eq!(container.phase(), ContainerPhase::Failed);
    }

    #[test]
    fn test_second_mutation_rejected() {
        let (container, completions, _) = parked(false);
        container.acquire(no_dependencies, Arc::new(CountingWaiter::default()));

        container.store().unwrap();
        assert_eq!(container.phase(), ContainerPhase::Storing);
        assert!(container.store().is_err());
        assert!(container.invalidate().is_err());
        // the object stays readable while storing
        assert!(container.object().is_ok());

        let waiter = Arc::new(CountingWaiter::default());
        assert!(matches!(container.await_mutation(waiter.clone()), Acquire::Pending));
        completions.lock().pop().unwrap().complete(Ok(()));
        assert_eq!(container.phase(), ContainerPhase::Ready);
        assert_eq!(waiter.count(), 1);
        assert!(matches!(container.await_mutation(waiter.clone()), Acquire::Ready));

        container.invalidate().unwrap();
        completions.lock().pop().unwrap().complete(Ok(()));
        assert_eq!(container.phase(), ContainerPhase::Invalid);
        assert!(container.store().is_err());
    }

    #[test]
    fn test_stray_completion_ignored() {
        let (container, completions, _) = parked(false);
        container.acquire(no_dependencies, Arc::new(CountingWaiter::default()));

        container.store().unwrap();
        let completion = completions.lock().pop().unwrap();
        completion.complete(Ok(()));

        // a completion fabricated without a wait outstanding
        let stray = Box::new(Completion {
            container: Arc::clone(&container),
            operation: Operation::Invalidate,
        });
        stray.complete(Ok(()));
        assert_eq!(container.phase(), ContainerPhase::Ready);
    }

    #[test]
    fn test_failed_store_fails_container() {
        let (container, completions, _) = parked(false);
        container.acquire(no_dependencies, Arc::new(CountingWaiter::default()));

        container.store().unwrap();
        completions
            .lock()
            .pop()
            .unwrap()
            .complete(Err(Escalation::new("IOException", "flush failed")));
        assert_eq!(container.phase(), ContainerPhase::Failed);
        assert_eq!(container.object().unwrap_err().message(), "flush failed");
        let waiter = Arc::new(CountingWaiter::default());
        assert!(matches!(container.await_mutation(waiter), Acquire::Failed(ref e) if e.message() == "flush failed"));
    }

    #[test]
    fn test_timeout_fails_and_resumes() {
        let source = Arc::new(ParkedSource::default());
        let user = Arc::clone(&source.user);
        let mut metadata = metadata(source);
        metadata.async_timeout = Some(Duration::from_millis(10));
        let container = ManagedObjectContainer::new(&metadata);
        let waiter = Arc::new(CountingWaiter::default());

        container.acquire(no_dependencies, waiter.clone());
        assert!(!container.check_timeout(Instant::now()));
        assert!(container.check_timeout(Instant::now() + Duration::from_millis(50)));
        assert_eq!(waiter.count(), 1);
        assert_eq!(container.object().unwrap_err().kind().as_str(), ASYNC_TIMEOUT);

        // the late object is kept for recycling, not resurrected
        let user = user.lock().take().unwrap();
        user.set_managed_object(Box::new(ValueObject::new(object(1u8))));
        assert_eq!(container.phase(), ContainerPhase::Failed);
        assert!(container.managed_object().is_some());
    }

    #[test]
    fn test_unload_recycles_once() {
        let (container, _, recycled) = parked(false);
        container.acquire(no_dependencies, Arc::new(CountingWaiter::default()));

        container.unload(RecycleTask::run);
        container.unload(RecycleTask::run);
        assert_eq!(container.phase(), ContainerPhase::Unloaded);
        assert_eq!(recycled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unload_deferred_by_gate() {
        let (container, _, recycled) = parked(false);
        container.acquire(no_dependencies, Arc::new(CountingWaiter::default()));

        container.gate().hold();
        container.unload(RecycleTask::run);
        assert_eq!(container.phase(), ContainerPhase::Ready);
        assert!(!container.gate().is_unload_permitted());
        assert_eq!(recycled.load(Ordering::SeqCst), 0);

        let unload = container.gate().release().unwrap();
        unload();
        assert_eq!(container.phase(), ContainerPhase::Unloaded);
        assert_eq!(recycled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_unload_while_loading_resumes_waiters() {
        let source = Arc::new(ParkedSource::default());
        let container = ManagedObjectContainer::new(&metadata(source));
        let waiter = Arc::new(CountingWaiter::default());

        container.acquire(no_dependencies, waiter.clone());
        container.unload(RecycleTask::run);
        assert_eq!(waiter.count(), 1);
        assert!(matches!(
            container.acquire(no_dependencies, waiter.clone()),
            Acquire::Failed(_)
        ));
    }
}
