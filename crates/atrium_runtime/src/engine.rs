//! The running office.
//!
//! [`Office::open`] starts the teams and the monitor for compiled
//! [`OfficeMetadata`]; [`Office::invoke`] starts a process. Everything the
//! processes of an office share lives in [`OfficeShared`].

use crate::config::{KernelConfig, LeakDetection};
use crate::executor::{Command, RecycleTask};
use crate::lifecycle::ManagedObjectContainer;
use crate::monitor::{Metrics, MetricsSnapshot, Monitor};
use crate::process::{ProcessHandle, ProcessOutcome, ProcessState};
use crate::team::{LeaderFollowerTeam, PassiveTeam, Team, TeamError};
use atrium_core::Object;
use atrium_graph::{ManagedObjectMetadata, OfficeMetadata, TeamIndex, TeamStrategy};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Office error
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OfficeError {
    /// No function of that name
    #[error("Unknown function {name}")]
    UnknownFunction {
        /// Requested name
        name: String,
    },
    /// The office no longer accepts invocations
    #[error("Office {office} is closed")]
    Closed {
        /// Office name
        office: String,
    },
    /// A team could not be started
    #[error(transparent)]
    Team(#[from] TeamError),
    /// The monitor thread could not be started
    #[error("Failed to start monitor: {0}")]
    Monitor(String),
    /// The process ended without reporting an outcome
    #[error("Process was abandoned before completing")]
    Abandoned,
}

/// State shared by every process of an office
pub(crate) struct OfficeShared {
    metadata: OfficeMetadata,
    config: KernelConfig,
    teams: Vec<Box<dyn Team>>,
    passive: PassiveTeam,
    monitor: Monitor,
    closed: AtomicBool,
}

impl OfficeShared {
    pub(crate) fn metadata(&self) -> &OfficeMetadata {
        &self.metadata
    }

    pub(crate) fn metrics(&self) -> &Metrics {
        self.monitor.metrics()
    }

    /// Submit a command to a team, or to the built-in passive team
    pub(crate) fn dispatch(&self, team: Option<TeamIndex>, command: Command) {
        let result = match team.and_then(|team| self.teams.get(team)) {
            Some(team) => team.submit(command),
            None => self.passive.submit(command),
        };
        if let Err(error) = result {
            tracing::debug!(%error, "command abandoned");
        }
    }

    /// Hands unloaded objects to their recycle team, else the default team
    pub(crate) fn recycler(
        self: &Arc<Self>,
        team: Option<TeamIndex>,
    ) -> impl FnOnce(RecycleTask) + Send + 'static {
        let office = Arc::clone(self);
        move |task| {
            office.metrics().record_recycle();
            let team = team.or(office.metadata.default_team);
            office.dispatch(team, Command::Recycle(task));
        }
    }

    /// New container registered with the monitor
    pub(crate) fn container(&self, metadata: &ManagedObjectMetadata) -> Arc<ManagedObjectContainer> {
        let container = ManagedObjectContainer::new(metadata);
        self.monitor.register(&container);
        container
    }
}

impl std::fmt::Debug for OfficeShared {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfficeShared")
            .field("name", &self.metadata.name)
            .field("teams", &self.teams.len())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

/// A running office
///
/// Dropping the office closes it.
pub struct Office {
    shared: Arc<OfficeShared>,
}

impl Office {
    /// Start the teams and monitor of an office
    ///
    /// # Errors
    ///
    /// Returns error if a worker or monitor thread can not be spawned
    pub fn open(metadata: OfficeMetadata, config: KernelConfig) -> Result<Self, OfficeError> {
        let teams = metadata
            .teams
            .iter()
            .map(|team| -> Result<Box<dyn Team>, TeamError> {
                match team.strategy {
                    TeamStrategy::Passive => Ok(Box::new(PassiveTeam::new(&team.name))),
                    TeamStrategy::WorkerPool { threads } => Ok(Box::new(
                        LeaderFollowerTeam::start(&team.name, threads, &config)?,
                    )),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        let monitor = Monitor::start(&config).map_err(|e| OfficeError::Monitor(e.to_string()))?;

        tracing::info!(
            office = %metadata.name,
            functions = metadata.functions.len(),
            teams = teams.len(),
            "office opened"
        );
        let passive = PassiveTeam::new(format!("{}.passive", metadata.name));
        Ok(Self {
            shared: Arc::new(OfficeShared {
                metadata,
                config,
                teams,
                passive,
                monitor,
                closed: AtomicBool::new(false),
            }),
        })
    }

    /// Office name
    #[must_use]
    pub fn name(&self) -> &str {
        &self.shared.metadata.name
    }

    /// Compiled metadata
    #[must_use]
    pub fn metadata(&self) -> &OfficeMetadata {
        &self.shared.metadata
    }

    /// Kernel configuration
    #[must_use]
    pub fn config(&self) -> &KernelConfig {
        &self.shared.config
    }

    /// Invoke a function as a new process.
    ///
    /// `callback` receives the outcome once every thread of the process has
    /// finished. With passive teams the process runs on the calling thread
    /// until it completes or suspends.
    ///
    /// # Errors
    ///
    /// Returns error if the office is closed or no function has that name
    pub fn invoke<F>(
        &self,
        function: &str,
        parameter: Option<Object>,
        callback: F,
    ) -> Result<ProcessHandle, OfficeError>
    where
        F: FnOnce(ProcessOutcome) + Send + 'static,
    {
        if self.is_closed() {
            return Err(OfficeError::Closed {
                office: self.name().to_string(),
            });
        }
        let index = self
            .shared
            .metadata
            .function_by_name(function)
            .map(|function| function.index)
            .ok_or_else(|| OfficeError::UnknownFunction {
                name: function.to_string(),
            })?;

        let process = ProcessState::start(&self.shared, index, parameter, Some(Box::new(callback)), None);
        Ok(ProcessHandle::new(process))
    }

    /// Invoke a function and wait for its outcome
    ///
    /// # Errors
    ///
    /// Returns error if the invocation is refused or the process is dropped
    /// without completing
    pub async fn invoke_async(
        &self,
        function: &str,
        parameter: Option<Object>,
    ) -> Result<ProcessOutcome, OfficeError> {
        let (sender, receiver) = tokio::sync::oneshot::channel();
        self.invoke(function, parameter, move |outcome| {
            let _ = sender.send(outcome);
        })?;
        receiver.await.map_err(|_| OfficeError::Abandoned)
    }

    /// Current runtime metrics
    #[must_use]
    pub fn metrics(&self) -> MetricsSnapshot {
        self.shared.metrics().snapshot()
    }

    /// Check if closed
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Stop accepting invocations, stop the teams and the monitor.
    ///
    /// Commands already queued on a team still run. Returns the number of
    /// managed objects left loaded, which are logged when leak detection is
    /// on. Closing twice is a no-op.
    pub fn close(&self) -> usize {
        if self.shared.closed.swap(true, Ordering::AcqRel) {
            return 0;
        }
        for team in &self.shared.teams {
            team.stop();
        }
        self.shared.monitor.stop();

        let leaks = match self.shared.config.leak_detection {
            LeakDetection::Off => Vec::new(),
            LeakDetection::Warn => self.shared.monitor.leaks(),
        };
        for leak in &leaks {
            tracing::warn!(object = %leak.bound_name, phase = ?leak.phase, "managed object leaked");
        }
        tracing::info!(office = %self.name(), leaks = leaks.len(), "office closed");
        leaks.len()
    }
}

impl Drop for Office {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for Office {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Office")
            .field("name", &self.name())
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use atrium_core::types::{ASYNC_TIMEOUT, CANCELLED, FAILURE, ILLEGAL_STATE, PANIC};
    use atrium_core::{
        duty_fn, AsyncCompletion, function_fn, governance_fn, object, Escalation, FunctionContextExt, Governance,
        GovernanceContext, InstigationStrategy, IssueCollector, ManagedObject,
        ManagedObjectSource, ObjectScope, ObjectUser, SelfExtension, SyncSource, ValueObject,
    };
    use atrium_graph::{
        AdministrationConfiguration, Factories, FlowConfiguration, FunctionConfiguration,
        GovernanceConfiguration, ManagedObjectConfiguration, OfficeBuilder, OfficeConfiguration,
    };
    use parking_lot::Mutex;
    use std::sync::mpsc;
    use std::time::Duration;

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<String>>>);

    impl Log {
        fn push(&self, entry: impl Into<String>) {
            self.0.lock().push(entry.into());
        }

        fn entries(&self) -> Vec<String> {
            self.0.lock().clone()
        }

        fn position(&self, entry: &str) -> usize {
            self.entries()
                .iter()
                .position(|logged| logged == entry)
                .unwrap_or_else(|| panic!("{} not logged in {:?}", entry, self.entries()))
        }
    }

    struct Tracked {
        name: String,
        log: Log,
    }

    impl ManagedObject for Tracked {
        fn object(&self) -> Result<Object, Escalation> {
            Ok(object(self.name.clone()))
        }

        fn recycle(&self) {
            self.log.push(format!("recycle {}", self.name));
        }
    }

    struct TrackedSource {
        name: &'static str,
        log: Log,
    }

    impl ManagedObjectSource for TrackedSource {
        fn source(&self, user: Box<dyn ObjectUser>) {
            self.log.push(format!("source {}", self.name));
            user.set_managed_object(Box::new(Tracked {
                name: self.name.to_string(),
                log: self.log.clone(),
            }));
        }
    }

    /// Source whose user the test completes later
    #[derive(Clone, Default)]
    struct DeferredSource {
        user: Arc<Mutex<Option<Box<dyn ObjectUser>>>>,
    }

    impl ManagedObjectSource for DeferredSource {
        fn source(&self, user: Box<dyn ObjectUser>) {
            *self.user.lock() = Some(user);
        }
    }

    struct Recording {
        log: Log,
        begin: bool,
    }

    impl Governance for Recording {
        fn govern(&mut self, extension: Object, ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
            let name = extension.downcast_ref::<String>().cloned().unwrap_or_default();
            self.log.push(format!("govern {}", name));
            if self.begin {
                ctx.do_flow(0, None)?;
            }
            Ok(())
        }

        fn enforce(&mut self, _ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
            self.log.push("enforce");
            Ok(())
        }

        fn disregard(&mut self, _ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
            self.log.push("disregard");
            Ok(())
        }
    }

    fn logging(log: &Log, entry: &'static str) -> Arc<dyn atrium_core::ManagedFunction> {
        let log = log.clone();
        function_fn(move |_| {
            log.push(entry);
            Ok(None)
        })
    }

    fn open(config: &OfficeConfiguration, factories: &Factories) -> Office {
        let issues = IssueCollector::new();
        let metadata = OfficeBuilder::new(config, factories).build(&issues);
        assert!(issues.is_empty(), "{:?}", issues.issues());
        let kernel = KernelConfig::new().with_monitor_interval(Duration::from_millis(5));
        Office::open(metadata.unwrap(), kernel).unwrap()
    }

    fn channel() -> (
        impl FnOnce(ProcessOutcome) + Send + 'static,
        mpsc::Receiver<ProcessOutcome>,
    ) {
        let (sender, receiver) = mpsc::channel();
        (
            move |outcome| {
                let _ = sender.send(outcome);
            },
            receiver,
        )
    }

    fn run(office: &Office, function: &str, parameter: Option<Object>) -> ProcessOutcome {
        let (callback, receiver) = channel();
        office.invoke(function, parameter, callback).unwrap();
        receiver.recv_timeout(Duration::from_secs(5)).unwrap()
    }

    fn value<T: Clone + 'static>(outcome: &ProcessOutcome) -> T {
        outcome
            .value()
            .and_then(|value| value.downcast_ref::<T>())
            .cloned()
            .unwrap_or_else(|| panic!("unexpected outcome {:?}", outcome))
    }

    #[test]
    fn test_next_function_receives_value() {
        let config = OfficeConfiguration::new("office")
            .with_type("Integer", &[])
            .with_function(FunctionConfiguration::new("first", "first").with_next("second", Some("Integer")))
            .with_function(FunctionConfiguration::new("second", "second").link_parameter(0, "Integer"));
        let factories = Factories::new()
            .with_function("first", function_fn(|_| Ok(Some(object(20u32)))))
            .with_function(
                "second",
                function_fn(|ctx| {
                    let input = ctx.object_as::<u32>(0)?;
                    Ok(Some(object(*input + 1)))
                }),
            );
        let office = open(&config, &factories);

        let outcome = run(&office, "first", None);
        assert!(matches!(outcome, ProcessOutcome::Completed(_)));
        assert_eq!(value::<u32>(&outcome), 21);

        let metrics = office.metrics();
        assert_eq!(metrics.functions_executed, 2);
        assert_eq!(metrics.processes_completed, 1);
    }

    #[test]
    fn test_worker_pool_team() {
        let config = OfficeConfiguration::new("office")
            .with_team("pool", atrium_graph::TeamStrategy::WorkerPool { threads: 2 })
            .with_function(FunctionConfiguration::new("threaded", "threaded").with_team("pool"));
        let factories = Factories::new().with_function(
            "threaded",
            function_fn(|_| Ok(std::thread::current().name().map(|name| object(name.to_string())))),
        );
        let office = open(&config, &factories);

        let outcome = run(&office, "threaded", None);
        assert!(value::<String>(&outcome).starts_with("atrium-pool-"));
    }

    #[test]
    fn test_objects_loaded_in_dependency_order_and_recycled() {
        let log = Log::default();
        let config = OfficeConfiguration::new("office")
            .with_type("Connection", &[])
            .with_managed_object(ManagedObjectConfiguration::new("pool", "pool", "Connection"))
            .with_managed_object(
                ManagedObjectConfiguration::new("session", "session", "Connection")
                    .with_scope(ObjectScope::Function)
                    .with_dependency("pool"),
            )
            .with_function(
                FunctionConfiguration::new("query", "query").link_managed_object(0, "session", "Connection"),
            );
        let factories = Factories::new()
            .with_source("pool", Arc::new(TrackedSource { name: "pool", log: log.clone() }))
            .with_source("session", Arc::new(TrackedSource { name: "session", log: log.clone() }))
            .with_function(
                "query",
                function_fn(|ctx| Ok(Some(object(format!("via {}", ctx.object_as::<String>(0)?))))),
            );
        let office = open(&config, &factories);

        let outcome = run(&office, "query", None);
        assert_eq!(value::<String>(&outcome), "via session");
        assert!(log.position("source pool") < log.position("source session"));
        // function scope ends before the process does
        assert!(log.position("recycle session") < log.position("recycle pool"));
        assert_eq!(office.metrics().objects_recycled, 2);
        assert_eq!(office.close(), 0);
    }

    #[test]
    fn test_own_escalation_handler() {
        let config = OfficeConfiguration::new("office")
            .with_type("IOException", &["Failure"])
            .with_function(
                FunctionConfiguration::new("read", "read").link_escalation("IOException", "handler"),
            )
            .with_function(FunctionConfiguration::new("handler", "handler"));
        let factories = Factories::new()
            .with_function("read", function_fn(|_| Err(Escalation::new("IOException", "disk"))))
            .with_function(
                "handler",
                function_fn(|ctx| {
                    let escalation = ctx.parameter_as::<Escalation>()?;
                    Ok(Some(object(format!("handled {}", escalation.message()))))
                }),
            );
        let office = open(&config, &factories);

        let outcome = run(&office, "read", None);
        let ProcessOutcome::Recovered { handled, .. } = &outcome else {
            panic!("expected recovery, got {:?}", outcome);
        };
        assert_eq!(handled.kind().as_str(), "IOException");
        assert_eq!(value::<String>(&outcome), "handled disk");
        assert_eq!(office.metrics().escalations_handled, 1);
    }

    #[test]
    fn test_instigator_handles_sequential_flow_escalation() {
        let log = Log::default();
        let config = OfficeConfiguration::new("office")
            .with_type("SQLException", &["Failure"])
            .with_function(
                FunctionConfiguration::new("order", "order")
                    .link_flow("insert", InstigationStrategy::Sequential)
                    .link_escalation("SQLException", "rollback")
                    .with_next("confirm", None),
            )
            .with_function(FunctionConfiguration::new("insert", "insert"))
            .with_function(FunctionConfiguration::new("rollback", "rollback"))
            .with_function(FunctionConfiguration::new("confirm", "confirm"));
        let order_log = log.clone();
        let insert_log = log.clone();
        let factories = Factories::new()
            .with_function(
                "order",
                function_fn(move |ctx| {
                    order_log.push("order");
                    ctx.do_flow(0, None)?;
                    Ok(None)
                }),
            )
            .with_function(
                "insert",
                function_fn(move |_| {
                    insert_log.push("insert");
                    Err(Escalation::new("SQLException", "constraint"))
                }),
            )
            .with_function("rollback", logging(&log, "rollback"))
            .with_function("confirm", logging(&log, "confirm"));
        let office = open(&config, &factories);

        let outcome = run(&office, "order", None);
        assert!(matches!(outcome, ProcessOutcome::Recovered { .. }));
        assert_eq!(log.entries(), vec!["order", "insert", "rollback", "confirm"]);
    }

    #[test]
    fn test_office_and_default_handlers() {
        let config = OfficeConfiguration::new("office")
            .with_type("IOException", &["Failure"])
            .with_function(FunctionConfiguration::new("io", "io"))
            .with_function(FunctionConfiguration::new("other", "other"))
            .with_function(FunctionConfiguration::new("io_handler", "io_handler"))
            .with_function(FunctionConfiguration::new("fallback", "fallback"))
            .with_escalation("IOException", "io_handler")
            .with_default_escalation_handler("fallback");
        let factories = Factories::new()
            .with_function("io", function_fn(|_| Err(Escalation::new("IOException", "disk"))))
            .with_function("other", function_fn(|_| Err(Escalation::new("Timeout", "slow"))))
            .with_function("io_handler", function_fn(|_| Ok(Some(object("office")))))
            .with_function("fallback", function_fn(|_| Ok(Some(object("fallback")))));
        let office = open(&config, &factories);

        assert_eq!(value::<&str>(&run(&office, "io", None)), "office");
        assert_eq!(value::<&str>(&run(&office, "other", None)), "fallback");
    }

    #[test]
    fn test_unhandled_escalation_fails_process() {
        let log = Log::default();
        let config = OfficeConfiguration::new("office")
            .with_function(FunctionConfiguration::new("fail", "fail").with_next("after", None))
            .with_function(FunctionConfiguration::new("after", "after"));
        let factories = Factories::new()
            .with_function("fail", function_fn(|_| Err(Escalation::new("IOException", "disk"))))
            .with_function("after", logging(&log, "after"));
        let office = open(&config, &factories);

        let outcome = run(&office, "fail", None);
        assert_eq!(outcome.failure().unwrap().kind().as_str(), "IOException");
        assert!(log.entries().is_empty());

        let metrics = office.metrics();
        assert_eq!(metrics.escalations_unhandled, 1);
        assert_eq!(metrics.processes_failed, 1);
        assert_eq!(metrics.failure_rate(), 1.0);
    }

    #[test]
    fn test_panic_becomes_escalation() {
        let config = OfficeConfiguration::new("office")
            .with_function(FunctionConfiguration::new("boom", "boom"));
        let factories = Factories::new().with_function("boom", function_fn(|_| panic!("boom")));
        let office = open(&config, &factories);

        let outcome = run(&office, "boom", None);
        let failure = outcome.failure().unwrap();
        assert_eq!(failure.kind().as_str(), PANIC);
        assert_eq!(failure.message(), "boom");
    }

    #[test]
    fn test_suspended_function_resumes_on_completion() {
        let source = DeferredSource::default();
        let config = OfficeConfiguration::new("office")
            .with_type("Connection", &[])
            .with_managed_object(ManagedObjectConfiguration::new("db", "db", "Connection"))
            .with_function(FunctionConfiguration::new("query", "query").link_managed_object(0, "db", "Connection"));
        let factories = Factories::new()
            .with_source("db", Arc::new(source.clone()))
            .with_function("query", function_fn(|ctx| ctx.object(0).map(Some)));
        let office = open(&config, &factories);

        let (callback, receiver) = channel();
        let handle = office.invoke("query", None, callback).unwrap();
        assert!(receiver.try_recv().is_err());
        assert!(!handle.is_complete());

        let user = source.user.lock().take().unwrap();
        std::thread::spawn(move || {
            user.set_managed_object(Box::new(ValueObject::new(object(7u8))));
        })
        .join()
        .unwrap();

        let outcome = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(value::<u8>(&outcome), 7);
        assert!(handle.is_complete());
    }

    #[test]
    fn test_async_timeout_fails_suspended_function() {
        let config = OfficeConfiguration::new("office")
            .with_type("Connection", &[])
            .with_managed_object(
                ManagedObjectConfiguration::new("db", "db", "Connection").with_async_timeout_ms(20),
            )
            .with_function(FunctionConfiguration::new("query", "query").link_managed_object(0, "db", "Connection"));
        let factories = Factories::new()
            .with_source("db", Arc::new(DeferredSource::default()))
            .with_function("query", function_fn(|ctx| ctx.object(0).map(Some)));
        let office = open(&config, &factories);

        let outcome = run(&office, "query", None);
        assert_eq!(outcome.failure().unwrap().kind().as_str(), ASYNC_TIMEOUT);
        // the sweep that timed out is over once the monitor has stopped
        office.close();
        assert_eq!(office.metrics().async_timeouts, 1);
    }

    fn suspended_query(log: &Log, handled: Option<&str>) -> (Office, DeferredSource) {
        let source = DeferredSource::default();
        let mut query = FunctionConfiguration::new("query", "query").link_managed_object(0, "db", "Connection");
        if let Some(kind) = handled {
            query = query.link_escalation(kind, "handler");
        }
        let handler_log = log.clone();
        let config = OfficeConfiguration::new("office")
            .with_type("Connection", &[])
            .with_managed_object(ManagedObjectConfiguration::new("db", "db", "Connection"))
            .with_function(query)
            .with_function(FunctionConfiguration::new("handler", "handler"));
        let factories = Factories::new()
            .with_source("db", Arc::new(source.clone()))
            .with_function("query", logging(log, "query"))
            .with_function(
                "handler",
                function_fn(move |ctx| {
                    let escalation = ctx.parameter_as::<Escalation>()?;
                    handler_log.push(format!("handler {}", escalation.kind()));
                    Ok(Some(object("handled".to_string())))
                }),
            );
        (open(&config, &factories), source)
    }

    #[test]
    fn test_cancel_routes_to_cancelled_handler() {
        let log = Log::default();
        let (office, source) = suspended_query(&log, Some(CANCELLED));

        let (callback, receiver) = channel();
        let handle = office.invoke("query", None, callback).unwrap();
        handle.cancel();
        assert!(handle.is_cancelled());

        let outcome = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        let ProcessOutcome::Recovered { handled, .. } = &outcome else {
            panic!("expected recovery, got {:?}", outcome);
        };
        assert!(handled.is_cancellation());
        assert_eq!(value::<String>(&outcome), "handled");
        assert_eq!(log.entries(), vec![format!("handler {}", CANCELLED)]);
        assert_eq!(office.metrics().escalations_handled, 1);

        // the object arriving late is not used
        if let Some(user) = source.user.lock().take() {
            user.set_managed_object(Box::new(ValueObject::new(object(1u8))));
        }
        assert!(!log.entries().contains(&"query".to_string()));
    }

    #[test]
    fn test_cancel_handled_by_failure_ancestor() {
        let log = Log::default();
        let (office, _source) = suspended_query(&log, Some(FAILURE));

        let (callback, receiver) = channel();
        office.invoke("query", None, callback).unwrap().cancel();

        let outcome = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, ProcessOutcome::Recovered { .. }));
        assert_eq!(log.entries(), vec![format!("handler {}", CANCELLED)]);
    }

    #[test]
    fn test_unhandled_cancel_fails_process() {
        let log = Log::default();
        let (office, _source) = suspended_query(&log, None);

        let (callback, receiver) = channel();
        office.invoke("query", None, callback).unwrap().cancel();

        let outcome = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(outcome.failure().unwrap().is_cancellation());
        assert!(log.entries().is_empty());
        let metrics = office.metrics();
        assert_eq!(metrics.escalations_handled, 0);
        assert_eq!(metrics.escalations_unhandled, 1);
    }

    /// Managed object whose stores complete when the test says so
    #[derive(Clone, Default)]
    struct Ledger {
        completions: Arc<Mutex<Vec<Box<dyn AsyncCompletion>>>>,
    }

    impl ManagedObject for Ledger {
        fn object(&self) -> Result<Object, Escalation> {
            Ok(object("ledger".to_string()))
        }

        fn store(&self, completion: Box<dyn AsyncCompletion>) -> Result<(), Escalation> {
            self.completions.lock().push(completion);
            Ok(())
        }
    }

    impl ManagedObjectSource for Ledger {
        fn source(&self, user: Box<dyn ObjectUser>) {
            user.set_managed_object(Box::new(self.clone()));
        }
    }

    fn ledger_office(log: &Log, ledger: &Ledger) -> Office {
        let config = OfficeConfiguration::new("office")
            .with_type("Ledger", &[])
            .with_managed_object(ManagedObjectConfiguration::new("ledger", "ledger", "Ledger"))
            .with_function(
                FunctionConfiguration::new("save", "save")
                    .link_managed_object(0, "ledger", "Ledger")
                    .with_next("after", None),
            )
            .with_function(FunctionConfiguration::new("after", "after"));
        let save_log = log.clone();
        let factories = Factories::new()
            .with_source("ledger", Arc::new(ledger.clone()))
            .with_function(
                "save",
                function_fn(move |ctx| {
                    ctx.store(0)?;
                    match ctx.store(0) {
                        Ok(()) => save_log.push("second store accepted"),
                        Err(rejected) => save_log.push(format!("second store rejected {}", rejected.kind())),
                    }
                    save_log.push("saved");
                    Ok(None)
                }),
            )
            .with_function("after", logging(log, "after"));
        open(&config, &factories)
    }

    fn complete_store(ledger: &Ledger, result: Result<(), Escalation>) {
        let completion = ledger.completions.lock().pop().unwrap();
        std::thread::spawn(move || completion.complete(result))
            .join()
            .unwrap();
    }

    #[test]
    fn test_deferred_store_suspends_function() {
        let log = Log::default();
        let ledger = Ledger::default();
        let office = ledger_office(&log, &ledger);

        let (callback, receiver) = channel();
        let handle = office.invoke("save", None, callback).unwrap();
        assert_eq!(
            log.entries(),
            vec![format!("second store rejected {}", ILLEGAL_STATE), "saved".to_string()]
        );
        // suspended until the store completes
        assert!(receiver.try_recv().is_err());
        assert!(!handle.is_complete());
        assert_eq!(ledger.completions.lock().len(), 1);

        complete_store(&ledger, Ok(()));
        let outcome = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(outcome, ProcessOutcome::Completed(_)));
        assert_eq!(log.entries().last().map(String::as_str), Some("after"));
    }

    #[test]
    fn test_failed_store_escalates() {
        let log = Log::default();
        let ledger = Ledger::default();
        let office = ledger_office(&log, &ledger);

        let (callback, receiver) = channel();
        office.invoke("save", None, callback).unwrap();
        complete_store(&ledger, Err(Escalation::new("IOException", "flush failed")));

        let outcome = receiver.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.failure().unwrap().message(), "flush failed");
        assert!(!log.entries().contains(&"after".to_string()));
    }

    fn governed_office(log: &Log, fail_second: bool) -> Office {
        let config = OfficeConfiguration::new("office")
            .with_type("Connection", &[])
            .with_type("Transactional", &[])
            .with_managed_object(
                ManagedObjectConfiguration::new("conn", "conn", "Connection")
                    .with_scope(ObjectScope::Function)
                    .with_extension("Transactional", "self"),
            )
            .with_governance(GovernanceConfiguration::new("tx", "tx", "Transactional"))
            .with_function(
                FunctionConfiguration::new("first", "first")
                    .link_managed_object(0, "conn", "Connection")
                    .govern("tx")
                    .with_next("second", None),
            )
            .with_function(FunctionConfiguration::new("second", "second"));
        let governance_log = log.clone();
        let second_log = log.clone();
        let factories = Factories::new()
            .with_source("conn", Arc::new(TrackedSource { name: "conn", log: log.clone() }))
            .with_extension("self", Arc::new(SelfExtension))
            .with_governance(
                "tx",
                governance_fn(move || {
                    Box::new(Recording {
                        log: governance_log.clone(),
                        begin: false,
                    })
                }),
            )
            .with_function("first", logging(log, "first"))
            .with_function(
                "second",
                function_fn(move |_| {
                    second_log.push("second");
                    if fail_second {
                        return Err(Escalation::new("IOException", "lost"));
                    }
                    Ok(None)
                }),
            );
        open(&config, &factories)
    }

    #[test]
    fn test_governance_defers_recycle_until_enforced() {
        let log = Log::default();
        let office = governed_office(&log, false);

        let outcome = run(&office, "first", None);
        assert!(outcome.is_success());
        assert!(log.position("govern conn") < log.position("first"));
        // the function scope of first ended before second ran, yet the
        // governed connection outlives it until enforce
        assert!(log.position("second") < log.position("enforce"));
        assert!(log.position("enforce") < log.position("recycle conn"));
        assert!(!log.entries().contains(&"disregard".to_string()));
    }

    #[test]
    fn test_governance_disregarded_when_thread_fails() {
        let log = Log::default();
        let office = governed_office(&log, true);

        let outcome = run(&office, "first", None);
        assert!(!outcome.is_success());
        assert!(log.position("disregard") < log.position("recycle conn"));
        assert!(!log.entries().contains(&"enforce".to_string()));
    }

    #[test]
    fn test_duty_enforces_governance() {
        let log = Log::default();
        let config = OfficeConfiguration::new("office")
            .with_type("Connection", &[])
            .with_type("Transactional", &[])
            .with_manual_governance()
            .with_managed_object(
                ManagedObjectConfiguration::new("conn", "conn", "Connection")
                    .with_scope(ObjectScope::Function)
                    .with_extension("Transactional", "self"),
            )
            .with_governance(GovernanceConfiguration::new("tx", "tx", "Transactional"))
            .with_function(
                FunctionConfiguration::new("work", "work")
                    .link_managed_object(0, "conn", "Connection")
                    .with_pre_administration(
                        AdministrationConfiguration::new("begin", "begin", "Transactional")
                            .with_object("conn")
                            .with_governance("tx"),
                    )
                    .with_post_administration(
                        AdministrationConfiguration::new("commit", "commit", "Transactional")
                            .with_object("conn")
                            .with_governance("tx"),
                    ),
            );
        let governance_log = log.clone();
        let begin_log = log.clone();
        let commit_log = log.clone();
        let factories = Factories::new()
            .with_source("conn", Arc::new(TrackedSource { name: "conn", log: log.clone() }))
            .with_extension("self", Arc::new(SelfExtension))
            .with_governance(
                "tx",
                governance_fn(move || {
                    Box::new(Recording {
                        log: governance_log.clone(),
                        begin: false,
                    })
                }),
            )
            .with_duty(
                "begin",
                duty_fn(move |extensions, ctx| {
                    begin_log.push(format!("begin {}", extensions.len()));
                    ctx.activate_governance(0)
                }),
            )
            .with_duty(
                "commit",
                duty_fn(move |_, ctx| {
                    commit_log.push("commit");
                    ctx.enforce_governance(0)
                }),
            )
            .with_function("work", logging(&log, "work"));
        let office = open(&config, &factories);

        let outcome = run(&office, "work", None);
        assert!(outcome.is_success());
        assert_eq!(
            log.entries()[..6],
            ["source conn", "begin 1", "govern conn", "work", "commit", "enforce"]
        );
        assert_eq!(log.entries().iter().filter(|entry| *entry == "enforce").count(), 1);
        assert!(log.position("enforce") < log.position("recycle conn"));
    }

    #[test]
    fn test_governance_flow_runs_before_function() {
        let log = Log::default();
        let config = OfficeConfiguration::new("office")
            .with_type("Connection", &[])
            .with_type("Transactional", &[])
            .with_managed_object(
                ManagedObjectConfiguration::new("conn", "conn", "Connection").with_extension("Transactional", "self"),
            )
            .with_governance(
                GovernanceConfiguration::new("tx", "tx", "Transactional")
                    .with_flow(FlowConfiguration::new("begin", InstigationStrategy::Sequential)),
            )
            .with_function(
                FunctionConfiguration::new("work", "work")
                    .link_managed_object(0, "conn", "Connection")
                    .govern("tx"),
            )
            .with_function(FunctionConfiguration::new("begin", "begin"));
        let governance_log = log.clone();
        let factories = Factories::new()
            .with_source("conn", Arc::new(TrackedSource { name: "conn", log: log.clone() }))
            .with_extension("self", Arc::new(SelfExtension))
            .with_governance(
                "tx",
                governance_fn(move || {
                    Box::new(Recording {
                        log: governance_log.clone(),
                        begin: true,
                    })
                }),
            )
            .with_function("begin", logging(&log, "begin"))
            .with_function("work", logging(&log, "work"));
        let office = open(&config, &factories);

        let outcome = run(&office, "work", None);
        assert!(outcome.is_success());
        assert!(log.position("govern conn") < log.position("begin"));
        assert!(log.position("begin") < log.position("work"));
        assert!(log.position("work") < log.position("enforce"));
    }

    #[test]
    fn test_parallel_and_asynchronous_flows() {
        let log = Log::default();
        let config = OfficeConfiguration::new("office")
            .with_function(
                FunctionConfiguration::new("main", "main")
                    .link_flow("parallel", InstigationStrategy::Parallel)
                    .link_flow("detached", InstigationStrategy::Asynchronous),
            )
            .with_function(FunctionConfiguration::new("parallel", "parallel"))
            .with_function(FunctionConfiguration::new("detached", "detached"));
        let factories = Factories::new()
            .with_function(
                "main",
                function_fn(|ctx| {
                    ctx.do_flow(0, None)?;
                    ctx.do_flow(1, None)?;
                    Ok(Some(object("main")))
                }),
            )
            .with_function("parallel", logging(&log, "parallel"))
            .with_function("detached", logging(&log, "detached"));
        let office = open(&config, &factories);

        let outcome = run(&office, "main", None);
        assert_eq!(value::<&str>(&outcome), "main");
        assert!(log.entries().contains(&"parallel".to_string()));
        assert!(log.entries().contains(&"detached".to_string()));

        let metrics = office.metrics();
        assert_eq!(metrics.processes_started, 2);
        assert_eq!(metrics.processes_completed, 2);
    }

    #[test]
    fn test_parallel_failure_is_fatal_to_process() {
        let config = OfficeConfiguration::new("office")
            .with_function(
                FunctionConfiguration::new("main", "main").link_flow("parallel", InstigationStrategy::Parallel),
            )
            .with_function(FunctionConfiguration::new("parallel", "parallel"));
        let factories = Factories::new()
            .with_function(
                "main",
                function_fn(|ctx| {
                    ctx.do_flow(0, None)?;
                    Ok(None)
                }),
            )
            .with_function("parallel", function_fn(|_| Err(Escalation::new("IOException", "lost"))));
        let office = open(&config, &factories);

        let outcome = run(&office, "main", None);
        assert_eq!(outcome.failure().unwrap().message(), "lost");
    }

    #[test]
    fn test_invoke_errors() {
        let config = OfficeConfiguration::new("office")
            .with_function(FunctionConfiguration::new("noop", "noop"));
        let factories = Factories::new().with_function("noop", function_fn(|_| Ok(None)));
        let office = open(&config, &factories);

        assert_eq!(
            office.invoke("missing", None, |_| {}).unwrap_err(),
            OfficeError::UnknownFunction {
                name: "missing".to_string()
            }
        );

        assert_eq!(office.close(), 0);
        assert!(office.is_closed());
        assert!(matches!(
            office.invoke("noop", None, |_| {}),
            Err(OfficeError::Closed { .. })
        ));
    }

    #[test]
    fn test_close_reports_leaked_objects() {
        let config = OfficeConfiguration::new("office")
            .with_type("Connection", &[])
            .with_managed_object(ManagedObjectConfiguration::new("db", "db", "Connection"))
            .with_function(FunctionConfiguration::new("query", "query").link_managed_object(0, "db", "Connection"));
        let factories = Factories::new()
            .with_source("db", Arc::new(DeferredSource::default()))
            .with_function("query", function_fn(|ctx| ctx.object(0).map(Some)));
        let office = open(&config, &factories);

        let _handle = office.invoke("query", None, |_| {}).unwrap();
        assert_eq!(office.close(), 1);
    }

    #[test]
    fn test_sync_source_value() {
        let config = OfficeConfiguration::new("office")
            .with_type("Config", &[])
            .with_managed_object(ManagedObjectConfiguration::new("settings", "settings", "Config"))
            .with_function(FunctionConfiguration::new("read", "read").link_managed_object(0, "settings", "Config"));
        let factories = Factories::new()
            .with_source("settings", Arc::new(SyncSource::new(|| Ok(object(42u64)))))
            .with_function("read", function_fn(|ctx| ctx.object(0).map(Some)));
        let office = open(&config, &factories);

        assert_eq!(value::<u64>(&run(&office, "read", None)), 42);
    }

    #[tokio::test]
    async fn test_invoke_async() {
        let config = OfficeConfiguration::new("office")
            .with_team("pool", atrium_graph::TeamStrategy::WorkerPool { threads: 1 })
            .with_function(FunctionConfiguration::new("answer", "answer").with_team("pool"));
        let factories = Factories::new().with_function("answer", function_fn(|_| Ok(Some(object(42i32)))));
        let office = open(&config, &factories);

        let outcome = office.invoke_async("answer", None).await.unwrap();
        assert_eq!(value::<i32>(&outcome), 42);
    }
}
