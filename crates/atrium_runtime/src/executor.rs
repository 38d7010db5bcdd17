//! Commands executed by teams.
//!
//! A process advances as a series of [`Command`]s. A command runs until it
//! is done, suspends on a managed object, or moves to another team by
//! submitting itself there. Steps return the follow-up command instead of
//! calling it, so long function chains never grow the stack.
//!
//! A function runs in stages:
//!
//! ```text
//! Load(objects) -> Govern(governances) -> PreAdminister(duties)
//!   -> Body -> Settle(stores) -> PostAdminister(duties) -> Complete
//! ```
//!
//! `Settle` keeps the job suspended until every store or invalidation the
//! body started has completed.
//!
//! Every stage boundary checks for cancellation, which is raised as a
//! `Cancelled` escalation once per thread. Each stage runs on its
//! responsible team: governance callbacks on the governance's team, duties on
//! the administration's team, everything else on the function's team.

use crate::continuation::{Routing, Work};
use crate::engine::OfficeShared;
use crate::lifecycle::{Acquire, ManagedObjectContainer, Waiter};
use crate::process::{ProcessState, Suspension, ThreadState};
use crate::team::TeamError;
use atrium_core::{
    contain_panic, DutyContext, Escalation, FlowContext, FlowRecorder, FunctionContext,
    InstigationStrategy, JobId, ManagedObject, Object, ObjectIndex, ObjectScope, ProcessId,
};
use atrium_governance::{GovernanceEngine, GovernanceOutcome, InstigatedFlow};
use atrium_graph::{
    AdministeredObject, AdministrationMetadata, FlowMetadata, FunctionIndex, FunctionMetadata,
    GovernanceIndex, OfficeMetadata, TeamIndex,
};
use std::collections::VecDeque;
use std::sync::Arc;

/// Unit of work submitted to a team
#[derive(Debug)]
pub enum Command {
    /// Run a function, starting or resuming at its current stage
    Function(Box<FunctionJob>),
    /// Resolve governance and unload the objects of a finished thread
    CompleteThread(Box<ThreadCompletion>),
    /// Recycle an unloaded managed object
    Recycle(RecycleTask),
}

impl Command {
    /// Short name for logging
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Function(_) => "function",
            Self::CompleteThread(_) => "complete_thread",
            Self::Recycle(_) => "recycle",
        }
    }

    /// Run the command and everything it continues with on this thread
    pub fn run(self) {
        let mut next = Some(self);
        while let Some(command) = next {
            next = command.step();
        }
    }

    fn step(self) -> Option<Command> {
        match self {
            Self::Function(job) => job.step(),
            Self::CompleteThread(completion) => completion.step(),
            Self::Recycle(task) => {
                task.run();
                None
            }
        }
    }

    /// Finish a command a stopped team refused, without any team
    pub(crate) fn abandon(self, error: &TeamError) {
        match self {
            Self::Function(job) => job.abandon(error),
            Self::CompleteThread(mut completion) => {
                completion.inline = true;
                Self::CompleteThread(completion).run();
            }
            Self::Recycle(task) => task.run(),
        }
    }
}

fn to_work(flow: InstigatedFlow) -> Work {
    Work::call(flow.flow.function, flow.argument)
}

fn instigated(flows: &[FlowMetadata], recorder: FlowRecorder) -> Vec<InstigatedFlow> {
    recorder
        .into_requests()
        .into_iter()
        .filter_map(|request| {
            flows.get(request.flow).map(|flow| InstigatedFlow {
                flow: flow.clone(),
                argument: request.argument,
            })
        })
        .collect()
}

/// Start parallel and asynchronous flows now; hand sequential ones back
fn instigate(
    thread: &Arc<ThreadState>,
    flows: Vec<InstigatedFlow>,
    current: Option<TeamIndex>,
) -> Vec<InstigatedFlow> {
    let mut sequential = Vec::new();
    for flow in flows {
        match flow.flow.strategy {
            InstigationStrategy::Sequential => sequential.push(flow),
            InstigationStrategy::Parallel => {
                tracing::debug!(function = flow.flow.function, "instigating parallel flow");
                thread
                    .process()
                    .spawn_thread(flow.flow.function, flow.argument, current);
            }
            InstigationStrategy::Asynchronous => {
                tracing::debug!(function = flow.flow.function, "instigating asynchronous flow");
                ProcessState::start(
                    thread.office(),
                    flow.flow.function,
                    flow.argument,
                    None,
                    current,
                );
            }
        }
    }
    sequential
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Load(usize),
    Govern(GovernanceIndex),
    PreAdminister(usize),
    Body,
    Settle(usize),
    PostAdminister(usize),
    Complete,
}

enum Loaded {
    Ready(Box<FunctionJob>),
    Failed(Box<FunctionJob>, Escalation),
    Cancelled(Box<FunctionJob>),
    Parked,
}

impl Stage {
    fn before_body(self) -> bool {
        matches!(self, Self::Load(_) | Self::Govern(_) | Self::PreAdminister(_))
    }
}

/// One execution of a function within a thread
pub struct FunctionJob {
    id: JobId,
    thread: Arc<ThreadState>,
    function: FunctionIndex,
    argument: Option<Object>,
    team: Option<TeamIndex>,
    home: Option<TeamIndex>,
    stage: Stage,
    objects: Vec<Option<Arc<ManagedObjectContainer>>>,
    flows: Vec<InstigatedFlow>,
    mutations: Vec<Arc<ManagedObjectContainer>>,
    value: Option<Object>,
}

impl FunctionJob {
    pub(crate) fn new(
        thread: &Arc<ThreadState>,
        function: FunctionIndex,
        argument: Option<Object>,
        current: Option<TeamIndex>,
    ) -> Box<Self> {
        let metadata = thread.office().metadata();
        let home = metadata
            .function(function)
            .and_then(|function| function.team)
            .or(current)
            .or(metadata.default_team);
        Box::new(Self {
            id: JobId::new(),
            thread: Arc::clone(thread),
            function,
            argument,
            team: current,
            home,
            stage: Stage::Load(0),
            objects: vec![None; metadata.function_objects.len()],
            flows: Vec::new(),
            mutations: Vec::new(),
            value: None,
        })
    }

    /// Job id
    #[must_use]
    pub fn id(&self) -> JobId {
        self.id
    }

    pub(crate) fn function(&self) -> FunctionIndex {
        self.function
    }

    pub(crate) fn home(&self) -> Option<TeamIndex> {
        self.home
    }

    pub(crate) fn set_team(&mut self, team: Option<TeamIndex>) {
        self.team = team;
    }

    /// Submit the job to the team it was running on
    pub(crate) fn redispatch(self: Box<Self>) {
        let office = Arc::clone(self.thread.office());
        let team = self.team;
        office.dispatch(team, Command::Function(self));
    }

    fn needs_hop(&self, target: Option<TeamIndex>) -> bool {
        target.is_some() && target != self.team
    }

    fn hop(mut self: Box<Self>, office: &OfficeShared, target: Option<TeamIndex>) -> Option<Command> {
        tracing::trace!(job = %self.id, ?target, stage = ?self.stage, "function job changing team");
        self.team = target;
        office.dispatch(target, Command::Function(self));
        None
    }

    fn step(mut self: Box<Self>) -> Option<Command> {
        let office = Arc::clone(self.thread.office());
        let metadata = office.metadata();
        let Some(function) = metadata.function(self.function) else {
            let failure = Escalation::illegal_state(format!("Unknown function index {}", self.function));
            return self.fail_thread(failure);
        };

        loop {
            if self.thread.take_cancellation() {
                tracing::debug!(job = %self.id, stage = ?self.stage, "raising cancellation");
                return self.escalate(&office, Escalation::cancelled());
            }

            match self.stage {
                Stage::Load(i) => {
                    let Some(&index) = function.required_objects.get(i) else {
                        self.stage = Stage::Govern(0);
                        continue;
                    };
                    if self.needs_hop(self.home) {
                        let home = self.home;
                        return self.hop(&office, home);
                    }
                    match self.load(&office, index) {
                        Loaded::Ready(job) => {
                            self = job;
                            self.stage = Stage::Load(i + 1);
                        }
                        Loaded::Failed(job, failure) => return job.escalate(&office, failure),
                        Loaded::Cancelled(job) => {
                            self = job;
                            continue;
                        }
                        Loaded::Parked => return None,
                    }
                }
                Stage::Govern(g) => {
                    let Some(governance) = metadata.governances.get(g) else {
                        self.stage = Stage::PreAdminister(0);
                        continue;
                    };
                    let activates = function.activates_governance(g);
                    if !activates && !self.thread.governance().is_active(g) {
                        self.stage = Stage::Govern(g + 1);
                        continue;
                    }
                    let target = governance.team.or(self.home);
                    if self.needs_hop(target) {
                        return self.hop(&office, target);
                    }

                    let mut outcome = GovernanceOutcome::default();
                    {
                        let mut engine = self.thread.governance();
                        if activates {
                            if let Err(failure) = engine.activate(governance) {
                                outcome.failure = Some(failure);
                            }
                        }
                        if outcome.is_success() {
                            outcome.merge(self.govern_objects(metadata, function, g, &mut engine));
                        }
                    }
                    self.stage = Stage::Govern(g + 1);
                    if let Some(failure) = self.absorb(outcome) {
                        return self.escalate(&office, failure);
                    }
                }
                Stage::PreAdminister(k) => {
                    let Some(administration) = function.pre_administration.get(k) else {
                        self.stage = Stage::Body;
                        continue;
                    };
                    let target = administration.team.or(self.home);
                    if self.needs_hop(target) {
                        return self.hop(&office, target);
                    }

                    let outcome = self.administer(metadata, function, administration);
                    self.stage = Stage::PreAdminister(k + 1);
                    if let Some(failure) = self.absorb(outcome) {
                        return self.escalate(&office, failure);
                    }
                }
                Stage::Body => {
                    if self.needs_hop(self.home) {
                        let home = self.home;
                        return self.hop(&office, home);
                    }

                    tracing::debug!(job = %self.id, function = %function.name, "executing function");
                    let mut ctx = BodyScope {
                        job: &*self,
                        function,
                        recorder: FlowRecorder::new(function.flows.len()),
                        mutations: Vec::new(),
                    };
                    let result = contain_panic(|| function.function.execute(&mut ctx));
                    let BodyScope {
                        recorder, mutations, ..
                    } = ctx;
                    let flows = instigated(&function.flows, recorder);
                    office.metrics().record_function();

                    match result {
                        Ok(value) => {
                            self.value = value;
                            self.mutations = mutations;
                            self.stage = Stage::Settle(0);
                            let current = self.team;
                            let sequential = instigate(&self.thread, flows, current);
                            self.flows.extend(sequential);
                        }
                        Err(failure) => return self.escalate(&office, failure),
                    }
                }
                Stage::Settle(m) => {
                    let Some(container) = self.mutations.get(m).cloned() else {
                        self.mutations.clear();
                        self.stage = Stage::PostAdminister(0);
                        continue;
                    };
                    match self.settle(&container) {
                        Loaded::Ready(job) => {
                            self = job;
                            self.stage = Stage::Settle(m + 1);
                        }
                        Loaded::Failed(job, failure) => return job.escalate(&office, failure),
                        Loaded::Cancelled(job) => {
                            self = job;
                            continue;
                        }
                        Loaded::Parked => return None,
                    }
                }
                Stage::PostAdminister(k) => {
                    let Some(administration) = function.post_administration.get(k) else {
                        self.stage = Stage::Complete;
                        continue;
                    };
                    let target = administration.team.or(self.home);
                    if self.needs_hop(target) {
                        return self.hop(&office, target);
                    }

                    let outcome = self.administer(metadata, function, administration);
                    self.stage = Stage::PostAdminister(k + 1);
                    if let Some(failure) = self.absorb(outcome) {
                        return self.escalate(&office, failure);
                    }
                }
                Stage::Complete => return self.complete(function),
            }

            if self.stage.before_body() && !self.flows.is_empty() {
                return self.yield_to_flows();
            }
        }
    }

    /// Acquire the object at `index`, parking the job while it loads
    fn load(mut self: Box<Self>, office: &Arc<OfficeShared>, index: ObjectIndex) -> Loaded {
        loop {
            let Some(container) = self.load_container(office, index) else {
                return Loaded::Ready(self);
            };
            let dependencies: Vec<_> = office
                .metadata()
                .managed_object(index)
                .map(|metadata| {
                    metadata
                        .dependencies
                        .iter()
                        .filter_map(|dependency| self.container(*dependency))
                        .collect()
                })
                .unwrap_or_default();

            let suspension = Suspension::new();
            self.thread.track(&suspension);
            let waiter: Arc<dyn Waiter> = Arc::clone(&suspension) as Arc<dyn Waiter>;
            let acquired = container.acquire(
                || dependencies.iter().map(|dependency| dependency.object()).collect(),
                waiter,
            );
            match acquired {
                Acquire::Ready => return Loaded::Ready(self),
                Acquire::Failed(failure) => return Loaded::Failed(self, failure),
                Acquire::Pending => {}
            }

            tracing::debug!(job = %self.id, object = container.bound_name(), "function job suspended");
            match suspension.park(self) {
                // signalled before it parked
                Some(job) if job.thread.cancellation_pending() => return Loaded::Cancelled(job),
                Some(job) => self = job,
                None => return Loaded::Parked,
            }
        }
    }

    /// Wait for a store or invalidation started by the body
    fn settle(mut self: Box<Self>, container: &Arc<ManagedObjectContainer>) -> Loaded {
        loop {
            let suspension = Suspension::new();
            self.thread.track(&suspension);
            match container.await_mutation(Arc::clone(&suspension) as Arc<dyn Waiter>) {
                Acquire::Ready => return Loaded::Ready(self),
                Acquire::Failed(failure) => return Loaded::Failed(self, failure),
                Acquire::Pending => {}
            }

            tracing::debug!(job = %self.id, object = container.bound_name(), "function job awaiting managed object operation");
            match suspension.park(self) {
                Some(job) if job.thread.cancellation_pending() => return Loaded::Cancelled(job),
                Some(job) => self = job,
                None => return Loaded::Parked,
            }
        }
    }

    fn container(&self, index: ObjectIndex) -> Option<Arc<ManagedObjectContainer>> {
        match index {
            ObjectIndex::Parameter => None,
            ObjectIndex::Scoped { scope, index } => match scope {
                ObjectScope::Process => self.thread.process().objects().get(index).cloned(),
                ObjectScope::Thread => self.thread.objects().get(index).cloned(),
                ObjectScope::Function => self.objects.get(index).cloned().flatten(),
            },
        }
    }

    fn load_container(
        &mut self,
        office: &Arc<OfficeShared>,
        index: ObjectIndex,
    ) -> Option<Arc<ManagedObjectContainer>> {
        if let ObjectIndex::Scoped {
            scope: ObjectScope::Function,
            index: slot,
        } = index
        {
            let metadata = office.metadata().managed_object(index)?;
            let container = self
                .objects
                .get_mut(slot)?
                .get_or_insert_with(|| office.container(metadata));
            return Some(Arc::clone(container));
        }
        self.container(index)
    }

    /// Govern every required object that exposes an extension of the
    /// governance's type
    fn govern_objects(
        &self,
        metadata: &OfficeMetadata,
        function: &FunctionMetadata,
        governance: GovernanceIndex,
        engine: &mut GovernanceEngine,
    ) -> GovernanceOutcome {
        let mut outcome = GovernanceOutcome::default();
        let Some(governance_metadata) = metadata.governances.get(governance) else {
            return outcome;
        };

        for &index in &function.required_objects {
            let Some(object_metadata) = metadata.managed_object(index) else {
                continue;
            };
            let Some(capability) = object_metadata.capabilities.iter().find(|capability| {
                GovernanceEngine::governs_type(
                    &metadata.types,
                    governance_metadata,
                    capability.extension_type.as_str(),
                )
            }) else {
                continue;
            };
            let Some(container) = self.container(index) else {
                continue;
            };
            if engine.is_governing(governance, container.gate()) {
                continue;
            }

            let extension = Self::extension(&container, |object| {
                capability.factory.create_extension(object)
            });
            match extension {
                Ok(extension) => {
                    outcome.merge(engine.govern(governance_metadata, extension, container.gate()))
                }
                Err(failure) => outcome.failure = Some(failure),
            }
            if !outcome.is_success() {
                break;
            }
        }
        outcome
    }

    fn extension<F>(container: &ManagedObjectContainer, create: F) -> Result<Object, Escalation>
    where
        F: FnOnce(&dyn ManagedObject) -> Result<Object, Escalation>,
    {
        let object = container.managed_object().ok_or_else(|| {
            Escalation::illegal_state(format!(
                "Managed object {} is not loaded",
                container.bound_name()
            ))
        })?;
        contain_panic(|| create(object.as_ref()))
    }

    fn administered_extension(
        &self,
        metadata: &OfficeMetadata,
        administered: &AdministeredObject,
    ) -> Result<Object, Escalation> {
        let capability = metadata
            .managed_object(administered.index)
            .and_then(|object| object.capabilities.get(administered.capability))
            .ok_or_else(|| {
                Escalation::illegal_state(format!(
                    "No extension capability {} for {}",
                    administered.capability, administered.index
                ))
            })?;
        let container = self.container(administered.index).ok_or_else(|| {
            Escalation::illegal_state(format!("No managed object at {}", administered.index))
        })?;
        Self::extension(&container, |object| capability.factory.create_extension(object))
    }

    fn administer(
        &self,
        metadata: &OfficeMetadata,
        function: &FunctionMetadata,
        administration: &AdministrationMetadata,
    ) -> GovernanceOutcome {
        let extensions: Result<Vec<_>, _> = administration
            .objects
            .iter()
            .map(|administered| self.administered_extension(metadata, administered))
            .collect();
        let extensions = match extensions {
            Ok(extensions) => extensions,
            Err(failure) => {
                return GovernanceOutcome {
                    failure: Some(failure),
                    ..GovernanceOutcome::default()
                }
            }
        };

        tracing::debug!(job = %self.id, duty = %administration.name, "administering duty");
        let mut ctx = DutyScope {
            job: self,
            metadata,
            function,
            administration,
            recorder: FlowRecorder::new(administration.flows.len()),
            outcome: GovernanceOutcome::default(),
        };
        let result = contain_panic(|| administration.duty.administer(&extensions, &mut ctx));
        let DutyScope {
            recorder,
            mut outcome,
            ..
        } = ctx;

        if let Err(failure) = result {
            outcome.failure.get_or_insert(failure);
        }
        outcome.flows.extend(instigated(&administration.flows, recorder));
        outcome
    }

    /// Apply what a governance or duty callback left behind. Returns the
    /// failure, if any, after starting released unloads and concurrent flows.
    fn absorb(&mut self, outcome: GovernanceOutcome) -> Option<Escalation> {
        let GovernanceOutcome {
            failure,
            flows,
            unloads,
        } = outcome;
        for unload in unloads {
            unload();
        }
        if failure.is_some() {
            return failure;
        }
        let sequential = instigate(&self.thread, flows, self.team);
        self.flows.extend(sequential);
        None
    }

    /// Let sequential flows instigated before the body run first
    fn yield_to_flows(mut self: Box<Self>) -> Option<Command> {
        let flows = std::mem::take(&mut self.flows)
            .into_iter()
            .map(to_work)
            .collect();
        let thread = Arc::clone(&self.thread);
        let team = self.team;
        tracing::debug!(job = %self.id, "function job yielding to sequential flows");
        thread.continuation().yield_to_flows(self, flows);
        Some(thread.advance(team))
    }

    fn complete(mut self: Box<Self>, function: &FunctionMetadata) -> Option<Command> {
        self.release();
        let flows = std::mem::take(&mut self.flows)
            .into_iter()
            .map(to_work)
            .collect();
        let value = self.value.take();
        let thread = Arc::clone(&self.thread);
        let team = self.team;
        drop(self);

        thread.continuation().complete(function, value, flows);
        Some(thread.advance(team))
    }

    fn escalate(self: Box<Self>, office: &OfficeShared, failure: Escalation) -> Option<Command> {
        let thread = Arc::clone(&self.thread);
        let team = self.team;
        let function = self.function;
        drop(self);

        let (routing, discarded) = thread
            .continuation()
            .escalate(office.metadata(), function, &failure);
        drop(discarded);

        match routing {
            Routing::Handled { handler } => {
                tracing::debug!(function, handler, kind = %failure.kind(), "escalation handled");
                office.metrics().record_escalation(true);
            }
            Routing::Unhandled => {
                tracing::error!(
                    process = %thread.process().id(),
                    function,
                    %failure,
                    "unhandled escalation"
                );
                office.metrics().record_escalation(false);
                thread.process().fatal(failure.clone());
                thread.fail(failure);
            }
        }
        Some(thread.advance(team))
    }

    fn fail_thread(self: Box<Self>, failure: Escalation) -> Option<Command> {
        let thread = Arc::clone(&self.thread);
        let team = self.team;
        drop(self);
        thread.fail(failure);
        Some(thread.advance(team))
    }

    fn abandon(self: Box<Self>, error: &TeamError) {
        let thread = Arc::clone(&self.thread);
        thread.office().metrics().record_rejected();
        drop(self);

        thread.fail(Escalation::illegal_state(error.to_string()));
        let mut completion = ThreadCompletion::new(&thread, None);
        completion.inline = true;
        Command::CompleteThread(completion).run();
    }

    /// Unload function scoped objects; governance may defer the recycle
    fn release(&mut self) {
        if self.objects.is_empty() {
            return;
        }
        let office = Arc::clone(self.thread.office());
        for container in self.objects.iter_mut().filter_map(Option::take) {
            container.unload(office.recycler(container.recycle_team()));
        }
    }
}

impl Drop for FunctionJob {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for FunctionJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FunctionJob")
            .field("id", &self.id)
            .field("function", &self.function)
            .field("stage", &self.stage)
            .field("team", &self.team)
            .finish_non_exhaustive()
    }
}

/// Context of a function body
struct BodyScope<'a> {
    job: &'a FunctionJob,
    function: &'a FunctionMetadata,
    recorder: FlowRecorder,
    mutations: Vec<Arc<ManagedObjectContainer>>,
}

impl BodyScope<'_> {
    fn linked(&self, index: usize) -> Result<ObjectIndex, Escalation> {
        self.function.object_links.get(index).copied().ok_or_else(|| {
            Escalation::illegal_state(format!("No object linked at index {}", index))
        })
    }

    fn managed_object(&self, index: usize) -> Result<Arc<ManagedObjectContainer>, Escalation> {
        let slot = self.linked(index)?;
        self.job.container(slot).ok_or_else(|| {
            Escalation::illegal_state(format!("No managed object linked at index {}", index))
        })
    }
}

impl FlowContext for BodyScope<'_> {
    fn do_flow(&mut self, flow: usize, argument: Option<Object>) -> Result<(), Escalation> {
        self.recorder.do_flow(flow, argument)
    }
}

impl FunctionContext for BodyScope<'_> {
    fn function_name(&self) -> &str {
        &self.function.name
    }

    fn process_id(&self) -> ProcessId {
        self.job.thread.process().id()
    }

    fn object(&self, index: usize) -> Result<Object, Escalation> {
        match self.linked(index)? {
            ObjectIndex::Parameter => self
                .job
                .argument
                .clone()
                .ok_or_else(|| Escalation::illegal_state("No parameter supplied")),
            _ => self.managed_object(index)?.object(),
        }
    }

    fn parameter(&self) -> Option<Object> {
        self.job.argument.clone()
    }

    fn store(&mut self, index: usize) -> Result<(), Escalation> {
        let container = self.managed_object(index)?;
        container.store()?;
        self.mutations.push(container);
        Ok(())
    }

    fn invalidate(&mut self, index: usize) -> Result<(), Escalation> {
        let container = self.managed_object(index)?;
        container.invalidate()?;
        self.mutations.push(container);
        Ok(())
    }
}

/// Context of an administration duty
struct DutyScope<'a> {
    job: &'a FunctionJob,
    metadata: &'a OfficeMetadata,
    function: &'a FunctionMetadata,
    administration: &'a AdministrationMetadata,
    recorder: FlowRecorder,
    outcome: GovernanceOutcome,
}

impl DutyScope<'_> {
    fn governance(&self, index: usize) -> Result<GovernanceIndex, Escalation> {
        self.administration
            .governances
            .get(index)
            .copied()
            .ok_or_else(|| {
                Escalation::illegal_state(format!(
                    "No governance linked at index {} of {}",
                    index, self.administration.name
                ))
            })
    }

    fn keep(&mut self, mut outcome: GovernanceOutcome) -> Result<(), Escalation> {
        let failure = outcome.failure.take();
        self.outcome.merge(outcome);
        failure.map_or(Ok(()), Err)
    }
}

impl FlowContext for DutyScope<'_> {
    fn do_flow(&mut self, flow: usize, argument: Option<Object>) -> Result<(), Escalation> {
        self.recorder.do_flow(flow, argument)
    }
}

impl DutyContext for DutyScope<'_> {
    fn activate_governance(&mut self, governance: usize) -> Result<(), Escalation> {
        let index = self.governance(governance)?;
        let outcome = {
            let mut engine = self.job.thread.governance();
            let metadata = &self.metadata.governances[index];
            engine.activate(metadata)?;
            self.job
                .govern_objects(self.metadata, self.function, index, &mut engine)
        };
        self.keep(outcome)
    }

    fn enforce_governance(&mut self, governance: usize) -> Result<(), Escalation> {
        let index = self.governance(governance)?;
        let outcome = self
            .job
            .thread
            .governance()
            .enforce(&self.metadata.governances[index]);
        self.keep(outcome)
    }

    fn disregard_governance(&mut self, governance: usize) -> Result<(), Escalation> {
        let index = self.governance(governance)?;
        let outcome = self
            .job
            .thread
            .governance()
            .disregard(&self.metadata.governances[index]);
        self.keep(outcome)
    }
}

/// End of a thread: governance still active is enforced (or disregarded when
/// the thread failed) on each governance's team, then thread objects are
/// unloaded and the process is told.
pub struct ThreadCompletion {
    thread: Arc<ThreadState>,
    team: Option<TeamIndex>,
    pending: Option<VecDeque<GovernanceIndex>>,
    inline: bool,
}

impl ThreadCompletion {
    pub(crate) fn new(thread: &Arc<ThreadState>, team: Option<TeamIndex>) -> Box<Self> {
        Box::new(Self {
            thread: Arc::clone(thread),
            team,
            pending: None,
            inline: false,
        })
    }

    fn step(mut self: Box<Self>) -> Option<Command> {
        let office = Arc::clone(self.thread.office());
        let metadata = office.metadata();
        let mut pending = match self.pending.take() {
            Some(pending) => pending,
            None => VecDeque::from(self.thread.governance().active()),
        };

        while let Some(&index) = pending.front() {
            let Some(governance) = metadata.governances.get(index) else {
                pending.pop_front();
                continue;
            };
            if !self.inline && governance.team.is_some() && governance.team != self.team {
                self.team = governance.team;
                self.pending = Some(pending);
                let team = self.team;
                office.dispatch(team, Command::CompleteThread(self));
                return None;
            }
            pending.pop_front();

            let failed = self.thread.continuation().has_failed();
            let outcome = {
                let mut engine = self.thread.governance();
                if failed {
                    engine.disregard(governance)
                } else {
                    engine.enforce(governance)
                }
            };
            self.absorb(&governance.name, outcome);
        }

        if self.thread.continuation().has_work() {
            return Some(self.thread.advance(self.team));
        }
        self.finish(&office);
        None
    }

    fn absorb(&self, governance: &str, outcome: GovernanceOutcome) {
        let GovernanceOutcome {
            failure,
            flows,
            unloads,
        } = outcome;
        for unload in unloads {
            unload();
        }
        if let Some(failure) = failure {
            tracing::warn!(governance, %failure, "governance failed to resolve");
            self.thread.fail(failure);
        }

        let sequential = instigate(&self.thread, flows, self.team)
            .into_iter()
            .map(to_work)
            .collect();
        self.thread.continuation().push_flows(None, sequential);
    }

    fn finish(&self, office: &Arc<OfficeShared>) {
        for container in self.thread.objects() {
            container.unload(office.recycler(container.recycle_team()));
        }
        let outcome = self.thread.continuation().outcome();
        tracing::debug!(thread = %self.thread.id(), outcome = outcome.label(), "thread finished");
        self.thread
            .process()
            .thread_finished(self.thread.is_main(), outcome);
    }
}

impl std::fmt::Debug for ThreadCompletion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadCompletion")
            .field("thread", &self.thread.id())
            .field("team", &self.team)
            .field("inline", &self.inline)
            .finish_non_exhaustive()
    }
}

/// Recycles one unloaded managed object
pub struct RecycleTask {
    bound_name: String,
    object: Arc<dyn ManagedObject>,
}

impl RecycleTask {
    /// Create a recycle task
    #[must_use]
    pub fn new(bound_name: impl Into<String>, object: Arc<dyn ManagedObject>) -> Self {
        Self {
            bound_name: bound_name.into(),
            object,
        }
    }

    /// Bound name of the object
    #[must_use]
    pub fn bound_name(&self) -> &str {
        &self.bound_name
    }

    /// Recycle the object. A panicking recycle is logged and contained.
    pub fn run(self) {
        let object = self.object;
        match contain_panic(|| {
            object.recycle();
            Ok(())
        }) {
            Ok(()) => tracing::debug!(object = %self.bound_name, "managed object recycled"),
            Err(failure) => {
                tracing::warn!(object = %self.bound_name, %failure, "managed object recycle failed")
            }
        }
    }
}

impl std::fmt::Debug for RecycleTask {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecycleTask")
            .field("bound_name", &self.bound_name)
            .finish_non_exhaustive()
    }
}
