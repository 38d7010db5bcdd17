//! Office and function metadata builders.
//!
//! The builder resolves every name in an [`OfficeConfiguration`] into
//! indices. It never stops at the first problem: each one is reported once
//! through the [`IssueReporter`], the affected metadata is dropped, and the
//! remaining assets are still built so one pass surfaces every issue.

use crate::config::{
    AdministrationConfiguration, EscalationConfiguration, FlowConfiguration,
    FunctionConfiguration, ManagedObjectConfiguration, ObjectLinkKind, OfficeConfiguration,
    TeamStrategy,
};
use crate::escalation::{EscalationEntry, EscalationProcedure};
use crate::factories::Factories;
use crate::metadata::{
    AdministeredObject, AdministrationMetadata, FlowMetadata, FunctionIndex, FunctionMetadata,
    GovernanceIndex, GovernanceMetadata, ManagedObjectMetadata, TeamIndex, TeamManagement,
};
use crate::office::OfficeMetadata;
use crate::ordering::order_dependencies;
use atrium_core::types::FAILURE;
use atrium_core::{
    AssetKind, Capability, Issue, IssueReporter, ObjectIndex, ObjectScope, TypeHierarchy, TypeName,
};
use indexmap::{IndexMap, IndexSet};
use std::cell::Cell;
use std::time::Duration;
use tracing::{debug, info};

/// Counts what it forwards so builds can tell whether they failed
struct Issues<'a> {
    reporter: &'a dyn IssueReporter,
    count: Cell<usize>,
}

impl<'a> Issues<'a> {
    fn new(reporter: &'a dyn IssueReporter) -> Self {
        Self {
            reporter,
            count: Cell::new(0),
        }
    }

    fn add(&self, kind: AssetKind, name: &str, description: impl Into<String>) {
        self.report(Issue::new(kind, name, description));
    }

    fn report(&self, issue: Issue) {
        self.count.set(self.count.get() + 1);
        self.reporter.report(issue);
    }

    fn count(&self) -> usize {
        self.count.get()
    }
}

/// Identifies the asset issues are reported against
#[derive(Clone, Copy)]
struct Asset<'a> {
    kind: AssetKind,
    name: &'a str,
}

/// Name tables resolved before functions are built
struct Tables {
    types: TypeHierarchy,
    team_names: IndexMap<String, TeamIndex>,
    function_names: IndexMap<String, FunctionIndex>,
    object_slots: IndexMap<String, ObjectIndex>,
    objects: IndexMap<ObjectIndex, ManagedObjectMetadata>,
    governance_names: IndexMap<String, GovernanceIndex>,
    governance_count: usize,
    parameter_types: Vec<Option<TypeName>>,
    manual_governance: bool,
}

impl Tables {
    fn resolve_team(&self, name: Option<&str>, asset: Asset<'_>, issues: &Issues<'_>) -> Option<TeamIndex> {
        let name = name?;
        let team = self.team_names.get(name).copied();
        if team.is_none() {
            issues.add(asset.kind, asset.name, format!("Unknown team {}", name));
        }
        team
    }

    fn require_type(&self, name: &str, role: &str, asset: Asset<'_>, issues: &Issues<'_>) -> Option<TypeName> {
        if self.types.contains(name) {
            Some(TypeName::from(name))
        } else {
            issues.add(asset.kind, asset.name, format!("Unknown {} {}", role, name));
            None
        }
    }

    fn resolve_flow(
        &self,
        flow: &FlowConfiguration,
        what: &str,
        asset: Asset<'_>,
        issues: &Issues<'_>,
    ) -> Option<FlowMetadata> {
        let Some(&function) = self.function_names.get(&flow.function) else {
            issues.add(
                asset.kind,
                asset.name,
                format!("Can not find function meta-data {} for {}", flow.function, what),
            );
            return None;
        };

        let argument_type = match &flow.argument_type {
            Some(argument) => Some(self.require_type(argument, "argument type", asset, issues)?),
            None => None,
        };
        self.check_argument(argument_type.as_ref(), function, asset, issues)?;

        Some(FlowMetadata {
            function,
            strategy: flow.strategy,
            argument_type,
        })
    }

    fn check_argument(
        &self,
        argument_type: Option<&TypeName>,
        function: FunctionIndex,
        asset: Asset<'_>,
        issues: &Issues<'_>,
    ) -> Option<()> {
        let (Some(argument), Some(Some(parameter))) =
            (argument_type, self.parameter_types.get(function))
        else {
            return Some(());
        };
        if self.types.is_assignable(argument.as_str(), parameter.as_str()) {
            return Some(());
        }

        let target = self
            .function_names
            .iter()
            .find(|(_, index)| **index == function)
            .map_or("", |(name, _)| name.as_str());
        issues.add(
            asset.kind,
            asset.name,
            format!(
                "Argument type {} is not assignable to parameter type {} of function {}",
                argument, parameter, target
            ),
        );
        None
    }

    fn build_escalations(
        &self,
        escalations: &[EscalationConfiguration],
        asset: Asset<'_>,
        issues: &Issues<'_>,
    ) -> Option<EscalationProcedure> {
        let before = issues.count();
        let mut entries = Vec::with_capacity(escalations.len());

        for (index, escalation) in escalations.iter().enumerate() {
            let Some(kind) = self.require_type(&escalation.kind, "escalation type", asset, issues)
            else {
                continue;
            };
            if !self.types.is_assignable(kind.as_str(), FAILURE) {
                issues.add(
                    asset.kind,
                    asset.name,
                    format!("Escalation type {} is not a failure type", kind),
                );
                continue;
            }

            let flow = FlowConfiguration {
                function: escalation.handler.clone(),
                strategy: Default::default(),
                argument_type: Some(kind.to_string()),
            };
            let what = format!("escalation index {}", index);
            if let Some(handler) = self.resolve_flow(&flow, &what, asset, issues) {
                entries.push(EscalationEntry {
                    kind,
                    handler: handler.function,
                });
            }
        }

        (issues.count() == before).then(|| EscalationProcedure::from_entries(entries))
    }

    fn dependencies(&self, slot: &ObjectIndex) -> Vec<ObjectIndex> {
        self.objects
            .get(slot)
            .map(|mo| mo.dependencies.clone())
            .unwrap_or_default()
    }

    /// Report every dependency cycle among the managed objects once, against
    /// the object the cycle was found from
    fn report_cycles(&self, issues: &Issues<'_>) {
        let mut cyclic: IndexSet<ObjectIndex> = IndexSet::new();
        for slot in self.objects.keys() {
            if cyclic.contains(slot) {
                continue;
            }
            let Err(found) = order_dependencies(std::slice::from_ref(slot), |slot| self.dependencies(slot)) else {
                continue;
            };
            if found.cycle.iter().any(|member| cyclic.contains(member)) {
                // reached through an object already reported
                continue;
            }
            let names: Vec<String> = found.cycle.iter().map(|member| self.bound_name(*member)).collect();
            issues.add(
                AssetKind::ManagedObject,
                &names[0],
                format!("Can not have cyclic dependencies ({})", names.join(", ")),
            );
            cyclic.extend(found.cycle);
        }
    }

    fn bound_name(&self, index: ObjectIndex) -> String {
        self.object_slots
            .iter()
            .find(|(_, slot)| **slot == index)
            .map_or_else(|| index.to_string(), |(name, _)| name.clone())
    }
}

/// Builds [`OfficeMetadata`] from configuration and factories
pub struct OfficeBuilder<'a> {
    config: &'a OfficeConfiguration,
    factories: &'a Factories,
}

impl<'a> OfficeBuilder<'a> {
    /// Create a builder
    #[must_use]
    pub fn new(config: &'a OfficeConfiguration, factories: &'a Factories) -> Self {
        Self { config, factories }
    }

    /// Build the office.
    ///
    /// Returns `None` if any issue was reported.
    #[must_use]
    pub fn build(&self, reporter: &dyn IssueReporter) -> Option<OfficeMetadata> {
        let issues = Issues::new(reporter);
        let office = Asset {
            kind: AssetKind::Office,
            name: &self.config.name,
        };

        let types = self.build_types(&issues);
        let (teams, team_names) = self.build_teams(&issues);
        let mut tables = Tables {
            types,
            team_names,
            function_names: self.index_names(
                self.config.functions.iter().map(|f| f.name.as_str()),
                AssetKind::Function,
                &issues,
            ),
            object_slots: self.index_objects(&issues),
            objects: IndexMap::new(),
            governance_names: self.index_names(
                self.config.governances.iter().map(|g| g.name.as_str()),
                AssetKind::Governance,
                &issues,
            ),
            governance_count: self.config.governances.len(),
            parameter_types: Vec::new(),
            manual_governance: self.config.manual_governance,
        };
        let default_team = tables.resolve_team(self.config.default_team.as_deref(), office, &issues);

        tables.objects = self
            .config
            .managed_objects
            .iter()
            .filter_map(|mo| self.build_managed_object(mo, &tables, &issues))
            .map(|mo| (mo.index, mo))
            .collect();
        tables.report_cycles(&issues);

        tables.parameter_types = self
            .config
            .functions
            .iter()
            .map(|function| unify_parameter(function, &tables.types, &issues))
            .collect();

        let governances: Vec<_> = self
            .config
            .governances
            .iter()
            .enumerate()
            .filter_map(|(index, governance)| {
                let asset = Asset {
                    kind: AssetKind::Governance,
                    name: &governance.name,
                };
                let before = issues.count();
                let factory = self.factories.governance(&governance.factory);
                if factory.is_none() {
                    issues.add(
                        asset.kind,
                        asset.name,
                        format!("No governance registered for factory {}", governance.factory),
                    );
                }
                let extension_type =
                    tables.require_type(&governance.extension_type, "extension type", asset, &issues);
                let team = tables.resolve_team(governance.team.as_deref(), asset, &issues);
                let flows: Vec<_> = governance
                    .flows
                    .iter()
                    .enumerate()
                    .filter_map(|(i, flow)| {
                        tables.resolve_flow(flow, &format!("flow index {}", i), asset, &issues)
                    })
                    .collect();
                if issues.count() > before {
                    return None;
                }
                Some(GovernanceMetadata {
                    name: governance.name.clone(),
                    index,
                    extension_type: extension_type?,
                    factory: factory?,
                    team,
                    flows,
                })
            })
            .collect();

        let functions: Vec<_> = self
            .config
            .functions
            .iter()
            .enumerate()
            .map(|(index, config)| {
                FunctionMetadataBuilder {
                    config,
                    index,
                    tables: &tables,
                    factories: self.factories,
                }
                .build(&issues)
            })
            .collect();

        let escalations = tables.build_escalations(&self.config.escalations, office, &issues);
        let default_escalation_handler =
            self.config.default_escalation_handler.as_ref().and_then(|handler| {
                let flow = FlowConfiguration::new(handler, Default::default());
                tables
                    .resolve_flow(&flow, "default escalation handler", office, &issues)
                    .map(|flow| flow.function)
            });

        if issues.count() > 0 {
            info!(office = %self.config.name, issues = issues.count(), "Office not built");
            return None;
        }

        let mut process_objects = Vec::new();
        let mut thread_objects = Vec::new();
        let mut function_objects = Vec::new();
        for (_, mo) in tables.objects {
            match mo.scope() {
                ObjectScope::Process => process_objects.push(mo),
                ObjectScope::Thread => thread_objects.push(mo),
                ObjectScope::Function => function_objects.push(mo),
            }
        }

        let metadata = OfficeMetadata {
            name: self.config.name.clone(),
            types: tables.types,
            teams,
            default_team,
            process_objects,
            thread_objects,
            function_objects,
            governances,
            functions: functions.into_iter().collect::<Option<Vec<_>>>()?,
            escalations: escalations?,
            default_escalation_handler,
            manual_governance: self.config.manual_governance,
            function_names: tables.function_names,
        };
        info!(
            office = %metadata.name,
            functions = metadata.functions.len(),
            managed_objects = metadata.all_objects().count(),
            governances = metadata.governances.len(),
            "Office built"
        );
        Some(metadata)
    }

    fn build_types(&self, issues: &Issues<'_>) -> TypeHierarchy {
        let mut types = TypeHierarchy::new();
        for declaration in &self.config.types {
            if let Err(e) = types.declare(declaration.name.as_str(), declaration.supertypes.iter().map(String::as_str)) {
                issues.report(
                    Issue::new(AssetKind::Type, &declaration.name, "Invalid type declaration")
                        .with_cause(e),
                );
            }
        }
        types
    }

    fn build_teams(&self, issues: &Issues<'_>) -> (Vec<TeamManagement>, IndexMap<String, TeamIndex>) {
        let mut teams = Vec::new();
        let mut names = IndexMap::new();
        for team in &self.config.teams {
            if names.contains_key(&team.name) {
                issues.add(AssetKind::Team, &team.name, "Duplicate team name");
                continue;
            }
            if team.strategy == (TeamStrategy::WorkerPool { threads: 0 }) {
                issues.add(AssetKind::Team, &team.name, "Worker pool must have at least one thread");
                continue;
            }
            names.insert(team.name.clone(), teams.len());
            teams.push(TeamManagement {
                name: team.name.clone(),
                strategy: team.strategy,
            });
        }
        (teams, names)
    }

    fn index_names<'n>(
        &self,
        names: impl Iterator<Item = &'n str>,
        kind: AssetKind,
        issues: &Issues<'_>,
    ) -> IndexMap<String, usize> {
        let mut indices = IndexMap::new();
        for (index, name) in names.enumerate() {
            if name.is_empty() {
                issues.add(kind, name, "No name provided");
            } else if indices.contains_key(name) {
                issues.add(kind, name, format!("Duplicate {} name", kind));
            } else {
                indices.insert(name.to_string(), index);
            }
        }
        indices
    }

    fn index_objects(&self, issues: &Issues<'_>) -> IndexMap<String, ObjectIndex> {
        let mut next = [0usize; 3];
        let mut slots = IndexMap::new();
        for mo in &self.config.managed_objects {
            if slots.contains_key(&mo.bound_name) {
                issues.add(AssetKind::ManagedObject, &mo.bound_name, "Duplicate bound name");
                continue;
            }
            let position = &mut next[usize::from(mo.scope.breadth())];
            slots.insert(mo.bound_name.clone(), ObjectIndex::scoped(mo.scope, *position));
            *position += 1;
        }
        slots
    }

    fn build_managed_object(
        &self,
        config: &ManagedObjectConfiguration,
        tables: &Tables,
        issues: &Issues<'_>,
    ) -> Option<ManagedObjectMetadata> {
        let index = *tables.object_slots.get(&config.bound_name)?;
        if index.scope() != Some(config.scope) {
            // duplicate bound name, already reported
            return None;
        }
        let asset = Asset {
            kind: AssetKind::ManagedObject,
            name: &config.bound_name,
        };
        let before = issues.count();

        let source = self.factories.source(&config.source);
        if source.is_none() {
            issues.add(
                asset.kind,
                asset.name,
                format!("No managed object source registered for factory {}", config.source),
            );
        }
        let object_type = tables.require_type(&config.object_type, "object type", asset, issues);

        let mut dependencies = Vec::with_capacity(config.dependencies.len());
        for name in &config.dependencies {
            let Some(&dependency) = tables.object_slots.get(name) else {
                issues.add(asset.kind, asset.name, format!("Can not find dependency {}", name));
                continue;
            };
            let dependency_scope = dependency.scope().unwrap_or(ObjectScope::Function);
            if !config.scope.may_depend_on(dependency_scope) {
                issues.add(
                    asset.kind,
                    asset.name,
                    format!(
                        "Managed object of scope {} can not depend on {} of narrower scope {}",
                        config.scope, name, dependency_scope
                    ),
                );
                continue;
            }
            dependencies.push(dependency);
        }

        let mut capabilities = Vec::with_capacity(config.extensions.len());
        for extension in &config.extensions {
            let extension_type =
                tables.require_type(&extension.extension_type, "extension type", asset, issues);
            let factory = self.factories.extension(&extension.factory);
            if factory.is_none() {
                issues.add(
                    asset.kind,
                    asset.name,
                    format!("No extension factory registered for factory {}", extension.factory),
                );
            }
            if let (Some(extension_type), Some(factory)) = (extension_type, factory) {
                capabilities.push(Capability {
                    extension_type,
                    factory,
                });
            }
        }

        let recycle_team = match &config.team {
            Some(team) => tables.resolve_team(Some(team.as_str()), asset, issues),
            None => tables
                .team_names
                .get(&format!("{}.recycle", config.bound_name))
                .copied(),
        };

        if issues.count() > before {
            return None;
        }
        debug!(managed_object = %config.bound_name, slot = %index, "Built managed object metadata");
        Some(ManagedObjectMetadata {
            bound_name: config.bound_name.clone(),
            index,
            source: source?,
            object_type: object_type?,
            dependencies,
            capabilities,
            async_timeout: config.async_timeout_ms.map(Duration::from_millis),
            recycle_team,
        })
    }
}

/// Most specific type assignable to every parameter link, reporting
/// incompatible candidates
fn unify_parameter(
    config: &FunctionConfiguration,
    types: &TypeHierarchy,
    issues: &Issues<'_>,
) -> Option<TypeName> {
    let mut unified: Option<TypeName> = None;
    for link in &config.objects {
        let ObjectLinkKind::Parameter { parameter_type } = &link.link else {
            continue;
        };
        if !types.contains(parameter_type) {
            issues.add(
                AssetKind::Function,
                &config.name,
                format!("Unknown parameter type {} for object index {}", parameter_type, link.index),
            );
            return None;
        }

        let candidate = TypeName::from(parameter_type.as_str());
        unified = match unified {
            None => Some(candidate),
            Some(current) => match types.most_specific(&current, &candidate) {
                Some(specific) => Some(specific),
                None => {
                    issues.add(
                        AssetKind::Function,
                        &config.name,
                        format!("Incompatible parameter types ({}, {})", current, candidate),
                    );
                    return None;
                }
            },
        };
    }
    unified
}

/// Builds the metadata of a single function against resolved office tables
struct FunctionMetadataBuilder<'a> {
    config: &'a FunctionConfiguration,
    index: FunctionIndex,
    tables: &'a Tables,
    factories: &'a Factories,
}

impl FunctionMetadataBuilder<'_> {
    fn asset(&self) -> Asset<'_> {
        Asset {
            kind: AssetKind::Function,
            name: &self.config.name,
        }
    }

    fn build(&self, issues: &Issues<'_>) -> Option<FunctionMetadata> {
        let asset = self.asset();
        let before = issues.count();
        let tables = self.tables;

        let function = self.factories.function(&self.config.factory);
        if function.is_none() {
            issues.add(
                asset.kind,
                asset.name,
                format!("No function registered for factory {}", self.config.factory),
            );
        }
        let team = tables.resolve_team(self.config.team.as_deref(), asset, issues);

        let (object_links, mut roots) = self.link_objects(issues);

        let pre_administration = self.build_administrations(&self.config.pre_administration, &mut roots, issues);
        let post_administration = self.build_administrations(&self.config.post_administration, &mut roots, issues);

        // a cycle was reported with the managed objects; no order exists
        let required_objects = order_dependencies(&roots, |slot| tables.dependencies(slot)).ok();

        let flows: Vec<_> = self
            .config
            .flows
            .iter()
            .enumerate()
            .filter_map(|(i, flow)| {
                tables.resolve_flow(flow, &format!("flow index {}", i), asset, issues)
            })
            .collect();

        let escalations = tables.build_escalations(&self.config.escalations, asset, issues);

        let return_type = match &self.config.return_type {
            Some(name) => tables.require_type(name, "return type", asset, issues),
            None => None,
        };

        let next = self.config.next.as_ref().and_then(|next| {
            let flow = FlowConfiguration {
                function: next.function.clone(),
                strategy: Default::default(),
                argument_type: next
                    .argument_type
                    .clone()
                    .or_else(|| self.config.return_type.clone()),
            };
            tables.resolve_flow(&flow, "next function", asset, issues)
        });

        let governance = self.build_governance(issues);

        let required_objects = required_objects?;
        let linked_objects_built = required_objects
            .iter()
            .all(|slot| tables.objects.contains_key(slot));
        if issues.count() > before || !linked_objects_built {
            return None;
        }

        debug!(
            function = %self.config.name,
            objects = required_objects.len(),
            flows = flows.len(),
            "Built function metadata"
        );
        Some(FunctionMetadata {
            name: self.config.name.clone(),
            index: self.index,
            function: function?,
            team,
            object_links,
            required_objects,
            parameter_type: tables.parameter_types.get(self.index).cloned().flatten(),
            flows,
            escalations: escalations?,
            governance,
            pre_administration: pre_administration?,
            post_administration: post_administration?,
            next,
            return_type,
        })
    }

    /// Resolve object links by index; returns the slot per link index and the
    /// managed objects directly required
    fn link_objects(&self, issues: &Issues<'_>) -> (Vec<ObjectIndex>, Vec<ObjectIndex>) {
        let asset = self.asset();
        let tables = self.tables;
        let links = &self.config.objects;

        let count = links.iter().map(|link| link.index + 1).max().unwrap_or(0);
        let mut object_links = Vec::with_capacity(count);
        let mut roots = Vec::new();

        for index in 0..count {
            let mut matching = links.iter().filter(|link| link.index == index);
            let Some(link) = matching.next() else {
                issues.add(asset.kind, asset.name, format!("No object linked for object index {}", index));
                continue;
            };
            if matching.next().is_some() {
                issues.add(
                    asset.kind,
                    asset.name,
                    format!("Object index {} is linked more than once", index),
                );
                continue;
            }

            match &link.link {
                ObjectLinkKind::Parameter { .. } => object_links.push(ObjectIndex::Parameter),
                ObjectLinkKind::ManagedObject { name, required_type } => {
                    let Some(name) = name else {
                        issues.add(
                            asset.kind,
                            asset.name,
                            format!("No name for managed object at object index {}", index),
                        );
                        continue;
                    };
                    let Some(required_type) = required_type else {
                        issues.add(
                            asset.kind,
                            asset.name,
                            format!("No type for managed object at object index {}", index),
                        );
                        continue;
                    };
                    let Some(&slot) = tables.object_slots.get(name) else {
                        issues.add(
                            asset.kind,
                            asset.name,
                            format!("Can not find managed object '{}' for object index {}", name, index),
                        );
                        continue;
                    };
                    if let Some(mo) = tables.objects.get(&slot) {
                        if !tables.types.is_assignable(mo.object_type.as_str(), required_type) {
                            issues.add(
                                asset.kind,
                                asset.name,
                                format!(
                                    "Managed object {} is incompatible (type {} is not assignable to required type {})",
                                    name, mo.object_type, required_type
                                ),
                            );
                            continue;
                        }
                    }
                    object_links.push(slot);
                    if !roots.contains(&slot) {
                        roots.push(slot);
                    }
                }
            }
        }

        (object_links, roots)
    }

    fn build_administrations(
        &self,
        administrations: &[AdministrationConfiguration],
        roots: &mut Vec<ObjectIndex>,
        issues: &Issues<'_>,
    ) -> Option<Vec<AdministrationMetadata>> {
        let before = issues.count();
        let built: Vec<_> = administrations
            .iter()
            .filter_map(|administration| self.build_administration(administration, roots, issues))
            .collect();
        (issues.count() == before).then_some(built)
    }

    fn build_administration(
        &self,
        config: &AdministrationConfiguration,
        roots: &mut Vec<ObjectIndex>,
        issues: &Issues<'_>,
    ) -> Option<AdministrationMetadata> {
        let tables = self.tables;
        let qualified = format!("{}.{}", self.config.name, config.name);
        let asset = Asset {
            kind: AssetKind::Administration,
            name: &qualified,
        };
        let before = issues.count();

        let duty = self.factories.duty(&config.duty);
        if duty.is_none() {
            issues.add(
                asset.kind,
                asset.name,
                format!("No duty registered for factory {}", config.duty),
            );
        }
        let team = tables.resolve_team(config.team.as_deref(), asset, issues);
        let extension_type = tables.require_type(&config.extension_type, "extension type", asset, issues);

        let mut objects = Vec::with_capacity(config.objects.len());
        for name in &config.objects {
            let Some(&slot) = tables.object_slots.get(name) else {
                issues.add(
                    asset.kind,
                    asset.name,
                    format!("Can not find managed object '{}' to administer", name),
                );
                continue;
            };
            let (Some(mo), Some(extension_type)) = (tables.objects.get(&slot), &extension_type) else {
                continue;
            };
            let capability = mo.capabilities.iter().position(|capability| {
                tables
                    .types
                    .is_assignable(capability.extension_type.as_str(), extension_type.as_str())
            });
            match capability {
                Some(capability) => {
                    objects.push(AdministeredObject {
                        index: slot,
                        capability,
                    });
                    if !roots.contains(&slot) {
                        roots.push(slot);
                    }
                }
                None => issues.add(
                    asset.kind,
                    asset.name,
                    format!("Managed object {} does not provide extension type {}", name, extension_type),
                ),
            }
        }

        let governances: Vec<_> = config
            .governances
            .iter()
            .filter_map(|name| {
                let index = tables.governance_names.get(name).copied();
                if index.is_none() {
                    issues.add(asset.kind, asset.name, format!("Unknown governance {}", name));
                }
                index
            })
            .collect();

        let flows: Vec<_> = config
            .flows
            .iter()
            .enumerate()
            .filter_map(|(i, flow)| tables.resolve_flow(flow, &format!("flow index {}", i), asset, issues))
            .collect();

        if issues.count() > before {
            return None;
        }
        Some(AdministrationMetadata {
            name: config.name.clone(),
            duty: duty?,
            team,
            extension_type: extension_type?,
            objects,
            governances,
            flows,
        })
    }

    fn build_governance(&self, issues: &Issues<'_>) -> Option<Vec<bool>> {
        let asset = self.asset();
        let tables = self.tables;

        if tables.manual_governance {
            if !self.config.governances.is_empty() {
                issues.add(
                    asset.kind,
                    asset.name,
                    "Manually managed governance but governance configured for function",
                );
            }
            return None;
        }

        let mut active = vec![false; tables.governance_count];
        for name in &self.config.governances {
            match tables.governance_names.get(name) {
                Some(&index) => active[index] = true,
                None => issues.add(asset.kind, asset.name, format!("Unknown governance {}", name)),
            }
        }
        Some(active)
    }
}
