//! Registry of behaviour referenced by configuration.
//!
//! Configuration names factories by string; the host registers the actual
//! implementations here before building the office.

use atrium_core::{
    Duty, DutyContext, Escalation, ExtensionFactory, FunctionContext, FunctionResult,
    Governance, GovernanceContext, GovernanceFactory, ManagedFunction, ManagedObjectSource,
    Object, ObjectUser, SelfExtension,
};
use indexmap::IndexMap;
use std::sync::Arc;

/// Implementations keyed by factory name
#[derive(Default)]
pub struct Factories {
    functions: IndexMap<String, Arc<dyn ManagedFunction>>,
    sources: IndexMap<String, Arc<dyn ManagedObjectSource>>,
    extensions: IndexMap<String, Arc<dyn ExtensionFactory>>,
    governances: IndexMap<String, Arc<dyn GovernanceFactory>>,
    duties: IndexMap<String, Arc<dyn Duty>>,
    allow_placeholders: bool,
}

impl Factories {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry resolving every unknown name to an inert placeholder.
    ///
    /// Used to validate a configuration without its implementations.
    #[must_use]
    pub fn placeholders() -> Self {
        Self {
            allow_placeholders: true,
            ..Self::default()
        }
    }

    /// Check whether unknown names resolve to placeholders
    #[must_use]
    pub fn allows_placeholders(&self) -> bool {
        self.allow_placeholders
    }

    /// Register a function
    #[must_use]
    pub fn with_function(mut self, name: &str, function: Arc<dyn ManagedFunction>) -> Self {
        self.functions.insert(name.to_string(), function);
        self
    }

    /// Register a managed object source
    #[must_use]
    pub fn with_source(mut self, name: &str, source: Arc<dyn ManagedObjectSource>) -> Self {
        self.sources.insert(name.to_string(), source);
        self
    }

    /// Register an extension factory
    #[must_use]
    pub fn with_extension(mut self, name: &str, factory: Arc<dyn ExtensionFactory>) -> Self {
        self.extensions.insert(name.to_string(), factory);
        self
    }

    /// Register a governance factory
    #[must_use]
    pub fn with_governance(mut self, name: &str, factory: Arc<dyn GovernanceFactory>) -> Self {
        self.governances.insert(name.to_string(), factory);
        self
    }

    /// Register a duty
    #[must_use]
    pub fn with_duty(mut self, name: &str, duty: Arc<dyn Duty>) -> Self {
        self.duties.insert(name.to_string(), duty);
        self
    }

    /// Look up a function
    #[must_use]
    pub fn function(&self, name: &str) -> Option<Arc<dyn ManagedFunction>> {
        self.functions
            .get(name)
            .cloned()
            .or_else(|| {
                self.placeholder(|| {
                    Arc::new(PlaceholderFunction(name.to_string())) as Arc<dyn ManagedFunction>
                })
            })
    }

    /// Look up a managed object source
    #[must_use]
    pub fn source(&self, name: &str) -> Option<Arc<dyn ManagedObjectSource>> {
        self.sources
            .get(name)
            .cloned()
            .or_else(|| {
                self.placeholder(|| {
                    Arc::new(PlaceholderSource(name.to_string())) as Arc<dyn ManagedObjectSource>
                })
            })
    }

    /// Look up an extension factory
    #[must_use]
    pub fn extension(&self, name: &str) -> Option<Arc<dyn ExtensionFactory>> {
        self.extensions
            .get(name)
            .cloned()
            .or_else(|| {
                self.placeholder(|| {
                    Arc::new(SelfExtension) as Arc<dyn ExtensionFactory>
                })
            })
    }

    /// Look up a governance factory
    #[must_use]
    pub fn governance(&self, name: &str) -> Option<Arc<dyn GovernanceFactory>> {
        self.governances
            .get(name)
            .cloned()
            .or_else(|| {
                self.placeholder(|| {
                    Arc::new(PlaceholderGovernance) as Arc<dyn GovernanceFactory>
                })
            })
    }

    /// Look up a duty
    #[must_use]
    pub fn duty(&self, name: &str) -> Option<Arc<dyn Duty>> {
        self.duties
            .get(name)
            .cloned()
            .or_else(|| {
                self.placeholder(|| {
                    Arc::new(PlaceholderDuty) as Arc<dyn Duty>
                })
            })
    }

    fn placeholder<T: ?Sized>(&self, make: impl FnOnce() -> Arc<T>) -> Option<Arc<T>> {
        self.allow_placeholders.then(make)
    }
}

impl std::fmt::Debug for Factories {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factories")
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .field("governances", &self.governances.keys().collect::<Vec<_>>())
            .field("duties", &self.duties.keys().collect::<Vec<_>>())
            .field("allow_placeholders", &self.allow_placeholders)
            .finish()
    }
}

struct PlaceholderFunction(String);

impl ManagedFunction for PlaceholderFunction {
    fn execute(&self, _ctx: &mut dyn FunctionContext) -> FunctionResult {
        Err(Escalation::illegal_state(format!(
            "function factory {} is a placeholder",
            self.0
        )))
    }
}

struct PlaceholderSource(String);

impl ManagedObjectSource for PlaceholderSource {
    fn source(&self, user: Box<dyn ObjectUser>) {
        user.set_failure(Escalation::illegal_state(format!(
            "managed object source {} is a placeholder",
            self.0
        )));
    }
}

struct PlaceholderGovernance;

impl GovernanceFactory for PlaceholderGovernance {
    fn create_governance(&self) -> Box<dyn Governance> {
        Box::new(PlaceholderGovernance)
    }
}

impl Governance for PlaceholderGovernance {
    fn govern(
        &mut self,
        _extension: Object,
        _ctx: &mut dyn GovernanceContext,
    ) -> Result<(), Escalation> {
        Ok(())
    }

    fn enforce(&mut self, _ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
        Ok(())
    }

    fn disregard(&mut self, _ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
        Ok(())
    }
}

struct PlaceholderDuty;

impl Duty for PlaceholderDuty {
    fn administer(
        &self,
        _extensions: &[Object],
        _ctx: &mut dyn DutyContext,
    ) -> Result<(), Escalation> {
        Ok(())
    }
}
