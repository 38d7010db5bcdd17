//! Declarative office configuration.
//!
//! These records are what a compiler front end (or a JSON file) hands to the
//! builder. They name everything by string; resolution into indices happens
//! in [`crate::builder`].

use atrium_core::{InstigationStrategy, ObjectScope};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Error loading a configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Configuration file could not be read
    #[error("Failed to read {path}: {message}")]
    Io {
        /// File path
        path: String,
        /// Error message
        message: String,
    },
    /// Configuration is not valid JSON for the expected shape
    #[error("Invalid configuration: {0}")]
    Parse(String),
}

/// Whole office configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OfficeConfiguration {
    /// Office name
    pub name: String,
    /// Governance is only activated by administration duties
    pub manual_governance: bool,
    /// Declared types, supertypes first
    pub types: Vec<TypeDeclaration>,
    /// Teams
    pub teams: Vec<TeamConfiguration>,
    /// Team for functions without a responsible team
    pub default_team: Option<String>,
    /// Bound managed objects
    pub managed_objects: Vec<ManagedObjectConfiguration>,
    /// Governances
    pub governances: Vec<GovernanceConfiguration>,
    /// Functions
    pub functions: Vec<FunctionConfiguration>,
    /// Office-wide escalation handlers
    pub escalations: Vec<EscalationConfiguration>,
    /// Handler of last resort
    pub default_escalation_handler: Option<String>,
}

impl OfficeConfiguration {
    /// Create an empty configuration
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parse from JSON
    ///
    /// # Errors
    ///
    /// Returns error if the JSON does not describe an office
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load from a JSON file
    ///
    /// # Errors
    ///
    /// Returns error if the file can not be read or parsed
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_json(&json)
    }

    /// Serialize to pretty JSON
    ///
    /// # Errors
    ///
    /// Returns error if serialization fails
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Declare a type
    #[must_use]
    pub fn with_type(mut self, name: &str, supertypes: &[&str]) -> Self {
        self.types.push(TypeDeclaration {
            name: name.to_string(),
            supertypes: supertypes.iter().map(|s| (*s).to_string()).collect(),
        });
        self
    }

    /// Add a team
    #[must_use]
    pub fn with_team(mut self, name: &str, strategy: TeamStrategy) -> Self {
        self.teams.push(TeamConfiguration {
            name: name.to_string(),
            strategy,
        });
        self
    }

    /// Set the default team
    #[must_use]
    pub fn with_default_team(mut self, name: &str) -> Self {
        self.default_team = Some(name.to_string());
        self
    }

    /// Bind a managed object
    #[must_use]
    pub fn with_managed_object(mut self, managed_object: ManagedObjectConfiguration) -> Self {
        self.managed_objects.push(managed_object);
        self
    }

    /// Add a governance
    #[must_use]
    pub fn with_governance(mut self, governance: GovernanceConfiguration) -> Self {
        self.governances.push(governance);
        self
    }

    /// Add a function
    #[must_use]
    pub fn with_function(mut self, function: FunctionConfiguration) -> Self {
        self.functions.push(function);
        self
    }

    /// Add an office-wide escalation handler
    #[must_use]
    pub fn with_escalation(mut self, kind: &str, handler: &str) -> Self {
        self.escalations.push(EscalationConfiguration::new(kind, handler));
        self
    }

    /// Set the handler of last resort
    #[must_use]
    pub fn with_default_escalation_handler(mut self, handler: &str) -> Self {
        self.default_escalation_handler = Some(handler.to_string());
        self
    }

    /// Only activate governance from administration duties
    #[must_use]
    pub fn with_manual_governance(mut self) -> Self {
        self.manual_governance = true;
        self
    }
}

/// A declared type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeDeclaration {
    /// Type name
    pub name: String,
    /// Direct supertypes
    #[serde(default)]
    pub supertypes: Vec<String>,
}

/// Team configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamConfiguration {
    /// Team name
    pub name: String,
    /// Execution strategy
    #[serde(default)]
    pub strategy: TeamStrategy,
}

/// How a team executes its jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TeamStrategy {
    /// On the submitting thread
    #[default]
    Passive,
    /// On a leader/follower pool of worker threads
    WorkerPool {
        /// Number of worker threads
        threads: usize,
    },
}

/// Bound managed object configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagedObjectConfiguration {
    /// Name functions link by
    pub bound_name: String,
    /// Source factory name
    pub source: String,
    /// Type of the object
    pub object_type: String,
    /// Lifetime of each instance
    #[serde(default = "default_scope")]
    pub scope: ObjectScope,
    /// Bound names of the objects this one depends on, in order
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Declared extension capabilities
    #[serde(default)]
    pub extensions: Vec<ExtensionConfiguration>,
    /// Maximum time an asynchronous operation may take
    #[serde(default)]
    pub async_timeout_ms: Option<u64>,
    /// Team recycling the object
    #[serde(default)]
    pub team: Option<String>,
}

fn default_scope() -> ObjectScope {
    ObjectScope::Process
}

impl ManagedObjectConfiguration {
    /// Create a process scoped managed object
    #[must_use]
    pub fn new(bound_name: &str, source: &str, object_type: &str) -> Self {
        Self {
            bound_name: bound_name.to_string(),
            source: source.to_string(),
            object_type: object_type.to_string(),
            scope: default_scope(),
            dependencies: Vec::new(),
            extensions: Vec::new(),
            async_timeout_ms: None,
            team: None,
        }
    }

    /// Set the scope
    #[must_use]
    pub fn with_scope(mut self, scope: ObjectScope) -> Self {
        self.scope = scope;
        self
    }

    /// Depend on another bound object
    #[must_use]
    pub fn with_dependency(mut self, bound_name: &str) -> Self {
        self.dependencies.push(bound_name.to_string());
        self
    }

    /// Declare an extension capability
    #[must_use]
    pub fn with_extension(mut self, extension_type: &str, factory: &str) -> Self {
        self.extensions.push(ExtensionConfiguration {
            extension_type: extension_type.to_string(),
            factory: factory.to_string(),
        });
        self
    }

    /// Bound asynchronous operations
    #[must_use]
    pub fn with_async_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.async_timeout_ms = Some(timeout_ms);
        self
    }

    /// Recycle on a specific team
    #[must_use]
    pub fn with_team(mut self, team: &str) -> Self {
        self.team = Some(team.to_string());
        self
    }
}

/// Extension capability configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtensionConfiguration {
    /// Type of the extension view
    pub extension_type: String,
    /// Extension factory name
    pub factory: String,
}

/// Governance configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GovernanceConfiguration {
    /// Governance name
    pub name: String,
    /// Governance factory name
    pub factory: String,
    /// Extension type the governance acts on
    pub extension_type: String,
    /// Team running the governance callbacks
    #[serde(default)]
    pub team: Option<String>,
    /// Flows the callbacks may instigate
    #[serde(default)]
    pub flows: Vec<FlowConfiguration>,
}

impl GovernanceConfiguration {
    /// Create a governance configuration
    #[must_use]
    pub fn new(name: &str, factory: &str, extension_type: &str) -> Self {
        Self {
            name: name.to_string(),
            factory: factory.to_string(),
            extension_type: extension_type.to_string(),
            team: None,
            flows: Vec::new(),
        }
    }

    /// Run callbacks on a team
    #[must_use]
    pub fn with_team(mut self, team: &str) -> Self {
        self.team = Some(team.to_string());
        self
    }

    /// Link a flow
    #[must_use]
    pub fn with_flow(mut self, flow: FlowConfiguration) -> Self {
        self.flows.push(flow);
        self
    }
}

/// Link from a callback to a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowConfiguration {
    /// Target function name
    pub function: String,
    /// Instigation strategy
    #[serde(default)]
    pub strategy: InstigationStrategy,
    /// Type of the argument passed
    #[serde(default)]
    pub argument_type: Option<String>,
}

impl FlowConfiguration {
    /// Create a flow link
    #[must_use]
    pub fn new(function: &str, strategy: InstigationStrategy) -> Self {
        Self {
            function: function.to_string(),
            strategy,
            argument_type: None,
        }
    }

    /// Declare the argument type
    #[must_use]
    pub fn with_argument_type(mut self, argument_type: &str) -> Self {
        self.argument_type = Some(argument_type.to_string());
        self
    }
}

/// Escalation type handled by a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationConfiguration {
    /// Escalation type
    pub kind: String,
    /// Handler function name
    pub handler: String,
}

impl EscalationConfiguration {
    /// Create an escalation link
    #[must_use]
    pub fn new(kind: &str, handler: &str) -> Self {
        Self {
            kind: kind.to_string(),
            handler: handler.to_string(),
        }
    }
}

/// Object link of a function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectLink {
    /// Position the function reads the object from
    pub index: usize,
    /// What is linked
    pub link: ObjectLinkKind,
}

/// What an object link refers to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ObjectLinkKind {
    /// The function's argument
    Parameter {
        /// Type expected of the argument
        parameter_type: String,
    },
    /// A bound managed object
    ManagedObject {
        /// Bound name
        #[serde(default)]
        name: Option<String>,
        /// Type expected of the object
        #[serde(default)]
        required_type: Option<String>,
    },
}

/// Pre or post administration entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdministrationConfiguration {
    /// Administration name
    pub name: String,
    /// Duty factory name
    pub duty: String,
    /// Team running the duty
    #[serde(default)]
    pub team: Option<String>,
    /// Extension type administered
    pub extension_type: String,
    /// Bound names of administered objects
    #[serde(default)]
    pub objects: Vec<String>,
    /// Governances the duty may activate, enforce or disregard
    #[serde(default)]
    pub governances: Vec<String>,
    /// Flows the duty may instigate
    #[serde(default)]
    pub flows: Vec<FlowConfiguration>,
}

impl AdministrationConfiguration {
    /// Create an administration entry
    #[must_use]
    pub fn new(name: &str, duty: &str, extension_type: &str) -> Self {
        Self {
            name: name.to_string(),
            duty: duty.to_string(),
            team: None,
            extension_type: extension_type.to_string(),
            objects: Vec::new(),
            governances: Vec::new(),
            flows: Vec::new(),
        }
    }

    /// Administer a bound object
    #[must_use]
    pub fn with_object(mut self, bound_name: &str) -> Self {
        self.objects.push(bound_name.to_string());
        self
    }

    /// Link a governance
    #[must_use]
    pub fn with_governance(mut self, name: &str) -> Self {
        self.governances.push(name.to_string());
        self
    }

    /// Run on a team
    #[must_use]
    pub fn with_team(mut self, team: &str) -> Self {
        self.team = Some(team.to_string());
        self
    }

    /// Link a flow
    #[must_use]
    pub fn with_flow(mut self, flow: FlowConfiguration) -> Self {
        self.flows.push(flow);
        self
    }
}

/// Function continuing the thread once a function completes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NextConfiguration {
    /// Next function name
    pub function: String,
    /// Type of the value passed on
    #[serde(default)]
    pub argument_type: Option<String>,
}

/// Function configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionConfiguration {
    /// Function name
    pub name: String,
    /// Function factory name
    pub factory: String,
    /// Responsible team
    #[serde(default)]
    pub team: Option<String>,
    /// Object links
    #[serde(default)]
    pub objects: Vec<ObjectLink>,
    /// Flow links, by flow index
    #[serde(default)]
    pub flows: Vec<FlowConfiguration>,
    /// Escalation links, in handling priority order
    #[serde(default)]
    pub escalations: Vec<EscalationConfiguration>,
    /// Governances activated for the function
    #[serde(default)]
    pub governances: Vec<String>,
    /// Duties before the body
    #[serde(default)]
    pub pre_administration: Vec<AdministrationConfiguration>,
    /// Duties after the body
    #[serde(default)]
    pub post_administration: Vec<AdministrationConfiguration>,
    /// Next function
    #[serde(default)]
    pub next: Option<NextConfiguration>,
    /// Type of the returned value
    #[serde(default)]
    pub return_type: Option<String>,
}

impl FunctionConfiguration {
    /// Create a function configuration
    #[must_use]
    pub fn new(name: &str, factory: &str) -> Self {
        Self {
            name: name.to_string(),
            factory: factory.to_string(),
            team: None,
            objects: Vec::new(),
            flows: Vec::new(),
            escalations: Vec::new(),
            governances: Vec::new(),
            pre_administration: Vec::new(),
            post_administration: Vec::new(),
            next: None,
            return_type: None,
        }
    }

    /// Link the parameter at an object index
    #[must_use]
    pub fn link_parameter(mut self, index: usize, parameter_type: &str) -> Self {
        self.objects.push(ObjectLink {
            index,
            link: ObjectLinkKind::Parameter {
                parameter_type: parameter_type.to_string(),
            },
        });
        self
    }

    /// Link a bound managed object at an object index
    #[must_use]
    pub fn link_managed_object(mut self, index: usize, name: &str, required_type: &str) -> Self {
        self.objects.push(ObjectLink {
            index,
            link: ObjectLinkKind::ManagedObject {
                name: Some(name.to_string()),
                required_type: Some(required_type.to_string()),
            },
        });
        self
    }

    /// Add a raw object link
    #[must_use]
    pub fn link_object(mut self, link: ObjectLink) -> Self {
        self.objects.push(link);
        self
    }

    /// Link the next flow index
    #[must_use]
    pub fn link_flow(mut self, function: &str, strategy: InstigationStrategy) -> Self {
        self.flows.push(FlowConfiguration::new(function, strategy));
        self
    }

    /// Add a flow link
    #[must_use]
    pub fn with_flow(mut self, flow: FlowConfiguration) -> Self {
        self.flows.push(flow);
        self
    }

    /// Handle an escalation type
    #[must_use]
    pub fn link_escalation(mut self, kind: &str, handler: &str) -> Self {
        self.escalations.push(EscalationConfiguration::new(kind, handler));
        self
    }

    /// Activate a governance for the function
    #[must_use]
    pub fn govern(mut self, governance: &str) -> Self {
        self.governances.push(governance.to_string());
        self
    }

    /// Run on a team
    #[must_use]
    pub fn with_team(mut self, team: &str) -> Self {
        self.team = Some(team.to_string());
        self
    }

    /// Add a pre administration
    #[must_use]
    pub fn with_pre_administration(mut self, administration: AdministrationConfiguration) -> Self {
        self.pre_administration.push(administration);
        self
    }

    /// Add a post administration
    #[must_use]
    pub fn with_post_administration(mut self, administration: AdministrationConfiguration) -> Self {
        self.post_administration.push(administration);
        self
    }

    /// Continue with another function
    #[must_use]
    pub fn with_next(mut self, function: &str, argument_type: Option<&str>) -> Self {
        self.next = Some(NextConfiguration {
            function: function.to_string(),
            argument_type: argument_type.map(str::to_string),
        });
        self
    }

    /// Declare the return type
    #[must_use]
    pub fn with_return_type(mut self, return_type: &str) -> Self {
        self.return_type = Some(return_type.to_string());
        self
    }
}
