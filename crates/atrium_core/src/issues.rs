//! Construction-time issue channel.
//!
//! Building an office never aborts on the first bad configuration. Each
//! problem is reported once through an [`IssueReporter`] and the affected
//! metadata build yields nothing, so the host sees every issue in one pass.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Kind of configured asset an issue refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetKind {
    /// The office as a whole
    Office,
    /// A declared type
    Type,
    /// A team
    Team,
    /// A bound managed object
    ManagedObject,
    /// A governance
    Governance,
    /// A function
    Function,
    /// An administration duty
    Administration,
    /// An escalation entry
    Escalation,
}

impl std::fmt::Display for AssetKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Office => "Office",
            Self::Type => "Type",
            Self::Team => "Team",
            Self::ManagedObject => "ManagedObject",
            Self::Governance => "Governance",
            Self::Function => "Function",
            Self::Administration => "Administration",
            Self::Escalation => "Escalation",
        };
        f.write_str(name)
    }
}

/// A single configuration problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    /// Kind of asset
    pub asset_kind: AssetKind,
    /// Name of the asset
    pub asset_name: String,
    /// Description of the problem
    pub description: String,
    /// Optional underlying cause
    pub cause: Option<String>,
}

impl Issue {
    /// Create a new issue
    #[must_use]
    pub fn new(
        asset_kind: AssetKind,
        asset_name: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            asset_kind,
            asset_name: asset_name.into(),
            description: description.into(),
            cause: None,
        }
    }

    /// Attach a cause
    #[must_use]
    pub fn with_cause(mut self, cause: impl std::fmt::Display) -> Self {
        self.cause = Some(cause.to_string());
        self
    }
}

impl std::fmt::Display for Issue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}: {}", self.asset_kind, self.asset_name, self.description)?;
        if let Some(cause) = &self.cause {
            write!(f, " (cause: {})", cause)?;
        }
        Ok(())
    }
}

/// Receives construction-time issues
pub trait IssueReporter: Send + Sync {
    /// Report an issue
    fn report(&self, issue: Issue);

    /// Convenience for reporting without building an [`Issue`] first
    fn add_issue(&self, asset_kind: AssetKind, asset_name: &str, description: String) {
        self.report(Issue::new(asset_kind, asset_name, description));
    }
}

/// Collects issues in reporting order
#[derive(Debug, Default)]
pub struct IssueCollector {
    issues: Mutex<Vec<Issue>>,
}

impl IssueCollector {
    /// Create an empty collector
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the issues reported so far
    #[must_use]
    pub fn issues(&self) -> Vec<Issue> {
        self.issues.lock().clone()
    }

    /// Check whether anything was reported
    #[must_use]
    pub fn has_issues(&self) -> bool {
        !self.issues.lock().is_empty()
    }

    /// Number of issues
    #[must_use]
    pub fn len(&self) -> usize {
        self.issues.lock().len()
    }

    /// Check if empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.issues.lock().is_empty()
    }

    /// Whether any issue description contains the given text
    #[must_use]
    pub fn contains(&self, text: &str) -> bool {
        self.issues.lock().iter().any(|issue| issue.description.contains(text))
    }
}

impl IssueReporter for IssueCollector {
    fn report(&self, issue: Issue) {
        tracing::warn!(
            asset_kind = %issue.asset_kind,
            asset = %issue.asset_name,
            "{}",
            issue.description
        );
        self.issues.lock().push(issue);
    }
}
