//! ATRIUM CLI
//!
//! Validates office configurations and runs the built-in demo office.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod demo;

use atrium_core::{Issue, IssueCollector};
use atrium_graph::{Factories, OfficeBuilder, OfficeConfiguration};
use atrium_runtime::{KernelConfig, ProcessOutcome};
use clap::{Parser, Subcommand};
use color_eyre::eyre::{bail, Result};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "atrium")]
#[command(about = "ATRIUM - managed-function execution kernel", long_about = None)]
struct Cli {
    /// Log filter, overridden by RUST_LOG
    #[arg(long, global = true, default_value = "atrium=warn")]
    log: String,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build an office configuration and report every issue
    Check {
        /// Office configuration (JSON)
        #[arg(short, long)]
        config: PathBuf,
        /// Kernel configuration (JSON)
        #[arg(short, long)]
        kernel: Option<PathBuf>,
    },
    /// Place an order on the built-in transactional office
    Demo {
        /// Units ordered; more than the stock is back ordered, zero fails
        #[arg(short, long, default_value_t = 3)]
        quantity: u32,
        /// Worker threads of the order team
        #[arg(short, long, default_value_t = 2)]
        threads: usize,
    },
}

/// Build with placeholder behaviour and collect the issues
fn check(config: &Path, kernel: Option<&Path>) -> Result<Vec<Issue>> {
    let office = OfficeConfiguration::from_file(config)?;
    if let Some(kernel) = kernel {
        let kernel = KernelConfig::from_file(kernel)?;
        tracing::debug!(?kernel, "kernel configuration loaded");
    }

    let issues = IssueCollector::new();
    let metadata = OfficeBuilder::new(&office, &Factories::placeholders()).build(&issues);
    if let Some(metadata) = metadata {
        tracing::info!(
            office = %metadata.name,
            functions = metadata.functions.len(),
            "office built"
        );
    }
    Ok(issues.issues())
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log)))
        .init();

    match cli.command {
        Commands::Check { config, kernel } => {
            let issues = check(&config, kernel.as_deref())?;
            if issues.is_empty() {
                println!("{}: ok", config.display());
                return Ok(());
            }
            for issue in &issues {
                println!("{}", issue);
            }
            bail!("{} issue(s) in {}", issues.len(), config.display())
        }
        Commands::Demo { quantity, threads } => {
            let report = demo::run(quantity, threads)?;
            for (step, event) in report.events.iter().enumerate() {
                println!("{:>3}  {}", step + 1, event);
            }
            match &report.outcome {
                ProcessOutcome::Completed(_) => println!("outcome: completed"),
                ProcessOutcome::Recovered { handled, .. } => println!("outcome: recovered from {}", handled),
                ProcessOutcome::Failed(failure) => println!("outcome: failed with {}", failure),
            }
            println!("{}", serde_json::to_string_pretty(&report.metrics)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_check_shipped_office() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../demos/office.json");
        let issues = check(&path, None).unwrap();
        assert!(issues.is_empty(), "{:?}", issues);
    }

    #[test]
    fn test_check_demo_configuration() {
        let json = serde_json::to_string(&demo::configuration(2)).unwrap();
        let file = write_config(&json);
        assert!(check(file.path(), None).unwrap().is_empty());
    }

    #[test]
    fn test_check_reports_issues() {
        let file = write_config(
            r#"{
                "name": "broken",
                "functions": [
                    { "name": "start", "factory": "start", "next": { "function": "missing" } }
                ]
            }"#,
        );
        let issues = check(file.path(), None).unwrap();
        assert!(issues.iter().any(|issue| issue.to_string().contains("missing")));
    }

    #[test]
    fn test_check_rejects_bad_kernel_config() {
        let office = write_config(r#"{ "name": "empty" }"#);
        let kernel = write_config("{ not json");
        assert!(check(office.path(), Some(kernel.path())).is_err());
    }
}
