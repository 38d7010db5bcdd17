//! Built-in transactional office used by `atrium demo`.
//!
//! A single order is placed on a worker pool: the thread scoped connection
//! is governed by a transaction, stock is reserved by a sequential flow and
//! shortages are handled as back orders.

use atrium_core::{
    function_fn, governance_fn, object, Escalation, FunctionContextExt, Governance,
    GovernanceContext, InstigationStrategy, IssueCollector, ManagedObject, ManagedObjectSource,
    Object, ObjectScope, ObjectUser, SelfExtension,
};
use atrium_graph::{
    Factories, FlowConfiguration, FunctionConfiguration, GovernanceConfiguration,
    ManagedObjectConfiguration, OfficeBuilder, OfficeConfiguration, TeamStrategy,
};
use atrium_runtime::{KernelConfig, MetricsSnapshot, Office, ProcessOutcome};
use color_eyre::eyre::{eyre, Result};
use parking_lot::Mutex;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Units the warehouse holds
pub const STOCK: u32 = 10;

/// Events in the order they happened
#[derive(Debug, Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    fn record(&self, event: impl Into<String>) {
        let event = event.into();
        tracing::debug!(%event, "demo event");
        self.0.lock().push(event);
    }

    /// Recorded events
    #[must_use]
    pub fn events(&self) -> Vec<String> {
        self.0.lock().clone()
    }
}

/// What a demo run produced
#[derive(Debug)]
pub struct DemoReport {
    /// Process outcome
    pub outcome: ProcessOutcome,
    /// Event trace
    pub events: Vec<String>,
    /// Office metrics after close
    pub metrics: MetricsSnapshot,
}

struct Connection {
    trace: Trace,
}

impl ManagedObject for Connection {
    fn object(&self) -> Result<Object, Escalation> {
        Ok(object("connection".to_string()))
    }

    fn recycle(&self) {
        self.trace.record("connection closed");
    }
}

struct ConnectionSource {
    trace: Trace,
}

impl ManagedObjectSource for ConnectionSource {
    fn source(&self, user: Box<dyn ObjectUser>) {
        self.trace.record("connection opened");
        user.set_managed_object(Box::new(Connection {
            trace: self.trace.clone(),
        }));
    }
}

struct Transaction {
    trace: Trace,
}

impl Governance for Transaction {
    fn govern(&mut self, extension: Object, _ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
        let name = extension
            .downcast_ref::<String>()
            .cloned()
            .unwrap_or_default();
        self.trace.record(format!("begin transaction on {}", name));
        Ok(())
    }

    fn enforce(&mut self, _ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
        self.trace.record("commit");
        Ok(())
    }

    fn disregard(&mut self, _ctx: &mut dyn GovernanceContext) -> Result<(), Escalation> {
        self.trace.record("rollback");
        Ok(())
    }
}

/// Office configuration of the demo
#[must_use]
pub fn configuration(threads: usize) -> OfficeConfiguration {
    OfficeConfiguration::new("shop")
        .with_type("Order", &[])
        .with_type("Connection", &[])
        .with_type("Transactional", &[])
        .with_type("OutOfStock", &["Failure"])
        .with_type("InvalidOrder", &["Failure"])
        .with_team("orders", TeamStrategy::WorkerPool { threads })
        .with_managed_object(
            ManagedObjectConfiguration::new("connection", "connection", "Connection")
                .with_scope(ObjectScope::Thread)
                .with_extension("Transactional", "self"),
        )
        .with_governance(GovernanceConfiguration::new("transaction", "transaction", "Transactional"))
        .with_function(
            FunctionConfiguration::new("place_order", "place_order")
                .with_team("orders")
                .link_parameter(0, "Order")
                .link_managed_object(1, "connection", "Connection")
                .with_flow(
                    FlowConfiguration::new("reserve_stock", InstigationStrategy::Sequential)
                        .with_argument_type("Order"),
                )
                .link_escalation("OutOfStock", "back_order")
                .govern("transaction")
                .with_next("confirm", None),
        )
        .with_function(FunctionConfiguration::new("reserve_stock", "reserve_stock").link_parameter(0, "Order"))
        .with_function(FunctionConfiguration::new("back_order", "back_order"))
        .with_function(FunctionConfiguration::new("confirm", "confirm"))
}

fn factories(trace: &Trace) -> Factories {
    let place = trace.clone();
    let reserve = trace.clone();
    let back_order = trace.clone();
    let confirm = trace.clone();
    let governance = trace.clone();

    Factories::new()
        .with_source("connection", Arc::new(ConnectionSource { trace: trace.clone() }))
        .with_extension("self", Arc::new(SelfExtension))
        .with_governance(
            "transaction",
            governance_fn(move || {
                Box::new(Transaction {
                    trace: governance.clone(),
                })
            }),
        )
        .with_function(
            "place_order",
            function_fn(move |ctx| {
                let quantity = *ctx.object_as::<u32>(0)?;
                place.record(format!("place order for {}", quantity));
                if quantity == 0 {
                    return Err(Escalation::new("InvalidOrder", "nothing ordered"));
                }
                ctx.do_flow(0, Some(object(quantity)))?;
                Ok(None)
            }),
        )
        .with_function(
            "reserve_stock",
            function_fn(move |ctx| {
                let quantity = *ctx.object_as::<u32>(0)?;
                if quantity > STOCK {
                    reserve.record(format!("{} short", quantity - STOCK));
                    return Err(Escalation::new(
                        "OutOfStock",
                        format!("only {} in stock", STOCK),
                    ));
                }
                reserve.record(format!("reserved {}", quantity));
                Ok(None)
            }),
        )
        .with_function(
            "back_order",
            function_fn(move |ctx| {
                let escalation = ctx.parameter_as::<Escalation>()?;
                back_order.record(format!("back order: {}", escalation.message()));
                Ok(None)
            }),
        )
        .with_function(
            "confirm",
            function_fn(move |_| {
                confirm.record("order confirmed");
                Ok(Some(object("confirmed".to_string())))
            }),
        )
}

/// Place one order and collect what happened
///
/// # Errors
///
/// Returns error if the office does not build or the order never completes
pub fn run(quantity: u32, threads: usize) -> Result<DemoReport> {
    let trace = Trace::default();
    let issues = IssueCollector::new();
    let metadata = OfficeBuilder::new(&configuration(threads), &factories(&trace))
        .build(&issues)
        .ok_or_else(|| eyre!("demo office failed to build: {:?}", issues.issues()))?;
    let office = Office::open(metadata, KernelConfig::default())?;

    let (sender, receiver) = mpsc::channel();
    office.invoke("place_order", Some(object(quantity)), move |outcome| {
        let _ = sender.send(outcome);
    })?;
    let outcome = receiver
        .recv_timeout(Duration::from_secs(10))
        .map_err(|e| eyre!("order did not complete: {}", e))?;

    // workers finish queued recycling before close returns
    office.close();
    Ok(DemoReport {
        outcome,
        events: trace.events(),
        metrics: office.metrics(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_commits() {
        let report = run(3, 2).unwrap();
        assert!(matches!(report.outcome, ProcessOutcome::Completed(_)));
        assert_eq!(
            report.events,
            vec![
                "connection opened",
                "begin transaction on connection",
                "place order for 3",
                "reserved 3",
                "order confirmed",
                "commit",
                "connection closed",
            ]
        );
        assert_eq!(report.metrics.functions_executed, 3);
    }

    #[test]
    fn test_shortage_is_back_ordered() {
        let report = run(12, 1).unwrap();
        assert!(matches!(report.outcome, ProcessOutcome::Recovered { .. }));
        assert!(report.events.contains(&"back order: only 10 in stock".to_string()));
        assert!(report.events.contains(&"commit".to_string()));
        assert_eq!(report.metrics.escalations_handled, 1);
    }

    #[test]
    fn test_invalid_order_rolls_back() {
        let report = run(0, 1).unwrap();
        assert_eq!(report.outcome.failure().unwrap().kind().as_str(), "InvalidOrder");
        assert!(report.events.contains(&"rollback".to_string()));
        assert!(!report.events.contains(&"order confirmed".to_string()));
    }
}
