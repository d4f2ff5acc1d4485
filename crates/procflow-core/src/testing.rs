//! Host doubles and definition fixtures shared by tests.

use crate::domain::definition::{
    LinkDefinition, ProcessDefinition, StepDefinition, StepHandlerKind, VarRequired,
    VariableDefinition, VariableType,
};
use crate::domain::environment::{HandlerContext, HostServices};
use crate::error::{CoreError, CoreResult};
use crate::types::HandlerOutcome;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Host services answering with preconfigured outcomes and recording calls
#[derive(Debug, Default)]
pub struct ScriptedHost {
    task_outcome: Option<HandlerOutcome>,
    ioc: HashMap<String, HandlerOutcome>,
    services: HashMap<String, HandlerOutcome>,
    broken: HashSet<String>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedHost {
    /// Host whose tasks suspend with correlation id `task-<step>`
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every task creation with `outcome`
    pub fn with_task_outcome(mut self, outcome: HandlerOutcome) -> Self {
        self.task_outcome = Some(outcome);
        self
    }

    /// Register an IoC service
    pub fn with_ioc(mut self, name: impl Into<String>, outcome: HandlerOutcome) -> Self {
        self.ioc.insert(name.into(), outcome);
        self
    }

    /// Register a loadable service class
    pub fn with_service(mut self, class_name: impl Into<String>, outcome: HandlerOutcome) -> Self {
        self.services.insert(class_name.into(), outcome);
        self
    }

    /// Make calls to the IoC name or class raise an external dependency error
    pub fn with_broken(mut self, name: impl Into<String>) -> Self {
        self.broken.insert(name.into());
        self
    }

    /// Share as host services
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }

    /// Calls seen so far, as `task:<step>`, `ioc:<name>` or `service:<class>`
    pub async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }

    async fn record(&self, call: String) {
        self.calls.lock().await.push(call);
    }

    fn lookup(
        &self,
        registry: &HashMap<String, HandlerOutcome>,
        name: &str,
    ) -> CoreResult<HandlerOutcome> {
        if self.broken.contains(name) {
            return Err(CoreError::ExternalDependencyError(format!("'{}' is unavailable", name)));
        }
        Ok(registry
            .get(name)
            .cloned()
            .unwrap_or_else(|| HandlerOutcome::failed(format!("no service registered as '{}'", name))))
    }
}

#[async_trait]
impl HostServices for ScriptedHost {
    async fn create_task(&self, ctx: &mut HandlerContext<'_>) -> CoreResult<HandlerOutcome> {
        self.record(format!("task:{}", ctx.step.step_id)).await;
        Ok(self
            .task_outcome
            .clone()
            .unwrap_or_else(|| HandlerOutcome::suspend(format!("task-{}", ctx.step.step_id))))
    }

    async fn invoke_ioc(
        &self,
        name: &str,
        _ctx: &mut HandlerContext<'_>,
    ) -> CoreResult<HandlerOutcome> {
        self.record(format!("ioc:{}", name)).await;
        self.lookup(&self.ioc, name)
    }

    async fn invoke_service(
        &self,
        class_name: &str,
        _ctx: &mut HandlerContext<'_>,
    ) -> CoreResult<HandlerOutcome> {
        self.record(format!("service:{}", class_name)).await;
        self.lookup(&self.services, class_name)
    }
}

/// Install a test-friendly tracing subscriber once
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `start -> review -> finish`, single unguarded links, no handlers
pub fn linear_definition() -> ProcessDefinition {
    let start = StepDefinition::new("start").start();
    let review = StepDefinition::new("review");
    let finish = StepDefinition::new("finish").end();

    ProcessDefinition::new("linear", "Linear")
        .with_link(LinkDefinition::new(&start, &review, "next"))
        .with_link(LinkDefinition::new(&review, &finish, "next"))
        .with_step(start)
        .with_step(review)
        .with_step(finish)
}

/// Expense approval:
///
/// * `submit` (start) needs `amount` on entry and checks it is positive
/// * `review` creates a human task
/// * `approved`/`rejected` links are guarded on `approved`
/// * `approve`/`reject` (end) scripts write `status`
///
/// The `submit -> review` link carries a guard that is always false; being
/// the only outgoing link it is never evaluated.
pub fn approval_definition() -> ProcessDefinition {
    let submit = StepDefinition::new("submit")
        .start()
        .with_variable("amount", VarRequired::ON_ENTRY)
        .with_on_entry("vars.amount > `0`");
    let review = StepDefinition::new("review")
        .with_handler(StepHandlerKind::Task)
        .with_variable("approved", VarRequired::ON_EXIT);
    let approve = StepDefinition::new("approve").end().with_handler(StepHandlerKind::Script {
        script: "set status = 'approved'".to_string(),
    });
    let reject = StepDefinition::new("reject").end().with_handler(StepHandlerKind::Script {
        script: "set status = 'rejected'".to_string(),
    });

    ProcessDefinition::new("expense", "Expense approval")
        .with_description("Approve or reject an expense claim")
        .with_link(LinkDefinition::new(&submit, &review, "submit").with_guard("`false`"))
        .with_link(
            LinkDefinition::new(&review, &approve, "approved").with_guard("vars.approved == `true`"),
        )
        .with_link(
            LinkDefinition::new(&review, &reject, "rejected").with_guard("vars.approved == `false`"),
        )
        .with_step(submit)
        .with_step(review)
        .with_step(approve)
        .with_step(reject)
        .with_variable(VariableDefinition::new("amount", VariableType::Int))
        .with_variable(VariableDefinition::new("approved", VariableType::Boolean))
        .with_variable(VariableDefinition::new("status", VariableType::String))
}
