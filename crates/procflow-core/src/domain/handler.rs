//! Step handlers, one implementation per [`StepHandlerKind`] variant.
//!
//! The implementation is chosen once when a step runtime is built; the engine
//! then only talks to the [`StepHandler`] trait.

use crate::domain::definition::StepHandlerKind;
use crate::domain::environment::{HandlerContext, HostServices};
use crate::domain::expression::{passes, CompiledExpression, ExpressionEngine, ExpressionScope};
use crate::error::CoreResult;
use crate::types::HandlerOutcome;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Executable behaviour of a step
#[async_trait]
pub trait StepHandler: Send + Sync + fmt::Debug {
    /// Short name of the handler kind
    fn kind(&self) -> &'static str;

    /// Compile whatever the handler needs; returns compile errors
    fn compile(&mut self, _engine: &dyn ExpressionEngine) -> Vec<String> {
        Vec::new()
    }

    /// Run the handler
    async fn execute(
        &self,
        ctx: &mut HandlerContext<'_>,
        host: &dyn HostServices,
    ) -> CoreResult<HandlerOutcome>;
}

/// Always succeeds without side effects
#[derive(Debug, Default)]
pub struct NoneHandler;

#[async_trait]
impl StepHandler for NoneHandler {
    fn kind(&self) -> &'static str {
        "none"
    }

    async fn execute(
        &self,
        _ctx: &mut HandlerContext<'_>,
        _host: &dyn HostServices,
    ) -> CoreResult<HandlerOutcome> {
        Ok(HandlerOutcome::ready())
    }
}

/// Runs the step's own script; `1` means Ready, anything else Failed
#[derive(Debug)]
pub struct ScriptHandler {
    source: String,
    compiled: Option<Arc<dyn CompiledExpression>>,
}

impl ScriptHandler {
    /// Handler for `source`, compiled later
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            compiled: None,
        }
    }
}

#[async_trait]
impl StepHandler for ScriptHandler {
    fn kind(&self) -> &'static str {
        "script"
    }

    fn compile(&mut self, engine: &dyn ExpressionEngine) -> Vec<String> {
        match engine.compile(&self.source) {
            Ok(compiled) => {
                self.compiled = Some(compiled);
                Vec::new()
            }
            Err(errors) => errors
                .into_iter()
                .map(|e| format!("handler script: {}", e))
                .collect(),
        }
    }

    async fn execute(
        &self,
        ctx: &mut HandlerContext<'_>,
        _host: &dyn HostServices,
    ) -> CoreResult<HandlerOutcome> {
        let Some(compiled) = &self.compiled else {
            return Ok(HandlerOutcome::failed(format!(
                "script of step '{}' is not compiled",
                ctx.step.step_id
            )));
        };

        let mut scope = ExpressionScope {
            properties: &mut *ctx.properties,
            transition: ctx.transition,
            params: &*ctx.params,
            instance_id: ctx.instance_id,
            step_id: &ctx.step.step_id,
        };

        Ok(match compiled.execute(&mut scope) {
            Ok(code) if passes(code) => HandlerOutcome::ready(),
            Ok(code) => HandlerOutcome::failed(format!(
                "script of step '{}' returned {}",
                ctx.step.step_id, code
            )),
            Err(e) => HandlerOutcome::failed(e.to_string()),
        })
    }
}

/// Delegates to the host's task creation
#[derive(Debug, Default)]
pub struct TaskHandler;

#[async_trait]
impl StepHandler for TaskHandler {
    fn kind(&self) -> &'static str {
        "task"
    }

    async fn execute(
        &self,
        ctx: &mut HandlerContext<'_>,
        host: &dyn HostServices,
    ) -> CoreResult<HandlerOutcome> {
        host.create_task(ctx).await
    }
}

/// Delegates to a named service in the host's container
#[derive(Debug)]
pub struct IocHandler {
    name: String,
}

#[async_trait]
impl StepHandler for IocHandler {
    fn kind(&self) -> &'static str {
        "ioc"
    }

    async fn execute(
        &self,
        ctx: &mut HandlerContext<'_>,
        host: &dyn HostServices,
    ) -> CoreResult<HandlerOutcome> {
        host.invoke_ioc(&self.name, ctx).await
    }
}

/// Delegates to a dynamically loaded service class
#[derive(Debug)]
pub struct ServiceHandler {
    class_name: String,
}

#[async_trait]
impl StepHandler for ServiceHandler {
    fn kind(&self) -> &'static str {
        "service"
    }

    async fn execute(
        &self,
        ctx: &mut HandlerContext<'_>,
        host: &dyn HostServices,
    ) -> CoreResult<HandlerOutcome> {
        host.invoke_service(&self.class_name, ctx).await
    }
}

/// Pick the handler implementation for `kind`
pub fn handler_for(kind: &StepHandlerKind) -> Box<dyn StepHandler> {
    match kind {
        StepHandlerKind::None => Box::new(NoneHandler),
        StepHandlerKind::Script { script } => Box::new(ScriptHandler::new(script.clone())),
        StepHandlerKind::Task => Box::new(TaskHandler),
        StepHandlerKind::IoC { name } => Box::new(IocHandler { name: name.clone() }),
        StepHandlerKind::Service { class_name } => Box::new(ServiceHandler {
            class_name: class_name.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definition::StepDefinition;
    use crate::domain::environment::{NoHostServices, ProcessEnvironment};
    use crate::domain::expression::JmesPathEngine;
    use crate::domain::property_set::{PropertySchema, PropertySet};
    use crate::types::{ProcessInstanceId, StepExecutionStatus};

    fn env() -> ProcessEnvironment {
        let mut properties = PropertySet::new();
        properties.add_with_value("amount", 10, PropertySchema::int()).unwrap();
        ProcessEnvironment::new(properties)
    }

    async fn run(kind: StepHandlerKind, env: &mut ProcessEnvironment) -> HandlerOutcome {
        let step = StepDefinition::new("work").with_handler(kind.clone());
        let mut handler = handler_for(&kind);
        assert!(handler.compile(&JmesPathEngine::new()).is_empty());
        let mut ctx = env.handler_context(ProcessInstanceId::new(), &step);
        handler.execute(&mut ctx, &NoHostServices).await.unwrap()
    }

    #[test]
    fn test_handler_selection() {
        let kinds = [
            (StepHandlerKind::None, "none"),
            (StepHandlerKind::Script { script: "`1`".to_string() }, "script"),
            (StepHandlerKind::Task, "task"),
            (StepHandlerKind::IoC { name: "a".to_string() }, "ioc"),
            (StepHandlerKind::Service { class_name: "b".to_string() }, "service"),
        ];
        for (kind, expected) in kinds {
            assert_eq!(handler_for(&kind).kind(), expected);
        }
    }

    #[tokio::test]
    async fn test_none_handler_is_ready() {
        let outcome = run(StepHandlerKind::None, &mut env()).await;
        assert_eq!(outcome, HandlerOutcome::ready());
    }

    #[tokio::test]
    async fn test_script_handler_outcomes() {
        let mut env = env();
        let ready = run(
            StepHandlerKind::Script { script: "set amount = `11`\nvars.amount == `11`".to_string() },
            &mut env,
        )
        .await;
        assert_eq!(ready.status, StepExecutionStatus::Ready);
        assert_eq!(env.properties().get::<i32>("amount").unwrap(), 11);

        let failed = run(StepHandlerKind::Script { script: "`0`".to_string() }, &mut env).await;
        assert_eq!(failed.status, StepExecutionStatus::Failed);
        assert_eq!(failed.error_messages, vec!["script of step 'work' returned 0".to_string()]);
    }

    #[tokio::test]
    async fn test_script_runtime_error_becomes_failure() {
        let outcome = run(
            StepHandlerKind::Script { script: "set nowhere = `1`".to_string() },
            &mut env(),
        )
        .await;
        assert_eq!(outcome.status, StepExecutionStatus::Failed);
        assert!(outcome.error_messages[0].contains("nowhere"));
    }

    #[test]
    fn test_script_compile_errors_reported() {
        let mut handler = handler_for(&StepHandlerKind::Script { script: "vars.[".to_string() });
        let errors = handler.compile(&JmesPathEngine::new());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].starts_with("handler script: line 1"));
    }
}
