//! Per-step runtime: compiled entry/exit validation and the step handler.

use crate::domain::definition::{ProcessDefinition, StepDefinition, VarRequired};
use crate::domain::environment::ProcessEnvironment;
use crate::domain::expression::{passes, CompiledExpression, ExpressionEngine};
use crate::domain::handler::{handler_for, StepHandler};
use crate::types::{HandlerOutcome, ProcessInstanceId};
use std::sync::Arc;
use tracing::{debug, warn};

/// Validation phase of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Before the handler runs
    Entry,
    /// After the handler reported Ready
    Exit,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Entry => "entry",
            Phase::Exit => "exit",
        }
    }

    fn flag(self) -> VarRequired {
        match self {
            Phase::Entry => VarRequired::ON_ENTRY,
            Phase::Exit => VarRequired::ON_EXIT,
        }
    }
}

/// Runtime wrapper of a step definition with its compiled behaviour
#[derive(Debug)]
pub struct StepRuntime {
    process: Arc<ProcessDefinition>,
    index: usize,
    on_entry: Option<Arc<dyn CompiledExpression>>,
    on_exit: Option<Arc<dyn CompiledExpression>>,
    handler: Box<dyn StepHandler>,
    is_compiled: bool,
}

impl StepRuntime {
    /// Wrap step number `index` of `process`
    pub(crate) fn new(process: Arc<ProcessDefinition>, index: usize) -> Self {
        let handler = handler_for(&process.steps[index].handler);
        Self {
            process,
            index,
            on_entry: None,
            on_exit: None,
            handler,
            is_compiled: false,
        }
    }

    /// Wrapped definition
    #[inline]
    pub fn definition(&self) -> &StepDefinition {
        &self.process.steps[self.index]
    }

    /// Logical step id
    #[inline]
    pub fn step_id(&self) -> &str {
        &self.definition().step_id
    }

    /// Whether `compile` already succeeded
    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.is_compiled
    }

    /// Compile on-entry/on-exit expressions and the handler.
    /// A second call after success is a no-op.
    pub fn compile(&mut self, engine: &dyn ExpressionEngine) -> Vec<String> {
        if self.is_compiled {
            return Vec::new();
        }

        let definition = &self.process.steps[self.index];
        let mut errors = Vec::new();
        let mut compile = |source: &Option<String>, label: &str| {
            source.as_deref().and_then(|source| match engine.compile(source) {
                Ok(compiled) => Some(compiled),
                Err(problems) => {
                    errors.extend(problems.into_iter().map(|p| {
                        format!("step '{}' {}: {}", definition.step_id, label, p)
                    }));
                    None
                }
            })
        };

        let on_entry = compile(&definition.on_entry, "on-entry");
        let on_exit = compile(&definition.on_exit, "on-exit");
        let step_id = definition.step_id.clone();

        errors.extend(
            self.handler
                .compile(engine)
                .into_iter()
                .map(|p| format!("step '{}' {}", step_id, p)),
        );

        if errors.is_empty() {
            self.on_entry = on_entry;
            self.on_exit = on_exit;
            self.is_compiled = true;
            debug!(step = %step_id, handler = self.handler.kind(), "Step compiled");
        }
        errors
    }

    /// Required variables and validation expression of `phase`.
    /// Returns the business error messages; empty means the step may proceed.
    pub fn validate(
        &self,
        phase: Phase,
        env: &mut ProcessEnvironment,
        instance_id: ProcessInstanceId,
    ) -> Vec<String> {
        let definition = self.definition();

        let missing: Vec<String> = definition
            .required_variables(phase.flag())
            .filter(|name| !env.properties().is_set(name))
            .map(|name| {
                format!(
                    "Variable '{}' is required on {} of step '{}'",
                    name,
                    phase.label(),
                    definition.step_id
                )
            })
            .collect();
        if !missing.is_empty() {
            return missing;
        }

        let (source, compiled) = match phase {
            Phase::Entry => (&definition.on_entry, &self.on_entry),
            Phase::Exit => (&definition.on_exit, &self.on_exit),
        };
        if source.is_none() {
            return Vec::new();
        }
        let Some(compiled) = compiled else {
            return vec![format!(
                "On-{} expression of step '{}' is not compiled",
                phase.label(),
                definition.step_id
            )];
        };

        let mut scope = env.expression_scope(instance_id, &definition.step_id);
        match compiled.execute(&mut scope) {
            Ok(code) if passes(code) => Vec::new(),
            Ok(code) => vec![format!(
                "On-{} validation of step '{}' failed with {}",
                phase.label(),
                definition.step_id,
                code
            )],
            Err(e) => vec![format!(
                "On-{} validation of step '{}' raised: {}",
                phase.label(),
                definition.step_id,
                e
            )],
        }
    }

    /// Run the handler. Errors raised by host delegation become a Failed outcome.
    pub async fn execute_handler(
        &self,
        env: &mut ProcessEnvironment,
        instance_id: ProcessInstanceId,
    ) -> HandlerOutcome {
        let host = env.host();
        let definition = self.definition();
        let mut ctx = env.handler_context(instance_id, definition);

        match self.handler.execute(&mut ctx, host.as_ref()).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(step = %definition.step_id, error = %e, "Step handler raised an error");
                HandlerOutcome::failed(e.to_string())
            }
        }
    }
}
