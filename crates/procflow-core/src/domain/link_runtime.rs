//! Per-link runtime holding the compiled guard expression.

use crate::domain::definition::{LinkDefinition, ProcessDefinition};
use crate::domain::expression::{passes, CompiledExpression, ExpressionEngine, ExpressionScope};
use crate::error::CoreResult;
use std::sync::Arc;

/// Runtime wrapper of a link definition with its compiled guard
#[derive(Debug)]
pub struct LinkRuntime {
    process: Arc<ProcessDefinition>,
    index: usize,
    guard: Option<Arc<dyn CompiledExpression>>,
    is_compiled: bool,
}

impl LinkRuntime {
    pub(crate) fn new(process: Arc<ProcessDefinition>, index: usize) -> Self {
        Self {
            process,
            index,
            guard: None,
            is_compiled: false,
        }
    }

    /// Wrapped definition
    #[inline]
    pub fn definition(&self) -> &LinkDefinition {
        &self.process.links[self.index]
    }

    /// Transition name
    #[inline]
    pub fn name(&self) -> &str {
        &self.definition().name
    }

    /// Logical id of the source step
    #[inline]
    pub fn source(&self) -> &str {
        &self.definition().source.step_id
    }

    /// Logical id of the target step
    #[inline]
    pub fn target(&self) -> &str {
        &self.definition().target.step_id
    }

    /// Whether a guard is configured
    #[inline]
    pub fn has_guard(&self) -> bool {
        self.definition().script.is_some()
    }

    /// Whether `compile` already succeeded
    #[inline]
    pub fn is_compiled(&self) -> bool {
        self.is_compiled
    }

    /// Compile the guard, if any; a no-op once compiled
    pub fn compile(&mut self, engine: &dyn ExpressionEngine) -> Vec<String> {
        if self.is_compiled {
            return Vec::new();
        }

        let link = &self.process.links[self.index];
        if let Some(source) = link.script.as_deref() {
            match engine.compile(source) {
                Ok(compiled) => self.guard = Some(compiled),
                Err(problems) => {
                    return problems
                        .into_iter()
                        .map(|p| format!("link '{}' guard: {}", link.name, p))
                        .collect();
                }
            }
        }

        self.is_compiled = true;
        Vec::new()
    }

    /// Evaluate the guard. A link without a guard never matches here;
    /// it is only taken as the single outgoing link of its source.
    pub fn evaluate(&self, scope: &mut ExpressionScope<'_>) -> CoreResult<bool> {
        match &self.guard {
            Some(guard) => Ok(passes(guard.execute(scope)?)),
            None => Ok(false),
        }
    }
}
