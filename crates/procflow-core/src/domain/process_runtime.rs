//! Process-level state machine.
//!
//! A [`ProcessRuntime`] owns the step and link runtimes of one bound
//! definition and drives a single instance through
//! `NotStarted -> Ready -> {Ready | Suspended | Failed | Completed}`.
//! Business failures are reported as [`ExecutionResult`] data; calling an
//! operation in a state that does not allow it is a [`CoreError::StateConflict`].

use crate::domain::definition::ProcessDefinition;
use crate::domain::environment::ProcessEnvironment;
use crate::domain::events::{
    DomainEvent, ProcessCompleted, ProcessFailed, ProcessResumed, ProcessStarted,
    ProcessSuspended, StepExecuted,
};
use crate::domain::expression::ExpressionEngine;
use crate::domain::link_runtime::LinkRuntime;
use crate::domain::property_set::PropertySet;
use crate::domain::repository::ProcessSnapshot;
use crate::domain::step_runtime::{Phase, StepRuntime};
use crate::error::{CoreError, CoreResult};
use crate::types::{
    ExecutionResult, HandlerOutcome, ProcessInstanceId, ProcessState, StepExecutionStatus,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Aggregate: one running process instance
#[derive(Debug)]
pub struct ProcessRuntime {
    id: ProcessInstanceId,
    definition: Arc<ProcessDefinition>,
    fingerprint: String,
    state: ProcessState,
    suspended_in_step: Option<String>,
    last_executed_step: Option<String>,
    next_step: Option<String>,
    errors: Vec<String>,
    steps: Vec<StepRuntime>,
    links: Vec<LinkRuntime>,
    events: Vec<Box<dyn DomainEvent>>,
}

impl ProcessRuntime {
    /// Bind a fresh instance to `definition`, compiling every step and link
    pub fn create(
        definition: Arc<ProcessDefinition>,
        engine: &dyn ExpressionEngine,
    ) -> CoreResult<Self> {
        Self::with_id(ProcessInstanceId::new(), definition, engine)
    }

    /// Like [`ProcessRuntime::create`] with a caller-chosen instance id
    pub fn with_id(
        id: ProcessInstanceId,
        definition: Arc<ProcessDefinition>,
        engine: &dyn ExpressionEngine,
    ) -> CoreResult<Self> {
        let mut steps: Vec<StepRuntime> = (0..definition.steps.len())
            .map(|index| StepRuntime::new(definition.clone(), index))
            .collect();
        let mut links: Vec<LinkRuntime> = (0..definition.links.len())
            .map(|index| LinkRuntime::new(definition.clone(), index))
            .collect();

        let mut errors = Vec::new();
        for step in &mut steps {
            errors.extend(step.compile(engine));
        }
        for link in &mut links {
            errors.extend(link.compile(engine));
        }
        if !errors.is_empty() {
            warn!(flow = %definition.flow_id, count = errors.len(), "Definition failed to compile");
            return Err(CoreError::CompilationError(errors));
        }

        debug!(
            instance = %id,
            flow = %definition.flow_id,
            language = engine.language(),
            "Process runtime created"
        );

        Ok(Self {
            id,
            fingerprint: definition.fingerprint(),
            definition,
            state: ProcessState::NotStarted,
            suspended_in_step: None,
            last_executed_step: None,
            next_step: None,
            errors: Vec::new(),
            steps,
            links,
            events: Vec::new(),
        })
    }

    /// Instance id
    #[inline]
    pub fn id(&self) -> ProcessInstanceId {
        self.id
    }

    /// Bound definition
    #[inline]
    pub fn definition(&self) -> &Arc<ProcessDefinition> {
        &self.definition
    }

    /// Content fingerprint of the bound definition
    #[inline]
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    /// Current state
    #[inline]
    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Step the instance is suspended in
    pub fn suspended_in_step(&self) -> Option<&str> {
        self.suspended_in_step.as_deref()
    }

    /// Last step whose handler ran
    pub fn last_executed_step(&self) -> Option<&str> {
        self.last_executed_step.as_deref()
    }

    /// Next step resolved by the last Ready outcome
    pub fn next_step(&self) -> Option<&str> {
        self.next_step.as_deref()
    }

    /// Errors of the last failure
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// Step runtimes in definition order
    pub fn steps(&self) -> &[StepRuntime] {
        &self.steps
    }

    /// Link runtimes in definition order
    pub fn links(&self) -> &[LinkRuntime] {
        &self.links
    }

    /// Drain the recorded domain events
    pub fn take_events(&mut self) -> Vec<Box<dyn DomainEvent>> {
        std::mem::take(&mut self.events)
    }

    /// Execute `step_id`
    #[instrument(skip(self, env), fields(instance = %self.id))]
    pub async fn execute(
        &mut self,
        step_id: &str,
        env: &mut ProcessEnvironment,
    ) -> CoreResult<ExecutionResult> {
        match self.state {
            ProcessState::NotStarted => {
                let index = self.step_index(step_id)?;
                if !self.steps[index].definition().is_start {
                    return Err(CoreError::StateConflict(format!(
                        "step '{}' is not a start step",
                        step_id
                    )));
                }
                info!(flow = %self.definition.flow_id, step = %step_id, "Starting process");
                self.events.push(Box::new(ProcessStarted {
                    process_instance_id: self.id,
                    flow_id: self.definition.flow_id.clone(),
                    step_id: step_id.to_string(),
                    timestamp: Utc::now(),
                }));
                self.run_step(index, env).await
            }
            ProcessState::Ready => {
                let index = self.step_index(step_id)?;
                self.run_step(index, env).await
            }
            ProcessState::Suspended => Err(CoreError::StateConflict(format!(
                "cannot execute '{}' while suspended in step '{}'",
                step_id,
                self.suspended_in_step.as_deref().unwrap_or_default()
            ))),
            ProcessState::Completed => {
                debug!("Execute on a completed process is a no-op");
                Ok(ExecutionResult::new(
                    StepExecutionStatus::Completed,
                    self.last_executed_step.clone(),
                ))
            }
            ProcessState::Failed => {
                debug!("Execute on a failed process is a no-op");
                Ok(
                    ExecutionResult::new(StepExecutionStatus::Failed, self.last_executed_step.clone())
                        .with_errors(self.errors.clone()),
                )
            }
        }
    }

    /// Continue a suspended instance as if its step had just reported Ready
    #[instrument(skip(self, env), fields(instance = %self.id))]
    pub async fn resume(&mut self, env: &mut ProcessEnvironment) -> CoreResult<ExecutionResult> {
        if self.state != ProcessState::Suspended {
            return Err(CoreError::StateConflict(format!(
                "cannot continue a process in state {:?}",
                self.state
            )));
        }
        let step_id = self.suspended_in_step.clone().ok_or_else(|| {
            CoreError::StateConflict("suspended process has no suspension step".to_string())
        })?;
        let index = self.step_index(&step_id)?;

        info!(step = %step_id, "Resuming process");
        self.state = ProcessState::Ready;
        self.suspended_in_step = None;
        self.errors.clear();
        self.events.push(Box::new(ProcessResumed {
            process_instance_id: self.id,
            step_id: step_id.clone(),
            timestamp: Utc::now(),
        }));

        self.complete_step(index, step_id, env)
    }

    /// Move a failed instance back to Ready, or NotStarted if no step ever ran
    pub fn recover(&mut self) -> CoreResult<()> {
        if self.state != ProcessState::Failed {
            return Err(CoreError::StateConflict(format!(
                "cannot recover a process in state {:?}",
                self.state
            )));
        }
        self.state = if self.last_executed_step.is_some() {
            ProcessState::Ready
        } else {
            ProcessState::NotStarted
        };
        self.errors.clear();
        info!(instance = %self.id, state = ?self.state, "Process recovered");
        Ok(())
    }

    /// Persistable form of the instance together with `variables`
    pub fn snapshot(&self, variables: &PropertySet) -> CoreResult<ProcessSnapshot> {
        Ok(ProcessSnapshot {
            instance_id: self.id,
            definition_id: self.definition.id,
            flow_id: self.definition.flow_id.clone(),
            version: self.definition.version,
            fingerprint: self.fingerprint.clone(),
            status: self.state,
            suspended_step: self.suspended_in_step.clone(),
            next_step: self.next_step.clone(),
            last_executed_step: self.last_executed_step.clone(),
            errors: self.errors.clone(),
            variables: variables.freeze()?,
            timestamp: Utc::now(),
        })
    }

    /// Rebuild an instance from `snapshot`; `definition` must carry the
    /// same content the snapshot was taken with
    pub fn restore(
        definition: Arc<ProcessDefinition>,
        engine: &dyn ExpressionEngine,
        snapshot: &ProcessSnapshot,
    ) -> CoreResult<(Self, PropertySet)> {
        let found = definition.fingerprint();
        if found != snapshot.fingerprint {
            return Err(CoreError::FingerprintMismatch {
                definition: definition.flow_id.clone(),
                expected: snapshot.fingerprint.clone(),
                found,
            });
        }

        let variables = PropertySet::unfreeze(&snapshot.variables)?;
        let mut runtime = Self::with_id(snapshot.instance_id, definition, engine)?;
        for step in [&snapshot.suspended_step, &snapshot.next_step, &snapshot.last_executed_step]
            .into_iter()
            .flatten()
        {
            runtime.step_index(step)?;
        }

        runtime.state = snapshot.status;
        runtime.suspended_in_step = snapshot.suspended_step.clone();
        runtime.next_step = snapshot.next_step.clone();
        runtime.last_executed_step = snapshot.last_executed_step.clone();
        runtime.errors = snapshot.errors.clone();

        debug!(instance = %runtime.id, state = ?runtime.state, "Process runtime restored");
        Ok((runtime, variables))
    }

    fn step_index(&self, step_id: &str) -> CoreResult<usize> {
        self.steps
            .iter()
            .position(|step| step.step_id() == step_id)
            .ok_or_else(|| CoreError::StepNotFound(step_id.to_string()))
    }

    async fn run_step(
        &mut self,
        index: usize,
        env: &mut ProcessEnvironment,
    ) -> CoreResult<ExecutionResult> {
        let step_id = self.steps[index].step_id().to_string();
        self.errors.clear();
        self.next_step = None;
        debug!(step = %step_id, "Executing step");

        let errors = self.steps[index].validate(Phase::Entry, env, self.id);
        if !errors.is_empty() {
            return Ok(self.fail(step_id, errors));
        }

        self.state = ProcessState::Ready;
        self.last_executed_step = Some(step_id.clone());

        let outcome = self.steps[index].execute_handler(env, self.id).await;
        self.dispatch(index, step_id, outcome, env)
    }

    fn dispatch(
        &mut self,
        index: usize,
        step_id: String,
        outcome: HandlerOutcome,
        env: &mut ProcessEnvironment,
    ) -> CoreResult<ExecutionResult> {
        match outcome.status {
            StepExecutionStatus::Ready => self.complete_step(index, step_id, env),
            StepExecutionStatus::Suspend => {
                info!(step = %step_id, correlation = ?outcome.correlation_id, "Process suspended");
                self.state = ProcessState::Suspended;
                self.suspended_in_step = Some(step_id.clone());
                self.events.push(Box::new(ProcessSuspended {
                    process_instance_id: self.id,
                    step_id: step_id.clone(),
                    correlation_id: outcome.correlation_id,
                    timestamp: Utc::now(),
                }));
                Ok(ExecutionResult::new(StepExecutionStatus::Suspend, Some(step_id)))
            }
            StepExecutionStatus::Failed => {
                let mut errors = outcome.error_messages;
                if errors.is_empty() {
                    errors.push(format!("step '{}' failed", step_id));
                }
                Ok(self.fail(step_id, errors))
            }
            StepExecutionStatus::Completed => Err(CoreError::InvalidHandlerStatus(format!(
                "handler of step '{}' reported {:?}",
                step_id, outcome.status
            ))),
        }
    }

    /// On-exit validation and next-step resolution after a Ready outcome
    fn complete_step(
        &mut self,
        index: usize,
        step_id: String,
        env: &mut ProcessEnvironment,
    ) -> CoreResult<ExecutionResult> {
        let errors = self.steps[index].validate(Phase::Exit, env, self.id);
        if !errors.is_empty() {
            return Ok(self.fail(step_id, errors));
        }

        let next = match self.resolve_next(&step_id, env) {
            Ok(next) => next,
            Err(message) => return Ok(self.fail(step_id, vec![message])),
        };
        self.events.push(Box::new(StepExecuted {
            process_instance_id: self.id,
            step_id: step_id.clone(),
            next_step: next.clone(),
            timestamp: Utc::now(),
        }));

        match next {
            Some(next) => {
                debug!(step = %step_id, next = %next, "Next step resolved");
                self.next_step = Some(next.clone());
                Ok(ExecutionResult::new(StepExecutionStatus::Ready, Some(step_id)).with_next(Some(next)))
            }
            None if self.steps[index].definition().is_end => {
                info!(step = %step_id, "Process completed");
                self.state = ProcessState::Completed;
                self.events.push(Box::new(ProcessCompleted {
                    process_instance_id: self.id,
                    step_id: step_id.clone(),
                    timestamp: Utc::now(),
                }));
                Ok(ExecutionResult::new(StepExecutionStatus::Completed, Some(step_id)))
            }
            None => {
                warn!(step = %step_id, "No outgoing link applies");
                Ok(ExecutionResult::new(StepExecutionStatus::Ready, Some(step_id)))
            }
        }
    }

    /// Transition resolution, first applicable rule wins:
    /// a single outgoing link is taken unconditionally, then an explicit
    /// transition selects by name, then the first guard evaluating true.
    /// A guard that raises an error yields its message.
    fn resolve_next(
        &self,
        step_id: &str,
        env: &mut ProcessEnvironment,
    ) -> Result<Option<String>, String> {
        let outgoing: Vec<&LinkRuntime> = self
            .links
            .iter()
            .filter(|link| link.source() == step_id)
            .collect();

        if let [only] = outgoing.as_slice() {
            return Ok(Some(only.target().to_string()));
        }

        if let Some(transition) = env.transition() {
            return Ok(outgoing
                .iter()
                .find(|link| link.name() == transition)
                .map(|link| link.target().to_string()));
        }

        for link in outgoing.into_iter().filter(|link| link.has_guard()) {
            let mut scope = env.expression_scope(self.id, step_id);
            match link.evaluate(&mut scope) {
                Ok(true) => return Ok(Some(link.target().to_string())),
                Ok(false) => {}
                Err(e) => {
                    return Err(format!("Guard of link '{}' raised: {}", link.name(), e));
                }
            }
        }
        Ok(None)
    }

    fn fail(&mut self, step_id: String, errors: Vec<String>) -> ExecutionResult {
        warn!(step = %step_id, errors = ?errors, "Step failed");
        self.state = ProcessState::Failed;
        self.errors = errors.clone();
        self.events.push(Box::new(ProcessFailed {
            process_instance_id: self.id,
            step_id: step_id.clone(),
            errors: errors.clone(),
            timestamp: Utc::now(),
        }));
        ExecutionResult::new(StepExecutionStatus::Failed, Some(step_id)).with_errors(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::definition::{
        LinkDefinition, StepDefinition, StepHandlerKind, VarRequired, VariableDefinition,
        VariableType,
    };
    use crate::domain::expression::JmesPathEngine;
    use pretty_assertions::assert_eq;

    fn branching() -> Arc<ProcessDefinition> {
        let start = StepDefinition::new("start").start();
        let yes = StepDefinition::new("yes").end();
        let no = StepDefinition::new("no").end();
        Arc::new(
            ProcessDefinition::new("branch", "Branch")
                .with_link(LinkDefinition::new(&start, &yes, "yes").with_guard("vars.flag == `true`"))
                .with_link(LinkDefinition::new(&start, &no, "no").with_guard("vars.flag == `false`"))
                .with_step(start)
                .with_step(yes)
                .with_step(no)
                .with_variable(VariableDefinition::new("flag", VariableType::Boolean)),
        )
    }

    fn env(definition: &ProcessDefinition) -> ProcessEnvironment {
        ProcessEnvironment::new(definition.property_set().unwrap())
    }

    #[test]
    fn test_create_reports_all_compile_errors() {
        let start = StepDefinition::new("start").start().with_on_entry("vars.[");
        let end = StepDefinition::new("end").end();
        let definition = Arc::new(
            ProcessDefinition::new("bad", "Bad")
                .with_link(LinkDefinition::new(&start, &end, "go").with_guard("(("))
                .with_step(start)
                .with_step(end),
        );

        match ProcessRuntime::create(definition, &JmesPathEngine::new()) {
            Err(CoreError::CompilationError(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("unexpected {:?}", other.map(|r| r.state())),
        }
    }

    #[tokio::test]
    async fn test_guard_branch_and_completion() {
        let definition = branching();
        let mut runtime = ProcessRuntime::create(definition.clone(), &JmesPathEngine::new()).unwrap();
        let mut env = env(&definition);
        env.properties_mut().set("flag", false).unwrap();

        let result = runtime.execute("start", &mut env).await.unwrap();
        assert_eq!(result.status, StepExecutionStatus::Ready);
        assert_eq!(result.next_step.as_deref(), Some("no"));
        assert_eq!(runtime.next_step(), Some("no"));

        let result = runtime.execute("no", &mut env).await.unwrap();
        assert_eq!(result.status, StepExecutionStatus::Completed);
        assert_eq!(runtime.state(), ProcessState::Completed);

        let events: Vec<_> = runtime.take_events().iter().map(|e| e.event_type()).collect();
        assert_eq!(
            events,
            vec!["process.started", "step.executed", "step.executed", "process.completed"]
        );
        assert!(runtime.take_events().is_empty());
    }

    #[tokio::test]
    async fn test_no_matching_guard_leaves_dead_end() {
        let definition = branching();
        let mut runtime = ProcessRuntime::create(definition.clone(), &JmesPathEngine::new()).unwrap();
        let mut env = env(&definition);

        let result = runtime.execute("start", &mut env).await.unwrap();
        assert_eq!(result.status, StepExecutionStatus::Ready);
        assert_eq!(result.next_step, None);
        assert_eq!(runtime.state(), ProcessState::Ready);
    }

    #[tokio::test]
    async fn test_unknown_transition_resolves_nothing() {
        let definition = branching();
        let mut runtime = ProcessRuntime::create(definition.clone(), &JmesPathEngine::new()).unwrap();
        let mut env = env(&definition);
        env.properties_mut().set("flag", true).unwrap();
        env.set_transition("maybe");

        let result = runtime.execute("start", &mut env).await.unwrap();
        assert_eq!(result.next_step, None);
    }

    #[tokio::test]
    async fn test_unknown_step_is_a_fault() {
        let definition = branching();
        let mut runtime = ProcessRuntime::create(definition.clone(), &JmesPathEngine::new()).unwrap();
        let err = runtime.execute("nowhere", &mut env(&definition)).await.unwrap_err();
        assert_eq!(err, CoreError::StepNotFound("nowhere".to_string()));
        assert_eq!(runtime.state(), ProcessState::NotStarted);
    }

    #[tokio::test]
    async fn test_entry_failure_does_not_advance() {
        let start = StepDefinition::new("start")
            .start()
            .end()
            .with_variable("flag", VarRequired::ON_ENTRY);
        let definition = Arc::new(
            ProcessDefinition::new("gate", "Gate")
                .with_step(start)
                .with_variable(VariableDefinition::new("flag", VariableType::Boolean)),
        );
        let mut runtime = ProcessRuntime::create(definition.clone(), &JmesPathEngine::new()).unwrap();
        let mut env = env(&definition);

        let result = runtime.execute("start", &mut env).await.unwrap();
        assert!(result.is_failed());
        assert_eq!(runtime.last_executed_step(), None);

        runtime.recover().unwrap();
        assert_eq!(runtime.state(), ProcessState::NotStarted);
        assert!(runtime.errors().is_empty());

        env.properties_mut().set("flag", true).unwrap();
        let result = runtime.execute("start", &mut env).await.unwrap();
        assert_eq!(result.status, StepExecutionStatus::Completed);
    }

    #[tokio::test]
    async fn test_script_failure_and_noop_execute() {
        let start = StepDefinition::new("start")
            .start()
            .with_handler(StepHandlerKind::Script { script: "`0`".to_string() });
        let end = StepDefinition::new("end").end();
        let definition = Arc::new(
            ProcessDefinition::new("fails", "Fails")
                .with_link(LinkDefinition::new(&start, &end, "go"))
                .with_step(start)
                .with_step(end),
        );
        let mut runtime = ProcessRuntime::create(definition.clone(), &JmesPathEngine::new()).unwrap();
        let mut env = env(&definition);

        let failed = runtime.execute("start", &mut env).await.unwrap();
        assert_eq!(failed.error_messages, vec!["script of step 'start' returned 0".to_string()]);
        assert_eq!(runtime.state(), ProcessState::Failed);

        let again = runtime.execute("end", &mut env).await.unwrap();
        assert_eq!(again.status, StepExecutionStatus::Failed);
        assert_eq!(again.step.as_deref(), Some("start"));
        assert_eq!(again.error_messages, failed.error_messages);

        assert!(matches!(runtime.resume(&mut env).await, Err(CoreError::StateConflict(_))));
    }

    #[test]
    fn test_recover_requires_failed_state() {
        let mut runtime = ProcessRuntime::create(branching(), &JmesPathEngine::new()).unwrap();
        assert!(matches!(runtime.recover(), Err(CoreError::StateConflict(_))));
    }

    #[tokio::test]
    async fn test_snapshot_restore() {
        let definition = branching();
        let mut runtime = ProcessRuntime::create(definition.clone(), &JmesPathEngine::new()).unwrap();
        let mut env = env(&definition);
        env.properties_mut().set("flag", true).unwrap();
        runtime.execute("start", &mut env).await.unwrap();

        let snapshot = runtime.snapshot(env.properties()).unwrap();
        assert_eq!(snapshot.next_step.as_deref(), Some("yes"));
        assert_eq!(snapshot.fingerprint, definition.fingerprint());

        // same content, different storage ids
        let rebuilt = branching();
        let (restored, variables) =
            ProcessRuntime::restore(rebuilt, &JmesPathEngine::new(), &snapshot).unwrap();
        assert_eq!(restored.id(), runtime.id());
        assert_eq!(restored.state(), ProcessState::Ready);
        assert_eq!(restored.next_step(), Some("yes"));
        assert_eq!(restored.last_executed_step(), Some("start"));
        assert!(variables.get::<bool>("flag").unwrap());
    }

    #[test]
    fn test_restore_rejects_other_content() {
        let runtime = ProcessRuntime::create(branching(), &JmesPathEngine::new()).unwrap();
        let snapshot = runtime.snapshot(&PropertySet::new()).unwrap();

        let other = Arc::new(ProcessDefinition::new("other", "Other").with_step(StepDefinition::new("a")));
        let err = ProcessRuntime::restore(other, &JmesPathEngine::new(), &snapshot).unwrap_err();
        assert!(matches!(err, CoreError::FingerprintMismatch { .. }));
    }
}
