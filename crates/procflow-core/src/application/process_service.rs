use crate::{
    config::EngineConfig,
    domain::definition::ProcessDefinition,
    domain::environment::{HostServices, NoHostServices, ProcessEnvironment},
    domain::events::DomainEvent,
    domain::process_runtime::ProcessRuntime,
    domain::property_set::PropertySet,
    domain::repository::RuntimeService,
    CoreError, ExecutionResult, ProcessInstanceId, ProcessState, StepExecutionStatus,
};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What the caller passes into one `start`/`resume` call
#[derive(Debug, Clone, Default)]
pub struct ExecutionRequest {
    /// Start step to execute; required when the definition has several
    pub start_step: Option<String>,

    /// Explicit transition for the first resolution of this call
    pub transition: Option<String>,

    /// Extra host parameters
    pub params: HashMap<String, Value>,

    /// Variable updates applied before the first step operation
    pub variables: HashMap<String, Value>,
}

impl ExecutionRequest {
    /// Empty request
    pub fn new() -> Self {
        Self::default()
    }

    /// Name the start step
    pub fn with_start_step(mut self, step_id: impl Into<String>) -> Self {
        self.start_step = Some(step_id.into());
        self
    }

    /// Request an explicit transition
    pub fn with_transition(mut self, transition: impl Into<String>) -> Self {
        self.transition = Some(transition.into());
        self
    }

    /// Add an extra parameter
    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }

    /// Set a variable, coerced into its declared type
    pub fn with_variable(mut self, name: impl Into<String>, value: Value) -> Self {
        self.variables.insert(name.into(), value);
        self
    }
}

/// Result of a `start`/`resume` call after the instance was frozen
#[derive(Debug)]
pub struct ProcessOutcome {
    /// The instance
    pub instance_id: ProcessInstanceId,

    /// Instance state after the call
    pub state: ProcessState,

    /// Result of the last step operation
    pub last_result: ExecutionResult,

    /// Number of step operations performed
    pub steps_executed: usize,

    /// Variable store after the call
    pub variables: PropertySet,
}

/// Handler for domain events drained from process runtimes
#[async_trait]
pub trait DomainEventHandler: Send + Sync {
    /// Handle a domain event
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError>;
}

/// Logs every event through `tracing`
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventHandler;

#[async_trait]
impl DomainEventHandler for TracingEventHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
        info!(
            event = event.event_type(),
            instance = %event.process_instance_id(),
            at = %event.timestamp(),
            "Domain event"
        );
        Ok(())
    }
}

/// Durable execution: every call runs on a runtime obtained from the
/// runtime service and freezes it again before returning
pub struct ProcessExecutionService {
    runtime_service: Arc<dyn RuntimeService>,
    host: Arc<dyn HostServices>,
    event_handler: Arc<dyn DomainEventHandler>,
    config: EngineConfig,
}

impl ProcessExecutionService {
    /// Service without host delegation, logging events through tracing
    pub fn new(runtime_service: Arc<dyn RuntimeService>, config: EngineConfig) -> Self {
        Self {
            runtime_service,
            host: Arc::new(NoHostServices),
            event_handler: Arc::new(TracingEventHandler),
            config,
        }
    }

    /// Delegate task/IoC/service handlers to `host`
    pub fn with_host(mut self, host: Arc<dyn HostServices>) -> Self {
        self.host = host;
        self
    }

    /// Forward domain events to `event_handler`
    pub fn with_event_handler(mut self, event_handler: Arc<dyn DomainEventHandler>) -> Self {
        self.event_handler = event_handler;
        self
    }

    /// Create an instance of `definition`, execute its start step and drive forward
    #[instrument(skip(self, definition, variables, request), fields(flow = %definition.flow_id))]
    pub async fn start(
        &self,
        definition: Arc<ProcessDefinition>,
        variables: PropertySet,
        request: ExecutionRequest,
    ) -> Result<ProcessOutcome, CoreError> {
        let start = match &request.start_step {
            Some(step_id) => step_id.clone(),
            None => single_start_step(&definition)?,
        };

        let mut runtime = self.runtime_service.create(definition, &variables).await?;
        info!(instance = %runtime.id(), step = %start, "Process instance created");

        let mut env = self.environment(variables, &request)?;
        let first = runtime.execute(&start, &mut env).await;
        self.drive(runtime, env, first).await
    }

    /// Load a frozen instance and continue it
    #[instrument(skip(self, request), fields(instance = %instance_id))]
    pub async fn resume(
        &self,
        instance_id: ProcessInstanceId,
        request: ExecutionRequest,
    ) -> Result<ProcessOutcome, CoreError> {
        let unfrozen = self
            .runtime_service
            .try_unfreeze(instance_id)
            .await?
            .ok_or_else(|| CoreError::InstanceNotFound(instance_id.to_string()))?;

        let mut runtime = unfrozen.runtime;
        let mut env = self.environment(unfrozen.variables, &request)?;

        let first = match (runtime.state(), unfrozen.next_step) {
            (ProcessState::Suspended, _) => runtime.resume(&mut env).await,
            (ProcessState::Completed | ProcessState::Failed, _) => {
                let last = runtime.last_executed_step().unwrap_or_default().to_string();
                runtime.execute(&last, &mut env).await
            }
            (_, Some(next)) => runtime.execute(&next, &mut env).await,
            (ProcessState::NotStarted, None) => {
                let start = match &request.start_step {
                    Some(step_id) => step_id.clone(),
                    None => single_start_step(runtime.definition())?,
                };
                runtime.execute(&start, &mut env).await
            }
            (state, None) => Err(CoreError::StateConflict(format!(
                "process in state {:?} has no next step",
                state
            ))),
        };
        self.drive(runtime, env, first).await
    }

    fn environment(
        &self,
        variables: PropertySet,
        request: &ExecutionRequest,
    ) -> Result<ProcessEnvironment, CoreError> {
        let mut env = ProcessEnvironment::with_host(variables, self.host.clone());
        if let Some(transition) = &request.transition {
            env.set_transition(transition.clone());
        }
        for (key, value) in &request.params {
            env.set_param(key, value)?;
        }
        for (name, value) in &request.variables {
            env.properties_mut().set_json(name, value.clone())?;
        }
        Ok(env)
    }

    /// Follow Ready results to their next step, then freeze and publish events
    async fn drive(
        &self,
        mut runtime: ProcessRuntime,
        mut env: ProcessEnvironment,
        first: Result<ExecutionResult, CoreError>,
    ) -> Result<ProcessOutcome, CoreError> {
        let driven = match first {
            Ok(result) => self.advance(&mut runtime, &mut env, result).await,
            Err(e) => Err(e),
        };

        self.runtime_service
            .freeze(&runtime, env.properties())
            .await?;
        self.handle_events(&mut runtime).await?;

        let (last_result, steps_executed) = driven?;
        debug!(
            instance = %runtime.id(),
            state = ?runtime.state(),
            steps = steps_executed,
            "Process instance frozen"
        );

        Ok(ProcessOutcome {
            instance_id: runtime.id(),
            state: runtime.state(),
            last_result,
            steps_executed,
            variables: env.into_properties(),
        })
    }

    async fn advance(
        &self,
        runtime: &mut ProcessRuntime,
        env: &mut ProcessEnvironment,
        mut result: ExecutionResult,
    ) -> Result<(ExecutionResult, usize), CoreError> {
        // the requested transition only steers the first resolution
        env.clear_transition();
        let mut steps = 1;

        while result.status == StepExecutionStatus::Ready {
            let Some(next) = result.next_step.clone() else {
                break;
            };
            if steps >= self.config.max_steps_per_run {
                debug!(limit = self.config.max_steps_per_run, "Step limit reached, yielding");
                break;
            }
            result = runtime.execute(&next, env).await?;
            steps += 1;
        }

        Ok((result, steps))
    }

    async fn handle_events(&self, runtime: &mut ProcessRuntime) -> Result<(), CoreError> {
        let events = runtime.take_events();

        for event in events {
            self.event_handler.handle_event(event).await?;
        }

        Ok(())
    }
}

fn single_start_step(definition: &ProcessDefinition) -> Result<String, CoreError> {
    let starts: Vec<_> = definition.start_steps().collect();
    match starts.as_slice() {
        [only] => Ok(only.step_id.clone()),
        [] => Err(CoreError::StepNotFound(format!(
            "no start step in '{}'",
            definition.flow_id
        ))),
        _ => Err(CoreError::StateConflict(format!(
            "'{}' has {} start steps; name one in the request",
            definition.flow_id,
            starts.len()
        ))),
    }
}
