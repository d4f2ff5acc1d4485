use crate::InMemoryStateStoreProvider;
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pretty_assertions::assert_eq;
use procflow_core::{
    domain::events::DomainEvent,
    domain::repository::{DefinitionRepository, RuntimeService},
    testing::{approval_definition, init_test_tracing, linear_definition, ScriptedHost},
    CoreError, DomainEventHandler, EngineConfig, ExecutionRequest, LinkDefinition,
    ProcessDefinition, ProcessEnvironment, ProcessExecutionService, ProcessState, PropertySchema,
    StepDefinition, StepExecutionStatus,
};
use serde_json::json;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct CollectingHandler {
    events: Mutex<Vec<String>>,
}

#[async_trait]
impl DomainEventHandler for CollectingHandler {
    async fn handle_event(&self, event: Box<dyn DomainEvent>) -> Result<(), CoreError> {
        self.events.lock().await.push(event.event_type().to_string());
        Ok(())
    }
}

#[tokio::test]
async fn test_definition_repository() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let (definition_repo, _) = provider.create_default_repositories();

    let first = definition_repo.save(approval_definition()).await?;
    assert!(first.is_active);
    assert_eq!(first.fingerprint, first.definition.fingerprint());

    // same content built again gets fresh ids but the same fingerprint
    let duplicate = definition_repo.save(approval_definition()).await;
    assert!(matches!(duplicate, Err(CoreError::DuplicateDefinition(_))));

    let second = definition_repo
        .save(approval_definition().with_version(2).with_description("v2"))
        .await?;
    let latest = definition_repo.find_latest("expense").await?.unwrap();
    assert_eq!(latest.definition.id, second.definition.id);

    definition_repo.set_active(second.definition.id, false).await?;
    let latest = definition_repo.find_latest("expense").await?.unwrap();
    assert_eq!(latest.definition.id, first.definition.id);

    let found = definition_repo.find_by_fingerprint(&first.fingerprint).await?.unwrap();
    assert_eq!(found.definition.id, first.definition.id);
    assert_eq!(definition_repo.find_all().await?.len(), 2);

    let missing = definition_repo.set_active(uuid::Uuid::new_v4(), true).await;
    assert!(matches!(missing, Err(CoreError::DefinitionNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_create_checks_definition_identity() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let (definition_repo, runtime_service) = provider.create_default_repositories();
    let record = definition_repo.save(linear_definition()).await?;
    let variables = record.definition.property_set()?;

    let unknown = runtime_service
        .create(Arc::new(approval_definition()), &variables)
        .await;
    assert!(matches!(unknown, Err(CoreError::DefinitionNotFound(_))));

    // same storage id, edited content
    let mut edited = (*record.definition).clone();
    edited.steps[1].on_entry = Some("`true`".to_string());
    let mismatch = runtime_service.create(Arc::new(edited), &variables).await;
    assert!(matches!(mismatch, Err(CoreError::FingerprintMismatch { .. })));

    definition_repo.set_active(record.definition.id, false).await?;
    let inactive = runtime_service.create(record.definition.clone(), &variables).await;
    assert!(matches!(inactive, Err(CoreError::DefinitionInactive(_))));

    definition_repo.set_active(record.definition.id, true).await?;
    let runtime = runtime_service.create(record.definition.clone(), &variables).await?;
    assert_eq!(runtime.state(), ProcessState::NotStarted);

    // created instances are frozen right away
    let snapshot = runtime_service.snapshot(runtime.id()).await?.unwrap();
    assert_eq!(snapshot.status, ProcessState::NotStarted);
    assert_eq!(snapshot.fingerprint, record.fingerprint);
    Ok(())
}

#[tokio::test]
async fn test_freeze_unfreeze_fidelity() -> Result<(), CoreError> {
    init_test_tracing();
    let provider = InMemoryStateStoreProvider::new();
    let (definition_repo, runtime_service) = provider.create_default_repositories();
    let record = definition_repo.save(approval_definition()).await?;

    let mut variables = record.definition.property_set()?;
    variables.add_with_value("ratio", 0.1 + 0.2, PropertySchema::decimal())?;
    variables.add_with_value("big", i64::MIN, PropertySchema::long())?;
    variables.add_with_value("grade", 'B', PropertySchema::char())?;
    variables.add_with_value(
        "due",
        Utc.timestamp_opt(1_700_000_000, 987_654_321).unwrap(),
        PropertySchema::date_time(),
    )?;
    variables.add_with_value("blob", vec![1u8, 2, 254], PropertySchema::bytes())?;
    variables.add_with_value("doc", json!({"lines": [1, 2.5]}), PropertySchema::json())?;
    variables.add("order", PropertySchema::object("Order"))?;
    variables.set_object("order", &json!({"id": 7, "paid": false}))?;

    let mut runtime = runtime_service.create(record.definition.clone(), &variables).await?;
    let mut env = ProcessEnvironment::with_host(variables, ScriptedHost::new().shared());
    env.properties_mut().set("amount", 120)?;
    runtime.execute("submit", &mut env).await?;
    let result = runtime.execute("review", &mut env).await?;
    assert_eq!(result.status, StepExecutionStatus::Suspend);

    runtime_service.freeze(&runtime, env.properties()).await?;
    let unfrozen = runtime_service.try_unfreeze(runtime.id()).await?.unwrap();

    assert_eq!(&unfrozen.variables, env.properties());
    assert_eq!(unfrozen.variables.get::<i32>("amount")?, 120);
    assert_eq!(unfrozen.variables.get::<f64>("ratio")?, 0.1 + 0.2);
    assert_eq!(unfrozen.variables.get::<i64>("big")?, i64::MIN);
    assert_eq!(unfrozen.variables.get::<char>("grade")?, 'B');
    assert_eq!(
        unfrozen.variables.get::<chrono::DateTime<Utc>>("due")?,
        Utc.timestamp_opt(1_700_000_000, 987_654_321).unwrap()
    );
    assert_eq!(unfrozen.variables.get::<Vec<u8>>("blob")?, vec![1u8, 2, 254]);
    assert_eq!(unfrozen.variables.get::<serde_json::Value>("doc")?, json!({"lines": [1, 2.5]}));
    assert_eq!(
        unfrozen.variables.get_object::<serde_json::Value>("order")?,
        json!({"id": 7, "paid": false})
    );
    assert!(!unfrozen.variables.is_set("status"));

    let restored = unfrozen.runtime;
    assert_eq!(restored.id(), runtime.id());
    assert_eq!(restored.state(), ProcessState::Suspended);
    assert_eq!(restored.suspended_in_step(), Some("review"));
    assert_eq!(restored.last_executed_step(), Some("review"));
    assert_eq!(unfrozen.next_step, None);
    Ok(())
}

#[tokio::test]
async fn test_unfreeze_unknown_instance() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let (_, runtime_service) = provider.create_default_repositories();
    let found = runtime_service
        .try_unfreeze(procflow_core::ProcessInstanceId::new())
        .await?;
    assert!(found.is_none());
    Ok(())
}

#[tokio::test]
async fn test_unreadable_snapshot_is_a_store_error() -> Result<(), CoreError> {
    let snapshots = Arc::new(tokio::sync::RwLock::new(std::collections::HashMap::new()));
    let definitions = Arc::new(crate::InMemoryDefinitionRepository::new(Arc::default()));
    let runtime_service = crate::InMemoryRuntimeService::new(
        definitions,
        snapshots.clone(),
        Arc::new(procflow_core::JmesPathEngine::new()),
    );

    let instance_id = procflow_core::ProcessInstanceId::new();
    snapshots
        .write()
        .await
        .insert(instance_id, "{ not a snapshot".to_string());

    let result = runtime_service.try_unfreeze(instance_id).await;
    assert!(matches!(result, Err(CoreError::StateStoreError(_))));
    Ok(())
}

#[tokio::test]
async fn test_service_suspends_and_resumes() -> Result<(), CoreError> {
    init_test_tracing();
    let provider = InMemoryStateStoreProvider::new();
    let (definition_repo, runtime_service) = provider.create_default_repositories();
    let record = definition_repo.save(approval_definition()).await?;

    let host = ScriptedHost::new().shared();
    let events = Arc::new(CollectingHandler::default());
    let service = ProcessExecutionService::new(runtime_service.clone(), EngineConfig::default())
        .with_host(host.clone())
        .with_event_handler(events.clone());

    let mut variables = record.definition.property_set()?;
    variables.set("amount", 75)?;
    let started = service
        .start(record.definition.clone(), variables, ExecutionRequest::new())
        .await?;
    assert_eq!(started.state, ProcessState::Suspended);
    assert_eq!(started.steps_executed, 2);
    assert_eq!(started.last_result.step.as_deref(), Some("review"));
    assert_eq!(host.calls().await, vec!["task:review"]);

    // definition deactivation does not strand running instances
    definition_repo.set_active(record.definition.id, false).await?;

    let resumed = service
        .resume(
            started.instance_id,
            ExecutionRequest::new().with_variable("approved", json!(true)),
        )
        .await?;
    assert_eq!(resumed.state, ProcessState::Completed);
    assert_eq!(resumed.last_result.step.as_deref(), Some("approve"));
    assert_eq!(resumed.variables.get::<String>("status")?, "approved");

    let snapshot = runtime_service.snapshot(started.instance_id).await?.unwrap();
    assert_eq!(snapshot.status, ProcessState::Completed);

    assert_eq!(
        *events.events.lock().await,
        vec![
            "process.started",
            "step.executed",
            "process.suspended",
            "process.resumed",
            "step.executed",
            "step.executed",
            "process.completed",
        ]
    );

    // completed instances answer with their final result
    let again = service.resume(started.instance_id, ExecutionRequest::new()).await?;
    assert_eq!(again.state, ProcessState::Completed);
    assert_eq!(again.last_result.status, StepExecutionStatus::Completed);
    Ok(())
}

#[tokio::test]
async fn test_service_transition_applies_to_first_resolution() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let (definition_repo, runtime_service) = provider.create_default_repositories();
    let record = definition_repo.save(approval_definition()).await?;
    let service = ProcessExecutionService::new(runtime_service, EngineConfig::default())
        .with_host(ScriptedHost::new().shared());

    let mut variables = record.definition.property_set()?;
    variables.set("amount", 75)?;
    let started = service
        .start(record.definition.clone(), variables, ExecutionRequest::new())
        .await?;

    let resumed = service
        .resume(
            started.instance_id,
            ExecutionRequest::new()
                .with_variable("approved", json!(true))
                .with_transition("rejected"),
        )
        .await?;
    assert_eq!(resumed.state, ProcessState::Completed);
    assert_eq!(resumed.variables.get::<String>("status")?, "rejected");
    Ok(())
}

#[tokio::test]
async fn test_service_step_limit_yields() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let (definition_repo, runtime_service) = provider.create_default_repositories();
    let record = definition_repo.save(linear_definition()).await?;
    let config = EngineConfig {
        max_steps_per_run: 2,
        ..EngineConfig::default()
    };
    let service = ProcessExecutionService::new(runtime_service, config);

    let variables = record.definition.property_set()?;
    let started = service
        .start(record.definition.clone(), variables, ExecutionRequest::new())
        .await?;
    assert_eq!(started.state, ProcessState::Ready);
    assert_eq!(started.steps_executed, 2);
    assert_eq!(started.last_result.next_step.as_deref(), Some("finish"));

    let resumed = service.resume(started.instance_id, ExecutionRequest::new()).await?;
    assert_eq!(resumed.state, ProcessState::Completed);
    assert_eq!(resumed.steps_executed, 1);
    Ok(())
}

#[tokio::test]
async fn test_service_failures_are_frozen() -> Result<(), CoreError> {
    let provider = InMemoryStateStoreProvider::new();
    let (definition_repo, runtime_service) = provider.create_default_repositories();
    let record = definition_repo.save(approval_definition()).await?;
    let service = ProcessExecutionService::new(runtime_service.clone(), EngineConfig::default());

    let variables = record.definition.property_set()?;
    let started = service
        .start(record.definition.clone(), variables, ExecutionRequest::new())
        .await?;
    assert_eq!(started.state, ProcessState::Failed);
    assert!(started.last_result.is_failed());

    let snapshot = runtime_service.snapshot(started.instance_id).await?.unwrap();
    assert_eq!(snapshot.status, ProcessState::Failed);
    assert_eq!(snapshot.errors, started.last_result.error_messages);

    let missing = service
        .resume(procflow_core::ProcessInstanceId::new(), ExecutionRequest::new())
        .await;
    assert!(matches!(missing, Err(CoreError::InstanceNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_service_guard_error_is_frozen_as_failure() -> Result<(), CoreError> {
    let start = StepDefinition::new("start").start();
    let a = StepDefinition::new("a").end();
    let b = StepDefinition::new("b").end();
    let definition = ProcessDefinition::new("broken-guard", "Broken guard")
        .with_link(LinkDefinition::new(&start, &a, "a").with_guard("set missing = `1`"))
        .with_link(LinkDefinition::new(&start, &b, "b").with_guard("`true`"))
        .with_step(start)
        .with_step(a)
        .with_step(b);

    let provider = InMemoryStateStoreProvider::new();
    let (definition_repo, runtime_service) = provider.create_default_repositories();
    let record = definition_repo.save(definition).await?;
    let service = ProcessExecutionService::new(runtime_service.clone(), EngineConfig::default());

    let started = service
        .start(record.definition.clone(), record.definition.property_set()?, ExecutionRequest::new())
        .await?;
    assert_eq!(started.state, ProcessState::Failed);
    assert_eq!(started.last_result.step.as_deref(), Some("start"));
    assert_eq!(started.last_result.error_messages.len(), 1);

    let snapshot = runtime_service.snapshot(started.instance_id).await?.unwrap();
    assert_eq!(snapshot.status, ProcessState::Failed);
    assert_eq!(snapshot.last_executed_step.as_deref(), Some("start"));
    assert_eq!(snapshot.next_step, None);

    let resumed = service.resume(started.instance_id, ExecutionRequest::new()).await?;
    assert_eq!(resumed.state, ProcessState::Failed);
    assert_eq!(resumed.last_result.error_messages, started.last_result.error_messages);
    Ok(())
}
