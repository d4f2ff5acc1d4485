use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use procflow_core::{
    CoreError,
    domain::process_runtime::ProcessRuntime,
    domain::repository::{
        DefinitionRecord,
        DefinitionRepository,
        ProcessSnapshot,
        RuntimeService,
        UnfrozenProcess,
    },
    ExpressionEngine, ProcessDefinition, ProcessInstanceId, PropertySet,
};

/// In-memory implementation of the DefinitionRepository
pub struct InMemoryDefinitionRepository {
    definitions: Arc<RwLock<HashMap<Uuid, DefinitionRecord>>>,
}

impl InMemoryDefinitionRepository {
    /// Create a new in-memory definition repository
    pub fn new(definitions: Arc<RwLock<HashMap<Uuid, DefinitionRecord>>>) -> Self {
        Self { definitions }
    }
}

#[async_trait]
impl DefinitionRepository for InMemoryDefinitionRepository {
    async fn save(&self, definition: ProcessDefinition) -> Result<DefinitionRecord, CoreError> {
        let fingerprint = definition.fingerprint();
        let mut definitions = self.definitions.write().await;

        if let Some(existing) = definitions.values().find(|r| r.fingerprint == fingerprint) {
            warn!(flow = %definition.flow_id, "Rejected definition with duplicate content");
            return Err(CoreError::DuplicateDefinition(format!(
                "'{}' has the same content as stored definition {}",
                definition.flow_id, existing.definition.id
            )));
        }
        if definitions.contains_key(&definition.id) {
            return Err(CoreError::DuplicateDefinition(format!(
                "definition id {} already stored",
                definition.id
            )));
        }

        let record = DefinitionRecord {
            definition: Arc::new(definition),
            fingerprint,
            is_active: true,
            created_at: Utc::now(),
        };
        debug!(
            flow = %record.definition.flow_id,
            version = record.definition.version,
            "Stored definition"
        );
        definitions.insert(record.definition.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<DefinitionRecord>, CoreError> {
        let definitions = self.definitions.read().await;
        Ok(definitions.get(&id).cloned())
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DefinitionRecord>, CoreError> {
        let definitions = self.definitions.read().await;
        Ok(definitions
            .values()
            .find(|r| r.fingerprint == fingerprint)
            .cloned())
    }

    async fn find_latest(&self, flow_id: &str) -> Result<Option<DefinitionRecord>, CoreError> {
        let definitions = self.definitions.read().await;
        Ok(definitions
            .values()
            .filter(|r| r.is_active && r.definition.flow_id == flow_id)
            .max_by_key(|r| r.definition.version)
            .cloned())
    }

    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), CoreError> {
        let mut definitions = self.definitions.write().await;
        let record = definitions
            .get_mut(&id)
            .ok_or_else(|| CoreError::DefinitionNotFound(id.to_string()))?;
        record.is_active = active;
        debug!(definition = %id, active, "Definition activation changed");
        Ok(())
    }

    async fn find_all(&self) -> Result<Vec<DefinitionRecord>, CoreError> {
        let definitions = self.definitions.read().await;
        let mut records: Vec<_> = definitions.values().cloned().collect();
        records.sort_by(|a, b| {
            (&a.definition.flow_id, a.definition.version)
                .cmp(&(&b.definition.flow_id, b.definition.version))
        });
        Ok(records)
    }
}

/// In-memory implementation of the RuntimeService.
/// Snapshots are kept as JSON text so every freeze goes through the same
/// encoding a durable store would use.
pub struct InMemoryRuntimeService {
    definitions: Arc<dyn DefinitionRepository>,
    snapshots: Arc<RwLock<HashMap<ProcessInstanceId, String>>>,
    engine: Arc<dyn ExpressionEngine>,
}

impl InMemoryRuntimeService {
    /// Create a new in-memory runtime service
    pub fn new(
        definitions: Arc<dyn DefinitionRepository>,
        snapshots: Arc<RwLock<HashMap<ProcessInstanceId, String>>>,
        engine: Arc<dyn ExpressionEngine>,
    ) -> Self {
        Self {
            definitions,
            snapshots,
            engine,
        }
    }

    /// Latest snapshot of an instance, decoded
    pub async fn snapshot(
        &self,
        instance_id: ProcessInstanceId,
    ) -> Result<Option<ProcessSnapshot>, CoreError> {
        let snapshots = self.snapshots.read().await;
        match snapshots.get(&instance_id) {
            Some(text) => serde_json::from_str(text).map(Some).map_err(|e| {
                CoreError::StateStoreError(format!(
                    "stored snapshot of {} is unreadable: {}",
                    instance_id, e
                ))
            }),
            None => Ok(None),
        }
    }

    /// Forget an instance
    pub async fn remove(&self, instance_id: ProcessInstanceId) -> bool {
        let mut snapshots = self.snapshots.write().await;
        snapshots.remove(&instance_id).is_some()
    }
}

#[async_trait]
impl RuntimeService for InMemoryRuntimeService {
    async fn create(
        &self,
        definition: Arc<ProcessDefinition>,
        variables: &PropertySet,
    ) -> Result<ProcessRuntime, CoreError> {
        let record = self
            .definitions
            .find_by_id(definition.id)
            .await?
            .ok_or_else(|| CoreError::DefinitionNotFound(definition.id.to_string()))?;

        if !record.is_active {
            return Err(CoreError::DefinitionInactive(format!(
                "{} version {}",
                record.definition.flow_id, record.definition.version
            )));
        }

        let found = definition.fingerprint();
        if found != record.fingerprint {
            return Err(CoreError::FingerprintMismatch {
                definition: definition.flow_id.clone(),
                expected: record.fingerprint,
                found,
            });
        }

        let runtime = ProcessRuntime::create(record.definition, self.engine.as_ref())?;
        self.freeze(&runtime, variables).await?;
        Ok(runtime)
    }

    async fn freeze(
        &self,
        runtime: &ProcessRuntime,
        variables: &PropertySet,
    ) -> Result<(), CoreError> {
        let snapshot = runtime.snapshot(variables)?;
        let text = serde_json::to_string(&snapshot)?;

        let mut snapshots = self.snapshots.write().await;
        snapshots.insert(runtime.id(), text);
        debug!(instance = %runtime.id(), status = ?snapshot.status, "Froze process instance");
        Ok(())
    }

    async fn try_unfreeze(
        &self,
        instance_id: ProcessInstanceId,
    ) -> Result<Option<UnfrozenProcess>, CoreError> {
        let Some(snapshot) = self.snapshot(instance_id).await? else {
            return Ok(None);
        };

        // instances keep running on deactivated definitions
        let record = self
            .definitions
            .find_by_id(snapshot.definition_id)
            .await?
            .ok_or_else(|| CoreError::DefinitionNotFound(snapshot.definition_id.to_string()))?;

        let (runtime, variables) =
            ProcessRuntime::restore(record.definition, self.engine.as_ref(), &snapshot)?;
        debug!(instance = %instance_id, status = ?snapshot.status, "Unfroze process instance");

        Ok(Some(UnfrozenProcess {
            runtime,
            next_step: snapshot.next_step,
            variables,
        }))
    }
}
