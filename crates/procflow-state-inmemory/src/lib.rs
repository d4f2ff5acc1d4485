//! In-memory state store implementation for procflow
//!
//! This crate provides in-memory implementations of the persistence
//! contracts defined in the procflow-core crate. It is primarily useful for
//! development, testing, and simple deployments where persistence is not required.

use std::sync::Arc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::info;
use uuid::Uuid;

pub mod repositories;
pub use repositories::{
    InMemoryDefinitionRepository,
    InMemoryRuntimeService,
};

use procflow_core::{
    domain::repository::{DefinitionRecord, DefinitionRepository},
    ExpressionEngine, JmesPathEngine, ProcessInstanceId,
};

/// Provider for in-memory state store repositories
pub struct InMemoryStateStoreProvider {
    // Shared storage for definitions
    definitions: Arc<RwLock<HashMap<Uuid, DefinitionRecord>>>,

    // Shared storage for frozen instances
    snapshots: Arc<RwLock<HashMap<ProcessInstanceId, String>>>,
}

impl InMemoryStateStoreProvider {
    /// Create a new in-memory state store provider
    pub fn new() -> Self {
        Self {
            definitions: Arc::new(RwLock::new(HashMap::new())),
            snapshots: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Create the definition repository and a runtime service compiling with `engine`
    pub fn create_repositories(
        &self,
        engine: Arc<dyn ExpressionEngine>,
    ) -> (Arc<InMemoryDefinitionRepository>, Arc<InMemoryRuntimeService>) {
        info!(language = engine.language(), "Creating in-memory state store");

        let definition_repo = Arc::new(InMemoryDefinitionRepository::new(
            self.definitions.clone(),
        ));

        let runtime_service = Arc::new(InMemoryRuntimeService::new(
            definition_repo.clone() as Arc<dyn DefinitionRepository>,
            self.snapshots.clone(),
            engine,
        ));

        (definition_repo, runtime_service)
    }

    /// Like [`create_repositories`](Self::create_repositories) with the JMESPath engine
    pub fn create_default_repositories(
        &self,
    ) -> (Arc<InMemoryDefinitionRepository>, Arc<InMemoryRuntimeService>) {
        self.create_repositories(Arc::new(JmesPathEngine::new()))
    }
}

impl Default for InMemoryStateStoreProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests;
