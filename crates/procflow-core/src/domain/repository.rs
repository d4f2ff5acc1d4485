//! Persistence contracts of the engine
//!
//! The engine only needs the three runtime-service operations below plus a
//! definition store that knows content fingerprints and active flags.
//! External crates implement these traits for concrete backends.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::definition::ProcessDefinition;
use super::process_runtime::ProcessRuntime;
use super::property_set::{FrozenVariable, PropertySet};
use crate::types::{ProcessInstanceId, ProcessState};
use crate::CoreError;

/// Persisted execution state of one process instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessSnapshot {
    /// The instance
    pub instance_id: ProcessInstanceId,

    /// Storage id of the bound definition
    pub definition_id: Uuid,

    /// Logical id of the bound definition
    pub flow_id: String,

    /// Version of the bound definition
    pub version: u32,

    /// Content fingerprint of the bound definition
    pub fingerprint: String,

    /// Instance state
    pub status: ProcessState,

    /// Step the instance is suspended in
    pub suspended_step: Option<String>,

    /// Resolved next step
    pub next_step: Option<String>,

    /// Last step whose handler ran
    pub last_executed_step: Option<String>,

    /// Errors of the last failure
    #[serde(default)]
    pub errors: Vec<String>,

    /// Frozen variable store
    pub variables: Vec<FrozenVariable>,

    /// When the snapshot was taken
    pub timestamp: DateTime<Utc>,
}

/// A stored definition with its identity data
#[derive(Debug, Clone)]
pub struct DefinitionRecord {
    /// The definition
    pub definition: Arc<ProcessDefinition>,

    /// Content fingerprint computed at save time
    pub fingerprint: String,

    /// Whether new instances may bind to it
    pub is_active: bool,

    /// When it was stored
    pub created_at: DateTime<Utc>,
}

/// Runtime reconstructed from a snapshot
#[derive(Debug)]
pub struct UnfrozenProcess {
    /// Runtime with its status and step pointers restored
    pub runtime: ProcessRuntime,

    /// Step to execute next when not suspended
    pub next_step: Option<String>,

    /// Restored variable store
    pub variables: PropertySet,
}

/// Repository for process definitions
#[async_trait]
pub trait DefinitionRepository: Send + Sync {
    /// Store a new definition; duplicate content is rejected
    async fn save(&self, definition: ProcessDefinition) -> Result<DefinitionRecord, CoreError>;

    /// Find a definition by storage id
    async fn find_by_id(&self, id: Uuid) -> Result<Option<DefinitionRecord>, CoreError>;

    /// Find a definition by content fingerprint
    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<DefinitionRecord>, CoreError>;

    /// Highest active version of a flow
    async fn find_latest(&self, flow_id: &str) -> Result<Option<DefinitionRecord>, CoreError>;

    /// Activate or deactivate a definition
    async fn set_active(&self, id: Uuid, active: bool) -> Result<(), CoreError>;

    /// All stored definitions
    async fn find_all(&self) -> Result<Vec<DefinitionRecord>, CoreError>;
}

/// Durability contract wrapped around a raw runtime
#[async_trait]
pub trait RuntimeService: Send + Sync {
    /// Bind a fresh runtime to `definition`.
    ///
    /// Implementations must check that the definition is stored, active and
    /// that its content fingerprint matches the stored copy.
    async fn create(
        &self,
        definition: Arc<ProcessDefinition>,
        variables: &PropertySet,
    ) -> Result<ProcessRuntime, CoreError>;

    /// Persist the runtime and its variables, replacing any prior snapshot
    async fn freeze(
        &self,
        runtime: &ProcessRuntime,
        variables: &PropertySet,
    ) -> Result<(), CoreError>;

    /// Rebuild a runtime from its latest snapshot, `None` if unknown
    async fn try_unfreeze(
        &self,
        instance_id: ProcessInstanceId,
    ) -> Result<Option<UnfrozenProcess>, CoreError>;
}
