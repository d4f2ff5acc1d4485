//!
//! Procflow Core - durable process execution engine
//!
//! This crate defines the process definition model, the typed variable
//! store, the expression capability and the state machine that drives one
//! process instance step by step. Persistence backends implement the
//! traits in [`domain::repository`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

/// Domain layer - definitions, runtimes and contracts
pub mod domain;

/// Application services
pub mod application;

/// Core types
pub mod types;

/// Error types
pub mod error;

/// Engine configuration
pub mod config;

/// Host doubles and definition fixtures for tests
#[cfg(feature = "testing")]
pub mod testing;

// Re-export key types
pub use config::EngineConfig;
pub use error::{CoreError, CoreResult};
pub use types::{
    ExecutionResult, HandlerOutcome, ProcessInstanceId, ProcessState, StepExecutionStatus,
};

// Re-export main API types for easy use
pub use application::process_service::{
    DomainEventHandler, ExecutionRequest, ProcessExecutionService, ProcessOutcome,
    TracingEventHandler,
};
pub use domain::definition::{
    ActionDefinition, LinkDefinition, ProcessDefinition, SecurityEntry, StepDefinition,
    StepHandlerKind, VarRequired, VariableDefinition, VariableType,
};
pub use domain::environment::{HandlerContext, HostServices, NoHostServices, ProcessEnvironment};
pub use domain::expression::{CompiledExpression, ExpressionEngine, ExpressionScope, JmesPathEngine};
pub use domain::process_runtime::ProcessRuntime;
pub use domain::property_set::{PropertySchema, PropertySet, PropertyType, PropertyValue};
pub use domain::repository::{
    DefinitionRecord, DefinitionRepository, ProcessSnapshot, RuntimeService, UnfrozenProcess,
};
