/// Process definition model
pub mod definition;

/// Content fingerprint of definitions
pub mod fingerprint;

/// Typed variable store
pub mod property_set;

/// Expression capability
pub mod expression;

/// Host environment and delegation points
pub mod environment;

/// Step handler implementations
pub mod handler;

/// Step runtime
pub mod step_runtime;

/// Link runtime
pub mod link_runtime;

/// Process runtime state machine
pub mod process_runtime;

/// Domain events
pub mod events;

/// Persistence contracts
pub mod repository;
