use thiserror::Error;

/// Core error type for the procflow engine.
///
/// Only programmer/state-contract violations and external dependency failures
/// are reported through this type. Business failures (missing variables,
/// failing validations, handler-reported failures) travel as
/// [`ExecutionResult`](crate::types::ExecutionResult) data instead.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// Step not found in the bound definition
    #[error("Step not found: {0}")]
    StepNotFound(String),

    /// Operation not allowed in the current process state
    #[error("State conflict: {0}")]
    StateConflict(String),

    /// A handler reported a status the engine does not accept
    #[error("Invalid handler status: {0}")]
    InvalidHandlerStatus(String),

    /// One or more expressions failed to compile
    #[error("Compilation error: {}", .0.join("; "))]
    CompilationError(Vec<String>),

    /// Expression evaluation error
    #[error("Expression evaluation error: {0}")]
    ExpressionError(String),

    /// Variable is not declared in the property set
    #[error("Variable not found: {0}")]
    VariableNotFound(String),

    /// Variable is declared but holds no value
    #[error("Variable not set: {0}")]
    VariableNotSet(String),

    /// Variable declared twice
    #[error("Duplicate variable: {0}")]
    DuplicateVariable(String),

    /// Requested type disagrees with the declared schema
    #[error("Type mismatch for '{name}': declared {declared}, requested {requested}")]
    TypeMismatch {
        /// Variable name
        name: String,
        /// Type declared by the schema
        declared: String,
        /// Type requested by the caller
        requested: String,
    },

    /// Value rejected by a schema constraint
    #[error("Constraint violation for '{name}': {reason}")]
    ConstraintViolation {
        /// Variable name
        name: String,
        /// Which constraint failed
        reason: String,
    },

    /// Process definition not found
    #[error("Process definition not found: {0}")]
    DefinitionNotFound(String),

    /// Process definition exists but is not active
    #[error("Process definition is not active: {0}")]
    DefinitionInactive(String),

    /// A definition with identical content is already stored
    #[error("Duplicate process definition content: {0}")]
    DuplicateDefinition(String),

    /// Definition content does not match the stored copy
    #[error("Fingerprint mismatch for definition {definition}: expected {expected}, found {found}")]
    FingerprintMismatch {
        /// Definition id
        definition: String,
        /// Fingerprint of the stored copy
        expected: String,
        /// Fingerprint of the presented copy
        found: String,
    },

    /// Process instance not found
    #[error("Process instance not found: {0}")]
    InstanceNotFound(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// State store error
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// External dependency error
    #[error("External dependency error: {0}")]
    ExternalDependencyError(String),
}

/// Result alias used across the crate
pub type CoreResult<T> = Result<T, CoreError>;

impl From<serde_json::Error> for CoreError {
    fn from(err: serde_json::Error) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for CoreError {
    fn from(err: base64::DecodeError) -> Self {
        CoreError::SerializationError(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let errors = vec![
            (CoreError::StepNotFound("review".to_string()), "Step not found: review"),
            (
                CoreError::StateConflict("suspended".to_string()),
                "State conflict: suspended",
            ),
            (
                CoreError::CompilationError(vec!["a".to_string(), "b".to_string()]),
                "Compilation error: a; b",
            ),
            (
                CoreError::TypeMismatch {
                    name: "amount".to_string(),
                    declared: "Int".to_string(),
                    requested: "String".to_string(),
                },
                "Type mismatch for 'amount': declared Int, requested String",
            ),
            (
                CoreError::ConstraintViolation {
                    name: "amount".to_string(),
                    reason: "below minimum".to_string(),
                },
                "Constraint violation for 'amount': below minimum",
            ),
            (
                CoreError::InstanceNotFound("42".to_string()),
                "Process instance not found: 42",
            ),
        ];

        for (error, expected_msg) in errors {
            assert_eq!(error.to_string(), expected_msg);
        }
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_error = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let error: CoreError = json_error.into();

        match error {
            CoreError::SerializationError(msg) => assert!(msg.contains("expected value")),
            _ => panic!("Expected SerializationError variant"),
        }
    }
}
