use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Value object: process instance id, distinct from the definition id
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProcessInstanceId(pub Uuid);

impl ProcessInstanceId {
    /// Generate a fresh instance id
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessInstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Process instance state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcessState {
    /// Created, no step has run yet
    NotStarted,
    /// Between steps, ready for the next `execute`
    Ready,
    /// Waiting for external work, resumed with `resume`
    Suspended,
    /// A step failed; terminal until recovered
    Failed,
    /// An end step finished
    Completed,
}

impl ProcessState {
    /// Whether no further `execute` call changes the instance
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Completed | ProcessState::Failed)
    }
}

/// Disposition of a single step execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StepExecutionStatus {
    /// Step finished, the process can move on
    Ready,
    /// Step is waiting for external work
    Suspend,
    /// Step failed
    Failed,
    /// Process reached its end; only produced by the engine
    Completed,
}

/// Result returned by handlers and host delegation points
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    /// Reported status
    pub status: StepExecutionStatus,

    /// Correlation id of the external work, if any
    pub correlation_id: Option<String>,

    /// Error messages when the status is `Failed`
    pub error_messages: Vec<String>,
}

impl HandlerOutcome {
    /// Successful outcome
    pub fn ready() -> Self {
        Self {
            status: StepExecutionStatus::Ready,
            correlation_id: None,
            error_messages: Vec::new(),
        }
    }

    /// Outcome asking the process to suspend until `correlation_id` completes
    pub fn suspend(correlation_id: impl Into<String>) -> Self {
        Self {
            status: StepExecutionStatus::Suspend,
            correlation_id: Some(correlation_id.into()),
            error_messages: Vec::new(),
        }
    }

    /// Failed outcome carrying one message
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StepExecutionStatus::Failed,
            correlation_id: None,
            error_messages: vec![message.into()],
        }
    }
}

/// Result of `execute`/`resume` on a process runtime
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Step disposition
    pub status: StepExecutionStatus,

    /// Step the result refers to (the step just run, or the last executed one)
    pub step: Option<String>,

    /// Resolved next step, when the status is `Ready`
    pub next_step: Option<String>,

    /// Business error messages
    pub error_messages: Vec<String>,
}

impl ExecutionResult {
    pub(crate) fn new(status: StepExecutionStatus, step: Option<String>) -> Self {
        Self {
            status,
            step,
            next_step: None,
            error_messages: Vec::new(),
        }
    }

    pub(crate) fn with_next(mut self, next_step: Option<String>) -> Self {
        self.next_step = next_step;
        self
    }

    pub(crate) fn with_errors(mut self, error_messages: Vec<String>) -> Self {
        self.error_messages = error_messages;
        self
    }

    /// Whether the step failed
    #[inline]
    pub fn is_failed(&self) -> bool {
        self.status == StepExecutionStatus::Failed
    }
}
