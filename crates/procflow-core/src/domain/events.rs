use crate::types::ProcessInstanceId;
use chrono::{DateTime, Utc};
use std::fmt::Debug;

/// Domain event trait for all events recorded by a process runtime
pub trait DomainEvent: Debug + Send + Sync {
    /// Returns the type of the event as a string
    fn event_type(&self) -> &'static str;

    /// Returns the process instance this event is associated with
    fn process_instance_id(&self) -> ProcessInstanceId;

    /// Returns the timestamp when the event occurred
    fn timestamp(&self) -> DateTime<Utc>;
}

macro_rules! domain_event {
    ($event:ident, $name:literal) => {
        impl DomainEvent for $event {
            fn event_type(&self) -> &'static str {
                $name
            }

            fn process_instance_id(&self) -> ProcessInstanceId {
                self.process_instance_id
            }

            fn timestamp(&self) -> DateTime<Utc> {
                self.timestamp
            }
        }
    };
}

/// Event: first step of the instance executed
#[derive(Debug)]
pub struct ProcessStarted {
    /// The process instance
    pub process_instance_id: ProcessInstanceId,

    /// Logical id of the process definition
    pub flow_id: String,

    /// The start step that was executed
    pub step_id: String,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

domain_event!(ProcessStarted, "process.started");

/// Event: a step ran to a disposition
#[derive(Debug)]
pub struct StepExecuted {
    /// The process instance
    pub process_instance_id: ProcessInstanceId,

    /// The step that ran
    pub step_id: String,

    /// Resolved next step, if any
    pub next_step: Option<String>,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

domain_event!(StepExecuted, "step.executed");

/// Event: a handler asked to suspend
#[derive(Debug)]
pub struct ProcessSuspended {
    /// The process instance
    pub process_instance_id: ProcessInstanceId,

    /// The step the instance is suspended in
    pub step_id: String,

    /// Correlation id reported by the handler
    pub correlation_id: Option<String>,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

domain_event!(ProcessSuspended, "process.suspended");

/// Event: a suspended instance continued
#[derive(Debug)]
pub struct ProcessResumed {
    /// The process instance
    pub process_instance_id: ProcessInstanceId,

    /// The step the instance was suspended in
    pub step_id: String,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

domain_event!(ProcessResumed, "process.resumed");

/// Event: an end step finished without a next step
#[derive(Debug)]
pub struct ProcessCompleted {
    /// The process instance
    pub process_instance_id: ProcessInstanceId,

    /// The end step
    pub step_id: String,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

domain_event!(ProcessCompleted, "process.completed");

/// Event: a business failure stopped the instance
#[derive(Debug)]
pub struct ProcessFailed {
    /// The process instance
    pub process_instance_id: ProcessInstanceId,

    /// The step that failed
    pub step_id: String,

    /// The error messages
    pub errors: Vec<String>,

    /// The timestamp when the event occurred
    pub timestamp: DateTime<Utc>,
}

domain_event!(ProcessFailed, "process.failed");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_process_started_event() {
        let process_instance_id = ProcessInstanceId::new();
        let timestamp = Utc::now();

        let event = ProcessStarted {
            process_instance_id,
            flow_id: "expense".to_string(),
            step_id: "submit".to_string(),
            timestamp,
        };

        assert_eq!(event.event_type(), "process.started");
        assert_eq!(event.process_instance_id(), process_instance_id);
        assert_eq!(event.timestamp(), timestamp);
    }

    #[test]
    fn test_process_suspended_event() {
        let process_instance_id = ProcessInstanceId::new();
        let timestamp = Utc::now();

        let event = ProcessSuspended {
            process_instance_id,
            step_id: "review".to_string(),
            correlation_id: Some("task-1".to_string()),
            timestamp,
        };

        assert_eq!(event.event_type(), "process.suspended");
        assert_eq!(event.process_instance_id(), process_instance_id);
        assert_eq!(event.timestamp(), timestamp);
    }

    #[test]
    fn test_event_type_names() {
        let id = ProcessInstanceId::new();
        let timestamp = Utc::now();
        let events: Vec<Box<dyn DomainEvent>> = vec![
            Box::new(StepExecuted {
                process_instance_id: id,
                step_id: "a".to_string(),
                next_step: None,
                timestamp,
            }),
            Box::new(ProcessResumed {
                process_instance_id: id,
                step_id: "a".to_string(),
                timestamp,
            }),
            Box::new(ProcessCompleted {
                process_instance_id: id,
                step_id: "a".to_string(),
                timestamp,
            }),
            Box::new(ProcessFailed {
                process_instance_id: id,
                step_id: "a".to_string(),
                errors: vec!["boom".to_string()],
                timestamp,
            }),
        ];

        let names: Vec<_> = events.iter().map(|e| e.event_type()).collect();
        assert_eq!(
            names,
            vec!["step.executed", "process.resumed", "process.completed", "process.failed"]
        );
        assert!(events.iter().all(|e| e.process_instance_id() == id));
    }
}
