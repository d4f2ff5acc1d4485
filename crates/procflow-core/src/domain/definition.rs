//! Immutable process definition model.
//!
//! Definitions are produced once by an external builder and never mutated
//! afterwards. The chainable constructors below exist for hosts and tests
//! that assemble small definitions in code; they perform no validation.

use crate::domain::property_set::{PropertySchema, PropertySet};
use crate::error::CoreResult;
use serde::{Deserialize, Serialize};
use std::ops::BitOr;
use uuid::Uuid;

/// A process definition: steps, directed links and typed variables
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessDefinition {
    /// Definition id
    pub id: Uuid,

    /// Logical flow name
    pub flow_id: String,

    /// Definition version
    pub version: u32,

    /// Human-readable name
    pub name: String,

    /// Description of the process
    pub description: Option<String>,

    /// Steps in declaration order
    pub steps: Vec<StepDefinition>,

    /// Links in declaration order
    pub links: Vec<LinkDefinition>,

    /// Declared process variables
    pub variables: Vec<VariableDefinition>,
}

/// Identity pair of a step: storage id plus logical step id
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepRef {
    /// Step storage id
    pub id: Uuid,
    /// Logical step id
    pub step_id: String,
}

/// A step in a process
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Step storage id
    pub id: Uuid,

    /// Logical step id, unique within a definition
    pub step_id: String,

    /// Description of the step
    pub description: Option<String>,

    /// Whether the process may start here
    pub is_start: bool,

    /// Whether the process may complete here
    pub is_end: bool,

    /// Validation expression run before the handler
    pub on_entry: Option<String>,

    /// Validation expression run after the handler
    pub on_exit: Option<String>,

    /// Actions offered to the step's owners
    pub actions: Vec<ActionDefinition>,

    /// Accounts allowed to work on the step
    pub potential_owners: Vec<SecurityEntry>,

    /// Accounts administering the step
    pub business_managers: Vec<SecurityEntry>,

    /// Variable contracts of the step
    pub variables_map: Vec<VariableMapping>,

    /// Handler invoked when the step runs
    pub handler: StepHandlerKind,
}

/// Handler selection with its handler-specific payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum StepHandlerKind {
    /// No handler; the step always succeeds
    None,
    /// Inline script executed by the expression engine
    Script {
        /// Script body
        script: String,
    },
    /// Human task created through the host
    Task,
    /// Named service looked up through the host
    IoC {
        /// Service name
        name: String,
    },
    /// Dynamically loaded service class run through the host
    Service {
        /// Class or service identifier
        class_name: String,
    },
}

/// An action a step offers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionDefinition {
    /// Action name
    pub name: String,
    /// Description of the action
    pub description: Option<String>,
    /// Whether the action may be skipped
    pub skippable: bool,
    /// Script run by the action, if any
    pub script: Option<String>,
}

/// Kind of account referenced by a security entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountType {
    /// Single user
    User,
    /// Group of users
    Group,
}

/// Account entry used for owners and managers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityEntry {
    /// Account kind
    pub account_type: AccountType,
    /// Account name
    pub name: String,
}

/// Required-on-entry / required-on-exit flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VarRequired(u8);

impl VarRequired {
    /// No requirement
    pub const NONE: VarRequired = VarRequired(0);
    /// Must be set before the step runs
    pub const ON_ENTRY: VarRequired = VarRequired(1);
    /// Must be set after the handler finished
    pub const ON_EXIT: VarRequired = VarRequired(2);

    /// Whether all flags of `other` are set
    #[inline]
    pub fn contains(self, other: VarRequired) -> bool {
        other.0 != 0 && self.0 & other.0 == other.0
    }

    /// Raw bit value
    #[inline]
    pub fn bits(self) -> u8 {
        self.0
    }
}

impl BitOr for VarRequired {
    type Output = VarRequired;

    fn bitor(self, rhs: Self) -> Self::Output {
        VarRequired(self.0 | rhs.0)
    }
}

/// Variable contract of a step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableMapping {
    /// Variable name
    pub name: String,
    /// Requirement flags
    pub required: VarRequired,
}

/// Directed link between two steps
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkDefinition {
    /// Source step
    pub source: StepRef,
    /// Target step
    pub target: StepRef,
    /// Transition name
    pub name: String,
    /// Description of the link
    pub description: Option<String>,
    /// Guard expression
    pub script: Option<String>,
}

/// Declared variable type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VariableType {
    /// Text
    String,
    /// 32-bit integer
    Int,
    /// Decimal number
    Decimal,
    /// Single character
    Char,
    /// Boolean
    Boolean,
    /// Structured payload of a named class
    Object,
    /// Free-form JSON document
    Json,
    /// Untyped
    None,
}

/// Declared process variable
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableDefinition {
    /// Variable name
    pub name: String,
    /// Description of the variable
    pub description: Option<String>,
    /// Declared type
    pub variable_type: VariableType,
    /// Class name for Object/Json payloads
    pub class_name: Option<String>,
}

impl ProcessDefinition {
    /// Create an empty version-1 definition
    pub fn new(flow_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            flow_id: flow_id.into(),
            version: 1,
            name: name.into(),
            description: None,
            steps: Vec::new(),
            links: Vec::new(),
            variables: Vec::new(),
        }
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the version
    pub fn with_version(mut self, version: u32) -> Self {
        self.version = version;
        self
    }

    /// Append a step
    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    /// Append a link
    pub fn with_link(mut self, link: LinkDefinition) -> Self {
        self.links.push(link);
        self
    }

    /// Append a variable
    pub fn with_variable(mut self, variable: VariableDefinition) -> Self {
        self.variables.push(variable);
        self
    }

    /// Find a step by its logical id
    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|step| step.step_id == step_id)
    }

    /// Steps flagged as start steps, in declaration order
    pub fn start_steps(&self) -> impl Iterator<Item = &StepDefinition> {
        self.steps.iter().filter(|step| step.is_start)
    }

    /// Links leaving `step_id`, in declaration order
    pub fn outgoing_links<'a>(
        &'a self,
        step_id: &'a str,
    ) -> impl Iterator<Item = &'a LinkDefinition> + 'a {
        self.links
            .iter()
            .filter(move |link| link.source.step_id == step_id)
    }

    /// Build an empty property set from the declared variables
    pub fn property_set(&self) -> CoreResult<PropertySet> {
        let mut properties = PropertySet::new();
        for variable in &self.variables {
            properties.add(&variable.name, variable.schema())?;
        }
        Ok(properties)
    }
}

impl StepDefinition {
    /// Create a handler-less step
    pub fn new(step_id: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            step_id: step_id.into(),
            description: None,
            is_start: false,
            is_end: false,
            on_entry: None,
            on_exit: None,
            actions: Vec::new(),
            potential_owners: Vec::new(),
            business_managers: Vec::new(),
            variables_map: Vec::new(),
            handler: StepHandlerKind::None,
        }
    }

    /// Mark as start step
    pub fn start(mut self) -> Self {
        self.is_start = true;
        self
    }

    /// Mark as end step
    pub fn end(mut self) -> Self {
        self.is_end = true;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Set the on-entry expression
    pub fn with_on_entry(mut self, expression: impl Into<String>) -> Self {
        self.on_entry = Some(expression.into());
        self
    }

    /// Set the on-exit expression
    pub fn with_on_exit(mut self, expression: impl Into<String>) -> Self {
        self.on_exit = Some(expression.into());
        self
    }

    /// Set the handler
    pub fn with_handler(mut self, handler: StepHandlerKind) -> Self {
        self.handler = handler;
        self
    }

    /// Add a variable contract
    pub fn with_variable(mut self, name: impl Into<String>, required: VarRequired) -> Self {
        self.variables_map.push(VariableMapping {
            name: name.into(),
            required,
        });
        self
    }

    /// Add an action
    pub fn with_action(mut self, action: ActionDefinition) -> Self {
        self.actions.push(action);
        self
    }

    /// Add a potential owner
    pub fn with_potential_owner(mut self, entry: SecurityEntry) -> Self {
        self.potential_owners.push(entry);
        self
    }

    /// Add a business manager
    pub fn with_business_manager(mut self, entry: SecurityEntry) -> Self {
        self.business_managers.push(entry);
        self
    }

    /// Identity pair of this step
    pub fn reference(&self) -> StepRef {
        StepRef {
            id: self.id,
            step_id: self.step_id.clone(),
        }
    }

    /// Variables carrying the given requirement flag
    pub fn required_variables(&self, flag: VarRequired) -> impl Iterator<Item = &str> {
        self.variables_map
            .iter()
            .filter(move |mapping| mapping.required.contains(flag))
            .map(|mapping| mapping.name.as_str())
    }
}

impl LinkDefinition {
    /// Create an unguarded link
    pub fn new(source: &StepDefinition, target: &StepDefinition, name: impl Into<String>) -> Self {
        Self {
            source: source.reference(),
            target: target.reference(),
            name: name.into(),
            description: None,
            script: None,
        }
    }

    /// Set the guard expression
    pub fn with_guard(mut self, script: impl Into<String>) -> Self {
        self.script = Some(script.into());
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

impl ActionDefinition {
    /// Create a non-skippable action without a script
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            skippable: false,
            script: None,
        }
    }
}

impl SecurityEntry {
    /// User account entry
    pub fn user(name: impl Into<String>) -> Self {
        Self {
            account_type: AccountType::User,
            name: name.into(),
        }
    }

    /// Group account entry
    pub fn group(name: impl Into<String>) -> Self {
        Self {
            account_type: AccountType::Group,
            name: name.into(),
        }
    }
}

impl VariableDefinition {
    /// Declare a variable
    pub fn new(name: impl Into<String>, variable_type: VariableType) -> Self {
        Self {
            name: name.into(),
            description: None,
            variable_type,
            class_name: None,
        }
    }

    /// Set the class name of an Object/Json payload
    pub fn with_class_name(mut self, class_name: impl Into<String>) -> Self {
        self.class_name = Some(class_name.into());
        self
    }

    /// Schema used when this variable enters a property set
    pub fn schema(&self) -> PropertySchema {
        let schema = match self.variable_type {
            VariableType::String => PropertySchema::string(),
            VariableType::Int => PropertySchema::int(),
            VariableType::Decimal => PropertySchema::decimal(),
            VariableType::Char => PropertySchema::char(),
            VariableType::Boolean => PropertySchema::boolean(),
            VariableType::Json => PropertySchema::json(),
            VariableType::Object => {
                PropertySchema::object(self.class_name.clone().unwrap_or_default())
            }
            VariableType::None => PropertySchema::any(),
        };
        schema.nullable()
    }
}
