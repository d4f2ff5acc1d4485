//! Content fingerprint of a process definition.
//!
//! The definition is walked in a fixed order (steps with their actions,
//! scripts, variable maps and security entries, then links, then variables,
//! then flow metadata) and every field is appended to a canonical text
//! accumulator, which is hashed with SHA-256. Storage ids and the definition
//! id/version are left out so that the same content built twice yields the
//! same fingerprint.

use crate::domain::definition::{
    AccountType, ActionDefinition, LinkDefinition, ProcessDefinition, SecurityEntry,
    StepDefinition, StepHandlerKind, VariableDefinition,
};
use sha2::{Digest, Sha256};
use std::fmt::Display;

/// Canonical text accumulator. Every field is written as
/// `tag:len:value;` so adjacent fields cannot run into each other.
/// An absent optional field is written as `tag:-;`.
#[derive(Debug, Default)]
struct Canonical {
    buffer: String,
}

impl Canonical {
    fn field(&mut self, tag: &str, value: impl Display) {
        let value = value.to_string();
        self.buffer.push_str(tag);
        self.buffer.push(':');
        self.buffer.push_str(&value.len().to_string());
        self.buffer.push(':');
        self.buffer.push_str(&value);
        self.buffer.push(';');
    }

    fn optional(&mut self, tag: &str, value: Option<&str>) {
        match value {
            Some(value) => self.field(tag, value),
            None => {
                self.buffer.push_str(tag);
                self.buffer.push_str(":-;");
            }
        }
    }

    fn step(&mut self, step: &StepDefinition) {
        self.field("step", &step.step_id);
        self.optional("description", step.description.as_deref());
        self.field("start", step.is_start);
        self.field("end", step.is_end);

        self.field("actions", step.actions.len());
        for action in &step.actions {
            self.action(action);
        }

        self.optional("on_entry", step.on_entry.as_deref());
        self.optional("on_exit", step.on_exit.as_deref());
        self.handler(&step.handler);

        self.field("variables_map", step.variables_map.len());
        for mapping in &step.variables_map {
            self.field("var", &mapping.name);
            self.field("required", mapping.required.bits());
        }

        self.field("potential_owners", step.potential_owners.len());
        for entry in &step.potential_owners {
            self.security(entry);
        }
        self.field("business_managers", step.business_managers.len());
        for entry in &step.business_managers {
            self.security(entry);
        }
    }

    fn action(&mut self, action: &ActionDefinition) {
        self.field("action", &action.name);
        self.optional("description", action.description.as_deref());
        self.field("skippable", action.skippable);
        self.optional("script", action.script.as_deref());
    }

    fn handler(&mut self, handler: &StepHandlerKind) {
        match handler {
            StepHandlerKind::None => self.field("handler", "none"),
            StepHandlerKind::Script { script } => {
                self.field("handler", "script");
                self.field("script", script);
            }
            StepHandlerKind::Task => self.field("handler", "task"),
            StepHandlerKind::IoC { name } => {
                self.field("handler", "ioc");
                self.field("ioc", name);
            }
            StepHandlerKind::Service { class_name } => {
                self.field("handler", "service");
                self.field("class", class_name);
            }
        }
    }

    fn security(&mut self, entry: &SecurityEntry) {
        let kind = match entry.account_type {
            AccountType::User => "user",
            AccountType::Group => "group",
        };
        self.field(kind, &entry.name);
    }

    fn link(&mut self, link: &LinkDefinition) {
        self.field("link", &link.name);
        self.field("source", &link.source.step_id);
        self.field("target", &link.target.step_id);
        self.optional("description", link.description.as_deref());
        self.optional("guard", link.script.as_deref());
    }

    fn variable(&mut self, variable: &VariableDefinition) {
        self.field("variable", &variable.name);
        self.optional("description", variable.description.as_deref());
        self.field("type", format!("{:?}", variable.variable_type));
        self.optional("class", variable.class_name.as_deref());
    }

    fn metadata(&mut self, definition: &ProcessDefinition) {
        self.field("flow", &definition.flow_id);
        self.field("name", &definition.name);
        self.optional("description", definition.description.as_deref());
    }
}

/// Hex-encoded SHA-256 fingerprint of a definition's content
pub fn fingerprint(definition: &ProcessDefinition) -> String {
    let mut canonical = Canonical::default();

    canonical.field("steps", definition.steps.len());
    for step in &definition.steps {
        canonical.step(step);
    }

    canonical.field("links", definition.links.len());
    for link in &definition.links {
        canonical.link(link);
    }

    canonical.field("variables", definition.variables.len());
    for variable in &definition.variables {
        canonical.variable(variable);
    }

    canonical.metadata(definition);

    hex::encode(Sha256::digest(canonical.buffer.as_bytes()))
}

impl ProcessDefinition {
    /// Content fingerprint, see [`fingerprint`]
    pub fn fingerprint(&self) -> String {
        fingerprint(self)
    }
}
