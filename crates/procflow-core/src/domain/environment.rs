//! Host-provided environment threaded through every `execute`/`resume`.

use crate::domain::definition::StepDefinition;
use crate::domain::property_set::PropertySet;
use crate::error::CoreResult;
use crate::types::{HandlerOutcome, ProcessInstanceId};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// What a host delegation point gets to see of the running step
pub struct HandlerContext<'a> {
    /// Running instance
    pub instance_id: ProcessInstanceId,

    /// Definition of the running step
    pub step: &'a StepDefinition,

    /// Variable store of the process
    pub properties: &'a mut PropertySet,

    /// Extra host parameters
    pub params: &'a mut HashMap<String, Value>,

    /// Transition requested by the caller, if any
    pub transition: Option<&'a str>,
}

/// Asynchronous delegation points implemented by the host.
///
/// The engine awaits these calls as opaque futures; cancellation and
/// thread-safety of whatever they reach (task queues, registries) is the
/// host's concern. The default implementations report a failed outcome.
#[async_trait]
pub trait HostServices: Send + Sync {
    /// Create a human task for the step, typically answering `Suspend`
    async fn create_task(&self, ctx: &mut HandlerContext<'_>) -> CoreResult<HandlerOutcome> {
        tracing::debug!(step = %ctx.step.step_id, "No task service configured");
        Ok(HandlerOutcome::failed(format!(
            "no task service available for step '{}'",
            ctx.step.step_id
        )))
    }

    /// Look up the service registered under `name` and run it
    async fn invoke_ioc(
        &self,
        name: &str,
        ctx: &mut HandlerContext<'_>,
    ) -> CoreResult<HandlerOutcome> {
        tracing::debug!(step = %ctx.step.step_id, service = %name, "No IoC container configured");
        Ok(HandlerOutcome::failed(format!("no service registered as '{}'", name)))
    }

    /// Load `class_name` dynamically and run it
    async fn invoke_service(
        &self,
        class_name: &str,
        ctx: &mut HandlerContext<'_>,
    ) -> CoreResult<HandlerOutcome> {
        tracing::debug!(step = %ctx.step.step_id, class = %class_name, "No service loader configured");
        Ok(HandlerOutcome::failed(format!("cannot load service class '{}'", class_name)))
    }
}

/// Host services without any delegation backend
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHostServices;

impl HostServices for NoHostServices {}

/// Environment of one `execute`/`resume` call
pub struct ProcessEnvironment {
    properties: PropertySet,
    transition: Option<String>,
    params: HashMap<String, Value>,
    host: Arc<dyn HostServices>,
}

impl ProcessEnvironment {
    /// Environment over `properties` without host services
    pub fn new(properties: PropertySet) -> Self {
        Self::with_host(properties, Arc::new(NoHostServices))
    }

    /// Environment over `properties` delegating to `host`
    pub fn with_host(properties: PropertySet, host: Arc<dyn HostServices>) -> Self {
        Self {
            properties,
            transition: None,
            params: HashMap::new(),
            host,
        }
    }

    /// Variable store
    #[inline]
    pub fn properties(&self) -> &PropertySet {
        &self.properties
    }

    /// Mutable variable store
    #[inline]
    pub fn properties_mut(&mut self) -> &mut PropertySet {
        &mut self.properties
    }

    /// Give the variable store back to the caller
    pub fn into_properties(self) -> PropertySet {
        self.properties
    }

    /// Requested transition; empty names count as none
    pub fn transition(&self) -> Option<&str> {
        self.transition.as_deref().filter(|name| !name.is_empty())
    }

    /// Request an explicit transition for the next resolution
    pub fn set_transition(&mut self, transition: impl Into<String>) {
        self.transition = Some(transition.into());
    }

    /// Drop any requested transition
    pub fn clear_transition(&mut self) {
        self.transition = None;
    }

    /// Typed read of an extra parameter
    pub fn param<T: DeserializeOwned>(&self, key: &str) -> CoreResult<Option<T>> {
        match self.params.get(key) {
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
            None => Ok(None),
        }
    }

    /// Typed write of an extra parameter
    pub fn set_param<T: Serialize>(&mut self, key: &str, value: &T) -> CoreResult<()> {
        self.params
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }

    /// All extra parameters
    #[inline]
    pub fn params(&self) -> &HashMap<String, Value> {
        &self.params
    }

    /// Host services
    #[inline]
    pub fn host(&self) -> Arc<dyn HostServices> {
        self.host.clone()
    }

    /// Borrow the pieces a handler needs
    pub(crate) fn handler_context<'a>(
        &'a mut self,
        instance_id: ProcessInstanceId,
        step: &'a StepDefinition,
    ) -> HandlerContext<'a> {
        HandlerContext {
            instance_id,
            step,
            properties: &mut self.properties,
            params: &mut self.params,
            transition: self.transition.as_deref().filter(|name| !name.is_empty()),
        }
    }

    /// Borrow the pieces an expression needs
    pub(crate) fn expression_scope<'a>(
        &'a mut self,
        instance_id: ProcessInstanceId,
        step_id: &'a str,
    ) -> crate::domain::expression::ExpressionScope<'a> {
        crate::domain::expression::ExpressionScope {
            properties: &mut self.properties,
            transition: self.transition.as_deref().filter(|name| !name.is_empty()),
            params: &self.params,
            instance_id,
            step_id,
        }
    }
}
