//! # Handlers
//!
//! Handlers are the callbacks an agent binds to event tags. Two registration
//! styles are supported by the runtime:
//!
//! - a plain [`Callback`] bound to one [`EventTag`](crate::event_registry::EventTag)
//! - an [`AgentHandler`] object whose methods cover the whole capability set
//!
//! Every invocation receives an [`AgentContext`] giving access to the option
//! and status surfaces and to `stop()`.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use thiserror::Error;

use crate::event_registry::{DeviceStatus, Event};
use crate::runtime::RuntimeHandle;
use crate::store::{OptionStore, StatusStore};

pub type HandlerResult = Result<(), HandlerError>;

/// Callback bound to a single event tag. The event is moved into the call.
pub type Callback =
    Box<dyn Fn(Event, AgentContext) -> BoxFuture<'static, HandlerResult> + Send + Sync>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Required option not set: {name}")]
    MissingOption { name: String },

    #[error("Handler failed: {0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed<S: Into<String>>(message: S) -> Self {
        HandlerError::Failed(message.into())
    }
}

/// What a callback can reach while it runs.
#[derive(Clone)]
pub struct AgentContext {
    agent_name: Arc<str>,
    options: Arc<dyn OptionStore>,
    status: Arc<dyn StatusStore>,
    runtime: RuntimeHandle,
}

impl AgentContext {
    pub(crate) fn new(
        agent_name: Arc<str>,
        options: Arc<dyn OptionStore>,
        status: Arc<dyn StatusStore>,
        runtime: RuntimeHandle,
    ) -> Self {
        Self {
            agent_name,
            options,
            status,
            runtime,
        }
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn option(&self, name: &str) -> Option<String> {
        self.options.get(name)
    }

    pub fn set_status(&self, key: &str, value: &str) {
        self.status.set(key, value);
    }

    /// Stops the runtime once the current callback returns.
    pub fn stop(&self) {
        self.runtime.stop();
    }

    pub fn runtime(&self) -> &RuntimeHandle {
        &self.runtime
    }
}

/// Object-style handler covering every event tag.
///
/// All methods default to doing nothing, so an implementation only overrides
/// what it cares about.
#[async_trait]
pub trait AgentHandler: Send + Sync {
    async fn on_initialized(&self, _ctx: &AgentContext) -> HandlerResult {
        Ok(())
    }

    async fn on_option_changed(
        &self,
        _ctx: &AgentContext,
        _name: &str,
        _value: &str,
    ) -> HandlerResult {
        Ok(())
    }

    async fn on_device_event(
        &self,
        _ctx: &AgentContext,
        _device_id: &str,
        _status: DeviceStatus,
    ) -> HandlerResult {
        Ok(())
    }
}

/// Adapts a handler object into a [`Callback`] routing on the event variant.
pub fn object_callback(handler: Arc<dyn AgentHandler>) -> Callback {
    Box::new(move |event, ctx| {
        let handler = handler.clone();
        Box::pin(async move {
            match event {
                Event::Initialized => handler.on_initialized(&ctx).await,
                Event::OptionChanged { name, value } => {
                    handler.on_option_changed(&ctx, &name, &value).await
                }
                Event::DeviceEvent { device_id, status } => {
                    handler.on_device_event(&ctx, &device_id, status).await
                }
            }
        })
    })
}
