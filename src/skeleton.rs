//! Reference agent: the starting point third-party agents copy and extend.

use async_trait::async_trait;
use tracing::info;

use crate::event_registry::DeviceStatus;
use crate::handler::{AgentContext, AgentHandler, HandlerResult};

pub const NAME_OPTION: &str = "name";
pub const INITIALIZED_STATUS: &str = "Initialized";

#[derive(Debug, Default, Clone)]
pub struct SkeletonAgent;

impl SkeletonAgent {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AgentHandler for SkeletonAgent {
    async fn on_initialized(&self, ctx: &AgentContext) -> HandlerResult {
        info!(agent = ctx.agent_name(), "Initialized");
        let name = ctx.option(NAME_OPTION).unwrap_or_default();
        info!(agent = ctx.agent_name(), "Configured name: '{}'", name);
        ctx.set_status(INITIALIZED_STATUS, "OK");
        Ok(())
    }

    async fn on_option_changed(
        &self,
        ctx: &AgentContext,
        name: &str,
        value: &str,
    ) -> HandlerResult {
        info!(
            agent = ctx.agent_name(),
            "Option '{}' was set to '{}'",
            name,
            value
        );
        Ok(())
    }

    async fn on_device_event(
        &self,
        ctx: &AgentContext,
        device_id: &str,
        status: DeviceStatus,
    ) -> HandlerResult {
        info!(agent = ctx.agent_name(), "Device {} is now {}", device_id, status);
        ctx.set_status(&format!("device.{}", device_id), &status.to_string());
        Ok(())
    }
}
