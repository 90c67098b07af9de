//! # cp-agent: event-driven agents for a network control plane
//!
//! An agent is a long-running process that subscribes to control-plane
//! events and reacts to them. This crate provides the runtime such an agent
//! runs on:
//!
//! - Event model ([`event_registry`]): the closed set of events and their tags
//! - Event dispatcher ([`dispatcher`]): ordered delivery with a single suspend point
//! - Handlers ([`handler`]): callbacks, the [`AgentHandler`] capability set and
//!   the [`AgentContext`] handed to each invocation
//! - Agent runtime ([`runtime`]): registration table, lifecycle and event loop
//! - External surfaces ([`store`]): option and status stores
//!
//! The [`skeleton`] agent is the minimal handler to start from, and [`feed`]
//! reads newline-delimited JSON events for standalone runs.
//!
//! ```text
//! control-plane bus -> enqueue -> EventDispatcher -> next -> AgentRuntime -> callback
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod event_registry;
pub mod feed;
pub mod handler;
pub mod runtime;
pub mod skeleton;
pub mod store;

// Re-exports
pub use error::*;
pub use event_registry::{DeviceStatus, Event, EventTag};
pub use handler::{AgentContext, AgentHandler, HandlerError, HandlerResult};
pub use runtime::{AgentRuntime, RuntimeError, RuntimeHandle, RuntimeResult, RuntimeState};
