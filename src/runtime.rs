//! # Agent Runtime
//!
//! The runtime owns the [`EventDispatcher`] and the handler registration
//! table, and runs the event loop of an agent.
//!
//! ## Lifecycle
//!
//! ```text
//! Created -> Registering -> Running -> Stopped
//! ```
//!
//! - Handlers are registered while `Registering`. The table freezes on the
//!   first call to [`AgentRuntime::run`].
//! - `run` delivers events one at a time on the calling task. Each callback
//!   finishes before the next event is taken from the dispatcher.
//! - The loop ends when the dispatcher is closed and drained (see
//!   [`RuntimeHandle::close`]), when [`RuntimeHandle::stop`] is called while
//!   running, or when a callback fails.
//!
//! ## Delivery rules
//!
//! - Nothing is delivered before the first `Initialized` event; earlier
//!   events and repeated `Initialized` events are dropped.
//! - Events whose tag has no callback are dropped.
//! - A failing callback ends the loop with [`RuntimeError::CallbackFailure`].
//!   The dispatcher is closed and the runtime does not restart.
//!
//! ## Example
//!
//! ```rust,no_run
//! # use std::sync::Arc;
//! # use cp_agent::event_registry::{Event, EventTag};
//! # use cp_agent::runtime::AgentRuntime;
//! # use cp_agent::store::{InMemoryOptionStore, InMemoryStatusStore};
//! # async fn example() -> cp_agent::runtime::RuntimeResult<()> {
//! let runtime = AgentRuntime::new(
//!     "MyAgent",
//!     Arc::new(InMemoryOptionStore::new()),
//!     Arc::new(InMemoryStatusStore::new()),
//! );
//! runtime.register_fn(EventTag::Initialized, |_event, ctx| async move {
//!     ctx.set_status("Initialized", "OK");
//!     Ok(())
//! })?;
//! runtime.enqueue(Event::Initialized)?;
//! runtime.stop();
//! let exit_code = runtime.run().await?;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use strum::IntoEnumIterator;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::dispatcher::{DispatchError, DispatchResult, EventDispatcher};
use crate::event_registry::{Event, EventTag};
use crate::handler::{
    object_callback, AgentContext, AgentHandler, Callback, HandlerError, HandlerResult,
};
use crate::store::{OptionStore, StatusStore};

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;

pub type RuntimeResult<T> = Result<T, RuntimeError>;

#[derive(Error, Debug)]
pub enum RuntimeError {
    /// Registration attempted after the table was frozen by `run`.
    #[error("Cannot register handler for {tag}: runtime already started")]
    RegistrationAfterStart { tag: EventTag },

    #[error("Runtime cannot start from state {state}")]
    AlreadyStarted { state: RuntimeState },

    #[error("Handler for {tag} failed: {source}")]
    CallbackFailure {
        tag: EventTag,
        #[source]
        source: HandlerError,
    },

    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum RuntimeState {
    Created,
    Registering,
    Running,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeStatus {
    pub state: RuntimeState,
    pub last_transition: DateTime<Utc>,
    /// Events handed to a callback that completed successfully.
    pub delivered: u64,
    /// Events discarded without a callback invocation.
    pub dropped: u64,
}

impl RuntimeStatus {
    fn new() -> Self {
        Self {
            state: RuntimeState::Created,
            last_transition: Utc::now(),
            delivered: 0,
            dropped: 0,
        }
    }
}

struct Shared {
    name: Arc<str>,
    dispatcher: EventDispatcher,
    status: Mutex<RuntimeStatus>,
    halt: AtomicBool,
}

impl Shared {
    fn lock_status(&self) -> MutexGuard<'_, RuntimeStatus> {
        self.status.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self) {
        if self.lock_status().state == RuntimeState::Running {
            self.halt.store(true, Ordering::SeqCst);
        }
        self.dispatcher.shutdown();
    }

    fn close(&self) {
        self.dispatcher.shutdown();
    }

    fn record_dropped(&self) {
        self.lock_status().dropped += 1;
    }

    fn record_delivered(&self) {
        self.lock_status().delivered += 1;
    }
}

fn transition(name: &str, status: &mut RuntimeStatus, to: RuntimeState) {
    info!("Agent {}: {} -> {}", name, status.state, to);
    status.state = to;
    status.last_transition = Utc::now();
}

/// Cloneable handle to a runtime, usable from producer tasks and threads.
#[derive(Clone)]
pub struct RuntimeHandle {
    shared: Arc<Shared>,
}

impl RuntimeHandle {
    pub fn enqueue(&self, event: Event) -> DispatchResult<()> {
        self.shared.dispatcher.enqueue(event)
    }

    /// Requests the runtime to stop.
    ///
    /// While running, the loop returns after the in-flight callback and
    /// leaves queued events undelivered. Before `run`, only the dispatcher is
    /// closed, so already queued events are still delivered.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Closes the dispatcher without halting the loop: events already queued
    /// are still delivered, then `run` returns.
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn state(&self) -> RuntimeState {
        self.shared.lock_status().state
    }

    pub fn status(&self) -> RuntimeStatus {
        self.shared.lock_status().clone()
    }

    pub fn pending(&self) -> usize {
        self.shared.dispatcher.len()
    }
}

pub struct AgentRuntime {
    handlers: DashMap<EventTag, Callback>,
    options: Arc<dyn OptionStore>,
    status_store: Arc<dyn StatusStore>,
    shared: Arc<Shared>,
}

impl AgentRuntime {
    pub fn new(
        name: &str,
        options: Arc<dyn OptionStore>,
        status_store: Arc<dyn StatusStore>,
    ) -> Self {
        let shared = Arc::new(Shared {
            name: Arc::from(name),
            dispatcher: EventDispatcher::new(),
            status: Mutex::new(RuntimeStatus::new()),
            halt: AtomicBool::new(false),
        });
        transition(name, &mut shared.lock_status(), RuntimeState::Registering);

        Self {
            handlers: DashMap::new(),
            options,
            status_store,
            shared,
        }
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn handle(&self) -> RuntimeHandle {
        RuntimeHandle {
            shared: self.shared.clone(),
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.shared.lock_status().state
    }

    pub fn status(&self) -> RuntimeStatus {
        self.shared.lock_status().clone()
    }

    pub fn enqueue(&self, event: Event) -> RuntimeResult<()> {
        self.shared.dispatcher.enqueue(event)?;
        Ok(())
    }

    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn close(&self) {
        self.shared.close();
    }

    /// Binds `callback` to `tag`, replacing any previous binding.
    pub fn register(&self, tag: EventTag, callback: Callback) -> RuntimeResult<()> {
        // The status lock is held across the insert so `run` cannot freeze
        // the table halfway through a registration.
        let status = self.shared.lock_status();
        if status.state != RuntimeState::Registering {
            return Err(RuntimeError::RegistrationAfterStart { tag });
        }
        if self.handlers.insert(tag, callback).is_some() {
            debug!("Agent {}: replaced handler for {}", self.name(), tag);
        } else {
            debug!("Agent {}: registered handler for {}", self.name(), tag);
        }
        Ok(())
    }

    pub fn register_fn<F, Fut>(&self, tag: EventTag, f: F) -> RuntimeResult<()>
    where
        F: Fn(Event, AgentContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.register(tag, Box::new(move |event, ctx| Box::pin(f(event, ctx))))
    }

    /// Binds every event tag to the matching method of `handler`.
    pub fn register_handler(&self, handler: Arc<dyn AgentHandler>) -> RuntimeResult<()> {
        for tag in EventTag::iter() {
            self.register(tag, object_callback(handler.clone()))?;
        }
        Ok(())
    }

    /// Runs the event loop until the dispatcher is exhausted, `stop` is
    /// requested, or a callback fails.
    pub async fn run(&self) -> RuntimeResult<i32> {
        {
            let mut status = self.shared.lock_status();
            if status.state != RuntimeState::Registering {
                return Err(RuntimeError::AlreadyStarted {
                    state: status.state,
                });
            }
            transition(self.name(), &mut status, RuntimeState::Running);
        }
        info!(
            "Agent {} running with {} handler(s)",
            self.name(),
            self.handlers.len()
        );

        let result = self.event_loop().await;

        self.shared.dispatcher.shutdown();
        {
            let mut status = self.shared.lock_status();
            transition(self.name(), &mut status, RuntimeState::Stopped);
        }
        result
    }

    async fn event_loop(&self) -> RuntimeResult<i32> {
        let ctx = AgentContext::new(
            self.shared.name.clone(),
            self.options.clone(),
            self.status_store.clone(),
            self.handle(),
        );
        let mut initialized = false;

        loop {
            if self.shared.halt.load(Ordering::SeqCst) {
                info!("Agent {}: stop requested", self.name());
                break;
            }
            let Some(event) = self.shared.dispatcher.next().await else {
                debug!("Agent {}: dispatcher exhausted", self.name());
                break;
            };

            let tag = event.tag();
            // stop() raced with the pop
            if self.shared.halt.load(Ordering::SeqCst) {
                info!("Agent {}: stop requested, discarding {}", self.name(), tag);
                self.shared.record_dropped();
                break;
            }
            match tag {
                EventTag::Initialized if initialized => {
                    warn!("Agent {}: dropped repeated Initialized event", self.name());
                    self.shared.record_dropped();
                    continue;
                }
                EventTag::Initialized => initialized = true,
                _ if !initialized => {
                    warn!(
                        "Agent {}: dropped {} event received before initialization",
                        self.name(),
                        tag
                    );
                    self.shared.record_dropped();
                    continue;
                }
                _ => {}
            }

            let invocation = match self.handlers.get(&tag) {
                Some(callback) => (callback.value())(event, ctx.clone()),
                None => {
                    debug!("Agent {}: no handler for {}, dropping", self.name(), tag);
                    self.shared.record_dropped();
                    continue;
                }
            };

            debug!("Agent {}: dispatching {}", self.name(), tag);
            if let Err(source) = invocation.await {
                error!("Agent {}: handler for {} failed: {}", self.name(), tag, source);
                return Err(RuntimeError::CallbackFailure { tag, source });
            }
            self.shared.record_delivered();
        }

        Ok(EXIT_SUCCESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_registry::DeviceStatus;
    use crate::store::{InMemoryOptionStore, InMemoryStatusStore};
    use pretty_assertions::assert_eq;

    type Log = Arc<Mutex<Vec<String>>>;

    fn runtime() -> AgentRuntime {
        AgentRuntime::new(
            "TestAgent",
            Arc::new(InMemoryOptionStore::new()),
            Arc::new(InMemoryStatusStore::new()),
        )
    }

    fn recorder(log: &Log, label: &str) -> Callback {
        let log = log.clone();
        let label = label.to_string();
        Box::new(move |_event, _ctx| {
            let log = log.clone();
            let label = label.clone();
            Box::pin(async move {
                log.lock().unwrap().push(label);
                Ok(())
            })
        })
    }

    fn entries(log: &Log) -> Vec<String> {
        log.lock().unwrap().clone()
    }

    #[test]
    fn test_new_runtime_is_registering() {
        let runtime = runtime();
        assert_eq!(runtime.state(), RuntimeState::Registering);
        assert_eq!(runtime.name(), "TestAgent");
    }

    #[tokio::test]
    async fn test_stop_before_enqueue_returns_zero() {
        let runtime = runtime();
        let log: Log = Arc::default();
        runtime
            .register(EventTag::Initialized, recorder(&log, "init"))
            .unwrap();

        runtime.stop();
        let exit_code = runtime.run().await.unwrap();

        assert_eq!(exit_code, EXIT_SUCCESS);
        assert!(entries(&log).is_empty());
        assert_eq!(runtime.state(), RuntimeState::Stopped);
    }

    #[tokio::test]
    async fn test_queued_events_delivered_in_order_then_exit() {
        let runtime = runtime();
        let log: Log = Arc::default();
        runtime
            .register(EventTag::Initialized, recorder(&log, "init"))
            .unwrap();
        runtime
            .register(EventTag::OptionChanged, recorder(&log, "option"))
            .unwrap();

        runtime.enqueue(Event::Initialized).unwrap();
        runtime
            .enqueue(Event::option_changed("name", "MyAgent"))
            .unwrap();
        runtime.stop();

        assert_eq!(runtime.run().await.unwrap(), EXIT_SUCCESS);
        assert_eq!(entries(&log), vec!["init", "option"]);
    }

    #[tokio::test]
    async fn test_last_registration_wins() {
        let runtime = runtime();
        let log: Log = Arc::default();
        runtime
            .register(EventTag::Initialized, recorder(&log, "c1"))
            .unwrap();
        runtime
            .register(EventTag::Initialized, recorder(&log, "c2"))
            .unwrap();

        runtime.enqueue(Event::Initialized).unwrap();
        runtime.stop();
        runtime.run().await.unwrap();

        assert_eq!(entries(&log), vec!["c2"]);
    }

    #[tokio::test]
    async fn test_stop_inside_callback_leaves_queue_undelivered() {
        let runtime = runtime();
        let log: Log = Arc::default();
        let init_log = log.clone();
        runtime
            .register_fn(EventTag::Initialized, move |_event, ctx| {
                let log = init_log.clone();
                async move {
                    log.lock().unwrap().push("init".to_string());
                    ctx.stop();
                    Ok(())
                }
            })
            .unwrap();
        runtime
            .register(EventTag::OptionChanged, recorder(&log, "option"))
            .unwrap();

        runtime.enqueue(Event::Initialized).unwrap();
        runtime.enqueue(Event::option_changed("a", "1")).unwrap();
        runtime.enqueue(Event::option_changed("b", "2")).unwrap();

        assert_eq!(runtime.run().await.unwrap(), EXIT_SUCCESS);
        assert_eq!(entries(&log), vec!["init"]);
        assert_eq!(runtime.handle().pending(), 2);
    }

    #[tokio::test]
    async fn test_close_while_running_drains_queue() {
        let runtime = Arc::new(runtime());
        let log: Log = Arc::default();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        runtime
            .register_fn(EventTag::Initialized, move |_event, _ctx| {
                let tx = tx.clone();
                async move {
                    tx.send(()).ok();
                    Ok(())
                }
            })
            .unwrap();
        runtime
            .register(EventTag::OptionChanged, recorder(&log, "option"))
            .unwrap();

        let task = {
            let runtime = runtime.clone();
            tokio::spawn(async move { runtime.run().await })
        };
        runtime.enqueue(Event::Initialized).unwrap();
        rx.recv().await.unwrap();
        assert_eq!(runtime.state(), RuntimeState::Running);

        for i in 0..50 {
            runtime
                .enqueue(Event::option_changed("count", i.to_string()))
                .unwrap();
        }
        runtime.close();

        assert_eq!(task.await.unwrap().unwrap(), EXIT_SUCCESS);
        assert_eq!(entries(&log).len(), 50);
        assert_eq!(runtime.status().delivered, 51);
        assert_eq!(runtime.status().dropped, 0);
        assert_eq!(runtime.handle().pending(), 0);
        assert!(runtime.enqueue(Event::Initialized).is_err());
    }

    #[tokio::test]
    async fn test_events_before_initialized_are_dropped() {
        let runtime = runtime();
        let log: Log = Arc::default();
        runtime
            .register(EventTag::Initialized, recorder(&log, "init"))
            .unwrap();
        runtime
            .register(EventTag::DeviceEvent, recorder(&log, "device"))
            .unwrap();

        runtime
            .enqueue(Event::device_event("Ethernet1", DeviceStatus::Up))
            .unwrap();
        runtime.enqueue(Event::Initialized).unwrap();
        runtime.enqueue(Event::Initialized).unwrap();
        runtime
            .enqueue(Event::device_event("Ethernet1", DeviceStatus::Down))
            .unwrap();
        runtime.stop();
        runtime.run().await.unwrap();

        assert_eq!(entries(&log), vec!["init", "device"]);
        let status = runtime.status();
        assert_eq!(status.delivered, 2);
        assert_eq!(status.dropped, 2);
    }

    #[tokio::test]
    async fn test_unbound_events_are_dropped() {
        let runtime = runtime();
        let log: Log = Arc::default();
        runtime
            .register(EventTag::OptionChanged, recorder(&log, "option"))
            .unwrap();

        runtime.enqueue(Event::Initialized).unwrap();
        runtime
            .enqueue(Event::device_event("Ethernet2", DeviceStatus::Up))
            .unwrap();
        runtime.enqueue(Event::option_changed("name", "x")).unwrap();
        runtime.stop();

        assert_eq!(runtime.run().await.unwrap(), EXIT_SUCCESS);
        assert_eq!(entries(&log), vec!["option"]);
        assert_eq!(runtime.status().dropped, 2);
    }

    #[tokio::test]
    async fn test_callback_failure_is_fail_fast() {
        let runtime = runtime();
        let log: Log = Arc::default();
        runtime
            .register_fn(EventTag::Initialized, |_event, _ctx| async {
                Err(HandlerError::failed("boom"))
            })
            .unwrap();
        runtime
            .register(EventTag::OptionChanged, recorder(&log, "option"))
            .unwrap();

        runtime.enqueue(Event::Initialized).unwrap();
        runtime.enqueue(Event::option_changed("name", "x")).unwrap();

        let err = runtime.run().await.unwrap_err();
        match err {
            RuntimeError::CallbackFailure { tag, source } => {
                assert_eq!(tag, EventTag::Initialized);
                assert_eq!(source, HandlerError::failed("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(entries(&log).is_empty());
        assert_eq!(runtime.state(), RuntimeState::Stopped);
        assert!(matches!(
            runtime.enqueue(Event::Initialized),
            Err(RuntimeError::Dispatch(DispatchError::QueueClosed))
        ));
    }

    #[tokio::test]
    async fn test_run_twice_fails() {
        let runtime = runtime();
        runtime.stop();
        runtime.run().await.unwrap();

        let err = runtime.run().await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::AlreadyStarted {
                state: RuntimeState::Stopped
            }
        ));
    }

    #[tokio::test]
    async fn test_register_after_stop_fails() {
        let runtime = runtime();
        runtime.stop();
        runtime.run().await.unwrap();

        let log: Log = Arc::default();
        let err = runtime
            .register(EventTag::Initialized, recorder(&log, "late"))
            .unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::RegistrationAfterStart {
                tag: EventTag::Initialized
            }
        ));
    }
}
