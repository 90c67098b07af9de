//! # Event Dispatcher
//!
//! An ordered, unbounded queue of pending events with a single suspend point.
//!
//! ## Design
//!
//! - `enqueue` is a plain synchronous call, so producers on other threads,
//!   tasks or signal handlers never wait on the consumer.
//! - `next` suspends on a [`Notify`] until an event is queued or the queue is
//!   closed. The waiter is registered before the queue is inspected, so a
//!   wake-up issued between the check and the await is never lost.
//! - `shutdown` closes the queue. Events already queued are still handed out
//!   in order; `next` yields `None` once the queue is closed and drained.
//!
//! The internal mutex is only held for a push or a pop and never across an
//! await point.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

use thiserror::Error;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::event_registry::Event;

pub type DispatchResult<T> = Result<T, DispatchError>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Event queue is closed")]
    QueueClosed,
}

#[derive(Default)]
struct Queue {
    events: VecDeque<Event>,
    closed: bool,
}

#[derive(Default)]
pub struct EventDispatcher {
    queue: Mutex<Queue>,
    notify: Notify,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an event to the tail of the queue.
    pub fn enqueue(&self, event: Event) -> DispatchResult<()> {
        {
            let mut queue = self.lock();
            if queue.closed {
                debug!("Rejected {} event: queue closed", event.tag());
                return Err(DispatchError::QueueClosed);
            }
            trace!("Enqueued {} event", event.tag());
            queue.events.push_back(event);
        }
        self.notify.notify_one();
        Ok(())
    }

    /// Pops the next event, waiting until one is available.
    ///
    /// Returns `None` once the dispatcher has been shut down and every
    /// previously queued event has been handed out.
    pub async fn next(&self) -> Option<Event> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut queue = self.lock();
                if let Some(event) = queue.events.pop_front() {
                    return Some(event);
                }
                if queue.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Closes the queue and wakes every waiting consumer. Idempotent.
    pub fn shutdown(&self) {
        let first = {
            let mut queue = self.lock();
            !std::mem::replace(&mut queue.closed, true)
        };
        if first {
            debug!("Dispatcher shut down");
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    pub fn len(&self) -> usize {
        self.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().events.is_empty()
    }

    // Queue state stays consistent across a panicking holder: every critical
    // section is a single push, pop or flag write.
    fn lock(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
