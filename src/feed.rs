//! # Control-plane feed
//!
//! Stands in for the control-plane bus when the agent runs as a standalone
//! process: newline-delimited JSON events are read from an async reader and
//! enqueued into the runtime.
//!
//! ```text
//! {"type":"initialized"}
//! {"type":"option_changed","name":"name","value":"MyAgent"}
//! {"type":"device_event","device_id":"Ethernet1","status":"up"}
//! ```
//!
//! Option changes are written to the option store before their event is
//! enqueued, so a handler reading the option sees the new value.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio_stream::{wrappers::LinesStream, StreamExt};
use tracing::{debug, warn};

use crate::dispatcher::DispatchError;
use crate::event_registry::Event;
use crate::runtime::RuntimeHandle;
use crate::store::InMemoryOptionStore;

pub type FeedResult<T> = Result<T, FeedError>;

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Failed to read control-plane feed: {0}")]
    Read(#[from] std::io::Error),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FeedSummary {
    pub accepted: usize,
    pub rejected: usize,
    /// The runtime stopped accepting events before the input ended.
    pub closed: bool,
}

pub async fn pump<R>(
    reader: R,
    handle: &RuntimeHandle,
    options: &InMemoryOptionStore,
) -> FeedResult<FeedSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = FeedSummary::default();
    let mut lines = LinesStream::new(reader.lines());

    while let Some(line) = lines.next().await {
        let line = line?;
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let event = match serde_json::from_str::<Event>(trimmed) {
            Ok(event) => event,
            Err(e) => {
                warn!("Rejected feed line {:?}: {}", trimmed, e);
                summary.rejected += 1;
                continue;
            }
        };

        if let Event::OptionChanged { name, value } = &event {
            options.set(name, value);
        }

        match handle.enqueue(event) {
            Ok(()) => summary.accepted += 1,
            Err(DispatchError::QueueClosed) => {
                debug!("Runtime closed, feed stopped after {} events", summary.accepted);
                summary.closed = true;
                break;
            }
        }
    }

    Ok(summary)
}
