//! # Event Model
//!
//! The closed set of events an agent can receive from the control plane.
//! Every event carries an [`EventTag`] which the runtime uses to look up the
//! callback bound to it.

use serde::{Deserialize, Serialize};
use strum::EnumDiscriminants;

/// Operational status of a device as reported by the external device model.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Default,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum DeviceStatus {
    #[default]
    Unknown,
    Up,
    Down,
}

/// # Event
///
/// A single control-plane notification. Events are immutable once created and
/// are moved into the callback that handles them.
///
/// On the wire (see [`crate::feed`]) an event is an internally tagged JSON
/// object:
///
/// ```rust
/// # use cp_agent::event_registry::{Event, EventTag};
/// let event: Event =
///     serde_json::from_str(r#"{"type":"option_changed","name":"name","value":"MyAgent"}"#)
///         .unwrap();
/// assert_eq!(event.tag(), EventTag::OptionChanged);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, EnumDiscriminants)]
#[serde(tag = "type", rename_all = "snake_case")]
#[strum_discriminants(name(EventTag), derive(Hash, strum::Display, strum::EnumIter))]
pub enum Event {
    /// The agent has been attached to the control plane.
    Initialized,
    /// An agent option was set from outside configuration.
    OptionChanged { name: String, value: String },
    /// A device changed its operational status.
    DeviceEvent {
        device_id: String,
        status: DeviceStatus,
    },
}

impl Event {
    pub fn option_changed(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::OptionChanged {
            name: name.into(),
            value: value.into(),
        }
    }

    pub fn device_event(device_id: impl Into<String>, status: DeviceStatus) -> Self {
        Self::DeviceEvent {
            device_id: device_id.into(),
            status,
        }
    }

    pub fn tag(&self) -> EventTag {
        EventTag::from(self)
    }
}
