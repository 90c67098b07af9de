//! Option and status surfaces of the agent.
//!
//! Both stores belong to the surrounding control plane. The runtime only
//! reads options and writes status through these traits; the in-memory
//! implementations back the process entry point and tests.

use dashmap::DashMap;
use std::collections::HashMap;

/// Read access to the agent options set from outside configuration.
#[mockall::automock]
pub trait OptionStore: Send + Sync {
    /// Returns the current value of an option, `None` when unset.
    fn get(&self, name: &str) -> Option<String>;
}

/// Write access to the status surface published to external observers.
#[mockall::automock]
pub trait StatusStore: Send + Sync {
    fn set(&self, key: &str, value: &str);
}

#[derive(Debug, Default)]
pub struct InMemoryOptionStore {
    options: DashMap<String, String>,
}

impl InMemoryOptionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets an option value. Called by the control-plane side before the
    /// corresponding `OptionChanged` event is delivered.
    pub fn set(&self, name: &str, value: &str) {
        self.options.insert(name.to_string(), value.to_string());
    }
}

impl From<HashMap<String, String>> for InMemoryOptionStore {
    fn from(options: HashMap<String, String>) -> Self {
        Self {
            options: options.into_iter().collect(),
        }
    }
}

impl OptionStore for InMemoryOptionStore {
    fn get(&self, name: &str) -> Option<String> {
        self.options.get(name).map(|value| value.clone())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStatusStore {
    status: DashMap<String, String>,
}

impl InMemoryStatusStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<String> {
        self.status.get(key).map(|value| value.clone())
    }

    /// Copies the current status surface into a plain map.
    pub fn snapshot(&self) -> HashMap<String, String> {
        self.status
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}

impl StatusStore for InMemoryStatusStore {
    fn set(&self, key: &str, value: &str) {
        self.status.insert(key.to_string(), value.to_string());
    }
}
