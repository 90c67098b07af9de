use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fs::File, io::BufReader, path::Path};

use crate::{Error, InternalResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Agent name, also used to label its traces.
    #[serde(default = "default_name")]
    pub name: String,

    /// Initial contents of the option store.
    #[serde(default)]
    pub options: HashMap<String, String>,

    /// Stop the runtime once the control-plane feed reaches end of input.
    #[serde(default = "default_true")]
    pub stop_on_feed_end: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            options: HashMap::new(),
            stop_on_feed_end: default_true(),
        }
    }
}

impl AgentConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        from_file(path)
    }

    /// Loads the config at `path`, or the defaults when no file exists there.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        if path.as_ref().exists() {
            Self::from_file(path)
        } else {
            Ok(Self::default())
        }
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path.as_ref()).map_err(|e| {
        Error::config(format!(
            "Failed to open config file {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::config(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_name() -> String {
    "MyAgent".to_string()
}

fn default_true() -> bool {
    true
}
