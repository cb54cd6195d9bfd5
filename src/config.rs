//! Recorder configuration loaded from a TOML file.
//!
//! Every field has a default, so an empty file (or no file at all) is valid.
//!
//! ```toml
//! batch_size = 6000
//! slow_event_ms = 500
//! definition_kind = "def"
//! halt_on_fatal = true
//!
//! [objects]
//! max_inspect_len = 500
//! max_depth = 128
//! max_instance_fields = 64
//!
//! [capture]
//! return_values = true
//! receivers = true
//! variables = true
//! arguments = true
//! ```

use crate::domain::sink::DEFAULT_BATCH_SIZE;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderConfig {
    /// Buffered graph operations per flush.
    pub batch_size: usize,
    /// Events slower than this to process get a warning.
    pub slow_event_ms: u64,
    /// AST node type the cross-linker matches trace points against.
    pub definition_kind: String,
    /// Exit the process on a fatal recorder error instead of returning it.
    pub halt_on_fatal: bool,
    pub objects: ObjectLimits,
    pub capture: CaptureConfig,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            slow_event_ms: 500,
            definition_kind: "def".to_string(),
            halt_on_fatal: true,
            objects: ObjectLimits::default(),
            capture: CaptureConfig::default(),
        }
    }
}

impl RecorderConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    pub fn slow_event_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_event_ms)
    }
}

/// Bounds on object graph expansion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectLimits {
    /// Representations are cut to this many characters.
    pub max_inspect_len: usize,
    /// Nesting depth past which values are recorded without expanding their edges.
    pub max_depth: usize,
    /// Instance fields followed per object; `None` follows all of them.
    pub max_instance_fields: Option<usize>,
}

impl Default for ObjectLimits {
    fn default() -> Self {
        Self {
            max_inspect_len: 500,
            max_depth: 128,
            max_instance_fields: None,
        }
    }
}

/// Which side-channel data is captured per event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub return_values: bool,
    pub receivers: bool,
    pub variables: bool,
    pub arguments: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            return_values: true,
            receivers: true,
            variables: true,
            arguments: true,
        }
    }
}
