//! Configuration for loop threads and logging.
//!
//! # Invariants
//! - Every field has a default, so partial documents deserialize.
//! - Loop configuration is validated before a thread is spawned.

use crate::logging::default_log_level;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const DEFAULT_LOOP_NAME: &str = "weakpost-loop";
/// Smallest stack accepted for a loop thread.
pub const MIN_STACK_SIZE: usize = 64 * 1024;

/// Settings for a thread-backed [`crate::Looper`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LooperConfig {
    /// Thread name, also reported by the loop handle.
    pub name: String,
    /// Optional stack size in bytes for the loop thread.
    pub stack_size: Option<usize>,
}

impl Default for LooperConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_LOOP_NAME.to_string(),
            stack_size: None,
        }
    }
}

impl LooperConfig {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() || self.name.contains('\0') {
            return Err(ConfigError::InvalidThreadName(self.name.clone()));
        }
        if let Some(size) = self.stack_size {
            if size < MIN_STACK_SIZE {
                return Err(ConfigError::InvalidStackSize(size));
            }
        }
        Ok(())
    }
}

/// Logging sink and level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// One of `trace|debug|info|warn|error`, case-insensitive.
    pub level: String,
    /// Absolute directory for rotated log files; stderr when absent.
    pub log_dir: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level().to_string(),
            log_dir: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    InvalidThreadName(String),
    InvalidStackSize(usize),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidThreadName(value) => write!(f, "loop thread name is invalid: {value:?}"),
            Self::InvalidStackSize(value) => write!(
                f,
                "loop stack size {value} is below the minimum of {MIN_STACK_SIZE} bytes"
            ),
        }
    }
}

impl Error for ConfigError {}
