//! Configuration types for event stream factories

use serde::{Deserialize, Serialize};

/// What the host error sink does with an error nobody handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UncaughtErrorPolicy {
    /// Log the error at `error` level
    #[default]
    Log,
    /// Panic on the thread that ran the failing deferred task
    Panic,
    /// Drop the error silently
    Ignore,
}

/// Configuration for a `StreamFactory`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Label attached to log lines emitted by streams of this factory
    pub name: String,
    pub uncaught_errors: UncaughtErrorPolicy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            name: "eventstream".to_string(),
            uncaught_errors: UncaughtErrorPolicy::Log,
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the log label
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Set the uncaught error policy
    pub fn uncaught_errors(mut self, policy: UncaughtErrorPolicy) -> Self {
        self.uncaught_errors = policy;
        self
    }
}
