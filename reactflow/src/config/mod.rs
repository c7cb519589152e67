//! Engine configuration.

use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable overriding [`EngineConfig::buffer_size`].
pub const BUFFER_SIZE_ENV: &str = "REACTFLOW_BUFFER_SIZE";
/// Environment variable overriding [`EngineConfig::emit_events`].
pub const EMIT_EVENTS_ENV: &str = "REACTFLOW_EMIT_EVENTS";

fn default_buffer_size() -> usize {
    16
}

fn default_emit_events() -> bool {
    true
}

/// Settings shared by every artifact an engine builds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many elements an inlet requests from an external publisher ahead
    /// of consumption. Values below 1 are treated as 1.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Whether lifecycle events are sent to the event sink.
    #[serde(default = "default_emit_events")]
    pub emit_events: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            emit_events: default_emit_events(),
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the default configuration with environment overrides applied.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    /// Sets the inlet buffer size.
    #[must_use]
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Enables or disables lifecycle events.
    #[must_use]
    pub fn with_emit_events(mut self, emit_events: bool) -> Self {
        self.emit_events = emit_events;
        self
    }

    /// Returns the buffer size, never less than 1.
    #[must_use]
    pub fn effective_buffer_size(&self) -> usize {
        self.buffer_size.max(1)
    }

    /// Applies overrides read through `lookup`. Unparseable values are
    /// logged and ignored.
    #[must_use]
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(raw) = lookup(BUFFER_SIZE_ENV) {
            match raw.trim().parse::<usize>() {
                Ok(size) => self = self.with_buffer_size(size),
                Err(_) => warn!(variable = BUFFER_SIZE_ENV, value = %raw, "Ignoring invalid buffer size"),
            }
        }
        if let Some(raw) = lookup(EMIT_EVENTS_ENV) {
            match raw.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => self.emit_events = true,
                "0" | "false" | "no" | "off" => self.emit_events = false,
                _ => warn!(variable = EMIT_EVENTS_ENV, value = %raw, "Ignoring invalid flag"),
            }
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.buffer_size, 16);
        assert!(config.emit_events);
    }

    #[test]
    fn test_deserialize_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"buffer_size": 4}"#).unwrap();
        assert_eq!(config.buffer_size, 4);
        assert!(config.emit_events);

        let config: EngineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_builder_clamps_buffer_size() {
        let config = EngineConfig::new().with_buffer_size(0).with_emit_events(false);
        assert_eq!(config.buffer_size, 1);
        assert!(!config.emit_events);
    }

    #[test]
    fn test_effective_buffer_size_after_deserialize() {
        let config: EngineConfig = serde_json::from_str(r#"{"buffer_size": 0}"#).unwrap();
        assert_eq!(config.effective_buffer_size(), 1);
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::default()
            .with_overrides(lookup(&[(BUFFER_SIZE_ENV, "64"), (EMIT_EVENTS_ENV, "off")]));
        assert_eq!(config.buffer_size, 64);
        assert!(!config.emit_events);
    }

    #[test]
    fn test_invalid_overrides_ignored() {
        let config = EngineConfig::default()
            .with_overrides(lookup(&[(BUFFER_SIZE_ENV, "lots"), (EMIT_EVENTS_ENV, "maybe")]));
        assert_eq!(config, EngineConfig::default());
    }
}
