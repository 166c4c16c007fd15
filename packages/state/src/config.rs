//! State worker configuration.

use serde::{Deserialize, Serialize};

/// How concurrent dispatches against one deployment are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchOrdering {
    /// Actions start as they arrive and may interleave; the last to finish
    /// wins.
    #[default]
    Interleaved,
    /// One action in flight per deployment; the rest queue in arrival order.
    ///
    /// An action must not dispatch against its own deployment through an
    /// effect under this ordering: it would wait on itself.
    Serialized,
}

/// Configuration for a state worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Prefix of every persisted key.
    pub namespace: String,

    /// Storage schema version; records of other versions are ignored and
    /// left for `clear` of that version.
    pub version: u32,

    /// Capacity of the command channel between links and the worker.
    pub command_capacity: usize,

    pub ordering: DispatchOrdering,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            namespace: "statebus".to_string(),
            version: 1,
            command_capacity: 64,
            ordering: DispatchOrdering::Interleaved,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_config_default() {
        let config = StateConfig::default();
        assert_eq!(config.namespace, "statebus");
        assert_eq!(config.version, 1);
        assert_eq!(config.ordering, DispatchOrdering::Interleaved);
    }

    #[test]
    fn ordering_from_json() {
        let config: StateConfig =
            serde_json::from_str(r#"{"ordering": "serialized", "version": 3}"#).unwrap();
        assert_eq!(config.ordering, DispatchOrdering::Serialized);
        assert_eq!(config.version, 3);
        assert_eq!(config.namespace, "statebus");
    }
}
