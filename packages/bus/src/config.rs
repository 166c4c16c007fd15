//! Bus worker configuration.

use serde::{Deserialize, Serialize};

/// Configuration for a bus worker.
///
/// Every field has a default, so hosts can load partial JSON:
///
/// ```rust
/// use statebus_bus::BusConfig;
///
/// let config: BusConfig = serde_json::from_str(r#"{"replay_capacity": 1}"#).unwrap();
/// assert_eq!(config.replay_capacity, 1);
/// assert_eq!(config.command_capacity, BusConfig::default().command_capacity);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Capacity of the command channel between links and the worker.
    pub command_capacity: usize,

    /// Buffered notifications per observer before the observer applies
    /// backpressure to its members.
    pub observer_capacity: usize,

    /// Notifications retained per entry and replayed to late observers.
    pub replay_capacity: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            command_capacity: 64,
            observer_capacity: 256,
            replay_capacity: 64,
        }
    }
}
