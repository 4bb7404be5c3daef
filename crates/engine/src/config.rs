//! Engine configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunables of the orchestration engine.
///
/// Every field has a default, so partial configuration files work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Events buffered for observers before new ones are dropped.
    pub observer_queue_capacity: usize,
    /// Capacity of the broadcast bus behind [`subscribe`](crate::OrchestrationEngine::subscribe).
    pub event_bus_capacity: usize,
    /// Timeout applied when a tracker declares no `timeout_ms`.
    #[serde(with = "duration_ms")]
    pub default_timeout: Duration,
    /// How many adviser fallbacks may be followed for one step response.
    pub max_adviser_fallback_depth: usize,
    /// Callbacks held for correlation ids nobody waits on yet. The oldest is
    /// dropped when the stash is full.
    pub callback_stash_capacity: usize,
    /// Ended plan executions kept in memory for manual retry. Older ones are
    /// evicted with their callback ledger and event bookkeeping.
    pub ended_plan_retention: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            observer_queue_capacity: 1024,
            event_bus_capacity: 256,
            default_timeout: Duration::from_secs(10 * 24 * 60 * 60),
            max_adviser_fallback_depth: 8,
            callback_stash_capacity: 1024,
            ended_plan_retention: 256,
        }
    }
}

impl EngineConfig {
    /// Defaults overridden by `STRATUS_ENGINE_*` environment variables.
    ///
    /// Reads `STRATUS_ENGINE_OBSERVER_QUEUE_CAPACITY`,
    /// `STRATUS_ENGINE_EVENT_BUS_CAPACITY`, `STRATUS_ENGINE_DEFAULT_TIMEOUT_MS`,
    /// `STRATUS_ENGINE_MAX_ADVISER_FALLBACK_DEPTH`,
    /// `STRATUS_ENGINE_CALLBACK_STASH_CAPACITY` and
    /// `STRATUS_ENGINE_ENDED_PLAN_RETENTION`. Unparsable values are ignored.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default().with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        let number = |key: &str| lookup(key).and_then(|raw| raw.trim().parse::<u64>().ok());

        if let Some(v) = number("STRATUS_ENGINE_OBSERVER_QUEUE_CAPACITY") {
            self.observer_queue_capacity = v as usize;
        }
        if let Some(v) = number("STRATUS_ENGINE_EVENT_BUS_CAPACITY") {
            self.event_bus_capacity = v as usize;
        }
        if let Some(v) = number("STRATUS_ENGINE_DEFAULT_TIMEOUT_MS") {
            self.default_timeout = Duration::from_millis(v);
        }
        if let Some(v) = number("STRATUS_ENGINE_MAX_ADVISER_FALLBACK_DEPTH") {
            self.max_adviser_fallback_depth = v as usize;
        }
        if let Some(v) = number("STRATUS_ENGINE_CALLBACK_STASH_CAPACITY") {
            self.callback_stash_capacity = v as usize;
        }
        if let Some(v) = number("STRATUS_ENGINE_ENDED_PLAN_RETENTION") {
            self.ended_plan_retention = v as usize;
        }
        self
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub(super) fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.observer_queue_capacity, 1024);
        assert_eq!(config.event_bus_capacity, 256);
        assert_eq!(config.default_timeout, Duration::from_secs(864_000));
        assert_eq!(config.max_adviser_fallback_depth, 8);
        assert_eq!(config.callback_stash_capacity, 1024);
        assert_eq!(config.ended_plan_retention, 256);
    }

    #[test]
    fn timeout_serializes_as_millis() {
        let config = EngineConfig {
            default_timeout: Duration::from_millis(1500),
            ..EngineConfig::default()
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["default_timeout"], 1500);
    }

    #[test]
    fn partial_config_fills_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"default_timeout": 50}"#).unwrap();
        assert_eq!(config.default_timeout, Duration::from_millis(50));
        assert_eq!(config.event_bus_capacity, 256);
    }

    #[test]
    fn overrides_apply_and_bad_values_are_ignored() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("STRATUS_ENGINE_EVENT_BUS_CAPACITY", "32"),
            ("STRATUS_ENGINE_DEFAULT_TIMEOUT_MS", "250"),
            ("STRATUS_ENGINE_MAX_ADVISER_FALLBACK_DEPTH", "lots"),
            ("STRATUS_ENGINE_ENDED_PLAN_RETENTION", "4"),
        ]);
        let config = EngineConfig::default().with_overrides(|key| env.get(key).map(|v| (*v).to_string()));

        assert_eq!(config.event_bus_capacity, 32);
        assert_eq!(config.default_timeout, Duration::from_millis(250));
        assert_eq!(config.max_adviser_fallback_depth, 8);
        assert_eq!(config.observer_queue_capacity, 1024);
        assert_eq!(config.ended_plan_retention, 4);
    }
}
