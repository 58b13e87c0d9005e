//! Socket pool configuration.

use crate::base::neterror::NetError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Socket pool configuration.
///
/// Fixed for the lifetime of a pool; pass it to
/// [`ClientSocketPool::start`](crate::socket::pool::ClientSocketPool::start).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Name to register the pool under in a
    /// [`PoolRegistry`](crate::socket::registry::PoolRegistry)
    pub name: Option<String>,
    /// Advisory capacity hint. Not enforced: the idle set is unbounded.
    pub pool_size: usize,
    /// How long a released socket may sit idle before it is evicted
    #[serde(rename = "idle_timeout_ms", with = "duration_ms")]
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self { name: None, pool_size: 50, idle_timeout: Duration::from_millis(150_000) }
    }
}

impl PoolConfig {
    /// Create a new config with defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from JSON. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, NetError> {
        serde_json::from_str(json).map_err(|e| {
            tracing::debug!(error = %e, "invalid pool configuration");
            NetError::InvalidConfig
        })
    }

    /// Set the pool name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the advisory pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the idle timeout.
    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

mod duration_ms {
    use serde::ser::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        let ms = u64::try_from(d.as_millis())
            .map_err(|_| S::Error::custom("idle timeout does not fit in u64 milliseconds"))?;
        s.serialize_u64(ms)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.name, None);
        assert_eq!(config.pool_size, 50);
        assert_eq!(config.idle_timeout, Duration::from_secs(150));
    }

    #[test]
    fn test_builder() {
        let config = PoolConfig::new()
            .with_name("api")
            .with_pool_size(10)
            .with_idle_timeout(Duration::from_millis(5000));
        assert_eq!(config.name.as_deref(), Some("api"));
        assert_eq!(config.pool_size, 10);
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_from_json_partial() {
        let config = PoolConfig::from_json(r#"{"idle_timeout_ms": 5000}"#).unwrap();
        assert_eq!(config.idle_timeout, Duration::from_secs(5));
        assert_eq!(config.pool_size, 50);
        assert_eq!(config.name, None);
    }

    #[test]
    fn test_json_shape() {
        let config =
            PoolConfig::new().with_name("default").with_idle_timeout(Duration::from_secs(2));
        let value = serde_json::to_value(&config).unwrap();
        assert_eq!(value["idle_timeout_ms"], 2000);
        assert_eq!(value["name"], "default");
    }

    #[test]
    fn test_oversized_timeout_does_not_serialize() {
        let config = PoolConfig::new().with_idle_timeout(Duration::MAX);
        assert!(serde_json::to_value(&config).is_err());
    }

    #[test]
    fn test_from_json_invalid() {
        assert_eq!(PoolConfig::from_json("{\"pool_size\": -1}"), Err(NetError::InvalidConfig));
    }
}
