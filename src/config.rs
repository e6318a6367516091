//! Runtime configuration shared by every node of a cluster.

use std::time::Duration;

use serde::Serialize;

/// Default time a coordinator waits for a single replica.
const DEFAULT_REPLICA_TIMEOUT_MS: u64 = 1000;

/// Default upper bound on a stored value.
const DEFAULT_MAX_VALUE_BYTES: usize = 2 * 1024 * 1024;

/// Cluster tuning loaded from environment variables.
#[derive(Clone, Debug, Serialize)]
pub struct ClusterConfig {
    /// Per-request timeout for node-to-node calls (from KV_CLUSTER_REPLICA_TIMEOUT_MS)
    #[serde(with = "millis")]
    pub replica_timeout: Duration,
    /// Largest request body accepted (from KV_CLUSTER_MAX_VALUE_BYTES)
    pub max_value_bytes: usize,
}

impl ClusterConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        let replica_timeout = std::env::var("KV_CLUSTER_REPLICA_TIMEOUT_MS")
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_REPLICA_TIMEOUT_MS));

        let max_value_bytes = std::env::var("KV_CLUSTER_MAX_VALUE_BYTES")
            .ok()
            .and_then(|s| s.parse::<usize>().ok())
            .unwrap_or(DEFAULT_MAX_VALUE_BYTES);

        Self {
            replica_timeout,
            max_value_bytes,
        }
    }

    /// Create a config with an explicit replica timeout (for testing).
    pub fn with_replica_timeout(timeout: Duration) -> Self {
        Self {
            replica_timeout: timeout,
            ..Self::defaults()
        }
    }

    /// Create a config with an explicit body limit (for testing).
    pub fn with_max_value_bytes(max: usize) -> Self {
        Self {
            max_value_bytes: max,
            ..Self::defaults()
        }
    }

    fn defaults() -> Self {
        Self {
            replica_timeout: Duration::from_millis(DEFAULT_REPLICA_TIMEOUT_MS),
            max_value_bytes: DEFAULT_MAX_VALUE_BYTES,
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

mod millis {
    use std::time::Duration;

    use serde::Serializer;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_timeout_keeps_default_body_limit() {
        let config = ClusterConfig::with_replica_timeout(Duration::from_millis(50));
        assert_eq!(config.replica_timeout, Duration::from_millis(50));
        assert_eq!(config.max_value_bytes, DEFAULT_MAX_VALUE_BYTES);
    }

    #[test]
    fn explicit_body_limit_keeps_default_timeout() {
        let config = ClusterConfig::with_max_value_bytes(16);
        assert_eq!(config.max_value_bytes, 16);
        assert_eq!(
            config.replica_timeout,
            Duration::from_millis(DEFAULT_REPLICA_TIMEOUT_MS)
        );
    }

    #[test]
    fn serializes_timeout_as_millis() {
        let config = ClusterConfig::with_replica_timeout(Duration::from_millis(250));
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["replica_timeout"], 250);
    }
}
