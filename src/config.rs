//! Bridge configuration.
//!
//! A plain struct with sensible defaults, overridable from the environment
//! (`SOS_STREAM_*` variables). No configuration file layer — the bridge is
//! container-shaped and its knobs are few.

use std::env;
use std::time::Duration;

use crate::worker::RetryConfig;

/// Configuration for one bridge process.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Kafka bootstrap servers.
    pub brokers: String,
    /// Consumer group id for the CDC subscription.
    pub group_id: String,
    /// Logical namespace; prefixes all inbound and outbound topic names.
    pub namespace: String,
    /// Database schema mirrored by the CDC source.
    pub db_schema: String,
    /// Base URL of the connector-management REST service.
    pub connect_base_url: String,
    /// CDC source connector declaration.
    pub connector: ConnectorSpec,
    /// Enrichment retry policy.
    pub retry: RetryConfig,
    /// Capacity of the raw-value queue between ingest loop and worker.
    pub queue_capacity: usize,
    /// How long to wait for a publish acknowledgment.
    pub delivery_timeout: Duration,
    /// Grace period before registering the connector; the control plane may
    /// still be booting when this process starts.
    pub startup_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            group_id: "sos-stream".to_string(),
            namespace: "sos".to_string(),
            db_schema: "public".to_string(),
            connect_base_url: "http://localhost:8083".to_string(),
            connector: ConnectorSpec::default(),
            retry: RetryConfig::default(),
            queue_capacity: 1024,
            delivery_timeout: Duration::from_secs(5),
            startup_delay: Duration::from_secs(5),
        }
    }
}

impl BridgeConfig {
    /// Builds a configuration from the environment, falling back to
    /// defaults for anything unset.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let connector_defaults = defaults.connector;
        Self {
            brokers: env_or("SOS_STREAM_BROKERS", defaults.brokers),
            group_id: env_or("SOS_STREAM_GROUP_ID", defaults.group_id),
            namespace: env_or("SOS_STREAM_NAMESPACE", defaults.namespace),
            db_schema: env_or("SOS_STREAM_DB_SCHEMA", defaults.db_schema),
            connect_base_url: env_or("SOS_STREAM_CONNECT_URL", defaults.connect_base_url),
            connector: ConnectorSpec {
                name: env_or("SOS_STREAM_CONNECTOR_NAME", connector_defaults.name),
                hostname: env_or("SOS_STREAM_DB_HOST", connector_defaults.hostname),
                port: env_or("SOS_STREAM_DB_PORT", connector_defaults.port),
                user: env_or("SOS_STREAM_DB_USER", connector_defaults.user),
                password: env_or("SOS_STREAM_DB_PASSWORD", connector_defaults.password),
                dbname: env_or("SOS_STREAM_DB_NAME", connector_defaults.dbname),
                snapshot_mode: env_or("SOS_STREAM_SNAPSHOT_MODE", connector_defaults.snapshot_mode),
            },
            retry: defaults.retry,
            queue_capacity: defaults.queue_capacity,
            delivery_timeout: defaults.delivery_timeout,
            startup_delay: defaults.startup_delay,
        }
    }
}

/// Declaration of the CDC source connector against the database.
#[derive(Debug, Clone)]
pub struct ConnectorSpec {
    /// Registration name at the control plane.
    pub name: String,
    /// Database host.
    pub hostname: String,
    /// Database port.
    pub port: String,
    /// Database user.
    pub user: String,
    /// Database password.
    pub password: String,
    /// Database name.
    pub dbname: String,
    /// Connector snapshot mode.
    pub snapshot_mode: String,
}

impl Default for ConnectorSpec {
    fn default() -> Self {
        Self {
            name: "sos-connector".to_string(),
            hostname: "postgres".to_string(),
            port: "5432".to_string(),
            user: "postgres".to_string(),
            password: "postgres".to_string(),
            dbname: "postgres".to_string(),
            snapshot_mode: "never".to_string(),
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    env::var(key).unwrap_or(default)
}
