//! Kafka-backed implementations of the bridge's broker seams.
//!
//! [`KafkaChannelProvider`] provisions output topics through the admin API
//! and publishes with an acknowledged producer. [`build_consumer`] creates
//! the CDC stream consumer. Everything above this module talks to traits
//! and is broker-agnostic.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::StreamConsumer;
use rdkafka::error::KafkaError;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::types::RDKafkaErrorCode;
use tracing::debug;

use crate::config::BridgeConfig;
use crate::error::{ProvisionError, PublishError};
use crate::registry::ChannelProvider;

/// Output topics are created with a single partition — ordering within an
/// offering is by the sequence key, and one partition keeps it total.
const OUTPUT_PARTITIONS: i32 = 1;
const OUTPUT_REPLICATION: TopicReplication<'static> = TopicReplication::Fixed(1);

/// Channel provider backed by a Kafka admin client and producer.
pub struct KafkaChannelProvider {
    admin: AdminClient<DefaultClientContext>,
    producer: FutureProducer,
    delivery_timeout: Duration,
}

impl KafkaChannelProvider {
    /// Creates the admin client and producer for the configured brokers.
    pub fn new(config: &BridgeConfig) -> Result<Self, KafkaError> {
        let admin = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .create()?;

        let producer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("acks", "all")
            .set("message.timeout.ms", "30000")
            .create()?;

        Ok(Self {
            admin,
            producer,
            delivery_timeout: config.delivery_timeout,
        })
    }
}

#[async_trait]
impl ChannelProvider for KafkaChannelProvider {
    async fn create_channel(&self, topic: &str) -> Result<(), ProvisionError> {
        let new_topic = NewTopic::new(topic, OUTPUT_PARTITIONS, OUTPUT_REPLICATION);
        let results = self
            .admin
            .create_topics(&[new_topic], &AdminOptions::new())
            .await
            .map_err(|e| ProvisionError::Failed {
                topic: topic.to_string(),
                message: e.to_string(),
            })?;

        for result in results {
            match result {
                Ok(name) => debug!(topic = %name, "topic created"),
                Err((name, RDKafkaErrorCode::TopicAlreadyExists)) => {
                    return Err(ProvisionError::AlreadyExists(name));
                }
                Err((name, code)) => {
                    return Err(ProvisionError::Failed {
                        topic: name,
                        message: code.to_string(),
                    });
                }
            }
        }
        Ok(())
    }

    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);
        match self.producer.send(record, self.delivery_timeout).await {
            Ok((partition, offset)) => {
                debug!(topic = %topic, partition, offset, "delivery acknowledged");
                Ok(())
            }
            Err((e, _unsent)) => Err(PublishError::Delivery {
                topic: topic.to_string(),
                message: e.to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for KafkaChannelProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaChannelProvider")
            .field("delivery_timeout", &self.delivery_timeout)
            .finish_non_exhaustive()
    }
}

/// Builds the CDC stream consumer. Subscription happens at the call site.
pub fn build_consumer(config: &BridgeConfig) -> Result<StreamConsumer, KafkaError> {
    ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .set("group.id", &config.group_id)
        .set("enable.partition.eof", "false")
        .set("auto.offset.reset", "earliest")
        .create()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_construction() {
        // No broker contact happens at construction time.
        let config = BridgeConfig::default();
        let provider = KafkaChannelProvider::new(&config).unwrap();
        assert_eq!(provider.delivery_timeout, Duration::from_secs(5));
    }

    #[tokio::test]
    async fn test_consumer_construction() {
        let config = BridgeConfig::default();
        assert!(build_consumer(&config).is_ok());
    }
}
