//! Per-offering output channel registry.
//!
//! Each offering maps 1:1 to one output topic, provisioned lazily the first
//! time the offering appears on the CDC stream. The registry memoizes one
//! [`OfferingChannel`] handle per offering id; the handle owns the topic
//! name and a monotonically increasing sequence counter used as the message
//! key.
//!
//! The actual broker interaction sits behind [`ChannelProvider`] so the
//! registry (and everything above it) can be exercised against an in-memory
//! implementation in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::error::{ProvisionError, PublishError};
use crate::model::{EnrichedMeasurement, Offering};

/// Channel-management facility: topic creation plus acknowledged publishes.
#[async_trait]
pub trait ChannelProvider: Send + Sync {
    /// Requests creation of a channel.
    ///
    /// Must report [`ProvisionError::AlreadyExists`] distinctly — the
    /// registry treats it as success.
    async fn create_channel(&self, topic: &str) -> Result<(), ProvisionError>;

    /// Publishes one record and waits for delivery acknowledgment.
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), PublishError>;
}

/// A provisioned output channel for one offering.
#[derive(Debug)]
pub struct OfferingChannel {
    offering_id: i64,
    topic: String,
    seq: AtomicU64,
}

impl OfferingChannel {
    fn new(offering_id: i64, topic: String) -> Self {
        Self {
            offering_id,
            topic,
            seq: AtomicU64::new(0),
        }
    }

    /// The offering this channel belongs to.
    #[must_use]
    pub fn offering_id(&self) -> i64 {
        self.offering_id
    }

    /// The provisioned topic name.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Claims the next sequence number. Strictly increasing per channel.
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    /// The number of sequence values claimed so far.
    #[must_use]
    pub fn sequence(&self) -> u64 {
        self.seq.load(Ordering::Relaxed)
    }
}

/// Registry of provisioned output channels, one per offering id.
pub struct OfferingRegistry {
    provider: Box<dyn ChannelProvider>,
    namespace: String,
    channels: RwLock<FxHashMap<i64, Arc<OfferingChannel>>>,
}

impl OfferingRegistry {
    /// Creates a registry publishing under the given namespace.
    pub fn new(namespace: impl Into<String>, provider: impl ChannelProvider + 'static) -> Self {
        Self {
            provider: Box::new(provider),
            namespace: namespace.into(),
            channels: RwLock::new(FxHashMap::default()),
        }
    }

    /// The deterministic topic name for an offering.
    #[must_use]
    pub fn channel_topic(&self, offering_id: i64) -> String {
        format!("{}.offerings.{offering_id}", self.namespace)
    }

    /// Returns the channel handle for an offering, if one is registered.
    #[must_use]
    pub fn channel(&self, offering_id: i64) -> Option<Arc<OfferingChannel>> {
        self.channels.read().get(&offering_id).cloned()
    }

    /// Topic names of all registered channels.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        self.channels
            .read()
            .values()
            .map(|c| c.topic.clone())
            .collect()
    }

    /// Ensures a channel exists for the offering, provisioning it on first
    /// sight. Idempotent per offering id, and safe to call concurrently for
    /// the same id: the first registered handle wins.
    ///
    /// A provisioning failure other than "already exists" leaves the
    /// offering unregistered; its output is dropped until a later offering
    /// event retries. Returns the handle, or `None` on failure.
    pub async fn ensure_channel(&self, offering: &Offering) -> Option<Arc<OfferingChannel>> {
        if let Some(existing) = self.channel(offering.id) {
            return Some(existing);
        }

        let topic = self.channel_topic(offering.id);
        match self.provider.create_channel(&topic).await {
            Ok(()) => info!(topic = %topic, offering = offering.id, "output channel created"),
            Err(ProvisionError::AlreadyExists(_)) => {
                warn!(topic = %topic, "output channel existed, reusing");
            }
            Err(e) => {
                warn!(
                    offering = offering.id,
                    identifier = %offering.identifier,
                    error = %e,
                    "could not provision output channel, offering unavailable"
                );
                return None;
            }
        }

        let mut channels = self.channels.write();
        let handle = channels
            .entry(offering.id)
            .or_insert_with(|| Arc::new(OfferingChannel::new(offering.id, topic)));
        Some(Arc::clone(handle))
    }

    /// Publishes an enriched measurement to the offering's channel, keyed by
    /// the channel's next sequence number, waiting for acknowledgment.
    ///
    /// Returns `true` only when delivery was acknowledged. Every failure
    /// path (no channel, serialization, delivery) drops the measurement
    /// with a warning — there is no retry at this layer.
    pub async fn publish(&self, offering_id: i64, measurement: &EnrichedMeasurement) -> bool {
        let Some(channel) = self.channel(offering_id) else {
            warn!(
                offering = offering_id,
                "no output channel registered for offering, dropping measurement"
            );
            return false;
        };

        let payload = match serde_json::to_string(measurement) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(offering = offering_id, error = %e, "could not serialize measurement");
                return false;
            }
        };

        let key = channel.next_seq().to_string();
        match self.provider.publish(&channel.topic, &key, &payload).await {
            Ok(()) => {
                debug!(topic = %channel.topic, key = %key, "measurement published");
                true
            }
            Err(e) => {
                warn!(topic = %channel.topic, error = %e, "delivery failed, dropping measurement");
                false
            }
        }
    }
}

impl std::fmt::Debug for OfferingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfferingRegistry")
            .field("namespace", &self.namespace)
            .field("channels", &self.channels.read().len())
            .finish_non_exhaustive()
    }
}
