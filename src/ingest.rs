//! The CDC ingestion loop.
//!
//! One control loop pulls the ordered CDC event stream, classifies each
//! event by source table, and dispatches it: dimension and relational rows
//! are upserted into the [`MetadataCache`], offerings additionally trigger
//! channel provisioning, and live fact rows are handed to the retry worker
//! through a bounded queue. Snapshot-replay fact rows are skipped — only
//! post-backlog inserts are enriched.
//!
//! The loop blocks on the stream receive and exits cooperatively via a
//! [`CancellationToken`], mirroring the shutdown discipline of the Kafka
//! reader task elsewhere in this crate.

use std::sync::Arc;

use parking_lot::Mutex;
use rdkafka::consumer::{Consumer, StreamConsumer};
use rdkafka::message::Message;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::MetadataCache;
use crate::cdc::{self, CdcEvent, SourceTable, TopicMap};
use crate::error::EventError;
use crate::metrics::PipelineMetrics;
use crate::model::{
    Feature, ObservableProperty, Observation, Offering, Procedure, RawValue, Series, Unit,
};
use crate::registry::OfferingRegistry;

/// Classifies and dispatches CDC events.
///
/// Owns the sending half of the raw-value queue; dropping the router closes
/// the queue, which lets the retry worker drain and stop.
pub struct CdcRouter {
    cache: Arc<Mutex<MetadataCache>>,
    registry: Arc<OfferingRegistry>,
    values_tx: mpsc::Sender<RawValue>,
    topics: TopicMap,
    metrics: Arc<PipelineMetrics>,
}

impl CdcRouter {
    /// Creates a router over the given shared state.
    #[must_use]
    pub fn new(
        cache: Arc<Mutex<MetadataCache>>,
        registry: Arc<OfferingRegistry>,
        values_tx: mpsc::Sender<RawValue>,
        topics: TopicMap,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            cache,
            registry,
            values_tx,
            topics,
            metrics,
        }
    }

    /// Handles one raw event from the stream.
    ///
    /// Malformed events are discarded with a warning; events without an
    /// after-image are discarded quietly (tombstones and deletes look the
    /// same). Neither is ever fatal.
    pub async fn handle_event(&self, topic: &str, payload: &[u8]) {
        let event = match cdc::parse_event(payload) {
            Ok(Some(event)) => event,
            Ok(None) => {
                debug!(topic = %topic, "event without after-image, discarding");
                self.metrics.record_discarded();
                return;
            }
            Err(e) => {
                warn!(topic = %topic, error = %e, "malformed CDC event, discarding");
                self.metrics.record_discarded();
                return;
            }
        };

        let Some(table) = self.topics.classify(topic) else {
            debug!(topic = %topic, "event from unrecognized topic, discarding");
            return;
        };

        match self.dispatch(table, event).await {
            Ok(()) => self.metrics.record_event(),
            Err(e) => {
                warn!(topic = %topic, error = %e, "could not decode after-image, discarding");
                self.metrics.record_discarded();
            }
        }
    }

    async fn dispatch(&self, table: SourceTable, event: CdcEvent) -> Result<(), EventError> {
        match table {
            SourceTable::Observation => {
                let observation = Observation::from_after(&event.after)?;
                debug!(id = observation.id, series = observation.series_id, "observation cached");
                self.cache.lock().upsert_observation(observation);
            }
            SourceTable::Series => {
                let series = Series::from_after(&event.after)?;
                debug!(id = series.id, offering = series.offering_id, "series cached");
                self.cache.lock().upsert_series(series);
            }
            SourceTable::Procedure => {
                let procedure = Procedure::from_after(&event.after)?;
                debug!(id = procedure.id, identifier = %procedure.identifier, "procedure cached");
                self.cache.lock().upsert_procedure(procedure);
            }
            SourceTable::ObservableProperty => {
                let property = ObservableProperty::from_after(&event.after)?;
                debug!(id = property.id, "observable property cached");
                self.cache.lock().upsert_observable_property(property);
            }
            SourceTable::Unit => {
                let unit = Unit::from_after(&event.after)?;
                debug!(id = unit.id, unit = %unit.unit, "unit cached");
                self.cache.lock().upsert_unit(unit);
            }
            SourceTable::Feature => {
                let feature = Feature::from_after(&event.after)?;
                debug!(id = feature.id, identifier = %feature.identifier, "feature cached");
                self.cache.lock().upsert_feature(feature);
            }
            SourceTable::Offering => {
                let offering = Offering::from_after(&event.after)?;
                info!(id = offering.id, identifier = %offering.identifier, "offering seen");
                self.cache.lock().upsert_offering(offering.clone());
                // Lock released above; provisioning may block on the broker.
                self.registry.ensure_channel(&offering).await;
            }
            SourceTable::NumericValue => {
                if event.snapshot {
                    debug!("snapshot value, ignoring");
                    self.metrics.record_snapshot_skipped();
                    return Ok(());
                }
                let raw = RawValue::from_after(&event.after)?;
                if self.values_tx.send(raw).await.is_err() {
                    warn!("enrichment worker is gone, dropping value");
                }
            }
        }
        Ok(())
    }
}

/// Drives the CDC consumer until cancellation.
///
/// Consumes the router; when the loop exits the router (and with it the
/// raw-value queue sender) is dropped, so the retry worker drains whatever
/// was enqueued and then stops. Unacknowledged stream messages are not
/// redelivered by this design.
pub async fn run_ingest_loop(
    router: CdcRouter,
    consumer: StreamConsumer,
    cancel: CancellationToken,
) {
    info!("CDC ingestion loop started");
    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                info!("shutdown signal received, stopping CDC consumer");
                break;
            }

            msg = consumer.recv() => match msg {
                Ok(message) => {
                    if let Some(payload) = message.payload() {
                        router.handle_event(message.topic(), payload).await;
                    }
                }
                Err(e) => warn!(error = %e, "Kafka consumer error"),
            },
        }
    }
    consumer.unsubscribe();
    info!("CDC ingestion loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ProvisionError, PublishError};
    use crate::registry::ChannelProvider;
    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct NullProvider;

    #[async_trait]
    impl ChannelProvider for NullProvider {
        async fn create_channel(&self, _topic: &str) -> Result<(), ProvisionError> {
            Ok(())
        }

        async fn publish(&self, _t: &str, _k: &str, _p: &str) -> Result<(), PublishError> {
            Ok(())
        }
    }

    struct Fixture {
        cache: Arc<Mutex<MetadataCache>>,
        registry: Arc<OfferingRegistry>,
        metrics: Arc<PipelineMetrics>,
        values_rx: mpsc::Receiver<RawValue>,
        router: CdcRouter,
    }

    fn fixture() -> Fixture {
        let cache = Arc::new(Mutex::new(MetadataCache::new()));
        let registry = Arc::new(OfferingRegistry::new("sos", NullProvider));
        let metrics = Arc::new(PipelineMetrics::default());
        let (values_tx, values_rx) = mpsc::channel(16);
        let router = CdcRouter::new(
            Arc::clone(&cache),
            Arc::clone(&registry),
            values_tx,
            TopicMap::new("sos", "public"),
            Arc::clone(&metrics),
        );
        Fixture {
            cache,
            registry,
            metrics,
            values_rx,
            router,
        }
    }

    fn envelope(after: Value, snapshot: bool) -> Vec<u8> {
        json!({ "payload": { "after": after, "source": { "snapshot": snapshot } } })
            .to_string()
            .into_bytes()
    }

    #[tokio::test]
    async fn test_dimension_event_is_cached() {
        let f = fixture();
        let raw = envelope(json!({ "unitid": 1, "unit": "Cel" }), false);
        f.router.handle_event("sos.public.unit", &raw).await;

        assert_eq!(f.cache.lock().get_unit(1).unwrap().unit, "Cel");
        assert_eq!(f.metrics.snapshot().events, 1);
    }

    #[tokio::test]
    async fn test_offering_event_provisions_channel() {
        let f = fixture();
        let raw = envelope(
            json!({ "offeringid": 7, "identifier": "off/7", "name": "Offering 7" }),
            false,
        );
        f.router.handle_event("sos.public.offering", &raw).await;

        assert!(f.cache.lock().get_offering(7).is_some());
        assert_eq!(f.registry.channel(7).unwrap().topic(), "sos.offerings.7");
    }

    #[tokio::test]
    async fn test_live_value_reaches_queue() {
        let mut f = fixture();
        let raw = envelope(json!({ "observationid": 3, "value": 12.25 }), false);
        f.router.handle_event("sos.public.numericvalue", &raw).await;

        let value = f.values_rx.try_recv().unwrap();
        assert_eq!(value.observation_id, 3);
        assert!((value.value - 12.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_snapshot_value_is_suppressed() {
        let mut f = fixture();
        let raw = envelope(json!({ "observationid": 3, "value": 12.25 }), true);
        f.router.handle_event("sos.public.numericvalue", &raw).await;

        assert!(f.values_rx.try_recv().is_err());
        assert_eq!(f.metrics.snapshot().snapshots_skipped, 1);
    }

    #[tokio::test]
    async fn test_malformed_event_is_discarded() {
        let f = fixture();
        f.router.handle_event("sos.public.unit", b"not json").await;
        assert_eq!(f.metrics.snapshot().discarded, 1);
        assert_eq!(f.metrics.snapshot().events, 0);
    }

    #[tokio::test]
    async fn test_event_without_after_image_is_discarded() {
        let f = fixture();
        let raw = json!({ "payload": { "after": null } }).to_string().into_bytes();
        f.router.handle_event("sos.public.unit", &raw).await;
        assert_eq!(f.metrics.snapshot().discarded, 1);
    }

    #[tokio::test]
    async fn test_unknown_topic_is_ignored() {
        let f = fixture();
        let raw = envelope(json!({ "x": 1 }), false);
        f.router.handle_event("sos.public.spatial_ref_sys", &raw).await;
        assert_eq!(f.metrics.snapshot().events, 0);
        assert_eq!(f.metrics.snapshot().discarded, 0);
    }

    #[tokio::test]
    async fn test_bad_row_fields_are_discarded() {
        let f = fixture();
        let raw = envelope(json!({ "unitid": "one", "unit": "Cel" }), false);
        f.router.handle_event("sos.public.unit", &raw).await;
        assert_eq!(f.metrics.snapshot().discarded, 1);
    }
}
