//! Bridge process bootstrap.
//!
//! Wires the engine to Kafka and the connector control plane: register the
//! CDC source connector, spawn the retry worker, run the ingestion loop
//! until interrupted, then let the worker drain.

use std::sync::Arc;

use parking_lot::Mutex;
use rdkafka::consumer::Consumer;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sos_stream::cdc::TopicMap;
use sos_stream::config::BridgeConfig;
use sos_stream::connect::ConnectClient;
use sos_stream::ingest::{self, CdcRouter};
use sos_stream::kafka::{self, KafkaChannelProvider};
use sos_stream::metrics::PipelineMetrics;
use sos_stream::registry::OfferingRegistry;
use sos_stream::worker::spawn_enrichment_worker;
use sos_stream::MetadataCache;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = BridgeConfig::from_env();
    info!(
        brokers = %config.brokers,
        namespace = %config.namespace,
        group = %config.group_id,
        "starting sos-stream"
    );

    let topics = TopicMap::new(&config.namespace, &config.db_schema);
    let consumer = kafka::build_consumer(&config)?;
    let topic_names = topics.topics();
    let topic_refs: Vec<&str> = topic_names.iter().map(String::as_str).collect();
    consumer.subscribe(&topic_refs)?;
    info!(topics = ?topic_names, "subscribed to CDC topics");

    // The control plane may still be coming up alongside this process.
    tokio::time::sleep(config.startup_delay).await;
    let connect = ConnectClient::new(&config.connect_base_url);
    connect.register_source_connector(&config).await?;

    let provider = KafkaChannelProvider::new(&config)?;
    let registry = Arc::new(OfferingRegistry::new(config.namespace.clone(), provider));
    let cache = Arc::new(Mutex::new(MetadataCache::new()));
    let metrics = Arc::new(PipelineMetrics::default());

    let (values_tx, values_rx) = mpsc::channel(config.queue_capacity);
    let worker = spawn_enrichment_worker(
        values_rx,
        Arc::clone(&cache),
        Arc::clone(&registry),
        config.retry.clone(),
        Arc::clone(&metrics),
    );

    let router = CdcRouter::new(cache, registry, values_tx, topics, Arc::clone(&metrics));

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("interrupt received, shutting down");
                cancel.cancel();
            }
        });
    }

    // Runs until cancelled; dropping the router closes the value queue so
    // the worker drains what was already enqueued.
    ingest::run_ingest_loop(router, consumer, cancel).await;

    if let Err(e) = worker.await {
        warn!(error = %e, "enrichment worker did not stop cleanly");
    }

    let snap = metrics.snapshot();
    info!(
        events = snap.events,
        published = snap.published,
        dropped = snap.dropped,
        discarded = snap.discarded,
        "sos-stream stopped"
    );
    Ok(())
}
