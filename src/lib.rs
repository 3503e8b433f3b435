//! # `sos-stream`
//!
//! A CDC-driven enrichment bridge for sensor observation data.
//!
//! The bridge consumes a Debezium-style change-data-capture stream that
//! mirrors a relational observation schema, maintains an in-memory cache of
//! the slowly-changing dimension entities (procedures, features, observable
//! properties, units, offerings) and the relational entities joining them
//! (series, observations), and enriches every live raw numeric reading with
//! its full semantic context. Each enriched measurement is republished onto
//! a per-offering output topic that is provisioned on demand.
//!
//! ## Data flow
//!
//! ```text
//! CDC topics ──▶ ingest loop ──▶ MetadataCache (dimension upserts)
//!                    │                 ▲
//!                    │ raw values      │ lookups + one-shot resolution
//!                    ▼                 │
//!              retry worker ──▶ enrich ──▶ OfferingRegistry ──▶ output topic
//! ```
//!
//! Two execution contexts touch shared state: the ingest loop writes cache
//! upserts while the retry worker reads and resolves. A single exclusive
//! lock guards all cache mappings; it is never held across an await point.

#![deny(missing_docs)]
#![warn(clippy::all, clippy::pedantic)]

pub mod cache;
pub mod cdc;
pub mod config;
pub mod connect;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod kafka;
pub mod metrics;
pub mod model;
pub mod registry;
pub mod worker;

pub use cache::MetadataCache;
pub use config::BridgeConfig;
pub use enrich::enrich;
pub use ingest::CdcRouter;
pub use registry::{ChannelProvider, OfferingRegistry};
