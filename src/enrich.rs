//! The enrichment engine: raw value in, denormalized measurement out.
//!
//! Enrichment joins a [`RawValue`](crate::model::RawValue) with its
//! observation, the observation's series, and the series' one-shot-resolved
//! dimension identifiers. The only side effect is that first resolution;
//! everything else is a pure lookup.

use crate::cache::MetadataCache;
use crate::error::EnrichError;
use crate::model::{EnrichedMeasurement, RawValue, ResolvedRefs, SeriesRefs};

/// A successfully enriched measurement and the offering it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct Enriched {
    /// Target offering id, resolved through the series.
    pub offering_id: i64,
    /// The denormalized output record.
    pub measurement: EnrichedMeasurement,
}

/// Enriches a raw value against the cache.
///
/// Fails with [`EnrichError`] when the referenced observation or series has
/// not arrived yet — both are retryable, since the CDC stream delivers
/// tables in no particular relative order. Dimension lookups that miss do
/// not fail; the corresponding output fields are simply absent.
pub fn enrich(cache: &mut MetadataCache, raw: &RawValue) -> Result<Enriched, EnrichError> {
    let observation = cache
        .get_observation(raw.observation_id)
        .cloned()
        .ok_or(EnrichError::ObservationNotReady {
            observation_id: raw.observation_id,
        })?;

    let series = cache
        .resolve_series(observation.series_id)
        .ok_or(EnrichError::SeriesNotReady {
            series_id: observation.series_id,
        })?;

    let refs = match &series.refs {
        SeriesRefs::Resolved(refs) => refs.clone(),
        SeriesRefs::Unresolved => ResolvedRefs::default(),
    };

    Ok(Enriched {
        offering_id: series.offering_id,
        measurement: EnrichedMeasurement {
            procedure: refs.procedure,
            feature: refs.feature,
            observable_property: refs.observable_property,
            phenomenon_time_start: observation.phenomenon_time_start,
            phenomenon_time_end: observation.phenomenon_time_end,
            result_time: observation.result_time,
            unit: refs.unit,
            value: raw.value,
        },
    })
}
