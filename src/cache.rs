//! In-memory cache of reference and relational entities.
//!
//! [`MetadataCache`] holds the latest version of every entity seen on the
//! CDC stream, keyed by id within each kind. Updates are upserts; there is
//! no tombstone handling and no eviction — entities live for the process
//! lifetime and the cache is rebuilt from the stream's initial backlog on
//! restart.
//!
//! The cache itself is not synchronized. It is shared between the ingest
//! loop (upserts) and the retry worker (lookups and series resolution)
//! behind a single exclusive lock owned by the caller; see the crate docs.

use rustc_hash::FxHashMap;

use crate::model::{
    Feature, ObservableProperty, Observation, Offering, Procedure, ResolvedRefs, Series,
    SeriesRefs, Unit,
};

/// In-memory store of all entity kinds, keyed by upstream id.
#[derive(Debug, Default)]
pub struct MetadataCache {
    observations: FxHashMap<i64, Observation>,
    series: FxHashMap<i64, Series>,
    procedures: FxHashMap<i64, Procedure>,
    offerings: FxHashMap<i64, Offering>,
    observable_properties: FxHashMap<i64, ObservableProperty>,
    units: FxHashMap<i64, Unit>,
    features: FxHashMap<i64, Feature>,
}

impl MetadataCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores or replaces an observation by id.
    pub fn upsert_observation(&mut self, observation: Observation) {
        self.observations.insert(observation.id, observation);
    }

    /// Stores or replaces a series by id.
    ///
    /// A replacement arrives unresolved, so a fresh CDC version of a series
    /// gets a fresh resolution attempt.
    pub fn upsert_series(&mut self, series: Series) {
        self.series.insert(series.id, series);
    }

    /// Stores or replaces a procedure by id.
    pub fn upsert_procedure(&mut self, procedure: Procedure) {
        self.procedures.insert(procedure.id, procedure);
    }

    /// Stores or replaces an offering by id.
    pub fn upsert_offering(&mut self, offering: Offering) {
        self.offerings.insert(offering.id, offering);
    }

    /// Stores or replaces an observable property by id.
    pub fn upsert_observable_property(&mut self, property: ObservableProperty) {
        self.observable_properties.insert(property.id, property);
    }

    /// Stores or replaces a unit by id.
    pub fn upsert_unit(&mut self, unit: Unit) {
        self.units.insert(unit.id, unit);
    }

    /// Stores or replaces a feature by id.
    pub fn upsert_feature(&mut self, feature: Feature) {
        self.features.insert(feature.id, feature);
    }

    /// Looks up an observation by id.
    #[must_use]
    pub fn get_observation(&self, id: i64) -> Option<&Observation> {
        self.observations.get(&id)
    }

    /// Looks up a series by id.
    #[must_use]
    pub fn get_series(&self, id: i64) -> Option<&Series> {
        self.series.get(&id)
    }

    /// Looks up an offering by id.
    #[must_use]
    pub fn get_offering(&self, id: i64) -> Option<&Offering> {
        self.offerings.get(&id)
    }

    /// Looks up a procedure by id.
    #[must_use]
    pub fn get_procedure(&self, id: i64) -> Option<&Procedure> {
        self.procedures.get(&id)
    }

    /// Looks up an observable property by id.
    #[must_use]
    pub fn get_observable_property(&self, id: i64) -> Option<&ObservableProperty> {
        self.observable_properties.get(&id)
    }

    /// Looks up a unit by id.
    #[must_use]
    pub fn get_unit(&self, id: i64) -> Option<&Unit> {
        self.units.get(&id)
    }

    /// Looks up a feature by id.
    #[must_use]
    pub fn get_feature(&self, id: i64) -> Option<&Feature> {
        self.features.get(&id)
    }

    /// Resolves a series' dimension back-references, at most once.
    ///
    /// If the series is unresolved, each referenced dimension is looked up;
    /// whichever are found are attached, and the series is marked resolved
    /// unconditionally — even when every lookup missed. Lookups that missed
    /// stay missing on later calls. Absence is represented, never an error.
    ///
    /// Returns `None` only when the series itself is not cached.
    pub fn resolve_series(&mut self, series_id: i64) -> Option<&Series> {
        let (unit_id, feature_id, property_id, procedure_id) = match self.series.get(&series_id) {
            Some(series) => match series.refs {
                SeriesRefs::Resolved(_) => return self.series.get(&series_id),
                SeriesRefs::Unresolved => (
                    series.unit_id,
                    series.feature_id,
                    series.observable_property_id,
                    series.procedure_id,
                ),
            },
            None => return None,
        };

        let resolved = ResolvedRefs {
            procedure: self
                .procedures
                .get(&procedure_id)
                .map(|p| p.identifier.clone()),
            feature: self.features.get(&feature_id).map(|f| f.identifier.clone()),
            observable_property: self
                .observable_properties
                .get(&property_id)
                .map(|p| p.identifier.clone()),
            unit: self.units.get(&unit_id).map(|u| u.unit.clone()),
        };

        let series = self.series.get_mut(&series_id)?;
        series.refs = SeriesRefs::Resolved(resolved);
        Some(series)
    }

    /// Resolves the offering a series belongs to.
    #[must_use]
    pub fn resolve_offering(&self, series: &Series) -> Option<&Offering> {
        self.offerings.get(&series.offering_id)
    }

    /// Number of cached series (for logging).
    #[must_use]
    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    /// Number of cached observations (for logging).
    #[must_use]
    pub fn observation_count(&self) -> usize {
        self.observations.len()
    }
}
