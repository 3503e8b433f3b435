//! Entity model for the mirrored observation schema.
//!
//! Reference and relational entities are decoded from CDC after-image rows.
//! Ids are assigned upstream and are unique within each entity kind only.
//! Timestamps arrive as epoch integers whose unit is disambiguated by
//! magnitude (seconds, milliseconds, or microseconds).

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;

use crate::error::EventError;

/// Epoch values above this are microseconds.
const MICROS_THRESHOLD: i64 = 1_000_000_000_000_000_000;
/// Epoch values above this (and below the micros threshold) are milliseconds.
const MILLIS_THRESHOLD: i64 = 1_000_000_000_000_000;

/// Converts a raw epoch integer into a UTC timestamp.
///
/// Values above 1e18 are treated as microseconds, above 1e15 as
/// milliseconds, everything else as seconds. Returns `None` for values
/// outside the representable range.
#[must_use]
pub fn epoch_to_datetime(raw: i64) -> Option<DateTime<Utc>> {
    if raw > MICROS_THRESHOLD {
        DateTime::from_timestamp_micros(raw)
    } else if raw > MILLIS_THRESHOLD {
        DateTime::from_timestamp_millis(raw)
    } else {
        DateTime::from_timestamp(raw, 0)
    }
}

fn require<'a>(after: &'a Value, field: &'static str) -> Result<&'a Value, EventError> {
    match after.get(field) {
        Some(value) if !value.is_null() => Ok(value),
        _ => Err(EventError::MissingField(field)),
    }
}

fn field_i64(after: &Value, field: &'static str) -> Result<i64, EventError> {
    require(after, field)?
        .as_i64()
        .ok_or(EventError::InvalidField { field })
}

fn field_f64(after: &Value, field: &'static str) -> Result<f64, EventError> {
    require(after, field)?
        .as_f64()
        .ok_or(EventError::InvalidField { field })
}

fn field_string(after: &Value, field: &'static str) -> Result<String, EventError> {
    require(after, field)?
        .as_str()
        .map(str::to_owned)
        .ok_or(EventError::InvalidField { field })
}

fn field_timestamp(after: &Value, field: &'static str) -> Result<DateTime<Utc>, EventError> {
    let raw = field_i64(after, field)?;
    epoch_to_datetime(raw).ok_or(EventError::TimestampOutOfRange(field))
}

/// Sensor or process identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Procedure {
    /// Upstream-assigned id.
    pub id: i64,
    /// Stable identity string.
    pub identifier: String,
}

impl Procedure {
    /// Decodes a procedure from a CDC after-image row.
    pub fn from_after(after: &Value) -> Result<Self, EventError> {
        Ok(Self {
            id: field_i64(after, "procedureid")?,
            identifier: field_string(after, "identifier")?,
        })
    }
}

/// Measured phenomenon identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservableProperty {
    /// Upstream-assigned id.
    pub id: i64,
    /// Stable identity string.
    pub identifier: String,
}

impl ObservableProperty {
    /// Decodes an observable property from a CDC after-image row.
    pub fn from_after(after: &Value) -> Result<Self, EventError> {
        Ok(Self {
            id: field_i64(after, "observablepropertyid")?,
            identifier: field_string(after, "identifier")?,
        })
    }
}

/// Unit of measure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Unit {
    /// Upstream-assigned id.
    pub id: i64,
    /// Unit symbol, e.g. `Cel`.
    pub unit: String,
}

impl Unit {
    /// Decodes a unit from a CDC after-image row.
    pub fn from_after(after: &Value) -> Result<Self, EventError> {
        Ok(Self {
            id: field_i64(after, "unitid")?,
            unit: field_string(after, "unit")?,
        })
    }
}

/// Feature of interest: the real-world object a series observes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Feature {
    /// Upstream-assigned id.
    pub id: i64,
    /// Stable identity string.
    pub identifier: String,
    /// Display name.
    pub name: String,
    /// Feature type code.
    pub feature_type: i64,
}

impl Feature {
    /// Decodes a feature from a CDC after-image row.
    pub fn from_after(after: &Value) -> Result<Self, EventError> {
        Ok(Self {
            id: field_i64(after, "featureofinterestid")?,
            identifier: field_string(after, "identifier")?,
            name: field_string(after, "name")?,
            feature_type: field_i64(after, "featureofinteresttypeid")?,
        })
    }
}

/// A named logical collection of series, mapped 1:1 to one output channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Offering {
    /// Upstream-assigned id.
    pub id: i64,
    /// Stable identity string.
    pub identifier: String,
    /// Display name.
    pub name: String,
}

impl Offering {
    /// Decodes an offering from a CDC after-image row.
    pub fn from_after(after: &Value) -> Result<Self, EventError> {
        Ok(Self {
            id: field_i64(after, "offeringid")?,
            identifier: field_string(after, "identifier")?,
            name: field_string(after, "name")?,
        })
    }
}

/// Dimension back-references of a series, resolved lazily and exactly once.
///
/// `Unresolved` means resolution has never been attempted. `Resolved` is
/// terminal: lookups that missed stay `None` for the process lifetime even
/// if the dimension row arrives later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SeriesRefs {
    /// Resolution has not been attempted yet.
    Unresolved,
    /// Resolution was attempted; whatever was found at that moment.
    Resolved(ResolvedRefs),
}

/// The dimension identifiers found during a series' single resolution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvedRefs {
    /// Procedure identifier, if the procedure was cached at resolution time.
    pub procedure: Option<String>,
    /// Feature identifier, if cached at resolution time.
    pub feature: Option<String>,
    /// Observable property identifier, if cached at resolution time.
    pub observable_property: Option<String>,
    /// Unit symbol, if cached at resolution time.
    pub unit: Option<String>,
}

/// The combination of procedure, feature, observable property, and unit
/// identifying a time series, plus its owning offering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Series {
    /// Upstream-assigned id.
    pub id: i64,
    /// Referenced feature id.
    pub feature_id: i64,
    /// Referenced observable property id.
    pub observable_property_id: i64,
    /// Referenced procedure id.
    pub procedure_id: i64,
    /// Owning offering id.
    pub offering_id: i64,
    /// Referenced unit id.
    pub unit_id: i64,
    /// Lazily-resolved dimension back-references.
    pub refs: SeriesRefs,
}

impl Series {
    /// Decodes a series from a CDC after-image row. Starts unresolved.
    pub fn from_after(after: &Value) -> Result<Self, EventError> {
        Ok(Self {
            id: field_i64(after, "seriesid")?,
            feature_id: field_i64(after, "featureofinterestid")?,
            observable_property_id: field_i64(after, "observablepropertyid")?,
            procedure_id: field_i64(after, "procedureid")?,
            offering_id: field_i64(after, "offeringid")?,
            unit_id: field_i64(after, "unitid")?,
            refs: SeriesRefs::Unresolved,
        })
    }

    /// Whether resolution has been attempted for this series.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        matches!(self.refs, SeriesRefs::Resolved(_))
    }
}

/// A measurement event referencing exactly one series.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    /// Upstream-assigned id.
    pub id: i64,
    /// Referenced series id.
    pub series_id: i64,
    /// Stable identity string.
    pub identifier: String,
    /// Start of the phenomenon time interval.
    pub phenomenon_time_start: DateTime<Utc>,
    /// End of the phenomenon time interval.
    pub phenomenon_time_end: DateTime<Utc>,
    /// When the result became available.
    pub result_time: DateTime<Utc>,
}

impl Observation {
    /// Decodes an observation from a CDC after-image row.
    pub fn from_after(after: &Value) -> Result<Self, EventError> {
        Ok(Self {
            id: field_i64(after, "observationid")?,
            series_id: field_i64(after, "seriesid")?,
            identifier: field_string(after, "identifier")?,
            phenomenon_time_start: field_timestamp(after, "phenomenontimestart")?,
            phenomenon_time_end: field_timestamp(after, "phenomenontimeend")?,
            result_time: field_timestamp(after, "resulttime")?,
        })
    }
}

/// The fact-table payload: a raw numeric reading.
///
/// Never stored; transient input to the enrichment engine. The referenced
/// observation may not be cached yet when the value arrives.
#[derive(Debug, Clone, PartialEq)]
pub struct RawValue {
    /// Referenced observation id.
    pub observation_id: i64,
    /// The numeric reading.
    pub value: f64,
}

impl RawValue {
    /// Decodes a raw value from a CDC after-image row.
    pub fn from_after(after: &Value) -> Result<Self, EventError> {
        Ok(Self {
            observation_id: field_i64(after, "observationid")?,
            value: field_f64(after, "value")?,
        })
    }
}

/// A fully denormalized measurement, ready for publishing.
///
/// Dimension fields that failed to resolve are omitted from the serialized
/// output entirely, never emitted as null. Timestamps serialize as epoch
/// milliseconds.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedMeasurement {
    /// Procedure identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub procedure: Option<String>,
    /// Feature identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feature: Option<String>,
    /// Observable property identifier.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub observable_property: Option<String>,
    /// Start of the phenomenon time interval.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub phenomenon_time_start: DateTime<Utc>,
    /// End of the phenomenon time interval.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub phenomenon_time_end: DateTime<Utc>,
    /// When the result became available.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub result_time: DateTime<Utc>,
    /// Unit symbol.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
    /// The numeric reading.
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_epoch_seconds() {
        let ts = epoch_to_datetime(1_500_000_000).unwrap();
        assert_eq!(ts.timestamp(), 1_500_000_000);
    }

    #[test]
    fn test_epoch_millis() {
        let ts = epoch_to_datetime(1_500_000_000_000_000).unwrap();
        assert_eq!(ts.timestamp_millis(), 1_500_000_000_000_000);
    }

    #[test]
    fn test_epoch_micros() {
        let ts = epoch_to_datetime(1_500_000_000_000_000_000).unwrap();
        assert_eq!(ts.timestamp_micros(), 1_500_000_000_000_000_000);
    }

    #[test]
    fn test_procedure_from_after() {
        let after = json!({ "procedureid": 1, "identifier": "proc/1" });
        let proc = Procedure::from_after(&after).unwrap();
        assert_eq!(proc.id, 1);
        assert_eq!(proc.identifier, "proc/1");
    }

    #[test]
    fn test_series_from_after_starts_unresolved() {
        let after = json!({
            "seriesid": 9,
            "featureofinterestid": 1,
            "observablepropertyid": 2,
            "procedureid": 3,
            "offeringid": 4,
            "unitid": 5,
        });
        let series = Series::from_after(&after).unwrap();
        assert_eq!(series.id, 9);
        assert_eq!(series.offering_id, 4);
        assert!(!series.is_resolved());
    }

    #[test]
    fn test_observation_from_after() {
        let after = json!({
            "observationid": 1,
            "seriesid": 2,
            "identifier": "obs/1",
            "phenomenontimestart": 1_500_000_000,
            "phenomenontimeend": 1_500_000_060,
            "resulttime": 1_500_000_000_000_000_i64,
        });
        let obs = Observation::from_after(&after).unwrap();
        assert_eq!(obs.series_id, 2);
        assert_eq!(obs.phenomenon_time_start.timestamp(), 1_500_000_000);
        // above the millis threshold, so decoded as epoch milliseconds
        assert_eq!(obs.result_time.timestamp_millis(), 1_500_000_000_000_000);
    }

    #[test]
    fn test_missing_field_is_error() {
        let after = json!({ "identifier": "proc/1" });
        let err = Procedure::from_after(&after).unwrap_err();
        assert!(matches!(err, EventError::MissingField("procedureid")));
    }

    #[test]
    fn test_null_field_is_error() {
        let after = json!({ "unitid": 1, "unit": null });
        let err = Unit::from_after(&after).unwrap_err();
        assert!(matches!(err, EventError::MissingField("unit")));
    }

    #[test]
    fn test_wrong_type_is_error() {
        let after = json!({ "observationid": "one", "value": 2.5 });
        let err = RawValue::from_after(&after).unwrap_err();
        assert!(matches!(
            err,
            EventError::InvalidField {
                field: "observationid"
            }
        ));
    }

    #[test]
    fn test_raw_value_integer_reading() {
        let after = json!({ "observationid": 1, "value": 21 });
        let raw = RawValue::from_after(&after).unwrap();
        assert!((raw.value - 21.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_measurement_serialization_omits_absent_fields() {
        let ts = epoch_to_datetime(1_500_000_000).unwrap();
        let m = EnrichedMeasurement {
            procedure: Some("proc/1".into()),
            feature: Some("feat/1".into()),
            observable_property: Some("prop/1".into()),
            phenomenon_time_start: ts,
            phenomenon_time_end: ts,
            result_time: ts,
            unit: None,
            value: 21.5,
        };
        let encoded = serde_json::to_string(&m).unwrap();
        assert!(!encoded.contains("unit"));
        assert!(encoded.contains("\"procedure\":\"proc/1\""));
        assert!(encoded.contains("\"observableProperty\":\"prop/1\""));
        assert!(encoded.contains("\"resultTime\":1500000000000"));
        assert!(encoded.contains("\"value\":21.5"));
    }
}
