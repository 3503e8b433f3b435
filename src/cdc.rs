//! CDC envelope decoding and source-table classification.
//!
//! Every inbound event is a topic name plus a JSON envelope:
//!
//! ```text
//! { "payload": { "after": { <row-fields> }, "source": { "snapshot": <bool> } } }
//! ```
//!
//! Events without a `payload` or an `after` image (tombstones, deletes) are
//! indistinguishable from malformed ones and are discarded either way.

use serde_json::Value;

use crate::error::EventError;

/// The source tables mirrored onto the CDC stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTable {
    /// `observation` — measurement events.
    Observation,
    /// `series` — procedure/feature/property/unit combinations.
    Series,
    /// `procedure` — sensor identities.
    Procedure,
    /// `offering` — logical series collections.
    Offering,
    /// `observableproperty` — measured phenomena.
    ObservableProperty,
    /// `unit` — units of measure.
    Unit,
    /// `featureofinterest` — observed real-world objects.
    Feature,
    /// `numericvalue` — the fact table of raw readings.
    NumericValue,
}

impl SourceTable {
    /// All mirrored tables, in subscription order.
    pub const ALL: [SourceTable; 8] = [
        SourceTable::Observation,
        SourceTable::Series,
        SourceTable::Procedure,
        SourceTable::Offering,
        SourceTable::ObservableProperty,
        SourceTable::Unit,
        SourceTable::Feature,
        SourceTable::NumericValue,
    ];

    /// The table name as it appears in topic names.
    #[must_use]
    pub fn table_name(self) -> &'static str {
        match self {
            SourceTable::Observation => "observation",
            SourceTable::Series => "series",
            SourceTable::Procedure => "procedure",
            SourceTable::Offering => "offering",
            SourceTable::ObservableProperty => "observableproperty",
            SourceTable::Unit => "unit",
            SourceTable::Feature => "featureofinterest",
            SourceTable::NumericValue => "numericvalue",
        }
    }

    fn from_table_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.table_name() == name)
    }
}

/// Maps between topic names and source tables for one namespace/schema pair.
///
/// Inbound topics are named `<namespace>.<schema>.<table>`.
#[derive(Debug, Clone)]
pub struct TopicMap {
    prefix: String,
}

impl TopicMap {
    /// Creates a topic map for the given namespace and database schema.
    #[must_use]
    pub fn new(namespace: &str, schema: &str) -> Self {
        Self {
            prefix: format!("{namespace}.{schema}."),
        }
    }

    /// The full list of CDC topics to subscribe to.
    #[must_use]
    pub fn topics(&self) -> Vec<String> {
        SourceTable::ALL
            .into_iter()
            .map(|t| format!("{}{}", self.prefix, t.table_name()))
            .collect()
    }

    /// Classifies a topic name; `None` for unrecognized topics.
    #[must_use]
    pub fn classify(&self, topic: &str) -> Option<SourceTable> {
        topic
            .strip_prefix(&self.prefix)
            .and_then(SourceTable::from_table_name)
    }
}

/// A decoded CDC event: the after-image row and its snapshot marker.
#[derive(Debug, Clone)]
pub struct CdcEvent {
    /// The row's after-image.
    pub after: Value,
    /// Whether this event is part of the initial bulk backlog replay.
    pub snapshot: bool,
}

/// Decodes a raw CDC envelope.
///
/// Returns `Ok(None)` when the envelope carries no `payload` or no `after`
/// image — such events are discarded without comment. JSON that does not
/// parse at all is an [`EventError`].
pub fn parse_event(raw: &[u8]) -> Result<Option<CdcEvent>, EventError> {
    let root: Value = serde_json::from_slice(raw)?;
    let Some(payload) = root.get("payload") else {
        return Ok(None);
    };
    let Some(after) = payload.get("after") else {
        return Ok(None);
    };
    if after.is_null() {
        return Ok(None);
    }
    let snapshot = payload.get("source").is_some_and(snapshot_flag);
    Ok(Some(CdcEvent {
        after: after.clone(),
        snapshot,
    }))
}

/// Reads the snapshot marker out of a `source` block.
///
/// The marker may arrive as a JSON bool or as the strings `"true"`/`"last"`,
/// depending on the connector version; anything else means live data.
fn snapshot_flag(source: &Value) -> bool {
    match source.get("snapshot") {
        Some(Value::Bool(flag)) => *flag,
        Some(Value::String(s)) => s == "true" || s == "last",
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(after: Value) -> Vec<u8> {
        json!({ "payload": { "after": after, "source": { "snapshot": false } } })
            .to_string()
            .into_bytes()
    }

    #[test]
    fn test_parse_live_event() {
        let raw = envelope(json!({ "unitid": 1, "unit": "Cel" }));
        let event = parse_event(&raw).unwrap().unwrap();
        assert!(!event.snapshot);
        assert_eq!(event.after["unit"], "Cel");
    }

    #[test]
    fn test_missing_payload_is_discarded() {
        let raw = json!({ "schema": {} }).to_string().into_bytes();
        assert!(parse_event(&raw).unwrap().is_none());
    }

    #[test]
    fn test_missing_after_is_discarded() {
        let raw = json!({ "payload": { "before": { "unitid": 1 } } })
            .to_string()
            .into_bytes();
        assert!(parse_event(&raw).unwrap().is_none());
    }

    #[test]
    fn test_null_after_is_discarded() {
        let raw = json!({ "payload": { "after": null } }).to_string().into_bytes();
        assert!(parse_event(&raw).unwrap().is_none());
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(parse_event(b"not json").is_err());
    }

    #[test]
    fn test_snapshot_marker_bool() {
        let raw = json!({ "payload": { "after": {}, "source": { "snapshot": true } } })
            .to_string()
            .into_bytes();
        assert!(parse_event(&raw).unwrap().unwrap().snapshot);
    }

    #[test]
    fn test_snapshot_marker_strings() {
        for marker in ["true", "last"] {
            let raw = json!({ "payload": { "after": {}, "source": { "snapshot": marker } } })
                .to_string()
                .into_bytes();
            assert!(parse_event(&raw).unwrap().unwrap().snapshot, "{marker}");
        }
        let raw = json!({ "payload": { "after": {}, "source": { "snapshot": "false" } } })
            .to_string()
            .into_bytes();
        assert!(!parse_event(&raw).unwrap().unwrap().snapshot);
    }

    #[test]
    fn test_missing_source_means_live() {
        let raw = json!({ "payload": { "after": {} } }).to_string().into_bytes();
        assert!(!parse_event(&raw).unwrap().unwrap().snapshot);
    }

    #[test]
    fn test_topic_map_roundtrip() {
        let topics = TopicMap::new("sos", "public");
        for table in SourceTable::ALL {
            let name = format!("sos.public.{}", table.table_name());
            assert_eq!(topics.classify(&name), Some(table));
        }
        assert_eq!(topics.topics().len(), 8);
        assert!(topics.topics().contains(&"sos.public.numericvalue".to_string()));
    }

    #[test]
    fn test_unknown_topic_is_unclassified() {
        let topics = TopicMap::new("sos", "public");
        assert_eq!(topics.classify("sos.public.geography_columns"), None);
        assert_eq!(topics.classify("other.public.unit"), None);
    }
}
