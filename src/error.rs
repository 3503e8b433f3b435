//! Error types for the bridge.
//!
//! The taxonomy mirrors the drop/retry policy of the pipeline: malformed
//! events and failed publishes are logged and discarded, missing dimension
//! data drives bounded retries, and only connector registration failures are
//! fatal to the process.

use thiserror::Error;

/// Errors raised while decoding a CDC event or its after-image row.
///
/// Always non-fatal: the event is logged at warning level and discarded.
#[derive(Debug, Error)]
pub enum EventError {
    /// The event payload is not valid JSON.
    #[error("event is not valid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// A required row field is missing or JSON null.
    #[error("missing or null field '{0}' in after-image")]
    MissingField(&'static str),

    /// A row field is present but has an unexpected JSON type.
    #[error("field '{field}' has an unexpected type")]
    InvalidField {
        /// The offending field name.
        field: &'static str,
    },

    /// An epoch timestamp does not fit the representable range.
    #[error("timestamp in field '{0}' is out of range")]
    TimestampOutOfRange(&'static str),
}

/// Enrichment failed because referenced dimension data is not cached yet.
///
/// The CDC stream gives no cross-table ordering guarantee, so a fact event
/// can arrive before the rows it references. Both variants are retryable.
#[derive(Debug, Error)]
pub enum EnrichError {
    /// The raw value references an observation that has not been seen.
    #[error("observation {observation_id} not yet cached")]
    ObservationNotReady {
        /// Id of the missing observation.
        observation_id: i64,
    },

    /// The observation references a series that has not been seen.
    #[error("series {series_id} not yet cached")]
    SeriesNotReady {
        /// Id of the missing series.
        series_id: i64,
    },
}

/// Errors from provisioning an offering's output channel.
#[derive(Debug, Error)]
pub enum ProvisionError {
    /// The channel already exists, typically from a prior process run.
    ///
    /// Treated as success by the registry: the existing channel is reused.
    #[error("channel '{0}' already exists")]
    AlreadyExists(String),

    /// Provisioning was rejected by the channel-management facility.
    ///
    /// Fatal to the affected offering only: no handle is registered and
    /// output destined for it is dropped.
    #[error("failed to provision channel '{topic}': {message}")]
    Failed {
        /// The channel that could not be created.
        topic: String,
        /// Broker-reported reason.
        message: String,
    },
}

/// Errors from publishing an enriched measurement.
///
/// Logged and dropped; retry, if any, happens before the publish call in the
/// retry worker, never after it.
#[derive(Debug, Error)]
pub enum PublishError {
    /// The measurement could not be serialized.
    #[error("could not serialize measurement: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The broker did not acknowledge delivery.
    #[error("delivery to '{topic}' failed: {message}")]
    Delivery {
        /// Target channel.
        topic: String,
        /// Broker-reported reason.
        message: String,
    },
}

/// Errors from registering the CDC source connector at startup.
///
/// Fatal for the whole process: without the connector there is no stream.
#[derive(Debug, Error)]
pub enum RegistrationError {
    /// The control plane could not be reached.
    #[error("control plane request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// An existing registration could not be deleted before re-creating it.
    #[error("could not delete existing connector registration (status {0})")]
    DeleteRejected(reqwest::StatusCode),

    /// The control plane rejected the registration.
    #[error("connector registration rejected (status {status}): {body}")]
    Rejected {
        /// HTTP status returned by the control plane.
        status: reqwest::StatusCode,
        /// Response body, for the log.
        body: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_error_display() {
        let err = EventError::MissingField("seriesid");
        assert_eq!(
            err.to_string(),
            "missing or null field 'seriesid' in after-image"
        );
    }

    #[test]
    fn test_enrich_error_display() {
        let err = EnrichError::ObservationNotReady { observation_id: 7 };
        assert!(err.to_string().contains("observation 7"));

        let err = EnrichError::SeriesNotReady { series_id: 3 };
        assert!(err.to_string().contains("series 3"));
    }

    #[test]
    fn test_provision_already_exists_names_topic() {
        let err = ProvisionError::AlreadyExists("sos.offerings.1".into());
        assert!(err.to_string().contains("sos.offerings.1"));
    }
}
