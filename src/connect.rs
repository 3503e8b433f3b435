//! Connector-management control plane client.
//!
//! Declares the CDC source connector against the connector-management REST
//! service at startup. A conflict means a registration survived from an
//! earlier run: the old one is deleted and the declaration retried once.
//! Any other non-success response is fatal — without the connector there is
//! no stream to consume.

use reqwest::StatusCode;
use serde_json::{json, Value};
use tracing::info;

use crate::config::BridgeConfig;
use crate::error::RegistrationError;

/// System tables the connector must not capture.
const EXCLUDED_TABLES: &str =
    "public.geography_columns,public.geometry_columns,public.raster_columns,public.raster_overviews";

/// REST client for the connector-management service.
#[derive(Debug, Clone)]
pub struct ConnectClient {
    http: reqwest::Client,
    base_url: String,
}

impl ConnectClient {
    /// Creates a client for the given base URL.
    #[must_use]
    pub fn new(base_url: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    /// Builds the connector declaration body.
    #[must_use]
    pub fn connector_body(config: &BridgeConfig) -> Value {
        let spec = &config.connector;
        json!({
            "name": spec.name,
            "config": {
                "connector.class": "io.debezium.connector.postgresql.PostgresConnector",
                "database.hostname": spec.hostname,
                "database.port": spec.port,
                "database.user": spec.user,
                "database.password": spec.password,
                "database.dbname": spec.dbname,
                "database.server.name": config.namespace,
                "snapshot.mode": spec.snapshot_mode,
                "schema.whitelist": config.db_schema,
                "table.blacklist": EXCLUDED_TABLES,
            }
        })
    }

    /// Registers the CDC source connector, replacing a conflicting one.
    ///
    /// On HTTP 409 the existing registration is deleted and the declaration
    /// retried exactly once. Every other non-success response is a fatal
    /// [`RegistrationError`].
    pub async fn register_source_connector(
        &self,
        config: &BridgeConfig,
    ) -> Result<(), RegistrationError> {
        let body = Self::connector_body(config);
        let url = format!("{}/connectors/", self.base_url);
        info!(url = %url, connector = %config.connector.name, "registering CDC source connector");

        let response = self.http.post(&url).json(&body).send().await?;
        match response.status() {
            StatusCode::CONFLICT => {
                info!("connector already installed, deleting first");
                let delete_url = format!("{}/connectors/{}", self.base_url, config.connector.name);
                let deleted = self.http.delete(&delete_url).send().await?;
                if !deleted.status().is_success() {
                    return Err(RegistrationError::DeleteRejected(deleted.status()));
                }

                let retried = self.http.post(&url).json(&body).send().await?;
                let status = retried.status();
                let text = retried.text().await.unwrap_or_default();
                if status.is_success() {
                    info!(response = %text, "connector registered after replacement");
                    Ok(())
                } else {
                    Err(RegistrationError::Rejected { status, body: text })
                }
            }
            status if status.is_success() => {
                let text = response.text().await.unwrap_or_default();
                info!(response = %text, "connector registered");
                Ok(())
            }
            status => {
                let text = response.text().await.unwrap_or_default();
                Err(RegistrationError::Rejected { status, body: text })
            }
        }
    }
}
