//! Management and discovery endpoints

use axum::extract::{Path, RawQuery, State};
use serde::Serialize;
use serde_json::Value;

use crate::api::envelope::{ClientTransaction, EnvelopeReply};
use crate::api::params::Parameters;
use crate::api::routes::AppState;
use crate::config::ServerConfig;
use crate::core::dispatcher::{parse_api_version, SUPPORTED_API_VERSION};
use crate::error::Result;

/// Value of `/management/v1/description`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerDescription {
    pub server_name: String,
    pub manufacturer: String,
    pub manufacturer_version: String,
    pub location: String,
}

impl From<&ServerConfig> for ServerDescription {
    fn from(config: &ServerConfig) -> Self {
        Self {
            server_name: config.server_name.clone(),
            manufacturer: config.manufacturer.clone(),
            manufacturer_version: config.manufacturer_version.clone(),
            location: config.location.clone(),
        }
    }
}

fn reply(state: &AppState, query: Option<String>, result: Result<Option<Value>>) -> EnvelopeReply {
    let params = Parameters::from_query(query.as_deref());
    EnvelopeReply::from_result(
        result,
        &ClientTransaction::from_params(&params),
        &state.counter,
    )
}

/// @route GET /management/apiversions
/// @output envelope, Value = [1]
pub async fn api_versions(
    State(state): State<AppState>,
    RawQuery(query): RawQuery,
) -> EnvelopeReply {
    let versions = vec![SUPPORTED_API_VERSION];
    reply(&state, query, Ok(Some(Value::from(versions))))
}

/// @route GET /management/{version}/description
pub async fn server_description(
    State(state): State<AppState>,
    Path(version): Path<String>,
    RawQuery(query): RawQuery,
) -> EnvelopeReply {
    let result = parse_api_version(&version).and_then(|_| {
        let description = ServerDescription::from(state.server.as_ref());
        Ok(Some(serde_json::to_value(description)?))
    });
    reply(&state, query, result)
}

/// @route GET /management/{version}/configureddevices
pub async fn configured_devices(
    State(state): State<AppState>,
    Path(version): Path<String>,
    RawQuery(query): RawQuery,
) -> EnvelopeReply {
    let result = parse_api_version(&version)
        .and_then(|_| Ok(Some(serde_json::to_value(state.registry.configured_devices())?)));
    reply(&state, query, result)
}
