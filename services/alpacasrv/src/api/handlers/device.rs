//! Device member handlers
//!
//! Path segments are taken as raw strings so that malformed versions,
//! device types and numbers become Alpaca errors inside the envelope rather
//! than axum rejections.

use axum::{
    body::Bytes,
    extract::{Path, RawQuery, State},
};

use crate::api::envelope::EnvelopeReply;
use crate::api::params::Parameters;
use crate::api::routes::AppState;
use crate::core::dispatcher::{DeviceRequest, RequestMethod};

/// `(api_version, device_type, device_number, member)`
pub type DevicePath = (String, String, String, String);

fn device_request(method: RequestMethod, path: DevicePath, params: Parameters) -> DeviceRequest {
    let (api_version, device_type, device_number, member) = path;
    DeviceRequest {
        method,
        api_version,
        device_type,
        device_number,
        member,
        params,
    }
}

/// Read a property
///
/// @route GET /api/{version}/{device_type}/{device_number}/{member}
/// @input query: ClientID, ClientTransactionID
/// @output envelope with Value
pub async fn get_device_member(
    State(state): State<AppState>,
    Path(path): Path<DevicePath>,
    RawQuery(query): RawQuery,
) -> EnvelopeReply {
    let params = Parameters::from_query(query.as_deref());
    state
        .dispatcher
        .handle(device_request(RequestMethod::Get, path, params))
        .await
}

/// Write a property or invoke an action
///
/// @route PUT /api/{version}/{device_type}/{device_number}/{member}
/// @input form body (may be empty) plus query; body entries win
/// @output envelope without Value unless the action returns one
pub async fn put_device_member(
    State(state): State<AppState>,
    Path(path): Path<DevicePath>,
    RawQuery(query): RawQuery,
    body: Bytes,
) -> EnvelopeReply {
    let params =
        Parameters::from_urlencoded(&body).merged_with(Parameters::from_query(query.as_deref()));
    state
        .dispatcher
        .handle(device_request(RequestMethod::Put, path, params))
        .await
}
