//! Transaction envelope
//!
//! Every Alpaca response wraps its result in the same shape:
//!
//! ```json
//! {
//!   "ClientTransactionID": 12,
//!   "ServerTransactionID": 4711,
//!   "ErrorNumber": 0,
//!   "ErrorMessage": "",
//!   "Value": true
//! }
//! ```
//!
//! `Value` is omitted when the operation produced no result (PUT requests,
//! failures).

use std::sync::atomic::{AtomicU32, Ordering};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::params::Parameters;
use crate::error::{codes, AlpacaError, Result};

/// Process-wide server transaction id source
///
/// Ids start at 1 and come from a single atomic update, so concurrent
/// requests always observe distinct values. After `u32::MAX` the sequence
/// restarts at 1; 0 is never issued.
#[derive(Debug)]
pub struct TransactionCounter {
    next: AtomicU32,
}

impl TransactionCounter {
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
        }
    }

    #[cfg(test)]
    fn starting_at(first: u32) -> Self {
        Self {
            next: AtomicU32::new(first),
        }
    }

    pub fn next_id(&self) -> u32 {
        let advance = |id: u32| Some(if id == u32::MAX { 1 } else { id + 1 });
        match self.next.fetch_update(Ordering::Relaxed, Ordering::Relaxed, advance) {
            Ok(id) | Err(id) => id,
        }
    }
}

impl Default for TransactionCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Client-supplied transaction fields
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClientTransaction {
    pub client_id: u32,
    pub client_transaction_id: u32,
}

impl ClientTransaction {
    /// Read `ClientID` and `ClientTransactionID`; anything unparsable becomes 0
    pub fn from_params(params: &Parameters) -> Self {
        Self {
            client_id: parse_client_field(params.get("ClientID")),
            client_transaction_id: parse_client_field(params.get("ClientTransactionID")),
        }
    }
}

/// Lenient u32 parse: missing, negative or non-numeric values yield 0
pub fn parse_client_field(raw: Option<&str>) -> u32 {
    raw.and_then(|value| value.trim().parse::<u32>().ok())
        .unwrap_or(0)
}

/// Alpaca response body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AlpacaResponse {
    #[serde(rename = "ClientTransactionID")]
    pub client_transaction_id: u32,
    #[serde(rename = "ServerTransactionID")]
    pub server_transaction_id: u32,
    #[serde(rename = "ErrorNumber")]
    pub error_number: i32,
    #[serde(rename = "ErrorMessage")]
    pub error_message: String,
    #[serde(rename = "Value", default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl AlpacaResponse {
    pub fn success(
        value: Option<Value>,
        client: &ClientTransaction,
        counter: &TransactionCounter,
    ) -> Self {
        Self {
            client_transaction_id: client.client_transaction_id,
            server_transaction_id: counter.next_id(),
            error_number: codes::SUCCESS,
            error_message: String::new(),
            value,
        }
    }

    pub fn failure(
        error: &AlpacaError,
        client: &ClientTransaction,
        counter: &TransactionCounter,
    ) -> Self {
        Self {
            client_transaction_id: client.client_transaction_id,
            server_transaction_id: counter.next_id(),
            error_number: error.error_number(),
            error_message: error.to_string(),
            value: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.error_number == codes::SUCCESS
    }
}

/// Envelope plus the HTTP status it travels with
#[derive(Debug, Clone)]
pub struct EnvelopeReply {
    pub status: StatusCode,
    pub body: AlpacaResponse,
}

impl EnvelopeReply {
    pub fn from_result(
        result: Result<Option<Value>>,
        client: &ClientTransaction,
        counter: &TransactionCounter,
    ) -> Self {
        match result {
            Ok(value) => Self {
                status: StatusCode::OK,
                body: AlpacaResponse::success(value, client, counter),
            },
            Err(error) => Self {
                status: error.http_status(),
                body: AlpacaResponse::failure(&error, client, counter),
            },
        }
    }
}

impl IntoResponse for EnvelopeReply {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}
