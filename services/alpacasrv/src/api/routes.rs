//! Router assembly
//!
//! Layer order, innermost first: panic catcher, access logger, request
//! trace span.

use std::any::Any;
use std::sync::Arc;

use axum::{
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::error;

use crate::api::envelope::{ClientTransaction, EnvelopeReply, TransactionCounter};
use crate::api::handlers;
use crate::config::ServerConfig;
use crate::core::dispatcher::Dispatcher;
use crate::core::registry::DeviceRegistry;
use crate::error::AlpacaError;

/// Shared state handed to every handler
#[derive(Clone)]
pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<DeviceRegistry>,
    pub counter: Arc<TransactionCounter>,
    pub server: Arc<ServerConfig>,
    pub service_name: Arc<str>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(registry: Arc<DeviceRegistry>, server: ServerConfig, service_name: &str) -> Self {
        let counter = Arc::new(TransactionCounter::new());
        Self {
            dispatcher: Arc::new(Dispatcher::new(Arc::clone(&registry), Arc::clone(&counter))),
            registry,
            counter,
            server: Arc::new(server),
            service_name: Arc::from(service_name),
            started_at: Utc::now(),
        }
    }
}

fn panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        (*s).to_string()
    } else {
        "unknown panic".to_string()
    }
}

/// Turn a handler panic into an `InternalError` envelope with HTTP 500
fn panic_response(counter: &TransactionCounter, err: Box<dyn Any + Send + 'static>) -> Response {
    let detail = panic_message(err.as_ref());
    error!("Request handler panicked: {}", detail);
    EnvelopeReply::from_result(
        Err(AlpacaError::internal(format!("Unexpected server failure: {detail}"))),
        &ClientTransaction::default(),
        counter,
    )
    .into_response()
}

pub fn create_api_routes(state: AppState) -> Router {
    let counter = Arc::clone(&state.counter);

    Router::new()
        .route("/health", get(handlers::health_check))
        .route("/management/apiversions", get(handlers::api_versions))
        .route(
            "/management/{version}/description",
            get(handlers::server_description),
        )
        .route(
            "/management/{version}/configureddevices",
            get(handlers::configured_devices),
        )
        .route(
            "/api/{version}/{device_type}/{device_number}/{member}",
            get(handlers::get_device_member).put(handlers::put_device_member),
        )
        .layer(CatchPanicLayer::custom(
            move |err: Box<dyn Any + Send + 'static>| panic_response(&counter, err),
        ))
        .layer(axum::middleware::from_fn(common::logging::http_request_logger))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message_variants() {
        let owned: Box<dyn Any + Send> = Box::new(String::from("boom"));
        assert_eq!(panic_message(owned.as_ref()), "boom");

        let borrowed: Box<dyn Any + Send> = Box::new("static boom");
        assert_eq!(panic_message(borrowed.as_ref()), "static boom");

        let other: Box<dyn Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(other.as_ref()), "unknown panic");
    }

    #[tokio::test]
    async fn test_panic_response_is_internal_envelope() {
        let counter = TransactionCounter::new();
        let response = panic_response(&counter, Box::new("handler exploded"));

        assert_eq!(
            response.status(),
            axum::http::StatusCode::INTERNAL_SERVER_ERROR
        );
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["ErrorNumber"], crate::error::codes::UNSPECIFIED);
        assert!(body["ErrorMessage"]
            .as_str()
            .unwrap()
            .contains("handler exploded"));
    }
}
