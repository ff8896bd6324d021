//! HTTP surface: envelope, parameter policy, routes and handlers

pub mod envelope;
pub mod handlers;
pub mod params;
pub mod routes;

pub use envelope::{AlpacaResponse, ClientTransaction, EnvelopeReply, TransactionCounter};
pub use params::Parameters;
pub use routes::{create_api_routes, AppState};
