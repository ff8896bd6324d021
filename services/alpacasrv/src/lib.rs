//! Alpaca device-control service
//!
//! Serves astronomical instruments over the Alpaca HTTP protocol:
//! `/api/v1/{device_type}/{device_number}/{member}` for device access and
//! `/management/...` for discovery. Hardware is reached only through the
//! driver traits in [`core::driver`].

pub mod api;
pub mod config;
pub mod core;
pub mod error;

pub use api::{create_api_routes, AppState};
pub use config::AppConfig;
pub use error::{AlpacaError, Result};

/// Service name used for logs, config lookup and the banner
pub const SERVICE_NAME: &str = "alpacasrv";
