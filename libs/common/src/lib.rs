//! Shared service plumbing for the Alpaca device services
//!
//! Provides the pieces every service binary needs before it can serve
//! requests:
//! - logging initialization (console + daily rolling files)
//! - command-line arguments shared by all services
//! - startup banner and environment setup
//! - graceful shutdown signal handling

pub mod bootstrap_args;
pub mod logging;
pub mod service_bootstrap;
pub mod shutdown;

pub use bootstrap_args::ServiceArgs;
pub use logging::{LogConfig, LoggingError};
pub use service_bootstrap::ServiceInfo;
pub use shutdown::{ShutdownSignal, ShutdownTrigger};

/// Default host for service API servers
pub const DEFAULT_API_HOST: &str = "0.0.0.0";
