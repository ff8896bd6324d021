//! Unified service bootstrap utilities
//!
//! Startup banner and logging initialization shared by all services.

use crate::logging::{self, LogConfig, LoggingError};
use crate::ServiceArgs;
use tracing::info;

/// Service metadata for startup
#[derive(Debug, Clone)]
pub struct ServiceInfo {
    /// Service name (e.g., "alpacasrv")
    pub name: String,
    /// Service version
    pub version: String,
    /// Service description
    pub description: String,
    /// Default port
    pub default_port: u16,
}

impl ServiceInfo {
    /// Create new service info
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        description: impl Into<String>,
        default_port: u16,
    ) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: description.into(),
            default_port,
        }
    }
}

/// Print startup banner for a service
pub fn print_startup_banner(service: &ServiceInfo) {
    let banner = r#"
  █████╗ ██╗     ██████╗  █████╗  ██████╗ █████╗
 ██╔══██╗██║     ██╔══██╗██╔══██╗██╔════╝██╔══██╗
 ███████║██║     ██████╔╝███████║██║     ███████║
 ██╔══██║██║     ██╔═══╝ ██╔══██║██║     ██╔══██║
 ██║  ██║███████╗██║     ██║  ██║╚██████╗██║  ██║
 ╚═╝  ╚═╝╚══════╝╚═╝     ╚═╝  ╚═╝ ╚═════╝╚═╝  ╚═╝
    "#;

    info!("{}", banner);
    info!("");
    info!(" {} v{}", service.name.to_uppercase(), service.version);
    info!(" {}", service.description);
    info!(" Default Port: {}", service.default_port);
    info!("");
}

/// Logging configuration for a service
///
/// Starts from the console-only setup; a `log_dir` adds rolling files
/// under `<log root>/<service name>` plus the separate access log.
pub fn service_log_config(
    service: &ServiceInfo,
    args: &ServiceArgs,
    log_dir: Option<&str>,
    enable_json: bool,
) -> LogConfig {
    let mut config = LogConfig::console_only(service.name.clone(), args.parse_log_level());
    config.enable_ansi = !args.no_color;
    config.enable_json = enable_json;
    if let Some(dir) = log_dir {
        logging::init_log_root(Some(dir));
        config.log_dir = Some(logging::get_log_root().join(&service.name));
        config.enable_api_log = true;
    }
    config
}

/// Initialize logging for a service from its arguments
///
/// `log_dir` of `None` keeps output on the console.
pub fn init_service_logging(
    service: &ServiceInfo,
    args: &ServiceArgs,
    log_dir: Option<&str>,
    enable_json: bool,
) -> Result<(), LoggingError> {
    logging::init_with_config(service_log_config(service, args, log_dir, enable_json))
}
