//! Common command-line arguments for all services
//!
//! Provides a unified argument structure that individual services flatten
//! into their own `clap` parsers.

#[cfg(feature = "cli")]
use clap::Args;

/// Common service startup arguments
#[derive(Debug, Clone)]
#[cfg_attr(feature = "cli", derive(Args))]
pub struct ServiceArgs {
    /// Log level (trace, debug, info, warn, error)
    #[cfg_attr(feature = "cli", arg(short = 'l', long, default_value = "info"))]
    pub log_level: String,

    /// Optional bind address override (e.g., 127.0.0.1:11111)
    #[cfg_attr(feature = "cli", arg(short = 'b', long, env = "BIND_ADDRESS"))]
    pub bind_address: Option<String>,

    /// Configuration file path override
    #[cfg_attr(feature = "cli", arg(short = 'c', long, env = "CONFIG_FILE"))]
    pub config: Option<String>,

    /// Disable colored output (useful for log files)
    #[cfg_attr(feature = "cli", arg(long))]
    pub no_color: bool,

    /// Only validate configuration without starting service
    #[cfg_attr(feature = "cli", arg(long))]
    pub validate: bool,
}

impl Default for ServiceArgs {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            bind_address: None,
            config: None,
            no_color: false,
            validate: false,
        }
    }
}

impl ServiceArgs {
    /// Parse log level string to tracing::Level
    pub fn parse_log_level(&self) -> tracing::Level {
        match self.log_level.to_lowercase().as_str() {
            "trace" => tracing::Level::TRACE,
            "debug" => tracing::Level::DEBUG,
            "warn" | "warning" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }

    /// Configuration file path, falling back to `config/{service}.yaml`
    pub fn config_path(&self, service_name: &str) -> String {
        self.config
            .clone()
            .unwrap_or_else(|| format!("config/{service_name}.yaml"))
    }
}
