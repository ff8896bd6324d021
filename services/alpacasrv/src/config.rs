//! Service configuration
//!
//! Sources are layered with figment: built-in defaults, then the YAML file,
//! then `ALPACASRV_*` environment variables (`__` separates nesting levels,
//! e.g. `ALPACASRV_SERVICE__PORT=11112`).

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::device::{Capability, CapabilitySet, DeviceType};
use crate::core::driver::DriverTimeouts;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "ALPACASRV_";

/// Default Alpaca port
pub const DEFAULT_PORT: u16 = 11111;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] Box<figment::Error>),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        ConfigError::Load(Box::new(err))
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}

// ============================================================================
// Sections
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServiceConfig {
    pub name: String,
    pub host: String,
    pub port: u16,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: "alpacasrv".to_string(),
            host: common::DEFAULT_API_HOST.to_string(),
            port: DEFAULT_PORT,
        }
    }
}

/// Values published by `/management/v1/description`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub server_name: String,
    pub manufacturer: String,
    pub manufacturer_version: String,
    pub location: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_name: "Alpaca Device Server".to_string(),
            manufacturer: "alpacasrv".to_string(),
            manufacturer_version: env!("CARGO_PKG_VERSION").to_string(),
            location: "Unknown".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct LoggingConfig {
    /// Root directory for rolling log files; console only when unset
    #[serde(default)]
    pub dir: Option<String>,
    #[serde(default)]
    pub json: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TimeoutConfig {
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    #[serde(default = "default_motion_timeout_ms")]
    pub motion_timeout_ms: u64,
}

fn default_io_timeout_ms() -> u64 {
    5_000
}

fn default_motion_timeout_ms() -> u64 {
    300_000
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            io_timeout_ms: default_io_timeout_ms(),
            motion_timeout_ms: default_motion_timeout_ms(),
        }
    }
}

impl TimeoutConfig {
    pub fn driver_timeouts(&self) -> DriverTimeouts {
        DriverTimeouts {
            io: Duration::from_millis(self.io_timeout_ms),
            motion: Duration::from_millis(self.motion_timeout_ms),
        }
    }
}

fn default_true() -> bool {
    true
}

// ============================================================================
// Devices
// ============================================================================

/// One served device, tagged by `type`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DeviceConfig {
    Telescope(TelescopeConfig),
    Focuser(FocuserConfig),
}

impl DeviceConfig {
    pub fn device_type(&self) -> DeviceType {
        match self {
            DeviceConfig::Telescope(_) => DeviceType::Telescope,
            DeviceConfig::Focuser(_) => DeviceType::Focuser,
        }
    }

    pub fn number(&self) -> u32 {
        match self {
            DeviceConfig::Telescope(c) => c.number,
            DeviceConfig::Focuser(c) => c.number,
        }
    }

    pub fn timeouts(&self) -> &TimeoutConfig {
        match self {
            DeviceConfig::Telescope(c) => &c.timeouts,
            DeviceConfig::Focuser(c) => &c.timeouts,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelescopeCapabilities {
    #[serde(default = "default_true")]
    pub can_slew: bool,
    #[serde(default = "default_true")]
    pub can_slew_async: bool,
    #[serde(default = "default_true")]
    pub can_park: bool,
    #[serde(default = "default_true")]
    pub can_unpark: bool,
    #[serde(default = "default_true")]
    pub can_set_tracking: bool,
    #[serde(default = "default_true")]
    pub can_sync: bool,
    #[serde(default = "default_true")]
    pub can_find_home: bool,
}

impl Default for TelescopeCapabilities {
    fn default() -> Self {
        Self {
            can_slew: true,
            can_slew_async: true,
            can_park: true,
            can_unpark: true,
            can_set_tracking: true,
            can_sync: true,
            can_find_home: true,
        }
    }
}

impl TelescopeCapabilities {
    pub fn to_set(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with_if(Capability::CanSlew, self.can_slew)
            .with_if(Capability::CanSlewAsync, self.can_slew_async)
            .with_if(Capability::CanPark, self.can_park)
            .with_if(Capability::CanUnpark, self.can_unpark)
            .with_if(Capability::CanSetTracking, self.can_set_tracking)
            .with_if(Capability::CanSync, self.can_sync)
            .with_if(Capability::CanFindHome, self.can_find_home)
    }
}

/// Simulated mount parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MountSimulatorConfig {
    /// Degrees per second
    #[serde(default = "default_slew_rate")]
    pub slew_rate: f64,
    /// Site longitude in degrees, east positive
    #[serde(default)]
    pub site_longitude: f64,
}

fn default_slew_rate() -> f64 {
    5.0
}

impl Default for MountSimulatorConfig {
    fn default() -> Self {
        Self {
            slew_rate: default_slew_rate(),
            site_longitude: 0.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TelescopeConfig {
    #[serde(default)]
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default)]
    pub capabilities: TelescopeCapabilities,
    #[serde(default)]
    pub simulator: MountSimulatorConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

/// Simulated focuser parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FocuserSimulatorConfig {
    #[serde(default = "default_max_step")]
    pub max_step: i64,
    /// Steps per second
    #[serde(default = "default_step_rate")]
    pub step_rate: f64,
    /// Fixed probe reading in °C; no probe when unset
    #[serde(default)]
    pub temperature: Option<f64>,
}

fn default_max_step() -> i64 {
    50_000
}

fn default_step_rate() -> f64 {
    1_000.0
}

impl Default for FocuserSimulatorConfig {
    fn default() -> Self {
        Self {
            max_step: default_max_step(),
            step_rate: default_step_rate(),
            temperature: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FocuserConfig {
    #[serde(default)]
    pub number: u32,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub unique_id: Option<String>,
    #[serde(default = "default_true")]
    pub absolute: bool,
    #[serde(default)]
    pub temp_comp_available: bool,
    #[serde(default)]
    pub simulator: FocuserSimulatorConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
}

impl FocuserConfig {
    pub fn capabilities(&self) -> CapabilitySet {
        CapabilitySet::empty()
            .with_if(Capability::Absolute, self.absolute)
            .with_if(Capability::TempCompAvailable, self.temp_comp_available)
            .with_if(Capability::Temperature, self.simulator.temperature.is_some())
    }
}

// ============================================================================
// Root
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub devices: Vec<DeviceConfig>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            service: ServiceConfig::default(),
            server: ServerConfig::default(),
            logging: LoggingConfig::default(),
            devices: vec![DeviceConfig::Telescope(TelescopeConfig {
                number: 0,
                name: "Simulated Mount".to_string(),
                description: "In-process simulated equatorial mount".to_string(),
                unique_id: None,
                capabilities: TelescopeCapabilities::default(),
                simulator: MountSimulatorConfig::default(),
                timeouts: TimeoutConfig::default(),
            })],
        }
    }
}

impl AppConfig {
    /// Load defaults, then `path` if it exists, then environment overrides
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));

        if path.exists() {
            info!("Loading configuration from {}", path.display());
            figment = figment.merge(Yaml::file(path));
        } else {
            warn!(
                "Configuration file {} not found, using defaults",
                path.display()
            );
        }

        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract(figment)
    }

    /// Parse a YAML document layered over the defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::extract(
            Figment::from(Serialized::defaults(AppConfig::default())).merge(Yaml::string(yaml)),
        )
    }

    fn extract(figment: Figment) -> Result<Self, ConfigError> {
        let config: AppConfig = figment.extract()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.service.port == 0 {
            return Err(invalid("service.port must be greater than 0"));
        }
        if self.service.host.trim().is_empty() {
            return Err(invalid("service.host must not be empty"));
        }
        if self.devices.is_empty() {
            return Err(invalid("at least one device must be configured"));
        }

        let mut seen = HashSet::new();
        for device in &self.devices {
            let key = (device.device_type(), device.number());
            if !seen.insert(key) {
                return Err(invalid(format!("duplicate device {} {}", key.0, key.1)));
            }

            let timeouts = device.timeouts();
            if timeouts.io_timeout_ms == 0 || timeouts.motion_timeout_ms == 0 {
                return Err(invalid(format!(
                    "{} {}: timeouts must be greater than 0",
                    key.0, key.1
                )));
            }

            match device {
                DeviceConfig::Telescope(c) => {
                    if !(c.simulator.slew_rate.is_finite() && c.simulator.slew_rate > 0.0) {
                        return Err(invalid(format!(
                            "Telescope {}: slew_rate must be positive",
                            c.number
                        )));
                    }
                },
                DeviceConfig::Focuser(c) => {
                    if !(c.simulator.step_rate.is_finite() && c.simulator.step_rate > 0.0) {
                        return Err(invalid(format!(
                            "Focuser {}: step_rate must be positive",
                            c.number
                        )));
                    }
                    if c.simulator.max_step <= 0 {
                        return Err(invalid(format!(
                            "Focuser {}: max_step must be positive",
                            c.number
                        )));
                    }
                },
            }
        }
        Ok(())
    }

    /// `host:port` to bind
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.service.host, self.service.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.service.port, DEFAULT_PORT);
        assert_eq!(config.bind_address(), "0.0.0.0:11111");
        assert_eq!(config.devices.len(), 1);
    }

    #[test]
    fn test_yaml_devices() {
        let yaml = r#"
server:
  server_name: "Backyard Observatory"
  manufacturer: "Example"
  manufacturer_version: "1.2"
  location: "Garden"
devices:
  - type: telescope
    number: 0
    name: "Main Mount"
    capabilities:
      can_find_home: false
    simulator:
      slew_rate: 3
  - type: focuser
    number: 0
    name: "Main Focuser"
    temp_comp_available: true
    simulator:
      max_step: 20000
      temperature: 4.5
"#;
        let config = AppConfig::from_yaml_str(yaml).unwrap();

        assert_eq!(config.server.location, "Garden");
        assert_eq!(config.devices.len(), 2);
        match &config.devices[0] {
            DeviceConfig::Telescope(t) => {
                assert_eq!(t.name, "Main Mount");
                assert_eq!(t.simulator.slew_rate, 3.0);
                let caps = t.capabilities.to_set();
                assert!(caps.contains(Capability::CanSlew));
                assert!(!caps.contains(Capability::CanFindHome));
            },
            other => panic!("unexpected device {other:?}"),
        }
        match &config.devices[1] {
            DeviceConfig::Focuser(f) => {
                let caps = f.capabilities();
                assert!(caps.contains(Capability::Absolute));
                assert!(caps.contains(Capability::Temperature));
                assert_eq!(f.simulator.max_step, 20_000);
            },
            other => panic!("unexpected device {other:?}"),
        }
    }

    #[test]
    fn test_duplicate_devices_rejected() {
        let yaml = r#"
devices:
  - type: telescope
    number: 0
    name: "A"
  - type: telescope
    number: 0
    name: "B"
"#;
        let err = AppConfig::from_yaml_str(yaml).unwrap_err();
        assert!(err.to_string().contains("duplicate device Telescope 0"));
    }

    #[test]
    fn test_invalid_rates_rejected() {
        let mut config = AppConfig::default();
        if let DeviceConfig::Telescope(t) = &mut config.devices[0] {
            t.simulator.slew_rate = 0.0;
        }
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = AppConfig::default();
        config.devices.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_file_and_env() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
service:
  port: 12000
devices:
  - type: focuser
    number: 1
    name: "Focuser"
"#
        )
        .unwrap();

        figment::Jail::expect_with(|jail| {
            jail.set_env("ALPACASRV_SERVICE__HOST", "127.0.0.1");
            let config = AppConfig::load(file.path()).map_err(|e| e.to_string())?;
            assert_eq!(config.bind_address(), "127.0.0.1:12000");
            assert_eq!(config.devices[0].device_type(), DeviceType::Focuser);
            assert_eq!(config.devices[0].number(), 1);
            Ok(())
        });
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let config = AppConfig::load("/nonexistent/alpacasrv.yaml").unwrap();
        assert_eq!(config.service.name, "alpacasrv");
    }
}
