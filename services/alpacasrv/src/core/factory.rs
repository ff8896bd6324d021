//! Device construction from configuration

use std::sync::Arc;

use tracing::info;

use super::device::{AlpacaDevice, DeviceInfo, DeviceType, Focuser, Telescope};
use super::driver::{SimulatedFocuser, SimulatedMount};
use super::registry::{DeviceRegistry, RegistryError};
use crate::config::{DeviceConfig, FocuserConfig, TelescopeConfig};

fn device_info(
    device_type: DeviceType,
    number: u32,
    name: &str,
    description: &str,
    unique_id: Option<&String>,
    driver: &str,
) -> DeviceInfo {
    let mut info = DeviceInfo::new(device_type, number, name)
        .with_description(description)
        .with_driver_info(format!("alpacasrv {device_type} ({driver})"));
    if let Some(unique_id) = unique_id {
        info = info.with_unique_id(unique_id.clone());
    }
    info
}

pub fn create_telescope(config: &TelescopeConfig) -> Arc<dyn AlpacaDevice> {
    let driver = Arc::new(SimulatedMount::new(
        format!("simulated mount {}", config.number),
        config.simulator.slew_rate,
        config.simulator.site_longitude,
    ));
    let info = device_info(
        DeviceType::Telescope,
        config.number,
        &config.name,
        &config.description,
        config.unique_id.as_ref(),
        "simulator",
    );
    Arc::new(Telescope::new(
        info,
        config.capabilities.to_set(),
        driver,
        config.timeouts.driver_timeouts(),
    ))
}

pub fn create_focuser(config: &FocuserConfig) -> Arc<dyn AlpacaDevice> {
    let driver = Arc::new(SimulatedFocuser::new(
        format!("simulated focuser {}", config.number),
        config.simulator.max_step,
        config.simulator.step_rate,
        config.simulator.temperature,
    ));
    let info = device_info(
        DeviceType::Focuser,
        config.number,
        &config.name,
        &config.description,
        config.unique_id.as_ref(),
        "simulator",
    );
    Arc::new(Focuser::new(
        info,
        config.capabilities(),
        driver,
        config.timeouts.driver_timeouts(),
    ))
}

pub fn create_device(config: &DeviceConfig) -> Arc<dyn AlpacaDevice> {
    match config {
        DeviceConfig::Telescope(c) => create_telescope(c),
        DeviceConfig::Focuser(c) => create_focuser(c),
    }
}

/// Build the registry for every configured device
pub fn build_registry(devices: &[DeviceConfig]) -> Result<DeviceRegistry, RegistryError> {
    let mut builder = DeviceRegistry::builder();
    for config in devices {
        let device = create_device(config);
        info!(
            "Registered {} '{}'",
            device.info().label(),
            device.info().name
        );
        builder = builder.register(device)?;
    }
    Ok(builder.build())
}
