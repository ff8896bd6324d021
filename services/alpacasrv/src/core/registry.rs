//! Device registry
//!
//! Maps (device type, device number) to a shared device handle. Built once
//! at startup and never mutated afterwards, so lookups need no locking.

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use super::device::{AlpacaDevice, DeviceType};
use crate::error::{AlpacaError, Result};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("duplicate device {device_type} {device_number}")]
    Duplicate {
        device_type: DeviceType,
        device_number: u32,
    },
}

/// Entry of `/management/v1/configureddevices`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConfiguredDevice {
    pub device_name: String,
    pub device_type: String,
    pub device_number: u32,
    #[serde(rename = "UniqueID")]
    pub unique_id: String,
}

/// Immutable registry of every served device
pub struct DeviceRegistry {
    devices: HashMap<(DeviceType, u32), Arc<dyn AlpacaDevice>>,
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut keys: Vec<_> = self.devices.keys().collect();
        keys.sort();
        f.debug_struct("DeviceRegistry")
            .field("devices", &keys)
            .finish()
    }
}

impl DeviceRegistry {
    pub fn builder() -> DeviceRegistryBuilder {
        DeviceRegistryBuilder::default()
    }

    /// Look a device up; repeated calls return the same handle
    pub fn resolve(
        &self,
        device_type: DeviceType,
        device_number: u32,
    ) -> Result<Arc<dyn AlpacaDevice>> {
        self.devices
            .get(&(device_type, device_number))
            .cloned()
            .ok_or_else(|| {
                AlpacaError::device_not_found(format!(
                    "No {device_type} with device number {device_number} is configured"
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Devices ordered by type, then number
    pub fn configured_devices(&self) -> Vec<ConfiguredDevice> {
        let mut entries: Vec<_> = self.devices.iter().collect();
        entries.sort_by_key(|(key, _)| **key);
        entries
            .into_iter()
            .map(|((device_type, device_number), device)| {
                let info = device.info();
                ConfiguredDevice {
                    device_name: info.name.clone(),
                    device_type: device_type.as_str().to_string(),
                    device_number: *device_number,
                    unique_id: info.unique_id.clone(),
                }
            })
            .collect()
    }

    /// Disconnect every device, logging failures; used at shutdown
    pub async fn disconnect_all(&self) {
        for device in self.devices.values() {
            let label = device.info().label();
            if !device.is_connected().await {
                continue;
            }
            match device.connect(false).await {
                Ok(()) => info!("{} disconnected at shutdown", label),
                Err(e) => warn!("{} failed to disconnect: {}", label, e),
            }
        }
    }
}

#[derive(Default)]
pub struct DeviceRegistryBuilder {
    devices: HashMap<(DeviceType, u32), Arc<dyn AlpacaDevice>>,
}

impl DeviceRegistryBuilder {
    /// Add a device under its own type/number; duplicates are rejected
    pub fn register(
        mut self,
        device: Arc<dyn AlpacaDevice>,
    ) -> std::result::Result<Self, RegistryError> {
        let info = device.info();
        let key = (info.device_type, info.device_number);
        if self.devices.contains_key(&key) {
            return Err(RegistryError::Duplicate {
                device_type: key.0,
                device_number: key.1,
            });
        }
        self.devices.insert(key, device);
        Ok(self)
    }

    pub fn build(self) -> DeviceRegistry {
        DeviceRegistry {
            devices: self.devices,
        }
    }
}
