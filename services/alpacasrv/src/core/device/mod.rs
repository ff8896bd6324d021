//! Device abstraction
//!
//! Every instrument served over Alpaca implements [`AlpacaDevice`]. Member
//! lookup is table driven: each device type publishes a static slice of
//! [`MemberSpec`] entries, and the provided [`AlpacaDevice::get_property`] /
//! [`AlpacaDevice::put_member`] methods resolve the member, apply the
//! capability gate and answer the identity members common to all devices
//! before handing over to the device-specific implementation.

pub mod focuser;
pub mod motion;
pub mod telescope;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::params::Parameters;
use crate::error::{AlpacaError, Result};

pub use focuser::Focuser;
pub use motion::{MotionOutcome, MotionTicket, MotionTracker};
pub use telescope::Telescope;

/// Alpaca interface version implemented by the devices in this crate
pub const INTERFACE_VERSION: i32 = 3;

// ============================================================================
// Device identity
// ============================================================================

/// Alpaca device type names
///
/// Only Telescope and Focuser have implementations; the others parse so
/// that requests for them resolve to `DeviceNotFound`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DeviceType {
    Camera,
    CoverCalibrator,
    Dome,
    FilterWheel,
    Focuser,
    ObservingConditions,
    Rotator,
    SafetyMonitor,
    Switch,
    Telescope,
}

impl DeviceType {
    pub const ALL: [DeviceType; 10] = [
        DeviceType::Camera,
        DeviceType::CoverCalibrator,
        DeviceType::Dome,
        DeviceType::FilterWheel,
        DeviceType::Focuser,
        DeviceType::ObservingConditions,
        DeviceType::Rotator,
        DeviceType::SafetyMonitor,
        DeviceType::Switch,
        DeviceType::Telescope,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Camera => "Camera",
            DeviceType::CoverCalibrator => "CoverCalibrator",
            DeviceType::Dome => "Dome",
            DeviceType::FilterWheel => "FilterWheel",
            DeviceType::Focuser => "Focuser",
            DeviceType::ObservingConditions => "ObservingConditions",
            DeviceType::Rotator => "Rotator",
            DeviceType::SafetyMonitor => "SafetyMonitor",
            DeviceType::Switch => "Switch",
            DeviceType::Telescope => "Telescope",
        }
    }
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeviceType {
    type Err = AlpacaError;

    fn from_str(s: &str) -> Result<Self> {
        DeviceType::ALL
            .iter()
            .copied()
            .find(|device_type| device_type.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| AlpacaError::device_not_found(format!("Unknown device type '{s}'")))
    }
}

/// Static identity of a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub device_type: DeviceType,
    pub device_number: u32,
    pub name: String,
    pub description: String,
    pub unique_id: String,
    pub driver_info: String,
    pub driver_version: String,
    pub interface_version: i32,
}

impl DeviceInfo {
    pub fn new(device_type: DeviceType, device_number: u32, name: impl Into<String>) -> Self {
        Self {
            device_type,
            device_number,
            name: name.into(),
            description: String::new(),
            unique_id: format!("{}-{device_number}", device_type.as_str().to_lowercase()),
            driver_info: format!("alpacasrv {}", device_type),
            driver_version: env!("CARGO_PKG_VERSION").to_string(),
            interface_version: INTERFACE_VERSION,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = unique_id.into();
        self
    }

    pub fn with_driver_info(mut self, driver_info: impl Into<String>) -> Self {
        self.driver_info = driver_info.into();
        self
    }

    /// "Telescope 0", used in error messages and logs
    pub fn label(&self) -> String {
        format!("{} {}", self.device_type, self.device_number)
    }

    pub fn ensure_connected(&self, connected: bool) -> Result<()> {
        if connected {
            Ok(())
        } else {
            Err(AlpacaError::not_connected(self.label()))
        }
    }
}

// ============================================================================
// Capabilities
// ============================================================================

/// Optional feature a device may declare at construction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Capability {
    CanSlew = 1 << 0,
    CanSlewAsync = 1 << 1,
    CanPark = 1 << 2,
    CanUnpark = 1 << 3,
    CanSetTracking = 1 << 4,
    CanSync = 1 << 5,
    CanFindHome = 1 << 6,
    Absolute = 1 << 7,
    TempCompAvailable = 1 << 8,
    Temperature = 1 << 9,
}

impl Capability {
    pub fn bit(self) -> u16 {
        self as u16
    }
}

/// Immutable set of capabilities
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CapabilitySet(u16);

impl CapabilitySet {
    pub fn empty() -> Self {
        Self(0)
    }

    pub fn with(self, capability: Capability) -> Self {
        Self(self.0 | capability.bit())
    }

    pub fn with_if(self, capability: Capability, enabled: bool) -> Self {
        if enabled {
            self.with(capability)
        } else {
            self
        }
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0 & capability.bit() != 0
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        iter.into_iter().fold(Self::empty(), Self::with)
    }
}

// ============================================================================
// Member dispatch tables
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    ReadOnly,
    ReadWrite,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Property(Access),
    Action,
}

/// One entry of a device type's member table
///
/// Names are stored lowercase and matched case-insensitively.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberSpec {
    pub name: &'static str,
    pub kind: MemberKind,
    /// Gate for every access
    pub requires: Option<Capability>,
    /// Additional gate for writes only
    pub write_requires: Option<Capability>,
}

impl MemberSpec {
    pub const fn read_only(name: &'static str) -> Self {
        Self {
            name,
            kind: MemberKind::Property(Access::ReadOnly),
            requires: None,
            write_requires: None,
        }
    }

    pub const fn read_write(name: &'static str) -> Self {
        Self {
            name,
            kind: MemberKind::Property(Access::ReadWrite),
            requires: None,
            write_requires: None,
        }
    }

    pub const fn action(name: &'static str) -> Self {
        Self {
            name,
            kind: MemberKind::Action,
            requires: None,
            write_requires: None,
        }
    }

    pub const fn requires(mut self, capability: Capability) -> Self {
        self.requires = Some(capability);
        self
    }

    pub const fn write_requires(mut self, capability: Capability) -> Self {
        self.write_requires = Some(capability);
        self
    }

    pub fn is_property(&self) -> bool {
        matches!(self.kind, MemberKind::Property(_))
    }
}

/// Members every device answers
pub static COMMON_MEMBERS: &[MemberSpec] = &[
    MemberSpec::read_write("connected"),
    MemberSpec::read_only("description"),
    MemberSpec::read_only("driverinfo"),
    MemberSpec::read_only("driverversion"),
    MemberSpec::read_only("interfaceversion"),
    MemberSpec::read_only("name"),
    MemberSpec::read_only("supportedactions"),
];

/// Look a member up in the common table, then in `table`
pub fn find_member(table: &'static [MemberSpec], name: &str) -> Option<&'static MemberSpec> {
    COMMON_MEMBERS
        .iter()
        .chain(table.iter())
        .find(|member| member.name.eq_ignore_ascii_case(name))
}

fn check_capability(
    capabilities: CapabilitySet,
    gate: Option<Capability>,
    info: &DeviceInfo,
    member: &str,
) -> Result<()> {
    match gate {
        Some(capability) if !capabilities.contains(capability) => {
            Err(AlpacaError::not_implemented(format!(
                "{member} is not supported by {} ({capability:?} not set)",
                info.label()
            )))
        },
        _ => Ok(()),
    }
}

// ============================================================================
// Device trait
// ============================================================================

/// An instrument addressable over Alpaca
///
/// Implementors hold their mutable state behind a per-device lock and check
/// the connection flag under that lock. Unknown members and capability
/// gates never reach the implementation.
///
/// @lifecycle connect(true) → properties / actions → connect(false)
#[async_trait]
pub trait AlpacaDevice: Send + Sync {
    fn info(&self) -> &DeviceInfo;

    /// Device-specific member table (without [`COMMON_MEMBERS`])
    fn members(&self) -> &'static [MemberSpec];

    fn capabilities(&self) -> CapabilitySet;

    async fn is_connected(&self) -> bool;

    /// Idempotent; disconnecting aborts any motion in progress
    async fn connect(&self, connected: bool) -> Result<()>;

    /// Read a device-specific property
    async fn read_property(&self, member: &MemberSpec) -> Result<Value>;

    /// Write a device-specific read/write property
    async fn set_property(&self, member: &MemberSpec, params: &Parameters) -> Result<()>;

    /// Run a device-specific action
    async fn invoke_action(&self, member: &MemberSpec, params: &Parameters)
        -> Result<Option<Value>>;

    /// GET entry point
    async fn get_property(&self, name: &str) -> Result<Value> {
        let info = self.info();
        let member = find_member(self.members(), name).ok_or_else(|| {
            AlpacaError::property_not_implemented(format!(
                "{name} is not a member of {}",
                info.device_type
            ))
        })?;
        if !member.is_property() {
            return Err(AlpacaError::property_not_implemented(format!(
                "{name} is a method of {} and cannot be read",
                info.device_type
            )));
        }
        check_capability(self.capabilities(), member.requires, info, name)?;

        match member.name {
            "connected" => Ok(Value::Bool(self.is_connected().await)),
            "description" => Ok(Value::from(info.description.clone())),
            "driverinfo" => Ok(Value::from(info.driver_info.clone())),
            "driverversion" => Ok(Value::from(info.driver_version.clone())),
            "interfaceversion" => Ok(Value::from(info.interface_version)),
            "name" => Ok(Value::from(info.name.clone())),
            "supportedactions" => Ok(Value::Array(Vec::new())),
            _ => self.read_property(member).await,
        }
    }

    /// PUT entry point: property writes, `Connected`, and actions
    async fn put_member(&self, name: &str, params: &Parameters) -> Result<Option<Value>> {
        let info = self.info();
        let member = find_member(self.members(), name).ok_or_else(|| {
            AlpacaError::property_not_implemented(format!(
                "{name} is not a member of {}",
                info.device_type
            ))
        })?;
        let capabilities = self.capabilities();
        check_capability(capabilities, member.requires, info, name)?;

        match member.kind {
            MemberKind::Property(Access::ReadOnly) => Err(AlpacaError::property_not_implemented(
                format!("{name} is read-only"),
            )),
            MemberKind::Property(Access::ReadWrite) => {
                check_capability(capabilities, member.write_requires, info, name)?;
                if member.name == "connected" {
                    let connected = params.require_bool("Connected")?;
                    self.connect(connected).await?;
                } else {
                    self.set_property(member, params).await?;
                }
                Ok(None)
            },
            MemberKind::Action => self.invoke_action(member, params).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_type_parse_is_case_insensitive() {
        assert_eq!("telescope".parse::<DeviceType>().unwrap(), DeviceType::Telescope);
        assert_eq!("FOCUSER".parse::<DeviceType>().unwrap(), DeviceType::Focuser);
        assert_eq!("camera".parse::<DeviceType>().unwrap(), DeviceType::Camera);

        let err = "toaster".parse::<DeviceType>().unwrap_err();
        assert!(matches!(err, AlpacaError::DeviceNotFound(_)));
    }

    #[test]
    fn test_capability_set() {
        let caps: CapabilitySet = [Capability::CanSlew, Capability::CanPark].into_iter().collect();

        assert!(caps.contains(Capability::CanSlew));
        assert!(caps.contains(Capability::CanPark));
        assert!(!caps.contains(Capability::CanSync));
        assert!(caps
            .with_if(Capability::CanSync, true)
            .contains(Capability::CanSync));
        assert_eq!(caps.with_if(Capability::CanSync, false), caps);
    }

    #[test]
    fn test_find_member_prefers_common_table() {
        static TABLE: &[MemberSpec] = &[MemberSpec::read_only("position")];

        assert_eq!(find_member(TABLE, "Connected").unwrap().name, "connected");
        assert_eq!(find_member(TABLE, "POSITION").unwrap().name, "position");
        assert!(find_member(TABLE, "slewing").is_none());
    }

    #[test]
    fn test_device_info_defaults() {
        let info = DeviceInfo::new(DeviceType::Telescope, 0, "Mount");

        assert_eq!(info.label(), "Telescope 0");
        assert_eq!(info.unique_id, "telescope-0");
        assert_eq!(info.interface_version, INTERFACE_VERSION);
        assert!(info.ensure_connected(true).is_ok());
        assert!(matches!(
            info.ensure_connected(false),
            Err(AlpacaError::NotConnected(_))
        ));
    }
}
