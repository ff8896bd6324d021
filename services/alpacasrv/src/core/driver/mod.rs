//! Hardware driver abstraction
//!
//! Devices talk to hardware only through [`MountDriver`] and
//! [`FocuserDriver`]. Motion is split in two halves: `start_*` hands the
//! command to the hardware and returns, `wait_until_stopped` resolves once
//! the motion has finished or was aborted. Devices bound every synchronous
//! call with [`with_timeout`].

pub mod simulator;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::{AlpacaError, Result};

pub use simulator::{SimulatedFocuser, SimulatedMount};

/// Driver-level failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    #[error("driver did not respond: {0}")]
    Timeout(String),

    /// Hardware refused the command in its current state
    #[error("command rejected: {0}")]
    Rejected(String),

    #[error("driver fault: {0}")]
    Fault(String),

    #[error("motion aborted")]
    Aborted,
}

pub type DriverResult<T> = std::result::Result<T, DriverError>;

impl From<DriverError> for AlpacaError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Timeout(msg) => AlpacaError::timeout(msg),
            DriverError::Rejected(msg) => AlpacaError::invalid_operation(msg),
            DriverError::Fault(msg) => AlpacaError::internal(msg),
            DriverError::Aborted => AlpacaError::invalid_operation("motion aborted"),
        }
    }
}

/// Run a driver call, converting an elapsed `limit` into `DeviceTimeout`
pub async fn with_timeout<T, F>(limit: Duration, operation: &str, call: F) -> Result<T>
where
    F: Future<Output = DriverResult<T>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result.map_err(AlpacaError::from),
        Err(_) => Err(AlpacaError::timeout(format!(
            "{operation} did not complete within {} ms",
            limit.as_millis()
        ))),
    }
}

/// Time limits applied by a device to its driver
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriverTimeouts {
    /// Bound on every synchronous command
    pub io: Duration,
    /// Bound on a background slew / move
    pub motion: Duration,
}

impl Default for DriverTimeouts {
    fn default() -> Self {
        Self {
            io: Duration::from_secs(5),
            motion: Duration::from_secs(300),
        }
    }
}

/// RA in hours, Dec in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EquatorialCoordinates {
    pub right_ascension: f64,
    pub declination: f64,
}

impl EquatorialCoordinates {
    pub fn new(right_ascension: f64, declination: f64) -> Self {
        Self {
            right_ascension,
            declination,
        }
    }

    /// Largest per-axis travel in degrees, RA taking the short way round
    pub fn axis_travel(&self, other: &EquatorialCoordinates) -> f64 {
        let ra_hours = (self.right_ascension - other.right_ascension).abs() % 24.0;
        let ra_hours = ra_hours.min(24.0 - ra_hours);
        let dec = (self.declination - other.declination).abs();
        (ra_hours * 15.0).max(dec)
    }

    /// Point `fraction` of the way towards `target`
    pub fn interpolate(&self, target: &EquatorialCoordinates, fraction: f64) -> Self {
        let fraction = fraction.clamp(0.0, 1.0);
        let mut ra_delta = target.right_ascension - self.right_ascension;
        if ra_delta > 12.0 {
            ra_delta -= 24.0;
        } else if ra_delta < -12.0 {
            ra_delta += 24.0;
        }
        Self {
            right_ascension: (self.right_ascension + ra_delta * fraction).rem_euclid(24.0),
            declination: self.declination + (target.declination - self.declination) * fraction,
        }
    }
}

/// Mount geometry reported by the hardware
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AlignmentMode {
    AltAz = 0,
    Polar = 1,
    #[default]
    GermanPolar = 2,
}

/// Snapshot taken when a mount connects
#[derive(Debug, Clone, PartialEq)]
pub struct MountStatus {
    pub position: EquatorialCoordinates,
    pub tracking: bool,
    pub at_park: bool,
    pub at_home: bool,
    pub alignment_mode: AlignmentMode,
    /// Alpaca EquatorialSystem code (1 = topocentric, 2 = J2000)
    pub equatorial_system: u8,
}

/// Snapshot taken when a focuser connects
#[derive(Debug, Clone, PartialEq)]
pub struct FocuserStatus {
    pub position: i64,
    pub max_step: i64,
    pub max_increment: i64,
    /// Microns per step
    pub step_size: f64,
    pub temperature: Option<f64>,
}

#[async_trait]
pub trait MountDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> DriverResult<MountStatus>;

    async fn disconnect(&self) -> DriverResult<()>;

    /// Begin a slew; returns as soon as the hardware accepted it
    async fn start_slew(&self, target: EquatorialCoordinates) -> DriverResult<()>;

    /// Resolve with the final position, or `Aborted`
    async fn wait_until_stopped(&self) -> DriverResult<EquatorialCoordinates>;

    async fn abort_slew(&self) -> DriverResult<()>;

    async fn position(&self) -> DriverResult<EquatorialCoordinates>;

    async fn park(&self) -> DriverResult<EquatorialCoordinates>;

    async fn unpark(&self) -> DriverResult<()>;

    async fn set_tracking(&self, enabled: bool) -> DriverResult<()>;

    async fn sync(&self, coordinates: EquatorialCoordinates) -> DriverResult<()>;

    async fn find_home(&self) -> DriverResult<EquatorialCoordinates>;

    /// Local apparent sidereal time in hours
    async fn sidereal_time(&self) -> DriverResult<f64>;
}

#[async_trait]
pub trait FocuserDriver: Send + Sync {
    fn name(&self) -> &str;

    async fn connect(&self) -> DriverResult<FocuserStatus>;

    async fn disconnect(&self) -> DriverResult<()>;

    async fn start_move(&self, position: i64) -> DriverResult<()>;

    /// Resolve with the final position, or `Aborted`
    async fn wait_until_stopped(&self) -> DriverResult<i64>;

    async fn halt(&self) -> DriverResult<()>;

    async fn position(&self) -> DriverResult<i64>;

    async fn temperature(&self) -> DriverResult<Option<f64>>;
}
