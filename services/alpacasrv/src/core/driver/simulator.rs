//! In-process simulated hardware
//!
//! Motion takes real (tokio) time: a slew lasts `travel / slew_rate`
//! seconds, a focuser move `steps / step_rate`. Aborts cancel the pending
//! motion through a [`CancellationToken`] and freeze the position where the
//! motion was interrupted.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{
    AlignmentMode, DriverError, DriverResult, EquatorialCoordinates, FocuserDriver,
    FocuserStatus, MountDriver, MountStatus,
};

/// Motion in flight between two positions
#[derive(Debug, Clone)]
struct Motion<P> {
    from: P,
    to: P,
    started: Instant,
    duration: Duration,
    cancel: CancellationToken,
}

impl<P> Motion<P> {
    fn new(from: P, to: P, duration: Duration) -> Self {
        Self {
            from,
            to,
            started: Instant::now(),
            duration,
            cancel: CancellationToken::new(),
        }
    }

    fn deadline(&self) -> Instant {
        self.started + self.duration
    }

    fn progress(&self) -> f64 {
        if self.duration.is_zero() {
            return 1.0;
        }
        (self.started.elapsed().as_secs_f64() / self.duration.as_secs_f64()).min(1.0)
    }
}

fn seconds(amount: f64, rate: f64) -> Duration {
    Duration::from_secs_f64((amount / rate).max(0.0))
}

// ============================================================================
// Mount
// ============================================================================

#[derive(Debug)]
struct MountSimState {
    position: EquatorialCoordinates,
    tracking: bool,
    parked: bool,
    motion: Option<Motion<EquatorialCoordinates>>,
}

impl MountSimState {
    fn current_position(&self) -> EquatorialCoordinates {
        match &self.motion {
            Some(motion) => motion.from.interpolate(&motion.to, motion.progress()),
            None => self.position,
        }
    }
}

/// Simulated German equatorial mount
#[derive(Debug)]
pub struct SimulatedMount {
    name: String,
    /// Degrees per second on the slowest axis
    slew_rate: f64,
    site_longitude: f64,
    park_position: EquatorialCoordinates,
    home_position: EquatorialCoordinates,
    state: Mutex<MountSimState>,
}

impl SimulatedMount {
    pub fn new(name: impl Into<String>, slew_rate: f64, site_longitude: f64) -> Self {
        let park_position = EquatorialCoordinates::new(0.0, 90.0);
        Self {
            name: name.into(),
            slew_rate,
            site_longitude,
            park_position,
            home_position: EquatorialCoordinates::new(0.0, 90.0),
            state: Mutex::new(MountSimState {
                position: park_position,
                tracking: false,
                parked: true,
                motion: None,
            }),
        }
    }

    fn begin_motion(&self, target: EquatorialCoordinates) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.parked {
            return Err(DriverError::Rejected("mount is parked".to_string()));
        }
        if state.motion.is_some() {
            return Err(DriverError::Rejected("slew already in progress".to_string()));
        }
        let from = state.position;
        let duration = seconds(from.axis_travel(&target), self.slew_rate);
        debug!(
            "Simulated mount slewing to RA {:.4}h Dec {:.4} over {:?}",
            target.right_ascension, target.declination, duration
        );
        state.motion = Some(Motion::new(from, target, duration));
        Ok(())
    }

    fn stop_motion(&self) {
        let mut state = self.state.lock();
        if let Some(motion) = state.motion.take() {
            state.position = motion.from.interpolate(&motion.to, motion.progress());
            motion.cancel.cancel();
        }
    }
}

/// Greenwich mean sidereal time in hours
pub fn greenwich_sidereal_time(at: DateTime<Utc>) -> f64 {
    // J2000.0 = 2000-01-01T12:00:00Z = 946_728_000 unix seconds
    let days = (at.timestamp_millis() as f64 / 1000.0 - 946_728_000.0) / 86_400.0;
    (18.697_374_558 + 24.065_709_824_419_08 * days).rem_euclid(24.0)
}

#[async_trait]
impl MountDriver for SimulatedMount {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> DriverResult<MountStatus> {
        let state = self.state.lock();
        Ok(MountStatus {
            position: state.current_position(),
            tracking: state.tracking,
            at_park: state.parked,
            at_home: state.motion.is_none() && state.position == self.home_position,
            alignment_mode: AlignmentMode::GermanPolar,
            equatorial_system: 1,
        })
    }

    async fn disconnect(&self) -> DriverResult<()> {
        self.stop_motion();
        Ok(())
    }

    async fn start_slew(&self, target: EquatorialCoordinates) -> DriverResult<()> {
        self.begin_motion(target)
    }

    async fn wait_until_stopped(&self) -> DriverResult<EquatorialCoordinates> {
        let (deadline, cancel, target) = {
            let state = self.state.lock();
            match &state.motion {
                Some(motion) => (motion.deadline(), motion.cancel.clone(), motion.to),
                None => return Ok(state.position),
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Err(DriverError::Aborted),
            () = tokio::time::sleep_until(deadline) => {
                let mut state = self.state.lock();
                // Aborted just as the deadline passed
                if cancel.is_cancelled() {
                    return Err(DriverError::Aborted);
                }
                state.motion = None;
                state.position = target;
                Ok(target)
            }
        }
    }

    async fn abort_slew(&self) -> DriverResult<()> {
        self.stop_motion();
        Ok(())
    }

    async fn position(&self) -> DriverResult<EquatorialCoordinates> {
        Ok(self.state.lock().current_position())
    }

    async fn park(&self) -> DriverResult<EquatorialCoordinates> {
        self.stop_motion();
        let mut state = self.state.lock();
        state.position = self.park_position;
        state.tracking = false;
        state.parked = true;
        Ok(self.park_position)
    }

    async fn unpark(&self) -> DriverResult<()> {
        self.state.lock().parked = false;
        Ok(())
    }

    async fn set_tracking(&self, enabled: bool) -> DriverResult<()> {
        let mut state = self.state.lock();
        if enabled && state.parked {
            return Err(DriverError::Rejected(
                "cannot track while parked".to_string(),
            ));
        }
        state.tracking = enabled;
        Ok(())
    }

    async fn sync(&self, coordinates: EquatorialCoordinates) -> DriverResult<()> {
        let mut state = self.state.lock();
        if state.motion.is_some() {
            return Err(DriverError::Rejected("cannot sync while slewing".to_string()));
        }
        state.position = coordinates;
        Ok(())
    }

    async fn find_home(&self) -> DriverResult<EquatorialCoordinates> {
        self.stop_motion();
        let mut state = self.state.lock();
        if state.parked {
            return Err(DriverError::Rejected("mount is parked".to_string()));
        }
        state.position = self.home_position;
        Ok(self.home_position)
    }

    async fn sidereal_time(&self) -> DriverResult<f64> {
        Ok((greenwich_sidereal_time(Utc::now()) + self.site_longitude / 15.0).rem_euclid(24.0))
    }
}

// ============================================================================
// Focuser
// ============================================================================

#[derive(Debug)]
struct FocuserSimState {
    position: i64,
    motion: Option<Motion<i64>>,
}

impl FocuserSimState {
    fn current_position(&self) -> i64 {
        match &self.motion {
            Some(motion) => {
                let travelled = (motion.to - motion.from) as f64 * motion.progress();
                motion.from + travelled.round() as i64
            },
            None => self.position,
        }
    }
}

/// Simulated absolute focuser with a temperature probe
#[derive(Debug)]
pub struct SimulatedFocuser {
    name: String,
    max_step: i64,
    max_increment: i64,
    step_size: f64,
    /// Steps per second
    step_rate: f64,
    temperature: Option<f64>,
    state: Mutex<FocuserSimState>,
}

impl SimulatedFocuser {
    pub fn new(
        name: impl Into<String>,
        max_step: i64,
        step_rate: f64,
        temperature: Option<f64>,
    ) -> Self {
        Self {
            name: name.into(),
            max_step,
            max_increment: max_step,
            step_size: 1.0,
            step_rate,
            temperature,
            state: Mutex::new(FocuserSimState {
                position: max_step / 2,
                motion: None,
            }),
        }
    }

    fn stop_motion(&self) {
        let mut state = self.state.lock();
        let current = state.current_position();
        if let Some(motion) = state.motion.take() {
            state.position = current;
            motion.cancel.cancel();
        }
    }
}

#[async_trait]
impl FocuserDriver for SimulatedFocuser {
    fn name(&self) -> &str {
        &self.name
    }

    async fn connect(&self) -> DriverResult<FocuserStatus> {
        let state = self.state.lock();
        Ok(FocuserStatus {
            position: state.current_position(),
            max_step: self.max_step,
            max_increment: self.max_increment,
            step_size: self.step_size,
            temperature: self.temperature,
        })
    }

    async fn disconnect(&self) -> DriverResult<()> {
        self.stop_motion();
        Ok(())
    }

    async fn start_move(&self, position: i64) -> DriverResult<()> {
        if !(0..=self.max_step).contains(&position) {
            return Err(DriverError::Rejected(format!(
                "position {position} outside 0..={}",
                self.max_step
            )));
        }
        let mut state = self.state.lock();
        if state.motion.is_some() {
            return Err(DriverError::Rejected("focuser is moving".to_string()));
        }
        let from = state.position;
        let duration = seconds((position - from).abs() as f64, self.step_rate);
        debug!("Simulated focuser moving {} -> {} over {:?}", from, position, duration);
        state.motion = Some(Motion::new(from, position, duration));
        Ok(())
    }

    async fn wait_until_stopped(&self) -> DriverResult<i64> {
        let (deadline, cancel, target) = {
            let state = self.state.lock();
            match &state.motion {
                Some(motion) => (motion.deadline(), motion.cancel.clone(), motion.to),
                None => return Ok(state.position),
            }
        };

        tokio::select! {
            () = cancel.cancelled() => Err(DriverError::Aborted),
            () = tokio::time::sleep_until(deadline) => {
                let mut state = self.state.lock();
                if cancel.is_cancelled() {
                    return Err(DriverError::Aborted);
                }
                state.motion = None;
                state.position = target;
                Ok(target)
            }
        }
    }

    async fn halt(&self) -> DriverResult<()> {
        self.stop_motion();
        Ok(())
    }

    async fn position(&self) -> DriverResult<i64> {
        Ok(self.state.lock().current_position())
    }

    async fn temperature(&self) -> DriverResult<Option<f64>> {
        Ok(self.temperature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_mount_slew_completes_at_target() {
        let mount = SimulatedMount::new("sim", 10.0, 0.0);
        mount.unpark().await.unwrap();

        let target = EquatorialCoordinates::new(5.5, 30.0);
        mount.start_slew(target).await.unwrap();
        let reached = mount.wait_until_stopped().await.unwrap();

        assert_eq!(reached, target);
        assert_eq!(mount.position().await.unwrap(), target);
    }

    #[tokio::test]
    async fn test_mount_rejects_slew_while_parked() {
        let mount = SimulatedMount::new("sim", 10.0, 0.0);
        let err = mount
            .start_slew(EquatorialCoordinates::new(1.0, 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, DriverError::Rejected(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_mount_abort_resolves_waiter() {
        let mount = std::sync::Arc::new(SimulatedMount::new("sim", 1.0, 0.0));
        mount.unpark().await.unwrap();
        mount
            .start_slew(EquatorialCoordinates::new(6.0, 0.0))
            .await
            .unwrap();

        let waiter = {
            let mount = mount.clone();
            tokio::spawn(async move { mount.wait_until_stopped().await })
        };
        tokio::time::sleep(Duration::from_secs(1)).await;
        mount.abort_slew().await.unwrap();

        assert_eq!(waiter.await.unwrap(), Err(DriverError::Aborted));
        let stopped = mount.position().await.unwrap();
        assert!(stopped.declination < 90.0 && stopped.declination > 0.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_focuser_move_and_halt() {
        let focuser = SimulatedFocuser::new("sim", 10_000, 100.0, Some(12.5));
        let status = focuser.connect().await.unwrap();
        assert_eq!(status.position, 5_000);

        focuser.start_move(5_500).await.unwrap();
        assert_eq!(focuser.wait_until_stopped().await.unwrap(), 5_500);

        focuser.start_move(6_500).await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        focuser.halt().await.unwrap();
        let halted = focuser.position().await.unwrap();
        assert!(halted > 5_500 && halted < 6_500);
    }

    #[tokio::test]
    async fn test_focuser_rejects_out_of_range() {
        let focuser = SimulatedFocuser::new("sim", 100, 10.0, None);
        assert!(focuser.start_move(101).await.is_err());
        assert!(focuser.start_move(-1).await.is_err());
    }

    #[test]
    fn test_sidereal_time_at_epoch() {
        let epoch = DateTime::parse_from_rfc3339("2000-01-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert!((greenwich_sidereal_time(epoch) - 18.697_374_558).abs() < 1e-6);
    }
}
