//! Telescope (mount) device

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::motion::{await_motion, MotionOutcome, MotionTicket, MotionTracker};
use super::{AlpacaDevice, Capability, CapabilitySet, DeviceInfo, MemberSpec};
use crate::api::params::Parameters;
use crate::core::driver::{
    with_timeout, AlignmentMode, DriverTimeouts, EquatorialCoordinates, MountDriver,
};
use crate::error::{AlpacaError, Result};

static TELESCOPE_MEMBERS: &[MemberSpec] = &[
    MemberSpec::read_only("alignmentmode"),
    MemberSpec::read_only("athome"),
    MemberSpec::read_only("atpark"),
    MemberSpec::read_only("canfindhome"),
    MemberSpec::read_only("canpark"),
    MemberSpec::read_only("cansettracking"),
    MemberSpec::read_only("canslew"),
    MemberSpec::read_only("canslewasync"),
    MemberSpec::read_only("cansync"),
    MemberSpec::read_only("canunpark"),
    MemberSpec::read_only("declination"),
    MemberSpec::read_only("equatorialsystem"),
    MemberSpec::read_only("rightascension"),
    MemberSpec::read_only("siderealtime"),
    MemberSpec::read_only("slewing"),
    MemberSpec::read_write("targetdeclination"),
    MemberSpec::read_write("targetrightascension"),
    MemberSpec::read_write("tracking").write_requires(Capability::CanSetTracking),
    MemberSpec::action("abortslew"),
    MemberSpec::action("findhome").requires(Capability::CanFindHome),
    MemberSpec::action("park").requires(Capability::CanPark),
    MemberSpec::action("slewtocoordinates").requires(Capability::CanSlew),
    MemberSpec::action("slewtocoordinatesasync").requires(Capability::CanSlewAsync),
    MemberSpec::action("slewtotarget").requires(Capability::CanSlew),
    MemberSpec::action("slewtotargetasync").requires(Capability::CanSlewAsync),
    MemberSpec::action("synctocoordinates").requires(Capability::CanSync),
    MemberSpec::action("synctotarget").requires(Capability::CanSync),
    MemberSpec::action("unpark").requires(Capability::CanUnpark),
];

/// Validate a right ascension in hours, `[0, 24)`
pub fn check_right_ascension(name: &str, value: f64) -> Result<f64> {
    if (0.0..24.0).contains(&value) {
        Ok(value)
    } else {
        Err(AlpacaError::out_of_range(name, value, 0.0, 24.0))
    }
}

/// Validate a declination in degrees, `[-90, 90]`
pub fn check_declination(name: &str, value: f64) -> Result<f64> {
    if (-90.0..=90.0).contains(&value) {
        Ok(value)
    } else {
        Err(AlpacaError::out_of_range(name, value, -90.0, 90.0))
    }
}

fn coordinates_from(params: &Parameters) -> Result<EquatorialCoordinates> {
    let ra = check_right_ascension("RightAscension", params.require_f64("RightAscension")?)?;
    let dec = check_declination("Declination", params.require_f64("Declination")?)?;
    Ok(EquatorialCoordinates::new(ra, dec))
}

#[derive(Debug)]
struct TelescopeState {
    connected: bool,
    position: EquatorialCoordinates,
    target_right_ascension: Option<f64>,
    target_declination: Option<f64>,
    tracking: bool,
    at_park: bool,
    at_home: bool,
    alignment_mode: AlignmentMode,
    equatorial_system: u8,
}

impl TelescopeState {
    fn target(&self) -> Option<EquatorialCoordinates> {
        Some(EquatorialCoordinates::new(
            self.target_right_ascension?,
            self.target_declination?,
        ))
    }
}

/// Alpaca telescope backed by a [`MountDriver`]
pub struct Telescope {
    info: DeviceInfo,
    capabilities: CapabilitySet,
    timeouts: DriverTimeouts,
    driver: Arc<dyn MountDriver>,
    state: Arc<RwLock<TelescopeState>>,
    motion: Arc<MotionTracker>,
}

impl std::fmt::Debug for Telescope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telescope")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Telescope {
    pub fn new(
        info: DeviceInfo,
        capabilities: CapabilitySet,
        driver: Arc<dyn MountDriver>,
        timeouts: DriverTimeouts,
    ) -> Self {
        Self {
            info,
            capabilities,
            timeouts,
            driver,
            state: Arc::new(RwLock::new(TelescopeState {
                connected: false,
                position: EquatorialCoordinates::new(0.0, 0.0),
                target_right_ascension: None,
                target_declination: None,
                tracking: false,
                at_park: false,
                at_home: false,
                alignment_mode: AlignmentMode::default(),
                equatorial_system: 1,
            })),
            motion: Arc::new(MotionTracker::new()),
        }
    }

    /// All telescope capabilities
    pub fn full_capabilities() -> CapabilitySet {
        [
            Capability::CanSlew,
            Capability::CanSlewAsync,
            Capability::CanPark,
            Capability::CanUnpark,
            Capability::CanSetTracking,
            Capability::CanSync,
            Capability::CanFindHome,
        ]
        .into_iter()
        .collect()
    }

    /// Register the slew and hand completion to a background task
    async fn begin_slew(&self, target: EquatorialCoordinates) -> Result<()> {
        let mut state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;
        if state.at_park {
            return Err(AlpacaError::invalid_operation(format!(
                "{} is parked and cannot slew",
                self.info.label()
            )));
        }
        let ticket = self.motion.begin().ok_or_else(|| {
            AlpacaError::invalid_operation(format!("{} is already slewing", self.info.label()))
        })?;

        if let Err(err) =
            with_timeout(self.timeouts.io, "start slew", self.driver.start_slew(target)).await
        {
            self.motion.finish(ticket);
            return Err(err);
        }

        state.target_right_ascension = Some(target.right_ascension);
        state.target_declination = Some(target.declination);
        state.at_home = false;
        drop(state);

        info!(
            "{} slewing to RA {:.4}h Dec {:.4}",
            self.info.label(),
            target.right_ascension,
            target.declination
        );
        self.spawn_completion(ticket);
        Ok(())
    }

    fn spawn_completion(&self, ticket: MotionTicket) {
        let driver = Arc::clone(&self.driver);
        let state = Arc::clone(&self.state);
        let motion = Arc::clone(&self.motion);
        let timeouts = self.timeouts;
        let label = self.info.label();

        tokio::spawn(async move {
            let mut outcome = await_motion(timeouts.motion, driver.wait_until_stopped()).await;

            // A current ticket blocks new slews; the device lock is not held here
            if matches!(outcome, MotionOutcome::TimedOut) && motion.is_current(ticket) {
                warn!("{} slew did not finish within {:?}", label, timeouts.motion);
                if let Err(err) =
                    with_timeout(timeouts.io, "abort slew", driver.abort_slew()).await
                {
                    warn!("{} abort after timeout failed: {}", label, err);
                }
                if let Ok(position) =
                    with_timeout(timeouts.io, "read position", driver.position()).await
                {
                    outcome = MotionOutcome::Completed(position);
                }
            }

            let mut state = state.write().await;
            if !motion.finish(ticket) {
                debug!("{} ignoring completion of a superseded slew", label);
                return;
            }
            match outcome {
                MotionOutcome::Completed(position) => {
                    state.position = position;
                    info!("{} slew ended", label);
                },
                MotionOutcome::Aborted => debug!("{} slew aborted", label),
                MotionOutcome::Failed(err) => warn!("{} slew failed: {}", label, err),
                MotionOutcome::TimedOut => warn!("{} position unknown after timeout", label),
            }
        });
    }

    /// Live position while slewing, cached otherwise
    async fn current_position(
        &self,
        cached: EquatorialCoordinates,
    ) -> Result<EquatorialCoordinates> {
        if self.motion.is_active() {
            with_timeout(self.timeouts.io, "read position", self.driver.position()).await
        } else {
            Ok(cached)
        }
    }

    async fn abort_slew(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;
        if !self.motion.cancel() {
            return Ok(());
        }
        with_timeout(self.timeouts.io, "abort slew", self.driver.abort_slew()).await?;
        state.position = with_timeout(self.timeouts.io, "read position", self.driver.position())
            .await?;
        info!("{} slew aborted", self.info.label());
        Ok(())
    }

    async fn park(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;
        if state.at_park {
            return Ok(());
        }
        if self.motion.cancel() {
            with_timeout(self.timeouts.io, "abort slew", self.driver.abort_slew()).await?;
        }
        state.position = with_timeout(self.timeouts.io, "park", self.driver.park()).await?;
        state.at_park = true;
        state.at_home = false;
        state.tracking = false;
        info!("{} parked", self.info.label());
        Ok(())
    }

    async fn unpark(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;
        if !state.at_park {
            return Ok(());
        }
        with_timeout(self.timeouts.io, "unpark", self.driver.unpark()).await?;
        state.at_park = false;
        info!("{} unparked", self.info.label());
        Ok(())
    }

    async fn sync(&self, coordinates: Option<EquatorialCoordinates>) -> Result<()> {
        let mut state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;
        let coordinates = match coordinates {
            Some(coordinates) => coordinates,
            None => state.target().ok_or_else(|| {
                AlpacaError::invalid_operation("Target coordinates have not been set")
            })?,
        };
        if state.at_park {
            return Err(AlpacaError::invalid_operation(format!(
                "{} is parked and cannot sync",
                self.info.label()
            )));
        }
        if self.motion.is_active() {
            return Err(AlpacaError::invalid_operation(format!(
                "{} cannot sync while slewing",
                self.info.label()
            )));
        }

        with_timeout(self.timeouts.io, "sync", self.driver.sync(coordinates)).await?;
        state.position = coordinates;
        state.target_right_ascension = Some(coordinates.right_ascension);
        state.target_declination = Some(coordinates.declination);
        state.at_home = false;
        Ok(())
    }

    async fn find_home(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;
        if state.at_park {
            return Err(AlpacaError::invalid_operation(format!(
                "{} is parked and cannot find home",
                self.info.label()
            )));
        }
        if self.motion.is_active() {
            return Err(AlpacaError::invalid_operation(format!(
                "{} is already slewing",
                self.info.label()
            )));
        }
        state.position = with_timeout(self.timeouts.io, "find home", self.driver.find_home())
            .await?;
        state.at_home = true;
        Ok(())
    }

    async fn slew_to_target(&self) -> Result<()> {
        let target = {
            let state = self.state.read().await;
            self.info.ensure_connected(state.connected)?;
            state.target().ok_or_else(|| {
                AlpacaError::invalid_operation("Target coordinates have not been set")
            })?
        };
        self.begin_slew(target).await
    }
}

#[async_trait]
impl AlpacaDevice for Telescope {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn members(&self) -> &'static [MemberSpec] {
        TELESCOPE_MEMBERS
    }

    fn capabilities(&self) -> CapabilitySet {
        self.capabilities
    }

    async fn is_connected(&self) -> bool {
        self.state.read().await.connected
    }

    async fn connect(&self, connected: bool) -> Result<()> {
        let mut state = self.state.write().await;
        if state.connected == connected {
            return Ok(());
        }

        if connected {
            let status = with_timeout(self.timeouts.io, "connect", self.driver.connect()).await?;
            state.position = status.position;
            state.tracking = status.tracking;
            state.at_park = status.at_park;
            state.at_home = status.at_home;
            state.alignment_mode = status.alignment_mode;
            state.equatorial_system = status.equatorial_system;
            state.connected = true;
            info!("{} connected via {}", self.info.label(), self.driver.name());
            return Ok(());
        }

        if self.motion.cancel() {
            if let Err(err) =
                with_timeout(self.timeouts.io, "abort slew", self.driver.abort_slew()).await
            {
                warn!("{} abort on disconnect failed: {}", self.info.label(), err);
            }
        }
        if let Err(err) = with_timeout(self.timeouts.io, "disconnect", self.driver.disconnect()).await
        {
            warn!("{} driver disconnect failed: {}", self.info.label(), err);
        }
        state.connected = false;
        info!("{} disconnected", self.info.label());
        Ok(())
    }

    async fn read_property(&self, member: &MemberSpec) -> Result<Value> {
        let state = self.state.read().await;
        self.info.ensure_connected(state.connected)?;
        let caps = self.capabilities;

        let value = match member.name {
            "alignmentmode" => Value::from(state.alignment_mode as u8),
            "athome" => Value::Bool(state.at_home),
            "atpark" => Value::Bool(state.at_park),
            "canfindhome" => Value::Bool(caps.contains(Capability::CanFindHome)),
            "canpark" => Value::Bool(caps.contains(Capability::CanPark)),
            "cansettracking" => Value::Bool(caps.contains(Capability::CanSetTracking)),
            "canslew" => Value::Bool(caps.contains(Capability::CanSlew)),
            "canslewasync" => Value::Bool(caps.contains(Capability::CanSlewAsync)),
            "cansync" => Value::Bool(caps.contains(Capability::CanSync)),
            "canunpark" => Value::Bool(caps.contains(Capability::CanUnpark)),
            "declination" => {
                Value::from(self.current_position(state.position).await?.declination)
            },
            "equatorialsystem" => Value::from(state.equatorial_system),
            "rightascension" => {
                Value::from(self.current_position(state.position).await?.right_ascension)
            },
            "siderealtime" => Value::from(
                with_timeout(self.timeouts.io, "sidereal time", self.driver.sidereal_time())
                    .await?,
            ),
            "slewing" => Value::Bool(self.motion.is_active()),
            "targetdeclination" => Value::from(state.target_declination.ok_or_else(|| {
                AlpacaError::value_not_set("TargetDeclination has not been set")
            })?),
            "targetrightascension" => {
                Value::from(state.target_right_ascension.ok_or_else(|| {
                    AlpacaError::value_not_set("TargetRightAscension has not been set")
                })?)
            },
            "tracking" => Value::Bool(state.tracking),
            other => {
                return Err(AlpacaError::property_not_implemented(format!(
                    "{other} is not a readable property of Telescope"
                )))
            },
        };
        Ok(value)
    }

    async fn set_property(&self, member: &MemberSpec, params: &Parameters) -> Result<()> {
        let mut state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;

        match member.name {
            "targetdeclination" => {
                let value = params.require_f64("TargetDeclination")?;
                state.target_declination = Some(check_declination("TargetDeclination", value)?);
            },
            "targetrightascension" => {
                let value = params.require_f64("TargetRightAscension")?;
                state.target_right_ascension =
                    Some(check_right_ascension("TargetRightAscension", value)?);
            },
            "tracking" => {
                let enabled = params.require_bool("Tracking")?;
                if enabled && state.at_park {
                    return Err(AlpacaError::invalid_operation(format!(
                        "{} is parked and cannot track",
                        self.info.label()
                    )));
                }
                with_timeout(
                    self.timeouts.io,
                    "set tracking",
                    self.driver.set_tracking(enabled),
                )
                .await?;
                state.tracking = enabled;
            },
            other => {
                return Err(AlpacaError::property_not_implemented(format!(
                    "{other} is not a writable property of Telescope"
                )))
            },
        }
        Ok(())
    }

    async fn invoke_action(
        &self,
        member: &MemberSpec,
        params: &Parameters,
    ) -> Result<Option<Value>> {
        match member.name {
            // Both variants return once the slew is registered; Slewing
            // reports progress.
            "slewtocoordinates" | "slewtocoordinatesasync" => {
                let target = coordinates_from(params)?;
                self.begin_slew(target).await?;
            },
            "slewtotarget" | "slewtotargetasync" => self.slew_to_target().await?,
            "abortslew" => self.abort_slew().await?,
            "park" => self.park().await?,
            "unpark" => self.unpark().await?,
            "synctocoordinates" => {
                let coordinates = coordinates_from(params)?;
                self.sync(Some(coordinates)).await?;
            },
            "synctotarget" => self.sync(None).await?,
            "findhome" => self.find_home().await?,
            other => {
                return Err(AlpacaError::not_implemented(format!(
                    "{other} is not implemented by Telescope"
                )))
            },
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::device::DeviceType;
    use crate::core::driver::SimulatedMount;
    use std::time::Duration;

    fn telescope(capabilities: CapabilitySet) -> Telescope {
        Telescope::new(
            DeviceInfo::new(DeviceType::Telescope, 0, "Sim Mount"),
            capabilities,
            Arc::new(SimulatedMount::new("sim", 20.0, 0.0)),
            DriverTimeouts::default(),
        )
    }

    fn coords(ra: &str, dec: &str) -> Parameters {
        Parameters::from_pairs([("RightAscension", ra), ("Declination", dec)])
    }

    async fn wait_until_idle(scope: &Telescope) {
        while scope.get_property("slewing").await.unwrap() == Value::Bool(true) {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    #[tokio::test]
    async fn test_identity_readable_while_disconnected() {
        let scope = telescope(Telescope::full_capabilities());

        assert_eq!(scope.get_property("Name").await.unwrap(), Value::from("Sim Mount"));
        assert_eq!(scope.get_property("connected").await.unwrap(), Value::Bool(false));
        assert_eq!(scope.get_property("InterfaceVersion").await.unwrap(), Value::from(3));
        assert!(matches!(
            scope.get_property("rightascension").await,
            Err(AlpacaError::NotConnected(_))
        ));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let scope = telescope(Telescope::full_capabilities());
        let connect = Parameters::from_pairs([("Connected", "True")]);

        scope.put_member("connected", &connect).await.unwrap();
        scope.put_member("Connected", &connect).await.unwrap();
        assert!(scope.is_connected().await);
        // Simulated mount starts parked
        assert_eq!(scope.get_property("atpark").await.unwrap(), Value::Bool(true));
    }

    #[tokio::test]
    async fn test_unknown_and_gated_members() {
        let scope = telescope(CapabilitySet::empty().with(Capability::CanSlew));
        scope.connect(true).await.unwrap();

        assert!(matches!(
            scope.get_property("focallength").await,
            Err(AlpacaError::PropertyNotImplemented(_))
        ));
        assert!(matches!(
            scope.put_member("park", &Parameters::new()).await,
            Err(AlpacaError::NotImplemented(_))
        ));
        assert!(matches!(
            scope
                .put_member("tracking", &Parameters::from_pairs([("Tracking", "true")]))
                .await,
            Err(AlpacaError::NotImplemented(_))
        ));
        assert!(matches!(
            scope.put_member("slewing", &Parameters::new()).await,
            Err(AlpacaError::PropertyNotImplemented(_))
        ));
        assert!(matches!(
            scope.get_property("abortslew").await,
            Err(AlpacaError::PropertyNotImplemented(_))
        ));
    }

    #[tokio::test]
    async fn test_slew_while_parked_is_invalid() {
        let scope = telescope(Telescope::full_capabilities());
        scope.connect(true).await.unwrap();

        let err = scope
            .put_member("slewtocoordinatesasync", &coords("5.5", "30"))
            .await
            .unwrap_err();
        assert!(matches!(err, AlpacaError::InvalidOperation(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slew_updates_position_on_completion() {
        let scope = telescope(Telescope::full_capabilities());
        scope.connect(true).await.unwrap();
        scope.put_member("unpark", &Parameters::new()).await.unwrap();

        scope
            .put_member("slewtocoordinates", &coords("5,5", "30"))
            .await
            .unwrap();
        assert_eq!(scope.get_property("slewing").await.unwrap(), Value::Bool(true));

        wait_until_idle(&scope).await;
        assert_eq!(scope.get_property("rightascension").await.unwrap(), Value::from(5.5));
        assert_eq!(scope.get_property("declination").await.unwrap(), Value::from(30.0));
        assert_eq!(
            scope.get_property("targetrightascension").await.unwrap(),
            Value::from(5.5)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_abort_clears_slewing() {
        let scope = telescope(Telescope::full_capabilities());
        scope.connect(true).await.unwrap();
        scope.put_member("unpark", &Parameters::new()).await.unwrap();

        scope
            .put_member("slewtocoordinatesasync", &coords("12", "-45"))
            .await
            .unwrap();
        scope.put_member("abortslew", &Parameters::new()).await.unwrap();
        assert_eq!(scope.get_property("slewing").await.unwrap(), Value::Bool(false));

        // Idle abort is a no-op
        scope.put_member("abortslew", &Parameters::new()).await.unwrap();
    }

    #[tokio::test]
    async fn test_coordinate_validation() {
        let scope = telescope(Telescope::full_capabilities());
        scope.connect(true).await.unwrap();
        scope.put_member("unpark", &Parameters::new()).await.unwrap();

        for (ra, dec) in [("24", "0"), ("-1", "0"), ("1", "90.5"), ("abc", "0")] {
            let err = scope
                .put_member("slewtocoordinatesasync", &coords(ra, dec))
                .await
                .unwrap_err();
            assert!(matches!(err, AlpacaError::InvalidValue(_)), "{ra} {dec}");
        }
        assert!(matches!(
            scope.get_property("targetdeclination").await,
            Err(AlpacaError::ValueNotSet(_))
        ));
        assert!(matches!(
            scope.put_member("slewtotarget", &Parameters::new()).await,
            Err(AlpacaError::InvalidOperation(_))
        ));
    }

    #[tokio::test]
    async fn test_sync_and_target_writes() {
        let scope = telescope(Telescope::full_capabilities());
        scope.connect(true).await.unwrap();
        scope.put_member("unpark", &Parameters::new()).await.unwrap();

        scope
            .put_member(
                "targetrightascension",
                &Parameters::from_pairs([("TargetRightAscension", "3.25")]),
            )
            .await
            .unwrap();
        scope
            .put_member(
                "targetdeclination",
                &Parameters::from_pairs([("TargetDeclination", "-12")]),
            )
            .await
            .unwrap();
        scope.put_member("synctotarget", &Parameters::new()).await.unwrap();

        assert_eq!(scope.get_property("rightascension").await.unwrap(), Value::from(3.25));
        assert_eq!(scope.get_property("declination").await.unwrap(), Value::from(-12.0));
    }

    #[tokio::test]
    async fn test_park_stops_tracking() {
        let scope = telescope(Telescope::full_capabilities());
        scope.connect(true).await.unwrap();
        scope.put_member("unpark", &Parameters::new()).await.unwrap();
        scope
            .put_member("tracking", &Parameters::from_pairs([("Tracking", "true")]))
            .await
            .unwrap();
        assert_eq!(scope.get_property("tracking").await.unwrap(), Value::Bool(true));

        scope.put_member("park", &Parameters::new()).await.unwrap();
        assert_eq!(scope.get_property("atpark").await.unwrap(), Value::Bool(true));
        assert_eq!(scope.get_property("tracking").await.unwrap(), Value::Bool(false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_aborts_motion() {
        let scope = telescope(Telescope::full_capabilities());
        scope.connect(true).await.unwrap();
        scope.put_member("unpark", &Parameters::new()).await.unwrap();
        scope
            .put_member("slewtocoordinatesasync", &coords("18", "-60"))
            .await
            .unwrap();

        scope.connect(false).await.unwrap();
        assert!(!scope.motion.is_active());
        assert!(matches!(
            scope.get_property("slewing").await,
            Err(AlpacaError::NotConnected(_))
        ));
    }
}
