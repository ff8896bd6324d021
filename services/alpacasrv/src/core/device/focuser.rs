//! Focuser device

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use super::motion::{await_motion, MotionOutcome, MotionTicket, MotionTracker};
use super::{AlpacaDevice, Capability, CapabilitySet, DeviceInfo, MemberSpec};
use crate::api::params::Parameters;
use crate::core::driver::{with_timeout, DriverTimeouts, FocuserDriver};
use crate::error::{AlpacaError, Result};

static FOCUSER_MEMBERS: &[MemberSpec] = &[
    MemberSpec::read_only("absolute"),
    MemberSpec::read_only("ismoving"),
    MemberSpec::read_only("maxincrement"),
    MemberSpec::read_only("maxstep"),
    MemberSpec::read_only("position").requires(Capability::Absolute),
    MemberSpec::read_only("stepsize"),
    MemberSpec::read_write("tempcomp").write_requires(Capability::TempCompAvailable),
    MemberSpec::read_only("tempcompavailable"),
    MemberSpec::read_only("temperature").requires(Capability::Temperature),
    MemberSpec::action("halt"),
    MemberSpec::action("move"),
];

#[derive(Debug)]
struct FocuserState {
    connected: bool,
    position: i64,
    max_step: i64,
    max_increment: i64,
    step_size: f64,
    temp_comp: bool,
}

/// Alpaca focuser backed by a [`FocuserDriver`]
///
/// Absolute focusers take `Position` as a target step; relative ones take
/// it as a signed offset bounded by `MaxIncrement`.
pub struct Focuser {
    info: DeviceInfo,
    capabilities: CapabilitySet,
    timeouts: DriverTimeouts,
    driver: Arc<dyn FocuserDriver>,
    state: Arc<RwLock<FocuserState>>,
    motion: Arc<MotionTracker>,
}

impl std::fmt::Debug for Focuser {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Focuser")
            .field("info", &self.info)
            .field("capabilities", &self.capabilities)
            .finish_non_exhaustive()
    }
}

impl Focuser {
    pub fn new(
        info: DeviceInfo,
        capabilities: CapabilitySet,
        driver: Arc<dyn FocuserDriver>,
        timeouts: DriverTimeouts,
    ) -> Self {
        Self {
            info,
            capabilities,
            timeouts,
            driver,
            state: Arc::new(RwLock::new(FocuserState {
                connected: false,
                position: 0,
                max_step: 0,
                max_increment: 0,
                step_size: 0.0,
                temp_comp: false,
            })),
            motion: Arc::new(MotionTracker::new()),
        }
    }

    /// Resolve the requested `Position` into an absolute target step
    fn target_for(&self, state: &FocuserState, requested: i64) -> Result<i64> {
        if self.capabilities.contains(Capability::Absolute) {
            if !(0..=state.max_step).contains(&requested) {
                return Err(AlpacaError::out_of_range(
                    "Position",
                    requested as f64,
                    0.0,
                    state.max_step as f64,
                ));
            }
            return Ok(requested);
        }

        if requested.unsigned_abs() > state.max_increment.unsigned_abs() {
            return Err(AlpacaError::out_of_range(
                "Position",
                requested as f64,
                -(state.max_increment as f64),
                state.max_increment as f64,
            ));
        }
        Ok(state.position.saturating_add(requested).clamp(0, state.max_step))
    }

    async fn start_move(&self, requested: i64) -> Result<()> {
        let state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;
        if state.temp_comp {
            return Err(AlpacaError::invalid_operation(format!(
                "{} cannot move while temperature compensation is on",
                self.info.label()
            )));
        }
        let target = self.target_for(&state, requested)?;
        let ticket = self.motion.begin().ok_or_else(|| {
            AlpacaError::invalid_operation(format!("{} is already moving", self.info.label()))
        })?;

        if let Err(err) =
            with_timeout(self.timeouts.io, "start move", self.driver.start_move(target)).await
        {
            self.motion.finish(ticket);
            return Err(err);
        }
        drop(state);

        debug!("{} moving to step {}", self.info.label(), target);
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

            if matches!(outcome, MotionOutcome::TimedOut) && motion.is_current(ticket) {
                warn!("{} move did not finish within {:?}", label, timeouts.motion);
                if let Err(err) = with_timeout(timeouts.io, "halt", driver.halt()).await {
                    warn!("{} halt after timeout failed: {}", label, err);
                }
                if let Ok(position) =
                    with_timeout(timeouts.io, "read position", driver.position()).await
                {
                    outcome = MotionOutcome::Completed(position);
                }
            }

            let mut state = state.write().await;
            if !motion.finish(ticket) {
                debug!("{} ignoring completion of a superseded move", label);
                return;
            }
            match outcome {
                MotionOutcome::Completed(position) => {
                    state.position = position;
                    debug!("{} stopped at step {}", label, position);
                },
                MotionOutcome::Aborted => debug!("{} move halted", label),
                MotionOutcome::Failed(err) => warn!("{} move failed: {}", label, err),
                MotionOutcome::TimedOut => warn!("{} position unknown after timeout", label),
            }
        });
    }

    async fn halt(&self) -> Result<()> {
        let mut state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;
        if !self.motion.cancel() {
            return Ok(());
        }
        with_timeout(self.timeouts.io, "halt", self.driver.halt()).await?;
        state.position = with_timeout(self.timeouts.io, "read position", self.driver.position())
            .await?;
        info!("{} halted at step {}", self.info.label(), state.position);
        Ok(())
    }
}

#[async_trait]
impl AlpacaDevice for Focuser {
    fn info(&self) -> &DeviceInfo {
        &self.info
    }

    fn members(&self) -> &'static [MemberSpec] {
        FOCUSER_MEMBERS
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
            state.max_step = status.max_step;
            state.max_increment = status.max_increment;
            state.step_size = status.step_size;
            state.connected = true;
            info!("{} connected via {}", self.info.label(), self.driver.name());
            return Ok(());
        }

        if self.motion.cancel() {
            if let Err(err) = with_timeout(self.timeouts.io, "halt", self.driver.halt()).await {
                warn!("{} halt on disconnect failed: {}", self.info.label(), err);
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

        let value = match member.name {
            "absolute" => Value::Bool(self.capabilities.contains(Capability::Absolute)),
            "ismoving" => Value::Bool(self.motion.is_active()),
            "maxincrement" => Value::from(state.max_increment),
            "maxstep" => Value::from(state.max_step),
            "position" => {
                if self.motion.is_active() {
                    Value::from(
                        with_timeout(self.timeouts.io, "read position", self.driver.position())
                            .await?,
                    )
                } else {
                    Value::from(state.position)
                }
            },
            "stepsize" => Value::from(state.step_size),
            "tempcomp" => Value::Bool(state.temp_comp),
            "tempcompavailable" => {
                Value::Bool(self.capabilities.contains(Capability::TempCompAvailable))
            },
            "temperature" => {
                let reading =
                    with_timeout(self.timeouts.io, "read temperature", self.driver.temperature())
                        .await?;
                Value::from(reading.ok_or_else(|| {
                    AlpacaError::value_not_set("No temperature reading available")
                })?)
            },
            other => {
                return Err(AlpacaError::property_not_implemented(format!(
                    "{other} is not a readable property of Focuser"
                )))
            },
        };
        Ok(value)
    }

    async fn set_property(&self, member: &MemberSpec, params: &Parameters) -> Result<()> {
        let mut state = self.state.write().await;
        self.info.ensure_connected(state.connected)?;

        match member.name {
            "tempcomp" => {
                state.temp_comp = params.require_bool("TempComp")?;
                debug!(
                    "{} temperature compensation {}",
                    self.info.label(),
                    if state.temp_comp { "on" } else { "off" }
                );
                Ok(())
            },
            other => Err(AlpacaError::property_not_implemented(format!(
                "{other} is not a writable property of Focuser"
            ))),
        }
    }

    async fn invoke_action(
        &self,
        member: &MemberSpec,
        params: &Parameters,
    ) -> Result<Option<Value>> {
        match member.name {
            "move" => {
                let requested = params.require_i64("Position")?;
                self.start_move(requested).await?;
            },
            "halt" => self.halt().await?,
            other => {
                return Err(AlpacaError::not_implemented(format!(
                    "{other} is not implemented by Focuser"
                )))
            },
        }
        Ok(None)
    }
}
