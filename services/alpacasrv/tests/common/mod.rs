//! Common test utilities and helpers

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{header, Method, Request, StatusCode},
    Router,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::Notify;
use tower::util::ServiceExt;

use alpacasrv::{
    api::{create_api_routes, AppState},
    config::ServerConfig,
    core::{
        device::{
            AlpacaDevice, Capability, CapabilitySet, DeviceInfo, DeviceType, Focuser, Telescope,
        },
        driver::{
            AlignmentMode, DriverError, DriverResult, DriverTimeouts, EquatorialCoordinates,
            MountDriver, MountStatus, SimulatedFocuser,
        },
        registry::DeviceRegistry,
    },
};

/// Mount whose slews only finish when the test says so
pub struct GatedMount {
    position: Mutex<EquatorialCoordinates>,
    target: Mutex<Option<EquatorialCoordinates>>,
    release: Notify,
    abort: Notify,
    fail_connect: bool,
}

impl GatedMount {
    pub fn new() -> Self {
        Self {
            position: Mutex::new(EquatorialCoordinates::new(0.0, 0.0)),
            target: Mutex::new(None),
            release: Notify::new(),
            abort: Notify::new(),
            fail_connect: false,
        }
    }

    /// Mount that reports a hardware fault on connect
    pub fn faulty() -> Self {
        Self {
            fail_connect: true,
            ..Self::new()
        }
    }

    /// Move the axes partway without ending the slew
    pub fn move_to(&self, right_ascension: f64, declination: f64) {
        *self.position.lock() = EquatorialCoordinates::new(right_ascension, declination);
    }

    /// Let the pending slew finish
    pub fn release(&self) {
        self.release.notify_one();
    }
}

#[async_trait]
impl MountDriver for GatedMount {
    fn name(&self) -> &str {
        "gated test mount"
    }

    async fn connect(&self) -> DriverResult<MountStatus> {
        if self.fail_connect {
            return Err(DriverError::Fault("serial port vanished".to_string()));
        }
        Ok(MountStatus {
            position: *self.position.lock(),
            tracking: false,
            at_park: false,
            at_home: false,
            alignment_mode: AlignmentMode::GermanPolar,
            equatorial_system: 1,
        })
    }

    async fn disconnect(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn start_slew(&self, target: EquatorialCoordinates) -> DriverResult<()> {
        *self.target.lock() = Some(target);
        Ok(())
    }

    async fn wait_until_stopped(&self) -> DriverResult<EquatorialCoordinates> {
        tokio::select! {
            () = self.release.notified() => {
                let target = self.target.lock().take();
                let mut position = self.position.lock();
                if let Some(target) = target {
                    *position = target;
                }
                Ok(*position)
            },
            () = self.abort.notified() => Err(DriverError::Aborted),
        }
    }

    async fn abort_slew(&self) -> DriverResult<()> {
        self.target.lock().take();
        self.abort.notify_one();
        Ok(())
    }

    async fn position(&self) -> DriverResult<EquatorialCoordinates> {
        Ok(*self.position.lock())
    }

    async fn park(&self) -> DriverResult<EquatorialCoordinates> {
        Ok(*self.position.lock())
    }

    async fn unpark(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn set_tracking(&self, _enabled: bool) -> DriverResult<()> {
        Ok(())
    }

    async fn sync(&self, coordinates: EquatorialCoordinates) -> DriverResult<()> {
        *self.position.lock() = coordinates;
        Ok(())
    }

    async fn find_home(&self) -> DriverResult<EquatorialCoordinates> {
        Ok(*self.position.lock())
    }

    async fn sidereal_time(&self) -> DriverResult<f64> {
        Ok(6.25)
    }
}

/// Mount that accepts slews but never answers motion, abort or clock queries
pub struct HangingMount {
    position: EquatorialCoordinates,
}

impl HangingMount {
    pub fn new() -> Self {
        Self {
            position: EquatorialCoordinates::new(2.0, 15.0),
        }
    }
}

#[async_trait]
impl MountDriver for HangingMount {
    fn name(&self) -> &str {
        "hanging test mount"
    }

    async fn connect(&self) -> DriverResult<MountStatus> {
        Ok(MountStatus {
            position: self.position,
            tracking: false,
            at_park: false,
            at_home: false,
            alignment_mode: AlignmentMode::GermanPolar,
            equatorial_system: 1,
        })
    }

    async fn disconnect(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn start_slew(&self, _target: EquatorialCoordinates) -> DriverResult<()> {
        Ok(())
    }

    async fn wait_until_stopped(&self) -> DriverResult<EquatorialCoordinates> {
        std::future::pending().await
    }

    async fn abort_slew(&self) -> DriverResult<()> {
        std::future::pending().await
    }

    async fn position(&self) -> DriverResult<EquatorialCoordinates> {
        Ok(self.position)
    }

    async fn park(&self) -> DriverResult<EquatorialCoordinates> {
        std::future::pending().await
    }

    async fn unpark(&self) -> DriverResult<()> {
        Ok(())
    }

    async fn set_tracking(&self, _enabled: bool) -> DriverResult<()> {
        Ok(())
    }

    async fn sync(&self, _coordinates: EquatorialCoordinates) -> DriverResult<()> {
        Ok(())
    }

    async fn find_home(&self) -> DriverResult<EquatorialCoordinates> {
        std::future::pending().await
    }

    async fn sidereal_time(&self) -> DriverResult<f64> {
        std::future::pending().await
    }
}

/// Short io and motion bounds for driver-hang tests
pub fn short_timeouts() -> DriverTimeouts {
    DriverTimeouts {
        io: Duration::from_millis(100),
        motion: Duration::from_millis(100),
    }
}

pub fn test_timeouts() -> DriverTimeouts {
    DriverTimeouts {
        io: Duration::from_secs(1),
        motion: Duration::from_secs(10),
    }
}

pub fn test_server_config() -> ServerConfig {
    ServerConfig {
        server_name: "Test Server".to_string(),
        manufacturer: "Test Works".to_string(),
        manufacturer_version: "9.9".to_string(),
        location: "Lab".to_string(),
    }
}

/// Registry with Telescope 0 on `mount`, absolute Focuser 0 and relative
/// Focuser 1
pub fn create_registry_with(
    mount: Arc<dyn MountDriver>,
    timeouts: DriverTimeouts,
) -> Arc<DeviceRegistry> {
    let telescope: Arc<dyn AlpacaDevice> = Arc::new(Telescope::new(
        DeviceInfo::new(DeviceType::Telescope, 0, "Test Mount").with_unique_id("test-mount-0"),
        Telescope::full_capabilities(),
        mount,
        timeouts,
    ));
    let absolute: Arc<dyn AlpacaDevice> = Arc::new(Focuser::new(
        DeviceInfo::new(DeviceType::Focuser, 0, "Test Focuser"),
        CapabilitySet::empty().with(Capability::Absolute),
        Arc::new(SimulatedFocuser::new("sim", 1_000, 1_000.0, None)),
        timeouts,
    ));
    let relative: Arc<dyn AlpacaDevice> = Arc::new(Focuser::new(
        DeviceInfo::new(DeviceType::Focuser, 1, "Relative Focuser"),
        CapabilitySet::empty(),
        Arc::new(SimulatedFocuser::new("sim relative", 1_000, 1_000.0, None)),
        timeouts,
    ));

    let registry = DeviceRegistry::builder()
        .register(telescope)
        .and_then(|b| b.register(absolute))
        .and_then(|b| b.register(relative))
        .unwrap()
        .build();
    Arc::new(registry)
}

pub fn create_test_registry(mount: Arc<GatedMount>) -> Arc<DeviceRegistry> {
    create_registry_with(mount, test_timeouts())
}

/// Router over [`create_registry_with`]
pub fn create_router_with(mount: Arc<dyn MountDriver>, timeouts: DriverTimeouts) -> Router {
    let registry = create_registry_with(mount, timeouts);
    create_api_routes(AppState::new(registry, test_server_config(), "alpacasrv"))
}

/// Create a test router for API testing
pub fn create_test_router(mount: Arc<GatedMount>) -> Router {
    create_router_with(mount, test_timeouts())
}

/// Send a request; PUT bodies are form encoded
pub async fn send(app: &Router, method: Method, uri: &str, form: Option<&str>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match form {
        Some(form) => {
            builder = builder.header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
            Body::from(form.to_string())
        },
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let body = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, body)
}

pub async fn get(app: &Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri, None).await
}

pub async fn put(app: &Router, uri: &str, form: &str) -> (StatusCode, Value) {
    send(app, Method::PUT, uri, Some(form)).await
}

/// Connect Telescope 0 and assert success
pub async fn connect_telescope(app: &Router) {
    let (status, body) = put(app, "/api/v1/telescope/0/connected", "Connected=True").await;
    assert_eq!(status, StatusCode::OK, "{body}");
    assert_eq!(body["ErrorNumber"], 0);
}

/// Poll `Slewing` until it reports false
pub async fn wait_for_slew_end(app: &Router) {
    for _ in 0..200 {
        let (_, body) = get(app, "/api/v1/telescope/0/slewing").await;
        if body["Value"] == Value::Bool(false) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("telescope never stopped slewing");
}
