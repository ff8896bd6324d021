//! Request handlers grouped by surface

pub mod device;
pub mod health;
pub mod management;

pub use device::{get_device_member, put_device_member};
pub use health::health_check;
pub use management::{api_versions, configured_devices, server_description};
