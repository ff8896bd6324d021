//! Device model, drivers, registry and request dispatch

pub mod device;
pub mod dispatcher;
pub mod driver;
pub mod factory;
pub mod registry;

pub use dispatcher::{DeviceRequest, Dispatcher, RequestMethod};
pub use registry::{DeviceRegistry, RegistryError};
