//! Request dispatcher
//!
//! Turns a decoded `/api/v{N}/{type}/{number}/{member}` request into a
//! device call and wraps the outcome in the transaction envelope.
//!
//! Validation order: API version, device number, device type, registry
//! lookup, then member resolution inside the device.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error};

use super::device::DeviceType;
use super::registry::DeviceRegistry;
use crate::api::envelope::{ClientTransaction, EnvelopeReply, TransactionCounter};
use crate::api::params::Parameters;
use crate::error::{AlpacaError, Result};

/// Only Alpaca API version served
pub const SUPPORTED_API_VERSION: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestMethod {
    Get,
    Put,
}

impl RequestMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestMethod::Get => "GET",
            RequestMethod::Put => "PUT",
        }
    }
}

/// Raw path segments plus the merged parameter bag
#[derive(Debug, Clone)]
pub struct DeviceRequest {
    pub method: RequestMethod,
    pub api_version: String,
    pub device_type: String,
    pub device_number: String,
    pub member: String,
    pub params: Parameters,
}

/// Parse `v1` (any case); any other version is `InvalidValue`
pub fn parse_api_version(segment: &str) -> Result<u32> {
    let version = segment
        .strip_prefix('v')
        .or_else(|| segment.strip_prefix('V'))
        .and_then(|digits| digits.parse::<u32>().ok());

    match version {
        Some(SUPPORTED_API_VERSION) => Ok(SUPPORTED_API_VERSION),
        _ => Err(AlpacaError::invalid_value(format!(
            "Unsupported API version '{segment}'"
        ))),
    }
}

pub fn parse_device_number(segment: &str) -> Result<u32> {
    segment.parse::<u32>().map_err(|_| {
        AlpacaError::invalid_value(format!(
            "Device number '{segment}' is not a non-negative integer"
        ))
    })
}

pub struct Dispatcher {
    registry: Arc<DeviceRegistry>,
    counter: Arc<TransactionCounter>,
}

impl Dispatcher {
    pub fn new(registry: Arc<DeviceRegistry>, counter: Arc<TransactionCounter>) -> Self {
        Self { registry, counter }
    }

    pub fn counter(&self) -> &Arc<TransactionCounter> {
        &self.counter
    }

    /// Route the request to its device
    pub async fn dispatch(&self, request: &DeviceRequest) -> Result<Option<Value>> {
        parse_api_version(&request.api_version)?;
        let device_number = parse_device_number(&request.device_number)?;
        let device_type: DeviceType = request.device_type.parse()?;
        let device = self.registry.resolve(device_type, device_number)?;

        match request.method {
            RequestMethod::Get => device.get_property(&request.member).await.map(Some),
            RequestMethod::Put => device.put_member(&request.member, &request.params).await,
        }
    }

    /// Dispatch and build the enveloped reply
    pub async fn handle(&self, request: DeviceRequest) -> EnvelopeReply {
        let client = ClientTransaction::from_params(&request.params);
        let result = self.dispatch(&request).await;

        if let Err(err) = &result {
            if err.is_internal() {
                error!(
                    "{} {}/{}/{} failed [{}]: {}",
                    request.method.as_str(),
                    request.device_type,
                    request.device_number,
                    request.member,
                    err.error_code(),
                    err
                );
            } else {
                debug!(
                    "{} {}/{}/{} rejected [{}]: {}",
                    request.method.as_str(),
                    request.device_type,
                    request.device_number,
                    request.member,
                    err.error_code(),
                    err
                );
            }
        }

        EnvelopeReply::from_result(result, &client, &self.counter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::core::factory::build_registry;
    use crate::core::device::{AlpacaDevice, CapabilitySet, MemberSpec};
    use crate::error::codes;
    use axum::http::StatusCode;
    use tracing_test::traced_test;

    fn dispatcher() -> Dispatcher {
        let registry = build_registry(&AppConfig::default().devices).unwrap();
        Dispatcher::new(Arc::new(registry), Arc::new(TransactionCounter::new()))
    }

    fn request(method: RequestMethod, path: [&str; 4], params: Parameters) -> DeviceRequest {
        DeviceRequest {
            method,
            api_version: path[0].to_string(),
            device_type: path[1].to_string(),
            device_number: path[2].to_string(),
            member: path[3].to_string(),
            params,
        }
    }

    #[test]
    fn test_parse_api_version() {
        assert_eq!(parse_api_version("v1").unwrap(), 1);
        assert_eq!(parse_api_version("V1").unwrap(), 1);
        for bad in ["v2", "1", "v", "vx", ""] {
            assert!(matches!(
                parse_api_version(bad),
                Err(AlpacaError::InvalidValue(_))
            ));
        }
    }

    #[test]
    fn test_parse_device_number() {
        assert_eq!(parse_device_number("0").unwrap(), 0);
        assert_eq!(parse_device_number("12").unwrap(), 12);
        for bad in ["-1", "abc", "1.5", ""] {
            assert!(parse_device_number(bad).is_err(), "{bad}");
        }
    }

    #[tokio::test]
    async fn test_device_number_checked_before_type() {
        let dispatcher = dispatcher();
        let reply = dispatcher
            .handle(request(
                RequestMethod::Get,
                ["v1", "toaster", "-1", "name"],
                Parameters::new(),
            ))
            .await;

        assert_eq!(reply.status, StatusCode::BAD_REQUEST);
        assert_eq!(reply.body.error_number, codes::INVALID_VALUE);
    }

    #[tokio::test]
    async fn test_unknown_type_and_unconfigured_device() {
        let dispatcher = dispatcher();
        for path in [
            ["v1", "toaster", "0", "name"],
            ["v1", "camera", "0", "name"],
            ["v1", "telescope", "7", "name"],
        ] {
            let reply = dispatcher
                .handle(request(RequestMethod::Get, path, Parameters::new()))
                .await;
            assert_eq!(reply.status, StatusCode::NOT_FOUND, "{path:?}");
            assert_eq!(reply.body.error_number, codes::DEVICE_NOT_FOUND);
        }
    }

    #[tokio::test]
    async fn test_echo_and_increasing_server_ids() {
        let dispatcher = dispatcher();
        let params = Parameters::from_pairs([("ClientID", "4"), ("ClientTransactionID", "77")]);

        let first = dispatcher
            .handle(request(
                RequestMethod::Get,
                ["v1", "Telescope", "0", "Name"],
                params.clone(),
            ))
            .await;
        let second = dispatcher
            .handle(request(
                RequestMethod::Get,
                ["v1", "telescope", "0", "connected"],
                params,
            ))
            .await;

        assert_eq!(first.body.client_transaction_id, 77);
        assert_eq!(first.body.value, Some(Value::from("Simulated Mount")));
        assert_eq!(second.body.value, Some(Value::Bool(false)));
        assert!(second.body.server_transaction_id > first.body.server_transaction_id);
    }

    #[tokio::test]
    async fn test_put_connected_requires_bool() {
        let dispatcher = dispatcher();
        let reply = dispatcher
            .handle(request(
                RequestMethod::Put,
                ["v1", "telescope", "0", "connected"],
                Parameters::from_pairs([("Connected", "maybe")]),
            ))
            .await;
        assert_eq!(reply.body.error_number, codes::INVALID_VALUE);

        let reply = dispatcher
            .handle(request(
                RequestMethod::Put,
                ["v1", "telescope", "0", "connected"],
                Parameters::from_pairs([("connected", "TRUE")]),
            ))
            .await;
        assert!(reply.body.is_success());
        assert!(reply.body.value.is_none());
    }

    /// Device whose only sensor always fails
    struct BrokenSensor {
        info: crate::core::device::DeviceInfo,
    }

    static BROKEN_MEMBERS: &[MemberSpec] = &[MemberSpec::read_only("temperature")];

    #[async_trait::async_trait]
    impl AlpacaDevice for BrokenSensor {
        fn info(&self) -> &crate::core::device::DeviceInfo {
            &self.info
        }

        fn members(&self) -> &'static [MemberSpec] {
            BROKEN_MEMBERS
        }

        fn capabilities(&self) -> CapabilitySet {
            CapabilitySet::empty()
        }

        async fn is_connected(&self) -> bool {
            true
        }

        async fn connect(&self, _connected: bool) -> Result<()> {
            Ok(())
        }

        async fn read_property(&self, _member: &MemberSpec) -> Result<Value> {
            Err(AlpacaError::internal("sensor bus fault"))
        }

        async fn set_property(&self, _member: &MemberSpec, _params: &Parameters) -> Result<()> {
            Ok(())
        }

        async fn invoke_action(
            &self,
            _member: &MemberSpec,
            _params: &Parameters,
        ) -> Result<Option<Value>> {
            Ok(None)
        }
    }

    #[tokio::test]
    #[traced_test]
    async fn test_internal_errors_are_logged() {
        let device: Arc<dyn AlpacaDevice> = Arc::new(BrokenSensor {
            info: crate::core::device::DeviceInfo::new(
                DeviceType::ObservingConditions,
                0,
                "Weather",
            ),
        });
        let registry = DeviceRegistry::builder().register(device).unwrap().build();
        let dispatcher = Dispatcher::new(Arc::new(registry), Arc::new(TransactionCounter::new()));

        let reply = dispatcher
            .handle(request(
                RequestMethod::Get,
                ["v1", "observingconditions", "0", "temperature"],
                Parameters::new(),
            ))
            .await;

        assert_eq!(reply.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(reply.body.error_number, codes::UNSPECIFIED);
        assert!(logs_contain("ALPACA_INTERNAL_ERROR"));
        assert!(logs_contain("sensor bus fault"));
    }
}
