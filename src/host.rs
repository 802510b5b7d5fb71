//! Registry of hosted devices and dispatch of wire requests to them.

use crate::config::SimulatorConfig;
use crate::device::SimulatorDevice;
use crate::protocol::{ProtocolHandler, Request, RequestKind, Response, ResultCode};
use serde::Serialize;
use serde_json::json;
use std::collections::BTreeMap;
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct DeviceHost {
    devices: BTreeMap<String, SimulatorDevice>,
}

impl DeviceHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &SimulatorConfig) -> Self {
        let mut host = Self::new();
        for device in &config.devices {
            host.add(SimulatorDevice::new(device.clone()));
        }
        host
    }

    /// Register a device, replacing any previous device of the same name.
    pub fn add(&mut self, device: SimulatorDevice) {
        if self.devices.insert(device.name().to_string(), device).is_some() {
            warn!("replaced an already hosted device");
        }
    }

    pub fn get(&self, name: &str) -> Option<&SimulatorDevice> {
        self.devices.get(name)
    }

    pub fn devices(&self) -> impl Iterator<Item = &SimulatorDevice> {
        self.devices.values()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Parse one input line and dispatch it. Parse failures are answered
    /// with `REJECTED` and request id 0.
    pub fn handle_line(&self, handler: &mut ProtocolHandler, line: &str) -> Response {
        match handler.parse_request(line) {
            Ok(request) => self.dispatch(&request),
            Err(e) => {
                warn!(error = %e, "unparseable request");
                Response::error(0, ResultCode::Rejected, e.to_string())
            }
        }
    }

    pub fn dispatch(&self, request: &Request) -> Response {
        let id = request.id;
        if let RequestKind::ListDevices = request.request {
            return self.list_devices(id);
        }

        let Some(name) = request.device.as_deref() else {
            return Response::error(id, ResultCode::Rejected, "request needs a target device");
        };
        let Some(device) = self.get(name) else {
            return Response::error(id, ResultCode::Rejected, format!("unknown device {name}"));
        };
        debug!(device = %name, request = ?request.request, "dispatching request");

        match &request.request {
            RequestKind::Command(command) => match device.invoke(command.clone()) {
                Ok(reply) => Response::reply(id, reply),
                Err(e) => Response::error(id, e.result_code(), e.to_string()),
            },
            RequestKind::ReadAttribute { attribute } => match device.read_attribute(*attribute) {
                Ok(value) => value_response(id, &value),
                Err(e) => Response::error(id, e.result_code(), e.to_string()),
            },
            RequestKind::WriteAttribute { attribute, value } => {
                match device.write_attribute(*attribute, value.clone()) {
                    Ok(()) => Response::ok(id, format!("{attribute} written")),
                    Err(e) => Response::error(id, e.result_code(), e.to_string()),
                }
            }
            RequestKind::Snapshot => value_response(id, &device.snapshot()),
            RequestKind::Subscribe => Response::ok(id, format!("subscribed to {name}")),
            RequestKind::ListDevices => self.list_devices(id),
        }
    }

    fn list_devices(&self, id: u32) -> Response {
        let listing: Vec<_> = self
            .devices()
            .map(|d| json!({"name": d.name(), "kind": d.kind()}))
            .collect();
        Response::value(id, json!(listing))
    }
}

fn value_response<T: Serialize>(id: u32, value: &T) -> Response {
    match serde_json::to_value(value) {
        Ok(value) => Response::value(id, value),
        Err(e) => Response::error(id, ResultCode::Failed, e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_host_lists_all_devices() {
        let host = DeviceHost::from_config(&SimulatorConfig::default_deployment());
        assert_eq!(host.len(), 9);

        let response = host.dispatch(&Request {
            id: 1,
            device: None,
            request: RequestKind::ListDevices,
        });
        assert_eq!(response.result_code, ResultCode::Ok);
        let listed = response.value.unwrap();
        assert_eq!(listed.as_array().map(Vec::len), Some(9));
    }

    #[test]
    fn test_unknown_device_rejected() {
        let host = DeviceHost::new();
        let response = host.dispatch(&Request {
            id: 2,
            device: Some("nope".to_string()),
            request: RequestKind::Snapshot,
        });
        assert_eq!(response.result_code, ResultCode::Rejected);
    }
}
