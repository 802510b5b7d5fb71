#![allow(dead_code)]

use cspsim::state::AdminMode;
use cspsim::*;
use serde_json::json;
use std::time::Duration;
use tokio::sync::broadcast;

/// Upper bound for waiting on a long-running command.
pub const WAIT: Duration = Duration::from_secs(5);

pub fn subarray_config() -> DeviceConfig {
    DeviceConfig::new("sim-mid-cbf/subarray/01", DeviceKind::Subarray)
}

pub fn beam_config() -> DeviceConfig {
    DeviceConfig::new("sim-pst/beam/01", DeviceKind::Beam)
}

pub fn controller_config() -> DeviceConfig {
    DeviceConfig::new("sim-mid-cbf/control/0", DeviceKind::Controller)
}

pub fn online(config: DeviceConfig) -> SimulatorDevice {
    let device = SimulatorDevice::new(config);
    device
        .write_attribute(AttributeName::AdminMode, AttributeValue::Admin(AdminMode::Online))
        .unwrap();
    device
}

pub fn online_and_on(config: DeviceConfig) -> SimulatorDevice {
    let device = online(config);
    device.invoke(Command::On).unwrap();
    device
}

/// Invoke a long-running command and wait for its record to finish.
pub async fn run_to_end(device: &SimulatorDevice, command: Command) -> (String, Option<TaskStatus>) {
    let reply = device.invoke(command).unwrap();
    assert_eq!(reply.result_code, ResultCode::Queued);
    let status = device.wait_for_command(&reply.message, WAIT).await;
    (reply.message, status)
}

pub fn drain(rx: &mut broadcast::Receiver<ChangeEvent>) -> Vec<ChangeEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub fn values_of(events: &[ChangeEvent], attribute: AttributeName) -> Vec<AttributeValue> {
    events
        .iter()
        .filter(|e| e.attribute == attribute)
        .map(|e| e.value.clone())
        .collect()
}

pub fn assign_json() -> String {
    json!({"subarray_id": 1, "dish": {"receptor_ids": ["SKA001", "SKA036"]}}).to_string()
}

pub fn configure_json() -> String {
    json!({"subarray_id": 1, "config_id": "sbi-mvp01-20200325-00001-science_A"}).to_string()
}

pub fn scan_json(scan_id: u64) -> String {
    json!({"subarray_id": 1, "scan_id": scan_id}).to_string()
}
