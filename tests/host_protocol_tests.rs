mod common;

use cspsim::protocol::{Outbound, ProtocolHandler, Response};
use cspsim::*;
use serde_json::{json, Value};

fn host() -> DeviceHost {
    DeviceHost::from_config(&SimulatorConfig::default_deployment())
}

fn send(host: &DeviceHost, handler: &mut ProtocolHandler, request: Value) -> Response {
    host.handle_line(handler, &request.to_string())
}

#[test]
fn test_controller_session_over_ndjson() {
    let host = host();
    let mut handler = ProtocolHandler::new();
    let device = "sim-mid-cbf/control/0";

    let response = send(
        &host,
        &mut handler,
        json!({"id": 1, "device": device, "request": {"WriteAttribute": {"attribute": "adminMode", "value": {"Admin": "ONLINE"}}}}),
    );
    assert_eq!(response.result_code, ResultCode::Ok);

    let response = send(&host, &mut handler, json!({"id": 2, "device": device, "request": {"Command": "On"}}));
    assert_eq!(response.id, 2);
    assert_eq!(response.result_code, ResultCode::Ok);

    let response = send(
        &host,
        &mut handler,
        json!({"id": 3, "device": device, "request": {"ReadAttribute": {"attribute": "state"}}}),
    );
    assert_eq!(response.value, Some(json!({"State": "ON"})));

    let response = send(&host, &mut handler, json!({"id": 4, "device": device, "request": "Snapshot"}));
    let snapshot = response.value.unwrap();
    assert_eq!(snapshot["admin_mode"], "ONLINE");
    assert_eq!(snapshot["state"], "ON");
    assert_eq!(snapshot["obs_state"], Value::Null);
    assert_eq!(handler.get_requests_parsed(), 4);
}

#[test]
fn test_refused_command_reports_not_allowed() {
    let host = host();
    let mut handler = ProtocolHandler::new();

    // Devices start OFFLINE
    let response = send(
        &host,
        &mut handler,
        json!({"id": 7, "device": "sim-mid-cbf/subarray/01", "request": {"Command": "On"}}),
    );
    assert_eq!(response.id, 7);
    assert_eq!(response.result_code, ResultCode::NotAllowed);
    assert_eq!(response.result_code.as_i32(), 6);

    let line = handler.serialize_outbound(&Outbound::Response(response)).unwrap();
    let parsed: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed["result_code"], "NOT_ALLOWED");
    assert!(parsed.get("value").is_none());
}

#[test]
fn test_unparseable_line_rejected_with_id_zero() {
    let host = host();
    let mut handler = ProtocolHandler::new();

    let response = host.handle_line(&mut handler, "{\"id\": 5, \"request\":");
    assert_eq!(response.id, 0);
    assert_eq!(response.result_code, ResultCode::Rejected);

    let response = host.handle_line(&mut handler, r#"{"id": 6, "request": "Snapshot"}"#);
    assert_eq!(response.result_code, ResultCode::Rejected);
    assert_eq!(handler.get_parse_errors(), 2);
}

#[test]
fn test_invalid_argument_reported_as_rejected() {
    let host = host();
    let mut handler = ProtocolHandler::new();
    let response = send(
        &host,
        &mut handler,
        json!({"id": 8, "device": "sim-mid-cbf/control/0", "request": {"Command": {"InitSysParam": "{oops"}}}),
    );
    assert_eq!(response.result_code, ResultCode::Rejected);
}

#[test]
fn test_list_devices() {
    let host = host();
    let mut handler = ProtocolHandler::new();
    let response = send(&host, &mut handler, json!({"id": 9, "request": "ListDevices"}));
    let listing = response.value.unwrap();
    let names: Vec<_> = listing
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["name"].as_str().unwrap().to_string())
        .collect();
    assert!(names.contains(&"sim-pst/beam/01".to_string()));
    assert!(names.contains(&"sim-low-pss/control/0".to_string()));
    assert_eq!(names.len(), 9);
}

#[tokio::test(start_paused = true)]
async fn test_long_running_command_over_ndjson() {
    let host = host();
    let mut handler = ProtocolHandler::new();
    let name = "sim-low-cbf/subarray/01";

    send(
        &host,
        &mut handler,
        json!({"id": 1, "device": name, "request": {"WriteAttribute": {"attribute": "adminMode", "value": {"Admin": "ONLINE"}}}}),
    );
    send(&host, &mut handler, json!({"id": 2, "device": name, "request": {"Command": "On"}}));

    let assign = json!({"subarray_id": 1, "resources": ["SKA001"]}).to_string();
    let response = send(
        &host,
        &mut handler,
        json!({"id": 3, "device": name, "request": {"Command": {"AssignResources": assign}}}),
    );
    assert_eq!(response.result_code, ResultCode::Queued);
    let id = response.message.unwrap();

    let device = host.get(name).unwrap();
    assert_eq!(device.wait_for_command(&id, common::WAIT).await, Some(TaskStatus::Completed));
    assert_eq!(device.snapshot().health_state, cspsim::state::HealthState::Unknown);

    let response = send(
        &host,
        &mut handler,
        json!({"id": 4, "device": name, "request": {"ReadAttribute": {"attribute": "longRunningCommandResult"}}}),
    );
    assert_eq!(response.value, Some(json!({"CommandResult": [id, "OK"]})));
}

#[test]
fn test_change_events_serialize_as_event_lines() {
    let host = host();
    let device = host.get("sim-pst/beam/01").unwrap();
    let mut rx = device.subscribe();
    device
        .write_attribute(AttributeName::SimulationMode, AttributeValue::Bool(false))
        .unwrap();

    let event = rx.try_recv().unwrap();
    let handler = ProtocolHandler::new();
    let line = handler.serialize_outbound(&Outbound::Event { event }).unwrap();
    let parsed: Value = serde_json::from_str(&line).unwrap();
    assert_eq!(parsed["event"]["device"], "sim-pst/beam/01");
    assert_eq!(parsed["event"]["attribute"], "simulationMode");
    assert_eq!(parsed["event"]["value"], json!({"Bool": false}));
}

#[test]
fn test_disabled_command_reports_rejected() {
    let host = host();
    let mut handler = ProtocolHandler::new();
    let device = "sim-low-cbf/control/0";

    send(
        &host,
        &mut handler,
        json!({"id": 1, "device": device, "request": {"WriteAttribute": {"attribute": "adminMode", "value": {"Admin": "ONLINE"}}}}),
    );
    let response = send(&host, &mut handler, json!({"id": 2, "device": device, "request": {"Command": "Off"}}));
    assert_eq!(response.result_code, ResultCode::Rejected);
    assert_eq!(response.result_code.as_i32(), 5);
}
