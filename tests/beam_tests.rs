mod common;

use common::*;
use cspsim::state::{DevState, ObsMode, ObsState};
use cspsim::*;
use serde_json::json;
use std::time::Duration;
use tokio::time::sleep;

fn channel_block() -> serde_json::Value {
    json!({
        "num_channel_blocks": 1,
        "channel_blocks": [{
            "destination_host": "10.10.0.1",
            "destination_port": 20000,
            "start_pst_channel": 0,
            "num_pst_channels": 12
        }]
    })
}

fn beam() -> SimulatorDevice {
    online_and_on(beam_config().with_channel_block(channel_block()))
}

#[tokio::test(start_paused = true)]
async fn test_beam_starts_idle() {
    let device = SimulatorDevice::new(beam_config());
    let snapshot = device.snapshot();
    assert_eq!(snapshot.obs_state, Some(ObsState::Idle));
    assert_eq!(snapshot.obs_mode, Some(ObsMode::Idle));
    assert_eq!(snapshot.state, DevState::Disable);
}

#[tokio::test(start_paused = true)]
async fn test_configure_publishes_channel_block() {
    let device = beam();
    let mut rx = device.subscribe();

    let (_, status) = run_to_end(&device, Command::Configure(configure_json())).await;
    assert_eq!(status, Some(TaskStatus::Completed));

    let snapshot = device.snapshot();
    assert_eq!(snapshot.obs_state, Some(ObsState::Ready));
    assert_eq!(snapshot.obs_mode, Some(ObsMode::PulsarTiming));
    assert_eq!(
        device.read_attribute(AttributeName::ChannelBlockConfiguration).unwrap(),
        AttributeValue::Text(channel_block().to_string())
    );
    assert_eq!(
        values_of(&drain(&mut rx), AttributeName::ChannelBlockConfiguration),
        vec![AttributeValue::Text(channel_block().to_string())]
    );

    let (_, status) = run_to_end(&device, Command::GoToIdle).await;
    assert_eq!(status, Some(TaskStatus::Completed));
    assert_eq!(device.snapshot().obs_state, Some(ObsState::Idle));
    assert_eq!(device.snapshot().obs_mode, Some(ObsMode::Idle));
    assert_eq!(
        device.read_attribute(AttributeName::ChannelBlockConfiguration).unwrap(),
        AttributeValue::Text("{}".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_beam_scan_cycle() {
    let device = beam();
    run_to_end(&device, Command::Configure(configure_json())).await;

    let scan = device.invoke(Command::Scan(scan_json(7))).unwrap().message;
    assert_eq!(device.snapshot().obs_state, Some(ObsState::Scanning));
    assert_eq!(device.wait_for_command(&scan, WAIT).await, Some(TaskStatus::Completed));

    let (_, status) = run_to_end(&device, Command::EndScan).await;
    assert_eq!(status, Some(TaskStatus::Completed));
    assert_eq!(device.snapshot().obs_state, Some(ObsState::Ready));
}

#[tokio::test(start_paused = true)]
async fn test_abort_scan_then_obs_reset() {
    let device = beam();
    run_to_end(&device, Command::Configure(configure_json())).await;
    let scan = device.invoke(Command::Scan(scan_json(8))).unwrap().message;
    sleep(Duration::from_millis(50)).await;

    let (_, status) = run_to_end(&device, Command::Abort).await;
    assert_eq!(status, Some(TaskStatus::Completed));
    assert_eq!(device.command_status(&scan), Some(TaskStatus::Aborted));
    assert_eq!(device.snapshot().obs_state, Some(ObsState::Aborted));

    let (_, status) = run_to_end(&device, Command::ObsReset).await;
    assert_eq!(status, Some(TaskStatus::Completed));
    assert_eq!(device.snapshot().obs_state, Some(ObsState::Idle));
    assert_eq!(
        device.read_attribute(AttributeName::ChannelBlockConfiguration).unwrap(),
        AttributeValue::Text("{}".to_string())
    );
}

#[tokio::test(start_paused = true)]
async fn test_beam_exposes_no_resource_commands() {
    let device = beam();
    let before = device.snapshot();
    for command in [Command::AssignResources(assign_json()), Command::ReleaseAllResources, Command::Restart] {
        let err = device.invoke(command).unwrap_err();
        assert!(matches!(err, DeviceError::NotAllowed { .. }));
    }
    assert_eq!(device.snapshot(), before);
}

#[tokio::test(start_paused = true)]
async fn test_end_alias_goes_to_idle() {
    let command: Command = serde_json::from_str("\"End\"").unwrap();
    assert_eq!(command.name(), cspsim::state::CommandName::GoToIdle);

    let device = beam();
    run_to_end(&device, Command::Configure(configure_json())).await;
    let (_, status) = run_to_end(&device, command).await;
    assert_eq!(status, Some(TaskStatus::Completed));
    assert_eq!(device.snapshot().obs_state, Some(ObsState::Idle));
}

#[tokio::test(start_paused = true)]
async fn test_beam_obs_fault_during_scan() {
    let device = beam();
    run_to_end(&device, Command::Configure(configure_json())).await;
    let scan = device.invoke(Command::Scan(scan_json(9))).unwrap().message;
    sleep(Duration::from_millis(100)).await;

    device
        .write_attribute(AttributeName::ObsFaulty, AttributeValue::Bool(true))
        .unwrap();
    assert_eq!(device.wait_for_command(&scan, WAIT).await, Some(TaskStatus::Failed));
    assert_eq!(device.snapshot().obs_state, Some(ObsState::Fault));
    assert_eq!(device.fault_stats().obs_faults_triggered, 1);
}
