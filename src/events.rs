//! Change events pushed by every device.
//!
//! Each device owns one `tokio::sync::broadcast` channel. Pushes happen while
//! the device lock is held, so subscribers see changes in the order they
//! were applied.

use crate::protocol::ResultCode;
use crate::state::{AdminMode, DevState, HealthState, ObsMode, ObsState};
use crate::tracker::TaskStatus;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tracing::trace;

pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Every attribute a device can publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AttributeName {
    State,
    HealthState,
    AdminMode,
    ObsState,
    ObsMode,
    SimulationMode,
    FaultyInCommand,
    ObsFaulty,
    RaiseException,
    TimeToComplete,
    LongRunningCommandStatus,
    LongRunningCommandResult,
    LongRunningCommandProgress,
    LongRunningCommandsInQueue,
    #[serde(rename = "longRunningCommandIDsInQueue")]
    LongRunningCommandIdsInQueue,
    AssignedResources,
    Configuration,
    ScanId,
    ChannelBlockConfiguration,
    SysParam,
    SourceSysParam,
}

impl AttributeName {
    /// Attributes clients may write. All others are read-only.
    pub fn is_writable(self) -> bool {
        matches!(
            self,
            AttributeName::AdminMode
                | AttributeName::SimulationMode
                | AttributeName::FaultyInCommand
                | AttributeName::ObsFaulty
                | AttributeName::RaiseException
                | AttributeName::TimeToComplete
        )
    }
}

impl core::fmt::Display for AttributeName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        // Same spelling as the wire format
        match serde_json::to_value(self) {
            Ok(serde_json::Value::String(name)) => f.write_str(&name),
            _ => write!(f, "{self:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttributeValue {
    State(DevState),
    Health(HealthState),
    Admin(AdminMode),
    Obs(ObsState),
    Mode(ObsMode),
    Bool(bool),
    Seconds(f64),
    Integer(Option<u64>),
    Text(String),
    CommandStatus(Option<(String, TaskStatus)>),
    CommandResult(Option<(String, ResultCode)>),
    CommandProgress(Option<(String, u8)>),
    Names(Vec<String>),
    Ids(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub device: String,
    pub sequence: u64,
    pub attribute: AttributeName,
    pub value: AttributeValue,
}

/// Broadcast publisher for one device.
#[derive(Debug)]
pub struct EventPublisher {
    device: String,
    sender: broadcast::Sender<ChangeEvent>,
    sequence: AtomicU64,
}

impl EventPublisher {
    pub fn new(device: &str) -> Self {
        let (sender, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            device: device.to_string(),
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Push an event. Always delivered, even when the value is unchanged.
    pub fn push(&self, attribute: AttributeName, value: AttributeValue) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let event = ChangeEvent {
            device: self.device.clone(),
            sequence,
            attribute,
            value,
        };
        // Sending only fails when nobody is subscribed
        if self.sender.send(event).is_err() {
            trace!(device = %self.device, %attribute, "no subscribers for change event");
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChangeEvent> {
        self.sender.subscribe()
    }

    pub fn get_pushed_count(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_without_subscribers() {
        let publisher = EventPublisher::new("sim/test/1");
        publisher.push(AttributeName::State, AttributeValue::State(DevState::On));
        assert_eq!(publisher.get_pushed_count(), 1);
    }

    #[test]
    fn test_subscriber_sees_every_push() {
        let publisher = EventPublisher::new("sim/test/1");
        let mut rx = publisher.subscribe();

        publisher.push(AttributeName::ObsState, AttributeValue::Obs(ObsState::Idle));
        publisher.push(AttributeName::ObsState, AttributeValue::Obs(ObsState::Idle));

        let first = rx.try_recv().unwrap();
        let second = rx.try_recv().unwrap();
        assert_eq!(first.value, second.value);
        assert_eq!(first.sequence + 1, second.sequence);
        assert_eq!(first.device, "sim/test/1");
    }

    #[test]
    fn test_attribute_names_use_camel_case() {
        assert_eq!(AttributeName::LongRunningCommandStatus.to_string(), "longRunningCommandStatus");
        assert_eq!(AttributeName::ObsFaulty.to_string(), "obsFaulty");
        assert_eq!(
            AttributeName::LongRunningCommandIdsInQueue.to_string(),
            "longRunningCommandIDsInQueue"
        );
        let parsed: AttributeName = serde_json::from_str("\"timeToComplete\"").unwrap();
        assert_eq!(parsed, AttributeName::TimeToComplete);
    }

    #[test]
    fn test_writable_subset() {
        assert!(AttributeName::AdminMode.is_writable());
        assert!(AttributeName::ObsFaulty.is_writable());
        assert!(!AttributeName::State.is_writable());
        assert!(!AttributeName::LongRunningCommandStatus.is_writable());
    }
}
