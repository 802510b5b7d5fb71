use super::{json_text, AttributeUpdates};
use crate::events::{AttributeName, AttributeValue};
use crate::state::CommandName;
use serde_json::Value;

pub const COMMANDS: &[CommandName] = &[
    CommandName::On,
    CommandName::Off,
    CommandName::AssignResources,
    CommandName::ReleaseAllResources,
    CommandName::Configure,
    CommandName::Scan,
    CommandName::EndScan,
    CommandName::GoToIdle,
    CommandName::Abort,
    CommandName::Restart,
    CommandName::ObsReset,
    CommandName::ForceState,
    CommandName::ForceHealthState,
    CommandName::ForceObsState,
    CommandName::ForceObsMode,
];

#[derive(Debug, Clone, Default)]
pub struct SubarrayAttributes {
    assigned_resources: Option<Value>,
    configuration: Option<Value>,
    scan_id: Option<u64>,
}

impl SubarrayAttributes {
    pub fn on_accepted(&mut self, command: CommandName, payload: Option<&Value>) -> AttributeUpdates {
        match command {
            CommandName::Scan => {
                self.scan_id = payload.and_then(|p| p.get("scan_id")).and_then(Value::as_u64);
                vec![(AttributeName::ScanId, AttributeValue::Integer(self.scan_id))]
            }
            _ => Vec::new(),
        }
    }

    pub fn on_completed(&mut self, command: CommandName, payload: Option<&Value>) -> AttributeUpdates {
        match command {
            CommandName::AssignResources => {
                self.assigned_resources = payload.cloned();
                vec![self.resources_update()]
            }
            CommandName::ReleaseAllResources => {
                self.assigned_resources = None;
                vec![self.resources_update()]
            }
            CommandName::Configure => {
                self.configuration = payload.cloned();
                vec![self.configuration_update()]
            }
            CommandName::EndScan => {
                self.scan_id = None;
                vec![(AttributeName::ScanId, AttributeValue::Integer(None))]
            }
            CommandName::GoToIdle | CommandName::ObsReset => {
                self.configuration = None;
                vec![self.configuration_update()]
            }
            CommandName::Restart => {
                self.assigned_resources = None;
                self.configuration = None;
                self.scan_id = None;
                vec![
                    self.resources_update(),
                    self.configuration_update(),
                    (AttributeName::ScanId, AttributeValue::Integer(None)),
                ]
            }
            _ => Vec::new(),
        }
    }

    fn resources_update(&self) -> (AttributeName, AttributeValue) {
        (
            AttributeName::AssignedResources,
            AttributeValue::Text(json_text(self.assigned_resources.as_ref())),
        )
    }

    fn configuration_update(&self) -> (AttributeName, AttributeValue) {
        (
            AttributeName::Configuration,
            AttributeValue::Text(json_text(self.configuration.as_ref())),
        )
    }

    pub fn read(&self, attribute: AttributeName) -> Option<AttributeValue> {
        match attribute {
            AttributeName::AssignedResources => Some(self.resources_update().1),
            AttributeName::Configuration => Some(self.configuration_update().1),
            AttributeName::ScanId => Some(AttributeValue::Integer(self.scan_id)),
            _ => None,
        }
    }
}
