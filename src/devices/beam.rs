use super::{json_text, AttributeUpdates};
use crate::events::{AttributeName, AttributeValue};
use crate::state::CommandName;
use serde_json::Value;

pub const COMMANDS: &[CommandName] = &[
    CommandName::On,
    CommandName::Off,
    CommandName::Configure,
    CommandName::Scan,
    CommandName::EndScan,
    CommandName::GoToIdle,
    CommandName::Abort,
    CommandName::ObsReset,
    CommandName::ForceState,
    CommandName::ForceHealthState,
    CommandName::ForceObsState,
    CommandName::ForceObsMode,
];

/// PST beam attributes. The channel block published after Configure comes
/// from the deployment configuration.
#[derive(Debug, Clone)]
pub struct BeamAttributes {
    channel_block_template: Option<Value>,
    channel_block_configuration: Option<Value>,
    configuration: Option<Value>,
    scan_id: Option<u64>,
}

impl BeamAttributes {
    pub fn new(channel_block_template: Option<Value>) -> Self {
        Self {
            channel_block_template,
            channel_block_configuration: None,
            configuration: None,
            scan_id: None,
        }
    }

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
            CommandName::Configure => {
                self.configuration = payload.cloned();
                self.channel_block_configuration = self.channel_block_template.clone();
                vec![self.configuration_update(), self.channel_block_update()]
            }
            CommandName::EndScan => {
                self.scan_id = None;
                vec![(AttributeName::ScanId, AttributeValue::Integer(None))]
            }
            CommandName::GoToIdle | CommandName::ObsReset => {
                self.configuration = None;
                self.channel_block_configuration = None;
                vec![self.configuration_update(), self.channel_block_update()]
            }
            _ => Vec::new(),
        }
    }

    fn configuration_update(&self) -> (AttributeName, AttributeValue) {
        (
            AttributeName::Configuration,
            AttributeValue::Text(json_text(self.configuration.as_ref())),
        )
    }

    fn channel_block_update(&self) -> (AttributeName, AttributeValue) {
        (
            AttributeName::ChannelBlockConfiguration,
            AttributeValue::Text(json_text(self.channel_block_configuration.as_ref())),
        )
    }

    pub fn read(&self, attribute: AttributeName) -> Option<AttributeValue> {
        match attribute {
            AttributeName::Configuration => Some(self.configuration_update().1),
            AttributeName::ChannelBlockConfiguration => Some(self.channel_block_update().1),
            AttributeName::ScanId => Some(AttributeValue::Integer(self.scan_id)),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_channel_block_published_on_configure() {
        let template = json!({"num_channel_blocks": 1, "channel_blocks": [{"destination_host": "10.10.0.1"}]});
        let mut attrs = BeamAttributes::new(Some(template.clone()));
        assert_eq!(
            attrs.read(AttributeName::ChannelBlockConfiguration),
            Some(AttributeValue::Text("{}".to_string()))
        );

        attrs.on_completed(CommandName::Configure, Some(&json!({"subarray_id": 1})));
        assert_eq!(
            attrs.read(AttributeName::ChannelBlockConfiguration),
            Some(AttributeValue::Text(template.to_string()))
        );

        attrs.on_completed(CommandName::GoToIdle, None);
        assert_eq!(
            attrs.read(AttributeName::ChannelBlockConfiguration),
            Some(AttributeValue::Text("{}".to_string()))
        );
    }
}
