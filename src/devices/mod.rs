pub mod beam;
pub mod controller;
pub mod subarray;

pub use beam::BeamAttributes;
pub use controller::ControllerAttributes;
pub use subarray::SubarrayAttributes;

use crate::config::DeviceConfig;
use crate::events::{AttributeName, AttributeValue};
use crate::state::{CommandName, ObsState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The three simulated device families. Mid and Low instances of a family
/// differ only in their [`DeviceConfig`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceKind {
    Controller,
    Subarray,
    Beam,
}

impl DeviceKind {
    pub fn commands(self) -> &'static [CommandName] {
        match self {
            DeviceKind::Controller => controller::COMMANDS,
            DeviceKind::Subarray => subarray::COMMANDS,
            DeviceKind::Beam => beam::COMMANDS,
        }
    }

    pub fn exposes(self, command: CommandName) -> bool {
        self.commands().contains(&command)
    }

    pub fn has_obs_state(self) -> bool {
        !matches!(self, DeviceKind::Controller)
    }

    /// Observation state at device start-up, `None` for controllers.
    pub fn initial_obs_state(self) -> Option<ObsState> {
        match self {
            DeviceKind::Controller => None,
            DeviceKind::Subarray => Some(ObsState::Empty),
            DeviceKind::Beam => Some(ObsState::Idle),
        }
    }
}

/// Observation-state edges driven by a long-running command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObsTransition {
    /// Applied synchronously when the command is accepted.
    pub intermediate: Option<ObsState>,
    /// Applied by the worker on successful completion.
    pub terminal: Option<ObsState>,
}

pub fn obs_transition(command: CommandName) -> ObsTransition {
    let (intermediate, terminal) = match command {
        CommandName::AssignResources => (Some(ObsState::Resourcing), Some(ObsState::Idle)),
        CommandName::ReleaseAllResources => (Some(ObsState::Resourcing), Some(ObsState::Empty)),
        CommandName::Configure => (Some(ObsState::Configuring), Some(ObsState::Ready)),
        // A scan keeps running until EndScan
        CommandName::Scan => (Some(ObsState::Scanning), None),
        CommandName::EndScan => (None, Some(ObsState::Ready)),
        CommandName::GoToIdle => (None, Some(ObsState::Idle)),
        CommandName::Abort => (Some(ObsState::Aborting), Some(ObsState::Aborted)),
        CommandName::Restart => (Some(ObsState::Restarting), Some(ObsState::Empty)),
        CommandName::ObsReset => (Some(ObsState::Resetting), Some(ObsState::Idle)),
        _ => (None, None),
    };
    ObsTransition { intermediate, terminal }
}

/// Attribute updates produced by a kind-specific side effect.
pub type AttributeUpdates = Vec<(AttributeName, AttributeValue)>;

/// Kind-specific attributes layered on top of the shared state model.
#[derive(Debug, Clone)]
pub enum KindAttributes {
    Controller(ControllerAttributes),
    Subarray(SubarrayAttributes),
    Beam(BeamAttributes),
}

impl KindAttributes {
    pub fn new(config: &DeviceConfig) -> Self {
        match config.kind {
            DeviceKind::Controller => KindAttributes::Controller(ControllerAttributes::default()),
            DeviceKind::Subarray => KindAttributes::Subarray(SubarrayAttributes::default()),
            DeviceKind::Beam => KindAttributes::Beam(BeamAttributes::new(
                config.channel_block_configuration.clone(),
            )),
        }
    }

    /// Side effects applied when a long-running command is accepted.
    pub fn on_accepted(&mut self, command: CommandName, payload: Option<&Value>) -> AttributeUpdates {
        match self {
            KindAttributes::Controller(_) => Vec::new(),
            KindAttributes::Subarray(attrs) => attrs.on_accepted(command, payload),
            KindAttributes::Beam(attrs) => attrs.on_accepted(command, payload),
        }
    }

    /// Side effects applied when a long-running command completes.
    pub fn on_completed(&mut self, command: CommandName, payload: Option<&Value>) -> AttributeUpdates {
        match self {
            KindAttributes::Controller(_) => Vec::new(),
            KindAttributes::Subarray(attrs) => attrs.on_completed(command, payload),
            KindAttributes::Beam(attrs) => attrs.on_completed(command, payload),
        }
    }

    pub fn read(&self, attribute: AttributeName) -> Option<AttributeValue> {
        match self {
            KindAttributes::Controller(attrs) => attrs.read(attribute),
            KindAttributes::Subarray(attrs) => attrs.read(attribute),
            KindAttributes::Beam(attrs) => attrs.read(attribute),
        }
    }

    pub fn controller_mut(&mut self) -> Option<&mut ControllerAttributes> {
        match self {
            KindAttributes::Controller(attrs) => Some(attrs),
            _ => None,
        }
    }
}

/// Render an optional JSON document the way the attributes expose it.
pub(crate) fn json_text(value: Option<&Value>) -> String {
    value.map_or_else(|| "{}".to_string(), Value::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_kind_exposes_force_state() {
        for kind in [DeviceKind::Controller, DeviceKind::Subarray, DeviceKind::Beam] {
            assert!(kind.exposes(CommandName::ForceState));
            assert!(kind.exposes(CommandName::ForceHealthState));
        }
    }

    #[test]
    fn test_restart_is_subarray_only() {
        assert!(DeviceKind::Subarray.exposes(CommandName::Restart));
        assert!(!DeviceKind::Beam.exposes(CommandName::Restart));
        assert!(DeviceKind::Beam.exposes(CommandName::ObsReset));
    }

    #[test]
    fn test_transitions() {
        let configure = obs_transition(CommandName::Configure);
        assert_eq!(configure.intermediate, Some(ObsState::Configuring));
        assert_eq!(configure.terminal, Some(ObsState::Ready));

        let scan = obs_transition(CommandName::Scan);
        assert_eq!(scan.terminal, None);

        assert_eq!(obs_transition(CommandName::ObsReset).terminal, Some(ObsState::Idle));
        assert_eq!(obs_transition(CommandName::Restart).terminal, Some(ObsState::Empty));
    }
}
