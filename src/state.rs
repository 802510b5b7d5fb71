//! Device state enumerations and the per-kind command legality tables.
//!
//! Everything in this module is pure: the engine takes a snapshot of the
//! device, asks [`check_allowed`] whether a command may run, and only then
//! mutates anything.

use crate::devices::DeviceKind;
use serde::{Deserialize, Serialize};

/// Administrative mode. Numbering follows the SKA control model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdminMode {
    Online = 0,
    Offline = 1,
    Engineering = 2,
    NotFitted = 3,
    Reserved = 4,
    Maintenance = 5,
}

impl AdminMode {
    /// Whether the device processes non-forced commands in this mode.
    pub fn accepts_commands(self) -> bool {
        matches!(
            self,
            AdminMode::Online | AdminMode::Engineering | AdminMode::Maintenance
        )
    }
}

/// Coarse operational state, mirroring the Tango `DevState` set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DevState {
    On,
    Off,
    Close,
    Open,
    Insert,
    Extract,
    Moving,
    Standby,
    Fault,
    Init,
    Running,
    Alarm,
    Disable,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthState {
    Ok,
    Degraded,
    Failed,
    Unknown,
}

/// Observation state of subarrays and beams.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObsState {
    Empty,
    Resourcing,
    Idle,
    Configuring,
    Ready,
    Scanning,
    Aborting,
    Aborted,
    Resetting,
    Fault,
    Restarting,
}

/// Kind of observation configured on a subarray or beam.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ObsMode {
    Idle,
    Imaging,
    PulsarSearch,
    PulsarTiming,
    DynamicSpectrum,
    TransientSearch,
    Vlbi,
    Calibration,
    FlowThrough,
    VoltageRecorder,
}

/// Payload-free command identifiers used by the legality tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandName {
    On,
    Off,
    Standby,
    InitSysParam,
    AssignResources,
    ReleaseAllResources,
    Configure,
    Scan,
    EndScan,
    GoToIdle,
    Abort,
    Restart,
    ObsReset,
    ForceState,
    ForceHealthState,
    ForceObsState,
    ForceObsMode,
}

impl CommandName {
    /// Forced overrides skip admin-mode, legality and fault checks.
    pub fn is_forced_override(self) -> bool {
        matches!(
            self,
            CommandName::ForceState
                | CommandName::ForceHealthState
                | CommandName::ForceObsState
                | CommandName::ForceObsMode
        )
    }

    /// Commands that drive the observation state machine.
    pub fn is_observing(self) -> bool {
        matches!(
            self,
            CommandName::AssignResources
                | CommandName::ReleaseAllResources
                | CommandName::Configure
                | CommandName::Scan
                | CommandName::EndScan
                | CommandName::GoToIdle
                | CommandName::Abort
                | CommandName::Restart
                | CommandName::ObsReset
        )
    }

    /// Commands that may be issued while another long-running command is
    /// still executing.
    pub fn preempts_in_flight(self) -> bool {
        matches!(self, CommandName::Abort | CommandName::EndScan)
    }

    /// Lower-case name embedded in long-running command ids.
    pub fn as_str(self) -> &'static str {
        match self {
            CommandName::On => "on",
            CommandName::Off => "off",
            CommandName::Standby => "standby",
            CommandName::InitSysParam => "initsysparam",
            CommandName::AssignResources => "assign",
            CommandName::ReleaseAllResources => "releaseall",
            CommandName::Configure => "configure",
            CommandName::Scan => "scan",
            CommandName::EndScan => "endscan",
            CommandName::GoToIdle => "end",
            CommandName::Abort => "abort",
            CommandName::Restart => "restart",
            CommandName::ObsReset => "obsreset",
            CommandName::ForceState => "forcestate",
            CommandName::ForceHealthState => "forcehealthstate",
            CommandName::ForceObsState => "forceobsstate",
            CommandName::ForceObsMode => "forceobsmode",
        }
    }
}

impl core::fmt::Display for CommandName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Why a command was refused by the state model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    NotExposed(DeviceKind),
    WrongState(DevState),
    WrongObsState(ObsState),
    NoObsState,
}

impl core::fmt::Display for Rejection {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Rejection::NotExposed(kind) => write!(f, "command not exposed by {kind:?} devices"),
            Rejection::WrongState(state) => write!(f, "not permitted in state {state:?}"),
            Rejection::WrongObsState(obs) => write!(f, "not permitted in observation state {obs:?}"),
            Rejection::NoObsState => write!(f, "device has no observation state"),
        }
    }
}

/// States from which each operational command may run.
fn allowed_states(command: CommandName) -> &'static [DevState] {
    match command {
        CommandName::On | CommandName::InitSysParam => &[
            DevState::Off,
            DevState::Standby,
            DevState::On,
            DevState::Unknown,
        ],
        CommandName::Off => &[
            DevState::On,
            DevState::Off,
            DevState::Standby,
            DevState::Fault,
            DevState::Unknown,
        ],
        CommandName::Standby => &[DevState::On, DevState::Off, DevState::Standby],
        // Every observing command needs the device switched on
        _ => &[DevState::On],
    }
}

/// Observation states from which each observing command may run.
fn allowed_obs_states(command: CommandName) -> &'static [ObsState] {
    match command {
        CommandName::AssignResources => &[ObsState::Empty, ObsState::Idle],
        CommandName::ReleaseAllResources => &[ObsState::Idle],
        CommandName::Configure => &[ObsState::Idle, ObsState::Ready],
        CommandName::Scan | CommandName::GoToIdle => &[ObsState::Ready],
        CommandName::EndScan => &[ObsState::Scanning],
        CommandName::Abort => &[
            ObsState::Resourcing,
            ObsState::Idle,
            ObsState::Configuring,
            ObsState::Ready,
            ObsState::Scanning,
        ],
        CommandName::Restart | CommandName::ObsReset => &[ObsState::Aborted, ObsState::Fault],
        _ => &[],
    }
}

/// Check `command` against the legality table of `kind`.
///
/// Forced overrides are always allowed when the kind exposes them.
pub fn check_allowed(
    kind: DeviceKind,
    state: DevState,
    obs_state: Option<ObsState>,
    command: CommandName,
) -> Result<(), Rejection> {
    if !kind.exposes(command) {
        return Err(Rejection::NotExposed(kind));
    }
    if command.is_forced_override() {
        return Ok(());
    }
    if !allowed_states(command).contains(&state) {
        return Err(Rejection::WrongState(state));
    }
    if command.is_observing() {
        let obs = obs_state.ok_or(Rejection::NoObsState)?;
        if !allowed_obs_states(command).contains(&obs) {
            return Err(Rejection::WrongObsState(obs));
        }
    }
    Ok(())
}

/// Boolean form of [`check_allowed`].
pub fn is_allowed(
    kind: DeviceKind,
    state: DevState,
    obs_state: Option<ObsState>,
    command: CommandName,
) -> bool {
    check_allowed(kind, state, obs_state, command).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_configure_only_from_idle_or_ready() {
        for obs in [ObsState::Idle, ObsState::Ready] {
            assert!(is_allowed(DeviceKind::Subarray, DevState::On, Some(obs), CommandName::Configure));
        }
        for obs in [ObsState::Empty, ObsState::Scanning, ObsState::Fault, ObsState::Aborted] {
            assert!(!is_allowed(DeviceKind::Subarray, DevState::On, Some(obs), CommandName::Configure));
        }
    }

    #[test]
    fn test_observing_commands_need_on() {
        let result = check_allowed(
            DeviceKind::Subarray,
            DevState::Off,
            Some(ObsState::Ready),
            CommandName::Scan,
        );
        assert_eq!(result, Err(Rejection::WrongState(DevState::Off)));
    }

    #[test]
    fn test_abort_table() {
        for obs in [ObsState::Idle, ObsState::Ready, ObsState::Scanning, ObsState::Configuring] {
            assert!(is_allowed(DeviceKind::Beam, DevState::On, Some(obs), CommandName::Abort));
        }
        for obs in [ObsState::Empty, ObsState::Aborted, ObsState::Fault, ObsState::Aborting] {
            assert!(!is_allowed(DeviceKind::Subarray, DevState::On, Some(obs), CommandName::Abort));
        }
    }

    #[test]
    fn test_forced_overrides_ignore_state() {
        assert!(is_allowed(DeviceKind::Subarray, DevState::Init, Some(ObsState::Fault), CommandName::ForceObsState));
        assert!(is_allowed(DeviceKind::Controller, DevState::Disable, None, CommandName::ForceState));
    }

    #[test]
    fn test_controller_has_no_observing_commands() {
        let result = check_allowed(DeviceKind::Controller, DevState::On, None, CommandName::Configure);
        assert_eq!(result, Err(Rejection::NotExposed(DeviceKind::Controller)));
        assert!(!is_allowed(DeviceKind::Controller, DevState::On, None, CommandName::ForceObsState));
    }

    #[test]
    fn test_on_refused_from_init_and_fault() {
        assert!(!is_allowed(DeviceKind::Controller, DevState::Init, None, CommandName::On));
        assert!(!is_allowed(DeviceKind::Controller, DevState::Fault, None, CommandName::On));
        assert!(is_allowed(DeviceKind::Controller, DevState::Fault, None, CommandName::Off));
    }
}
