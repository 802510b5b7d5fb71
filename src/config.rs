//! Deployment configuration.
//!
//! A JSON file lists the devices to host. Mid and Low instances of the same
//! kind differ only in the values held here.

use crate::devices::DeviceKind;
use crate::fault_injection::{FaultPolicy, DEFAULT_TIME_TO_COMPLETE_S};
use crate::state::{CommandName, DevState, HealthState};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Fixed latency of Abort and EndScan.
pub const DEFAULT_TRANSITION_LATENCY_MS: u64 = 200;
/// How often a running worker looks at fault flags and supersession.
pub const WORKER_POLL_INTERVAL_MS: u64 = 50;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("device {0} is declared more than once")]
    DuplicateDevice(String),
    #[error("device {device}: {reason}")]
    InvalidDevice { device: String, reason: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub name: String,
    pub kind: DeviceKind,
    #[serde(default = "default_health")]
    pub initial_health: HealthState,
    /// State entered when the device goes from a non-accepting admin mode
    /// to an accepting one.
    #[serde(default = "default_online_state")]
    pub online_state: DevState,
    #[serde(default = "default_time_to_complete")]
    pub time_to_complete_s: f64,
    #[serde(default = "default_transition_latency")]
    pub transition_latency_ms: u64,
    /// Commands this instance refuses even though its kind exposes them.
    #[serde(default)]
    pub disabled_commands: Vec<CommandName>,
    #[serde(default)]
    pub fault_policy: FaultPolicy,
    /// Published by a beam as channelBlockConfiguration after Configure.
    #[serde(default)]
    pub channel_block_configuration: Option<Value>,
}

fn default_health() -> HealthState {
    HealthState::Ok
}

fn default_online_state() -> DevState {
    DevState::Off
}

fn default_time_to_complete() -> f64 {
    DEFAULT_TIME_TO_COMPLETE_S
}

fn default_transition_latency() -> u64 {
    DEFAULT_TRANSITION_LATENCY_MS
}

impl DeviceConfig {
    pub fn new(name: &str, kind: DeviceKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            initial_health: default_health(),
            online_state: default_online_state(),
            time_to_complete_s: default_time_to_complete(),
            transition_latency_ms: default_transition_latency(),
            disabled_commands: Vec::new(),
            fault_policy: FaultPolicy::default(),
            channel_block_configuration: None,
        }
    }

    pub fn with_initial_health(mut self, health: HealthState) -> Self {
        self.initial_health = health;
        self
    }

    pub fn with_online_state(mut self, state: DevState) -> Self {
        self.online_state = state;
        self
    }

    pub fn with_disabled_commands(mut self, commands: &[CommandName]) -> Self {
        self.disabled_commands = commands.to_vec();
        self
    }

    pub fn with_time_to_complete(mut self, seconds: f64) -> Self {
        self.time_to_complete_s = seconds;
        self
    }

    pub fn with_fault_policy(mut self, policy: FaultPolicy) -> Self {
        self.fault_policy = policy;
        self
    }

    pub fn with_channel_block(mut self, channel_block: Value) -> Self {
        self.channel_block_configuration = Some(channel_block);
        self
    }

    pub fn transition_latency(&self) -> Duration {
        Duration::from_millis(self.transition_latency_ms)
    }

    pub fn is_disabled(&self, command: CommandName) -> bool {
        self.disabled_commands.contains(&command)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidDevice {
            device: self.name.clone(),
            reason,
        };
        if self.name.trim().is_empty() {
            return Err(invalid("empty device name".to_string()));
        }
        if Duration::try_from_secs_f64(self.time_to_complete_s).is_err() {
            return Err(invalid(format!(
                "time_to_complete_s must be a non-negative duration, got {}",
                self.time_to_complete_s
            )));
        }
        if !matches!(self.online_state, DevState::On | DevState::Off | DevState::Standby) {
            return Err(invalid(format!("online_state must be ON, OFF or STANDBY, got {:?}", self.online_state)));
        }
        if let Some(command) = self.disabled_commands.iter().find(|c| !self.kind.exposes(**c)) {
            return Err(invalid(format!("{command} is not a {:?} command", self.kind)));
        }
        if self.channel_block_configuration.is_some() && self.kind != DeviceKind::Beam {
            return Err(invalid("only beams publish a channel block".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    pub devices: Vec<DeviceConfig>,
}

impl SimulatorConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut names = HashSet::new();
        for device in &self.devices {
            device.validate()?;
            if !names.insert(device.name.as_str()) {
                return Err(ConfigError::DuplicateDevice(device.name.clone()));
            }
        }
        Ok(())
    }

    /// Mid and Low CBF/PSS controllers and subarrays plus one PST beam.
    pub fn default_deployment() -> Self {
        let devices = vec![
            DeviceConfig::new("sim-mid-cbf/control/0", DeviceKind::Controller),
            DeviceConfig::new("sim-mid-cbf/subarray/01", DeviceKind::Subarray),
            DeviceConfig::new("sim-mid-pss/control/0", DeviceKind::Controller),
            DeviceConfig::new("sim-mid-pss/subarray/01", DeviceKind::Subarray),
            // The Low CBF controller has no hardware to power: it comes up ON
            // and refuses the power commands
            DeviceConfig::new("sim-low-cbf/control/0", DeviceKind::Controller)
                .with_initial_health(HealthState::Unknown)
                .with_online_state(DevState::On)
                .with_disabled_commands(&[CommandName::On, CommandName::Off, CommandName::Standby]),
            DeviceConfig::new("sim-low-cbf/subarray/01", DeviceKind::Subarray)
                .with_initial_health(HealthState::Unknown)
                .with_online_state(DevState::On),
            DeviceConfig::new("sim-low-pss/control/0", DeviceKind::Controller),
            DeviceConfig::new("sim-low-pss/subarray/01", DeviceKind::Subarray),
            DeviceConfig::new("sim-pst/beam/01", DeviceKind::Beam)
                .with_channel_block(default_channel_block()),
        ];
        Self { devices }
    }
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self::default_deployment()
    }
}

fn default_channel_block() -> Value {
    json!({
        "num_channel_blocks": 2,
        "channel_blocks": [
            {
                "destination_host": "10.10.0.1",
                "destination_port": 20000,
                "destination_mac": "02:00:00:00:00:01",
                "start_pst_channel": 0,
                "num_pst_channels": 12
            },
            {
                "destination_host": "10.10.0.1",
                "destination_port": 20001,
                "destination_mac": "02:00:00:00:00:01",
                "start_pst_channel": 12,
                "num_pst_channels": 10
            }
        ]
    })
}
