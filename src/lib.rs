//! # CSP Device Simulators
//!
//! Lightweight stand-ins for the CSP sub-system devices of a radio telescope:
//! controllers, subarrays and PST beams. Each simulator exposes the same
//! command surface as the real device, with operator-controlled fault
//! injection on top, so that control software can be tested without the
//! hardware.
//!
//! ## Quick Start
//!
//! ```rust
//! use cspsim::{AttributeName, AttributeValue, Command, DeviceConfig, DeviceKind, SimulatorDevice};
//! use cspsim::state::{AdminMode, DevState};
//!
//! let device = SimulatorDevice::new(DeviceConfig::new("sim-mid-cbf/control/0", DeviceKind::Controller));
//! device
//!     .write_attribute(AttributeName::AdminMode, AttributeValue::Admin(AdminMode::Online))
//!     .unwrap();
//! device.invoke(Command::On).unwrap();
//! assert_eq!(device.snapshot().state, DevState::On);
//! ```
//!
//! ## Architecture
//!
//! - [`state`] - state enumerations and command legality tables
//! - [`devices`] - controller, subarray and beam descriptors
//! - [`device`] - command execution engine
//! - [`tracker`] - long-running command records
//! - [`fault_injection`] - fault flags and policy
//! - [`events`] - change event publishing
//! - [`protocol`] - commands, result codes and the NDJSON wire format
//! - [`config`] - deployment configuration
//! - [`host`] - device registry and request dispatch

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::cast_possible_truncation)]

pub mod config;
pub mod device;
pub mod devices;
pub mod events;
pub mod fault_injection;
pub mod host;
pub mod protocol;
pub mod state;
pub mod tracker;

// Re-export main public types for convenience
pub use config::{ConfigError, DeviceConfig, SimulatorConfig};
pub use device::{DeviceError, DeviceSnapshot, SimulatorDevice};
pub use devices::DeviceKind;
pub use events::{AttributeName, AttributeValue, ChangeEvent};
pub use fault_injection::FaultPolicy;
pub use host::DeviceHost;
pub use protocol::{Command, CommandReply, ResultCode};
pub use tracker::TaskStatus;
