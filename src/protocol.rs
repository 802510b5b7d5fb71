use crate::events::{AttributeName, AttributeValue, ChangeEvent};
use crate::state::{CommandName, DevState, HealthState, ObsMode, ObsState};
use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_REQUEST_SIZE: usize = 4096;

pub type RequestBuffer = ArrayString<MAX_REQUEST_SIZE>;

/// A device command with its argument. JSON arguments are carried as text,
/// the way a Tango client passes a `DevString`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    On,
    Off,
    Standby,
    InitSysParam(String),
    AssignResources(String),
    ReleaseAllResources,
    #[serde(alias = "ConfigureScan")]
    Configure(String),
    Scan(String),
    EndScan,
    #[serde(alias = "End")]
    GoToIdle,
    Abort,
    Restart,
    ObsReset,
    ForceState(DevState),
    ForceHealthState(HealthState),
    ForceObsState(ObsState),
    ForceObsMode(ObsMode),
}

impl Command {
    pub fn name(&self) -> CommandName {
        match self {
            Command::On => CommandName::On,
            Command::Off => CommandName::Off,
            Command::Standby => CommandName::Standby,
            Command::InitSysParam(_) => CommandName::InitSysParam,
            Command::AssignResources(_) => CommandName::AssignResources,
            Command::ReleaseAllResources => CommandName::ReleaseAllResources,
            Command::Configure(_) => CommandName::Configure,
            Command::Scan(_) => CommandName::Scan,
            Command::EndScan => CommandName::EndScan,
            Command::GoToIdle => CommandName::GoToIdle,
            Command::Abort => CommandName::Abort,
            Command::Restart => CommandName::Restart,
            Command::ObsReset => CommandName::ObsReset,
            Command::ForceState(_) => CommandName::ForceState,
            Command::ForceHealthState(_) => CommandName::ForceHealthState,
            Command::ForceObsState(_) => CommandName::ForceObsState,
            Command::ForceObsMode(_) => CommandName::ForceObsMode,
        }
    }

    /// JSON argument text, for commands that take one.
    pub fn argument(&self) -> Option<&str> {
        match self {
            Command::InitSysParam(arg)
            | Command::AssignResources(arg)
            | Command::Configure(arg)
            | Command::Scan(arg) => Some(arg),
            _ => None,
        }
    }
}

/// Result codes with the SKA numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultCode {
    Ok = 0,
    Started = 1,
    Queued = 2,
    Failed = 3,
    Unknown = 4,
    Rejected = 5,
    NotAllowed = 6,
    Aborted = 7,
}

impl ResultCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// `(result_code, [message_or_id])` returned by every command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandReply {
    pub result_code: ResultCode,
    pub message: String,
}

impl CommandReply {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            result_code: ResultCode::Ok,
            message: message.into(),
        }
    }

    pub fn queued(id: impl Into<String>) -> Self {
        Self {
            result_code: ResultCode::Queued,
            message: id.into(),
        }
    }

    pub fn is_queued(&self) -> bool {
        self.result_code == ResultCode::Queued
    }
}

/// One line of client input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub id: u32,
    #[serde(default)]
    pub device: Option<String>,
    pub request: RequestKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RequestKind {
    Command(Command),
    ReadAttribute { attribute: AttributeName },
    WriteAttribute { attribute: AttributeName, value: AttributeValue },
    Snapshot,
    ListDevices,
    Subscribe,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub id: u32,
    pub result_code: ResultCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl Response {
    pub fn reply(id: u32, reply: CommandReply) -> Self {
        Self {
            id,
            result_code: reply.result_code,
            message: Some(reply.message),
            value: None,
        }
    }

    pub fn ok(id: u32, message: impl Into<String>) -> Self {
        Self::error(id, ResultCode::Ok, message)
    }

    pub fn value(id: u32, value: serde_json::Value) -> Self {
        Self {
            id,
            result_code: ResultCode::Ok,
            message: None,
            value: Some(value),
        }
    }

    pub fn error(id: u32, result_code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            id,
            result_code,
            message: Some(message.into()),
            value: None,
        }
    }
}

/// Lines written to a connected client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Outbound {
    Response(Response),
    Event { event: ChangeEvent },
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("request exceeds {} bytes", MAX_REQUEST_SIZE)]
    MessageTooLarge,
    #[error("invalid request: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("request id must be non-zero")]
    InvalidRequestId,
    #[error("request needs a target device")]
    MissingDevice,
}

/// Parses requests into a preallocated buffer and renders outbound lines.
#[derive(Debug)]
pub struct ProtocolHandler {
    request_buffer: RequestBuffer,
    requests_parsed: u32,
    parse_errors: u32,
}

impl ProtocolHandler {
    pub fn new() -> Self {
        Self {
            request_buffer: ArrayString::new(),
            requests_parsed: 0,
            parse_errors: 0,
        }
    }

    pub fn parse_request(&mut self, line: &str) -> Result<Request, ProtocolError> {
        let result = self.parse_inner(line.trim());
        match result {
            Ok(_) => self.requests_parsed += 1,
            Err(_) => self.parse_errors += 1,
        }
        result
    }

    fn parse_inner(&mut self, line: &str) -> Result<Request, ProtocolError> {
        self.request_buffer.clear();
        self.request_buffer
            .try_push_str(line)
            .map_err(|_| ProtocolError::MessageTooLarge)?;

        let request: Request = serde_json::from_str(&self.request_buffer)?;
        validate_request(&request)?;
        Ok(request)
    }

    pub fn serialize_outbound(&self, outbound: &Outbound) -> Result<String, ProtocolError> {
        Ok(serde_json::to_string(outbound)?)
    }

    pub fn get_requests_parsed(&self) -> u32 {
        self.requests_parsed
    }

    pub fn get_parse_errors(&self) -> u32 {
        self.parse_errors
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new()
    }
}

pub fn validate_request(request: &Request) -> Result<(), ProtocolError> {
    if request.id == 0 {
        return Err(ProtocolError::InvalidRequestId);
    }
    let needs_device = !matches!(request.request, RequestKind::ListDevices);
    if needs_device && request.device.is_none() {
        return Err(ProtocolError::MissingDevice);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command_request() {
        let mut handler = ProtocolHandler::new();
        let line = r#"{"id":1,"device":"sim-pst/beam/01","request":{"Command":{"Configure":"{\"scan\":1}"}}}"#;
        let request = handler.parse_request(line).unwrap();

        assert_eq!(request.device.as_deref(), Some("sim-pst/beam/01"));
        match request.request {
            RequestKind::Command(command) => {
                assert_eq!(command.name(), CommandName::Configure);
                assert_eq!(command.argument(), Some("{\"scan\":1}"));
            }
            other => panic!("unexpected request {other:?}"),
        }
        assert_eq!(handler.get_requests_parsed(), 1);
    }

    #[test]
    fn test_command_aliases() {
        let end: Command = serde_json::from_str("\"End\"").unwrap();
        assert_eq!(end, Command::GoToIdle);
        let configure: Command = serde_json::from_str(r#"{"ConfigureScan":"{}"}"#).unwrap();
        assert_eq!(configure.name(), CommandName::Configure);
    }

    #[test]
    fn test_oversized_request_rejected() {
        let mut handler = ProtocolHandler::new();
        let line = format!(r#"{{"id":1,"request":"ListDevices","pad":"{}"}}"#, "x".repeat(MAX_REQUEST_SIZE));
        assert!(matches!(handler.parse_request(&line), Err(ProtocolError::MessageTooLarge)));
        assert_eq!(handler.get_parse_errors(), 1);
    }

    #[test]
    fn test_missing_device_and_zero_id() {
        let mut handler = ProtocolHandler::new();
        assert!(matches!(
            handler.parse_request(r#"{"id":3,"request":"Snapshot"}"#),
            Err(ProtocolError::MissingDevice)
        ));
        assert!(matches!(
            handler.parse_request(r#"{"id":0,"request":"ListDevices"}"#),
            Err(ProtocolError::InvalidRequestId)
        ));
        assert!(handler.parse_request(r#"{"id":4,"request":"ListDevices"}"#).is_ok());
    }

    #[test]
    fn test_result_code_numbering() {
        assert_eq!(ResultCode::Ok.as_i32(), 0);
        assert_eq!(ResultCode::Queued.as_i32(), 2);
        assert_eq!(ResultCode::NotAllowed.as_i32(), 6);
        assert_eq!(ResultCode::Aborted.as_i32(), 7);
    }
}
