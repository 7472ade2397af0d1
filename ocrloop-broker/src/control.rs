//! Broker control service (service id 0)

use ocrloop_ipc::ServiceId;
use serde::{Deserialize, Serialize};

/// Reserved id of the control service on both sides of a connection
pub const CONTROL_SERVICE: ServiceId = 0;

pub const PING: &str = "Control/Ping";
pub const DIAL: &str = "Control/Dial";
pub const RELEASE: &str = "Control/Release";
pub const DISPENSE: &str = "Control/Dispense";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingResponse {
    pub protocol_version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialRequest {
    pub id: ServiceId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DialResponse {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseRequest {
    pub id: ServiceId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReleaseResponse {
    /// False when the id was not (or no longer) registered
    pub released: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispenseRequest {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DispenseResponse {
    pub id: ServiceId,
    pub interfaces: Vec<String>,
}
