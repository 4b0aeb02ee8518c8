//! Wire messages exchanged with the gripper server.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::network::MessageCommand;

/// Version of the gripper protocol this library speaks.
pub static GRIPPER_VERSION: u16 = 2;
/// TCP port of the gripper server.
pub static GRIPPER_PORT: u16 = 3338;

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u16)]
pub enum GripperCommand {
    Connect,
    Home,
    Grasp,
    Move,
    Stop,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperCommandHeader {
    pub command: GripperCommand,
    pub command_id: u32,
    pub size: u32,
}

impl GripperCommandHeader {
    pub fn new(command: GripperCommand, command_id: u32, size: u32) -> Self {
        GripperCommandHeader {
            command,
            command_id,
            size,
        }
    }
}

// Homing and stop requests are a bare header.
impl MessageCommand for GripperCommandHeader {
    fn message_id(&self) -> u32 {
        self.command_id
    }
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u16)]
pub enum GripperStatus {
    Success,
    Fail,
    Unsuccessful,
    Aborted,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperConnectRequest {
    pub version: u16,
    pub cyclic_port: u16,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperConnectRequestWithHeader {
    pub header: GripperCommandHeader,
    pub request: GripperConnectRequest,
}

impl MessageCommand for GripperConnectRequestWithHeader {
    fn message_id(&self) -> u32 {
        self.header.command_id
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperConnectResponse {
    pub header: GripperCommandHeader,
    pub status: GripperStatus,
    pub version: u16,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperResponse {
    pub header: GripperCommandHeader,
    pub status: GripperStatus,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperMoveRequest {
    pub width: f64,
    pub speed: f64,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperMoveRequestWithHeader {
    pub header: GripperCommandHeader,
    pub request: GripperMoveRequest,
}

impl MessageCommand for GripperMoveRequestWithHeader {
    fn message_id(&self) -> u32 {
        self.header.command_id
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperGraspRequest {
    pub width: f64,
    pub epsilon_inner: f64,
    pub epsilon_outer: f64,
    pub speed: f64,
    pub force: f64,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct GripperGraspRequestWithHeader {
    pub header: GripperCommandHeader,
    pub request: GripperGraspRequest,
}

impl MessageCommand for GripperGraspRequestWithHeader {
    fn message_id(&self) -> u32 {
        self.header.command_id
    }
}

/// Cyclic state pushed by the gripper server.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct GripperStateFrame {
    pub message_id: u32,
    pub width: f64,
    pub max_width: f64,
    pub grasped: bool,
    pub temperature: u16,
}
