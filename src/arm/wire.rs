//! Wire messages exchanged with the arm controller.
//!
//! TCP carries the request/response messages (connect, start motion, stop
//! motion, collision thresholds), UDP carries the fixed-size cyclic frames.
//! All messages are encoded with bincode, which lays the fields out densely
//! in declaration order.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};

use crate::arm::state::SafetyFlags;
use crate::network::MessageCommand;

/// Version of the cycle protocol this library speaks.
pub static PROTOCOL_VERSION: u16 = 5;
/// TCP port of the arm controller's command channel.
pub static COMMAND_PORT: u16 = 3337;

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u16)]
pub enum ArmCommand {
    Connect,
    StartMotion,
    StopMotion,
    SetCollisionThresholds,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct ArmCommandHeader {
    pub command: ArmCommand,
    pub command_id: u32,
    pub size: u32,
}

impl ArmCommandHeader {
    pub fn new(command: ArmCommand, command_id: u32, size: u32) -> Self {
        ArmCommandHeader {
            command,
            command_id,
            size,
        }
    }
}

/// Which motion stream a control session commands. The controller also
/// reports its currently active stream with this enum, `Idle` meaning no
/// motion generator is running.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum CycleKind {
    Idle,
    JointPosition,
    JointVelocity,
    CartesianPose,
    CartesianVelocity,
}

/// Internal controller selected for a session, as requested over TCP.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum WireRegime {
    JointImpedance,
    CartesianImpedance,
    ExternalTorque,
}

/// Controller currently active on the arm, as reported in every state frame.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum ActiveController {
    JointImpedance,
    CartesianImpedance,
    ExternalTorque,
    None,
}

/// Operating mode reported by the arm.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u8)]
pub enum ArmMode {
    Other,
    Idle,
    Move,
    Guiding,
    Reflex,
    UserStopped,
    Recovery,
}

impl Default for ArmMode {
    fn default() -> Self {
        ArmMode::Other
    }
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct ConnectRequest {
    pub version: u16,
    pub cyclic_port: u16,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct ConnectRequestWithHeader {
    pub header: ArmCommandHeader,
    pub request: ConnectRequest,
}

impl MessageCommand for ConnectRequestWithHeader {
    fn message_id(&self) -> u32 {
        self.header.command_id
    }
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u16)]
pub enum ConnectStatus {
    Success,
    IncompatibleVersion,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct ConnectResponse {
    pub header: ArmCommandHeader,
    pub status: ConnectStatus,
    pub version: u16,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct StartMotionRequest {
    pub regime: WireRegime,
    pub kind: CycleKind,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct StartMotionRequestWithHeader {
    pub header: ArmCommandHeader,
    pub request: StartMotionRequest,
}

impl MessageCommand for StartMotionRequestWithHeader {
    fn message_id(&self) -> u32 {
        self.header.command_id
    }
}

/// Outcome of a start-motion request. `Running` is pushed once the motion is
/// accepted; a final status arrives when the motion ends.
#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u16)]
pub enum MotionStatus {
    Accepted,
    Running,
    Finished,
    EmergencyStop,
    ReflexAborted,
    InvalidInput,
    NotInControlMode,
    SingularStartPose,
    Rejected,
    Preempted,
    Aborted,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct MotionResponse {
    pub header: ArmCommandHeader,
    pub status: MotionStatus,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct StopMotionRequestWithHeader {
    pub header: ArmCommandHeader,
}

impl MessageCommand for StopMotionRequestWithHeader {
    fn message_id(&self) -> u32 {
        self.header.command_id
    }
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u16)]
pub enum HaltStatus {
    Success,
    NotRunning,
    EmergencyStop,
    Aborted,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct HaltResponse {
    pub header: ArmCommandHeader,
    pub status: HaltStatus,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct SetCollisionThresholdsRequest {
    pub torque_contact_lower: [f64; 7],
    pub torque_contact_upper: [f64; 7],
    pub torque_collision_lower: [f64; 7],
    pub torque_collision_upper: [f64; 7],
    pub force_contact_lower: [f64; 6],
    pub force_contact_upper: [f64; 6],
    pub force_collision_lower: [f64; 6],
    pub force_collision_upper: [f64; 6],
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct SetCollisionThresholdsRequestWithHeader {
    pub header: ArmCommandHeader,
    pub request: SetCollisionThresholdsRequest,
}

impl MessageCommand for SetCollisionThresholdsRequestWithHeader {
    fn message_id(&self) -> u32 {
        self.header.command_id
    }
}

#[derive(Serialize_repr, Deserialize_repr, Debug, Copy, Clone, PartialEq)]
#[repr(u16)]
pub enum SetupStatus {
    Success,
    NotPossible,
    InvalidArgument,
}

#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct SetupResponse {
    pub header: ArmCommandHeader,
    pub status: SetupStatus,
}

/// Motion half of the outbound cyclic frame. Exactly one of the value groups
/// is meaningful, selected by the session's [`CycleKind`].
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct MotionFrame {
    pub q_c: [f64; 7],
    pub dq_c: [f64; 7],
    pub pose_c: [f64; 16],
    pub twist_c: [f64; 6],
    pub finished: bool,
}

impl MotionFrame {
    pub fn zeroed() -> Self {
        MotionFrame {
            q_c: [0.; 7],
            dq_c: [0.; 7],
            pose_c: [0.; 16],
            twist_c: [0.; 6],
            finished: false,
        }
    }
}

/// Torque half of the outbound cyclic frame.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct TorqueFrame {
    pub tau_c: [f64; 7],
}

impl TorqueFrame {
    pub fn zeroed() -> Self {
        TorqueFrame { tau_c: [0.; 7] }
    }
}

/// One outbound cyclic message. The torque half is zeroed when no torque
/// controller is active.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct CycleFrame {
    pub message_id: u64,
    pub motion: MotionFrame,
    pub torque: TorqueFrame,
}

/// One inbound state frame, produced by the controller once per cycle.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub struct StateFrame {
    pub message_id: u64,
    pub ee_pose: [f64; 16],
    pub ee_pose_d: [f64; 16],
    pub ee_pose_c: [f64; 16],
    pub ee_twist_c: [f64; 6],
    pub ee_accel_c: [f64; 6],
    pub q: [f64; 7],
    pub q_d: [f64; 7],
    pub dq: [f64; 7],
    pub dq_d: [f64; 7],
    pub ddq_d: [f64; 7],
    pub tau: [f64; 7],
    pub tau_d: [f64; 7],
    pub dtau: [f64; 7],
    pub tau_ext: [f64; 7],
    pub wrench_ext: [f64; 6],
    pub joint_contact: [f64; 7],
    pub cartesian_contact: [f64; 6],
    pub cycle_kind: CycleKind,
    pub controller: ActiveController,
    pub mode: ArmMode,
    pub flags: SafetyFlags,
    pub command_success_rate: f64,
}

impl StateFrame {
    pub fn zeroed() -> Self {
        StateFrame {
            message_id: 0,
            ee_pose: [0.; 16],
            ee_pose_d: [0.; 16],
            ee_pose_c: [0.; 16],
            ee_twist_c: [0.; 6],
            ee_accel_c: [0.; 6],
            q: [0.; 7],
            q_d: [0.; 7],
            dq: [0.; 7],
            dq_d: [0.; 7],
            ddq_d: [0.; 7],
            tau: [0.; 7],
            tau_d: [0.; 7],
            dtau: [0.; 7],
            tau_ext: [0.; 7],
            wrench_ext: [0.; 6],
            joint_contact: [0.; 7],
            cartesian_contact: [0.; 6],
            cycle_kind: CycleKind::Idle,
            controller: ActiveController::None,
            mode: ArmMode::Idle,
            flags: SafetyFlags::default(),
            command_success_rate: 1.,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_have_fixed_size() {
        let header = ArmCommandHeader::new(ArmCommand::Connect, 7, 14);
        let encoded = bincode::serialize(&header).unwrap();
        assert_eq!(encoded.len(), 10);
    }

    #[test]
    fn cycle_frame_roundtrip() {
        let mut frame = CycleFrame {
            message_id: 99,
            motion: MotionFrame::zeroed(),
            torque: TorqueFrame::zeroed(),
        };
        frame.motion.q_c[3] = 0.25;
        frame.motion.finished = true;
        frame.torque.tau_c[6] = -1.5;
        let decoded: CycleFrame = bincode::deserialize(&bincode::serialize(&frame).unwrap()).unwrap();
        assert_eq!(frame, decoded);
    }
}
