//! The per-cycle arm state snapshot and its safety flags.

use std::fmt;
use std::time::Duration;

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive as _;
use serde::{Deserialize, Serialize};

use crate::arm::wire::{ArmMode, StateFrame};

/// Safety and error conditions the controller can report in a state frame.
///
/// Each flag maps onto one [`SafetyFault`] of the same index.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, Default, PartialEq)]
pub struct SafetyFlags {
    pub joint_position_limit: bool,
    pub joint_velocity_limit: bool,
    pub cartesian_position_limit: bool,
    pub cartesian_velocity_limit: bool,
    pub self_collision: bool,
    pub joint_reflex: bool,
    pub cartesian_reflex: bool,
    pub force_limit: bool,
    pub motion_discontinuity: bool,
    pub torque_discontinuity: bool,
    pub power_limit: bool,
    pub communication_constraints: bool,
    pub instability: bool,
}

impl SafetyFlags {
    fn as_array(&self) -> [bool; 13] {
        [
            self.joint_position_limit,
            self.joint_velocity_limit,
            self.cartesian_position_limit,
            self.cartesian_velocity_limit,
            self.self_collision,
            self.joint_reflex,
            self.cartesian_reflex,
            self.force_limit,
            self.motion_discontinuity,
            self.torque_discontinuity,
            self.power_limit,
            self.communication_constraints,
            self.instability,
        ]
    }

    /// Whether any safety condition is active.
    pub fn tripped(&self) -> bool {
        self.as_array().iter().any(|&flag| flag)
    }

    /// The active conditions as typed faults, in flag order.
    pub fn active(&self) -> Vec<SafetyFault> {
        self.as_array()
            .iter()
            .enumerate()
            .filter(|(_, &flag)| flag)
            .map(|(i, _)| SafetyFault::from_usize(i).unwrap())
            .collect()
    }
}

impl fmt::Display for SafetyFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let faults = self.active();
        write!(f, "[")?;
        for (i, fault) in faults.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", fault)?;
        }
        write!(f, "]")
    }
}

/// Typed view of a single tripped safety flag.
#[derive(FromPrimitive, ToPrimitive, Debug, Copy, Clone, PartialEq)]
pub enum SafetyFault {
    /// A joint moved past its position limit.
    JointPositionLimit = 0,
    /// A joint exceeded its velocity limit.
    JointVelocityLimit = 1,
    /// The end effector moved past a configured virtual wall.
    CartesianPositionLimit = 2,
    /// The end effector exceeded its velocity limit.
    CartesianVelocityLimit = 3,
    /// The arm would have collided with itself.
    SelfCollision = 4,
    /// A joint torque threshold was exceeded, collision assumed.
    JointReflex = 5,
    /// A Cartesian force threshold was exceeded, collision assumed.
    CartesianReflex = 6,
    /// A safety threshold was exceeded during force control.
    ForceLimit = 7,
    /// Consecutive commanded motion values were too far apart.
    MotionDiscontinuity = 8,
    /// Consecutive commanded torques were too far apart.
    TorqueDiscontinuity = 9,
    /// Commanded values would exceed the power limit.
    PowerLimit = 10,
    /// Minimum communication quality could not be held during a motion.
    CommunicationConstraints = 11,
    /// An instability was detected.
    Instability = 12,
}

impl fmt::Display for SafetyFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Snapshot of the arm, produced by the controller exactly once per cycle.
///
/// Read-only to callbacks; each cycle's snapshot is an independent value.
#[derive(Debug, Clone)]
pub struct ArmState {
    /// Measured joint positions in \[rad\].
    pub q: [f64; 7],
    /// Last commanded joint positions in \[rad\].
    pub q_d: [f64; 7],
    /// Measured joint velocities in \[rad/s\].
    pub dq: [f64; 7],
    /// Last commanded joint velocities in \[rad/s\].
    pub dq_d: [f64; 7],
    /// Last commanded joint accelerations in \[rad/s^2\].
    pub ddq_d: [f64; 7],
    /// Measured end effector pose in base frame, 4x4 column-major.
    pub ee_pose: [f64; 16],
    /// Last desired end effector pose in base frame, 4x4 column-major.
    pub ee_pose_d: [f64; 16],
    /// Last commanded end effector pose in base frame, 4x4 column-major.
    pub ee_pose_c: [f64; 16],
    /// Last commanded end effector twist {dx, dy, dz, wx, wy, wz}.
    pub ee_twist_c: [f64; 6],
    /// Last commanded end effector acceleration.
    pub ee_accel_c: [f64; 6],
    /// Measured joint torques in \[Nm\].
    pub tau: [f64; 7],
    /// Last commanded joint torques without gravity in \[Nm\].
    pub tau_d: [f64; 7],
    /// Filtered external joint torque estimate in \[Nm\].
    pub tau_ext: [f64; 7],
    /// External wrench estimate acting on the end effector, base frame.
    pub wrench_ext: [f64; 6],
    /// Per-joint contact level.
    pub joint_contact: [f64; 7],
    /// Per-axis Cartesian contact level.
    pub cartesian_contact: [f64; 6],
    /// Active safety and error conditions.
    pub flags: SafetyFlags,
    /// Operating mode of the arm.
    pub mode: ArmMode,
    /// Share of commanded frames the controller received in time, over the
    /// last hundred cycles.
    pub command_success_rate: f64,
    /// Strictly monotonic time since controller start.
    pub time: Duration,
}

impl From<StateFrame> for ArmState {
    fn from(frame: StateFrame) -> Self {
        ArmState {
            q: frame.q,
            q_d: frame.q_d,
            dq: frame.dq,
            dq_d: frame.dq_d,
            ddq_d: frame.ddq_d,
            ee_pose: frame.ee_pose,
            ee_pose_d: frame.ee_pose_d,
            ee_pose_c: frame.ee_pose_c,
            ee_twist_c: frame.ee_twist_c,
            ee_accel_c: frame.ee_accel_c,
            tau: frame.tau,
            tau_d: frame.tau_d,
            tau_ext: frame.tau_ext,
            wrench_ext: frame.wrench_ext,
            joint_contact: frame.joint_contact,
            cartesian_contact: frame.cartesian_contact,
            flags: frame.flags,
            mode: frame.mode,
            command_success_rate: frame.command_success_rate,
            time: Duration::from_millis(frame.message_id),
        }
    }
}

impl Default for ArmState {
    fn default() -> Self {
        let mut identity = [0.; 16];
        identity[0] = 1.;
        identity[5] = 1.;
        identity[10] = 1.;
        identity[15] = 1.;
        ArmState {
            q: [0.; 7],
            q_d: [0.; 7],
            dq: [0.; 7],
            dq_d: [0.; 7],
            ddq_d: [0.; 7],
            ee_pose: identity,
            ee_pose_d: identity,
            ee_pose_c: identity,
            ee_twist_c: [0.; 6],
            ee_accel_c: [0.; 6],
            tau: [0.; 7],
            tau_d: [0.; 7],
            tau_ext: [0.; 7],
            wrench_ext: [0.; 6],
            joint_contact: [0.; 7],
            cartesian_contact: [0.; 6],
            flags: SafetyFlags::default(),
            mode: ArmMode::Other,
            command_success_rate: 0.,
            time: Duration::from_secs(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_decode_in_order() {
        let mut flags = SafetyFlags::default();
        assert!(!flags.tripped());
        assert!(flags.active().is_empty());

        flags.joint_reflex = true;
        flags.communication_constraints = true;
        assert!(flags.tripped());
        assert_eq!(
            flags.active(),
            vec![
                SafetyFault::JointReflex,
                SafetyFault::CommunicationConstraints
            ]
        );
        assert_eq!(
            flags.to_string(),
            "[JointReflex, CommunicationConstraints]"
        );
    }

    #[test]
    fn state_time_follows_message_id() {
        let mut frame = StateFrame::zeroed();
        frame.message_id = 1500;
        let state = ArmState::from(frame);
        assert_eq!(state.time, Duration::from_millis(1500));
    }
}
