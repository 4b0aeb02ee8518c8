//! Command types returned by control callbacks and the termination markers
//! that end a session.

use std::fmt::Debug;

use nalgebra::{Isometry3, Vector6};
use serde::{Deserialize, Serialize};

use crate::arm::guard::{
    check_joint_rates, check_pose_rates, check_twist_rates, Discontinuity, GuardLimits,
};
use crate::arm::state::ArmState;
use crate::arm::wire::{CycleKind, MotionFrame};
use crate::utils::Vector7;

/// Out-of-band marker a callback attaches to its returned command.
///
/// `Finish` asks for the attached command to be sent one last time before the
/// session ends successfully; `Stop` asks for an immediate halt, the attached
/// payload is ignored. The two are mutually exclusive by construction.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq)]
pub enum Termination {
    /// Keep cycling.
    Run,
    /// Send this command, then end the session successfully.
    Finish,
    /// Halt now without sending the payload.
    Stop,
}

/// Implemented by every command type so a callback can mark its return value.
pub trait Terminable {
    fn termination(&self) -> Termination;
    fn set_termination(&mut self, termination: Termination);

    /// Marks this command as the last one of a motion.
    fn finished(mut self) -> Self
    where
        Self: Sized,
    {
        self.set_termination(Termination::Finish);
        self
    }

    /// Requests an immediate halt; the command payload is not sent.
    fn stopped(mut self) -> Self
    where
        Self: Sized,
    {
        self.set_termination(Termination::Stop);
        self
    }
}

/// Impedance controller the arm runs while a motion-only session is active.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum ControlRegime {
    JointImpedance,
    CartesianImpedance,
}

/// Implemented by the four motion command variants: names the cyclic mode to
/// negotiate, seeds the initial previous-command reference from the first
/// state snapshot, packs accepted values into the outbound frame and checks
/// continuity against the previous frame.
pub trait MotionCommand: Terminable + Debug + Copy {
    fn cycle_kind() -> CycleKind;
    fn seed_frame(state: &ArmState) -> MotionFrame;
    fn write_frame(&self, frame: &mut MotionFrame);
    fn check_continuity(
        &self,
        previous: &MotionFrame,
        time_step: f64,
        limits: &GuardLimits,
    ) -> Result<(), Discontinuity>;
}

/// Joint position command in \[rad\].
#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct JointPositions {
    termination: Termination,
    /// Desired joint angles in \[rad\].
    pub q: [f64; 7],
}

impl JointPositions {
    pub fn new(q: [f64; 7]) -> Self {
        JointPositions {
            q,
            termination: Termination::Run,
        }
    }
}

impl From<Vector7> for JointPositions {
    fn from(vector: Vector7) -> Self {
        JointPositions::new(vector.into())
    }
}

impl Terminable for JointPositions {
    fn termination(&self) -> Termination {
        self.termination
    }
    fn set_termination(&mut self, termination: Termination) {
        self.termination = termination;
    }
}

impl MotionCommand for JointPositions {
    fn cycle_kind() -> CycleKind {
        CycleKind::JointPosition
    }
    fn seed_frame(state: &ArmState) -> MotionFrame {
        let mut frame = MotionFrame::zeroed();
        frame.q_c = state.q_d;
        frame
    }
    fn write_frame(&self, frame: &mut MotionFrame) {
        frame.q_c = self.q;
    }
    fn check_continuity(
        &self,
        previous: &MotionFrame,
        time_step: f64,
        limits: &GuardLimits,
    ) -> Result<(), Discontinuity> {
        check_joint_rates(&self.q, &previous.q_c, time_step, &limits.joint_velocity)
    }
}

/// Joint velocity command in \[rad/s\].
#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct JointVelocities {
    termination: Termination,
    /// Desired joint velocities in \[rad/s\].
    pub dq: [f64; 7],
}

impl JointVelocities {
    pub fn new(dq: [f64; 7]) -> Self {
        JointVelocities {
            dq,
            termination: Termination::Run,
        }
    }
}

impl From<Vector7> for JointVelocities {
    fn from(vector: Vector7) -> Self {
        JointVelocities::new(vector.into())
    }
}

impl Terminable for JointVelocities {
    fn termination(&self) -> Termination {
        self.termination
    }
    fn set_termination(&mut self, termination: Termination) {
        self.termination = termination;
    }
}

impl MotionCommand for JointVelocities {
    fn cycle_kind() -> CycleKind {
        CycleKind::JointVelocity
    }
    fn seed_frame(state: &ArmState) -> MotionFrame {
        let mut frame = MotionFrame::zeroed();
        frame.dq_c = state.dq_d;
        frame
    }
    fn write_frame(&self, frame: &mut MotionFrame) {
        frame.dq_c = self.dq;
    }
    fn check_continuity(
        &self,
        previous: &MotionFrame,
        time_step: f64,
        limits: &GuardLimits,
    ) -> Result<(), Discontinuity> {
        check_joint_rates(
            &self.dq,
            &previous.dq_c,
            time_step,
            &limits.joint_acceleration,
        )
    }
}

/// End effector pose command, 4x4 column-major homogeneous transform from the
/// end effector frame to the base frame.
#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct CartesianPose {
    termination: Termination,
    /// Desired end effector pose in base frame.
    pub pose: [f64; 16],
}

impl CartesianPose {
    pub fn new(pose: [f64; 16]) -> Self {
        CartesianPose {
            pose,
            termination: Termination::Run,
        }
    }
}

impl From<Isometry3<f64>> for CartesianPose {
    fn from(isometry: Isometry3<f64>) -> Self {
        CartesianPose::new(crate::utils::isometry_to_array(&isometry))
    }
}

impl From<[f64; 16]> for CartesianPose {
    fn from(pose: [f64; 16]) -> Self {
        CartesianPose::new(pose)
    }
}

impl Terminable for CartesianPose {
    fn termination(&self) -> Termination {
        self.termination
    }
    fn set_termination(&mut self, termination: Termination) {
        self.termination = termination;
    }
}

impl MotionCommand for CartesianPose {
    fn cycle_kind() -> CycleKind {
        CycleKind::CartesianPose
    }
    fn seed_frame(state: &ArmState) -> MotionFrame {
        let mut frame = MotionFrame::zeroed();
        frame.pose_c = state.ee_pose_d;
        frame
    }
    fn write_frame(&self, frame: &mut MotionFrame) {
        frame.pose_c = self.pose;
    }
    fn check_continuity(
        &self,
        previous: &MotionFrame,
        time_step: f64,
        limits: &GuardLimits,
    ) -> Result<(), Discontinuity> {
        check_pose_rates(&self.pose, &previous.pose_c, time_step, limits)
    }
}

/// End effector twist command {dx, dy, dz, wx, wy, wz} in base frame, units
/// \[m/s\] and \[rad/s\].
#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct CartesianVelocities {
    termination: Termination,
    /// Desired end effector twist in base frame.
    pub twist: [f64; 6],
}

impl CartesianVelocities {
    pub fn new(twist: [f64; 6]) -> Self {
        CartesianVelocities {
            twist,
            termination: Termination::Run,
        }
    }
}

impl From<Vector6<f64>> for CartesianVelocities {
    fn from(vector: Vector6<f64>) -> Self {
        CartesianVelocities::new(vector.into())
    }
}

impl Terminable for CartesianVelocities {
    fn termination(&self) -> Termination {
        self.termination
    }
    fn set_termination(&mut self, termination: Termination) {
        self.termination = termination;
    }
}

impl MotionCommand for CartesianVelocities {
    fn cycle_kind() -> CycleKind {
        CycleKind::CartesianVelocity
    }
    fn seed_frame(state: &ArmState) -> MotionFrame {
        let mut frame = MotionFrame::zeroed();
        frame.twist_c = state.ee_twist_c;
        frame
    }
    fn write_frame(&self, frame: &mut MotionFrame) {
        frame.twist_c = self.twist;
    }
    fn check_continuity(
        &self,
        previous: &MotionFrame,
        time_step: f64,
        limits: &GuardLimits,
    ) -> Result<(), Discontinuity> {
        check_twist_rates(&self.twist, &previous.twist_c, time_step, limits)
    }
}

/// Joint torque command without gravity and friction, in \[Nm\].
#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
pub struct JointTorques {
    termination: Termination,
    /// Desired joint torques in \[Nm\].
    pub tau: [f64; 7],
}

impl JointTorques {
    pub fn new(tau: [f64; 7]) -> Self {
        JointTorques {
            tau,
            termination: Termination::Run,
        }
    }
}

impl From<Vector7> for JointTorques {
    fn from(vector: Vector7) -> Self {
        JointTorques::new(vector.into())
    }
}

impl Terminable for JointTorques {
    fn termination(&self) -> Termination {
        self.termination
    }
    fn set_termination(&mut self, termination: Termination) {
        self.termination = termination;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn commands_start_unmarked() {
        assert_eq!(
            JointPositions::new([0.; 7]).termination(),
            Termination::Run
        );
        assert_eq!(JointTorques::new([0.; 7]).termination(), Termination::Run);
    }

    #[test]
    fn markers_are_mutually_exclusive() {
        let finished = JointVelocities::new([0.; 7]).finished();
        assert_eq!(finished.termination(), Termination::Finish);
        let stopped = finished.stopped();
        assert_eq!(stopped.termination(), Termination::Stop);
    }

    #[test]
    fn seed_frame_takes_desired_values() {
        let mut state = ArmState::default();
        state.q_d = [0.5; 7];
        state.dq_d = [0.25; 7];
        assert_eq!(JointPositions::seed_frame(&state).q_c, [0.5; 7]);
        assert_eq!(JointVelocities::seed_frame(&state).dq_c, [0.25; 7]);
        assert_eq!(CartesianPose::seed_frame(&state).pose_c, state.ee_pose_d);
    }

    #[test]
    fn write_frame_touches_only_its_variant() {
        let mut frame = MotionFrame::zeroed();
        JointPositions::new([1.; 7]).write_frame(&mut frame);
        assert_eq!(frame.q_c, [1.; 7]);
        assert_eq!(frame.dq_c, [0.; 7]);
        assert_eq!(frame.twist_c, [0.; 6]);
    }
}
