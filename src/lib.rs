//! # helix-arm
//! helix-arm is a client library for driving [Helix Robotics](https://helix-robotics.dev)
//! A7 research arms over the controller's real-time cycle interface.
//!
//! **ALWAYS HAVE THE USER STOP BUTTON AT HAND WHILE CONTROLLING THE ARM!**
//!
//! ## Design
//! The library is divided into two main modules:
//! * [arm](`crate::arm`) - everything needed to control the arm itself.
//! * [gripper](`crate::gripper`) - everything needed to control the gripper.
//!
//! A control session is started by passing one or two callbacks to one of the
//! `control_*` methods of [`Arm`]: a motion generator producing the motion
//! command of the active variant, and/or a torque controller producing a
//! joint torque command. The callbacks run once per millisecond cycle and end
//! the session by attaching a termination marker to their return value.
//!
//! # Example:
//! ```no_run
//! use std::f64::consts::PI;
//! use std::time::Duration;
//! use helix::{Arm, ArmState, HelixResult, JointPositions, Terminable};
//!
//! fn main() -> HelixResult<()> {
//!     let mut arm = Arm::new("arm.example.dev", None)?;
//!     arm.set_collision_thresholds(
//!         [20.0, 20.0, 18.0, 18.0, 16.0, 14.0, 12.0],
//!         [20.0, 20.0, 18.0, 18.0, 16.0, 14.0, 12.0],
//!         [20.0, 20.0, 18.0, 18.0, 16.0, 14.0, 12.0],
//!         [20.0, 20.0, 18.0, 18.0, 16.0, 14.0, 12.0],
//!         [20.0, 20.0, 20.0, 25.0, 25.0, 25.0],
//!         [20.0, 20.0, 20.0, 25.0, 25.0, 25.0],
//!         [20.0, 20.0, 20.0, 25.0, 25.0, 25.0],
//!         [20.0, 20.0, 20.0, 25.0, 25.0, 25.0],
//!     )?;
//!     let mut time = 0.;
//!     let mut initial_position = [0.; 7];
//!     let callback = move |state: &ArmState, time_step: &Duration| -> JointPositions {
//!         if time == 0. {
//!             initial_position = state.q_d;
//!         }
//!         time += time_step.as_secs_f64();
//!         let delta = PI / 8. * (1. - f64::cos(PI / 2.5 * time));
//!         let mut q = initial_position;
//!         q[3] += delta;
//!         q[4] += delta;
//!         q[6] += delta;
//!         let out = JointPositions::new(q);
//!         if time >= 5.0 {
//!             return out.finished();
//!         }
//!         out
//!     };
//!     arm.control_joint_positions(callback, None, None)
//! }
//! ```
//!
//! Every fallible call returns a [`HelixResult`] whose error side is a
//! [`HelixError`]. A control fault carries the diagnostic journal: the last
//! cycles of (state, sent command) pairs leading up to the failure, for
//! offline inspection.

pub mod arm;
pub mod error;
pub mod gripper;
mod network;
pub mod utils;

pub use arm::command::{
    CartesianPose, CartesianVelocities, ControlRegime, JointPositions, JointTorques,
    JointVelocities, MotionCommand, Terminable, Termination,
};
pub use arm::guard::{Discontinuity, GuardLimits};
pub use arm::journal::{CycleRecord, SentCommand};
pub use arm::rt::RealtimeMode;
pub use arm::session::SessionConfig;
pub use arm::state::{ArmState, SafetyFault, SafetyFlags};
pub use arm::wire::ArmMode;
pub use arm::Arm;
pub use error::{HelixError, HelixResult};
pub use gripper::state::GripperState;
pub use gripper::Gripper;
pub use utils::*;
