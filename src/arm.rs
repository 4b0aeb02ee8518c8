//! Contains the [`Arm`] type for controlling a Helix A7.

use std::time::Duration;

use crate::arm::command::{
    CartesianPose, CartesianVelocities, ControlRegime, JointPositions, JointTorques,
    JointVelocities, MotionCommand,
};
use crate::arm::control_loop::ControlLoop;
use crate::arm::session::{ArmSession, SessionConfig};
use crate::arm::state::ArmState;
use crate::arm::wire::WireRegime;
use crate::error::HelixResult;

pub mod command;
pub(crate) mod control_loop;
pub mod guard;
pub mod journal;
pub mod rt;
pub mod session;
pub mod state;
pub mod wire;

/// One network connection to an A7 controller.
///
/// `control_*` calls block the calling thread for the whole session and
/// return normally when a callback attaches a `Finish` or `Stop` marker; any
/// fault ends the session and surfaces as a [`HelixError`](`crate::HelixError`).
/// A new session may be started on the same connection after a clean end;
/// after a control fault the connection should be re-established.
pub struct Arm {
    session: ArmSession,
    config: SessionConfig,
}

impl Arm {
    /// Connects to an A7 controller at the given hostname or IP address.
    ///
    /// # Errors
    /// * [`Network`](`crate::HelixError::Network`) if the controller is
    ///   unreachable or the handshake deadline expires.
    /// * [`IncompatibleVersion`](`crate::HelixError::IncompatibleVersion`) if
    ///   the controller speaks a different protocol version.
    pub fn new<C: Into<Option<SessionConfig>>>(address: &str, config: C) -> HelixResult<Arm> {
        let config = config.into().unwrap_or_default();
        let session = ArmSession::connect(address, &config)?;
        Ok(Arm { session, config })
    }

    /// Waits for one state snapshot outside a control session, e.g. to
    /// capture an initial pose.
    pub fn read_once(&mut self) -> HelixResult<ArmState> {
        self.session.read_once()
    }

    /// Protocol version reported by the connected controller.
    pub fn server_version(&self) -> u16 {
        self.session.server_version()
    }

    /// Sets the contact and collision detection thresholds.
    ///
    /// Contact thresholds mark the level at which contact is reported in the
    /// state; collision thresholds trip a reflex that faults a running
    /// session. Must not be called while a control session is running.
    #[allow(clippy::too_many_arguments)]
    pub fn set_collision_thresholds(
        &mut self,
        torque_contact_lower: [f64; 7],
        torque_contact_upper: [f64; 7],
        torque_collision_lower: [f64; 7],
        torque_collision_upper: [f64; 7],
        force_contact_lower: [f64; 6],
        force_contact_upper: [f64; 6],
        force_collision_lower: [f64; 6],
        force_collision_upper: [f64; 6],
    ) -> HelixResult<()> {
        self.session.set_collision_thresholds(
            torque_contact_lower,
            torque_contact_upper,
            torque_collision_lower,
            torque_collision_upper,
            force_contact_lower,
            force_contact_upper,
            force_collision_lower,
            force_collision_upper,
        )
    }

    /// Starts a joint position control session.
    ///
    /// The callback runs once per cycle until it attaches a termination
    /// marker. `regime` selects the internal controller, joint impedance by
    /// default. `guard` enables the continuity guard, on by default;
    /// bypassing it sends callback output to the hardware unchecked.
    ///
    /// # Errors
    /// * [`Control`](`crate::HelixError::Control`) if a command was rejected
    ///   or the controller reported a safety trip; carries the journal.
    /// * [`Network`](`crate::HelixError::Network`) if the connection is lost.
    /// * [`Realtime`](`crate::HelixError::Realtime`) if realtime priority is
    ///   enforced but cannot be acquired.
    pub fn control_joint_positions<F, R, G>(
        &mut self,
        motion_generator: F,
        regime: R,
        guard: G,
    ) -> HelixResult<()>
    where
        F: FnMut(&ArmState, &Duration) -> JointPositions,
        R: Into<Option<ControlRegime>>,
        G: Into<Option<bool>>,
    {
        self.control_motion(motion_generator, regime.into(), guard.into())
    }

    /// Starts a joint velocity control session.
    ///
    /// See [`control_joint_positions`](`Arm::control_joint_positions`) for
    /// the shared behavior.
    pub fn control_joint_velocities<F, R, G>(
        &mut self,
        motion_generator: F,
        regime: R,
        guard: G,
    ) -> HelixResult<()>
    where
        F: FnMut(&ArmState, &Duration) -> JointVelocities,
        R: Into<Option<ControlRegime>>,
        G: Into<Option<bool>>,
    {
        self.control_motion(motion_generator, regime.into(), guard.into())
    }

    /// Starts a Cartesian pose control session.
    ///
    /// Commanded poses must be valid rigid transforms; see
    /// [`control_joint_positions`](`Arm::control_joint_positions`) for the
    /// shared behavior.
    pub fn control_cartesian_pose<F, R, G>(
        &mut self,
        motion_generator: F,
        regime: R,
        guard: G,
    ) -> HelixResult<()>
    where
        F: FnMut(&ArmState, &Duration) -> CartesianPose,
        R: Into<Option<ControlRegime>>,
        G: Into<Option<bool>>,
    {
        self.control_motion(motion_generator, regime.into(), guard.into())
    }

    /// Starts a Cartesian velocity control session.
    pub fn control_cartesian_velocities<F, R, G>(
        &mut self,
        motion_generator: F,
        regime: R,
        guard: G,
    ) -> HelixResult<()>
    where
        F: FnMut(&ArmState, &Duration) -> CartesianVelocities,
        R: Into<Option<ControlRegime>>,
        G: Into<Option<bool>>,
    {
        self.control_motion(motion_generator, regime.into(), guard.into())
    }

    /// Starts a torque control session without a motion generator.
    ///
    /// The arm holds the joint velocity stream at its entry value while the
    /// callback supplies a torque correction each cycle; the callback's
    /// termination marker ends the session.
    pub fn control_torques<T, G>(&mut self, controller: T, guard: G) -> HelixResult<()>
    where
        T: FnMut(&ArmState, &Duration) -> JointTorques,
        G: Into<Option<bool>>,
    {
        let mut controller = controller;
        let torque_callback: crate::arm::control_loop::TorqueCallback = &mut controller;
        let mut control_loop = ControlLoop::<_, JointVelocities, _>::new(
            &mut self.session,
            None::<fn(&ArmState, &Duration) -> JointVelocities>,
            Some(torque_callback),
            WireRegime::ExternalTorque,
            self.config.limits.clone(),
            guard.into().unwrap_or(true),
        )?;
        control_loop.run()
    }

    /// Starts a torque control session paired with a joint position motion
    /// generator. Both callbacks run each cycle, motion generator first, and
    /// a termination marker from either ends the session.
    pub fn control_torques_and_joint_positions<T, F, G>(
        &mut self,
        controller: T,
        motion_generator: F,
        guard: G,
    ) -> HelixResult<()>
    where
        T: FnMut(&ArmState, &Duration) -> JointTorques,
        F: FnMut(&ArmState, &Duration) -> JointPositions,
        G: Into<Option<bool>>,
    {
        self.control_torques_with(controller, motion_generator, guard.into())
    }

    /// Starts a torque control session paired with a joint velocity motion
    /// generator.
    pub fn control_torques_and_joint_velocities<T, F, G>(
        &mut self,
        controller: T,
        motion_generator: F,
        guard: G,
    ) -> HelixResult<()>
    where
        T: FnMut(&ArmState, &Duration) -> JointTorques,
        F: FnMut(&ArmState, &Duration) -> JointVelocities,
        G: Into<Option<bool>>,
    {
        self.control_torques_with(controller, motion_generator, guard.into())
    }

    /// Starts a torque control session paired with a Cartesian pose motion
    /// generator.
    pub fn control_torques_and_cartesian_pose<T, F, G>(
        &mut self,
        controller: T,
        motion_generator: F,
        guard: G,
    ) -> HelixResult<()>
    where
        T: FnMut(&ArmState, &Duration) -> JointTorques,
        F: FnMut(&ArmState, &Duration) -> CartesianPose,
        G: Into<Option<bool>>,
    {
        self.control_torques_with(controller, motion_generator, guard.into())
    }

    /// Starts a torque control session paired with a Cartesian velocity
    /// motion generator.
    pub fn control_torques_and_cartesian_velocities<T, F, G>(
        &mut self,
        controller: T,
        motion_generator: F,
        guard: G,
    ) -> HelixResult<()>
    where
        T: FnMut(&ArmState, &Duration) -> JointTorques,
        F: FnMut(&ArmState, &Duration) -> CartesianVelocities,
        G: Into<Option<bool>>,
    {
        self.control_torques_with(controller, motion_generator, guard.into())
    }

    fn control_motion<F, U>(
        &mut self,
        motion_generator: F,
        regime: Option<ControlRegime>,
        guard: Option<bool>,
    ) -> HelixResult<()>
    where
        U: MotionCommand,
        F: FnMut(&ArmState, &Duration) -> U,
    {
        let regime = match regime.unwrap_or(ControlRegime::JointImpedance) {
            ControlRegime::JointImpedance => WireRegime::JointImpedance,
            ControlRegime::CartesianImpedance => WireRegime::CartesianImpedance,
        };
        let mut control_loop = ControlLoop::new(
            &mut self.session,
            Some(motion_generator),
            None,
            regime,
            self.config.limits.clone(),
            guard.unwrap_or(true),
        )?;
        control_loop.run()
    }

    fn control_torques_with<T, F, U>(
        &mut self,
        controller: T,
        motion_generator: F,
        guard: Option<bool>,
    ) -> HelixResult<()>
    where
        T: FnMut(&ArmState, &Duration) -> JointTorques,
        U: MotionCommand,
        F: FnMut(&ArmState, &Duration) -> U,
    {
        let mut controller = controller;
        let torque_callback: crate::arm::control_loop::TorqueCallback = &mut controller;
        let mut control_loop = ControlLoop::new(
            &mut self.session,
            Some(motion_generator),
            Some(torque_callback),
            WireRegime::ExternalTorque,
            self.config.limits.clone(),
            guard.unwrap_or(true),
        )?;
        control_loop.run()
    }
}
