//! The per-session control loop: invokes the user callbacks once per cycle,
//! guards their output and drives the cyclic exchange until a termination
//! marker or a fault ends the session.

use std::time::Duration;

use tracing::debug;

use crate::arm::command::{JointTorques, MotionCommand, Terminable, Termination};
use crate::arm::guard::{check_torque_rates, effective_time_step, GuardLimits};
use crate::arm::rt::{elevate_current_thread, has_realtime_kernel, RealtimeMode};
use crate::arm::session::CycleInterface;
use crate::arm::state::ArmState;
use crate::arm::wire::{TorqueFrame, WireRegime};
use crate::error::{HelixError, HelixResult};

pub(crate) type TorqueCallback<'b> = &'b mut dyn FnMut(&ArmState, &Duration) -> JointTorques;

/// Owns one control session from negotiation to termination.
///
/// The motion generator and the torque controller are both optional, but at
/// least one must be supplied. Callbacks run synchronously on the calling
/// thread, motion generator first, and are never invoked again once either
/// returned a termination marker.
pub(crate) struct ControlLoop<'a, 'b, C, U, F>
where
    C: CycleInterface,
    U: MotionCommand,
    F: FnMut(&ArmState, &Duration) -> U,
{
    arm: &'a mut C,
    motion_callback: Option<F>,
    torque_callback: Option<TorqueCallback<'b>>,
    limits: GuardLimits,
    guard_enabled: bool,
    motion_id: u32,
}

impl<'a, 'b, C, U, F> ControlLoop<'a, 'b, C, U, F>
where
    C: CycleInterface,
    U: MotionCommand,
    F: FnMut(&ArmState, &Duration) -> U,
{
    pub fn new(
        arm: &'a mut C,
        motion_callback: Option<F>,
        torque_callback: Option<TorqueCallback<'b>>,
        regime: WireRegime,
        limits: GuardLimits,
        guard_enabled: bool,
    ) -> HelixResult<Self> {
        if motion_callback.is_none() && torque_callback.is_none() {
            return Err(HelixError::Contract {
                message: "control requires at least one callback".to_string(),
            });
        }
        if arm.realtime_mode() == RealtimeMode::Enforce {
            if !has_realtime_kernel() {
                return Err(HelixError::Realtime {
                    message: "running kernel has no realtime capabilities".to_string(),
                });
            }
            elevate_current_thread()?;
        }
        let motion_id = arm.start_motion(regime, U::cycle_kind())?;
        Ok(ControlLoop {
            arm,
            motion_callback,
            torque_callback,
            limits,
            guard_enabled,
            motion_id,
        })
    }

    /// Runs the session to completion. Any fault first halts the hardware,
    /// then surfaces to the caller.
    pub fn run(&mut self) -> HelixResult<()> {
        match self.cycle() {
            Ok(()) => Ok(()),
            Err(fault) => {
                let _ = self.arm.halt_motion(self.motion_id);
                Err(fault)
            }
        }
    }

    fn cycle(&mut self) -> HelixResult<()> {
        let mut state = self.arm.exchange(None, None)?;
        self.arm.check_motion_fault(&state, self.motion_id)?;
        let mut previous_time = state.time;
        // The continuity reference for the first cycle is the desired value
        // of the first snapshot.
        let mut motion_frame = U::seed_frame(&state);
        let mut torque_frame = TorqueFrame { tau_c: state.tau_d };
        loop {
            let time_step = state.time - previous_time;
            let dt = effective_time_step(time_step.as_secs_f64(), &self.limits);

            let mut termination = Termination::Run;
            let mut next_motion = motion_frame;
            if let Some(callback) = self.motion_callback.as_mut() {
                let output = callback(&state, &time_step);
                termination = output.termination();
                if termination != Termination::Stop {
                    if self.guard_enabled {
                        if let Err(violation) =
                            output.check_continuity(&motion_frame, dt, &self.limits)
                        {
                            return Err(self
                                .arm
                                .control_fault(format!("command rejected: {}", violation)));
                        }
                    }
                    output.write_frame(&mut next_motion);
                }
            }
            let mut next_torque = torque_frame;
            if termination != Termination::Stop {
                if let Some(callback) = self.torque_callback.as_mut() {
                    let output = callback(&state, &time_step);
                    match output.termination() {
                        Termination::Stop => {
                            if termination == Termination::Run {
                                termination = Termination::Stop;
                            }
                        }
                        marker => {
                            if self.guard_enabled {
                                if let Err(violation) = check_torque_rates(
                                    &output.tau,
                                    &torque_frame.tau_c,
                                    dt,
                                    &self.limits.torque_rate,
                                ) {
                                    return Err(self
                                        .arm
                                        .control_fault(format!("command rejected: {}", violation)));
                                }
                            }
                            next_torque.tau_c = output.tau;
                            if termination == Termination::Run {
                                termination = marker;
                            }
                        }
                    }
                }
            }

            motion_frame = next_motion;
            torque_frame = next_torque;
            let torque = if self.torque_callback.is_some() {
                Some(&torque_frame)
            } else {
                None
            };
            match termination {
                Termination::Stop => {
                    debug!(motion_id = self.motion_id, "stop marker, halting");
                    self.arm.halt_motion(self.motion_id)?;
                    return Ok(());
                }
                Termination::Finish => {
                    return self
                        .arm
                        .finish_motion(self.motion_id, &motion_frame, torque);
                }
                Termination::Run => {
                    previous_time = state.time;
                    state = self.arm.exchange(Some(&motion_frame), torque)?;
                    self.arm.check_motion_fault(&state, self.motion_id)?;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arm::command::{JointPositions, JointVelocities};
    use crate::arm::journal::Journal;
    use crate::arm::wire::{CycleFrame, CycleKind, MotionFrame};

    /// Scripted stand-in for a connected arm: serves a fixed sequence of
    /// snapshots and records everything the loop does to it.
    struct FakeArm {
        states: Vec<ArmState>,
        cursor: usize,
        journal: Journal,
        sent: Vec<CycleFrame>,
        started: u32,
        halted: bool,
        finished_with: Option<MotionFrame>,
    }

    impl FakeArm {
        fn with_states(states: Vec<ArmState>) -> Self {
            FakeArm {
                states,
                cursor: 0,
                journal: Journal::new(16),
                sent: Vec::new(),
                started: 0,
                halted: false,
                finished_with: None,
            }
        }

        /// A sequence of snapshots at a 1 ms cycle with desired positions
        /// held at `q_d`.
        fn scripted(cycles: usize, q_d: [f64; 7]) -> Self {
            let states = (0..cycles)
                .map(|i| {
                    let mut state = ArmState::default();
                    state.q_d = q_d;
                    state.q = q_d;
                    state.time = Duration::from_millis(i as u64);
                    state
                })
                .collect();
            Self::with_states(states)
        }
    }

    impl CycleInterface for FakeArm {
        fn start_motion(&mut self, _regime: WireRegime, _kind: CycleKind) -> HelixResult<u32> {
            self.started += 1;
            Ok(7)
        }

        fn exchange(
            &mut self,
            motion: Option<&MotionFrame>,
            torque: Option<&TorqueFrame>,
        ) -> HelixResult<ArmState> {
            let state = self.states[self.cursor].clone();
            self.cursor += 1;
            if let Some(motion) = motion {
                let frame = CycleFrame {
                    message_id: self.cursor as u64,
                    motion: *motion,
                    torque: torque.copied().unwrap_or_else(TorqueFrame::zeroed),
                };
                self.sent.push(frame);
                self.journal.record(&state, &frame);
            }
            Ok(state)
        }

        fn check_motion_fault(&mut self, state: &ArmState, _motion_id: u32) -> HelixResult<()> {
            if state.flags.tripped() {
                let message = format!("safety trip: {}", state.flags);
                return Err(self.control_fault(message));
            }
            Ok(())
        }

        fn finish_motion(
            &mut self,
            _motion_id: u32,
            motion: &MotionFrame,
            torque: Option<&TorqueFrame>,
        ) -> HelixResult<()> {
            let mut final_frame = *motion;
            final_frame.finished = true;
            let state = self.states[self.cursor].clone();
            let frame = CycleFrame {
                message_id: self.cursor as u64,
                motion: final_frame,
                torque: torque.copied().unwrap_or_else(TorqueFrame::zeroed),
            };
            self.sent.push(frame);
            self.journal.record(&state, &frame);
            self.finished_with = Some(final_frame);
            Ok(())
        }

        fn halt_motion(&mut self, _motion_id: u32) -> HelixResult<()> {
            self.halted = true;
            Ok(())
        }

        fn control_fault(&mut self, message: String) -> HelixError {
            HelixError::Control {
                log: Some(self.journal.drain()),
                message,
            }
        }

        fn realtime_mode(&self) -> RealtimeMode {
            RealtimeMode::Relaxed
        }
    }

    type PositionCallback = fn(&ArmState, &Duration) -> JointPositions;

    fn relaxed_limits() -> GuardLimits {
        GuardLimits::default()
    }

    #[test]
    fn zero_callbacks_are_rejected_before_any_io() {
        let mut arm = FakeArm::with_states(Vec::new());
        let result = ControlLoop::<_, JointPositions, PositionCallback>::new(
            &mut arm,
            None,
            None,
            WireRegime::JointImpedance,
            relaxed_limits(),
            true,
        );
        assert!(matches!(result, Err(HelixError::Contract { .. })));
        assert_eq!(arm.started, 0);
        assert!(arm.sent.is_empty());
    }

    #[test]
    fn stop_marker_halts_without_sending_and_ends_the_session() {
        let mut arm = FakeArm::scripted(32, [0.1; 7]);
        let stop_cycle = 5;
        let mut motion_calls = 0;
        let mut torque_calls = 0;
        let mut torque_callback = |_state: &ArmState, _dt: &Duration| {
            torque_calls += 1;
            JointTorques::new([0.; 7])
        };
        let motion_callback = |state: &ArmState, _dt: &Duration| {
            motion_calls += 1;
            let command = JointPositions::new(state.q_d);
            if motion_calls > stop_cycle {
                command.stopped()
            } else {
                command
            }
        };
        let mut control_loop = ControlLoop::new(
            &mut arm,
            Some(motion_callback),
            Some(&mut torque_callback),
            WireRegime::ExternalTorque,
            relaxed_limits(),
            true,
        )
        .unwrap();
        control_loop.run().unwrap();
        assert!(arm.halted);
        assert!(arm.finished_with.is_none());
        // Cycles 1..=stop_cycle sent a command; the stopping cycle did not.
        assert_eq!(arm.sent.len(), stop_cycle);
        assert_eq!(motion_calls, stop_cycle + 1);
        // The torque callback was not consulted in the stopping cycle.
        assert_eq!(torque_calls, stop_cycle);
    }

    #[test]
    fn finish_marker_ends_successfully_and_journals_the_final_cycle() {
        let mut arm = FakeArm::scripted(32, [0.2; 7]);
        let mut calls = 0;
        let motion_callback = move |state: &ArmState, _dt: &Duration| {
            calls += 1;
            let command = JointPositions::new(state.q_d);
            if calls > 3 {
                command.finished()
            } else {
                command
            }
        };
        let mut control_loop = ControlLoop::new(
            &mut arm,
            Some(motion_callback),
            None,
            WireRegime::JointImpedance,
            relaxed_limits(),
            true,
        )
        .unwrap();
        control_loop.run().unwrap();
        let final_frame = arm.finished_with.expect("motion should have finished");
        assert!(final_frame.finished);
        assert_eq!(final_frame.q_c, [0.2; 7]);
        assert!(!arm.halted);
        let last = arm.journal.last().expect("final cycle must be journaled");
        assert_eq!(last.command.joint_positions, [0.2; 7]);
    }

    #[test]
    fn discontinuity_faults_on_exactly_the_offending_cycle() {
        let mut arm = FakeArm::scripted(64, [0.; 7]);
        let mut limits = relaxed_limits();
        limits.joint_velocity = [2.0; 7];
        let bad_cycle = 9;
        let mut calls = 0;
        let motion_callback = move |_state: &ArmState, _dt: &Duration| {
            calls += 1;
            let mut q = [0.; 7];
            if calls == bad_cycle {
                // 0.003 rad in one millisecond cycle: 3 rad/s, over the limit.
                q[4] = 0.003;
            } else if calls > bad_cycle {
                panic!("callback must not run after the rejected cycle");
            }
            JointPositions::new(q)
        };
        let mut control_loop = ControlLoop::new(
            &mut arm,
            Some(motion_callback),
            None,
            WireRegime::JointImpedance,
            limits,
            true,
        )
        .unwrap();
        let fault = control_loop.run().unwrap_err();
        match fault {
            HelixError::Control { log, message } => {
                assert!(message.contains("joint 4"));
                // Every cycle before the offending one was accepted and sent.
                assert_eq!(log.unwrap().len(), bad_cycle - 1);
            }
            other => panic!("expected a control fault, got {:?}", other),
        }
        assert_eq!(arm.sent.len(), bad_cycle - 1);
        assert!(arm.halted);
    }

    #[test]
    fn guard_bypass_lets_discontinuous_commands_through() {
        let mut arm = FakeArm::scripted(16, [0.; 7]);
        let mut limits = relaxed_limits();
        limits.joint_velocity = [2.0; 7];
        let mut calls = 0;
        let motion_callback = move |_state: &ArmState, _dt: &Duration| {
            calls += 1;
            let mut q = [0.; 7];
            q[0] = 0.003 * calls as f64;
            let command = JointPositions::new(q);
            if calls == 4 {
                command.finished()
            } else {
                command
            }
        };
        let mut control_loop = ControlLoop::new(
            &mut arm,
            Some(motion_callback),
            None,
            WireRegime::JointImpedance,
            limits,
            false,
        )
        .unwrap();
        control_loop.run().unwrap();
        assert!(arm.finished_with.is_some());
    }

    #[test]
    fn safety_trip_faults_with_the_previous_cycle_as_last_entry() {
        let trip_snapshot = 50;
        let mut arm = FakeArm::scripted(64, [0.; 7]);
        arm.states[trip_snapshot - 1].flags.joint_reflex = true;
        let mut calls = 0;
        let motion_callback = move |_state: &ArmState, _dt: &Duration| {
            calls += 1;
            let mut q = [0.; 7];
            q[0] = 1e-6 * calls as f64;
            JointPositions::new(q)
        };
        let mut control_loop = ControlLoop::new(
            &mut arm,
            Some(motion_callback),
            None,
            WireRegime::JointImpedance,
            relaxed_limits(),
            true,
        )
        .unwrap();
        let fault = control_loop.run().unwrap_err();
        match fault {
            HelixError::Control { log, message } => {
                assert!(message.contains("JointReflex"));
                let log = log.unwrap();
                // Snapshot 50 tripped, so the 49th cycle's command is the
                // newest journal entry.
                let last = log.last().unwrap();
                assert!((last.command.joint_positions[0] - 1e-6 * 49.).abs() < 1e-12);
            }
            other => panic!("expected a control fault, got {:?}", other),
        }
    }

    #[test]
    fn torque_only_sessions_hold_the_seeded_motion_frame() {
        let mut arm = FakeArm::scripted(16, [0.; 7]);
        let mut calls = 0;
        let mut torque_callback = |_state: &ArmState, _dt: &Duration| {
            calls += 1;
            let command = JointTorques::new([0.05; 7]);
            if calls == 5 {
                command.finished()
            } else {
                command
            }
        };
        let mut control_loop = ControlLoop::<_, JointVelocities, _>::new(
            &mut arm,
            None::<fn(&ArmState, &Duration) -> JointVelocities>,
            Some(&mut torque_callback),
            WireRegime::ExternalTorque,
            relaxed_limits(),
            true,
        )
        .unwrap();
        control_loop.run().unwrap();
        assert_eq!(arm.sent.len(), 5);
        for frame in &arm.sent {
            assert_eq!(frame.motion.dq_c, [0.; 7]);
            assert_eq!(frame.torque.tau_c, [0.05; 7]);
        }
        assert!(arm.finished_with.is_some());
    }

    #[test]
    fn torque_stop_wins_over_motion_run() {
        let mut arm = FakeArm::scripted(16, [0.; 7]);
        let motion_callback =
            |state: &ArmState, _dt: &Duration| JointPositions::new(state.q_d);
        let mut calls = 0;
        let mut torque_callback = |_state: &ArmState, _dt: &Duration| {
            calls += 1;
            let command = JointTorques::new([0.; 7]);
            if calls == 3 {
                command.stopped()
            } else {
                command
            }
        };
        let mut control_loop = ControlLoop::new(
            &mut arm,
            Some(motion_callback),
            Some(&mut torque_callback),
            WireRegime::ExternalTorque,
            relaxed_limits(),
            true,
        )
        .unwrap();
        control_loop.run().unwrap();
        assert!(arm.halted);
        assert_eq!(arm.sent.len(), 2);
    }
}
