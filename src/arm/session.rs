//! Connection state of one arm: command-channel handshake, cyclic exchange,
//! motion lifetime and the diagnostic journal.

use std::time::Duration;

use tracing::{error, info};

use crate::arm::guard::GuardLimits;
use crate::arm::journal::Journal;
use crate::arm::rt::RealtimeMode;
use crate::arm::state::ArmState;
use crate::arm::wire::{
    ActiveController, ArmCommand, ArmCommandHeader, ConnectRequest,
    ConnectRequestWithHeader, ConnectResponse, ConnectStatus, CycleFrame, CycleKind, HaltResponse,
    HaltStatus, MotionFrame, MotionResponse, MotionStatus, SetCollisionThresholdsRequest,
    SetCollisionThresholdsRequestWithHeader, SetupResponse, SetupStatus, StartMotionRequest,
    StartMotionRequestWithHeader, StateFrame, StopMotionRequestWithHeader, TorqueFrame, WireRegime, COMMAND_PORT, PROTOCOL_VERSION,
};
use crate::error::{command_fault, HelixError, HelixResult};
use crate::network::{message_size, Network};

/// Per-connection configuration of a [`crate::Arm`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Whether control threads must acquire realtime scheduling.
    pub realtime: RealtimeMode,
    /// Number of recent cycles retained for fault diagnosis.
    pub journal_capacity: usize,
    /// Deadline for every command-channel response, including the connection
    /// handshake.
    pub handshake_timeout: Duration,
    /// Deadline for each cyclic state frame once a session runs.
    pub cycle_timeout: Duration,
    /// Limits applied by the continuity guard.
    pub limits: GuardLimits,
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            realtime: RealtimeMode::Enforce,
            journal_capacity: 50,
            handshake_timeout: Duration::from_secs(5),
            cycle_timeout: Duration::from_secs(1),
            limits: GuardLimits::default(),
        }
    }
}

/// The operations the control loop needs from a connection. Split out so the
/// loop can be exercised against a scripted fake.
pub(crate) trait CycleInterface {
    /// Negotiates a motion with the controller and returns its id.
    fn start_motion(&mut self, regime: WireRegime, kind: CycleKind) -> HelixResult<u32>;
    /// Sends this cycle's command, if any, then blocks for the next state.
    fn exchange(
        &mut self,
        motion: Option<&MotionFrame>,
        torque: Option<&TorqueFrame>,
    ) -> HelixResult<ArmState>;
    /// Raises a control fault if the controller reports a safety trip or
    /// ended the motion on its own.
    fn check_motion_fault(&mut self, state: &ArmState, motion_id: u32) -> HelixResult<()>;
    /// Repeats the final command with the finished flag until the controller
    /// reports idle, then collects the final motion status.
    fn finish_motion(
        &mut self,
        motion_id: u32,
        motion: &MotionFrame,
        torque: Option<&TorqueFrame>,
    ) -> HelixResult<()>;
    /// Commands an immediate halt and drains cyclic state until idle.
    fn halt_motion(&mut self, motion_id: u32) -> HelixResult<()>;
    /// Builds a control fault carrying the drained journal.
    fn control_fault(&mut self, message: String) -> HelixError;
    fn realtime_mode(&self) -> RealtimeMode;
}

/// Maps a motion status onto a command fault, `Ok` for the accepting and
/// terminal-success statuses.
pub(crate) fn check_motion_status(status: MotionStatus) -> HelixResult<()> {
    let message = match status {
        MotionStatus::Accepted | MotionStatus::Running | MotionStatus::Finished => return Ok(()),
        MotionStatus::EmergencyStop => "motion aborted: user stop pressed",
        MotionStatus::ReflexAborted => "motion aborted by a safety reflex",
        MotionStatus::InvalidInput => "motion aborted: invalid input provided",
        MotionStatus::NotInControlMode => "motion rejected: controller is not in control mode",
        MotionStatus::SingularStartPose => "motion rejected: cannot start at a singular pose",
        MotionStatus::Rejected => "motion rejected by the controller",
        MotionStatus::Preempted => "motion preempted",
        MotionStatus::Aborted => "motion aborted",
    };
    Err(command_fault(message))
}

pub(crate) struct ArmSession {
    network: Network,
    journal: Journal,
    realtime: RealtimeMode,
    server_version: u16,
    reported_kind: CycleKind,
    reported_controller: ActiveController,
    commanded_kind: CycleKind,
    commanded_controller: ActiveController,
    message_id: u64,
}

impl ArmSession {
    /// Connects to the controller, performs the version handshake and waits
    /// for the first state frame.
    pub fn connect(address: &str, config: &SessionConfig) -> HelixResult<ArmSession> {
        let mut network = Network::connect(
            address,
            COMMAND_PORT,
            config.handshake_timeout,
            config.cycle_timeout,
        )?;
        let command_id = network.next_command_id();
        let mut request = ConnectRequestWithHeader {
            header: ArmCommandHeader::new(ArmCommand::Connect, command_id, 0),
            request: ConnectRequest {
                version: PROTOCOL_VERSION,
                cyclic_port: network.udp_port(),
            },
        };
        request.header.size = message_size(&request);
        network.tcp_send_request(&request)?;
        let response: ConnectResponse = network.tcp_blocking_receive(command_id)?;
        if response.status != ConnectStatus::Success {
            return Err(HelixError::IncompatibleVersion {
                server_version: response.version,
                library_version: PROTOCOL_VERSION,
            });
        }
        let mut session = ArmSession {
            network,
            journal: Journal::new(config.journal_capacity),
            realtime: config.realtime,
            server_version: response.version,
            reported_kind: CycleKind::Idle,
            reported_controller: ActiveController::None,
            commanded_kind: CycleKind::Idle,
            commanded_controller: ActiveController::None,
            message_id: 0,
        };
        let first = session.network.udp_blocking_receive::<StateFrame>()?;
        session.note_frame(&first);
        info!(address, version = session.server_version, "connected");
        Ok(session)
    }

    pub fn server_version(&self) -> u16 {
        self.server_version
    }

    /// Waits for the next state frame outside a control session, skipping any
    /// frames that queued up since the last read.
    pub fn read_once(&mut self) -> HelixResult<ArmState> {
        while self.network.udp_receive::<StateFrame>().is_some() {}
        let frame = self.receive_state()?;
        Ok(ArmState::from(frame))
    }

    /// Configures the contact and collision detection thresholds. Rejected
    /// while a control session is running.
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
        if self.motion_running() || self.controller_running() {
            return Err(command_fault(
                "collision thresholds cannot change while a control session is running",
            ));
        }
        let command_id = self.network.next_command_id();
        let mut request = SetCollisionThresholdsRequestWithHeader {
            header: ArmCommandHeader::new(ArmCommand::SetCollisionThresholds, command_id, 0),
            request: SetCollisionThresholdsRequest {
                torque_contact_lower,
                torque_contact_upper,
                torque_collision_lower,
                torque_collision_upper,
                force_contact_lower,
                force_contact_upper,
                force_collision_lower,
                force_collision_upper,
            },
        };
        request.header.size = message_size(&request);
        self.network.tcp_send_request(&request)?;
        let response: SetupResponse = self.network.tcp_blocking_receive(command_id)?;
        match response.status {
            SetupStatus::Success => Ok(()),
            SetupStatus::NotPossible => Err(command_fault(
                "collision thresholds rejected: not possible in the current mode",
            )),
            SetupStatus::InvalidArgument => {
                Err(command_fault("collision thresholds rejected: invalid argument"))
            }
        }
    }

    fn note_frame(&mut self, frame: &StateFrame) {
        self.reported_kind = frame.cycle_kind;
        self.reported_controller = frame.controller;
        self.message_id = frame.message_id;
    }

    fn motion_running(&self) -> bool {
        self.reported_kind != CycleKind::Idle
    }

    fn controller_running(&self) -> bool {
        self.reported_controller == ActiveController::ExternalTorque
    }

    /// Receives the newest state frame, discarding any stale queued frames.
    fn receive_state(&mut self) -> HelixResult<StateFrame> {
        let mut latest: Option<StateFrame> = None;
        while let Some(frame) = self.network.udp_receive::<StateFrame>() {
            let newest = latest.map_or(self.message_id, |f| f.message_id);
            if frame.message_id > newest {
                latest = Some(frame);
            }
        }
        let frame = loop {
            if let Some(frame) = latest {
                break frame;
            }
            let frame = self.network.udp_blocking_receive::<StateFrame>()?;
            if frame.message_id > self.message_id {
                latest = Some(frame);
            }
        };
        self.note_frame(&frame);
        Ok(frame)
    }

    fn send_cycle_frame(
        &mut self,
        motion: Option<&MotionFrame>,
        torque: Option<&TorqueFrame>,
    ) -> HelixResult<Option<CycleFrame>> {
        let motion = match motion {
            Some(motion) => motion,
            None => {
                if torque.is_some() {
                    return Err(HelixError::Contract {
                        message: "a torque command needs an accompanying motion command"
                            .to_string(),
                    });
                }
                return Ok(None);
            }
        };
        if self.commanded_kind == CycleKind::Idle {
            return Err(HelixError::Contract {
                message: "no motion stream was negotiated for this connection".to_string(),
            });
        }
        if torque.is_some() && self.commanded_controller != ActiveController::ExternalTorque {
            return Err(HelixError::Contract {
                message: "no torque controller was negotiated for this connection".to_string(),
            });
        }
        if torque.is_none() && self.commanded_controller == ActiveController::ExternalTorque {
            return Err(HelixError::Contract {
                message: "the torque half of the cycle command is missing".to_string(),
            });
        }
        let frame = CycleFrame {
            message_id: self.message_id,
            motion: *motion,
            torque: torque.copied().unwrap_or_else(TorqueFrame::zeroed),
        };
        self.network.udp_send(&frame)?;
        Ok(Some(frame))
    }
}

impl CycleInterface for ArmSession {
    fn start_motion(&mut self, regime: WireRegime, kind: CycleKind) -> HelixResult<u32> {
        if self.motion_running() || self.controller_running() {
            return Err(HelixError::Contract {
                message: "a control session is already active on this connection".to_string(),
            });
        }
        self.journal.clear();
        self.commanded_kind = kind;
        self.commanded_controller = match regime {
            WireRegime::JointImpedance => ActiveController::JointImpedance,
            WireRegime::CartesianImpedance => ActiveController::CartesianImpedance,
            WireRegime::ExternalTorque => ActiveController::ExternalTorque,
        };
        let command_id = self.network.next_command_id();
        let mut request = StartMotionRequestWithHeader {
            header: ArmCommandHeader::new(ArmCommand::StartMotion, command_id, 0),
            request: StartMotionRequest { regime, kind },
        };
        request.header.size = message_size(&request);
        self.network.tcp_send_request(&request)?;
        let response: MotionResponse = self.network.tcp_blocking_receive(command_id)?;
        check_motion_status(response.status)?;
        // The accept status races with the cyclic channel; cycle until the
        // controller reports the negotiated modes.
        while self.reported_kind != self.commanded_kind
            || self.reported_controller != self.commanded_controller
        {
            match self.network.tcp_try_receive(command_id, |response: MotionResponse| {
                check_motion_status(response.status)
            }) {
                Ok(true) => break,
                Ok(false) => {}
                Err(HelixError::Command { message }) => {
                    self.commanded_kind = CycleKind::Idle;
                    self.commanded_controller = ActiveController::None;
                    return Err(HelixError::Control { log: None, message });
                }
                Err(other) => return Err(other),
            }
            self.receive_state()?;
        }
        info!(motion_id = command_id, ?kind, "control session negotiated");
        Ok(command_id)
    }

    fn exchange(
        &mut self,
        motion: Option<&MotionFrame>,
        torque: Option<&TorqueFrame>,
    ) -> HelixResult<ArmState> {
        let sent = self.send_cycle_frame(motion, torque)?;
        let frame = self.receive_state()?;
        let state = ArmState::from(frame);
        if let Some(cycle_frame) = sent {
            self.journal.record(&state, &cycle_frame);
        }
        Ok(state)
    }

    fn check_motion_fault(&mut self, state: &ArmState, motion_id: u32) -> HelixResult<()> {
        let tripped = state.flags.tripped();
        if !tripped
            && self.reported_kind == self.commanded_kind
            && self.reported_controller == self.commanded_controller
        {
            return Ok(());
        }
        // The controller ended the motion; its final status explains why.
        let message = match self.network.tcp_blocking_receive::<MotionResponse>(motion_id) {
            Ok(response) => match check_motion_status(response.status) {
                Ok(()) => "motion ended by the controller".to_string(),
                Err(fault) => fault.to_string(),
            },
            Err(fault) => fault.to_string(),
        };
        let message = if tripped {
            format!("{}, active safety flags: {}", message, state.flags)
        } else {
            message
        };
        self.commanded_kind = CycleKind::Idle;
        self.commanded_controller = ActiveController::None;
        Err(self.control_fault(message))
    }

    fn finish_motion(
        &mut self,
        motion_id: u32,
        motion: &MotionFrame,
        torque: Option<&TorqueFrame>,
    ) -> HelixResult<()> {
        let mut final_frame = *motion;
        final_frame.finished = true;
        while self.motion_running() || self.controller_running() {
            self.exchange(Some(&final_frame), torque)?;
        }
        let response: MotionResponse = self.network.tcp_blocking_receive(motion_id)?;
        self.commanded_kind = CycleKind::Idle;
        self.commanded_controller = ActiveController::None;
        match check_motion_status(response.status) {
            Ok(()) => {
                info!(motion_id, "motion finished");
                Ok(())
            }
            Err(fault) => Err(self.control_fault(format!(
                "motion finish was commanded but the controller reports: {}",
                fault
            ))),
        }
    }

    fn halt_motion(&mut self, motion_id: u32) -> HelixResult<()> {
        let command_id = self.network.next_command_id();
        let mut request = StopMotionRequestWithHeader {
            header: ArmCommandHeader::new(ArmCommand::StopMotion, command_id, 0),
        };
        request.header.size = message_size(&request);
        self.network.tcp_send_request(&request)?;
        let response: HaltResponse = self.network.tcp_blocking_receive(command_id)?;
        match response.status {
            HaltStatus::Success | HaltStatus::NotRunning => {}
            HaltStatus::EmergencyStop => {
                return Err(command_fault("halt aborted: user stop pressed"))
            }
            HaltStatus::Aborted => return Err(command_fault("halt command aborted")),
        }
        while self.motion_running() || self.controller_running() {
            self.receive_state()?;
        }
        // The aborted motion's final status may arrive late; consume it if it
        // is already here.
        let _ = self
            .network
            .tcp_try_receive(motion_id, |_: MotionResponse| Ok(()));
        self.commanded_kind = CycleKind::Idle;
        self.commanded_controller = ActiveController::None;
        info!(motion_id, "motion halted");
        Ok(())
    }

    fn control_fault(&mut self, message: String) -> HelixError {
        error!(%message, "control fault");
        HelixError::Control {
            log: Some(self.journal.drain()),
            message,
        }
    }

    fn realtime_mode(&self) -> RealtimeMode {
        self.realtime
    }
}
