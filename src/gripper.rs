//! Contains the [`Gripper`] type.
//!
//! The gripper speaks a plain request/response protocol: none of its
//! operations are cyclic or real-time, each one either succeeds or raises a
//! command fault.

use std::time::Duration;

use crate::error::{command_fault, HelixError, HelixResult};
use crate::gripper::state::GripperState;
use crate::gripper::wire::{
    GripperCommand, GripperCommandHeader, GripperConnectRequest, GripperConnectRequestWithHeader,
    GripperConnectResponse, GripperGraspRequest, GripperGraspRequestWithHeader,
    GripperMoveRequest, GripperMoveRequestWithHeader, GripperResponse, GripperStateFrame,
    GripperStatus, GRIPPER_PORT, GRIPPER_VERSION,
};
use crate::network::{message_size, Network};

pub mod state;
pub(crate) mod wire;

/// Default deviation between commanded and grasped width that still counts as
/// a successful grasp, in \[m\].
const DEFAULT_GRASP_EPSILON: f64 = 0.005;

/// Maintains a connection to the gripper server, provides the current gripper
/// state and executes commands.
pub struct Gripper {
    network: Network,
    server_version: u16,
}

impl Gripper {
    /// Establishes a connection with the gripper of the arm at the given
    /// address.
    ///
    /// # Errors
    /// * [`Network`](`crate::HelixError::Network`) if the server is
    ///   unreachable.
    /// * [`IncompatibleVersion`](`crate::HelixError::IncompatibleVersion`) if
    ///   the server speaks a different protocol version.
    pub fn new(address: &str) -> HelixResult<Gripper> {
        Gripper::connect(address, GRIPPER_PORT)
    }

    pub(crate) fn connect(address: &str, port: u16) -> HelixResult<Gripper> {
        let mut network = Network::connect(
            address,
            port,
            Duration::from_secs(5),
            Duration::from_secs(1),
        )?;
        let command_id = network.next_command_id();
        let mut request = GripperConnectRequestWithHeader {
            header: GripperCommandHeader::new(GripperCommand::Connect, command_id, 0),
            request: GripperConnectRequest {
                version: GRIPPER_VERSION,
                cyclic_port: network.udp_port(),
            },
        };
        request.header.size = message_size(&request);
        network.tcp_send_request(&request)?;
        let response: GripperConnectResponse = network.tcp_blocking_receive(command_id)?;
        if response.status != GripperStatus::Success {
            return Err(HelixError::IncompatibleVersion {
                server_version: response.version,
                library_version: GRIPPER_VERSION,
            });
        }
        Ok(Gripper {
            network,
            server_version: response.version,
        })
    }

    /// Performs homing to calibrate the maximum grasping width.
    ///
    /// # Return
    /// True if the command was successful, false otherwise.
    pub fn homing(&mut self) -> HelixResult<bool> {
        let command_id = self.network.next_command_id();
        let mut request = GripperCommandHeader::new(GripperCommand::Home, command_id, 0);
        request.size = message_size(&request);
        self.network.tcp_send_request(&request)?;
        let response: GripperResponse = self.network.tcp_blocking_receive(command_id)?;
        handle_response_status(response.status)
    }

    /// Moves the fingers to a specified width.
    ///
    /// # Arguments
    /// * `width` - Intended opening width in \[m\].
    /// * `speed` - Closing speed in \[m/s\].
    /// # Return
    /// True if the command was successful, false otherwise.
    pub fn move_fingers(&mut self, width: f64, speed: f64) -> HelixResult<bool> {
        let command_id = self.network.next_command_id();
        let mut request = GripperMoveRequestWithHeader {
            header: GripperCommandHeader::new(GripperCommand::Move, command_id, 0),
            request: GripperMoveRequest { width, speed },
        };
        request.header.size = message_size(&request);
        self.network.tcp_send_request(&request)?;
        let response: GripperResponse = self.network.tcp_blocking_receive(command_id)?;
        handle_response_status(response.status)
    }

    /// Grasps an object. The grasp counts as successful if the final finger
    /// distance `d` satisfies `width - epsilon_inner < d < width +
    /// epsilon_outer`.
    ///
    /// # Arguments
    /// * `width` - Size of the object to grasp in \[m\].
    /// * `speed` - Closing speed in \[m/s\].
    /// * `force` - Grasping force in \[N\].
    /// * `epsilon_inner` - Tolerated deviation below `width`. Default 0.005.
    /// * `epsilon_outer` - Tolerated deviation above `width`. Default 0.005.
    /// # Return
    /// True if an object has been grasped, false otherwise.
    pub fn grasp<EI: Into<Option<f64>>, EO: Into<Option<f64>>>(
        &mut self,
        width: f64,
        speed: f64,
        force: f64,
        epsilon_inner: EI,
        epsilon_outer: EO,
    ) -> HelixResult<bool> {
        let command_id = self.network.next_command_id();
        let mut request = GripperGraspRequestWithHeader {
            header: GripperCommandHeader::new(GripperCommand::Grasp, command_id, 0),
            request: GripperGraspRequest {
                width,
                epsilon_inner: epsilon_inner.into().unwrap_or(DEFAULT_GRASP_EPSILON),
                epsilon_outer: epsilon_outer.into().unwrap_or(DEFAULT_GRASP_EPSILON),
                speed,
                force,
            },
        };
        request.header.size = message_size(&request);
        self.network.tcp_send_request(&request)?;
        let response: GripperResponse = self.network.tcp_blocking_receive(command_id)?;
        handle_response_status(response.status)
    }

    /// Stops a currently running move or grasp.
    ///
    /// # Return
    /// True if the command was successful, false otherwise.
    pub fn stop(&mut self) -> HelixResult<bool> {
        let command_id = self.network.next_command_id();
        let mut request = GripperCommandHeader::new(GripperCommand::Stop, command_id, 0);
        request.size = message_size(&request);
        self.network.tcp_send_request(&request)?;
        let response: GripperResponse = self.network.tcp_blocking_receive(command_id)?;
        handle_response_status(response.status)
    }

    /// Waits for the next gripper state update and returns it.
    pub fn read_once(&mut self) -> HelixResult<GripperState> {
        while self.network.udp_receive::<GripperStateFrame>().is_some() {}
        Ok(self
            .network
            .udp_blocking_receive::<GripperStateFrame>()?
            .into())
    }

    /// Protocol version reported by the connected server.
    pub fn server_version(&self) -> u16 {
        self.server_version
    }
}

fn handle_response_status(status: GripperStatus) -> HelixResult<bool> {
    match status {
        GripperStatus::Success => Ok(true),
        GripperStatus::Unsuccessful => Ok(false),
        GripperStatus::Fail => Err(command_fault("gripper command failed")),
        GripperStatus::Aborted => Err(command_fault("gripper command aborted")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bincode::{deserialize, serialize, serialized_size};
    use mockall::automock;
    use std::io::{Read, Write};
    use std::net::{TcpListener, UdpSocket};
    use std::thread;
    use std::time::{Duration, Instant};

    pub struct ServerReaction {}

    #[automock]
    #[allow(unused)]
    impl ServerReaction {
        fn process_received_bytes(&self, bytes: &mut Vec<u8>) -> Vec<u8> {
            Vec::new()
        }
        fn number_of_reactions(&self) -> usize {
            0
        }
    }

    struct GripperMockServer {
        port: u16,
        server_version: u16,
    }

    impl GripperMockServer {
        fn new(port: u16, server_version: u16) -> Self {
            GripperMockServer {
                port,
                server_version,
            }
        }

        fn server_thread(&mut self, reaction: &mut MockServerReaction) {
            let listener = TcpListener::bind(("127.0.0.1", self.port)).unwrap();
            let (mut tcp_socket, _) = listener.accept().unwrap();
            tcp_socket.set_nodelay(true).unwrap();

            let mut bytes = vec![0_u8; 100];
            let read = tcp_socket.read(&mut bytes).unwrap();
            let request: GripperConnectRequestWithHeader =
                deserialize(&bytes[..read]).unwrap();
            let cyclic_port = request.request.cyclic_port;
            let status = if request.request.version == self.server_version {
                GripperStatus::Success
            } else {
                GripperStatus::Fail
            };
            let mut response = GripperConnectResponse {
                header: GripperCommandHeader::new(
                    GripperCommand::Connect,
                    request.header.command_id,
                    0,
                ),
                status,
                version: self.server_version,
            };
            response.header.size = serialized_size(&response).unwrap() as u32;
            tcp_socket.write_all(&serialize(&response).unwrap()).unwrap();

            let udp_socket = UdpSocket::bind(("127.0.0.1", 0)).unwrap();
            udp_socket.connect(("127.0.0.1", cyclic_port)).unwrap();
            let udp_thread = thread::spawn(move || {
                let mut counter = 1;
                let start = Instant::now();
                while start.elapsed().as_secs_f64() < 0.1 {
                    let frame = GripperStateFrame {
                        message_id: counter,
                        width: 0.02,
                        max_width: 0.08,
                        grasped: false,
                        temperature: 28,
                    };
                    counter += 1;
                    let _ = udp_socket.send(&serialize(&frame).unwrap());
                    thread::sleep(Duration::from_millis(5));
                }
            });

            for _ in 0..reaction.number_of_reactions() {
                let mut bytes = vec![0_u8; 100];
                let read = tcp_socket.read(&mut bytes).unwrap();
                bytes.truncate(read);
                let response = reaction.process_received_bytes(&mut bytes);
                tcp_socket.write_all(&response).unwrap();
            }
            udp_thread.join().unwrap();
        }
    }

    #[test]
    fn gripper_move() {
        let port = 28431;
        let move_request_values = [(0.1, 0.5), (0.03, 0.1)];
        let thread = thread::spawn(move || {
            let mut server = GripperMockServer::new(port, GRIPPER_VERSION);
            let mut mock = MockServerReaction::default();
            let mut counter = 0;
            mock.expect_process_received_bytes()
                .returning(move |bytes: &mut Vec<u8>| -> Vec<u8> {
                    let request: GripperMoveRequestWithHeader = deserialize(bytes).unwrap();
                    let (width, speed) = move_request_values[counter];
                    counter += 1;
                    assert_eq!(request.header.command, GripperCommand::Move);
                    assert_eq!(request.request.width, width);
                    assert_eq!(request.request.speed, speed);
                    let mut response = GripperResponse {
                        header: GripperCommandHeader::new(
                            GripperCommand::Move,
                            request.header.command_id,
                            0,
                        ),
                        status: GripperStatus::Success,
                    };
                    response.header.size = serialized_size(&response).unwrap() as u32;
                    serialize(&response).unwrap()
                })
                .times(move_request_values.len());
            mock.expect_number_of_reactions()
                .return_const(move_request_values.len());
            server.server_thread(&mut mock);
        });
        thread::sleep(Duration::from_millis(10));
        let mut gripper = Gripper::connect("127.0.0.1", port).expect("gripper failure");
        assert_eq!(gripper.server_version(), GRIPPER_VERSION);
        for (width, speed) in move_request_values.iter() {
            assert!(gripper.move_fingers(*width, *speed).unwrap());
        }
        thread.join().unwrap();
    }

    #[test]
    fn gripper_homing_and_stop() {
        let port = 28432;
        let expected = [GripperCommand::Home, GripperCommand::Stop];
        let thread = thread::spawn(move || {
            let mut server = GripperMockServer::new(port, GRIPPER_VERSION);
            let mut mock = MockServerReaction::default();
            let mut counter = 0;
            mock.expect_process_received_bytes()
                .returning(move |bytes: &mut Vec<u8>| -> Vec<u8> {
                    let request: GripperCommandHeader = deserialize(bytes).unwrap();
                    assert_eq!(request.command, expected[counter]);
                    counter += 1;
                    let mut response = GripperResponse {
                        header: GripperCommandHeader::new(
                            request.command,
                            request.command_id,
                            0,
                        ),
                        status: GripperStatus::Success,
                    };
                    response.header.size = serialized_size(&response).unwrap() as u32;
                    serialize(&response).unwrap()
                })
                .times(expected.len());
            mock.expect_number_of_reactions().return_const(expected.len());
            server.server_thread(&mut mock);
        });
        thread::sleep(Duration::from_millis(10));
        let mut gripper = Gripper::connect("127.0.0.1", port).expect("gripper failure");
        assert!(gripper.homing().unwrap());
        assert!(gripper.stop().unwrap());
        thread.join().unwrap();
    }

    #[test]
    fn gripper_grasp_carries_epsilons() {
        let port = 28433;
        let thread = thread::spawn(move || {
            let mut server = GripperMockServer::new(port, GRIPPER_VERSION);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|bytes: &mut Vec<u8>| -> Vec<u8> {
                    let request: GripperGraspRequestWithHeader = deserialize(bytes).unwrap();
                    assert_eq!(request.request.width, 0.05);
                    assert_eq!(request.request.epsilon_inner, 0.004);
                    assert_eq!(request.request.epsilon_outer, 0.005);
                    assert_eq!(request.request.speed, 0.1);
                    assert_eq!(request.request.force, 40.);
                    let mut response = GripperResponse {
                        header: GripperCommandHeader::new(
                            GripperCommand::Grasp,
                            request.header.command_id,
                            0,
                        ),
                        status: GripperStatus::Unsuccessful,
                    };
                    response.header.size = serialized_size(&response).unwrap() as u32;
                    serialize(&response).unwrap()
                })
                .times(1);
            mock.expect_number_of_reactions().return_const(1_usize);
            server.server_thread(&mut mock);
        });
        thread::sleep(Duration::from_millis(10));
        let mut gripper = Gripper::connect("127.0.0.1", port).expect("gripper failure");
        // epsilon_outer falls back to the default
        let grasped = gripper.grasp(0.05, 0.1, 40., 0.004, None).unwrap();
        assert!(!grasped);
        thread.join().unwrap();
    }

    #[test]
    fn incompatible_version_is_rejected() {
        let port = 28434;
        let thread = thread::spawn(move || {
            let mut server = GripperMockServer::new(port, GRIPPER_VERSION + 1);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|_bytes| Vec::new());
            mock.expect_number_of_reactions().return_const(0_usize);
            server.server_thread(&mut mock);
        });
        thread::sleep(Duration::from_millis(10));
        let result = Gripper::connect("127.0.0.1", port);
        match result {
            Err(HelixError::IncompatibleVersion { server_version, .. }) => {
                assert_eq!(server_version, GRIPPER_VERSION + 1);
            }
            other => panic!("expected an incompatible version fault, got {:?}", other.err()),
        }
        thread.join().unwrap();
    }

    #[test]
    fn gripper_read_once() {
        let port = 28435;
        let thread = thread::spawn(move || {
            let mut server = GripperMockServer::new(port, GRIPPER_VERSION);
            let mut mock = MockServerReaction::default();
            mock.expect_process_received_bytes()
                .returning(|_bytes| Vec::new());
            mock.expect_number_of_reactions().return_const(0_usize);
            server.server_thread(&mut mock);
        });
        thread::sleep(Duration::from_millis(10));
        let mut gripper = Gripper::connect("127.0.0.1", port).expect("gripper failure");
        let state = gripper.read_once().expect("could not read gripper state");
        assert_eq!(state.max_width, 0.08);
        assert!(!state.grasped);
        thread.join().unwrap();
    }
}
