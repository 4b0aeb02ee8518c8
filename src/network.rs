//! TCP command channel and UDP cyclic channel shared by the arm and gripper
//! clients.
//!
//! The TCP side is a request/response protocol: every request starts with a
//! 10-byte header carrying a command tag, a client-assigned command id and the
//! total message size. Responses echo the command id, which lets the client
//! match out-of-order replies. The UDP side carries the fixed-size cyclic
//! frames of a control session.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::net::TcpStream as StdTcpStream;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::os::unix::io::AsRawFd;
use std::str::FromStr;
use std::time::{Duration, Instant};

use mio::net::{TcpStream, UdpSocket};
use mio::{Events, Interest, Poll, Token};
use nix::sys::socket::setsockopt;
use nix::sys::socket::sockopt::{KeepAlive, TcpKeepCount, TcpKeepIdle, TcpKeepInterval};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

use crate::error::{HelixError, HelixResult};

const CLIENT: Token = Token(1);

/// Interval between poll wakeups while waiting for a TCP response.
const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Implemented by every outbound TCP message so the transport can return the
/// command id it was sent under.
pub trait MessageCommand {
    fn message_id(&self) -> u32;
}

/// Leading bytes shared by every TCP message, read before the concrete
/// response type is known.
#[derive(Serialize, Deserialize, Debug, Copy, Clone)]
struct ResponseHeader {
    kind: u16,
    command_id: u32,
    size: u32,
}

/// Encoded size of [`ResponseHeader`]: u16 + u32 + u32.
const WIRE_HEADER_LEN: usize = 10;

/// Upper bound for a single cyclic datagram.
const MAX_DATAGRAM: usize = 4096;

pub struct Network {
    tcp_socket: TcpStream,
    udp_socket: UdpSocket,
    udp_server_address: SocketAddr,
    udp_port: u16,
    udp_timeout: Duration,
    tcp_timeout: Duration,
    command_id: u32,
    pending_response: Vec<u8>,
    pending_response_len: usize,
    pending_command_id: u32,
    received_responses: HashMap<u32, Vec<u8>>,
    poll_tcp: Poll,
    events_tcp: Events,
    poll_udp: Poll,
    events_udp: Events,
}

impl Network {
    /// Opens the TCP command connection and binds the UDP cyclic socket.
    ///
    /// `tcp_timeout` bounds every blocking wait for a TCP response;
    /// `udp_timeout` bounds every blocking wait for a cyclic frame. Both are
    /// fatal on expiry, there is no internal retry.
    pub fn connect(
        address: &str,
        port: u16,
        tcp_timeout: Duration,
        udp_timeout: Duration,
    ) -> HelixResult<Network> {
        let sock_address = format!("{}:{}", address, port)
            .to_socket_addrs()
            .map_err(|e| network_fault(format!("cannot resolve {}: {}", address, e)))?
            .next()
            .ok_or_else(|| network_fault(format!("no address found for {}", address)))?;
        let mut tcp_socket = TcpStream::from_std(
            StdTcpStream::connect(sock_address)
                .map_err(|e| network_fault(format!("connection to {} failed: {}", address, e)))?,
        );
        let fd = tcp_socket.as_raw_fd();
        setsockopt(fd, KeepAlive, &true).map_err(keepalive_fault)?;
        setsockopt(fd, TcpKeepIdle, &1).map_err(keepalive_fault)?;
        setsockopt(fd, TcpKeepCount, &3).map_err(keepalive_fault)?;
        setsockopt(fd, TcpKeepInterval, &1).map_err(keepalive_fault)?;

        let any = SocketAddr::new(IpAddr::from_str("0.0.0.0").unwrap(), 0);
        let mut udp_socket = UdpSocket::bind(any)
            .map_err(|e| network_fault(format!("cannot bind cyclic socket: {}", e)))?;
        let udp_port = udp_socket
            .local_addr()
            .map_err(|e| network_fault(e.to_string()))?
            .port();

        let poll_tcp = Poll::new().map_err(|e| network_fault(e.to_string()))?;
        poll_tcp
            .registry()
            .register(&mut tcp_socket, CLIENT, Interest::READABLE)
            .map_err(|e| network_fault(e.to_string()))?;
        let poll_udp = Poll::new().map_err(|e| network_fault(e.to_string()))?;
        poll_udp
            .registry()
            .register(&mut udp_socket, CLIENT, Interest::READABLE)
            .map_err(|e| network_fault(e.to_string()))?;

        Ok(Network {
            tcp_socket,
            udp_socket,
            udp_server_address: any,
            udp_port,
            udp_timeout,
            tcp_timeout,
            command_id: 0,
            pending_response: Vec::new(),
            pending_response_len: 0,
            pending_command_id: 0,
            received_responses: HashMap::new(),
            poll_tcp,
            events_tcp: Events::with_capacity(128),
            poll_udp,
            events_udp: Events::with_capacity(1),
        })
    }

    /// Returns a fresh command id for the next request.
    pub fn next_command_id(&mut self) -> u32 {
        let id = self.command_id;
        self.command_id += 1;
        id
    }

    pub fn udp_port(&self) -> u16 {
        self.udp_port
    }

    pub fn tcp_send_request<T: Serialize + MessageCommand + Debug>(
        &mut self,
        request: &T,
    ) -> HelixResult<u32> {
        let encoded = encode(request)?;
        self.tcp_socket
            .write_all(&encoded)
            .map_err(|e| network_fault(format!("request send failed: {}", e)))?;
        Ok(request.message_id())
    }

    /// Blocks until the response with the given command id arrives and
    /// decodes it. Fails with a network fault once the configured response
    /// deadline expires.
    pub fn tcp_blocking_receive<T: DeserializeOwned + Debug + 'static>(
        &mut self,
        command_id: u32,
    ) -> HelixResult<T> {
        let deadline = Instant::now() + self.tcp_timeout;
        loop {
            self.tcp_read_from_buffer(RESPONSE_POLL_INTERVAL)?;
            if let Some(bytes) = self.received_responses.remove(&command_id) {
                return decode(&bytes);
            }
            if Instant::now() >= deadline {
                return Err(network_fault(format!(
                    "no response to command {} within {:?}",
                    command_id, self.tcp_timeout
                )));
            }
        }
    }

    /// Tries to receive the response with the given command id without
    /// blocking. Invokes `handler` and consumes the response if it has
    /// arrived.
    ///
    /// Returns `Ok(true)` once the response was handled, `Ok(false)` while it
    /// is still outstanding, and the handler's error otherwise.
    pub fn tcp_try_receive<T, F>(&mut self, command_id: u32, handler: F) -> HelixResult<bool>
    where
        F: FnOnce(T) -> HelixResult<()>,
        T: DeserializeOwned + Debug + 'static,
    {
        self.tcp_read_from_buffer(Duration::from_micros(0))?;
        let bytes = match self.received_responses.get(&command_id) {
            Some(bytes) => bytes,
            None => return Ok(false),
        };
        let message: T = decode(bytes)?;
        handler(message)?;
        self.received_responses.remove(&command_id);
        Ok(true)
    }

    /// Returns the next cyclic frame if one is already queued on the socket.
    pub fn udp_receive<T: Debug + DeserializeOwned + 'static>(&mut self) -> Option<T> {
        let mut buffer = [0; MAX_DATAGRAM];
        let available = self.udp_socket.peek(&mut buffer).ok()?;
        if available > 0 {
            return self.udp_blocking_receive().ok();
        }
        None
    }

    /// Blocks until the next cyclic frame arrives, bounded by the inter-cycle
    /// timeout.
    pub fn udp_blocking_receive<T: Debug + DeserializeOwned + 'static>(
        &mut self,
    ) -> HelixResult<T> {
        self.poll_udp
            .poll(&mut self.events_udp, Some(self.udp_timeout))
            .map_err(|e| network_fault(e.to_string()))?;
        for event in self.events_udp.iter() {
            if event.token() == CLIENT && event.is_readable() {
                let mut buffer = [0; MAX_DATAGRAM];
                let (read_bytes, sender) = self
                    .udp_socket
                    .recv_from(&mut buffer)
                    .map_err(|e| network_fault(format!("cyclic receive failed: {}", e)))?;
                self.udp_server_address = sender;
                return decode(&buffer[..read_bytes]);
            }
        }
        Err(network_fault(format!(
            "no cyclic frame within {:?}",
            self.udp_timeout
        )))
    }

    pub fn udp_send<T: Debug + Serialize>(&mut self, data: &T) -> HelixResult<()> {
        let encoded = encode(data)?;
        let sent = self
            .udp_socket
            .send_to(&encoded, self.udp_server_address)
            .map_err(|e| network_fault(format!("cyclic send failed: {}", e)))?;
        if sent != encoded.len() {
            return Err(network_fault("cyclic frame was sent truncated".to_string()));
        }
        Ok(())
    }

    /// Drains readable TCP bytes into the per-command-id response map.
    ///
    /// Responses may arrive fragmented; a partially read response is kept in
    /// `pending_response` until its full `size` has been received.
    fn tcp_read_from_buffer(&mut self, timeout: Duration) -> HelixResult<()> {
        self.poll_tcp
            .poll(&mut self.events_tcp, Some(timeout))
            .map_err(|e| network_fault(e.to_string()))?;
        for event in self.events_tcp.iter() {
            if event.token() != CLIENT || !event.is_readable() {
                continue;
            }
            let mut probe = [0_u8; 70000];
            let mut available = match self.tcp_socket.peek(&mut probe) {
                Ok(n) => n,
                Err(e) => {
                    return Err(network_fault(format!("command channel lost: {}", e)));
                }
            };
            if self.pending_response.is_empty() && available >= WIRE_HEADER_LEN {
                let mut header_bytes = vec![0; WIRE_HEADER_LEN];
                self.tcp_socket
                    .read_exact(&mut header_bytes)
                    .map_err(|e| network_fault(e.to_string()))?;
                available -= WIRE_HEADER_LEN;
                let header: ResponseHeader = decode(&header_bytes)?;
                if (header.size as usize) < WIRE_HEADER_LEN {
                    return Err(HelixError::Protocol {
                        message: format!("response header claims {} bytes", header.size),
                    });
                }
                self.pending_response = header_bytes;
                self.pending_response_len = header.size as usize;
                self.pending_command_id = header.command_id;
            }
            if !self.pending_response.is_empty() {
                let missing = self.pending_response_len - self.pending_response.len();
                let readable = usize::min(available, missing);
                if readable > 0 {
                    let mut body = vec![0; readable];
                    self.tcp_socket
                        .read_exact(&mut body)
                        .map_err(|e| network_fault(e.to_string()))?;
                    self.pending_response.append(&mut body);
                }
                if self.pending_response.len() == self.pending_response_len {
                    self.received_responses.insert(
                        self.pending_command_id,
                        std::mem::take(&mut self.pending_response),
                    );
                    self.pending_response_len = 0;
                    self.pending_command_id = 0;
                }
            }
        }
        Ok(())
    }
}

/// Encoded size of a message, written into its header before sending.
pub(crate) fn message_size<T: Serialize>(message: &T) -> u32 {
    bincode::serialized_size(message).map(|size| size as u32).unwrap_or(0)
}

fn network_fault(message: String) -> HelixError {
    HelixError::Network { message }
}

fn keepalive_fault(e: nix::Error) -> HelixError {
    network_fault(format!("cannot configure keepalive: {}", e))
}

fn encode<T: Serialize>(value: &T) -> HelixResult<Vec<u8>> {
    bincode::serialize(value).map_err(|e| HelixError::Protocol {
        message: format!("message could not be encoded: {}", e),
    })
}

fn decode<T: DeserializeOwned + Debug>(bytes: &[u8]) -> HelixResult<T> {
    bincode::deserialize(bytes).map_err(|e| HelixError::Protocol {
        message: format!("malformed message from controller: {}", e),
    })
}

#[cfg(test)]
mod tests {
    use super::{decode, encode};
    use crate::arm::wire::StateFrame;

    #[test]
    fn state_frame_roundtrip() {
        let frame = StateFrame::zeroed();
        let decoded: StateFrame = decode(&encode(&frame).unwrap()).unwrap();
        assert_eq!(frame, decoded);
    }
}
