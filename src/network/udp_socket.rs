//! The default UDP implementation of [`NonBlockingSocket`].

use std::{
    io::ErrorKind,
    net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket},
};

use tracing::warn;

use crate::{LobbyError, NonBlockingSocket};

/// Size of the reused receive buffer. Larger than any datagram the lobby
/// protocol produces; a full 200-game list batch fits with room to spare.
const RECV_BUFFER_SIZE: usize = 4096;

/// A simple non-blocking UDP socket for lobby sessions. Listens on 0.0.0.0
/// on a given port.
///
/// The receive buffer is reused across `receive_all` calls to keep the
/// per-tick poll allocation-free until a datagram actually arrives.
#[derive(Debug)]
pub struct UdpNonBlockingSocket {
    socket: UdpSocket,
    /// Receive buffer - reused across recv_from calls
    recv_buffer: [u8; RECV_BUFFER_SIZE],
}

impl UdpNonBlockingSocket {
    /// Binds a UDP socket to 0.0.0.0:port and sets it to non-blocking mode.
    /// Pass port 0 to let the OS pick one.
    pub fn bind_to_port(port: u16) -> Result<Self, LobbyError> {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port);
        let socket = UdpSocket::bind(addr).map_err(|e| LobbyError::Socket {
            context: format!("binding to {addr}: {e}"),
        })?;
        socket
            .set_nonblocking(true)
            .map_err(|e| LobbyError::Socket {
                context: format!("setting non-blocking mode: {e}"),
            })?;
        Ok(Self {
            socket,
            recv_buffer: [0; RECV_BUFFER_SIZE],
        })
    }

    /// The local address the socket is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, LobbyError> {
        self.socket.local_addr().map_err(|e| LobbyError::Socket {
            context: format!("querying local address: {e}"),
        })
    }
}

impl NonBlockingSocket<SocketAddr> for UdpNonBlockingSocket {
    fn send_to(&mut self, buf: &[u8], addr: &SocketAddr) {
        // UDP is best-effort; a failed send is the same as a lost packet,
        // and every request the transport makes has its own retry budget.
        if let Err(e) = self.socket.send_to(buf, addr) {
            warn!("failed to send UDP packet to {}: {}", addr, e);
        }
    }

    fn receive_all(&mut self) -> Vec<(SocketAddr, Vec<u8>)> {
        let mut received = Vec::new();
        loop {
            match self.socket.recv_from(&mut self.recv_buffer) {
                Ok((number_of_bytes, src_addr)) => {
                    if let Some(datagram) = self.recv_buffer.get(0..number_of_bytes) {
                        received.push((src_addr, datagram.to_vec()));
                    } else {
                        warn!(
                            "received {} bytes but buffer is only {} bytes; dropping datagram",
                            number_of_bytes, RECV_BUFFER_SIZE
                        );
                    }
                }
                // there are no more messages
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return received,
                // datagram sockets sometimes report this as a result of a
                // previous send_to; the next recv may still succeed
                Err(ref err) if err.kind() == ErrorKind::ConnectionReset => continue,
                // For other errors, log and stop receiving (don't panic)
                Err(err) => {
                    warn!("unexpected socket error: {:?}: {}", err.kind(), err);
                    return received;
                }
            }
        }
    }
}
