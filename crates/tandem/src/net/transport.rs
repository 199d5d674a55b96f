use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::{ToSocketAddrs, UdpSocket};

use super::protocol::{MAX_PACKET_SIZE, Message, Packet, Payload, ProtocolError, encode_outbound};
use crate::engine::Outbound;

/// Outbound half of a connection, as seen by the engine.
pub trait Transport<S> {
    fn send(&mut self, message: Outbound<'_, S>) -> Result<(), TransportError>;
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Tracks whether the remote side is still talking to us.
///
/// UDP has no handshake, so the link counts as connected from the first valid
/// datagram and as lost once nothing arrives for `timeout`.
#[derive(Debug)]
pub struct LinkMonitor {
    state: ConnectionState,
    timeout: Duration,
    last_receive_time: Option<Instant>,
}

impl LinkMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            state: ConnectionState::Connecting,
            timeout,
            last_receive_time: None,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Records inbound traffic. Returns `true` when this brings the link up.
    pub fn touch(&mut self, now: Instant) -> bool {
        self.last_receive_time = Some(now);
        let was_connected = self.state == ConnectionState::Connected;
        self.state = ConnectionState::Connected;
        !was_connected
    }

    /// Returns `true` when the link has just timed out.
    pub fn check(&mut self, now: Instant) -> bool {
        if self.state != ConnectionState::Connected {
            return false;
        }
        let silent = self
            .last_receive_time
            .is_none_or(|last| now.saturating_duration_since(last) > self.timeout);
        if silent {
            self.state = ConnectionState::Disconnected;
        }
        silent
    }
}

/// Sending half of a UDP connection to one remote peer.
#[derive(Debug, Clone)]
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
}

/// Receiving half of a UDP connection.
#[derive(Debug)]
pub struct UdpReceiver {
    socket: Arc<UdpSocket>,
    recv_buffer: Vec<u8>,
}

impl UdpTransport {
    pub async fn connect<B, R>(bind_addr: B, remote: R) -> io::Result<(Self, UdpReceiver)>
    where
        B: ToSocketAddrs,
        R: ToSocketAddrs,
    {
        let socket = UdpSocket::bind(bind_addr).await?;
        socket.connect(remote).await?;
        let remote_addr = socket.peer_addr()?;

        let socket = Arc::new(socket);
        let receiver = UdpReceiver {
            socket: Arc::clone(&socket),
            recv_buffer: vec![0u8; MAX_PACKET_SIZE],
        };

        Ok((
            Self {
                socket,
                remote_addr,
            },
            receiver,
        ))
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }

    /// Sends without waiting. A full socket buffer is reported as an error and
    /// the datagram is dropped, like any other loss on an unreliable link.
    pub fn send_message(&self, message: Message) -> Result<usize, TransportError> {
        let data = Packet::new(message).serialize()?;
        Ok(self.socket.try_send(&data)?)
    }
}

impl<S: Payload> Transport<S> for UdpTransport {
    fn send(&mut self, message: Outbound<'_, S>) -> Result<(), TransportError> {
        let encoded = encode_outbound(&message)?;
        self.send_message(encoded)?;
        Ok(())
    }
}

impl UdpReceiver {
    /// Waits for the next datagram. Undecodable datagrams come back as
    /// `TransportError::Protocol` so the caller can drop them and keep going.
    pub async fn recv(&mut self) -> Result<Message, TransportError> {
        let len = self.socket.recv(&mut self.recv_buffer).await?;
        let packet = Packet::deserialize(&self.recv_buffer[..len])?;
        Ok(packet.payload)
    }
}
