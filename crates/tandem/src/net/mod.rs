mod protocol;
mod transport;

pub use protocol::{
    DEFAULT_PORT, MAX_PACKET_SIZE, Message, PROTOCOL_MAGIC, PROTOCOL_VERSION, Packet,
    PacketHeader, Payload, ProtocolError, aligned, decode_inbound, encode_outbound,
};
pub use transport::{
    ConnectionState, LinkMonitor, Transport, TransportError, UdpReceiver, UdpTransport,
};
