//! Framed domain packets.
//!
//! A packet is a 3-byte header (packet type, little-endian sequence number)
//! followed by a type-specific body. Multi-byte body fields are
//! little-endian; UUIDs are the raw 16 bytes; IPv4 addresses are the raw
//! four octets; length-prefixed byte strings and UTF-8 strings carry a
//! little-endian `u16` length ahead of their content.
//!
//! Packet framing itself (this header layout) is not dictated by any
//! external protocol the bridge must interoperate with byte-for-byte — only
//! the body shapes the domain side expects are fixed by the wire protocol.

use std::net::Ipv4Addr;

use bytes::{BufMut, Bytes, BytesMut};
use uuid::Uuid;

use crate::Error;

const HEADER_SIZE: usize = 3;

/// Packet types the core understands. Anything else observed on the wire
/// is kept as [`PacketType::Other`] and relayed without interpretation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    IceServerQuery,
    IcePing,
    IcePingReply,
    DomainConnectRequest,
    DomainList,
    DomainConnectionDenied,
    Ping,
    PingReply,
    SelectedAudioFormat,
    Other(u8),
}

impl PacketType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::IceServerQuery => 0,
            Self::IcePing => 1,
            Self::IcePingReply => 2,
            Self::DomainConnectRequest => 3,
            Self::DomainList => 4,
            Self::DomainConnectionDenied => 5,
            Self::Ping => 6,
            Self::PingReply => 7,
            Self::SelectedAudioFormat => 8,
            Self::Other(value) => value,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::IceServerQuery,
            1 => Self::IcePing,
            2 => Self::IcePingReply,
            3 => Self::DomainConnectRequest,
            4 => Self::DomainList,
            5 => Self::DomainConnectionDenied,
            6 => Self::Ping,
            7 => Self::PingReply,
            8 => Self::SelectedAudioFormat,
            other => Self::Other(other),
        }
    }
}

/// The six domain service types a connection cares about, plus a catch-all
/// for node types the domain list enumerates that the core never relays to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeType {
    AudioMixer,
    AvatarMixer,
    EntityServer,
    AssetServer,
    MessagesMixer,
    EntityScriptServer,
    Other(u8),
}

impl NodeType {
    pub fn as_u8(self) -> u8 {
        match self {
            Self::AudioMixer => 0,
            Self::AvatarMixer => 1,
            Self::EntityServer => 2,
            Self::AssetServer => 3,
            Self::MessagesMixer => 4,
            Self::EntityScriptServer => 5,
            Self::Other(value) => value,
        }
    }

    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::AudioMixer,
            1 => Self::AvatarMixer,
            2 => Self::EntityServer,
            3 => Self::AssetServer,
            4 => Self::MessagesMixer,
            5 => Self::EntityScriptServer,
            other => Self::Other(other),
        }
    }

    /// The fixed set of node types a connection registers interest in.
    pub const INTERESTED: [NodeType; 6] = [
        NodeType::AudioMixer,
        NodeType::AvatarMixer,
        NodeType::EntityServer,
        NodeType::AssetServer,
        NodeType::MessagesMixer,
        NodeType::EntityScriptServer,
    ];

    pub fn is_interested(self) -> bool {
        Self::INTERESTED.contains(&self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PingType {
    Local = 1,
    Public = 2,
}

impl TryFrom<u8> for PingType {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Local),
            2 => Ok(Self::Public),
            _ => Err(Error::InvalidInput),
        }
    }
}

/// A decoded domain packet: header fields plus a cursor over the body for
/// the matching body type to consume.
pub struct Packet {
    packet_type: PacketType,
    sequence_number: u16,
    body: Bytes,
    sender_addr: Ipv4Addr,
    sender_port: u16,
    cursor: usize,
}

impl Packet {
    /// Parse header + retain the body for a caller to decode further,
    /// tagging it with the UDP datagram's sender for later classification.
    ///
    /// # Test
    ///
    /// ```
    /// use hifi_bridge_codec::domain::{Packet, PacketType};
    /// use std::net::Ipv4Addr;
    ///
    /// let bytes = [6u8, 0x2a, 0x00, 0xff, 0xee];
    /// let packet = Packet::from_received(&bytes, Ipv4Addr::new(127, 0, 0, 1), 9) .unwrap();
    ///
    /// assert_eq!(packet.packet_type(), PacketType::Ping);
    /// assert_eq!(packet.sequence_number(), 0x2a);
    /// assert_eq!(packet.sender_port(), 9);
    /// ```
    pub fn from_received(buffer: &[u8], sender_addr: Ipv4Addr, sender_port: u16) -> Result<Self, Error> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::UnexpectedEof);
        }

        let packet_type = PacketType::from_u8(buffer[0]);
        let sequence_number = u16::from_le_bytes([buffer[1], buffer[2]]);

        Ok(Self {
            packet_type,
            sequence_number,
            body: Bytes::copy_from_slice(&buffer[HEADER_SIZE..]),
            sender_addr,
            sender_port,
            cursor: 0,
        })
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn sequence_number(&self) -> u16 {
        self.sequence_number
    }

    pub fn sender_addr(&self) -> Ipv4Addr {
        self.sender_addr
    }

    pub fn sender_port(&self) -> u16 {
        self.sender_port
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.cursor
    }

    pub fn read_bytes(&mut self, n: usize) -> Result<&[u8], Error> {
        if self.remaining() < n {
            return Err(Error::UnexpectedEof);
        }

        let start = self.cursor;
        self.cursor += n;
        Ok(&self.body[start..self.cursor])
    }

    pub fn read_u8(&mut self) -> Result<u8, Error> {
        Ok(self.read_bytes(1)?[0])
    }

    pub fn read_bool(&mut self) -> Result<bool, Error> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> Result<u16, Error> {
        Ok(u16::from_le_bytes(self.read_bytes(2)?.try_into()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, Error> {
        Ok(u32::from_le_bytes(self.read_bytes(4)?.try_into()?))
    }

    pub fn read_ipv4(&mut self) -> Result<Ipv4Addr, Error> {
        let octets: [u8; 4] = self.read_bytes(4)?.try_into()?;
        Ok(Ipv4Addr::from(octets))
    }

    pub fn read_uuid(&mut self) -> Result<Uuid, Error> {
        let bytes: [u8; 16] = self.read_bytes(16)?.try_into()?;
        Ok(Uuid::from_bytes(bytes))
    }

    /// Length-prefixed (`u16` little-endian) byte string.
    pub fn read_byte_string(&mut self) -> Result<Vec<u8>, Error> {
        let len = self.read_u16()? as usize;
        Ok(self.read_bytes(len)?.to_vec())
    }

    /// Length-prefixed (`u16` little-endian) UTF-8 string.
    ///
    /// # Test
    ///
    /// ```
    /// use hifi_bridge_codec::domain::PacketBuilder;
    /// use hifi_bridge_codec::domain::PacketType;
    /// use std::net::Ipv4Addr;
    ///
    /// let mut builder = PacketBuilder::create(1, PacketType::Ping, 8);
    /// builder.push_string("welcome");
    /// let bytes = builder.finish();
    ///
    /// let mut packet = hifi_bridge_codec::domain::Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0).unwrap();
    /// assert_eq!(packet.read_string().unwrap(), "welcome");
    /// ```
    pub fn read_string(&mut self) -> Result<String, Error> {
        Ok(String::from_utf8(self.read_byte_string()?).map_err(|e| e.utf8_error())?)
    }
}

/// Builder for outbound domain packets, mirroring [`Packet`]'s reader with a
/// matching writer.
pub struct PacketBuilder {
    bytes: BytesMut,
}

impl PacketBuilder {
    pub fn create(sequence_number: u16, packet_type: PacketType, body_capacity: usize) -> Self {
        let mut bytes = BytesMut::with_capacity(HEADER_SIZE + body_capacity);
        bytes.put_u8(packet_type.as_u8());
        bytes.put_u16_le(sequence_number);
        Self { bytes }
    }

    pub fn push_u8(&mut self, value: u8) -> &mut Self {
        self.bytes.put_u8(value);
        self
    }

    pub fn push_bool(&mut self, value: bool) -> &mut Self {
        self.push_u8(value as u8)
    }

    pub fn push_u16(&mut self, value: u16) -> &mut Self {
        self.bytes.put_u16_le(value);
        self
    }

    pub fn push_u32(&mut self, value: u32) -> &mut Self {
        self.bytes.put_u32_le(value);
        self
    }

    pub fn push_ipv4(&mut self, value: Ipv4Addr) -> &mut Self {
        self.bytes.put_slice(&value.octets());
        self
    }

    pub fn push_uuid(&mut self, value: Uuid) -> &mut Self {
        self.bytes.put_slice(value.as_bytes());
        self
    }

    pub fn push_bytes(&mut self, value: &[u8]) -> &mut Self {
        self.bytes.put_slice(value);
        self
    }

    pub fn push_byte_string(&mut self, value: &[u8]) -> &mut Self {
        self.push_u16(value.len() as u16);
        self.push_bytes(value)
    }

    pub fn push_string(&mut self, value: &str) -> &mut Self {
        self.push_byte_string(value.as_bytes())
    }

    pub fn finish(self) -> Bytes {
        self.bytes.freeze()
    }
}

/// `ICEServerQuery`, sent by a connection to the ICE rendezvous to learn the
/// domain's sockets.
#[derive(Debug, Clone)]
pub struct IceServerQuery {
    pub client_id: Uuid,
    pub public_addr: Ipv4Addr,
    pub public_port: u16,
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
    pub domain_id: Uuid,
}

impl IceServerQuery {
    pub fn encode(&self, sequence_number: u16) -> Bytes {
        PacketBuilder::create(sequence_number, PacketType::IceServerQuery, 44)
            .push_uuid(self.client_id)
            .push_ipv4(self.public_addr)
            .push_u16(self.public_port)
            .push_ipv4(self.local_addr)
            .push_u16(self.local_port)
            .push_uuid(self.domain_id)
            .finish()
    }
}

/// The ICE rendezvous's answer: the domain's public and local sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IceServerResponse {
    pub domain_id: Uuid,
    pub domain_public_addr: Ipv4Addr,
    pub domain_public_port: u16,
    pub domain_local_addr: Ipv4Addr,
    pub domain_local_port: u16,
}

impl IceServerResponse {
    pub fn encode(&self, sequence_number: u16) -> Bytes {
        PacketBuilder::create(sequence_number, PacketType::IceServerQuery, 28)
            .push_uuid(self.domain_id)
            .push_ipv4(self.domain_public_addr)
            .push_u16(self.domain_public_port)
            .push_ipv4(self.domain_local_addr)
            .push_u16(self.domain_local_port)
            .finish()
    }

    /// # Test
    ///
    /// ```
    /// use hifi_bridge_codec::domain::{IceServerResponse, Packet};
    /// use std::net::Ipv4Addr;
    /// use uuid::Uuid;
    ///
    /// let response = IceServerResponse {
    ///     domain_id: Uuid::from_u128(7),
    ///     domain_public_addr: Ipv4Addr::new(198, 51, 100, 4),
    ///     domain_public_port: 40102,
    ///     domain_local_addr: Ipv4Addr::new(10, 0, 0, 4),
    ///     domain_local_port: 40102,
    /// };
    ///
    /// let bytes = response.encode(0);
    /// let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0).unwrap();
    /// let decoded = IceServerResponse::decode(&mut packet).unwrap();
    ///
    /// assert_eq!(decoded, response);
    /// ```
    pub fn decode(packet: &mut Packet) -> Result<Self, Error> {
        Ok(Self {
            domain_id: packet.read_uuid()?,
            domain_public_addr: packet.read_ipv4()?,
            domain_public_port: packet.read_u16()?,
            domain_local_addr: packet.read_ipv4()?,
            domain_local_port: packet.read_u16()?,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IcePing {
    pub client_id: Uuid,
    pub ping_type: PingType,
}

impl IcePing {
    pub fn encode(&self, packet_type: PacketType, sequence_number: u16) -> Bytes {
        PacketBuilder::create(sequence_number, packet_type, 17)
            .push_uuid(self.client_id)
            .push_u8(self.ping_type as u8)
            .finish()
    }

    pub fn decode(packet: &mut Packet) -> Result<Self, Error> {
        let client_id = packet.read_uuid()?;
        let ping_type = PingType::try_from(packet.read_u8()?)?;
        Ok(Self { client_id, ping_type })
    }
}

#[derive(Debug, Clone)]
pub struct DomainConnectRequest {
    pub client_id: Uuid,
    pub protocol_version_signature: Vec<u8>,
    pub hw_addr: Vec<u8>,
    pub machine_fingerprint: Uuid,
    pub owner_type: u8,
    pub public_addr: Ipv4Addr,
    pub public_port: u16,
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
    pub interested_node_types: Vec<NodeType>,
    pub place_name: String,
}

impl DomainConnectRequest {
    pub fn encode(&self, sequence_number: u16) -> Bytes {
        let mut builder = PacketBuilder::create(sequence_number, PacketType::DomainConnectRequest, 96);
        builder
            .push_uuid(self.client_id)
            .push_byte_string(&self.protocol_version_signature)
            .push_byte_string(&self.hw_addr)
            .push_uuid(self.machine_fingerprint)
            .push_u8(self.owner_type)
            .push_ipv4(self.public_addr)
            .push_u16(self.public_port)
            .push_ipv4(self.local_addr)
            .push_u16(self.local_port)
            .push_u16(self.interested_node_types.len() as u16);

        for node_type in &self.interested_node_types {
            builder.push_u8(node_type.as_u8());
        }

        builder.push_string(&self.place_name);
        builder.finish()
    }

    /// # Test
    ///
    /// ```
    /// use hifi_bridge_codec::domain::{DomainConnectRequest, NodeType, Packet};
    /// use std::net::Ipv4Addr;
    /// use uuid::Uuid;
    ///
    /// let request = DomainConnectRequest {
    ///     client_id: Uuid::from_u128(1),
    ///     protocol_version_signature: vec![1, 2, 3],
    ///     hw_addr: vec![0xde, 0xad, 0xbe, 0xef, 0x00, 0x01],
    ///     machine_fingerprint: Uuid::from_u128(2),
    ///     owner_type: 0,
    ///     public_addr: Ipv4Addr::new(203, 0, 113, 9),
    ///     public_port: 45001,
    ///     local_addr: Ipv4Addr::new(192, 168, 1, 17),
    ///     local_port: 55001,
    ///     interested_node_types: NodeType::INTERESTED.to_vec(),
    ///     place_name: "my-place".to_string(),
    /// };
    ///
    /// let bytes = request.encode(3);
    /// let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0).unwrap();
    /// let decoded = DomainConnectRequest::decode(&mut packet).unwrap();
    ///
    /// assert_eq!(decoded.place_name, "my-place");
    /// assert_eq!(decoded.interested_node_types.len(), 6);
    /// ```
    pub fn decode(packet: &mut Packet) -> Result<Self, Error> {
        let client_id = packet.read_uuid()?;
        let protocol_version_signature = packet.read_byte_string()?;
        let hw_addr = packet.read_byte_string()?;
        let machine_fingerprint = packet.read_uuid()?;
        let owner_type = packet.read_u8()?;
        let public_addr = packet.read_ipv4()?;
        let public_port = packet.read_u16()?;
        let local_addr = packet.read_ipv4()?;
        let local_port = packet.read_u16()?;

        let count = packet.read_u16()? as usize;
        let mut interested_node_types = Vec::with_capacity(count);
        for _ in 0..count {
            interested_node_types.push(NodeType::from_u8(packet.read_u8()?));
        }

        let place_name = packet.read_string()?;

        Ok(Self {
            client_id,
            protocol_version_signature,
            hw_addr,
            machine_fingerprint,
            owner_type,
            public_addr,
            public_port,
            local_addr,
            local_port,
            interested_node_types,
            place_name,
        })
    }
}

pub const NODE_TUPLE_SIZE: usize = 52;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainNodeEntry {
    pub node_type: NodeType,
    pub node_id: Uuid,
    pub public_addr: Ipv4Addr,
    pub public_port: u16,
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
    pub permissions: u32,
    pub is_replicated: bool,
    pub session_local_id: u16,
    pub connection_secret: Uuid,
}

impl DomainNodeEntry {
    fn encode(&self, builder: &mut PacketBuilder) {
        builder
            .push_u8(self.node_type.as_u8())
            .push_uuid(self.node_id)
            .push_ipv4(self.public_addr)
            .push_u16(self.public_port)
            .push_ipv4(self.local_addr)
            .push_u16(self.local_port)
            .push_u32(self.permissions)
            .push_bool(self.is_replicated)
            .push_u16(self.session_local_id)
            .push_uuid(self.connection_secret);
    }

    fn decode(packet: &mut Packet) -> Result<Self, Error> {
        Ok(Self {
            node_type: NodeType::from_u8(packet.read_u8()?),
            node_id: packet.read_uuid()?,
            public_addr: packet.read_ipv4()?,
            public_port: packet.read_u16()?,
            local_addr: packet.read_ipv4()?,
            local_port: packet.read_u16()?,
            permissions: packet.read_u32()?,
            is_replicated: packet.read_bool()?,
            session_local_id: packet.read_u16()?,
            connection_secret: packet.read_uuid()?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct DomainList {
    pub domain_id: Uuid,
    pub domain_local_id: u16,
    pub session_id: Uuid,
    pub local_id: u16,
    pub permissions: u32,
    pub is_authenticated: bool,
    pub nodes: Vec<DomainNodeEntry>,
}

impl DomainList {
    pub fn encode(&self, sequence_number: u16) -> Bytes {
        let mut builder = PacketBuilder::create(
            sequence_number,
            PacketType::DomainList,
            41 + self.nodes.len() * NODE_TUPLE_SIZE,
        );

        builder
            .push_uuid(self.domain_id)
            .push_u16(self.domain_local_id)
            .push_uuid(self.session_id)
            .push_u16(self.local_id)
            .push_u32(self.permissions)
            .push_bool(self.is_authenticated);

        for node in &self.nodes {
            node.encode(&mut builder);
        }

        builder.finish()
    }

    /// Consumes the header, then decodes `floor(remaining / NODE_TUPLE_SIZE)`
    /// node entries, leaving no trailing garbage.
    ///
    /// # Test
    ///
    /// ```
    /// use hifi_bridge_codec::domain::{DomainList, DomainNodeEntry, NodeType, Packet};
    /// use std::net::Ipv4Addr;
    /// use uuid::Uuid;
    ///
    /// let list = DomainList {
    ///     domain_id: Uuid::from_u128(9),
    ///     domain_local_id: 1,
    ///     session_id: Uuid::from_u128(10),
    ///     local_id: 2,
    ///     permissions: 0xff,
    ///     is_authenticated: true,
    ///     nodes: vec![DomainNodeEntry {
    ///         node_type: NodeType::AudioMixer,
    ///         node_id: Uuid::from_u128(11),
    ///         public_addr: Ipv4Addr::new(198, 51, 100, 5),
    ///         public_port: 48000,
    ///         local_addr: Ipv4Addr::UNSPECIFIED,
    ///         local_port: 0,
    ///         permissions: 1,
    ///         is_replicated: false,
    ///         session_local_id: 3,
    ///         connection_secret: Uuid::from_u128(12),
    ///     }],
    /// };
    ///
    /// let bytes = list.encode(5);
    /// let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0).unwrap();
    /// let decoded = DomainList::decode(&mut packet).unwrap();
    ///
    /// assert_eq!(decoded.nodes.len(), 1);
    /// assert_eq!(decoded.nodes[0].node_type, NodeType::AudioMixer);
    /// ```
    pub fn decode(packet: &mut Packet) -> Result<Self, Error> {
        let domain_id = packet.read_uuid()?;
        let domain_local_id = packet.read_u16()?;
        let session_id = packet.read_uuid()?;
        let local_id = packet.read_u16()?;
        let permissions = packet.read_u32()?;
        let is_authenticated = packet.read_bool()?;

        let node_count = packet.remaining() / NODE_TUPLE_SIZE;
        let mut nodes = Vec::with_capacity(node_count);
        for _ in 0..node_count {
            nodes.push(DomainNodeEntry::decode(packet)?);
        }

        Ok(Self {
            domain_id,
            domain_local_id,
            session_id,
            local_id,
            permissions,
            is_authenticated,
            nodes,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DomainConnectionDenied {
    pub reason_code: u8,
}

impl DomainConnectionDenied {
    pub fn decode(packet: &mut Packet) -> Result<Self, Error> {
        Ok(Self {
            reason_code: packet.read_u8()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_list_leaves_no_trailing_garbage() {
        let list = DomainList {
            domain_id: Uuid::from_u128(1),
            domain_local_id: 0,
            session_id: Uuid::from_u128(2),
            local_id: 0,
            permissions: 0,
            is_authenticated: false,
            nodes: vec![],
        };

        let bytes = list.encode(0);
        let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0).unwrap();
        let decoded = DomainList::decode(&mut packet).unwrap();

        assert!(decoded.nodes.is_empty());
        assert_eq!(packet.remaining(), 0);
    }

    #[test]
    fn ping_reply_echoes_ping_type() {
        let ping = IcePing {
            client_id: Uuid::from_u128(5),
            ping_type: PingType::Local,
        };

        let bytes = ping.encode(PacketType::IcePingReply, 1);
        let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0).unwrap();

        assert_eq!(packet.packet_type(), PacketType::IcePingReply);
        let decoded = IcePing::decode(&mut packet).unwrap();
        assert_eq!(decoded.ping_type, PingType::Local);
    }

    #[test]
    fn node_type_other_round_trips() {
        assert_eq!(NodeType::from_u8(200).as_u8(), 200);
        assert!(!NodeType::from_u8(200).is_interested());
        assert!(NodeType::AudioMixer.is_interested());
    }
}
