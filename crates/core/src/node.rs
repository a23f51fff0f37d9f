//! Node records: one per domain service a connection has been told about.

use std::net::{Ipv4Addr, SocketAddrV4};

use ahash::HashMap;
use codec::domain::{DomainNodeEntry, NodeType};
use uuid::Uuid;

/// Classification order used by the relay when a datagram's sender matches
/// more than one node's public socket. Preserves the source's `if/else if`
/// chain order rather than hash-map iteration order.
const MATCH_ORDER: [NodeType; 6] = [
    NodeType::AudioMixer,
    NodeType::AvatarMixer,
    NodeType::AssetServer,
    NodeType::MessagesMixer,
    NodeType::EntityScriptServer,
    NodeType::EntityServer,
];

/// The labeled data channel a node's traffic is relayed over. `None` for
/// node types the core never relays directly (there is none among the six
/// interested types, but `Other` carries no label).
pub fn data_channel_label(node_type: NodeType) -> Option<&'static str> {
    match node_type {
        NodeType::AudioMixer => Some("audio_mixer_dc"),
        NodeType::AvatarMixer => Some("avatar_mixer_dc"),
        NodeType::EntityServer => Some("entity_server_dc"),
        NodeType::AssetServer => Some("asset_server_dc"),
        NodeType::MessagesMixer => Some("messages_mixer_dc"),
        NodeType::EntityScriptServer => Some("entity_script_server_dc"),
        NodeType::Other(_) => None,
    }
}

#[derive(Debug, Clone)]
pub struct NodeRecord {
    pub node_id: Uuid,
    pub node_type: NodeType,
    pub public_addr: Ipv4Addr,
    pub public_port: u16,
    pub local_addr: Ipv4Addr,
    pub local_port: u16,
    pub session_local_id: u16,
    pub domain_session_local_id: u16,
    pub is_replicated: bool,
    pub connection_secret: Uuid,
    pub permissions: u32,
    pub data_channel: &'static str,
    pub active_socket: SocketAddrV4,
    pub last_sequence: u16,
}

impl NodeRecord {
    fn active_socket_for(public_addr: Ipv4Addr, public_port: u16, local_addr: Ipv4Addr, local_port: u16) -> SocketAddrV4 {
        if public_addr.is_unspecified() && public_port == 0 {
            SocketAddrV4::new(local_addr, local_port)
        } else {
            SocketAddrV4::new(public_addr, public_port)
        }
    }

    fn from_wire(entry: &DomainNodeEntry, fallback_public: Ipv4Addr, domain_session_local_id: u16) -> Self {
        // The public address field is never left all-zero: null is rewritten
        // to the connection's own public_addr.
        let public_addr = if entry.public_addr.is_unspecified() {
            fallback_public
        } else {
            entry.public_addr
        };

        Self {
            node_id: entry.node_id,
            node_type: entry.node_type,
            public_addr,
            public_port: entry.public_port,
            local_addr: entry.local_addr,
            local_port: entry.local_port,
            session_local_id: entry.session_local_id,
            domain_session_local_id,
            is_replicated: entry.is_replicated,
            connection_secret: entry.connection_secret,
            permissions: entry.permissions,
            data_channel: data_channel_label(entry.node_type).unwrap_or("domain_server_dc"),
            active_socket: Self::active_socket_for(public_addr, entry.public_port, entry.local_addr, entry.local_port),
            last_sequence: 0,
        }
    }

    fn update_from_wire(&mut self, entry: &DomainNodeEntry, fallback_public: Ipv4Addr) {
        let public_addr = if entry.public_addr.is_unspecified() {
            fallback_public
        } else {
            entry.public_addr
        };

        self.public_addr = public_addr;
        self.public_port = entry.public_port;
        self.local_addr = entry.local_addr;
        self.local_port = entry.local_port;
        self.session_local_id = entry.session_local_id;
        self.is_replicated = entry.is_replicated;
        self.connection_secret = entry.connection_secret;
        self.permissions = entry.permissions;
        self.active_socket = Self::active_socket_for(public_addr, entry.public_port, entry.local_addr, entry.local_port);
    }
}

/// A connection's known nodes, keyed by type. Populated incrementally from
/// each domain-list the domain sends.
#[derive(Debug, Default)]
pub struct NodeTable(HashMap<NodeType, NodeRecord>);

impl NodeTable {
    pub fn new() -> Self {
        Self(HashMap::default())
    }

    /// Insert or refresh every entry whose type the connection is interested
    /// in; entries for types outside the interested set are skipped, per
    /// the invariant that `nodes[T]` may only exist for `T` in that set.
    pub fn upsert_from_wire(&mut self, entries: &[DomainNodeEntry], fallback_public: Ipv4Addr, domain_session_local_id: u16) {
        for entry in entries {
            if !entry.node_type.is_interested() {
                continue;
            }

            self.0
                .entry(entry.node_type)
                .and_modify(|record| record.update_from_wire(entry, fallback_public))
                .or_insert_with(|| NodeRecord::from_wire(entry, fallback_public, domain_session_local_id));
        }
    }

    pub fn get(&self, node_type: NodeType) -> Option<&NodeRecord> {
        self.0.get(&node_type)
    }

    pub fn get_mut(&mut self, node_type: NodeType) -> Option<&mut NodeRecord> {
        self.0.get_mut(&node_type)
    }

    pub fn values(&self) -> impl Iterator<Item = &NodeRecord> {
        self.0.values()
    }

    /// Classify a datagram's sender against known nodes' public sockets,
    /// preserving the source's match order for ties.
    pub fn classify(&self, addr: Ipv4Addr, port: u16) -> Option<NodeType> {
        MATCH_ORDER.into_iter().find(|node_type| {
            self.0
                .get(node_type)
                .is_some_and(|record| record.public_addr == addr && record.public_port == port)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(node_type: NodeType, public_port: u16) -> DomainNodeEntry {
        DomainNodeEntry {
            node_type,
            node_id: Uuid::from_u128(1),
            public_addr: Ipv4Addr::new(198, 51, 100, 5),
            public_port,
            local_addr: Ipv4Addr::UNSPECIFIED,
            local_port: 0,
            permissions: 1,
            is_replicated: false,
            session_local_id: 3,
            connection_secret: Uuid::from_u128(2),
        }
    }

    #[test]
    fn uninterested_types_are_skipped() {
        let mut table = NodeTable::new();
        table.upsert_from_wire(&[entry(NodeType::Other(250), 48000)], Ipv4Addr::LOCALHOST, 0);
        assert!(table.values().next().is_none());
    }

    #[test]
    fn null_public_addr_is_normalized_to_connection_public_addr() {
        let mut node = entry(NodeType::AudioMixer, 48000);
        node.public_addr = Ipv4Addr::UNSPECIFIED;

        let mut table = NodeTable::new();
        table.upsert_from_wire(&[node], Ipv4Addr::new(203, 0, 113, 9), 7);

        let record = table.get(NodeType::AudioMixer).unwrap();
        assert_eq!(record.public_addr, Ipv4Addr::new(203, 0, 113, 9));
        assert_eq!(record.domain_session_local_id, 7);
    }

    #[test]
    fn classify_prefers_audio_over_avatar_on_tie() {
        let mut table = NodeTable::new();
        table.upsert_from_wire(
            &[entry(NodeType::AudioMixer, 48000), entry(NodeType::AvatarMixer, 48000)],
            Ipv4Addr::LOCALHOST,
            0,
        );

        let classified = table.classify(Ipv4Addr::new(198, 51, 100, 5), 48000);
        assert_eq!(classified, Some(NodeType::AudioMixer));
    }

    #[test]
    fn second_upsert_updates_in_place_without_duplicating() {
        let mut table = NodeTable::new();
        table.upsert_from_wire(&[entry(NodeType::AudioMixer, 48000)], Ipv4Addr::LOCALHOST, 0);
        table.upsert_from_wire(&[entry(NodeType::AudioMixer, 48050)], Ipv4Addr::LOCALHOST, 0);

        assert_eq!(table.values().count(), 1);
        assert_eq!(table.get(NodeType::AudioMixer).unwrap().public_port, 48050);
    }
}
