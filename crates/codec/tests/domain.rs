use std::net::Ipv4Addr;

use anyhow::Result;
use hifi_bridge_codec::domain::{
    DomainConnectRequest, DomainList, DomainNodeEntry, IceServerQuery, IceServerResponse, IcePing, NodeType,
    Packet, PacketType, PingType,
};
use uuid::Uuid;

#[test]
fn round_trips_ice_server_query_and_response() -> Result<()> {
    let client_id = Uuid::new_v4();
    let domain_id = Uuid::new_v4();

    let query = IceServerQuery {
        client_id,
        public_addr: Ipv4Addr::new(203, 0, 113, 9),
        public_port: 45001,
        local_addr: Ipv4Addr::new(192, 168, 1, 17),
        local_port: 55001,
        domain_id,
    };

    let bytes = query.encode(0);
    let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0)?;
    assert_eq!(packet.packet_type(), PacketType::IceServerQuery);

    let response = IceServerResponse {
        domain_id,
        domain_public_addr: Ipv4Addr::new(198, 51, 100, 4),
        domain_public_port: 40102,
        domain_local_addr: Ipv4Addr::new(10, 0, 0, 4),
        domain_local_port: 40102,
    };

    let bytes = response.encode(1);
    let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0)?;
    let decoded = IceServerResponse::decode(&mut packet)?;

    assert_eq!(decoded.domain_id, domain_id);
    assert_eq!(decoded.domain_public_port, 40102);

    Ok(())
}

#[test]
fn ice_ping_round_trips_through_both_packet_types() -> Result<()> {
    let ping = IcePing {
        client_id: Uuid::new_v4(),
        ping_type: PingType::Public,
    };

    let bytes = ping.encode(PacketType::IcePing, 0);
    let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0)?;
    assert_eq!(packet.packet_type(), PacketType::IcePing);
    assert_eq!(IcePing::decode(&mut packet)?.ping_type, PingType::Public);

    let bytes = ping.encode(PacketType::IcePingReply, 1);
    let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0)?;
    assert_eq!(packet.packet_type(), PacketType::IcePingReply);

    Ok(())
}

#[test]
fn domain_connect_request_round_trips_interested_node_types() -> Result<()> {
    let request = DomainConnectRequest {
        client_id: Uuid::new_v4(),
        protocol_version_signature: vec![0xde, 0xad],
        hw_addr: vec![0, 1, 2, 3, 4, 5],
        machine_fingerprint: Uuid::new_v4(),
        owner_type: 0,
        public_addr: Ipv4Addr::new(203, 0, 113, 9),
        public_port: 45001,
        local_addr: Ipv4Addr::new(192, 168, 1, 17),
        local_port: 55001,
        interested_node_types: NodeType::INTERESTED.to_vec(),
        place_name: "welcome-hall".to_string(),
    };

    let bytes = request.encode(12);
    let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0)?;
    assert_eq!(packet.packet_type(), PacketType::DomainConnectRequest);

    let decoded = DomainConnectRequest::decode(&mut packet)?;
    assert_eq!(decoded.place_name, "welcome-hall");
    assert_eq!(decoded.interested_node_types, NodeType::INTERESTED.to_vec());
    assert_eq!(decoded.hw_addr, vec![0, 1, 2, 3, 4, 5]);

    Ok(())
}

#[test]
fn domain_list_round_trips_multiple_nodes_and_ignores_uninterested_types() -> Result<()> {
    let node = |node_type: NodeType, port: u16| DomainNodeEntry {
        node_type,
        node_id: Uuid::new_v4(),
        public_addr: Ipv4Addr::new(198, 51, 100, 9),
        public_port: port,
        local_addr: Ipv4Addr::UNSPECIFIED,
        local_port: 0,
        permissions: 1,
        is_replicated: false,
        session_local_id: port as u16,
        connection_secret: Uuid::new_v4(),
    };

    let list = DomainList {
        domain_id: Uuid::new_v4(),
        domain_local_id: 1,
        session_id: Uuid::new_v4(),
        local_id: 2,
        permissions: 0xff,
        is_authenticated: true,
        nodes: vec![
            node(NodeType::AudioMixer, 48000),
            node(NodeType::AvatarMixer, 48001),
            node(NodeType::Other(200), 48002),
        ],
    };

    let bytes = list.encode(4);
    let mut packet = Packet::from_received(&bytes, Ipv4Addr::LOCALHOST, 0)?;

    let decoded = DomainList::decode(&mut packet)?;
    assert_eq!(decoded.nodes.len(), 3);
    assert_eq!(packet.remaining(), 0);

    let interested: Vec<_> = decoded.nodes.iter().filter(|n| n.node_type.is_interested()).collect();
    assert_eq!(interested.len(), 2);

    Ok(())
}
