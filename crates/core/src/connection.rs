//! Per-client connection state: the root entity every other component
//! operates on.

use std::net::Ipv4Addr;

use codec::domain::{DomainList, NodeType};
use uuid::Uuid;

use crate::node::NodeTable;

#[derive(Debug)]
pub enum Error {
    /// Attempted to move `phase` somewhere other than its one legal
    /// successor. Regression, or skipping a phase, is never permitted; a
    /// re-handshake is a new Connection.
    IllegalPhaseTransition { from: Phase, to: Phase },
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{self:?}")
    }
}

/// The five phases a connection passes through exactly once, strictly in
/// order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Probing,
    Stun,
    Ice,
    DomainConnect,
    DomainConnected,
}

impl Phase {
    fn successor(self) -> Option<Phase> {
        match self {
            Self::Probing => Some(Self::Stun),
            Self::Stun => Some(Self::Ice),
            Self::Ice => Some(Self::DomainConnect),
            Self::DomainConnect => Some(Self::DomainConnected),
            Self::DomainConnected => None,
        }
    }
}

/// The constant owner type the domain connect request always carries;
/// the bridge never acts as anything but an end-user agent.
pub const OWNER_TYPE_AGENT: u8 = 0;

pub struct Connection {
    pub client_id: Uuid,
    pub interested_node_types: Vec<NodeType>,

    pub local_addr: Option<Ipv4Addr>,
    pub public_addr: Option<Ipv4Addr>,
    pub public_port: Option<u16>,
    pub local_port: Option<u16>,

    pub domain_public_addr: Option<Ipv4Addr>,
    pub domain_public_port: Option<u16>,
    pub domain_local_addr: Option<Ipv4Addr>,
    pub domain_local_port: Option<u16>,

    pub session_id: Option<Uuid>,
    pub local_id: Option<u16>,
    pub permissions: u32,

    sequence_number: u16,
    phase: Phase,
    pub domain_connected: bool,
    pub nodes: NodeTable,
}

impl Connection {
    pub fn new(client_id: Uuid) -> Self {
        Self {
            client_id,
            interested_node_types: NodeType::INTERESTED.to_vec(),
            local_addr: None,
            public_addr: None,
            public_port: None,
            local_port: None,
            domain_public_addr: None,
            domain_public_port: None,
            domain_local_addr: None,
            domain_local_port: None,
            session_id: None,
            local_id: None,
            permissions: 0,
            sequence_number: 0,
            phase: Phase::Probing,
            domain_connected: false,
            nodes: NodeTable::new(),
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Advance to `next`, which must be `phase`'s one legal successor.
    pub fn advance_phase(&mut self, next: Phase) -> Result<(), Error> {
        if self.phase.successor() != Some(next) {
            return Err(Error::IllegalPhaseTransition { from: self.phase, to: next });
        }

        self.phase = next;
        Ok(())
    }

    /// A fresh, monotonically increasing sequence number for the next
    /// outbound framed packet.
    pub fn next_sequence_number(&mut self) -> u16 {
        self.sequence_number = self.sequence_number.wrapping_add(1);
        self.sequence_number
    }

    pub fn record_local_probe(&mut self, addr: Ipv4Addr) {
        self.local_addr = Some(addr);
    }

    pub fn record_stun_result(&mut self, public_addr: Ipv4Addr, public_port: u16, local_port: u16) {
        self.public_addr = Some(public_addr);
        self.public_port = Some(public_port);
        self.local_port = Some(local_port);
    }

    pub fn record_ice_result(
        &mut self,
        domain_public_addr: Ipv4Addr,
        domain_public_port: u16,
        domain_local_addr: Ipv4Addr,
        domain_local_port: u16,
    ) {
        self.domain_public_addr = Some(domain_public_addr);
        self.domain_public_port = Some(domain_public_port);
        self.domain_local_addr = Some(domain_local_addr);
        self.domain_local_port = Some(domain_local_port);
    }

    /// Apply an inbound `DomainList`, subject to the dropping rule: once
    /// `domain_connected`, a list from a different domain id is ignored.
    /// Before that, any domain id still advances state (see the handshake's
    /// open question about the source's mismatch-tolerant behavior).
    ///
    /// Returns whether the list was applied.
    pub fn apply_domain_list(&mut self, expected_domain_id: Uuid, list: &DomainList) -> bool {
        if self.domain_connected && list.domain_id != expected_domain_id {
            return false;
        }

        self.domain_connected = true;
        self.session_id = Some(list.session_id);
        self.local_id = Some(list.local_id);
        self.permissions = list.permissions;

        let fallback_public = self.public_addr.unwrap_or(Ipv4Addr::UNSPECIFIED);
        self.nodes.upsert_from_wire(&list.nodes, fallback_public, list.local_id);

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn phase_cannot_skip_or_regress() {
        let mut connection = Connection::new(Uuid::new_v4());
        assert!(connection.advance_phase(Phase::Ice).is_err());

        connection.advance_phase(Phase::Stun).unwrap();
        assert_eq!(connection.phase(), Phase::Stun);
        assert!(connection.advance_phase(Phase::Stun).is_err());
        assert!(connection.advance_phase(Phase::Probing).is_err());
    }

    #[test]
    fn sequence_number_is_monotonic() {
        let mut connection = Connection::new(Uuid::new_v4());
        let first = connection.next_sequence_number();
        let second = connection.next_sequence_number();
        assert_eq!(second, first + 1);
    }

    #[test]
    fn domain_list_from_other_domain_is_dropped_once_connected() {
        let mut connection = Connection::new(Uuid::new_v4());
        let expected = Uuid::from_u128(1);

        let list = DomainList {
            domain_id: expected,
            domain_local_id: 0,
            session_id: Uuid::from_u128(2),
            local_id: 9,
            permissions: 0,
            is_authenticated: true,
            nodes: vec![],
        };

        assert!(connection.apply_domain_list(expected, &list));
        assert!(connection.domain_connected);

        let mismatched = DomainList {
            domain_id: Uuid::from_u128(99),
            ..list
        };

        assert!(!connection.apply_domain_list(expected, &mismatched));
        assert_eq!(connection.session_id, Some(Uuid::from_u128(2)));
    }
}
