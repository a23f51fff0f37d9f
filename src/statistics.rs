//! Connection registry backing the optional status API: how many clients
//! are bridged right now, and which phase each one has reached.

use ahash::AHashMap;
use bridge_core::connection::Phase;
use parking_lot::RwLock;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportedPhase {
    Probing,
    Stun,
    Ice,
    DomainConnect,
    DomainConnected,
}

impl From<Phase> for ReportedPhase {
    fn from(phase: Phase) -> Self {
        match phase {
            Phase::Probing => Self::Probing,
            Phase::Stun => Self::Stun,
            Phase::Ice => Self::Ice,
            Phase::DomainConnect => Self::DomainConnect,
            Phase::DomainConnected => Self::DomainConnected,
        }
    }
}

/// Process-wide table of live connections, keyed by client id.
#[derive(Clone, Default)]
pub struct Statistics(std::sync::Arc<RwLock<AHashMap<Uuid, ReportedPhase>>>);

impl Statistics {
    pub fn register(&self, client_id: Uuid) {
        self.0.write().insert(client_id, ReportedPhase::Probing);
    }

    pub fn update_phase(&self, client_id: Uuid, phase: Phase) {
        if let Some(entry) = self.0.write().get_mut(&client_id) {
            *entry = phase.into();
        }
    }

    pub fn unregister(&self, client_id: &Uuid) {
        self.0.write().remove(client_id);
    }

    pub fn count(&self) -> usize {
        self.0.read().len()
    }

    pub fn snapshot(&self) -> Vec<(Uuid, ReportedPhase)> {
        self.0.read().iter().map(|(id, phase)| (*id, *phase)).collect()
    }
}
