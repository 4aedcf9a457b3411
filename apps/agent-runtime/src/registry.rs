// Purpose: Live agent directory for the admin surface.
// Architecture: Cross-cutting
// Dependencies: dashmap

use dashmap::DashMap;

use crate::agent::AgentSnapshot;
use crate::graph::AgentId;
use crate::metrics::MetricsSnapshot;

/// A snapshot plus its message counters, the pair the admin surface
/// renders for one agent row.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentRecord {
    pub snapshot: AgentSnapshot,
    pub metrics: MetricsSnapshot,
}

/// Registers every agent the coordinator spins up so `GET /agents` has
/// something to answer without reaching back into the `tokio::spawn`
/// handles, mirroring the kernel's `PatternRegistry`: a `DashMap`
/// indexed by key, refreshed in place rather than rebuilt per request.
#[derive(Debug, Default)]
pub struct AgentRegistry {
    records: DashMap<AgentId, AgentRecord>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&self, id: AgentId, snapshot: AgentSnapshot, metrics: MetricsSnapshot) {
        self.records.insert(id, AgentRecord { snapshot, metrics });
    }

    pub fn remove(&self, id: &AgentId) {
        self.records.remove(id);
    }

    pub fn get(&self, id: &AgentId) -> Option<AgentRecord> {
        self.records.get(id).map(|r| r.clone())
    }

    pub fn all(&self) -> Vec<AgentRecord> {
        self.records.iter().map(|r| r.value().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
