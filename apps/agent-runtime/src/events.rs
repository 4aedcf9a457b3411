// Purpose: Observability events fanned out to the admin surface.
// Architecture: Cross-cutting
// Dependencies: serde, uuid, chrono

use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::graph::AgentId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    EdgeAdded,
    EdgeRemoved,
    ParentAssigned,
    StateChanged,
    ValueSelected,
    AgentDisconnected,
    AgentShutdown,
}

#[derive(Debug, Clone, Serialize)]
pub struct RuntimeEvent {
    pub id: Uuid,
    pub agent_id: AgentId,
    pub event_type: EventType,
    pub timestamp: f64,
    pub payload: Value,
}

impl RuntimeEvent {
    pub fn new(agent_id: AgentId, event_type: EventType, timestamp: f64, payload: Value) -> Self {
        RuntimeEvent {
            id: Uuid::new_v4(),
            agent_id,
            event_type,
            timestamp,
            payload,
        }
    }
}
