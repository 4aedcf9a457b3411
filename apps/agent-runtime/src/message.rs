// Purpose: The closed message tag set, JSON envelope, and topic routing.
// Architecture: Core Data Structure
// Dependencies: serde, serde_json, chrono

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::MessageError;
use crate::graph::AgentId;

/// The closed set of message tags, exact wire strings as sent on the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tag {
    #[serde(rename = "ANNOUNCE")]
    Announce,
    #[serde(rename = "ANNOUNCE_RESPONSE_MSG")]
    AnnounceResponse,
    #[serde(rename = "ANNOUNCE_IGNORED_MSG")]
    AnnounceResponseIgnored,
    #[serde(rename = "ADD_ME")]
    AddMe,
    #[serde(rename = "CHILD_ADDED")]
    ChildAdded,
    #[serde(rename = "PARENT_ASSIGNED")]
    ParentAssigned,
    #[serde(rename = "ALREADY_ACTIVE")]
    AlreadyActive,
    #[serde(rename = "PING")]
    Ping,
    #[serde(rename = "PING_RESPONSE")]
    PingResponse,
    #[serde(rename = "CONSTRAINT_CHANGED")]
    ConstraintChanged,
    #[serde(rename = "PARENT_AVAILABLE")]
    ParentAvailable,
    #[serde(rename = "PARENT_ALREADY_ASSIGNED")]
    ParentAlreadyAssigned,
    #[serde(rename = "AGENT_REGISTRATION")]
    AgentRegistration,
    #[serde(rename = "LEVEL_MESSAGE")]
    DbfsLevel,
    #[serde(rename = "ACK_MESSAGE")]
    DbfsAck,
    #[serde(rename = "LEVEL_IGNORED_MESSAGE")]
    DbfsLevelIgnored,
    #[serde(rename = "DDFS_NEIGHBOR_DATA")]
    DdfsNeighborData,
    #[serde(rename = "DDFS_VALUE_MSG")]
    DdfsValue,
    #[serde(rename = "DDFS_POSITION_MSG")]
    DdfsPosition,
    #[serde(rename = "DDFS_CHILD_MSG")]
    DdfsChild,
    #[serde(rename = "DDFS_PSEUDO_CHILD_MSG")]
    DdfsPseudoChild,
    #[serde(rename = "UpdateStateMsg")]
    UpdateState,
    #[serde(rename = "InquiryMessage")]
    Inquiry,
    #[serde(rename = "CostMessage")]
    Cost,
    #[serde(rename = "ExecutionRequest")]
    ExecutionRequest,
    #[serde(rename = "ValueMessage")]
    Value,
    #[serde(rename = "UtilMessage")]
    Util,
    #[serde(rename = "RequestUtilMessage")]
    RequestUtil,
    #[serde(rename = "SIM_ENV_CURRENT_TIME_STEP_MSG")]
    SimEnvTimeStep,
    #[serde(rename = "VALUE_SELECTED_MSG")]
    ValueSelected,
    #[serde(rename = "STOP_AGENT")]
    StopAgent,
    #[serde(rename = "ADD_GRAPH_EDGE")]
    AddGraphEdge,
    #[serde(rename = "REMOVE_GRAPH_EDGE")]
    RemoveGraphEdge,
    #[serde(rename = "AGENT_ADDED")]
    AgentAdded,
    #[serde(rename = "AGENT_REMOVED")]
    AgentRemoved,
}

impl Tag {
    pub const fn as_wire_str(&self) -> &'static str {
        match self {
            Tag::Announce => "ANNOUNCE",
            Tag::AnnounceResponse => "ANNOUNCE_RESPONSE_MSG",
            Tag::AnnounceResponseIgnored => "ANNOUNCE_IGNORED_MSG",
            Tag::AddMe => "ADD_ME",
            Tag::ChildAdded => "CHILD_ADDED",
            Tag::ParentAssigned => "PARENT_ASSIGNED",
            Tag::AlreadyActive => "ALREADY_ACTIVE",
            Tag::Ping => "PING",
            Tag::PingResponse => "PING_RESPONSE",
            Tag::ConstraintChanged => "CONSTRAINT_CHANGED",
            Tag::ParentAvailable => "PARENT_AVAILABLE",
            Tag::ParentAlreadyAssigned => "PARENT_ALREADY_ASSIGNED",
            Tag::AgentRegistration => "AGENT_REGISTRATION",
            Tag::DbfsLevel => "LEVEL_MESSAGE",
            Tag::DbfsAck => "ACK_MESSAGE",
            Tag::DbfsLevelIgnored => "LEVEL_IGNORED_MESSAGE",
            Tag::DdfsNeighborData => "DDFS_NEIGHBOR_DATA",
            Tag::DdfsValue => "DDFS_VALUE_MSG",
            Tag::DdfsPosition => "DDFS_POSITION_MSG",
            Tag::DdfsChild => "DDFS_CHILD_MSG",
            Tag::DdfsPseudoChild => "DDFS_PSEUDO_CHILD_MSG",
            Tag::UpdateState => "UpdateStateMsg",
            Tag::Inquiry => "InquiryMessage",
            Tag::Cost => "CostMessage",
            Tag::ExecutionRequest => "ExecutionRequest",
            Tag::Value => "ValueMessage",
            Tag::Util => "UtilMessage",
            Tag::RequestUtil => "RequestUtilMessage",
            Tag::SimEnvTimeStep => "SIM_ENV_CURRENT_TIME_STEP_MSG",
            Tag::ValueSelected => "VALUE_SELECTED_MSG",
            Tag::StopAgent => "STOP_AGENT",
            Tag::AddGraphEdge => "ADD_GRAPH_EDGE",
            Tag::RemoveGraphEdge => "REMOVE_GRAPH_EDGE",
            Tag::AgentAdded => "AGENT_ADDED",
            Tag::AgentRemoved => "AGENT_REMOVED",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_wire_str())
    }
}

/// The JSON envelope every message carries: `{type, payload, timestamp}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub tag: Tag,
    pub payload: Value,
    pub timestamp: f64,
}

impl Envelope {
    pub fn new(tag: Tag, payload: Value, timestamp: f64) -> Self {
        Envelope {
            tag,
            payload,
            timestamp,
        }
    }

    pub fn sender(&self) -> Result<AgentId, MessageError> {
        self.payload
            .get("agent_id")
            .and_then(Value::as_str)
            .map(AgentId::from)
            .ok_or(MessageError::MissingField("agent_id"))
    }

    pub fn to_json(&self) -> Result<String, MessageError> {
        serde_json::to_string(self).map_err(|e| MessageError::Malformed(e.to_string()))
    }

    pub fn from_json(raw: &str) -> Result<Self, MessageError> {
        serde_json::from_str(raw).map_err(|e| MessageError::Malformed(e.to_string()))
    }
}

/// Rejects a message whose `timestamp` is strictly older than the
/// receiver's `latest_event_timestamp` (invariant 5: the timestamp fence).
pub fn passes_timestamp_fence(envelope: &Envelope, latest_event_timestamp: f64) -> bool {
    envelope.timestamp >= latest_event_timestamp
}

/// Rejects a message that an agent published to its own topic (the
/// broker fans out broadcasts to the publisher too).
pub fn is_self_message(envelope: &Envelope, self_id: &AgentId) -> bool {
    matches!(envelope.sender(), Ok(sender) if &sender == self_id)
}

/// Routing-key construction over the `{domain}.ddcop` exchange.
#[derive(Debug, Clone)]
pub struct Topics {
    domain: String,
}

impl Topics {
    pub fn new(domain: impl Into<String>) -> Self {
        Topics {
            domain: domain.into(),
        }
    }

    pub fn exchange(&self) -> String {
        format!("{}.ddcop", self.domain)
    }

    pub fn agent_mailbox(&self, id: &AgentId) -> String {
        format!("{}.agent.{}", self.domain, id)
    }

    pub fn agent_public(&self) -> String {
        format!("{}.agent.public", self.domain)
    }

    pub fn sim_env(&self) -> String {
        format!("{}.sim_env", self.domain)
    }

    pub fn command_factory(&self) -> String {
        format!("{}.command.factory", self.domain)
    }

    pub fn monitoring(&self) -> String {
        format!("{}.monitoring", self.domain)
    }

    pub fn metrics(&self) -> String {
        format!("{}.metrics", self.domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_strings_round_trip() {
        for tag in [Tag::Announce, Tag::Util, Tag::DdfsPseudoChild, Tag::StopAgent] {
            let json = serde_json::to_string(&tag).unwrap();
            let parsed: Tag = serde_json::from_str(&json).unwrap();
            assert_eq!(tag.as_wire_str(), parsed.as_wire_str());
        }
    }

    #[test]
    fn timestamp_fence_drops_stale_messages() {
        let env = Envelope::new(Tag::Util, json!({"agent_id": "a1"}), 1.0);
        assert!(!passes_timestamp_fence(&env, 2.0));
        assert!(passes_timestamp_fence(&env, 1.0));
        assert!(passes_timestamp_fence(&env, 0.5));
    }

    #[test]
    fn self_message_is_detected() {
        let env = Envelope::new(Tag::Announce, json!({"agent_id": "a1"}), 0.0);
        assert!(is_self_message(&env, &AgentId::from("a1")));
        assert!(!is_self_message(&env, &AgentId::from("a2")));
    }

    #[test]
    fn topics_follow_domain_convention() {
        let t = Topics::new("ddcop-dev");
        assert_eq!(t.exchange(), "ddcop-dev.ddcop");
        assert_eq!(t.agent_mailbox(&AgentId::from("a0")), "ddcop-dev.agent.a0");
        assert_eq!(t.agent_public(), "ddcop-dev.agent.public");
    }
}
