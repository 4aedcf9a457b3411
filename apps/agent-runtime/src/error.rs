// Purpose: Error taxonomy, one enum per layer.
// Architecture: Cross-cutting
// Dependencies: thiserror

use thiserror::Error;

use crate::graph::AgentId;

#[derive(Error, Debug)]
pub enum GraphError {
    #[error("agent {0} is not a known neighbor")]
    UnknownNeighbor(AgentId),

    #[error("agent {0} is already a child")]
    AlreadyChild(AgentId),

    #[error("agent {0} is already the parent")]
    AlreadyParent(AgentId),

    #[error("cannot set parent to {0}: a parent is already assigned")]
    ParentAlreadyAssigned(AgentId),

    #[error("edge {from} -> {to} would close a cycle")]
    CycleDetected { from: AgentId, to: AgentId },
}

#[derive(Error, Debug)]
pub enum DcopError {
    #[error("no domain has been assigned for this time step")]
    MissingDomain,

    #[error("missing neighbor domain for {0}")]
    MissingNeighborDomain(AgentId),

    #[error("missing util message from child {0}")]
    MissingUtil(AgentId),

    #[error("missing active constraint for edge {0},{1}")]
    MissingConstraint(AgentId, AgentId),

    #[error("cost map from {0} does not cover the full domain")]
    IncompleteCostMap(AgentId),
}

#[derive(Error, Debug)]
pub enum MessageError {
    #[error("malformed message body: {0}")]
    Malformed(String),

    #[error("unrecognized message tag: {0}")]
    UnknownTag(String),

    #[error("message payload is missing required field `{0}`")]
    MissingField(&'static str),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable `{0}`")]
    MissingVar(&'static str),

    #[error("invalid value for environment variable `{name}`: {reason}")]
    InvalidVar { name: &'static str, reason: String },

    #[error("unknown dcop algorithm `{0}`")]
    UnknownDcopAlgorithm(String),

    #[error("unknown graph algorithm `{0}`")]
    UnknownGraphAlgorithm(String),
}
