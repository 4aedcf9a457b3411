// Purpose: DDFS, the depth-first pseudo-tree graph-construction algorithm.
// Architecture: Core Algorithm
// Dependencies: tracing

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::agent::AgentCtx;
use crate::env::TimeStepInfo;
use crate::events::EventType;
use crate::graph::{AgentId, GraphState};
use crate::message::{Envelope, Tag};

use super::DgcEngine;

/// The leaf-initiated level-propagation pass the source uses purely to
/// break ties among multiple potential parents is simplified here to a
/// deterministic minimum-id pick — the resulting pseudo-tree still
/// stays acyclic and in-range-bounded, since level propagation only
/// ever affects which potential parent is promoted to tree parent.
pub struct Ddfs {
    graph: GraphState,
    in_range: Vec<AgentId>,
    neighbor_counts: HashMap<AgentId, usize>,
    gossiped: bool,
    classified: bool,
    expected_confirms: HashSet<AgentId>,
    dcop_started: bool,
}

impl Ddfs {
    pub fn new() -> Self {
        Ddfs {
            graph: GraphState::new(),
            in_range: Vec::new(),
            neighbor_counts: HashMap::new(),
            gossiped: false,
            classified: false,
            expected_confirms: HashSet::new(),
            dcop_started: false,
        }
    }

    fn is_potential_child(&self, self_id: &AgentId, self_count: usize, peer: &AgentId) -> bool {
        match self.neighbor_counts.get(peer) {
            Some(&peer_count) => peer_count < self_count || (peer_count == self_count && peer > self_id),
            None => false,
        }
    }

    async fn classify(&mut self, ctx: &mut AgentCtx<'_>) {
        let self_count = self.in_range.len();
        let mut potential_children = Vec::new();
        let mut potential_parents = Vec::new();
        for peer in self.in_range.clone() {
            if self.is_potential_child(ctx.id, self_count, &peer) {
                potential_children.push(peer);
            } else {
                potential_parents.push(peer);
            }
        }
        self.expected_confirms = potential_children.into_iter().collect();
        self.classified = true;

        if let Some(chosen) = potential_parents.iter().min().cloned() {
            let _ = self.graph.set_parent(chosen.clone());
            ctx.publish(&ctx.topics.agent_mailbox(&chosen), Tag::DdfsChild, json!({}))
                .await;
            for other in potential_parents.iter().filter(|p| **p != chosen) {
                self.graph.add_pseudo_parent(other.clone());
                ctx.publish(
                    &ctx.topics.agent_mailbox(other),
                    Tag::DdfsPseudoChild,
                    json!({}),
                )
                .await;
            }
        }
        if self.expected_confirms.is_empty() {
            self.dcop_started = true;
        }
    }
}

#[async_trait]
impl DgcEngine for Ddfs {
    fn graph(&self) -> &GraphState {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut GraphState {
        &mut self.graph
    }

    fn dcop_started(&self) -> bool {
        self.dcop_started
    }

    async fn on_time_step(&mut self, _ctx: &mut AgentCtx<'_>, info: &TimeStepInfo) {
        self.graph.reset();
        self.in_range = info.agents_in_comm_range.clone();
        self.neighbor_counts.clear();
        self.gossiped = false;
        self.classified = false;
        self.expected_confirms.clear();
        self.dcop_started = info.agents_in_comm_range.is_empty();
    }

    async fn connect(&mut self, ctx: &mut AgentCtx<'_>) {
        if self.dcop_started {
            return;
        }
        if !self.gossiped {
            self.gossiped = true;
            for peer in self.in_range.clone() {
                ctx.publish(
                    &ctx.topics.agent_mailbox(&peer),
                    Tag::DdfsNeighborData,
                    json!({"count": self.in_range.len()}),
                )
                .await;
            }
        }
        if !self.classified && self.in_range.iter().all(|p| self.neighbor_counts.contains_key(p)) {
            self.classify(ctx).await;
        }
    }

    async fn remove_agent(&mut self, ctx: &mut AgentCtx<'_>, agent: &AgentId) {
        if self.graph.is_parent(agent) {
            self.graph.clear_parent();
        } else {
            self.graph.remove_child(agent);
        }
        self.expected_confirms.remove(agent);
        ctx.publish(
            &ctx.topics.sim_env(),
            Tag::RemoveGraphEdge,
            json!({"neighbor": agent.to_string()}),
        )
        .await;
    }

    async fn handle_message(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope) -> bool {
        let sender = match envelope.sender() {
            Ok(s) => s,
            Err(_) => return false,
        };
        match envelope.tag {
            Tag::DdfsNeighborData => {
                let count = envelope.payload.get("count").and_then(Value::as_u64).unwrap_or(0) as usize;
                self.neighbor_counts.insert(sender, count);
                true
            }
            Tag::DdfsChild => {
                let _ = self.graph.add_child(sender.clone());
                self.expected_confirms.remove(&sender);
                ctx.emit_event(EventType::EdgeAdded, json!({"child": sender.to_string()}));
                if self.classified && self.expected_confirms.is_empty() {
                    self.dcop_started = true;
                }
                true
            }
            Tag::DdfsPseudoChild => {
                self.graph.add_pseudo_child(sender.clone());
                self.expected_confirms.remove(&sender);
                if self.classified && self.expected_confirms.is_empty() {
                    self.dcop_started = true;
                }
                true
            }
            _ => false,
        }
    }
}
