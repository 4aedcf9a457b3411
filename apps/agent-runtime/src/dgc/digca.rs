// Purpose: DIGCA, the default incremental graph-construction algorithm.
// Architecture: Core Algorithm
// Dependencies: rand, tracing

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::seq::SliceRandom;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::agent::AgentCtx;
use crate::env::TimeStepInfo;
use crate::graph::{AgentId, GraphState};
use crate::message::{Envelope, Tag};

use super::DgcEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Inactive,
    Active,
}

/// `parent_assigned` fires `start_dcop()` for top-down solvers (CoCoA);
/// `child_added` fires it for bottom-up ones (DPOP family). Passed in at
/// construction since the graph layer has no other way to know which
/// DCOP engine it is paired with.
pub struct Digca {
    graph: GraphState,
    bottom_up: bool,
    state: State,
    dcop_started: bool,
    in_range: Vec<AgentId>,
    announced: bool,
    pending_responses: Vec<AgentId>,
    awaiting_ack_from: Option<AgentId>,
    quiet_window_deadline: Option<Instant>,
    default_domain: Vec<f64>,
    /// Orthogonal liveness loop: counts consecutive un-acked pings per
    /// neighbor, independent of the round/time-step reset so a peer
    /// that drops mid-round is still caught. Not reset in
    /// `on_time_step`.
    last_ping_at: Option<Instant>,
    ping_counts: HashMap<AgentId, u32>,
}

impl Digca {
    pub fn new() -> Self {
        Digca {
            graph: GraphState::new(),
            bottom_up: false,
            state: State::Inactive,
            dcop_started: false,
            in_range: Vec::new(),
            announced: false,
            pending_responses: Vec::new(),
            awaiting_ack_from: None,
            quiet_window_deadline: None,
            default_domain: Vec::new(),
            last_ping_at: None,
            ping_counts: HashMap::new(),
        }
    }

    pub fn with_traversing_order(bottom_up: bool) -> Self {
        let mut d = Self::new();
        d.bottom_up = bottom_up;
        d
    }

    fn unconnected_in_range(&self, self_id: &AgentId) -> Vec<AgentId> {
        self.in_range
            .iter()
            .filter(|p| *p != self_id && !self.graph.is_neighbor(p))
            .cloned()
            .collect()
    }

    async fn finalize_quiet_window(&mut self, ctx: &mut AgentCtx<'_>) {
        let chosen = self.pending_responses.choose(&mut rand::thread_rng()).cloned();
        if let Some(target) = chosen {
            for other in self.pending_responses.iter().filter(|p| **p != target) {
                ctx.publish(
                    &ctx.topics.agent_mailbox(other),
                    Tag::AnnounceResponseIgnored,
                    json!({}),
                )
                .await;
            }
            self.pending_responses.clear();
            ctx.publish(
                &ctx.topics.agent_mailbox(&target),
                Tag::AddMe,
                json!({"domain": ctx.domain}),
            )
            .await;
            self.state = State::Active;
            self.awaiting_ack_from = Some(target);
            self.quiet_window_deadline =
                Some(Instant::now() + Duration::from_secs_f64(ctx.config.agent_comm_timeout.max(0.05)));
        } else {
            debug!(agent = %ctx.id, "quiet window elapsed with no candidates, starting dcop");
            self.dcop_started = true;
        }
    }

    /// Pings every current neighbor at most once per
    /// `PING_PROC_CALL_DELAY_IN_SECONDS`; a neighbor that racks up more
    /// than `MAX_PING_COUNT` consecutive un-acked pings is dropped as
    /// dead. `dcop_started` is cleared on a drop so the next
    /// `connect()` tick re-enters the announce/quiet-window dance —
    /// `start_dcop()` is idempotent, so a partial restart here is safe
    /// even mid-resolution.
    async fn run_ping_loop(&mut self, ctx: &mut AgentCtx<'_>) {
        let interval = Duration::from_secs_f64(ctx.config.ping_proc_call_delay.max(0.01));
        let due = self
            .last_ping_at
            .map(|last| Instant::now() >= last + interval)
            .unwrap_or(true);
        if !due {
            return;
        }
        self.last_ping_at = Some(Instant::now());

        let neighbors = self.graph.neighbors();
        let mut lost = Vec::new();
        for neighbor in &neighbors {
            let count = self.ping_counts.entry(neighbor.clone()).or_insert(0);
            *count += 1;
            if *count > ctx.config.max_ping_count {
                lost.push(neighbor.clone());
                continue;
            }
            ctx.publish(&ctx.topics.agent_mailbox(neighbor), Tag::Ping, json!({})).await;
        }
        for neighbor in lost {
            warn!(agent = %ctx.id, %neighbor, "neighbor unresponsive past max_ping_count, dropping edge");
            self.ping_counts.remove(&neighbor);
            self.remove_agent(ctx, &neighbor).await;
            self.state = State::Inactive;
            self.dcop_started = false;
            self.announced = false;
            self.quiet_window_deadline =
                Some(Instant::now() + Duration::from_secs_f64(ctx.config.agent_comm_timeout.max(0.05)));
        }
    }
}

#[async_trait]
impl DgcEngine for Digca {
    fn graph(&self) -> &GraphState {
        &self.graph
    }

    fn graph_mut(&mut self) -> &mut GraphState {
        &mut self.graph
    }

    fn dcop_started(&self) -> bool {
        self.dcop_started
    }

    async fn on_time_step(&mut self, ctx: &mut AgentCtx<'_>, info: &TimeStepInfo) {
        self.in_range = info.agents_in_comm_range.clone();
        self.default_domain = info.domain.clone();
        self.state = State::Inactive;
        self.dcop_started = false;
        self.announced = false;
        self.pending_responses.clear();
        self.awaiting_ack_from = None;
        self.quiet_window_deadline =
            Some(Instant::now() + Duration::from_secs_f64(ctx.config.agent_comm_timeout.max(0.05)));
    }

    fn has_potential_neighbor(&self, in_range: &[AgentId], self_id: &AgentId) -> bool {
        in_range.iter().any(|p| p != self_id)
    }

    async fn connect(&mut self, ctx: &mut AgentCtx<'_>) {
        if self.dcop_started {
            self.run_ping_loop(ctx).await;
            return;
        }
        if self.state == State::Inactive {
            let unconnected = self.unconnected_in_range(ctx.id);
            let has_potential_parent = unconnected.iter().any(|p| p < ctx.id);
            if !self.announced && has_potential_parent {
                ctx.publish(&ctx.topics.agent_public(), Tag::Announce, json!({})).await;
                self.announced = true;
                return;
            }
        }
        if let Some(deadline) = self.quiet_window_deadline {
            if Instant::now() >= deadline {
                self.finalize_quiet_window(ctx).await;
            }
        }
    }

    async fn remove_agent(&mut self, ctx: &mut AgentCtx<'_>, agent: &AgentId) {
        if self.graph.is_parent(agent) {
            self.graph.clear_parent();
        } else {
            self.graph.remove_child(agent);
        }
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
            Tag::Announce => {
                if self.state == State::Inactive
                    && ctx.id < &sender
                    && self.in_range.contains(&sender)
                {
                    ctx.publish(
                        &ctx.topics.agent_mailbox(&sender),
                        Tag::AnnounceResponse,
                        json!({}),
                    )
                    .await;
                }
                true
            }
            Tag::AnnounceResponse => {
                if self.announced && self.awaiting_ack_from.is_none() {
                    self.pending_responses.push(sender);
                }
                true
            }
            Tag::AnnounceResponseIgnored => true,
            Tag::AddMe => {
                let under_degree_cap = ctx
                    .options
                    .max_out_degree
                    .map(|max| self.graph.children().len() < max)
                    .unwrap_or(true);
                if self.state == State::Inactive && under_degree_cap {
                    if let Err(e) = self.graph.add_child(sender.clone()) {
                        debug!(agent = %ctx.id, error = %e, "rejecting add_me");
                        ctx.publish(
                            &ctx.topics.agent_mailbox(&sender),
                            Tag::AlreadyActive,
                            json!({}),
                        )
                        .await;
                        return true;
                    }
                    ctx.emit_event(
                        crate::events::EventType::EdgeAdded,
                        json!({"child": sender.to_string()}),
                    );
                    ctx.publish(
                        &ctx.topics.agent_mailbox(&sender),
                        Tag::ChildAdded,
                        json!({"domain": ctx.domain}),
                    )
                    .await;
                } else {
                    ctx.publish(
                        &ctx.topics.agent_mailbox(&sender),
                        Tag::AlreadyActive,
                        json!({}),
                    )
                    .await;
                }
                true
            }
            Tag::ChildAdded => {
                if self.awaiting_ack_from.as_ref() == Some(&sender) {
                    let _ = self.graph.set_parent(sender.clone());
                    self.state = State::Inactive;
                    self.awaiting_ack_from = None;
                    ctx.emit_event(
                        crate::events::EventType::ParentAssigned,
                        json!({"parent": sender.to_string()}),
                    );
                    ctx.publish(
                        &ctx.topics.agent_mailbox(&sender),
                        Tag::ParentAssigned,
                        json!({"domain": ctx.domain}),
                    )
                    .await;
                    if self.bottom_up {
                        self.dcop_started = true;
                    }
                    info!(agent = %ctx.id, parent = %sender, "parent assigned");
                }
                true
            }
            Tag::ParentAssigned => {
                if self.graph.is_child(&sender) {
                    if !self.bottom_up {
                        self.dcop_started = true;
                    }
                }
                true
            }
            Tag::Ping => {
                ctx.publish(&ctx.topics.agent_mailbox(&sender), Tag::PingResponse, json!({}))
                    .await;
                true
            }
            Tag::PingResponse => {
                self.ping_counts.insert(sender, 0);
                true
            }
            Tag::AlreadyActive => {
                if self.awaiting_ack_from.as_ref() == Some(&sender) {
                    self.awaiting_ack_from = None;
                    self.state = State::Inactive;
                    self.quiet_window_deadline = Some(Instant::now());
                }
                true
            }
            _ => false,
        }
    }

    fn extra_args(&self) -> Value {
        json!({"domain": self.default_domain})
    }
}
