// Purpose: DPOP, the bottom-up dynamic-programming DCOP solver.
// Architecture: Core Algorithm
// Dependencies: tracing

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use tracing::info;

use crate::agent::AgentCtx;
use crate::constraint::ConstraintOracle;
use crate::env::TimeStepInfo;
use crate::graph::{AgentId, GraphState};
use crate::message::{Envelope, Tag};

use super::DcopEngine;

/// DPOP, grounded on `algorithms/dcop/dpop.py`: UTIL messages flow leaf
/// to root carrying, for each of *our* domain values, the best
/// achievable cost over our whole subtree; VALUE messages flow root to
/// leaf carrying the fully resolved current partial assignment. UTIL
/// vectors are never normalized.
///
/// Neighbor domains are read straight off `TimeStepInfo` each round
/// rather than exchanged through a dedicated handshake message — the
/// environment already broadcasts them, so there is nothing left for
/// `connection_extra_args` to do here.
pub struct Dpop {
    graph: GraphState,
    neighbor_domains: HashMap<AgentId, Vec<f64>>,
    util_messages: HashMap<AgentId, Vec<f64>>,
    util_msg_requested: bool,
    util_received: bool,
    x_ij: Option<Vec<Vec<f64>>>,
    value: Option<f64>,
    cost: f64,
    cpa: Map<String, Value>,
}

impl Dpop {
    pub fn new() -> Self {
        Dpop {
            graph: GraphState::new(),
            neighbor_domains: HashMap::new(),
            util_messages: HashMap::new(),
            util_msg_requested: false,
            util_received: false,
            x_ij: None,
            value: None,
            cost: 0.0,
            cpa: Map::new(),
        }
    }

    async fn request_util_from_children(&mut self, ctx: &mut AgentCtx<'_>) {
        let missing: Vec<AgentId> = self
            .graph
            .children()
            .iter()
            .filter(|c| !self.util_messages.contains_key(*c))
            .cloned()
            .collect();
        if !self.util_messages.is_empty() && missing.is_empty() {
            self.compute_util_and_value(ctx).await;
        } else {
            for child in missing {
                ctx.publish(&ctx.topics.agent_mailbox(&child), Tag::RequestUtil, json!({}))
                    .await;
            }
        }
    }

    async fn compute_util_and_value(&mut self, ctx: &mut AgentCtx<'_>) {
        let domain = ctx.domain.to_vec();
        let mut c_util_sum = vec![0.0f64; domain.len()];
        for child in self.graph.children() {
            if let Some(util) = self.util_messages.get(child) {
                for (i, v) in util.iter().enumerate() {
                    if i < c_util_sum.len() {
                        c_util_sum[i] += v;
                    }
                }
            }
        }

        if let Some(parent) = self.graph.parent().cloned() {
            let p_domain = self.neighbor_domains.get(&parent).cloned().unwrap_or_default();
            let mut x_ij = vec![vec![0.0f64; p_domain.len()]; domain.len()];
            for (i, &own_value) in domain.iter().enumerate() {
                for (j, &p_value) in p_domain.iter().enumerate() {
                    x_ij[i][j] = ctx.oracle.evaluate(ctx.id, own_value, &parent, p_value) + c_util_sum[i];
                }
            }
            let mut x_j = vec![0.0f64; p_domain.len()];
            for j in 0..p_domain.len() {
                let column: Vec<f64> = (0..domain.len()).map(|i| x_ij[i][j]).collect();
                let idx = ctx.options.optimization_op.select_index(&column).unwrap_or(0);
                x_j[j] = column[idx];
            }
            self.x_ij = Some(x_ij);
            ctx.publish(&ctx.topics.agent_mailbox(&parent), Tag::Util, json!({"util": x_j}))
                .await;
        } else {
            let idx = ctx.options.optimization_op.select_index(&c_util_sum).unwrap_or(0);
            self.cost = c_util_sum[idx];
            self.value = Some(domain[idx]);
            self.cpa.insert(format!("agent-{}", ctx.id), json!(domain[idx]));
            let cpa_value = Value::Object(self.cpa.clone());
            for child in self.graph.children().to_vec() {
                ctx.publish(&ctx.topics.agent_mailbox(&child), Tag::Value, json!({"cpa": cpa_value}))
                    .await;
            }
            info!(agent = %ctx.id, value = self.value, cost = self.cost, "dpop root resolved value");
        }
        self.util_received = false;
    }
}

#[async_trait]
impl DcopEngine for Dpop {
    fn value(&self) -> Option<f64> {
        self.value
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn on_time_step(&mut self, info: &TimeStepInfo) {
        self.x_ij = None;
        self.value = None;
        self.util_messages.clear();
        self.util_msg_requested = false;
        self.util_received = false;
        self.neighbor_domains = info.neighbor_domains.clone();
    }

    fn sync_graph(&mut self, graph: &GraphState) {
        self.graph = graph.clone();
    }

    fn can_resolve(&self) -> bool {
        !self.graph.neighbors().is_empty()
            && !self.util_messages.is_empty()
            && self.util_messages.len() == self.graph.children().len()
            && self.util_received
    }

    async fn execute(&mut self, ctx: &mut AgentCtx<'_>) {
        if self.value.is_some() || self.x_ij.is_some() {
            return;
        }
        let neighbors = self.graph.neighbors();
        if neighbors.is_empty() {
            if let Some(v) = self.select_value(ctx, ctx.domain) {
                self.value = Some(v);
                self.cost = 0.0;
                self.cpa.insert(format!("agent-{}", ctx.id), json!(v));
            }
            return;
        }
        if self.graph.parent().is_some() && self.graph.children().is_empty() {
            self.compute_util_and_value(ctx).await;
        } else if !self.util_msg_requested {
            self.util_msg_requested = true;
            self.request_util_from_children(ctx).await;
        }
    }

    fn select_value(&self, ctx: &AgentCtx<'_>, values: &[f64]) -> Option<f64> {
        let idx = ctx.options.optimization_op.select_index(values)?;
        values.get(idx).copied()
    }

    async fn on_util(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope) {
        let sender = match envelope.sender() {
            Ok(s) => s,
            Err(_) => return,
        };
        let util: Vec<f64> = envelope
            .payload
            .get("util")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();
        if self.graph.is_child(&sender) {
            self.util_messages.insert(sender, util);
        }
        if self.util_messages.len() == self.graph.children().len() {
            self.util_received = true;
        }
        self.request_util_from_children(ctx).await;
    }

    async fn on_value(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope) {
        let sender = match envelope.sender() {
            Ok(s) => s,
            Err(_) => return,
        };
        if !self.graph.is_parent(&sender) || self.x_ij.is_none() {
            return;
        }
        let parent_cpa = match envelope.payload.get("cpa").and_then(Value::as_object) {
            Some(c) => c.clone(),
            None => return,
        };
        let parent_value = match parent_cpa
            .get(&format!("agent-{sender}"))
            .and_then(Value::as_f64)
        {
            Some(v) => v,
            None => return,
        };
        self.cpa = parent_cpa;

        let p_domain = self.neighbor_domains.get(&sender).cloned().unwrap_or_default();
        let j = match p_domain
            .iter()
            .position(|v| (*v - parent_value).abs() < f64::EPSILON)
        {
            Some(j) => j,
            None => return,
        };
        let x_ij = self.x_ij.as_ref().unwrap();
        let column: Vec<f64> = x_ij.iter().map(|row| row[j]).collect();
        let idx = ctx.options.optimization_op.select_index(&column).unwrap_or(0);
        self.cost = column[idx];
        self.value = Some(ctx.domain[idx]);
        self.cpa.insert(format!("agent-{}", ctx.id), json!(ctx.domain[idx]));

        let cpa_value = Value::Object(self.cpa.clone());
        for child in self.graph.children().to_vec() {
            ctx.publish(&ctx.topics.agent_mailbox(&child), Tag::Value, json!({"cpa": cpa_value}))
                .await;
        }
        info!(agent = %ctx.id, value = self.value, cost = self.cost, "dpop resolved value from parent");
    }

    async fn on_inquiry(&mut self, _ctx: &mut AgentCtx<'_>, _envelope: &Envelope) {}

    async fn on_cost(&mut self, _ctx: &mut AgentCtx<'_>, _envelope: &Envelope) {}

    async fn handle_message(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope) -> bool {
        match envelope.tag {
            Tag::RequestUtil => {
                if self.x_ij.is_none() {
                    if !self.graph.children().is_empty() {
                        self.request_util_from_children(ctx).await;
                    } else {
                        self.compute_util_and_value(ctx).await;
                    }
                }
                true
            }
            Tag::Util => {
                self.on_util(ctx, envelope).await;
                true
            }
            Tag::Value => {
                self.on_value(ctx, envelope).await;
                true
            }
            _ => false,
        }
    }
}
