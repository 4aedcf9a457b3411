// Purpose: C-DPOP, the continuous-domain DPOP variant with gradient-descent refinement.
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

/// Domain bounds gradient descent projects into, matching the defaults
/// the source's `DCOP` base class constructor used.
const DOMAIN_LB: f64 = -50.0;
const DOMAIN_UB: f64 = 50.0;
const MAX_ITER: u32 = 100;

/// C-DPOP, grounded on `algorithms/dcop/cdpop.py`: UTIL messages carry a
/// full domain x domain cost matrix instead of DPOP's per-value vector,
/// so a node can estimate a child's best response before that child has
/// committed to a value. Once the discrete pass settles an initial
/// value, `nonlinear_optimization` refines it and every neighbor's
/// estimated value by gradient descent; that refined cost is
/// authoritative over the discrete one.
///
/// Assumes every agent's domain has the same length (true for every
/// scenario in this crate's test suite) so the per-neighbor cost
/// matrices line up without needing ragged-array bookkeeping.
pub struct CDpop {
    graph: GraphState,
    neighbor_domains: HashMap<AgentId, Vec<f64>>,
    util_messages: HashMap<AgentId, Vec<Vec<f64>>>,
    util_msg_requested: bool,
    util_received: bool,
    x_ij: Option<Vec<Vec<f64>>>,
    x_ij_prev_norm: Option<f64>,
    prev_initial_val: Option<f64>,
    value: Option<f64>,
    cost: f64,
    cpa: Map<String, Value>,
}

impl CDpop {
    pub fn new() -> Self {
        CDpop {
            graph: GraphState::new(),
            neighbor_domains: HashMap::new(),
            util_messages: HashMap::new(),
            util_msg_requested: false,
            util_received: false,
            x_ij: None,
            x_ij_prev_norm: None,
            prev_initial_val: None,
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

    fn child_best_response(&self, ctx: &AgentCtx<'_>, child: &AgentId, own_index: usize) -> Option<f64> {
        let matrix = self.util_messages.get(child)?;
        let column: Vec<f64> = matrix.iter().map(|row| row.get(own_index).copied().unwrap_or(0.0)).collect();
        let idx = ctx.options.optimization_op.select_index(&column).unwrap_or(0);
        self.neighbor_domains.get(child)?.get(idx).copied()
    }

    async fn compute_util_and_value(&mut self, ctx: &mut AgentCtx<'_>) {
        let domain = ctx.domain.to_vec();
        let n = domain.len();
        let mut c_util_sum = vec![vec![0.0f64; n]; n];
        for child in self.graph.children() {
            if let Some(matrix) = self.util_messages.get(child) {
                for i in 0..n.min(matrix.len()) {
                    for j in 0..n.min(matrix[i].len()) {
                        c_util_sum[i][j] += matrix[i][j];
                    }
                }
            }
        }
        let mut x_i = vec![0.0f64; n];
        for j in 0..n {
            let column: Vec<f64> = (0..n).map(|i| c_util_sum[i][j]).collect();
            let idx = ctx.options.optimization_op.select_index(&column).unwrap_or(0);
            x_i[j] = column[idx];
        }

        if let Some(parent) = self.graph.parent().cloned() {
            let p_domain = self.neighbor_domains.get(&parent).cloned().unwrap_or_default();
            let fixed: Vec<f64> = match self.value {
                Some(v) => vec![v; n],
                None => domain.clone(),
            };
            let mut x_ij = vec![vec![0.0f64; p_domain.len()]; n];
            for i in 0..n {
                for (j, &p_value) in p_domain.iter().enumerate() {
                    x_ij[i][j] = ctx.oracle.evaluate(ctx.id, fixed[i], &parent, p_value) + c_util_sum[i][j.min(n.saturating_sub(1))];
                }
            }
            let norm: f64 = x_ij.iter().flatten().map(|v| v * v).sum::<f64>().sqrt();
            let changed = self
                .x_ij_prev_norm
                .map(|prev| (prev - norm).abs() > f64::EPSILON)
                .unwrap_or(true);
            if changed {
                ctx.publish(&ctx.topics.agent_mailbox(&parent), Tag::Util, json!({"util": x_ij}))
                    .await;
            }
            self.x_ij_prev_norm = Some(norm);
            self.x_ij = Some(x_ij);
        } else {
            let j = ctx.options.optimization_op.select_index(&x_i).unwrap_or(0);
            let initial_value = domain[j];
            let recompute = self
                .prev_initial_val
                .map(|p| (p - initial_value).abs() > f64::EPSILON)
                .unwrap_or(true);
            if recompute {
                let mut agent_values: HashMap<AgentId, f64> = HashMap::new();
                for child in self.graph.children().to_vec() {
                    if let Some(v) = self.child_best_response(ctx, &child, j) {
                        agent_values.insert(child, v);
                    }
                }
                self.nonlinear_optimization(ctx, initial_value, &mut agent_values).await;
                self.cpa
                    .insert(format!("agent-{}", ctx.id), json!(self.value.unwrap_or(initial_value)));
                let cpa_value = Value::Object(self.cpa.clone());
                for child in self.graph.children().to_vec() {
                    ctx.publish(
                        &ctx.topics.agent_mailbox(&child),
                        Tag::Value,
                        json!({"cpa": cpa_value, "initial_value": initial_value}),
                    )
                    .await;
                }
                info!(agent = %ctx.id, value = self.value, cost = self.cost, "c-dpop root refined value");
            }
            self.prev_initial_val = Some(initial_value);
        }
        self.util_received = false;
    }

    async fn nonlinear_optimization(
        &mut self,
        ctx: &mut AgentCtx<'_>,
        initial_value: f64,
        agent_values: &mut HashMap<AgentId, f64>,
    ) {
        let alpha = ctx.config.learning_rate;
        let mut value = initial_value;
        let neighbors = self.graph.neighbors();
        for _ in 0..MAX_ITER {
            let mut grad_sum = 0.0;
            for neighbor in &neighbors {
                let n_value = *agent_values.get(neighbor).unwrap_or(&0.0);
                let (dx, dy) = ctx.oracle.gradient(ctx.id, value, neighbor, n_value);
                grad_sum += dx;
                if self.graph.is_child(neighbor) {
                    let updated = (n_value - alpha * dy).clamp(DOMAIN_LB, DOMAIN_UB);
                    agent_values.insert(neighbor.clone(), updated);
                }
            }
            value = (value - alpha * grad_sum).clamp(DOMAIN_LB, DOMAIN_UB);
        }
        let mut cost = 0.0;
        for neighbor in &neighbors {
            let n_value = *agent_values.get(neighbor).unwrap_or(&0.0);
            cost += ctx.oracle.evaluate(ctx.id, value, neighbor, n_value);
        }
        self.value = Some(value);
        self.cost = cost;
    }
}

#[async_trait]
impl DcopEngine for CDpop {
    fn value(&self) -> Option<f64> {
        self.value
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn on_time_step(&mut self, info: &TimeStepInfo) {
        self.x_ij = None;
        self.x_ij_prev_norm = None;
        self.prev_initial_val = None;
        self.value = None;
        self.cost = 0.0;
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
        let util: Vec<Vec<f64>> = envelope
            .payload
            .get("util")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .filter_map(|r| {
                        r.as_array()
                            .map(|row| row.iter().filter_map(Value::as_f64).collect())
                    })
                    .collect()
            })
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
        let parent_initial_value = envelope
            .payload
            .get("initial_value")
            .and_then(Value::as_f64)
            .unwrap_or(parent_value);
        self.cpa = parent_cpa;

        let p_domain = self.neighbor_domains.get(&sender).cloned().unwrap_or_default();
        let j = match p_domain
            .iter()
            .position(|v| (*v - parent_initial_value).abs() < f64::EPSILON)
        {
            Some(j) => j,
            None => return,
        };
        let x_ij = self.x_ij.as_ref().unwrap();
        let column: Vec<f64> = x_ij.iter().map(|row| row.get(j).copied().unwrap_or(0.0)).collect();
        let idx = ctx.options.optimization_op.select_index(&column).unwrap_or(0);
        let domain = ctx.domain.to_vec();
        let initial_value = domain.get(idx).copied().unwrap_or(0.0);

        let recompute = self
            .prev_initial_val
            .map(|p| (p - initial_value).abs() > f64::EPSILON)
            .unwrap_or(true);
        if recompute {
            let mut agent_values: HashMap<AgentId, f64> = HashMap::new();
            agent_values.insert(sender.clone(), parent_value);
            for child in self.graph.children().to_vec() {
                if let Some(v) = self.child_best_response(ctx, &child, idx) {
                    agent_values.insert(child, v);
                }
            }
            self.nonlinear_optimization(ctx, initial_value, &mut agent_values).await;
            self.cpa
                .insert(format!("agent-{}", ctx.id), json!(self.value.unwrap_or(initial_value)));
            let cpa_value = Value::Object(self.cpa.clone());
            for child in self.graph.children().to_vec() {
                ctx.publish(
                    &ctx.topics.agent_mailbox(&child),
                    Tag::Value,
                    json!({"cpa": cpa_value, "initial_value": initial_value}),
                )
                .await;
            }
            info!(agent = %ctx.id, value = self.value, cost = self.cost, "c-dpop refined value from parent");
        }
        self.prev_initial_val = Some(initial_value);
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{Broker, InProcessBroker};
    use crate::config::{OptimizationOp, RuntimeConfig, RuntimeOptions};
    use crate::constraint::LocalQuadraticOracle;
    use crate::message::Topics;
    use crate::metrics::AgentMetricsCounter;

    fn test_config() -> RuntimeConfig {
        RuntimeConfig {
            domain: "test".into(),
            broker_url: "memory".into(),
            broker_port: 0,
            broker_username: String::new(),
            broker_password: String::new(),
            learning_rate: 0.1,
            handler_comm_exec_delay: 0.0,
            agent_comm_timeout: 1.0,
            ping_proc_call_delay: 0.0,
            max_ping_count: 1,
        }
    }

    fn test_options(op: OptimizationOp) -> RuntimeOptions {
        RuntimeOptions {
            optimization_op: op,
            ..RuntimeOptions::default()
        }
    }

    #[tokio::test]
    async fn isolated_agent_picks_domain_value_by_optimization_op() {
        let broker = InProcessBroker::new();
        let config = test_config();
        let options = test_options(OptimizationOp::Max);
        let id = AgentId::from("a0");
        let topics = Topics::new(config.domain.clone());
        let mut metrics = AgentMetricsCounter::default();
        let mut oracle = LocalQuadraticOracle::default();
        let mut events = Vec::new();
        let domain = vec![-2.0, 4.0, 1.0];
        let mut ctx = AgentCtx {
            id: &id,
            broker: &broker,
            topics: &topics,
            config: &config,
            options: &options,
            metrics: &mut metrics,
            oracle: &mut oracle,
            events: &mut events,
            now: 0.0,
            domain: &domain,
        };
        let mut cdpop = CDpop::new();
        cdpop.execute(&mut ctx).await;
        assert_eq!(cdpop.value(), Some(4.0));
        assert_eq!(cdpop.cost(), 0.0);
    }

    #[tokio::test]
    async fn leaf_with_parent_publishes_a_full_cost_matrix() {
        let broker = InProcessBroker::new();
        let config = test_config();
        let options = test_options(OptimizationOp::Min);
        let id = AgentId::from("a1");
        let topics = Topics::new(config.domain.clone());
        let mut metrics = AgentMetricsCounter::default();
        let mut oracle = LocalQuadraticOracle::default();
        oracle.set(AgentId::from("a0"), crate::constraint::Quadratic::new(1.0, 0.0, 1.0));
        let mut events = Vec::new();
        let domain = vec![0.0, 1.0];
        let mut rx = broker.subscribe(&topics.agent_mailbox(&AgentId::from("a0")));

        let mut cdpop = CDpop::new();
        cdpop.graph.set_parent(AgentId::from("a0")).unwrap();
        cdpop.neighbor_domains.insert(AgentId::from("a0"), vec![0.0, 1.0]);

        let mut ctx = AgentCtx {
            id: &id,
            broker: &broker,
            topics: &topics,
            config: &config,
            options: &options,
            metrics: &mut metrics,
            oracle: &mut oracle,
            events: &mut events,
            now: 0.0,
            domain: &domain,
        };
        cdpop.execute(&mut ctx).await;

        let util_msg = rx.recv().await.expect("parent should receive a UTIL matrix");
        assert_eq!(util_msg.tag, Tag::Util);
        let matrix = util_msg.payload["util"].as_array().unwrap();
        // rows index this agent's own candidate value, columns index the parent's.
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix[0].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn nonlinear_optimization_descends_toward_zero_cost() {
        let broker = InProcessBroker::new();
        let config = test_config();
        let options = test_options(OptimizationOp::Min);
        let id = AgentId::from("a0");
        let topics = Topics::new(config.domain.clone());
        let mut metrics = AgentMetricsCounter::default();
        let mut oracle = LocalQuadraticOracle::default();
        oracle.set(AgentId::from("a1"), crate::constraint::Quadratic::new(1.0, 0.0, 0.0));
        let mut events = Vec::new();
        let domain = vec![0.0];
        let mut ctx = AgentCtx {
            id: &id,
            broker: &broker,
            topics: &topics,
            config: &config,
            options: &options,
            metrics: &mut metrics,
            oracle: &mut oracle,
            events: &mut events,
            now: 0.0,
            domain: &domain,
        };
        let mut cdpop = CDpop::new();
        cdpop.graph.add_child(AgentId::from("a1")).unwrap();
        let mut agent_values = HashMap::new();
        agent_values.insert(AgentId::from("a1"), 0.0);

        cdpop.nonlinear_optimization(&mut ctx, 10.0, &mut agent_values).await;
        assert!(cdpop.value().unwrap().abs() < 1e-6);
        assert!(cdpop.cost() < 1e-9);
    }
}
