// Purpose: CoCoA, the top-down ask-for-cost DCOP solver.
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

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Active,
    Done,
}

#[derive(Debug, Clone, Copy)]
struct CostEntry {
    /// The value this agent would take, aligned with the round's own
    /// domain ordering.
    own_value: f64,
    /// The neighbor's best response to `own_value`.
    neighbor_value: f64,
    cost: f64,
}

/// CoCoA, grounded on `algorithms/dcop/cocoa.py`: every agent inquires
/// each tree neighbor for its per-value best response, then — once
/// every neighbor has replied — picks the own-domain value that
/// optimizes the summed cost.
pub struct Cocoa {
    graph: GraphState,
    state: State,
    cost_map: HashMap<AgentId, Vec<CostEntry>>,
    value: Option<f64>,
    cost: f64,
    cpa: Map<String, Value>,
}

impl Cocoa {
    pub fn new() -> Self {
        Cocoa {
            graph: GraphState::new(),
            state: State::Idle,
            cost_map: HashMap::new(),
            value: None,
            cost: 0.0,
            cpa: Map::new(),
        }
    }

    fn neighbors(&self) -> Vec<AgentId> {
        self.graph.neighbors()
    }

    async fn resolve_value(&mut self, ctx: &mut AgentCtx<'_>) {
        let domain = ctx.domain.to_vec();
        let mut totals = vec![0.0f64; domain.len()];
        let mut params: Vec<HashMap<AgentId, f64>> = vec![HashMap::new(); domain.len()];
        for (neighbor, entries) in &self.cost_map {
            for (i, entry) in entries.iter().enumerate() {
                if i < totals.len() {
                    totals[i] += entry.cost;
                    params[i].insert(neighbor.clone(), entry.neighbor_value);
                }
            }
        }
        let best = match ctx.options.optimization_op.select_index(&totals) {
            Some(i) => i,
            None => return,
        };
        let value = domain[best];
        let best_params = params[best].clone();

        self.value = Some(value);
        self.state = State::Done;
        self.cpa.insert(format!("agent-{}", ctx.id), json!(value));

        let mut cost = 0.0;
        for (neighbor, n_value) in &best_params {
            cost += ctx.oracle.evaluate(ctx.id, value, neighbor, *n_value);
        }
        self.cost = cost;

        let cpa_value = Value::Object(self.cpa.clone());
        for neighbor in self.neighbors() {
            ctx.publish(
                &ctx.topics.agent_mailbox(&neighbor),
                Tag::UpdateState,
                json!({"state": "DONE", "cpa": cpa_value}),
            )
            .await;
        }
        self.cost_map.clear();
        info!(agent = %ctx.id, value, cost = self.cost, "cocoa resolved value");
    }
}

#[async_trait]
impl DcopEngine for Cocoa {
    fn value(&self) -> Option<f64> {
        self.value
    }

    fn cost(&self) -> f64 {
        self.cost
    }

    fn on_time_step(&mut self, _info: &TimeStepInfo) {
        self.state = State::Idle;
        self.cost_map.clear();
        self.value = None;
    }

    fn sync_graph(&mut self, graph: &GraphState) {
        self.graph = graph.clone();
    }

    fn can_resolve(&self) -> bool {
        let neighbors = self.neighbors();
        self.state == State::Active && !neighbors.is_empty() && self.cost_map.len() == neighbors.len()
    }

    async fn execute(&mut self, ctx: &mut AgentCtx<'_>) {
        if self.state != State::Idle {
            return;
        }
        self.value = None;
        self.state = State::Active;
        let neighbors = self.neighbors();
        if neighbors.is_empty() {
            if let Some(v) = self.select_value(ctx, ctx.domain) {
                self.value = Some(v);
                self.state = State::Done;
                self.cpa.insert(format!("agent-{}", ctx.id), json!(v));
            }
            return;
        }
        let domain = ctx.domain.to_vec();
        for neighbor in neighbors {
            ctx.publish(
                &ctx.topics.agent_mailbox(&neighbor),
                Tag::Inquiry,
                json!({"domain": domain}),
            )
            .await;
        }
    }

    fn select_value(&self, ctx: &AgentCtx<'_>, values: &[f64]) -> Option<f64> {
        let idx = ctx.options.optimization_op.select_index(values)?;
        values.get(idx).copied()
    }

    async fn on_util(&mut self, _ctx: &mut AgentCtx<'_>, _envelope: &Envelope) {}

    async fn on_value(&mut self, _ctx: &mut AgentCtx<'_>, _envelope: &Envelope) {}

    async fn on_inquiry(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope) {
        let sender = match envelope.sender() {
            Ok(s) => s,
            Err(_) => return,
        };
        let requester_domain: Vec<f64> = envelope
            .payload
            .get("domain")
            .and_then(Value::as_array)
            .map(|a| a.iter().filter_map(Value::as_f64).collect())
            .unwrap_or_default();

        // If we've already committed to a value and the inquirer is our
        // child, our response must keep that value fixed.
        let fixed = if self.graph.is_child(&sender) { self.value } else { None };
        let own_candidates: Vec<f64> = match fixed {
            Some(v) => vec![v],
            None => ctx.domain.to_vec(),
        };

        let mut response = Vec::with_capacity(requester_domain.len());
        for requester_value in &requester_domain {
            let costs: Vec<f64> = own_candidates
                .iter()
                .map(|own| ctx.oracle.evaluate(ctx.id, *own, &sender, *requester_value))
                .collect();
            let idx = ctx.options.optimization_op.select_index(&costs).unwrap_or(0);
            response.push(json!({
                "requester_value": requester_value,
                "own_value": own_candidates[idx],
                "cost": costs[idx],
            }));
        }
        ctx.publish(
            &ctx.topics.agent_mailbox(&sender),
            Tag::Cost,
            json!({"cost_map": response}),
        )
        .await;
    }

    async fn on_cost(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope) {
        let sender = match envelope.sender() {
            Ok(s) => s,
            Err(_) => return,
        };
        let entries = envelope
            .payload
            .get("cost_map")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let parsed: Vec<CostEntry> = entries
            .iter()
            .filter_map(|e| {
                Some(CostEntry {
                    own_value: e.get("requester_value")?.as_f64()?,
                    neighbor_value: e.get("own_value")?.as_f64()?,
                    cost: e.get("cost")?.as_f64()?,
                })
            })
            .collect();
        self.cost_map.insert(sender, parsed);
        if self.can_resolve() {
            self.resolve_value(ctx).await;
        }
    }

    async fn handle_message(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope) -> bool {
        match envelope.tag {
            Tag::Inquiry => {
                self.on_inquiry(ctx, envelope).await;
                true
            }
            Tag::Cost => {
                self.on_cost(ctx, envelope).await;
                true
            }
            Tag::UpdateState => {
                if let Some("DONE") = envelope.payload.get("state").and_then(Value::as_str) {
                    if self.value.is_none() {
                        if let Some(cpa) = envelope.payload.get("cpa").and_then(Value::as_object) {
                            self.cpa = cpa.clone();
                        }
                        self.execute(ctx).await;
                    }
                }
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
        let mut oracle = crate::constraint::LocalQuadraticOracle::default();
        let mut events = Vec::new();
        let domain = vec![1.0, 2.0, 3.0];
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
        let mut cocoa = Cocoa::new();
        cocoa.execute(&mut ctx).await;
        assert_eq!(cocoa.value(), Some(3.0));
        assert_eq!(cocoa.cost(), 0.0);
    }

    #[tokio::test]
    async fn on_inquiry_responds_with_the_best_own_value_per_requester_value() {
        let broker = InProcessBroker::new();
        let config = test_config();
        let options = test_options(OptimizationOp::Min);
        let id = AgentId::from("a0");
        let topics = Topics::new(config.domain.clone());
        let mut metrics = AgentMetricsCounter::default();
        let mut oracle = crate::constraint::LocalQuadraticOracle::default();
        oracle.set(AgentId::from("a1"), crate::constraint::Quadratic::new(1.0, 0.0, 0.0));
        let mut events = Vec::new();
        let domain = vec![-1.0, 0.0, 1.0];
        let mut rx = broker.subscribe(&topics.agent_mailbox(&AgentId::from("a1")));
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
        let mut cocoa = Cocoa::new();
        let inquiry = Envelope::new(
            Tag::Inquiry,
            json!({"agent_id": "a1", "domain": [-1.0, 0.0, 1.0]}),
            0.0,
        );
        cocoa.on_inquiry(&mut ctx, &inquiry).await;

        let reply = rx.recv().await.expect("a1 should receive a cost reply");
        let entries = reply.payload["cost_map"].as_array().unwrap();
        assert_eq!(entries.len(), 3);
        // `f(x,y) = x^2`, minimized by x=0 regardless of the requester's value.
        for entry in entries {
            assert_eq!(entry["own_value"].as_f64(), Some(0.0));
        }
    }

    #[tokio::test]
    async fn full_cost_map_resolves_to_the_minimizing_value() {
        let broker = InProcessBroker::new();
        let config = test_config();
        let options = test_options(OptimizationOp::Min);
        let id = AgentId::from("a0");
        let topics = Topics::new(config.domain.clone());
        let mut metrics = AgentMetricsCounter::default();
        let mut oracle = crate::constraint::LocalQuadraticOracle::default();
        let mut events = Vec::new();
        let domain = vec![-1.0, 0.0, 1.0];
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
        let mut cocoa = Cocoa::new();
        cocoa.graph.add_child(AgentId::from("a1")).unwrap();
        cocoa.state = State::Active;

        let cost = Envelope::new(
            Tag::Cost,
            json!({
                "agent_id": "a1",
                "cost_map": [
                    {"requester_value": -1.0, "own_value": 0.0, "cost": 1.0},
                    {"requester_value": 0.0, "own_value": 0.0, "cost": 0.0},
                    {"requester_value": 1.0, "own_value": 0.0, "cost": 1.0},
                ],
            }),
            0.0,
        );
        cocoa.on_cost(&mut ctx, &cost).await;
        assert_eq!(cocoa.value(), Some(0.0));
        assert_eq!(cocoa.cost(), 0.0);
    }
}
