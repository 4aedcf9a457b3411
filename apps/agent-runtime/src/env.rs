// Purpose: The simulation-environment contract the coordinator drives.
// Architecture: External Collaborator
// Dependencies: std

use std::collections::HashMap;

use crate::constraint::Quadratic;
use crate::graph::AgentId;

/// What the environment broadcasts to every agent at the start of a
/// round. `neighbor_constraints` plays the same role for constraint
/// coefficients that `neighbor_domains` plays for domains: rather than
/// exchanging them through a dedicated `CONSTRAINT_CHANGED` handshake,
/// the environment already knows every edge's coefficients and
/// broadcasts the ones touching this agent every round.
#[derive(Debug, Clone)]
pub struct TimeStepInfo {
    pub timestep: u64,
    pub event_timestamp: f64,
    pub agents_in_comm_range: Vec<AgentId>,
    pub domain: Vec<f64>,
    pub neighbor_domains: HashMap<AgentId, Vec<f64>>,
    pub neighbor_constraints: HashMap<AgentId, Quadratic>,
}

/// The environment is the sole authority on domains, in-range sets and
/// the global objective. This crate never ships
/// a concrete mobile-sensing or grid-world environment; callers supply
/// their own `SimulationHandle`, and `tests/` uses a small deterministic
/// double built directly from a `Scenario`.
pub trait SimulationHandle: Send + Sync {
    fn agent_ids(&self) -> Vec<AgentId>;

    fn time_step_info(&self, timestep: u64, agent: &AgentId) -> TimeStepInfo;

    /// Called once a `VALUE_SELECTED` has been observed for `agent` at
    /// this timestep; lets the environment apply the move.
    fn record_value_selected(&mut self, agent: &AgentId, value: f64, cost: f64);

    /// The running score/objective after the last recorded round,
    /// reported in the metrics snapshot alongside `messages_count`.
    fn score(&self) -> f64;
}

/// A deterministic, in-memory environment built from a fixed node set,
/// a static in-range graph and per-agent domains — enough to drive the
/// end-to-end test scenarios without any network or I/O.
#[derive(Debug, Clone, Default)]
pub struct StaticEnvironment {
    pub agents: Vec<AgentId>,
    pub in_range: HashMap<AgentId, Vec<AgentId>>,
    pub domains: HashMap<AgentId, Vec<f64>>,
    pub constraints: HashMap<(AgentId, AgentId), Quadratic>,
    values: HashMap<AgentId, f64>,
    total_cost: f64,
}

impl StaticEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_agent(&mut self, id: AgentId, domain: Vec<f64>) {
        if !self.agents.contains(&id) {
            self.agents.push(id.clone());
        }
        self.domains.insert(id.clone(), domain);
        self.in_range.entry(id).or_default();
    }

    pub fn remove_agent(&mut self, id: &AgentId) {
        self.agents.retain(|a| a != id);
        self.domains.remove(id);
        self.in_range.remove(id);
        for peers in self.in_range.values_mut() {
            peers.retain(|p| p != id);
        }
        self.values.remove(id);
    }

    pub fn connect(&mut self, a: AgentId, b: AgentId) {
        let entry = self.in_range.entry(a.clone()).or_default();
        if !entry.contains(&b) {
            entry.push(b.clone());
        }
        let entry = self.in_range.entry(b).or_default();
        if !entry.contains(&a) {
            entry.push(a);
        }
    }

    /// Records an edge's coefficients, looked up by either endpoint in
    /// `time_step_info` regardless of which order they were connected in.
    pub fn set_constraint(&mut self, a: AgentId, b: AgentId, q: Quadratic) {
        self.constraints.insert((a, b), q);
    }

    fn constraint_between(&self, a: &AgentId, b: &AgentId) -> Option<Quadratic> {
        self.constraints
            .get(&(a.clone(), b.clone()))
            .or_else(|| self.constraints.get(&(b.clone(), a.clone())))
            .copied()
    }
}

impl SimulationHandle for StaticEnvironment {
    fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.clone()
    }

    fn time_step_info(&self, timestep: u64, agent: &AgentId) -> TimeStepInfo {
        let in_range = self.in_range.get(agent).cloned().unwrap_or_default();
        let neighbor_domains = in_range
            .iter()
            .filter_map(|peer| self.domains.get(peer).map(|d| (peer.clone(), d.clone())))
            .collect();
        let neighbor_constraints = in_range
            .iter()
            .filter_map(|peer| self.constraint_between(agent, peer).map(|q| (peer.clone(), q)))
            .collect();
        TimeStepInfo {
            timestep,
            event_timestamp: timestep as f64,
            agents_in_comm_range: in_range,
            domain: self.domains.get(agent).cloned().unwrap_or_default(),
            neighbor_domains,
            neighbor_constraints,
        }
    }

    fn record_value_selected(&mut self, agent: &AgentId, value: f64, cost: f64) {
        self.values.insert(agent.clone(), value);
        self.total_cost += cost;
    }

    fn score(&self) -> f64 {
        self.total_cost
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn time_step_info_reflects_in_range_domains() {
        let mut env = StaticEnvironment::new();
        env.add_agent(AgentId::from("a0"), vec![-1.0, 0.0, 1.0]);
        env.add_agent(AgentId::from("a1"), vec![-1.0, 0.0, 1.0]);
        env.connect(AgentId::from("a0"), AgentId::from("a1"));

        let info = env.time_step_info(0, &AgentId::from("a0"));
        assert_eq!(info.agents_in_comm_range, vec![AgentId::from("a1")]);
        assert_eq!(info.neighbor_domains[&AgentId::from("a1")], vec![-1.0, 0.0, 1.0]);
    }

    #[test]
    fn remove_agent_clears_in_range_both_ways() {
        let mut env = StaticEnvironment::new();
        env.add_agent(AgentId::from("a0"), vec![0.0]);
        env.add_agent(AgentId::from("a1"), vec![0.0]);
        env.connect(AgentId::from("a0"), AgentId::from("a1"));
        env.remove_agent(&AgentId::from("a1"));
        assert!(env.time_step_info(0, &AgentId::from("a0")).agents_in_comm_range.is_empty());
    }
}
