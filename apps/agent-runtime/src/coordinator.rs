// Purpose: The round clock that drives a SimulationHandle end to end.
// Architecture: Core Orchestration
// Dependencies: tokio, tracing

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::broker::Broker;
use crate::config::RuntimeConfig;
use crate::env::SimulationHandle;
use crate::graph::AgentId;
use crate::message::{Envelope, Tag, Topics};

/// Drives `SimulationHandle` one round at a time: broadcasts a
/// `SIM_ENV_CURRENT_TIME_STEP_MSG` to every live agent's own mailbox
/// (each agent gets its own in-range set and domain, so this is a
/// per-agent publish rather than one broadcast), then waits for a
/// `VALUE_SELECTED_MSG` from each before folding it into the
/// environment's score and moving on. Grounded on the round-robin
/// `sim_env` actor in `src/env/environment.py`: there the environment
/// is itself a kernel agent listening on its own topic; here it is a
/// plain Rust loop since nothing about the round clock needs the actor
/// message-passing indirection once it is owned by the host process.
pub struct Coordinator<S: SimulationHandle> {
    broker: Arc<dyn Broker>,
    topics: Topics,
    sim: S,
    sim_env_rx: mpsc::UnboundedReceiver<Envelope>,
    /// How long a round waits for stragglers before moving on — DIGCA's
    /// own quiet window, reused here so a genuinely stuck agent can't
    /// wedge the whole run.
    round_timeout: Duration,
    timestep: u64,
}

impl<S: SimulationHandle> Coordinator<S> {
    pub fn new(broker: Arc<dyn Broker>, config: &RuntimeConfig, sim: S) -> Self {
        let topics = Topics::new(config.domain.clone());
        let sim_env_rx = broker.subscribe(&topics.sim_env());
        let round_timeout = Duration::from_secs_f64(config.agent_comm_timeout.max(0.1) * 2.0);
        Coordinator {
            broker,
            topics,
            sim,
            sim_env_rx,
            round_timeout,
            timestep: 0,
        }
    }

    pub fn score(&self) -> f64 {
        self.sim.score()
    }

    /// Runs `rounds` time steps, returning the environment's final score.
    pub async fn run(&mut self, rounds: u64) -> f64 {
        for _ in 0..rounds {
            self.run_round().await;
        }
        self.sim.score()
    }

    async fn run_round(&mut self) {
        let agents = self.sim.agent_ids();
        if agents.is_empty() {
            warn!("coordinator has no agents to drive");
            return;
        }
        for agent in &agents {
            let info = self.sim.time_step_info(self.timestep, agent);
            let neighbor_domains: HashMap<String, Vec<f64>> = info
                .neighbor_domains
                .iter()
                .map(|(id, d)| (id.to_string(), d.clone()))
                .collect();
            let neighbor_constraints: HashMap<String, [f64; 3]> = info
                .neighbor_constraints
                .iter()
                .map(|(id, q)| (id.to_string(), [q.a, q.b, q.c]))
                .collect();
            let payload = json!({
                "agent_id": "sim_env",
                "timestep": info.timestep,
                "agent_domain": info.domain,
                "in_range": info.agents_in_comm_range.iter().map(AgentId::to_string).collect::<Vec<_>>(),
                "neighbor_domains": neighbor_domains,
                "neighbor_constraints": neighbor_constraints,
            });
            let envelope = Envelope::new(Tag::SimEnvTimeStep, payload, info.event_timestamp);
            self.broker
                .publish(&self.topics.agent_mailbox(agent), envelope)
                .await;
        }

        let mut pending: HashMap<AgentId, ()> = agents.iter().map(|a| (a.clone(), ())).collect();
        let deadline = tokio::time::Instant::now() + self.round_timeout;
        while !pending.is_empty() {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                break;
            }
            match timeout(remaining, self.sim_env_rx.recv()).await {
                Ok(Some(envelope)) if envelope.tag == Tag::ValueSelected => {
                    if let Ok(sender) = envelope.sender() {
                        if pending.remove(&sender).is_some() {
                            let value = envelope.payload.get("value").and_then(|v| v.as_f64());
                            let cost = envelope.payload.get("cost").and_then(|v| v.as_f64()).unwrap_or(0.0);
                            if let Some(value) = value {
                                self.sim.record_value_selected(&sender, value, cost);
                            }
                        }
                    }
                }
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(_) => {
                    warn!(
                        timestep = self.timestep,
                        outstanding = pending.len(),
                        "round timed out waiting for VALUE_SELECTED_MSG"
                    );
                    break;
                }
            }
        }
        info!(timestep = self.timestep, score = self.sim.score(), "round complete");
        self.timestep += 1;
    }
}
