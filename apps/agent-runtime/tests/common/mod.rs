// Shared harness for the end-to-end scenario and invariant suites: spins
// up real `Agent::run()` tasks over an in-process broker and drives them
// through a `StaticEnvironment` via `Coordinator`, exactly the wiring
// `main.rs` uses, just without the admin server on top.

use std::sync::Arc;

use ddcop_agent_runtime::agent::Agent;
use ddcop_agent_runtime::broker::{Broker, InProcessBroker};
use ddcop_agent_runtime::config::{DcopAlgorithm, GraphAlgorithm, OptimizationOp, RuntimeConfig, RuntimeOptions};
use ddcop_agent_runtime::coordinator::Coordinator;
use ddcop_agent_runtime::env::{SimulationHandle, StaticEnvironment};
use ddcop_agent_runtime::graph::AgentId;
use ddcop_agent_runtime::registry::{AgentRecord, AgentRegistry};

/// A short `agent_comm_timeout` so DIGCA's quiet window resolves in well
/// under a second — `coordinator.rs`'s own tests use the same trick.
pub fn fast_config() -> RuntimeConfig {
    RuntimeConfig {
        domain: "scenario-test".into(),
        broker_url: "memory".into(),
        broker_port: 0,
        broker_username: String::new(),
        broker_password: String::new(),
        learning_rate: 0.1,
        handler_comm_exec_delay: 0.0,
        agent_comm_timeout: 0.15,
        ping_proc_call_delay: 0.0,
        max_ping_count: 3,
    }
}

pub fn options(dcop: DcopAlgorithm, graph: GraphAlgorithm, op: OptimizationOp) -> RuntimeOptions {
    RuntimeOptions {
        dcop_algorithm: dcop,
        graph_algorithm: graph,
        optimization_op: op,
        ..RuntimeOptions::default()
    }
}

/// A fleet of spawned agent tasks sharing one broker and one registry.
/// Kept separate from `Coordinator` construction so a test can tap the
/// broker before the first round publishes anything, or drive several
/// rounds against different `StaticEnvironment` snapshots (churn).
pub struct Fleet {
    pub broker: Arc<InProcessBroker>,
    pub registry: Arc<AgentRegistry>,
    config: Arc<RuntimeConfig>,
}

impl Fleet {
    pub fn new(config: RuntimeConfig) -> Self {
        Fleet {
            broker: Arc::new(InProcessBroker::new()),
            registry: Arc::new(AgentRegistry::new()),
            config: Arc::new(config),
        }
    }

    pub fn spawn(&self, ids: impl IntoIterator<Item = AgentId>, options: RuntimeOptions) {
        let options = Arc::new(options);
        for id in ids {
            let agent_broker: Arc<dyn Broker> = self.broker.clone();
            let mut agent = Agent::new(id, self.config.clone(), options.clone(), agent_broker)
                .with_registry(self.registry.clone());
            tokio::spawn(async move { agent.run().await });
        }
    }

    pub async fn run_round(&self, env: StaticEnvironment, rounds: u64) -> f64 {
        let mut coordinator = Coordinator::new(self.broker.clone(), &self.config, env);
        coordinator.run(rounds).await
    }
}

/// Spawns one agent per id in `env`, then drives it through `rounds`
/// rounds and returns the settled registry plus the environment's score.
pub async fn drive(
    env: StaticEnvironment,
    config: RuntimeConfig,
    options: RuntimeOptions,
    rounds: u64,
) -> (Arc<AgentRegistry>, f64) {
    let fleet = Fleet::new(config);
    fleet.spawn(env.agent_ids(), options);
    let score = fleet.run_round(env, rounds).await;
    (fleet.registry.clone(), score)
}

pub fn record(registry: &AgentRegistry, id: &str) -> AgentRecord {
    registry
        .get(&AgentId::from(id))
        .unwrap_or_else(|| panic!("no registry entry for `{id}`"))
}
