// [[ddcop-agent-runtime]]/src/main.rs
// Purpose: Entry point. Boots the broker, agent fleet, round coordinator and admin server.
// Architecture: Application Boot
// Dependencies: Axum, Tower, Tokio

use std::str::FromStr;
use std::sync::Arc;

use ddcop_agent_runtime::agent::Agent;
use ddcop_agent_runtime::broker::{Broker, InProcessBroker};
use ddcop_agent_runtime::config::{DcopAlgorithm, GraphAlgorithm, RuntimeConfig, RuntimeOptions};
use ddcop_agent_runtime::coordinator::Coordinator;
use ddcop_agent_runtime::env::{SimulationHandle, StaticEnvironment};
use ddcop_agent_runtime::graph::AgentId;
use ddcop_agent_runtime::registry::AgentRegistry;
use ddcop_agent_runtime::scenario::Scenario;
use ddcop_agent_runtime::server::{self, AdminState};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ddcop_agent_runtime=debug".parse().unwrap())
                .add_directive("tower_http=trace".parse().unwrap()),
        )
        .init();

    tracing::info!("initializing D-DCOP agent runtime");

    let config = Arc::new(RuntimeConfig::from_env().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "falling back to an in-process dev config");
        dev_config()
    }));
    let options = Arc::new(options_from_env());

    let scenario = std::env::var("SCENARIO_FILE")
        .ok()
        .and_then(|path| std::fs::read_to_string(path).ok())
        .and_then(|text| Scenario::parse(&text).ok());

    let env = match scenario {
        Some(scenario) => environment_from_scenario(&scenario, &options),
        None => {
            tracing::warn!("no SCENARIO_FILE set, booting an empty environment");
            StaticEnvironment::new()
        }
    };

    let broker = Arc::new(InProcessBroker::new());
    let registry = Arc::new(AgentRegistry::new());

    let mut handles = Vec::new();
    for id in env.agent_ids() {
        let agent_broker: Arc<dyn Broker> = broker.clone();
        let mut agent = Agent::new(id, config.clone(), options.clone(), agent_broker)
            .with_registry(registry.clone());
        handles.push(tokio::spawn(async move { agent.run().await }));
    }

    let coordinator_broker = broker.clone();
    let coordinator_config = config.clone();
    let rounds = std::env::var("SIMULATION_ROUNDS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(50u64);
    tokio::spawn(async move {
        let mut coordinator = Coordinator::new(coordinator_broker, &coordinator_config, env);
        let score = coordinator.run(rounds).await;
        tracing::info!(score, "simulation finished");
    });

    let state = Arc::new(AdminState {
        registry,
        broker: broker.clone(),
    });
    let app = server::router(state);

    let port = std::env::var("ADMIN_PORT").unwrap_or_else(|_| "3000".to_string());
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind admin port");

    tracing::info!(addr, "admin surface listening");
    axum::serve(listener, app).await.expect("admin server error");
}

fn dev_config() -> RuntimeConfig {
    RuntimeConfig {
        domain: std::env::var("DOMAIN").unwrap_or_else(|_| "ddcop-dev".to_string()),
        broker_url: "memory".to_string(),
        broker_port: 0,
        broker_username: String::new(),
        broker_password: String::new(),
        learning_rate: 0.1,
        handler_comm_exec_delay: 0.0,
        agent_comm_timeout: 2.0,
        ping_proc_call_delay: 1.0,
        max_ping_count: 3,
    }
}

fn options_from_env() -> RuntimeOptions {
    let defaults = RuntimeOptions::default();
    RuntimeOptions {
        dcop_algorithm: std::env::var("DCOP_ALGORITHM")
            .ok()
            .and_then(|v| DcopAlgorithm::from_str(&v).ok())
            .unwrap_or(defaults.dcop_algorithm),
        graph_algorithm: std::env::var("GRAPH_ALGORITHM")
            .ok()
            .and_then(|v| GraphAlgorithm::from_str(&v).ok())
            .unwrap_or(defaults.graph_algorithm),
        domain_size: std::env::var("DOMAIN_SIZE")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(defaults.domain_size),
        ..defaults
    }
}

/// Builds a `StaticEnvironment` from a parsed scenario: nodes become
/// `a0..aN-1`, edges become symmetric in-range links, and a domain not
/// given an explicit entry falls back to an evenly spaced range sized
/// by `RuntimeOptions::domain_size`.
fn environment_from_scenario(scenario: &Scenario, options: &RuntimeOptions) -> StaticEnvironment {
    let mut env = StaticEnvironment::new();
    for i in 0..scenario.node_count {
        let id = AgentId::from(format!("a{i}"));
        let domain = scenario
            .domains
            .get(&i)
            .cloned()
            .unwrap_or_else(|| default_domain(options.domain_size));
        env.add_agent(id, domain);
    }
    for &(i, j) in &scenario.edges {
        env.connect(AgentId::from(format!("a{i}")), AgentId::from(format!("a{j}")));
    }
    for (&(i, j), q) in &scenario.constraints {
        env.set_constraint(AgentId::from(format!("a{i}")), AgentId::from(format!("a{j}")), *q);
    }
    env
}

fn default_domain(size: usize) -> Vec<f64> {
    let half = (size / 2) as i64;
    (0..size.max(1))
        .map(|i| (i as i64 - half) as f64)
        .collect()
}
