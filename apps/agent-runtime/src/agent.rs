// Purpose: The agent mailbox loop and the non-owning context handle.
// Architecture: Core Orchestration
// Dependencies: tokio, tracing

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::broker::Broker;
use crate::config::{DcopAlgorithm, GraphAlgorithm, RuntimeConfig, RuntimeOptions};
use crate::constraint::{LocalQuadraticOracle, Quadratic};
use crate::dcop::cdpop::CDpop;
use crate::dcop::cocoa::Cocoa;
use crate::dcop::dpop::Dpop;
use crate::dcop::DcopEngine;
use crate::dgc::dbfs::Dbfs;
use crate::dgc::ddfs::Ddfs;
use crate::dgc::digca::Digca;
use crate::dgc::DgcEngine;
use crate::env::TimeStepInfo;
use crate::events::{EventType, RuntimeEvent};
use crate::graph::AgentId;
use crate::message::{is_self_message, passes_timestamp_fence, Envelope, Tag, Topics};
use crate::metrics::{AgentMetricsCounter, MetricsSnapshot};
use crate::registry::AgentRegistry;

/// The non-owning handle passed by parameter to every graph/DCOP engine
/// call: instead of each engine holding a pointer back to its owning
/// agent, the agent lends a short-lived view of just the publish API
/// and the read-only facts the engine needs.
pub struct AgentCtx<'a> {
    pub id: &'a AgentId,
    pub broker: &'a dyn Broker,
    pub topics: &'a Topics,
    pub config: &'a RuntimeConfig,
    pub options: &'a RuntimeOptions,
    pub metrics: &'a mut AgentMetricsCounter,
    pub oracle: &'a mut LocalQuadraticOracle,
    pub events: &'a mut Vec<RuntimeEvent>,
    pub now: f64,
    pub domain: &'a [f64],
}

impl<'a> AgentCtx<'a> {
    pub async fn publish(&mut self, topic: &str, tag: Tag, mut payload: Value) {
        if let Value::Object(ref mut map) = payload {
            map.entry("agent_id")
                .or_insert_with(|| Value::String(self.id.to_string()));
        }
        self.metrics.on_message_published(tag);
        let envelope = Envelope::new(tag, payload, self.now);
        debug!(agent = %self.id, tag = %tag, topic, "publish");
        self.broker.publish(topic, envelope).await;
    }

    pub fn emit_event(&mut self, event_type: EventType, payload: Value) {
        self.events
            .push(RuntimeEvent::new(self.id.clone(), event_type, self.now, payload));
    }
}

/// `{current agent_id, domain, parent, children, value, cost, state}` —
/// the admin-surface equivalent of `agent_snapshot` in the source.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AgentSnapshot {
    pub agent_id: AgentId,
    pub domain: Vec<f64>,
    pub parent: Option<AgentId>,
    pub children: Vec<AgentId>,
    pub value: Option<f64>,
    pub cost: f64,
    pub terminated: bool,
}

pub struct Agent {
    pub id: AgentId,
    config: Arc<RuntimeConfig>,
    options: Arc<RuntimeOptions>,
    broker: Arc<dyn Broker>,
    topics: Topics,
    private_mailbox: mpsc::UnboundedReceiver<Envelope>,
    public_mailbox: mpsc::UnboundedReceiver<Envelope>,
    sim_mailbox: mpsc::UnboundedReceiver<Envelope>,
    graph_engine: Box<dyn DgcEngine>,
    dcop_engine: Box<dyn DcopEngine>,
    oracle: LocalQuadraticOracle,
    metrics: AgentMetricsCounter,
    events: Vec<RuntimeEvent>,
    latest_event_timestamp: f64,
    domain: Vec<f64>,
    terminate: bool,
    /// Guards against republishing `VALUE_SELECTED` on every idle tick
    /// once `dcop_engine.value()` has settled for the round; cleared by
    /// the next `SIM_ENV_CURRENT_TIME_STEP_MSG`.
    value_announced: bool,
    /// Published into after every loop tick so the admin surface has a
    /// live view without reaching into the agent's task. `None` outside
    /// of a runtime that wires one up (unit tests construct bare agents).
    registry: Option<Arc<AgentRegistry>>,
}

/// How often `run()` re-checks `graph.connect()` when no message has
/// arrived — the loop is meant to keep turning on its own ("drain
/// mailbox, then connect, resolve, sleep briefly to yield"), not be
/// gated entirely on `tokio::select!` branches becoming ready. Without
/// this, an isolated agent with no in-range peers would never
/// re-observe its own quiet-window deadline and `start_dcop()` would
/// never fire.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

fn build_dgc(algorithm: GraphAlgorithm, bottom_up: bool) -> Box<dyn DgcEngine> {
    match algorithm {
        GraphAlgorithm::Digca => Box::new(Digca::with_traversing_order(bottom_up)),
        GraphAlgorithm::Dbfs => {
            let _ = bottom_up;
            Box::new(Dbfs::new())
        }
        GraphAlgorithm::Ddfs => Box::new(Ddfs::new()),
    }
}

fn build_dcop(algorithm: DcopAlgorithm) -> Box<dyn DcopEngine> {
    match algorithm {
        DcopAlgorithm::Cocoa | DcopAlgorithm::NoDcop => Box::new(Cocoa::new()),
        DcopAlgorithm::Dpop => Box::new(Dpop::new()),
        DcopAlgorithm::CDpop => Box::new(CDpop::new()),
    }
}

impl Agent {
    pub fn new(
        id: AgentId,
        config: Arc<RuntimeConfig>,
        options: Arc<RuntimeOptions>,
        broker: Arc<dyn Broker>,
    ) -> Self {
        let topics = Topics::new(config.domain.clone());
        let private_mailbox = broker.subscribe(&topics.agent_mailbox(&id));
        let public_mailbox = broker.subscribe(&topics.agent_public());
        let sim_mailbox = broker.subscribe(&topics.sim_env());
        let bottom_up = matches!(
            options.dcop_algorithm,
            DcopAlgorithm::Dpop | DcopAlgorithm::CDpop
        );
        let graph_engine = build_dgc(options.graph_algorithm, bottom_up);
        let dcop_engine = build_dcop(options.dcop_algorithm);
        Agent {
            id,
            config,
            options,
            broker,
            topics,
            private_mailbox,
            public_mailbox,
            sim_mailbox,
            graph_engine,
            dcop_engine,
            oracle: LocalQuadraticOracle::default(),
            metrics: AgentMetricsCounter::new(),
            events: Vec::new(),
            latest_event_timestamp: 0.0,
            domain: Vec::new(),
            terminate: false,
            value_announced: false,
            registry: None,
        }
    }

    /// Wires a shared registry the agent publishes a snapshot to after
    /// every loop tick, for the admin surface.
    pub fn with_registry(mut self, registry: Arc<AgentRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn snapshot(&self) -> AgentSnapshot {
        AgentSnapshot {
            agent_id: self.id.clone(),
            domain: self.domain.clone(),
            parent: self.graph_engine.graph().parent().cloned(),
            children: self.graph_engine.graph().children().to_vec(),
            value: self.dcop_engine.value(),
            cost: self.dcop_engine.cost(),
            terminated: self.terminate,
        }
    }

    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Drains any `RuntimeEvent`s queued by the last round of message
    /// handling, for the admin surface's websocket fan-out.
    pub fn drain_events(&mut self) -> Vec<RuntimeEvent> {
        std::mem::take(&mut self.events)
    }

    #[instrument(skip_all, fields(agent = %self.id))]
    pub async fn run(&mut self) {
        info!("agent started");
        while !self.terminate {
            tokio::select! {
                Some(env) = self.private_mailbox.recv() => self.handle_one(env).await,
                Some(env) = self.public_mailbox.recv() => self.handle_one(env).await,
                Some(env) = self.sim_mailbox.recv() => self.handle_one(env).await,
                _ = tokio::time::sleep(POLL_INTERVAL) => {}
            }
            self.drain_ready().await;
            self.advance().await;
            if let Some(registry) = &self.registry {
                registry.update(self.id.clone(), self.snapshot(), self.metrics_snapshot());
            }
            tokio::task::yield_now().await;
        }
        if let Some(registry) = &self.registry {
            registry.remove(&self.id);
        }
        info!("agent stopped");
    }

    async fn drain_ready(&mut self) {
        loop {
            let next = self
                .private_mailbox
                .try_recv()
                .or_else(|_| self.public_mailbox.try_recv())
                .or_else(|_| self.sim_mailbox.try_recv());
            match next {
                Ok(env) => self.handle_one(env).await,
                Err(_) => break,
            }
        }
    }

    /// `graph.connect()` then `dcop.resolve_value()`.
    async fn advance(&mut self) {
        {
            let mut ctx = AgentCtx {
                id: &self.id,
                broker: self.broker.as_ref(),
                topics: &self.topics,
                config: &self.config,
                options: &self.options,
                metrics: &mut self.metrics,
                oracle: &mut self.oracle,
                events: &mut self.events,
                now: self.latest_event_timestamp,
                domain: &self.domain,
            };
            self.graph_engine.connect(&mut ctx).await;
        }
        self.dcop_engine.sync_graph(self.graph_engine.graph());
        let mut ctx = AgentCtx {
            id: &self.id,
            broker: self.broker.as_ref(),
            topics: &self.topics,
            config: &self.config,
            options: &self.options,
            metrics: &mut self.metrics,
            oracle: &mut self.oracle,
            events: &mut self.events,
            now: self.latest_event_timestamp,
            domain: &self.domain,
        };
        if self.graph_engine.dcop_started() {
            self.dcop_engine.execute(&mut ctx).await;
        }
        // Top-down algorithms (CoCoA) resolve non-root, childless agents
        // reactively, through the UPDATE_STATE cascade handled straight out
        // of `handle_message` rather than through `execute()`'s own
        // `dcop_started` gate above — so announcing a freshly resolved
        // value has to stay keyed on `dcop_engine.value()` alone, not on
        // whether this agent's own traversal ever flips `dcop_started`.
        if !self.value_announced {
            if let Some(value) = self.dcop_engine.value() {
                self.value_announced = true;
                ctx.emit_event(
                    EventType::ValueSelected,
                    serde_json::json!({"value": value, "cost": self.dcop_engine.cost()}),
                );
                ctx.publish(
                    &self.topics.sim_env(),
                    Tag::ValueSelected,
                    serde_json::json!({"value": value, "cost": self.dcop_engine.cost()}),
                )
                .await;
            }
        }
    }

    async fn handle_one(&mut self, envelope: Envelope) {
        if is_self_message(&envelope, &self.id) {
            return;
        }
        if envelope.tag != Tag::SimEnvTimeStep
            && !passes_timestamp_fence(&envelope, self.latest_event_timestamp)
        {
            warn!(agent = %self.id, tag = %envelope.tag, "dropping stale message");
            return;
        }
        match envelope.tag {
            Tag::StopAgent => {
                self.terminate = true;
                self.events.push(RuntimeEvent::new(
                    self.id.clone(),
                    EventType::AgentShutdown,
                    self.latest_event_timestamp,
                    Value::Null,
                ));
            }
            Tag::SimEnvTimeStep => self.handle_time_step(&envelope).await,
            _ => {
                let handled = {
                    let mut ctx = AgentCtx {
                        id: &self.id,
                        broker: self.broker.as_ref(),
                        topics: &self.topics,
                        config: &self.config,
                        options: &self.options,
                        metrics: &mut self.metrics,
                        oracle: &mut self.oracle,
                        events: &mut self.events,
                        now: self.latest_event_timestamp,
                        domain: &self.domain,
                    };
                    self.graph_engine.handle_message(&mut ctx, &envelope).await
                };
                if !handled {
                    self.dcop_engine.sync_graph(self.graph_engine.graph());
                    let mut ctx = AgentCtx {
                        id: &self.id,
                        broker: self.broker.as_ref(),
                        topics: &self.topics,
                        config: &self.config,
                        options: &self.options,
                        metrics: &mut self.metrics,
                        oracle: &mut self.oracle,
                        events: &mut self.events,
                        now: self.latest_event_timestamp,
                        domain: &self.domain,
                    };
                    self.dcop_engine.handle_message(&mut ctx, &envelope).await;
                }
            }
        }
    }

    /// Per-time-step housekeeping: drop out-of-range neighbors, hand
    /// the fresh in-range set to the graph layer, then reset the DCOP
    /// layer's transient round state.
    async fn handle_time_step(&mut self, envelope: &Envelope) {
        let info: TimeStepInfo = match parse_time_step(envelope) {
            Some(info) => info,
            None => {
                warn!(agent = %self.id, "malformed time-step message, ignoring");
                return;
            }
        };
        self.latest_event_timestamp = info.event_timestamp;
        self.domain = info.domain.clone();
        self.value_announced = false;

        let in_range: HashSet<AgentId> = info.agents_in_comm_range.iter().cloned().collect();
        let to_remove: Vec<AgentId> = self
            .graph_engine
            .graph()
            .neighbors()
            .into_iter()
            .filter(|n| !in_range.contains(n))
            .collect();

        for neighbor in to_remove {
            {
                let mut ctx = AgentCtx {
                    id: &self.id,
                    broker: self.broker.as_ref(),
                    topics: &self.topics,
                    config: &self.config,
                    options: &self.options,
                    metrics: &mut self.metrics,
                    oracle: &mut self.oracle,
                    events: &mut self.events,
                    now: self.latest_event_timestamp,
                    domain: &self.domain,
                };
                self.graph_engine.remove_agent(&mut ctx, &neighbor).await;
                ctx.emit_event(
                    EventType::EdgeRemoved,
                    serde_json::json!({"neighbor": neighbor.to_string()}),
                );
            }
            self.oracle.remove(&neighbor);
        }

        for (neighbor, q) in &info.neighbor_constraints {
            self.oracle.set(neighbor.clone(), *q);
        }

        self.dcop_engine.on_time_step(&info);
        {
            let mut ctx = AgentCtx {
                id: &self.id,
                broker: self.broker.as_ref(),
                topics: &self.topics,
                config: &self.config,
                options: &self.options,
                metrics: &mut self.metrics,
                oracle: &mut self.oracle,
                events: &mut self.events,
                now: self.latest_event_timestamp,
                domain: &self.domain,
            };
            self.graph_engine.on_time_step(&mut ctx, &info).await;
        }
    }
}

fn parse_time_step(envelope: &Envelope) -> Option<TimeStepInfo> {
    let payload = &envelope.payload;
    let timestep = payload.get("timestep")?.as_u64()?;
    let domain: Vec<f64> = payload
        .get("agent_domain")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_f64())
        .collect();
    let agents_in_comm_range: Vec<AgentId> = payload
        .get("in_range")?
        .as_array()?
        .iter()
        .filter_map(|v| v.as_str())
        .map(AgentId::from)
        .collect();
    let neighbor_domains = payload
        .get("neighbor_domains")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| {
                    let values: Vec<f64> = v.as_array()?.iter().filter_map(|x| x.as_f64()).collect();
                    Some((AgentId::from(k.as_str()), values))
                })
                .collect()
        })
        .unwrap_or_default();
    let neighbor_constraints = payload
        .get("neighbor_constraints")
        .and_then(Value::as_object)
        .map(|obj| {
            obj.iter()
                .filter_map(|(k, v)| {
                    let coeffs: Vec<f64> = v.as_array()?.iter().filter_map(|x| x.as_f64()).collect();
                    if coeffs.len() != 3 {
                        return None;
                    }
                    Some((AgentId::from(k.as_str()), Quadratic::new(coeffs[0], coeffs[1], coeffs[2])))
                })
                .collect()
        })
        .unwrap_or_default();
    Some(TimeStepInfo {
        timestep,
        event_timestamp: envelope.timestamp,
        agents_in_comm_range,
        domain,
        neighbor_domains,
        neighbor_constraints,
    })
}
