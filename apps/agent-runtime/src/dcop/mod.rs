// Purpose: The DCOP solver contract shared by CoCoA/DPOP/C-DPOP.
// Architecture: Core Algorithm
// Dependencies: async-trait

pub mod cdpop;
pub mod cocoa;
pub mod dpop;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::AgentCtx;
use crate::env::TimeStepInfo;
use crate::graph::GraphState;
use crate::message::Envelope;

/// One trait shared by DPOP and C-DPOP, with C-DPOP's matrix-valued
/// UTIL messages and gradient-descent refinement kept in its own
/// struct rather than subclassing `Dpop` — the two engines share this
/// trait and the same message-flow shape, not field-level inheritance.
#[async_trait]
pub trait DcopEngine: Send {
    fn value(&self) -> Option<f64>;

    fn cost(&self) -> f64;

    /// Resets per-round transient tables (`util_messages`, `cost_map`,
    /// `cpa`) at the start of a time step.
    fn on_time_step(&mut self, info: &TimeStepInfo);

    /// Called before every graph read this round so the solver sees the
    /// DGC layer's current parent/children without owning `GraphState`
    /// itself — the graph engine remains the sole mutator.
    fn sync_graph(&mut self, graph: &GraphState);

    /// True once this engine has everything it needs (util vectors from
    /// every child, or a cost map from every neighbor) to compute a
    /// value for this round. Consulted by the engine itself from its
    /// message handlers, not by the agent loop — `execute` is the entry
    /// point the loop drives once the graph signals `start_dcop`.
    fn can_resolve(&self) -> bool;

    /// Drives the solve forward once the graph layer has signalled
    /// `start_dcop`. Called on every idle tick while `dcop_started()`
    /// holds, so implementations must be idempotent once they've moved
    /// past their initial state.
    async fn execute(&mut self, ctx: &mut AgentCtx<'_>);

    /// `argmin`/`argmax` of `values` against `ctx`'s `optimization_op`,
    /// exposed so the graph layer's isolated-agent fallback can reuse it.
    fn select_value(&self, ctx: &AgentCtx<'_>, values: &[f64]) -> Option<f64>;

    async fn on_util(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope);

    async fn on_value(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope);

    async fn on_inquiry(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope);

    async fn on_cost(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope);

    /// Dispatches one DCOP message by tag; returns `true` if handled.
    async fn handle_message(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope) -> bool;

    /// Extra handshake data this engine wants exchanged by the graph
    /// layer (DPOP/C-DPOP echo nothing extra beyond the domain).
    fn extra_args(&self) -> Value {
        Value::Null
    }
}

pub(crate) fn agent_id_field(envelope: &Envelope, field: &'static str) -> Option<f64> {
    envelope.payload.get(field).and_then(Value::as_f64)
}
