// Purpose: The Dynamic Graph Construction contract shared by DIGCA/DBFS/DDFS.
// Architecture: Core Algorithm
// Dependencies: async-trait

pub mod dbfs;
pub mod ddfs;
pub mod digca;

use async_trait::async_trait;
use serde_json::Value;

use crate::agent::AgentCtx;
use crate::env::TimeStepInfo;
use crate::graph::{AgentId, GraphState};
use crate::message::Envelope;

/// Every DGC algorithm produces a consistent rooted parent/child
/// structure over the agent's in-range set and signals the DCOP layer
/// exactly once per time step when that structure is stable. DIGCA,
/// DBFS and DDFS each implement this trait independently rather than
/// sharing a base class, since their state machines differ enough that
/// a shared base would mostly be overridden anyway.
#[async_trait]
pub trait DgcEngine: Send {
    fn graph(&self) -> &GraphState;

    fn graph_mut(&mut self) -> &mut GraphState;

    /// True once this round's structure is final and `dcop.execute`
    /// may run; read by the agent loop, written only by this engine.
    fn dcop_started(&self) -> bool;

    /// Resets per-round transient state (timers, pending responses) and
    /// records the new in-range set; does not by itself start DCOP.
    async fn on_time_step(&mut self, ctx: &mut AgentCtx<'_>, info: &TimeStepInfo);

    fn has_potential_neighbor(&self, in_range: &[AgentId], self_id: &AgentId) -> bool {
        in_range.iter().any(|p| p != self_id)
    }

    /// Drives the election protocol forward; called once per mailbox
    /// loop iteration after messages are drained.
    async fn connect(&mut self, ctx: &mut AgentCtx<'_>);

    /// A neighbor has dropped out of range or been removed by the ping
    /// loop; release the edge and any pending DCOP bookkeeping for it.
    async fn remove_agent(&mut self, ctx: &mut AgentCtx<'_>, agent: &AgentId);

    /// Dispatches one structural message; returns `true` if handled.
    async fn handle_message(&mut self, ctx: &mut AgentCtx<'_>, envelope: &Envelope) -> bool;

    /// DCOP extra-args this engine exchanges during the handshake
    /// (e.g. domain echoed in `CHILD_ADDED`/`PARENT_ASSIGNED`).
    fn extra_args(&self) -> Value {
        Value::Null
    }
}
