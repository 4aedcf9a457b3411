// Purpose: AgentId and the shared GraphState data model.
// Architecture: Core Data Structure
// Dependencies: serde

use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::GraphError;

/// Opaque agent identifier with a total order derived from its numeric
/// suffix (`a0 < a1 < a2 < ... < a10`), used as the DGC tiebreaker.
#[derive(Debug, Clone, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(Arc<str>);

impl AgentId {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        AgentId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric suffix used for ordering, e.g. `"a12"` -> `Some(12)`.
    fn order_key(&self) -> Option<u64> {
        let digits: String = self
            .0
            .chars()
            .rev()
            .take_while(|c| c.is_ascii_digit())
            .collect();
        if digits.is_empty() {
            None
        } else {
            digits.chars().rev().collect::<String>().parse().ok()
        }
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq for AgentId {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl std::hash::Hash for AgentId {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.0.hash(state);
    }
}

impl PartialOrd for AgentId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AgentId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.order_key(), other.order_key()) {
            (Some(a), Some(b)) => a.cmp(&b).then_with(|| self.0.cmp(&other.0)),
            _ => self.0.cmp(&other.0),
        }
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        AgentId::new(s)
    }
}

impl From<String> for AgentId {
    fn from(s: String) -> Self {
        AgentId::new(s)
    }
}

/// The graph relations owned exclusively by the active DGC engine.
/// Mutated only through the methods below so the tree/pseudo-tree
/// invariants hold after every call.
#[derive(Debug, Default, Clone)]
pub struct GraphState {
    parent: Option<AgentId>,
    children: Vec<AgentId>,
    pseudo_parents: Vec<AgentId>,
    pseudo_children: Vec<AgentId>,
}

impl GraphState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parent(&self) -> Option<&AgentId> {
        self.parent.as_ref()
    }

    pub fn children(&self) -> &[AgentId] {
        &self.children
    }

    pub fn pseudo_parents(&self) -> &[AgentId] {
        &self.pseudo_parents
    }

    pub fn pseudo_children(&self) -> &[AgentId] {
        &self.pseudo_children
    }

    pub fn is_child(&self, agent: &AgentId) -> bool {
        self.children.contains(agent)
    }

    pub fn is_parent(&self, agent: &AgentId) -> bool {
        self.parent.as_ref() == Some(agent)
    }

    pub fn is_neighbor(&self, agent: &AgentId) -> bool {
        self.is_parent(agent) || self.is_child(agent)
    }

    pub fn has_no_neighbors(&self) -> bool {
        self.parent.is_none() && self.children.is_empty()
    }

    /// `children ∪ {parent}`.
    pub fn neighbors(&self) -> Vec<AgentId> {
        let mut ns = self.children.clone();
        if let Some(p) = &self.parent {
            ns.push(p.clone());
        }
        ns
    }

    /// children, pseudo-children, pseudo-parents and parent combined —
    /// used by DPOP to confirm every in-range peer has a role.
    pub fn connected_agents(&self) -> Vec<AgentId> {
        let mut all = self.children.clone();
        all.extend(self.pseudo_children.iter().cloned());
        all.extend(self.pseudo_parents.iter().cloned());
        if let Some(p) = &self.parent {
            all.push(p.clone());
        }
        all
    }

    pub fn set_parent(&mut self, parent: AgentId) -> Result<(), GraphError> {
        if self.children.contains(&parent) {
            return Err(GraphError::AlreadyChild(parent));
        }
        if let Some(existing) = &self.parent {
            if existing != &parent {
                return Err(GraphError::ParentAlreadyAssigned(existing.clone()));
            }
            return Ok(());
        }
        self.parent = Some(parent);
        Ok(())
    }

    pub fn add_child(&mut self, child: AgentId) -> Result<(), GraphError> {
        if self.parent.as_ref() == Some(&child) {
            return Err(GraphError::AlreadyParent(child));
        }
        if !self.children.contains(&child) {
            self.children.push(child);
        }
        Ok(())
    }

    pub fn add_pseudo_parent(&mut self, agent: AgentId) {
        if !self.pseudo_parents.contains(&agent) {
            self.pseudo_parents.push(agent);
        }
    }

    pub fn add_pseudo_child(&mut self, agent: AgentId) {
        if !self.pseudo_children.contains(&agent) {
            self.pseudo_children.push(agent);
        }
    }

    pub fn clear_parent(&mut self) {
        self.parent = None;
    }

    pub fn remove_child(&mut self, agent: &AgentId) {
        self.children.retain(|c| c != agent);
    }

    /// Full reset performed at the start of every DGC round for the
    /// tree-rebuilding algorithms (DBFS, DDFS clear everything; DIGCA
    /// only clears transient per-round bookkeeping and keeps edges that
    /// survive the in-range filter — see the DGC engines themselves).
    pub fn reset(&mut self) {
        self.parent = None;
        self.children.clear();
        self.pseudo_parents.clear();
        self.pseudo_children.clear();
    }

    /// Invariant 2 & the acyclic-forest invariant checked locally:
    /// a parent can never also be a child, and the pseudo-sets are
    /// disjoint from the tree edges.
    pub fn is_locally_consistent(&self) -> bool {
        if let Some(p) = &self.parent {
            if self.children.contains(p) {
                return false;
            }
            if self.pseudo_parents.contains(p) || self.pseudo_children.contains(p) {
                return false;
            }
        }
        let child_set: HashSet<&AgentId> = self.children.iter().collect();
        let pp_set: HashSet<&AgentId> = self.pseudo_parents.iter().collect();
        let pc_set: HashSet<&AgentId> = self.pseudo_children.iter().collect();
        child_set.is_disjoint(&pp_set) && child_set.is_disjoint(&pc_set)
    }
}
