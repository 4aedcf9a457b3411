// Purpose: The quadratic constraint polynomial and the pluggable cost oracle.
// Architecture: Core Data Structure
// Dependencies: serde

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::graph::AgentId;

/// `a*x^2 + b*x*y + c*y^2`, the pairwise cost function shared between
/// the two agents on an edge.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quadratic {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Quadratic {
    pub fn new(a: f64, b: f64, c: f64) -> Self {
        Quadratic { a, b, c }
    }

    pub fn evaluate(&self, x: f64, y: f64) -> f64 {
        self.a * x * x + self.b * x * y + self.c * y * y
    }

    /// `∂f/∂x = 2ax + by`, used by C-DPOP's gradient descent.
    pub fn ddx(&self, x: f64, y: f64) -> f64 {
        2.0 * self.a * x + self.b * y
    }

    /// `∂f/∂y = bx + 2cy`.
    pub fn ddy(&self, x: f64, y: f64) -> f64 {
        self.b * x + 2.0 * self.c * y
    }
}

/// Every edge's constraint, keyed by the *other* endpoint's id, kept
/// identically on both agents sharing the edge.
pub type ActiveConstraints = HashMap<AgentId, Quadratic>;

/// The pluggable cost evaluator — DGC/DCOP code is generic over this,
/// never hardcoding `Quadratic` directly, so a simulation environment
/// can substitute its own scoring function without touching the solver
/// engines.
pub trait ConstraintOracle: Send + Sync {
    fn evaluate(&self, from: &AgentId, from_value: f64, to: &AgentId, to_value: f64) -> f64;

    fn gradient(
        &self,
        from: &AgentId,
        from_value: f64,
        to: &AgentId,
        to_value: f64,
    ) -> (f64, f64);
}

/// The default oracle: look up the shared `Quadratic` for the edge and
/// evaluate it directly. This is what every test scenario in this
/// crate uses.
#[derive(Debug, Clone, Default)]
pub struct LocalQuadraticOracle {
    constraints: ActiveConstraints,
}

impl LocalQuadraticOracle {
    pub fn new(constraints: ActiveConstraints) -> Self {
        LocalQuadraticOracle { constraints }
    }

    pub fn set(&mut self, neighbor: AgentId, q: Quadratic) {
        self.constraints.insert(neighbor, q);
    }

    pub fn remove(&mut self, neighbor: &AgentId) {
        self.constraints.remove(neighbor);
    }

    pub fn get(&self, neighbor: &AgentId) -> Option<&Quadratic> {
        self.constraints.get(neighbor)
    }
}

impl ConstraintOracle for LocalQuadraticOracle {
    fn evaluate(&self, _from: &AgentId, from_value: f64, to: &AgentId, to_value: f64) -> f64 {
        self.constraints
            .get(to)
            .map(|q| q.evaluate(from_value, to_value))
            .unwrap_or(0.0)
    }

    fn gradient(
        &self,
        _from: &AgentId,
        from_value: f64,
        to: &AgentId,
        to_value: f64,
    ) -> (f64, f64) {
        self.constraints
            .get(to)
            .map(|q| (q.ddx(from_value, to_value), q.ddy(from_value, to_value)))
            .unwrap_or((0.0, 0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluate_matches_the_closed_form() {
        let q = Quadratic::new(1.0, 1.0, 1.0);
        // f(1, 2) = 1*1 + 1*1*2 + 1*4 = 1 + 2 + 4 = 7
        assert_eq!(q.evaluate(1.0, 2.0), 7.0);
        assert_eq!(q.ddx(1.0, 2.0), 2.0 * 1.0 + 2.0);
        assert_eq!(q.ddy(1.0, 2.0), 1.0 + 4.0);
    }

    #[test]
    fn local_oracle_looks_up_by_neighbor() {
        let mut oracle = LocalQuadraticOracle::default();
        oracle.set(AgentId::from("a1"), Quadratic::new(1.0, 0.0, 0.0));
        assert_eq!(oracle.evaluate(&AgentId::from("a0"), 2.0, &AgentId::from("a1"), 0.0), 4.0);
        assert_eq!(oracle.evaluate(&AgentId::from("a0"), 2.0, &AgentId::from("a9"), 0.0), 0.0);
    }
}
