// Purpose: Environment-driven runtime configuration.
// Architecture: Cross-cutting
// Dependencies: std::env

use std::env;
use std::str::FromStr;

use crate::error::ConfigError;

/// Values read once from the process environment at startup and shared
/// by `Arc` with every agent. Never a global/ambient singleton.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub domain: String,
    pub broker_url: String,
    pub broker_port: u16,
    pub broker_username: String,
    pub broker_password: String,
    pub learning_rate: f64,
    pub handler_comm_exec_delay: f64,
    /// Already halved, per the quiet-window resolution DIGCA and DBFS share.
    pub agent_comm_timeout: f64,
    pub ping_proc_call_delay: f64,
    pub max_ping_count: u32,
}

impl RuntimeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Ok(RuntimeConfig {
            domain: required("DOMAIN")?,
            broker_url: required("BROKER_URL")?,
            broker_port: required_parsed("BROKER_PORT")?,
            broker_username: required("BROKER_USERNAME")?,
            broker_password: required("BROKER_PASSWORD")?,
            learning_rate: required_parsed("LEARNING_RATE")?,
            handler_comm_exec_delay: required_parsed("HANDLER_COMM_EXEC_DELAY_IN_SECONDS")?,
            agent_comm_timeout: required_parsed::<f64>("AGENT_COMM_TIMEOUT_IN_SECONDS")? / 2.0,
            ping_proc_call_delay: required_parsed("PING_PROC_CALL_DELAY_IN_SECONDS")?,
            max_ping_count: required_parsed("MAX_PING_COUNT")?,
        })
    }
}

fn required(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::MissingVar(name))
}

fn required_parsed<T>(name: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    required(name)?
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidVar {
            name,
            reason: e.to_string(),
        })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DcopAlgorithm {
    Cocoa,
    Dpop,
    CDpop,
    NoDcop,
}

impl FromStr for DcopAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "cocoa" => Ok(DcopAlgorithm::Cocoa),
            "dpop" => Ok(DcopAlgorithm::Dpop),
            "c-dpop" => Ok(DcopAlgorithm::CDpop),
            "no-dcop" => Ok(DcopAlgorithm::NoDcop),
            other => Err(ConfigError::UnknownDcopAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphAlgorithm {
    Digca,
    Dbfs,
    Ddfs,
}

impl FromStr for GraphAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "digca" => Ok(GraphAlgorithm::Digca),
            "dbfs" => Ok(GraphAlgorithm::Dbfs),
            "ddfs" => Ok(GraphAlgorithm::Ddfs),
            other => Err(ConfigError::UnknownGraphAlgorithm(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationOp {
    Min,
    Max,
}

impl OptimizationOp {
    /// `argmin`/`argmax` with first-index tiebreak over `values`,
    /// returning the winning index (invariant 8).
    pub fn select_index(&self, values: &[f64]) -> Option<usize> {
        if values.is_empty() {
            return None;
        }
        let mut best = 0;
        for (i, v) in values.iter().enumerate().skip(1) {
            let better = match self {
                OptimizationOp::Min => *v < values[best],
                OptimizationOp::Max => *v > values[best],
            };
            if better {
                best = i;
            }
        }
        Some(best)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    GraphGen,
    Simulation,
    MstSimulation,
    Dashboard,
}

impl FromStr for ExecutionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "graph-gen" => Ok(ExecutionMode::GraphGen),
            "simulation" => Ok(ExecutionMode::Simulation),
            "mst-simulation" => Ok(ExecutionMode::MstSimulation),
            "dashboard" => Ok(ExecutionMode::Dashboard),
            other => Err(ConfigError::InvalidVar {
                name: "execution_mode",
                reason: format!("unrecognized execution mode `{other}`"),
            }),
        }
    }
}

/// Per-run options, passed around as an explicit value rather than a
/// module-level global.
#[derive(Debug, Clone)]
pub struct RuntimeOptions {
    pub dcop_algorithm: DcopAlgorithm,
    pub graph_algorithm: GraphAlgorithm,
    pub domain_size: usize,
    pub optimization_op: OptimizationOp,
    pub seed: u64,
    pub execution_mode: ExecutionMode,
    /// `inf` in the source; `None` here means unbounded.
    pub max_out_degree: Option<usize>,
}

impl Default for RuntimeOptions {
    fn default() -> Self {
        RuntimeOptions {
            dcop_algorithm: DcopAlgorithm::Cocoa,
            graph_algorithm: GraphAlgorithm::Digca,
            domain_size: 3,
            optimization_op: OptimizationOp::Max,
            seed: 0,
            execution_mode: ExecutionMode::Simulation,
            max_out_degree: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn select_index_breaks_ties_by_first_index() {
        assert_eq!(OptimizationOp::Min.select_index(&[0.0, 0.0, -1.0]), Some(2));
        assert_eq!(OptimizationOp::Max.select_index(&[1.0, 1.0, 0.0]), Some(0));
    }

    #[test]
    fn unknown_dcop_algorithm_is_rejected() {
        assert!(matches!(
            "bogus".parse::<DcopAlgorithm>(),
            Err(ConfigError::UnknownDcopAlgorithm(_))
        ));
    }
}
