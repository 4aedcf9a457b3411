// [[ddcop-agent-runtime]]/src/lib.rs
// Purpose: Crate root; module wiring for the D-DCOP agent runtime.
// Architecture: Application Boot
// Dependencies: see Cargo.toml

pub mod agent;
pub mod broker;
pub mod config;
pub mod constraint;
pub mod coordinator;
pub mod dcop;
pub mod dgc;
pub mod env;
pub mod error;
pub mod events;
pub mod graph;
pub mod message;
pub mod metrics;
pub mod registry;
pub mod scenario;
pub mod server;
