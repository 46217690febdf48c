//! Budget-gated verification agents with durable run metering.
//!
//! An [`registries::AgentRegistry`] maps agent ids to constructors, the
//! [`contexts::AgentRunner`] gates and executes agents, and a
//! [`data::MetricsStore`] keeps one record per executed run.

pub mod agents;
pub mod config;
pub mod contexts;
pub mod data;
pub mod git_context;
pub mod providers;
pub mod registries;
pub mod telemetry;
