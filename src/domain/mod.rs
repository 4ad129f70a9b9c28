//! Domain types and DTOs for agent workflows, executions and credits.

pub mod agents;
pub mod credits;
pub mod workflow;
