//! The alert-response runtime: intake, the agent loop, tool execution,
//! and the operator-facing ledger and metrics state.

pub mod agent;
pub mod intake;
pub mod ledger;
pub mod process;
pub mod state;
pub mod tools;
