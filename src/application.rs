//! Application layer: the per-account agent and the fleet supervisor

pub mod agent;
pub mod supervisor;

pub use agent::{Agent, AccountRunner, AgentReport, AgentSettings, PageReport, PageStatus, SubmissionReport};
pub use supervisor::{Supervisor, SupervisorError, SupervisorSettings, SupervisorState};
