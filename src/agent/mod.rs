//! Agents taking part in a session.
//!
//! The set of agents is closed: identities are an enum, definitions are fixed
//! at startup, and every worker shares the generic [`Worker`] state machine,
//! parameterised only by its [`AgentDefinition`].

mod coordinator;
mod definition;
mod identity;
mod runtime;
mod worker;

pub use coordinator::{Coordinator, Decision, APOLOGY};
pub use definition::{AgentDefinition, AgentRoster, DEFAULT_MODEL_ALIAS};
pub use identity::{AgentId, RouteTarget, TERMINATE};
pub use runtime::Runtime;
pub use worker::{Worker, WorkerOutcome};
