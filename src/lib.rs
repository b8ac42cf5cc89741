//! Itinera - multi-agent travel planning
//!
//! A coordinator and a fixed set of worker agents (planner, location search,
//! calendar, share, optional verifier) turn a travel request into an
//! itinerary, calendar events and a shareable page.
//!
//! # Overview
//!
//! - Agents answer with a closed, schema-validated output: a handoff, tool
//!   calls, or a completion. Free text is never parsed for routing.
//! - Control moves only through atomic handoffs, bounded by a loop guard.
//! - Tools are checked against the caller's capabilities, their input
//!   schema and, for irreversible tools, the user's confirmation.
//! - Every step lands in an append-only log; replaying it rebuilds the
//!   session exactly.
//!
//! # Architecture
//!
//! - `config` - Settings and agent prompts
//! - `agent` - Agent identities, roster, coordinator and worker loop
//! - `handoff` - Control transfer and loop guard
//! - `conversation` - Session state and history records
//! - `tools` - Tool catalog, registry and providers
//! - `model` - Structured output and model providers
//! - `store` - History stores
//! - `assembler` - Final response assembly
//! - `orchestrator` - Per-message run loop
//! - `session` - Sessions and the session manager
//!
//! # Example
//!
//! ```rust,no_run
//! use itinera::config::Settings;
//! use itinera::orchestrator::Orchestrator;
//! use itinera::session::Session;
//! use itinera::store::create_store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let settings = Settings::load()?;
//!     let orchestrator = Orchestrator::from_settings(&settings, None)?;
//!     let mut session = Session::create(create_store(&settings)?, None).await?;
//!
//!     session.confirm("create_share_page").await?;
//!     let response = orchestrator
//!         .handle_message(&mut session, "plan a 3-night, 4-day Seoul trip")
//!         .await?;
//!     println!("{}", response.render_text());
//!
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod assembler;
pub mod cli;
pub mod config;
pub mod conversation;
pub mod error;
pub mod handoff;
pub mod model;
pub mod orchestrator;
pub mod session;
pub mod store;
pub mod tools;

pub use error::{ItineraError, Result};
