//! Control-transfer protocol.
//!
//! A transfer is a single [`Action::Transfer`] record: appending it moves the
//! active-agent pointer and hands the payload forward in one step, so there is
//! no window in which the log and the state disagree.

use crate::agent::{AgentId, AgentRoster, RouteTarget};
use crate::conversation::{Action, ConversationState, TransferReason, VISITED_CAPACITY};
use crate::error::{ItineraError, Result};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// A requested transfer. Lives only until it is turned into a history record.
#[derive(Debug, Clone, PartialEq)]
pub struct HandoffCommand {
    pub target: RouteTarget,
    pub payload: Value,
    pub reason: TransferReason,
}

impl HandoffCommand {
    pub fn to(target: AgentId, payload: Value, reason: TransferReason) -> Self {
        Self {
            target: RouteTarget::Agent(target),
            payload,
            reason,
        }
    }
}

/// Bounds repeated activations of the same worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopGuard {
    /// Number of most recent activations inspected.
    pub window: usize,
    /// Activations of one worker allowed inside the window.
    pub max_repeats: usize,
    /// Consecutive handoffs an agent may make to itself.
    pub self_handoff_limit: usize,
}

impl Default for LoopGuard {
    fn default() -> Self {
        Self {
            window: 6,
            max_repeats: 2,
            self_handoff_limit: 1,
        }
    }
}

impl LoopGuard {
    pub fn new(window: usize, max_repeats: usize, self_handoff_limit: usize) -> Self {
        Self {
            window: window.clamp(1, VISITED_CAPACITY),
            max_repeats: max_repeats.max(1),
            self_handoff_limit,
        }
    }

    /// Check whether activating `target` from `from` is allowed.
    ///
    /// The coordinator is never counted.
    pub fn check(&self, state: &ConversationState, from: AgentId, target: AgentId) -> Result<()> {
        if target.is_coordinator() {
            return Ok(());
        }

        let occurrences = state
            .recent_visits(self.window)
            .iter()
            .filter(|a| **a == target)
            .count()
            + 1;
        if occurrences > self.max_repeats {
            return Err(ItineraError::LoopGuard {
                agent: target,
                occurrences,
                window: self.window,
            });
        }

        if from == target {
            let self_handoffs = state.trailing_run(target);
            if self_handoffs > self.self_handoff_limit {
                return Err(ItineraError::LoopGuard {
                    agent: target,
                    occurrences: self_handoffs + 1,
                    window: self.window,
                });
            }
        }

        Ok(())
    }
}

/// Applies transfers against the roster's addressing rules and the loop guard.
#[derive(Clone)]
pub struct HandoffProtocol {
    roster: Arc<AgentRoster>,
    guard: LoopGuard,
}

impl HandoffProtocol {
    pub fn new(roster: Arc<AgentRoster>, guard: LoopGuard) -> Self {
        Self { roster, guard }
    }

    pub fn roster(&self) -> &AgentRoster {
        &self.roster
    }

    pub fn guard(&self) -> &LoopGuard {
        &self.guard
    }

    /// Transfer control from the active agent to the command's target.
    ///
    /// Fails with `Routing` when the target is `TERMINATE`, disabled, or not
    /// addressable by the active agent, and with `LoopGuard` when the guard
    /// trips. On failure nothing is recorded.
    pub fn transfer(&self, state: &mut ConversationState, command: HandoffCommand) -> Result<AgentId> {
        let from = state.active();
        let target = command.target.agent().ok_or_else(|| {
            ItineraError::Routing(format!("{} cannot hand off to TERMINATE", from))
        })?;

        if !self.roster.is_enabled(target) {
            return Err(ItineraError::Routing(format!("{} is not enabled", target)));
        }
        let definition = self
            .roster
            .get(from)
            .ok_or_else(|| ItineraError::Routing(format!("{} is not enabled", from)))?;
        if !definition.may_address(target) {
            return Err(ItineraError::Routing(format!(
                "{} is not permitted to address {}",
                from, target
            )));
        }

        self.guard.check(state, from, target)?;

        debug!("Transfer {} -> {} ({})", from, target, command.reason.label());
        state.record(
            from,
            Action::Transfer {
                from,
                to: target,
                payload: command.payload,
                reason: command.reason,
            },
        )?;
        Ok(target)
    }

    /// Return control to the coordinator with an explicit failure reason.
    ///
    /// Escalation is always permitted and bypasses the loop guard. A no-op
    /// when the coordinator is already active.
    pub fn escalate(&self, state: &mut ConversationState, payload: Value, reason: TransferReason) -> Result<()> {
        let from = state.active();
        if from.is_coordinator() {
            return Ok(());
        }

        warn!("{} escalates to coordinator: {}", from, reason.label());
        state.record(
            from,
            Action::Transfer {
                from,
                to: AgentId::Coordinator,
                payload,
                reason,
            },
        )?;
        Ok(())
    }

    /// Transfer for a worker, converting a tripped loop guard into an
    /// escalation that carries the blocked command.
    ///
    /// Returns the agent that ends up active.
    pub fn transfer_or_escalate(&self, state: &mut ConversationState, command: HandoffCommand) -> Result<AgentId> {
        let blocked = command.clone();
        match self.transfer(state, command) {
            Err(ItineraError::LoopGuard {
                agent,
                occurrences,
                window,
            }) => {
                let reason = TransferReason::LoopDetected {
                    blocked_target: agent,
                    blocked_payload: blocked.payload.clone(),
                    occurrences,
                    window,
                };
                self.escalate(state, blocked.payload, reason)?;
                Ok(AgentId::Coordinator)
            }
            other => other,
        }
    }
}
