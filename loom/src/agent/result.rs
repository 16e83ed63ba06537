//! Terminal outcomes of an agent execution loop.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::memory::Timing;
use crate::error::{AgentError, FailureReport, Result};
use crate::usage::Usage;

/// A successful loop termination: the produced output plus the resource
/// accounting accumulated along the way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentOutcome<T> {
    /// The output value produced by the final answer step.
    pub output: T,
    /// Total token usage across all iterations.
    pub usage: Usage,
    /// Number of iterations taken.
    pub iterations: usize,
    /// Timing for the whole run.
    pub timing: Timing,
}

impl<T> AgentOutcome<T> {
    /// Create an outcome for `output` with no usage/iteration history yet.
    #[must_use]
    pub fn new(output: T) -> Self {
        Self {
            output,
            usage: Usage::default(),
            iterations: 0,
            timing: Timing::default(),
        }
    }

    /// Map the output value, preserving usage/iteration/timing metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> AgentOutcome<U> {
        AgentOutcome {
            output: f(self.output),
            usage: self.usage,
            iterations: self.iterations,
            timing: self.timing,
        }
    }
}

/// A request handed off from one agent to another rather than answered
/// directly. Populated when a task classifier or the agent itself decides
/// the task belongs to a different specialist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HandoffRequest {
    /// Name of the agent the task should be routed to.
    pub target_agent: String,
    /// The task description to hand off.
    pub task: String,
    /// Context accumulated so far, passed along to the receiving agent.
    pub context: Value,
}

/// The terminal result of an agent execution loop: either it completed, it
/// hit a stop condition that requires escalation, or it decided to hand the
/// task off to a different agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum LoopResult {
    /// The loop produced a final answer.
    Complete(AgentOutcome<Value>),
    /// The loop stopped without a final answer and needs external handling.
    Escalate(FailureReport),
    /// The loop decided the task should run on a different agent.
    Handoff(HandoffRequest),
}

impl LoopResult {
    /// Returns `true` if the loop completed successfully.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    /// Get the output value if the loop completed.
    #[must_use]
    pub const fn output(&self) -> Option<&Value> {
        match self {
            Self::Complete(outcome) => Some(&outcome.output),
            Self::Escalate(_) | Self::Handoff(_) => None,
        }
    }

    /// Get the output as a specific type, if the loop completed.
    pub fn output_as<T: for<'de> Deserialize<'de>>(&self) -> Option<T> {
        self.output().and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    /// Convert into a plain [`Result`], collapsing escalation and handoff
    /// into errors.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop did not complete.
    pub fn into_result(self) -> Result<Value> {
        match self {
            Self::Complete(outcome) => Ok(outcome.output),
            Self::Escalate(report) => Err(AgentError::Internal {
                message: report.to_string(),
            }),
            Self::Handoff(request) => Err(AgentError::Orchestration {
                message: format!("unhandled handoff to '{}'", request.target_agent),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn complete_reports_success_and_output() {
        let result = LoopResult::Complete(AgentOutcome::new(serde_json::json!({"answer": 42})));
        assert!(result.is_complete());
        assert!(result.output().is_some());
    }

    #[test]
    fn escalate_and_handoff_are_not_complete() {
        let escalated = LoopResult::Escalate(FailureReport::Stuck("no progress".to_owned()));
        assert!(!escalated.is_complete());
        assert!(escalated.into_result().is_err());

        let handoff = LoopResult::Handoff(HandoffRequest {
            target_agent: "billing".to_owned(),
            task: "refund request".to_owned(),
            context: Value::Null,
        });
        assert!(handoff.into_result().is_err());
    }

    #[test]
    fn outcome_map_preserves_metadata() {
        let outcome = AgentOutcome::new(41).map(|n| n + 1);
        assert_eq!(outcome.output, 42);
    }
}
