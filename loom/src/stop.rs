//! Stop-condition evaluator: decides, at the end of each iteration, whether
//! the execution loop should keep going and if not, why.
//!
//! Reasons are checked in priority order -- the first one that applies wins,
//! even if multiple conditions are simultaneously true (e.g. the budget is
//! also exhausted on the same iteration the model reports completion).

use serde::{Deserialize, Serialize};

use crate::budget::{BudgetExhausted, BudgetState};

/// Why the execution loop stopped, ranked by priority (lower variant
/// discriminant wins when more than one condition holds simultaneously).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// An external abort signal (interrupt flag, cancellation token) fired.
    AbortSignal = 0,
    /// The model invoked its final-answer tool or equivalent.
    ReportComplete = 1,
    /// A hard token or wall-clock budget was exceeded.
    HardBudget = 2,
    /// The configured maximum iteration count was reached.
    MaxIterations = 3,
    /// Loop detection identified a repeating, non-progressing call pattern.
    LoopDetected = 4,
    /// The model returned no tool calls and no final answer.
    NoToolCalls = 5,
}

impl StopReason {
    /// Returns `true` if this reason represents a normal, successful stop.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::ReportComplete)
    }
}

/// The observations the evaluator needs from the current iteration to make
/// its decision.
#[derive(Debug, Clone, Copy)]
pub struct StopCheckInput {
    /// Whether an external abort signal has fired.
    pub aborted: bool,
    /// Whether the model reported its final answer this iteration.
    pub reported_complete: bool,
    /// Whether the model's response contained any tool calls.
    pub had_tool_calls: bool,
    /// Loop-detector trip state for this iteration, if any.
    pub loop_detected: bool,
}

/// Evaluates stop conditions against a run's [`BudgetState`] and the current
/// iteration's observations, applying the fixed priority order.
#[derive(Debug, Clone, Copy, Default)]
pub struct StopEvaluator;

impl StopEvaluator {
    /// Create a new evaluator. Stateless -- all state lives in
    /// [`BudgetState`] and [`StopCheckInput`].
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Decide whether the loop should stop, and why.
    ///
    /// When the only exhausted limit is the iteration count, this gives
    /// `budget` a chance to extend itself (via [`BudgetState::maybe_extend`])
    /// before treating it as a stop condition.
    #[must_use]
    pub fn evaluate(self, budget: &mut BudgetState, input: StopCheckInput) -> Option<StopReason> {
        if input.aborted {
            return Some(StopReason::AbortSignal);
        }
        if input.reported_complete {
            return Some(StopReason::ReportComplete);
        }
        if let Some(exhausted) = budget.exhausted() {
            match exhausted {
                BudgetExhausted::Tokens | BudgetExhausted::WallClock => {
                    return Some(StopReason::HardBudget);
                }
                BudgetExhausted::Iterations => {
                    if !budget.maybe_extend() {
                        return Some(StopReason::MaxIterations);
                    }
                }
            }
        }
        if input.loop_detected {
            return Some(StopReason::LoopDetected);
        }
        if !input.had_tool_calls {
            return Some(StopReason::NoToolCalls);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::Tier;
    use std::time::Duration;

    fn budget() -> BudgetState {
        BudgetState::with_limits(
            Tier::Small,
            crate::budget::BudgetLimits {
                max_iterations: 10,
                max_tokens: 1_000_000,
                max_wall_clock: Duration::from_secs(3600),
            },
        )
    }

    fn clean_input() -> StopCheckInput {
        StopCheckInput {
            aborted: false,
            reported_complete: false,
            had_tool_calls: true,
            loop_detected: false,
        }
    }

    #[test]
    fn abort_signal_outranks_everything() {
        let evaluator = StopEvaluator::new();
        let input = StopCheckInput {
            aborted: true,
            reported_complete: true,
            ..clean_input()
        };
        assert_eq!(evaluator.evaluate(&mut budget(), input), Some(StopReason::AbortSignal));
    }

    #[test]
    fn report_complete_outranks_budget_and_loop() {
        let evaluator = StopEvaluator::new();
        let input = StopCheckInput {
            reported_complete: true,
            loop_detected: true,
            ..clean_input()
        };
        assert_eq!(
            evaluator.evaluate(&mut budget(), input),
            Some(StopReason::ReportComplete)
        );
    }

    #[test]
    fn budget_exhaustion_outranks_loop_detection() {
        let mut b = budget();
        // No recent search signal and no recent progress, so the budget
        // won't extend itself out from under this check.
        for _ in 0..6 {
            b.record_progress(1);
        }
        for _ in 0..10 {
            b.record_iteration();
        }
        let evaluator = StopEvaluator::new();
        let input = StopCheckInput {
            loop_detected: true,
            ..clean_input()
        };
        assert_eq!(
            evaluator.evaluate(&mut b, input),
            Some(StopReason::MaxIterations)
        );
    }

    #[test]
    fn no_tool_calls_is_the_lowest_priority_reason() {
        let evaluator = StopEvaluator::new();
        let input = StopCheckInput {
            had_tool_calls: false,
            ..clean_input()
        };
        assert_eq!(
            evaluator.evaluate(&mut budget(), input),
            Some(StopReason::NoToolCalls)
        );
    }

    #[test]
    fn none_returned_when_nothing_applies() {
        let evaluator = StopEvaluator::new();
        assert_eq!(evaluator.evaluate(&mut budget(), clean_input()), None);
    }
}
