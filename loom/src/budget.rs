//! Budget and progress state: the per-run counters the loop consults to
//! decide whether it's allowed to keep going, and whether it's stuck.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::usage::{Usage, UsageTracker};

/// Task size tier, driving default resource limits and tool visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    /// Single tool call or a direct answer.
    Small,
    /// A handful of dependent steps.
    Medium,
    /// A multi-subtask plan requiring orchestration.
    Large,
}

impl Tier {
    /// Default resource limits for this tier.
    #[must_use]
    pub const fn default_limits(self) -> BudgetLimits {
        match self {
            Self::Small => BudgetLimits {
                max_iterations: 5,
                max_tokens: 20_000,
                max_wall_clock: Duration::from_secs(60),
            },
            Self::Medium => BudgetLimits {
                max_iterations: 15,
                max_tokens: 100_000,
                max_wall_clock: Duration::from_secs(300),
            },
            Self::Large => BudgetLimits {
                max_iterations: 40,
                max_tokens: 400_000,
                max_wall_clock: Duration::from_secs(1200),
            },
        }
    }

    /// The next tier up, or `None` if already at [`Tier::Large`].
    #[must_use]
    pub const fn escalate(self) -> Option<Self> {
        match self {
            Self::Small => Some(Self::Medium),
            Self::Medium => Some(Self::Large),
            Self::Large => None,
        }
    }
}

/// Hard limits a run must not exceed.
#[derive(Debug, Clone, Copy)]
pub struct BudgetLimits {
    /// Maximum number of loop iterations.
    pub max_iterations: usize,
    /// Maximum cumulative tokens (input + output).
    pub max_tokens: u32,
    /// Maximum wall-clock duration for the run.
    pub max_wall_clock: Duration,
}

/// A single tool invocation, as recorded for loop detection. Two calls are
/// considered equivalent if both the name and the argument value match
/// exactly.
#[derive(Debug, Clone, PartialEq, Eq)]
struct CallSignature {
    tool_name: String,
    args: Value,
}

/// Size of the loop detector's ring buffer. Tripping requires the most
/// recent half of the window to exactly repeat the half before it.
const LOOP_WINDOW: usize = 6;

/// Detects a stuck loop: the last three tool calls exactly repeating the
/// three calls before them, with no new information entering the
/// conversation in between.
#[derive(Debug, Clone)]
pub struct LoopDetector {
    recent: VecDeque<CallSignature>,
}

impl LoopDetector {
    /// Create an empty detector over a six-call window.
    #[must_use]
    pub fn new() -> Self {
        Self {
            recent: VecDeque::with_capacity(LOOP_WINDOW),
        }
    }

    /// Record a tool call and check whether the window now shows an exact
    /// repeat.
    ///
    /// Returns `Some(description)` once the window fills and its second
    /// half is identical, call for call, to its first half.
    pub fn record(&mut self, tool_name: &str, args: &Value) -> Option<String> {
        let signature = CallSignature {
            tool_name: tool_name.to_owned(),
            args: args.clone(),
        };
        if self.recent.len() == LOOP_WINDOW {
            self.recent.pop_front();
        }
        self.recent.push_back(signature);

        if self.recent.len() < LOOP_WINDOW {
            return None;
        }

        let calls: Vec<&CallSignature> = self.recent.iter().collect();
        let half = LOOP_WINDOW / 2;
        let (first, second) = calls.split_at(half);
        if first == second {
            Some(format!(
                "the last {half} tool calls exactly repeat the {half} before them"
            ))
        } else {
            None
        }
    }
}

impl Default for LoopDetector {
    fn default() -> Self {
        Self::new()
    }
}

/// Why a run is not allowed to continue, as determined by [`BudgetState`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExhausted {
    /// Iteration count reached the limit.
    Iterations,
    /// Token usage reached the limit.
    Tokens,
    /// Wall-clock duration reached the limit.
    WallClock,
}

/// Mutable per-run accounting: iteration count, accumulated usage, elapsed
/// time, progress tracking, and loop detection state.
#[derive(Debug, Clone)]
pub struct BudgetState {
    tier: Tier,
    limits: BudgetLimits,
    iterations: usize,
    usage: UsageTracker,
    started_at: Instant,
    loop_detector: LoopDetector,
    /// Hard cap on cumulative tokens; `0` means unlimited.
    hard_token_limit: u32,
    /// Optional model-inferred iteration estimate, consulted when sizing
    /// the initial iteration budget.
    task_budget: Option<usize>,
    /// Iterations elapsed since the last tool output judged as progress.
    iterations_since_progress: usize,
    /// Iteration a "signal" (e.g. a search call) was last recorded at.
    last_signal_iteration: Option<usize>,
    /// `iterations_since_progress` below this is still considered "not
    /// stuck" when deciding whether to extend the budget.
    stuck_threshold: usize,
}

/// Tool output longer than this many characters counts as progress and
/// resets [`BudgetState::iterations_since_progress`].
const PROGRESS_OUTPUT_THRESHOLD: usize = 30;

/// Iteration budgets with no active token ceiling are capped at this many
/// iterations regardless of the tier's configured default.
const UNMETERED_ITERATION_CAP: usize = 12;

/// When `remaining <= EXTENSION_TRIGGER`, the budget may be extended.
const EXTENSION_TRIGGER: usize = 2;

/// Number of additional iterations granted by a single extension.
const EXTENSION_GRANT: usize = 5;

/// A signal counts as "recent" for extension purposes within this many
/// iterations.
const RECENT_SIGNAL_WINDOW: usize = 3;

/// Progress counts as "recent" for extension purposes within this many
/// iterations.
const RECENT_PROGRESS_WINDOW: usize = 2;

impl BudgetState {
    /// Start a new budget at `tier`'s default limits.
    #[must_use]
    pub fn new(tier: Tier) -> Self {
        Self::with_limits(tier, tier.default_limits())
    }

    /// Start a new budget at `tier` with explicit `limits`, overriding the
    /// tier's defaults.
    #[must_use]
    pub fn with_limits(tier: Tier, limits: BudgetLimits) -> Self {
        Self::with_task_budget(tier, limits, None)
    }

    /// Start a new budget at `tier` with explicit `limits`, additionally
    /// consulting an optional model-inferred `task_budget` when sizing the
    /// initial iteration allowance.
    #[must_use]
    pub fn with_task_budget(tier: Tier, mut limits: BudgetLimits, task_budget: Option<usize>) -> Self {
        let hard_token_limit = limits.max_tokens;
        limits.max_iterations =
            Self::initial_iteration_budget(limits.max_iterations, task_budget, hard_token_limit);
        Self {
            tier,
            limits,
            iterations: 0,
            usage: UsageTracker::new(),
            started_at: Instant::now(),
            loop_detector: LoopDetector::default(),
            hard_token_limit,
            task_budget,
            iterations_since_progress: 0,
            last_signal_iteration: None,
            stuck_threshold: 4,
        }
    }

    /// Initial iteration budget: the smaller of `configured` and any
    /// `task_budget` estimate, further capped at [`UNMETERED_ITERATION_CAP`]
    /// when no hard token ceiling is active.
    fn initial_iteration_budget(
        configured: usize,
        task_budget: Option<usize>,
        hard_token_limit: u32,
    ) -> usize {
        let capped = task_budget.map_or(configured, |budget| configured.min(budget));
        if hard_token_limit == 0 {
            capped.min(UNMETERED_ITERATION_CAP)
        } else {
            capped
        }
    }

    /// Override the stuck threshold used by [`Self::maybe_extend`].
    #[must_use]
    pub const fn with_stuck_threshold(mut self, stuck_threshold: usize) -> Self {
        self.stuck_threshold = stuck_threshold;
        self
    }

    /// The tier this budget was sized for.
    #[must_use]
    pub const fn tier(&self) -> Tier {
        self.tier
    }

    /// Number of iterations consumed so far.
    #[must_use]
    pub const fn iterations(&self) -> usize {
        self.iterations
    }

    /// Iterations elapsed since the last tool output counted as progress.
    #[must_use]
    pub const fn iterations_since_progress(&self) -> usize {
        self.iterations_since_progress
    }

    /// Total usage consumed so far.
    #[must_use]
    pub fn total_usage(&self) -> Usage {
        self.usage.total()
    }

    /// Record the start of a new iteration.
    pub fn record_iteration(&mut self) {
        self.iterations += 1;
    }

    /// Record token usage from a model call.
    pub fn record_usage(&mut self, usage: Usage) {
        self.usage.add(usage);
    }

    /// Record a tool call for loop detection, and for signal tracking when
    /// the call looks like a search.
    ///
    /// Returns `Some(description)` if the call pattern looks stuck.
    pub fn record_tool_call(&mut self, tool_name: &str, args: &Value) -> Option<String> {
        if tool_name.to_ascii_lowercase().contains("search") {
            self.last_signal_iteration = Some(self.iterations);
        }
        self.loop_detector.record(tool_name, args)
    }

    /// Record the length of this iteration's tool output and update the
    /// progress counter: output longer than [`PROGRESS_OUTPUT_THRESHOLD`]
    /// chars resets it to zero, anything else increments it.
    pub fn record_progress(&mut self, output_len: usize) {
        if output_len > PROGRESS_OUTPUT_THRESHOLD {
            self.iterations_since_progress = 0;
        } else {
            self.iterations_since_progress += 1;
        }
    }

    /// When the iteration budget is nearly spent, extend it by
    /// [`EXTENSION_GRANT`] iterations if a recent search signal, recent
    /// progress, or a low stuck counter suggests the run is still making
    /// headway. Returns `true` if the budget was extended.
    pub fn maybe_extend(&mut self) -> bool {
        let remaining = self.limits.max_iterations.saturating_sub(self.iterations);
        if remaining > EXTENSION_TRIGGER {
            return false;
        }
        let recent_signal = self
            .last_signal_iteration
            .is_some_and(|at| self.iterations.saturating_sub(at) <= RECENT_SIGNAL_WINDOW);
        let recent_progress = self.iterations_since_progress <= RECENT_PROGRESS_WINDOW;
        let under_stuck_threshold = self.iterations_since_progress < self.stuck_threshold;

        if recent_signal || recent_progress || under_stuck_threshold {
            self.limits.max_iterations += EXTENSION_GRANT;
            true
        } else {
            false
        }
    }

    /// Check whether the run has exceeded any hard limit.
    #[must_use]
    pub fn exhausted(&self) -> Option<BudgetExhausted> {
        if self.iterations >= self.limits.max_iterations {
            return Some(BudgetExhausted::Iterations);
        }
        if self.hard_token_limit > 0 && self.usage.total().total_tokens >= self.hard_token_limit {
            return Some(BudgetExhausted::Tokens);
        }
        if self.started_at.elapsed() >= self.limits.max_wall_clock {
            return Some(BudgetExhausted::WallClock);
        }
        None
    }

    /// Elapsed wall-clock time since the budget started.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_tier_has_tighter_limits_than_large() {
        let small = Tier::Small.default_limits();
        let large = Tier::Large.default_limits();
        assert!(small.max_iterations < large.max_iterations);
        assert!(small.max_tokens < large.max_tokens);
    }

    #[test]
    fn exhausted_reports_iterations_first() {
        let mut state = BudgetState::with_limits(
            Tier::Small,
            BudgetLimits {
                max_iterations: 2,
                max_tokens: 1_000_000,
                max_wall_clock: Duration::from_secs(3600),
            },
        );
        assert!(state.exhausted().is_none());
        state.record_iteration();
        state.record_iteration();
        assert_eq!(state.exhausted(), Some(BudgetExhausted::Iterations));
    }

    #[test]
    fn exhausted_reports_tokens() {
        let mut state = BudgetState::with_limits(
            Tier::Small,
            BudgetLimits {
                max_iterations: 1_000,
                max_tokens: 100,
                max_wall_clock: Duration::from_secs(3600),
            },
        );
        state.record_usage(Usage::new(80, 30));
        assert_eq!(state.exhausted(), Some(BudgetExhausted::Tokens));
    }

    #[test]
    fn zero_hard_token_limit_means_unlimited() {
        let mut state = BudgetState::with_limits(
            Tier::Small,
            BudgetLimits {
                max_iterations: 1_000,
                max_tokens: 0,
                max_wall_clock: Duration::from_secs(3600),
            },
        );
        state.record_usage(Usage::new(80, 30));
        assert_eq!(state.exhausted(), None);
    }

    #[test]
    fn no_token_budget_caps_iteration_budget_at_twelve() {
        let state = BudgetState::with_limits(
            Tier::Large,
            BudgetLimits {
                max_iterations: 40,
                max_tokens: 0,
                max_wall_clock: Duration::from_secs(3600),
            },
        );
        assert!(state.exhausted().is_none());
        let mut state = state;
        for _ in 0..12 {
            state.record_iteration();
        }
        assert_eq!(state.exhausted(), Some(BudgetExhausted::Iterations));
    }

    #[test]
    fn task_budget_tightens_the_configured_iteration_limit() {
        let state = BudgetState::with_task_budget(Tier::Medium, Tier::Medium.default_limits(), Some(3));
        let mut state = state;
        state.record_iteration();
        state.record_iteration();
        state.record_iteration();
        assert_eq!(state.exhausted(), Some(BudgetExhausted::Iterations));
    }

    #[test]
    fn loop_detector_trips_on_exact_half_window_repeat() {
        let mut detector = LoopDetector::new();
        let calls = [
            ("search", serde_json::json!({"q": "a"})),
            ("read", serde_json::json!({"path": "x"})),
            ("write", serde_json::json!({"path": "y"})),
        ];
        for (name, args) in &calls {
            assert!(detector.record(name, args).is_none());
        }
        for (idx, (name, args)) in calls.iter().enumerate() {
            let result = detector.record(name, args);
            if idx == calls.len() - 1 {
                assert!(result.is_some());
            } else {
                assert!(result.is_none());
            }
        }
    }

    #[test]
    fn loop_detector_does_not_trip_on_six_distinct_calls() {
        let mut detector = LoopDetector::new();
        for i in 0..6 {
            let args = serde_json::json!({"q": i});
            assert!(detector.record("search", &args).is_none());
        }
    }

    #[test]
    fn loop_detector_ignores_varying_arguments() {
        let mut detector = LoopDetector::new();
        assert!(detector.record("search", &serde_json::json!({"q": "a"})).is_none());
        assert!(detector.record("search", &serde_json::json!({"q": "b"})).is_none());
        assert!(detector.record("search", &serde_json::json!({"q": "c"})).is_none());
    }

    #[test]
    fn budget_state_tracks_tool_call_loop_detection() {
        let mut state = BudgetState::new(Tier::Medium);
        for round in 0..2 {
            let args = serde_json::json!({"q": round});
            assert!(state.record_tool_call("search", &args).is_none());
            assert!(state.record_tool_call("read", &args).is_none());
            assert!(state.record_tool_call("write", &args).is_none());
        }
    }

    #[test]
    fn budget_state_trips_loop_detection_on_repeated_triple() {
        let mut state = BudgetState::new(Tier::Medium);
        let args = serde_json::json!({"q": "foo"});
        assert!(state.record_tool_call("search", &args).is_none());
        assert!(state.record_tool_call("read", &args).is_none());
        assert!(state.record_tool_call("write", &args).is_none());
        assert!(state.record_tool_call("search", &args).is_none());
        assert!(state.record_tool_call("read", &args).is_none());
        assert!(state.record_tool_call("write", &args).is_some());
    }

    #[test]
    fn progress_resets_on_long_output_and_increments_otherwise() {
        let mut state = BudgetState::new(Tier::Small);
        state.record_progress(5);
        state.record_progress(5);
        assert_eq!(state.iterations_since_progress(), 2);
        state.record_progress(31);
        assert_eq!(state.iterations_since_progress(), 0);
    }

    #[test]
    fn maybe_extend_grants_more_iterations_after_recent_signal() {
        let mut state = BudgetState::with_limits(
            Tier::Small,
            BudgetLimits {
                max_iterations: 3,
                max_tokens: 1_000_000,
                max_wall_clock: Duration::from_secs(3600),
            },
        );
        state.record_tool_call("search", &serde_json::json!({"q": "a"}));
        state.record_iteration();
        state.record_iteration();
        state.record_iteration();
        assert_eq!(state.exhausted(), Some(BudgetExhausted::Iterations));
        assert!(state.maybe_extend());
        assert_eq!(state.exhausted(), None);
    }

    #[test]
    fn maybe_extend_refuses_when_nothing_suggests_progress() {
        let mut state = BudgetState::with_limits(
            Tier::Small,
            BudgetLimits {
                max_iterations: 3,
                max_tokens: 1_000_000,
                max_wall_clock: Duration::from_secs(3600),
            },
        )
        .with_stuck_threshold(0);
        for _ in 0..6 {
            state.record_progress(1);
        }
        state.record_iteration();
        state.record_iteration();
        state.record_iteration();
        assert!(!state.maybe_extend());
    }
}
