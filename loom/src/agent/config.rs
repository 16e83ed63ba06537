//! Agent configuration types.

use crate::budget::{BudgetLimits, Tier};

/// Configuration for an agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Maximum number of steps (default: 20), used when no [`Tier`] override
    /// is set via [`AgentConfig::with_tier`].
    #[doc(hidden)]
    pub max_steps: usize,
    /// Planning interval (run planning every N steps).
    pub planning_interval: Option<usize>,
    /// Agent name.
    pub name: Option<String>,
    /// Agent description.
    pub description: Option<String>,
    /// Whether to provide a run summary when acting as a managed agent.
    pub provide_run_summary: Option<bool>,
    /// Maximum number of concurrent tool calls (default: unlimited).
    ///
    /// When multiple tool calls are returned by the model, they can be executed
    /// in parallel up to this limit. Set to `Some(1)` to force sequential execution.
    /// Set to `None` for unlimited parallelism.
    pub max_parallel_tool_calls: Option<usize>,
    /// Task tier, if already classified, and explicit limit overrides for it.
    /// When set, this takes precedence over `max_steps` for the loop's
    /// iteration budget.
    pub tier: Option<(Tier, BudgetLimits)>,
}

impl AgentConfig {
    /// Default maximum number of steps for agent execution.
    pub const DEFAULT_MAX_STEPS: usize = 20;

    /// Create a new config with default values.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            max_steps: Self::DEFAULT_MAX_STEPS,
            planning_interval: None,
            name: None,
            description: None,
            provide_run_summary: None,
            max_parallel_tool_calls: None,
            tier: None,
        }
    }

    /// Pin this agent to `tier`, using the tier's default budget limits.
    #[must_use]
    pub const fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = Some((tier, tier.default_limits()));
        self
    }

    /// Pin this agent to `tier` with explicit `limits` overriding the
    /// tier's defaults.
    #[must_use]
    pub const fn with_tier_limits(mut self, tier: Tier, limits: BudgetLimits) -> Self {
        self.tier = Some((tier, limits));
        self
    }
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_max_steps_is_twenty() {
        assert_eq!(AgentConfig::new().max_steps, 20);
    }

    #[test]
    fn with_tier_populates_default_limits() {
        let config = AgentConfig::new().with_tier(Tier::Small);
        let (tier, limits) = config.tier.unwrap();
        assert_eq!(tier, Tier::Small);
        assert_eq!(limits.max_iterations, Tier::Small.default_limits().max_iterations);
    }
}
