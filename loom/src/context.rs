//! Context strategy: builds the message list sent to the model each
//! iteration from accumulated agent memory, with pluggable summarization
//! for when history grows long.

use async_trait::async_trait;

use crate::agent::memory::AgentMemory;
use crate::message::ChatMessage;

/// Produces the message list for a model call from the agent's memory.
/// The default strategy just replays full history; a summarizing strategy
/// can compress older steps once a threshold is crossed.
#[async_trait]
pub trait ContextStrategy: Send + Sync {
    /// Name of this strategy, for tracing.
    fn name(&self) -> &str;

    /// Build the messages to send to the model this iteration.
    async fn build(&self, memory: &AgentMemory) -> Vec<ChatMessage>;
}

/// Replays the full step history verbatim on every call.
#[derive(Debug, Clone, Copy, Default)]
pub struct FullHistoryStrategy;

#[async_trait]
impl ContextStrategy for FullHistoryStrategy {
    fn name(&self) -> &str {
        "full_history"
    }

    async fn build(&self, memory: &AgentMemory) -> Vec<ChatMessage> {
        memory.to_messages(false)
    }
}

/// Once the step count exceeds `threshold`, renders steps older than the
/// trailing `keep_recent` window in summary mode (per
/// [`MemoryStep::to_messages`](crate::agent::memory::MemoryStep::to_messages)'s
/// `summary_mode` flag) instead of dropping them outright.
#[derive(Debug, Clone, Copy)]
pub struct SummarizingStrategy {
    /// Number of steps above which older steps are summarized.
    pub threshold: usize,
    /// Number of most-recent steps always rendered in full.
    pub keep_recent: usize,
}

impl SummarizingStrategy {
    /// Create a strategy summarizing once `threshold` steps have
    /// accumulated, always keeping the last `keep_recent` in full.
    #[must_use]
    pub const fn new(threshold: usize, keep_recent: usize) -> Self {
        Self {
            threshold,
            keep_recent,
        }
    }
}

impl Default for SummarizingStrategy {
    fn default() -> Self {
        Self::new(20, 6)
    }
}

#[async_trait]
impl ContextStrategy for SummarizingStrategy {
    fn name(&self) -> &str {
        "summarizing"
    }

    async fn build(&self, memory: &AgentMemory) -> Vec<ChatMessage> {
        let steps = memory.get_steps();
        if steps.len() <= self.threshold {
            return memory.to_messages(false);
        }

        let cutoff = memory.steps.len().saturating_sub(self.keep_recent);
        let mut messages = memory.system_prompt.to_messages(false);
        for (index, step) in memory.steps.iter().enumerate() {
            let summary_mode = index < cutoff;
            messages.extend(step.to_messages(summary_mode));
        }
        messages
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::memory::{ActionStep, TaskStep};

    fn memory_with_steps(count: usize) -> AgentMemory {
        let mut memory = AgentMemory::new("you are a test agent");
        memory.add_step(TaskStep {
            task: "do the thing".to_owned(),
        });
        for i in 0..count {
            memory.add_step(ActionStep {
                step_number: i,
                model_output: Some(format!("thinking about step {i}")),
                ..Default::default()
            });
        }
        memory
    }

    #[tokio::test]
    async fn full_history_includes_every_step() {
        let memory = memory_with_steps(5);
        let strategy = FullHistoryStrategy;
        let messages = strategy.build(&memory).await;
        assert!(messages.len() > 5);
    }

    #[tokio::test]
    async fn summarizing_strategy_passes_through_below_threshold() {
        let memory = memory_with_steps(3);
        let strategy = SummarizingStrategy::new(20, 6);
        let full = FullHistoryStrategy.build(&memory).await.len();
        let summarized = strategy.build(&memory).await.len();
        assert_eq!(full, summarized);
    }

    #[tokio::test]
    async fn summarizing_strategy_compresses_older_steps_above_threshold() {
        let memory = memory_with_steps(30);
        let strategy = SummarizingStrategy::new(10, 3);
        let full = FullHistoryStrategy.build(&memory).await.len();
        let summarized = strategy.build(&memory).await.len();
        assert!(summarized < full);
    }
}
