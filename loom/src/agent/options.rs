//! Run options for agent execution.
//!
//! This module provides a unified options struct for configuring agent runs:
//! a single `run()` method taking a [`RunOptions`] rather than a growing
//! list of positional parameters.

use std::collections::HashMap;

use serde_json::Value;

/// Options for running an agent.
///
/// # Example
///
/// ```rust,ignore
/// use loom::prelude::*;
///
/// let result = agent.run(RunOptions::new("What is 2+2?")).await?;
///
/// let result = agent.run(
///     RunOptions::new("Complex task")
///         .context("user_id", json!("123"))
///         .detailed()
/// ).await?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// The task to perform.
    pub(crate) task: String,
    /// Additional context variables.
    pub(crate) context: HashMap<String, Value>,
    /// Whether to return a detailed result instead of just the answer.
    pub(crate) detailed: bool,
    /// Whether to reset the agent before running.
    pub(crate) reset: bool,
}

impl RunOptions {
    /// Create new run options with the given task.
    #[must_use]
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            context: HashMap::new(),
            detailed: false,
            reset: true,
        }
    }

    /// Add context variables.
    #[must_use]
    pub fn with_context(mut self, context: HashMap<String, Value>) -> Self {
        self.context = context;
        self
    }

    /// Add a single context variable.
    #[must_use]
    pub fn context(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context.insert(key.into(), value);
        self
    }

    /// Request detailed result output.
    #[must_use]
    pub const fn detailed(mut self) -> Self {
        self.detailed = true;
        self
    }

    /// Set whether to reset the agent before running (default: true).
    #[must_use]
    pub const fn reset(mut self, reset: bool) -> Self {
        self.reset = reset;
        self
    }

    /// Don't reset the agent, continue from previous state.
    #[must_use]
    pub const fn no_reset(mut self) -> Self {
        self.reset = false;
        self
    }
}

impl<S: Into<String>> From<S> for RunOptions {
    fn from(task: S) -> Self {
        Self::new(task)
    }
}
