//! Guard/normalizer/processor chain applied around each tool invocation.
//!
//! Every tool call passes through a fixed pipeline:
//! `normalize -> validate_input -> execute -> validate_output -> process`.
//! [`Normalizer`]s canonicalize arguments before validation (e.g. resolving
//! `..` in a path). [`InputGuard`]s and [`OutputGuard`]s use the tripwire
//! mechanism below: a guard either passes, rejects outright, or -- for
//! input -- may sanitize the arguments instead of rejecting. [`Processor`]s
//! run only on successful output, for transformations like truncation that
//! aren't safety-relevant.
//!
//! # Tripwire Mechanism
//!
//! Each guard returns a [`GuardOutcome`] containing a `rejected` flag. When
//! any guard rejects, the chain halts and [`AgentError::GuardRejected`] is
//! returned, unless the guard instead supplied a sanitized replacement.

pub mod builtins;

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, Result};

/// Minimal context passed to guards: which agent and iteration this call
/// belongs to. Deliberately small -- guards should be pure functions of
/// their input plus this context, not reach back into engine state.
#[derive(Debug, Clone)]
pub struct GuardContext {
    /// Name of the agent performing the call.
    pub agent_name: String,
    /// Iteration number within the current run.
    pub iteration: usize,
}

/// The outcome of a guard check.
#[derive(Debug, Clone)]
pub enum GuardOutcome {
    /// The content passes unchanged.
    Pass,
    /// The content passes, replaced by a sanitized form.
    Sanitized(Value),
    /// The content is rejected; the chain halts with this reason.
    Rejected(String),
}

impl GuardOutcome {
    /// Returns `true` if this outcome halts the chain.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

/// Canonicalizes tool arguments before validation runs.
pub trait Normalizer: Send + Sync {
    /// Name of this normalizer, for tracing.
    fn name(&self) -> &str;

    /// Rewrite `args` into canonical form.
    fn normalize(&self, args: Value) -> Value;
}

/// Validates tool call arguments before execution.
#[async_trait]
pub trait InputGuard: Send + Sync {
    /// Name of this guard, used in rejection messages and tracing.
    fn name(&self) -> &str;

    /// Check `args` destined for `tool_name`.
    async fn check(&self, ctx: &GuardContext, tool_name: &str, args: &Value) -> GuardOutcome;
}

/// Validates a tool's output before it re-enters the conversation.
#[async_trait]
pub trait OutputGuard: Send + Sync {
    /// Name of this guard, used in rejection messages and tracing.
    fn name(&self) -> &str;

    /// Check `output` produced by `tool_name`.
    async fn check(&self, ctx: &GuardContext, tool_name: &str, output: &Value) -> GuardOutcome;
}

/// Transforms successful tool output; never rejects.
pub trait Processor: Send + Sync {
    /// Name of this processor, for tracing.
    fn name(&self) -> &str;

    /// Transform `output`.
    fn process(&self, output: Value) -> Value;
}

/// The ordered chain of normalizers, guards, and processors applied to
/// every tool invocation.
#[derive(Default, Clone)]
pub struct GuardChain {
    normalizers: Vec<Arc<dyn Normalizer>>,
    input_guards: Vec<Arc<dyn InputGuard>>,
    output_guards: Vec<Arc<dyn OutputGuard>>,
    processors: Vec<Arc<dyn Processor>>,
}

impl GuardChain {
    /// Create an empty chain.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a normalizer, run in registration order.
    #[must_use]
    pub fn with_normalizer(mut self, normalizer: Arc<dyn Normalizer>) -> Self {
        self.normalizers.push(normalizer);
        self
    }

    /// Append an input guard, run in registration order.
    #[must_use]
    pub fn with_input_guard(mut self, guard: Arc<dyn InputGuard>) -> Self {
        self.input_guards.push(guard);
        self
    }

    /// Append an output guard, run in registration order.
    #[must_use]
    pub fn with_output_guard(mut self, guard: Arc<dyn OutputGuard>) -> Self {
        self.output_guards.push(guard);
        self
    }

    /// Append an output processor, run in registration order.
    #[must_use]
    pub fn with_processor(mut self, processor: Arc<dyn Processor>) -> Self {
        self.processors.push(processor);
        self
    }

    /// Run normalizers then input guards over `args`, returning the
    /// canonicalized and possibly-sanitized arguments to execute with.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::GuardRejected`] if any guard rejects.
    pub async fn validate_input(
        &self,
        ctx: &GuardContext,
        tool_name: &str,
        mut args: Value,
    ) -> Result<Value> {
        for normalizer in &self.normalizers {
            args = normalizer.normalize(args);
        }
        for guard in &self.input_guards {
            match guard.check(ctx, tool_name, &args).await {
                GuardOutcome::Pass => {}
                GuardOutcome::Sanitized(sanitized) => args = sanitized,
                GuardOutcome::Rejected(reason) => {
                    return Err(AgentError::GuardRejected {
                        guard_name: guard.name().to_owned(),
                        phase: "input",
                        reason,
                    });
                }
            }
        }
        Ok(args)
    }

    /// Run output guards then processors over `output`.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::GuardRejected`] if any guard rejects.
    pub async fn validate_output(
        &self,
        ctx: &GuardContext,
        tool_name: &str,
        mut output: Value,
    ) -> Result<Value> {
        for guard in &self.output_guards {
            match guard.check(ctx, tool_name, &output).await {
                GuardOutcome::Pass => {}
                GuardOutcome::Sanitized(sanitized) => output = sanitized,
                GuardOutcome::Rejected(reason) => {
                    return Err(AgentError::GuardRejected {
                        guard_name: guard.name().to_owned(),
                        phase: "output",
                        reason,
                    });
                }
            }
        }
        for processor in &self.processors {
            output = processor.process(output);
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct RejectAll;

    #[async_trait]
    impl InputGuard for RejectAll {
        fn name(&self) -> &str {
            "reject-all"
        }

        async fn check(&self, _ctx: &GuardContext, _tool_name: &str, _args: &Value) -> GuardOutcome {
            GuardOutcome::Rejected("nope".to_owned())
        }
    }

    fn ctx() -> GuardContext {
        GuardContext {
            agent_name: "test-agent".to_owned(),
            iteration: 0,
        }
    }

    #[tokio::test]
    async fn validate_input_halts_on_rejection() {
        let chain = GuardChain::new().with_input_guard(Arc::new(RejectAll));
        let err = chain
            .validate_input(&ctx(), "search", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::GuardRejected { phase: "input", .. }));
    }

    #[tokio::test]
    async fn validate_output_passthrough_with_no_guards() {
        let chain = GuardChain::new();
        let out = chain
            .validate_output(&ctx(), "search", serde_json::json!({"x": 1}))
            .await
            .unwrap();
        assert_eq!(out, serde_json::json!({"x": 1}));
    }
}
