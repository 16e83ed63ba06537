//! Built-in middleware: structured logging and basic call counters.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;
use crate::message::ChatMessage;

use super::{ControlAction, Middleware, MiddlewareContext};

/// Logs every hook invocation at `debug` level via `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

#[async_trait]
impl Middleware for LoggingMiddleware {
    fn name(&self) -> &str {
        "logging"
    }

    async fn on_start(&self, ctx: &MiddlewareContext) -> Result<ControlAction> {
        tracing::debug!(agent = %ctx.agent_name, "run started");
        Ok(ControlAction::Continue)
    }

    async fn before_iteration(&self, ctx: &MiddlewareContext) -> Result<ControlAction> {
        tracing::debug!(agent = %ctx.agent_name, iteration = ctx.iteration, "iteration started");
        Ok(ControlAction::Continue)
    }

    async fn before_llm_call(
        &self,
        ctx: &MiddlewareContext,
        messages: &[ChatMessage],
    ) -> Result<ControlAction> {
        tracing::debug!(
            agent = %ctx.agent_name,
            iteration = ctx.iteration,
            message_count = messages.len(),
            "calling model"
        );
        Ok(ControlAction::Continue)
    }

    async fn before_tool_exec(
        &self,
        ctx: &MiddlewareContext,
        tool_name: &str,
        _args: &Value,
    ) -> Result<ControlAction> {
        tracing::debug!(agent = %ctx.agent_name, tool = tool_name, "calling tool");
        Ok(ControlAction::Continue)
    }

    async fn after_tool_exec(
        &self,
        ctx: &MiddlewareContext,
        tool_name: &str,
        _result: &Value,
    ) -> Result<ControlAction> {
        tracing::debug!(agent = %ctx.agent_name, tool = tool_name, "tool returned");
        Ok(ControlAction::Continue)
    }

    async fn on_stop(&self, ctx: &MiddlewareContext, reason: &str) -> Result<()> {
        tracing::info!(agent = %ctx.agent_name, reason, "run stopped");
        Ok(())
    }
}

/// Counts iterations and tool calls for a run. Intended to feed an
/// embedding application's own metrics exporter; this middleware itself
/// holds the counters in memory and doesn't emit anywhere.
#[derive(Debug, Default)]
pub struct MetricsMiddleware {
    iterations: AtomicU64,
    tool_calls: AtomicU64,
}

impl MetricsMiddleware {
    /// Create a fresh counter set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of iterations observed so far.
    #[must_use]
    pub fn iteration_count(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    /// Number of tool calls observed so far.
    #[must_use]
    pub fn tool_call_count(&self) -> u64 {
        self.tool_calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Middleware for MetricsMiddleware {
    fn name(&self) -> &str {
        "metrics"
    }

    async fn before_iteration(&self, _ctx: &MiddlewareContext) -> Result<ControlAction> {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        Ok(ControlAction::Continue)
    }

    async fn before_tool_exec(
        &self,
        _ctx: &MiddlewareContext,
        _tool_name: &str,
        _args: &Value,
    ) -> Result<ControlAction> {
        self.tool_calls.fetch_add(1, Ordering::Relaxed);
        Ok(ControlAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> MiddlewareContext {
        MiddlewareContext {
            agent_name: "test-agent".to_owned(),
            iteration: 0,
        }
    }

    #[tokio::test]
    async fn metrics_middleware_counts_iterations_and_tool_calls() {
        let metrics = MetricsMiddleware::new();
        metrics.before_iteration(&ctx()).await.unwrap();
        metrics.before_iteration(&ctx()).await.unwrap();
        metrics
            .before_tool_exec(&ctx(), "search", &Value::Null)
            .await
            .unwrap();
        assert_eq!(metrics.iteration_count(), 2);
        assert_eq!(metrics.tool_call_count(), 1);
    }

    #[tokio::test]
    async fn logging_middleware_never_aborts() {
        let logging = LoggingMiddleware;
        let action = logging.before_iteration(&ctx()).await.unwrap();
        assert_eq!(action, ControlAction::Continue);
    }
}
