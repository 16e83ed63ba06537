//! Middleware pipeline: ordered hooks fired around the execution loop.
//!
//! Each registered [`Middleware`] may observe or veto at seven points:
//! `on_start`, `before_iteration`, `before_llm_call`, `after_llm_call`,
//! `before_tool_exec`, `after_tool_exec`, `on_stop`. A hook can request the
//! loop abort by returning [`ControlAction::Abort`]. Each registration
//! carries a [`FailPolicy`] governing what happens when the hook itself
//! errors or times out, and an optional timeout.

pub mod builtins;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{AgentError, Result};
use crate::message::ChatMessage;

/// Context passed to every middleware hook.
#[derive(Debug, Clone)]
pub struct MiddlewareContext {
    /// Name of the agent being run.
    pub agent_name: String,
    /// Current iteration number (0-based).
    pub iteration: usize,
}

/// What the loop should do after a hook runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlAction {
    /// Proceed normally.
    Continue,
    /// Abort the run with the given reason.
    Abort(String),
}

impl ControlAction {
    /// Returns `true` if this action requests an abort.
    #[must_use]
    pub const fn is_abort(&self) -> bool {
        matches!(self, Self::Abort(_))
    }
}

/// What happens when a middleware hook errors or times out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailPolicy {
    /// Treat the failure as [`ControlAction::Continue`]; log and move on.
    #[default]
    FailOpen,
    /// Treat the failure as [`ControlAction::Abort`].
    FailClosed,
}

/// A pluggable observer/interceptor of the execution loop. All methods have
/// no-op default implementations; implementors override only the hooks they
/// care about.
#[async_trait]
pub trait Middleware: Send + Sync {
    /// Name of this middleware, used in tracing and abort messages.
    fn name(&self) -> &str;

    /// Called once before the first iteration.
    async fn on_start(&self, _ctx: &MiddlewareContext) -> Result<ControlAction> {
        Ok(ControlAction::Continue)
    }

    /// Called at the top of every iteration.
    async fn before_iteration(&self, _ctx: &MiddlewareContext) -> Result<ControlAction> {
        Ok(ControlAction::Continue)
    }

    /// Called immediately before the model is invoked.
    async fn before_llm_call(
        &self,
        _ctx: &MiddlewareContext,
        _messages: &[ChatMessage],
    ) -> Result<ControlAction> {
        Ok(ControlAction::Continue)
    }

    /// Called after the model responds.
    async fn after_llm_call(
        &self,
        _ctx: &MiddlewareContext,
        _response: &ChatMessage,
    ) -> Result<ControlAction> {
        Ok(ControlAction::Continue)
    }

    /// Called immediately before a tool is invoked.
    async fn before_tool_exec(
        &self,
        _ctx: &MiddlewareContext,
        _tool_name: &str,
        _args: &Value,
    ) -> Result<ControlAction> {
        Ok(ControlAction::Continue)
    }

    /// Called after a tool returns.
    async fn after_tool_exec(
        &self,
        _ctx: &MiddlewareContext,
        _tool_name: &str,
        _result: &Value,
    ) -> Result<ControlAction> {
        Ok(ControlAction::Continue)
    }

    /// Called once the loop has decided to stop, before the final result is
    /// returned.
    async fn on_stop(&self, _ctx: &MiddlewareContext, _reason: &str) -> Result<()> {
        Ok(())
    }
}

struct Registration {
    middleware: Arc<dyn Middleware>,
    fail_policy: FailPolicy,
    timeout: Option<Duration>,
}

/// An ordered collection of middleware, invoked in registration order at
/// every hook point.
#[derive(Default)]
pub struct MiddlewarePipeline {
    registrations: Vec<Registration>,
}

impl fmt::Debug for MiddlewarePipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewarePipeline")
            .field(
                "middleware",
                &self
                    .registrations
                    .iter()
                    .map(|r| r.middleware.name())
                    .collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl MiddlewarePipeline {
    /// Create an empty pipeline.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `middleware` with `fail_policy` and an optional `timeout`.
    #[must_use]
    pub fn with_middleware(
        mut self,
        middleware: Arc<dyn Middleware>,
        fail_policy: FailPolicy,
        timeout: Option<Duration>,
    ) -> Self {
        self.registrations.push(Registration {
            middleware,
            fail_policy,
            timeout,
        });
        self
    }

    async fn run_hook<'a, F, Fut>(&'a self, hook_name: &str, call: F) -> Result<ControlAction>
    where
        F: Fn(&'a Arc<dyn Middleware>) -> Fut,
        Fut: std::future::Future<Output = Result<ControlAction>>,
    {
        for reg in &self.registrations {
            let outcome = match reg.timeout {
                Some(duration) => tokio::time::timeout(duration, call(&reg.middleware))
                    .await
                    .map_err(|_| {
                        AgentError::MiddlewareFailed {
                            hook_name: hook_name.to_owned(),
                            message: format!(
                                "middleware '{}' timed out after {duration:?}",
                                reg.middleware.name()
                            ),
                        }
                    })
                    .and_then(|r| r),
                None => call(&reg.middleware).await,
            };

            match outcome {
                Ok(action @ ControlAction::Abort(_)) => return Ok(action),
                Ok(ControlAction::Continue) => {}
                Err(err) => match reg.fail_policy {
                    FailPolicy::FailOpen => {
                        tracing::warn!(
                            middleware = reg.middleware.name(),
                            hook = hook_name,
                            error = %err,
                            "middleware hook failed open"
                        );
                    }
                    FailPolicy::FailClosed => {
                        return Ok(ControlAction::Abort(format!(
                            "middleware '{}' failed at {hook_name}: {err}",
                            reg.middleware.name()
                        )));
                    }
                },
            }
        }
        Ok(ControlAction::Continue)
    }

    /// Run the `on_start` hook across all registered middleware.
    pub async fn on_start(&self, ctx: &MiddlewareContext) -> Result<ControlAction> {
        self.run_hook("on_start", |m| m.on_start(ctx)).await
    }

    /// Run the `before_iteration` hook across all registered middleware.
    pub async fn before_iteration(&self, ctx: &MiddlewareContext) -> Result<ControlAction> {
        self.run_hook("before_iteration", |m| m.before_iteration(ctx))
            .await
    }

    /// Run the `before_llm_call` hook across all registered middleware.
    pub async fn before_llm_call(
        &self,
        ctx: &MiddlewareContext,
        messages: &[ChatMessage],
    ) -> Result<ControlAction> {
        self.run_hook("before_llm_call", |m| m.before_llm_call(ctx, messages))
            .await
    }

    /// Run the `after_llm_call` hook across all registered middleware.
    pub async fn after_llm_call(
        &self,
        ctx: &MiddlewareContext,
        response: &ChatMessage,
    ) -> Result<ControlAction> {
        self.run_hook("after_llm_call", |m| m.after_llm_call(ctx, response))
            .await
    }

    /// Run the `before_tool_exec` hook across all registered middleware.
    pub async fn before_tool_exec(
        &self,
        ctx: &MiddlewareContext,
        tool_name: &str,
        args: &Value,
    ) -> Result<ControlAction> {
        self.run_hook("before_tool_exec", |m| m.before_tool_exec(ctx, tool_name, args))
            .await
    }

    /// Run the `after_tool_exec` hook across all registered middleware.
    pub async fn after_tool_exec(
        &self,
        ctx: &MiddlewareContext,
        tool_name: &str,
        result: &Value,
    ) -> Result<ControlAction> {
        self.run_hook("after_tool_exec", |m| m.after_tool_exec(ctx, tool_name, result))
            .await
    }

    /// Run the `on_stop` hook across all registered middleware. Failures are
    /// always logged and never abort, since the loop has already decided to
    /// stop.
    pub async fn on_stop(&self, ctx: &MiddlewareContext, reason: &str) {
        for reg in &self.registrations {
            if let Err(err) = reg.middleware.on_stop(ctx, reason).await {
                tracing::warn!(
                    middleware = reg.middleware.name(),
                    error = %err,
                    "on_stop hook failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn ctx() -> MiddlewareContext {
        MiddlewareContext {
            agent_name: "test-agent".to_owned(),
            iteration: 0,
        }
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl Middleware for Counter {
        fn name(&self) -> &str {
            "counter"
        }

        async fn before_iteration(&self, _ctx: &MiddlewareContext) -> Result<ControlAction> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(ControlAction::Continue)
        }
    }

    struct AlwaysAbort;

    #[async_trait]
    impl Middleware for AlwaysAbort {
        fn name(&self) -> &str {
            "always-abort"
        }

        async fn before_iteration(&self, _ctx: &MiddlewareContext) -> Result<ControlAction> {
            Ok(ControlAction::Abort("nope".to_owned()))
        }
    }

    struct AlwaysErrors;

    #[async_trait]
    impl Middleware for AlwaysErrors {
        fn name(&self) -> &str {
            "always-errors"
        }

        async fn before_iteration(&self, _ctx: &MiddlewareContext) -> Result<ControlAction> {
            Err(AgentError::internal("boom"))
        }
    }

    #[tokio::test]
    async fn runs_all_middleware_in_order() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let pipeline = MiddlewarePipeline::new().with_middleware(
            counter.clone(),
            FailPolicy::FailOpen,
            None,
        );
        pipeline.before_iteration(&ctx()).await.unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_short_circuits_remaining_middleware() {
        let counter = Arc::new(Counter(AtomicUsize::new(0)));
        let pipeline = MiddlewarePipeline::new()
            .with_middleware(Arc::new(AlwaysAbort), FailPolicy::FailOpen, None)
            .with_middleware(counter.clone(), FailPolicy::FailOpen, None);
        let action = pipeline.before_iteration(&ctx()).await.unwrap();
        assert!(action.is_abort());
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn fail_open_continues_past_errors() {
        let pipeline =
            MiddlewarePipeline::new().with_middleware(Arc::new(AlwaysErrors), FailPolicy::FailOpen, None);
        let action = pipeline.before_iteration(&ctx()).await.unwrap();
        assert_eq!(action, ControlAction::Continue);
    }

    #[tokio::test]
    async fn fail_closed_aborts_on_error() {
        let pipeline = MiddlewarePipeline::new().with_middleware(
            Arc::new(AlwaysErrors),
            FailPolicy::FailClosed,
            None,
        );
        let action = pipeline.before_iteration(&ctx()).await.unwrap();
        assert!(action.is_abort());
    }
}
