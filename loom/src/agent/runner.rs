//! Execution loop: the per-agent iteration cycle that turns a task into a
//! result by repeatedly building context, calling the model, dispatching
//! any tool calls it requests, and evaluating whether to continue.
//!
//! Each iteration runs a fixed sequence:
//!
//! 1. `before_iteration` middleware hook.
//! 2. Build messages from the context strategy.
//! 3. `before_llm_call` hook, then invoke the model with the visible tool
//!    definitions.
//! 4. `after_llm_call` hook; record the assistant turn and token usage.
//! 5. Dispatch each tool call in order through the guard chain, recording
//!    `before_tool_exec`/`after_tool_exec` hooks around each one.
//! 6. Evaluate stop conditions.
//! 7. If the loop isn't stopping, advance to the next iteration.
//!
//! A stop condition other than [`StopReason::ReportComplete`] or
//! [`StopReason::NoToolCalls`] yields [`LoopResult::Escalate`]; callers that
//! classified the task into a [`Tier`] below [`Tier::Large`] may choose to
//! retry at a higher tier when they see one of these.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::agent::config::AgentConfig;
use crate::agent::memory::{ActionStep, AgentMemory, FinalAnswerStep, TaskStep, Timing, ToolCall};
use crate::agent::options::RunOptions;
use crate::agent::result::{AgentOutcome, HandoffRequest, LoopResult};
use crate::budget::{BudgetExhausted, BudgetState, Tier};
use crate::context::{ContextStrategy, FullHistoryStrategy};
use crate::error::{AgentError, FailureReport, Result};
use crate::guard::{GuardChain, GuardContext};
use crate::message::ChatMessageToolCall;
use crate::middleware::{ControlAction, MiddlewareContext, MiddlewarePipeline};
use crate::providers::common::{GenerateOptions, Model, RetryConfig};
use crate::stop::{StopCheckInput, StopEvaluator, StopReason};
use crate::tool::manager::{ToolManager, ToolPermissions};
use crate::tool::ToolDefinition;

/// Name of the synthetic tool injected when an output schema is declared.
/// Calling it ends the loop with that call's arguments as the final answer.
pub const SUBMIT_RESULT_TOOL: &str = "submit_result";

/// Name of the synthetic tool injected when handoff targets are configured.
/// Calling it ends the loop with a [`LoopResult::Handoff`] instead of a
/// normal stop-condition evaluation.
pub const HANDOFF_TOOL: &str = "handoff_to_agent";

/// Drives an agent's execution loop: owns the model, tool registry, guard
/// chain, middleware pipeline, and context strategy, and runs iterations
/// against an external [`AgentMemory`] until a stop condition fires.
pub struct AgentRunner {
    model: Arc<dyn Model>,
    agent_name: String,
    config: AgentConfig,
    tools: ToolManager,
    permissions: ToolPermissions,
    guards: GuardChain,
    middleware: MiddlewarePipeline,
    context_strategy: Arc<dyn ContextStrategy>,
    stop_evaluator: StopEvaluator,
    retry_config: RetryConfig,
    output_schema: Option<Value>,
    handoff_targets: Option<Vec<String>>,
    interrupt_flag: Arc<AtomicBool>,
}

impl AgentRunner {
    /// Create a runner for `model` under `agent_name`, with empty tools,
    /// guards, and middleware, full-history context, and the tier/step
    /// limits from `config`.
    #[must_use]
    pub fn new(model: Arc<dyn Model>, agent_name: impl Into<String>, config: AgentConfig) -> Self {
        Self {
            model,
            agent_name: agent_name.into(),
            config,
            tools: ToolManager::new(),
            permissions: ToolPermissions::default(),
            guards: GuardChain::new(),
            middleware: MiddlewarePipeline::new(),
            context_strategy: Arc::new(FullHistoryStrategy),
            stop_evaluator: StopEvaluator::new(),
            retry_config: RetryConfig::default(),
            output_schema: None,
            handoff_targets: None,
            interrupt_flag: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the tool registry.
    #[must_use]
    pub fn with_tools(mut self, tools: ToolManager) -> Self {
        self.tools = tools;
        self
    }

    /// Restrict which tools this agent can see and call.
    #[must_use]
    pub fn with_permissions(mut self, permissions: ToolPermissions) -> Self {
        self.permissions = permissions;
        self
    }

    /// Replace the guard chain applied around every tool call.
    #[must_use]
    pub fn with_guards(mut self, guards: GuardChain) -> Self {
        self.guards = guards;
        self
    }

    /// Replace the middleware pipeline.
    #[must_use]
    pub fn with_middleware(mut self, middleware: MiddlewarePipeline) -> Self {
        self.middleware = middleware;
        self
    }

    /// Replace the context strategy used to build messages each iteration.
    #[must_use]
    pub fn with_context_strategy(mut self, strategy: Arc<dyn ContextStrategy>) -> Self {
        self.context_strategy = strategy;
        self
    }

    /// Override the LLM call retry policy (default: 3 attempts, exponential
    /// backoff starting at 1s).
    #[must_use]
    pub const fn with_retry_config(mut self, retry_config: RetryConfig) -> Self {
        self.retry_config = retry_config;
        self
    }

    /// Declare a JSON schema for the final answer. When set, a synthetic
    /// `submit_result` tool is offered to the model and calling it is the
    /// only way the loop reaches [`StopReason::ReportComplete`].
    #[must_use]
    pub fn with_output_schema(mut self, schema: Value) -> Self {
        self.output_schema = Some(schema);
        self
    }

    /// Offer a `handoff_to_agent` tool naming these targets. Calling it ends
    /// the loop with [`LoopResult::Handoff`].
    #[must_use]
    pub fn with_handoff_targets(mut self, targets: Vec<String>) -> Self {
        self.handoff_targets = Some(targets);
        self
    }

    /// A handle the caller can use to request cancellation from outside the
    /// loop (e.g. a Ctrl-C handler or an orchestrator-level deadline).
    #[must_use]
    pub fn interrupt_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.interrupt_flag)
    }

    fn tool_definitions(&self) -> Vec<ToolDefinition> {
        let mut defs = self.tools.definitions(&self.permissions);
        if let Some(schema) = &self.output_schema {
            defs.push(ToolDefinition::new(
                SUBMIT_RESULT_TOOL,
                "Submit the final result for this task. Arguments must match the required output schema.",
                schema.clone(),
            ));
        }
        if let Some(targets) = &self.handoff_targets {
            defs.push(ToolDefinition::new(
                HANDOFF_TOOL,
                "Hand this task off to a more appropriate agent instead of answering it directly.",
                serde_json::json!({
                    "type": "object",
                    "properties": {
                        "target_agent": {"type": "string", "enum": targets},
                        "task": {"type": "string"},
                    },
                    "required": ["target_agent", "task"],
                }),
            ));
        }
        defs
    }

    /// Run `options.task` to completion against `memory`.
    ///
    /// # Errors
    ///
    /// Returns an error only for failures outside the loop's own recovery
    /// policy (e.g. a malformed handoff call); ordinary stop conditions are
    /// reported through [`LoopResult`], not as an `Err`.
    pub async fn run(&self, memory: &mut AgentMemory, options: RunOptions) -> Result<LoopResult> {
        if options.reset {
            memory.reset();
        }
        memory.add_step(TaskStep {
            task: options.task.clone(),
        });

        let (tier, mut limits) = self
            .config
            .tier
            .unwrap_or_else(|| (Tier::Small, Tier::Small.default_limits()));
        if self.config.tier.is_none() {
            limits.max_iterations = self.config.max_steps;
        }
        let max_iterations = limits.max_iterations;
        let mut budget = BudgetState::with_limits(tier, limits);
        let mut timing = Timing::start_now();

        let start_ctx = MiddlewareContext {
            agent_name: self.agent_name.clone(),
            iteration: 0,
        };
        if let ControlAction::Abort(reason) = self.middleware.on_start(&start_ctx).await? {
            return Ok(self.escalate(&start_ctx, FailureReport::PolicyDenied(reason)).await);
        }

        loop {
            let iteration = budget.iterations();
            let mw_ctx = MiddlewareContext {
                agent_name: self.agent_name.clone(),
                iteration,
            };
            let guard_ctx = GuardContext {
                agent_name: self.agent_name.clone(),
                iteration,
            };

            if self.interrupt_flag.load(Ordering::SeqCst) {
                return Ok(self
                    .escalate(&mw_ctx, AgentError::Interrupted.into_failure_report())
                    .await);
            }
            if let ControlAction::Abort(reason) = self.middleware.before_iteration(&mw_ctx).await? {
                return Ok(self.escalate(&mw_ctx, FailureReport::PolicyDenied(reason)).await);
            }

            budget.record_iteration();

            let messages = self.context_strategy.build(memory).await;
            if let ControlAction::Abort(reason) =
                self.middleware.before_llm_call(&mw_ctx, &messages).await?
            {
                return Ok(self.escalate(&mw_ctx, FailureReport::PolicyDenied(reason)).await);
            }

            let response = match self.generate_with_retry(&messages).await {
                Ok(response) => response,
                Err(err) => return Ok(self.escalate(&mw_ctx, err.into_failure_report()).await),
            };
            if let ControlAction::Abort(reason) = self
                .middleware
                .after_llm_call(&mw_ctx, &response.message)
                .await?
            {
                return Ok(self.escalate(&mw_ctx, FailureReport::PolicyDenied(reason)).await);
            }
            if let Some(usage) = response.usage {
                budget.record_usage(usage);
            }

            let mut action_step = ActionStep {
                step_number: iteration,
                timing: Timing::start_now(),
                model_input_messages: Some(messages),
                model_output: response.text(),
                model_output_message: Some(response.message.clone()),
                token_usage: response.usage,
                ..Default::default()
            };

            let tool_calls = response.message.tool_calls.clone().unwrap_or_default();
            let mut recorded_calls = Vec::new();
            let mut loop_stuck = None;
            let mut reported_complete = false;
            let mut final_output = Value::Null;

            for call in &tool_calls {
                if call.name() == HANDOFF_TOOL && self.handoff_targets.is_some() {
                    let request = self.parse_handoff(call)?;
                    self.middleware.on_stop(&mw_ctx, "handoff").await;
                    return Ok(LoopResult::Handoff(request));
                }

                if let Some(stuck) = budget.record_tool_call(call.name(), call.arguments()) {
                    loop_stuck = Some(stuck);
                }
                if let ControlAction::Abort(reason) = self
                    .middleware
                    .before_tool_exec(&mw_ctx, call.name(), call.arguments())
                    .await?
                {
                    return Ok(self.escalate(&mw_ctx, FailureReport::PolicyDenied(reason)).await);
                }

                if call.name() == SUBMIT_RESULT_TOOL && self.output_schema.is_some() {
                    match self
                        .guards
                        .validate_output(&guard_ctx, SUBMIT_RESULT_TOOL, call.arguments().clone())
                        .await
                    {
                        Ok(sanitized) => {
                            reported_complete = true;
                            final_output = sanitized;
                        }
                        Err(err) => {
                            return Ok(self.escalate(&mw_ctx, err.into_failure_report()).await);
                        }
                    }
                    recorded_calls.push(ToolCall::new(
                        call.id.clone(),
                        call.name().to_owned(),
                        call.arguments().clone(),
                    ));
                    break;
                }

                let outcome = self.execute_tool_call(&guard_ctx, call).await;
                if let ControlAction::Abort(reason) = self
                    .middleware
                    .after_tool_exec(
                        &mw_ctx,
                        call.name(),
                        outcome.as_ref().unwrap_or(&Value::Null),
                    )
                    .await?
                {
                    return Ok(self.escalate(&mw_ctx, FailureReport::PolicyDenied(reason)).await);
                }

                recorded_calls.push(ToolCall::new(
                    call.id.clone(),
                    call.name().to_owned(),
                    call.arguments().clone(),
                ));
                match outcome {
                    Ok(value) => {
                        let rendered = value.to_string();
                        action_step.observations = Some(match action_step.observations.take() {
                            Some(existing) => format!("{existing}\n{rendered}"),
                            None => rendered,
                        });
                    }
                    Err(err) => action_step.error = Some(err.to_string()),
                }
            }

            budget.record_progress(action_step.observations.as_deref().map_or(0, str::len));

            action_step.tool_calls = (!recorded_calls.is_empty()).then_some(recorded_calls);
            if reported_complete {
                action_step.action_output = Some(final_output.clone());
                action_step.is_final_answer = true;
            }
            action_step.timing.complete();
            memory.add_step(action_step);

            let stop_input = StopCheckInput {
                aborted: self.interrupt_flag.load(Ordering::SeqCst),
                reported_complete,
                had_tool_calls: !tool_calls.is_empty(),
                loop_detected: loop_stuck.is_some(),
            };

            let Some(stop_reason) = self.stop_evaluator.evaluate(&mut budget, stop_input) else {
                continue;
            };

            self.middleware
                .on_stop(&mw_ctx, &format!("{stop_reason:?}"))
                .await;

            return Ok(match stop_reason {
                StopReason::ReportComplete => {
                    memory.add_step(FinalAnswerStep {
                        output: final_output.clone(),
                    });
                    timing.complete();
                    LoopResult::Complete(AgentOutcome {
                        output: final_output,
                        usage: budget.total_usage(),
                        iterations: budget.iterations(),
                        timing,
                    })
                }
                StopReason::NoToolCalls => {
                    let output = response.text().map_or(Value::Null, Value::String);
                    memory.add_step(FinalAnswerStep {
                        output: output.clone(),
                    });
                    timing.complete();
                    LoopResult::Complete(AgentOutcome {
                        output,
                        usage: budget.total_usage(),
                        iterations: budget.iterations(),
                        timing,
                    })
                }
                StopReason::AbortSignal => {
                    LoopResult::Escalate(AgentError::Interrupted.into_failure_report())
                }
                StopReason::HardBudget => LoopResult::Escalate(FailureReport::PolicyDenied(
                    self.budget_failure_message(&budget),
                )),
                StopReason::MaxIterations => LoopResult::Escalate(
                    AgentError::max_iterations(budget.iterations(), max_iterations)
                        .into_failure_report(),
                ),
                StopReason::LoopDetected => LoopResult::Escalate(FailureReport::Stuck(
                    loop_stuck.unwrap_or_else(|| "loop detector tripped".to_owned()),
                )),
            });
        }
    }

    async fn escalate(&self, ctx: &MiddlewareContext, report: FailureReport) -> LoopResult {
        self.middleware.on_stop(ctx, &report.to_string()).await;
        LoopResult::Escalate(report)
    }

    fn budget_failure_message(&self, budget: &BudgetState) -> String {
        match budget.exhausted() {
            Some(BudgetExhausted::Tokens) => {
                format!("token budget exhausted after {} iterations", budget.iterations())
            }
            Some(BudgetExhausted::WallClock) => {
                format!("wall-clock budget exhausted after {:?}", budget.elapsed())
            }
            Some(BudgetExhausted::Iterations) | None => {
                format!("iteration budget exhausted after {} iterations", budget.iterations())
            }
        }
    }

    fn parse_handoff(&self, call: &ChatMessageToolCall) -> Result<HandoffRequest> {
        let args = call.arguments();
        let target_agent = args
            .get("target_agent")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::parsing(call.arguments_string(), "missing target_agent"))?
            .to_owned();
        let task = args
            .get("task")
            .and_then(Value::as_str)
            .ok_or_else(|| AgentError::parsing(call.arguments_string(), "missing task"))?
            .to_owned();
        Ok(HandoffRequest {
            target_agent,
            task,
            context: args.clone(),
        })
    }

    async fn execute_tool_call(
        &self,
        guard_ctx: &GuardContext,
        call: &ChatMessageToolCall,
    ) -> Result<Value> {
        let args = self
            .guards
            .validate_input(guard_ctx, call.name(), call.arguments().clone())
            .await?;

        let mut attempts = 0;
        let raw = loop {
            attempts += 1;
            match self.tools.call(call.name(), args.clone(), &self.permissions).await {
                Ok(value) => break Ok(value),
                Err(err) if attempts < 2 => continue,
                Err(err) => break Err(AgentError::Tool(err)),
            }
        }?;

        self.guards.validate_output(guard_ctx, call.name(), raw).await
    }

    async fn generate_with_retry(
        &self,
        messages: &[crate::message::ChatMessage],
    ) -> Result<crate::providers::common::ModelResponse> {
        let options = GenerateOptions::new().with_tools(self.tool_definitions());
        let mut delay = Duration::from_millis(self.retry_config.initial_delay_ms);
        let mut last_err = None;

        for attempt in 0..self.retry_config.max_attempts.max(1) {
            match self.model.generate(messages.to_vec(), options.clone()).await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    tracing::warn!(
                        agent = self.agent_name,
                        attempt,
                        error = %err,
                        "model call failed"
                    );
                    last_err = Some(err);
                    if attempt + 1 < self.retry_config.max_attempts {
                        let sleep_for = if self.retry_config.jitter {
                            delay + Duration::from_millis(fastrand::u64(0..=delay.as_millis() as u64 / 2 + 1))
                        } else {
                            delay
                        };
                        tokio::time::sleep(sleep_for).await;
                        delay = delay.mul_f64(self.retry_config.backoff_multiplier);
                    }
                }
            }
        }

        Err(last_err.unwrap_or_else(|| AgentError::model("model call failed with no recorded error")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ToolError;
    use crate::message::{ChatMessage, ChatMessageToolCall};
    use crate::providers::common::ModelResponse;
    use crate::providers::mock::MockModel;
    use crate::tool::manager::ConflictPolicy;
    use crate::tool::{Tool, ToolPack};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};

    struct EchoTool;

    #[async_trait::async_trait]
    impl Tool for EchoTool {
        const NAME: &'static str = "echo";
        type Args = Value;
        type Output = Value;
        type Error = ToolError;

        fn description(&self) -> String {
            "echoes its input".to_owned()
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output> {
            Ok(args)
        }
    }

    /// Returns one tool call, then a plain text answer, then nothing.
    struct ScriptedModel {
        step: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl Model for ScriptedModel {
        fn model_id(&self) -> &str {
            "scripted"
        }

        async fn generate(
            &self,
            _messages: Vec<ChatMessage>,
            _options: GenerateOptions,
        ) -> Result<ModelResponse> {
            let step = self.step.fetch_add(1, AtomicOrdering::SeqCst);
            Ok(match step {
                0 => ModelResponse::new(ChatMessage::assistant_with_tool_calls(vec![
                    ChatMessageToolCall::new("call-1", "echo", serde_json::json!({"x": 1})),
                ])),
                _ => ModelResponse::new(ChatMessage::assistant("all done")),
            })
        }
    }

    fn runner_with_echo_tool(model: Arc<dyn Model>) -> AgentRunner {
        let mut tools = ToolManager::new();
        tools
            .register_pack(ToolPack::new("test").with_tool(Box::new(EchoTool)), ConflictPolicy::Error)
            .unwrap();
        AgentRunner::new(model, "test-agent", AgentConfig::new().with_tier(Tier::Small))
            .with_tools(tools)
    }

    #[tokio::test]
    async fn stops_with_no_tool_calls_as_completion() {
        let runner =
            AgentRunner::new(Arc::new(MockModel::new(vec!["hi there".to_owned()])), "a", AgentConfig::new());
        let mut memory = AgentMemory::new("you are a test agent");
        let result = runner.run(&mut memory, RunOptions::new("say hi")).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(result.output(), Some(&Value::String("hi there".to_owned())));
    }

    #[tokio::test]
    async fn dispatches_tool_call_then_completes() {
        let runner = runner_with_echo_tool(Arc::new(ScriptedModel {
            step: AtomicUsize::new(0),
        }));
        let mut memory = AgentMemory::new("you are a test agent");
        let result = runner.run(&mut memory, RunOptions::new("do a thing")).await.unwrap();
        assert!(result.is_complete());
        assert_eq!(memory.steps.len(), 4); // task, action w/ tool call, action w/ completion, final answer
    }

    #[tokio::test]
    async fn submit_result_tool_yields_schema_bound_output() {
        struct SubmitModel;
        #[async_trait::async_trait]
        impl Model for SubmitModel {
            fn model_id(&self) -> &str {
                "submit"
            }
            async fn generate(
                &self,
                _messages: Vec<ChatMessage>,
                _options: GenerateOptions,
            ) -> Result<ModelResponse> {
                Ok(ModelResponse::new(ChatMessage::assistant_with_tool_calls(vec![
                    ChatMessageToolCall::new(
                        "call-1",
                        SUBMIT_RESULT_TOOL,
                        serde_json::json!({"answer": 42}),
                    ),
                ])))
            }
        }

        let runner = AgentRunner::new(Arc::new(SubmitModel), "a", AgentConfig::new())
            .with_output_schema(serde_json::json!({"type": "object"}));
        let mut memory = AgentMemory::new("you are a test agent");
        let result = runner
            .run(&mut memory, RunOptions::new("produce structured output"))
            .await
            .unwrap();
        assert_eq!(result.output(), Some(&serde_json::json!({"answer": 42})));
    }

    #[tokio::test]
    async fn handoff_tool_yields_handoff_result() {
        struct HandoffModel;
        #[async_trait::async_trait]
        impl Model for HandoffModel {
            fn model_id(&self) -> &str {
                "handoff"
            }
            async fn generate(
                &self,
                _messages: Vec<ChatMessage>,
                _options: GenerateOptions,
            ) -> Result<ModelResponse> {
                Ok(ModelResponse::new(ChatMessage::assistant_with_tool_calls(vec![
                    ChatMessageToolCall::new(
                        "call-1",
                        HANDOFF_TOOL,
                        serde_json::json!({"target_agent": "billing", "task": "refund"}),
                    ),
                ])))
            }
        }

        let runner = AgentRunner::new(Arc::new(HandoffModel), "a", AgentConfig::new())
            .with_handoff_targets(vec!["billing".to_owned()]);
        let mut memory = AgentMemory::new("you are a test agent");
        let result = runner.run(&mut memory, RunOptions::new("help a customer")).await.unwrap();
        match result {
            LoopResult::Handoff(request) => assert_eq!(request.target_agent, "billing"),
            other => panic!("expected handoff, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn max_iterations_escalates() {
        let runner = AgentRunner::new(
            Arc::new(ScriptedLoopingModel),
            "a",
            AgentConfig::new().with_tier_limits(
                Tier::Small,
                crate::budget::BudgetLimits {
                    max_iterations: 2,
                    max_tokens: 1_000_000,
                    max_wall_clock: Duration::from_secs(60),
                },
            ),
        )
        .with_tools({
            let mut tools = ToolManager::new();
            tools
                .register_pack(ToolPack::new("test").with_tool(Box::new(EchoTool)), ConflictPolicy::Error)
                .unwrap();
            tools
        });
        let mut memory = AgentMemory::new("you are a test agent");
        let result = runner.run(&mut memory, RunOptions::new("loop forever")).await.unwrap();
        assert!(matches!(result, LoopResult::Escalate(FailureReport::Timeout { .. })));
    }

    struct ScriptedLoopingModel;

    #[async_trait::async_trait]
    impl Model for ScriptedLoopingModel {
        fn model_id(&self) -> &str {
            "looping"
        }

        async fn generate(
            &self,
            _messages: Vec<ChatMessage>,
            _options: GenerateOptions,
        ) -> Result<ModelResponse> {
            Ok(ModelResponse::new(ChatMessage::assistant_with_tool_calls(vec![
                ChatMessageToolCall::new("call-1", "echo", serde_json::json!({"x": 1})),
            ])))
        }
    }
}
