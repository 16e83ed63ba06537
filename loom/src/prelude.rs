//! Convenience re-exports for the common case: build a runner with a
//! model, some tools, guards, and middleware, then run it.
//!
//! ```rust,ignore
//! use loom::prelude::*;
//!
//! let runner = AgentRunner::new(model, "assistant", AgentConfig::new())
//!     .with_tools(tools)
//!     .with_guards(guards)
//!     .with_middleware(middleware);
//!
//! let mut memory = AgentMemory::new("You are a helpful assistant.");
//! let result = runner.run(&mut memory, RunOptions::new("summarize this repo")).await?;
//! ```

pub use crate::agent::{
    ActionStep, AgentConfig, AgentMemory, AgentOutcome, AgentRunner, HandoffRequest, LoopResult,
    MemoryStep, RunOptions,
};
pub use crate::budget::{BudgetExhausted, BudgetLimits, BudgetState, LoopDetector, Tier};
pub use crate::classifier::{
    Classification, ClassificationMethod, Confidence, HeuristicClassifier, TaskClassifier,
};
pub use crate::context::{ContextStrategy, FullHistoryStrategy, SummarizingStrategy};
pub use crate::error::{AgentError, FailureReport, Result, ToolError};
pub use crate::guard::{
    GuardChain, GuardContext, GuardOutcome, InputGuard, Normalizer, OutputGuard, Processor,
};
pub use crate::guard::builtins::{
    CompressProcessor, DedupeProcessor, PathSandbox, PromptInjectionScan, SecretRedaction,
    TruncateProcessor,
};
pub use crate::history::{HistoryEvent, HistoryRecorder, RecorderIndex, RetentionPolicy};
pub use crate::message::{ChatMessage, ChatMessageToolCall, MessageRole};
pub use crate::middleware::{
    ControlAction, FailPolicy, Middleware, MiddlewareContext, MiddlewarePipeline,
};
pub use crate::orchestrator::{
    CollectSynthesizer, CostBreakdown, FindingsSummary, NoopAdapter, Orchestrator,
    OrchestratorResult, PlanAdapter, SubtaskExecutor, SubtaskRun, SubtaskRunOutcome, Synthesizer,
};
pub use crate::planner::{ExecutionPlan, PlanRevision, Planner, Subtask, SubtaskStatus};
pub use crate::providers::common::{GenerateOptions, Model, ModelResponse, RetryConfig};
pub use crate::stop::{StopCheckInput, StopEvaluator, StopReason};
pub use crate::tool::manager::{
    AutoApproveHandler, ConfirmationHandler, ConflictPolicy, ToolConfirmationRequest,
    ToolConfirmationResponse, ToolManager, ToolPack, ToolPermissions,
};
pub use crate::tool::{
    BoxedTool, DynTool, Tool, ToolCallResult, ToolDefinition, ToolExecutionPolicy, ToolResult,
};
pub use crate::usage::{Usage, UsageTracker};
