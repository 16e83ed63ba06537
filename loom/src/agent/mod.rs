//! Agent execution: the memory model, run options/results, and the
//! iteration loop that drives a model through tool calls to a final answer.
//!
//! [`AgentRunner`] is the entry point: configure it with a [`Model`], a
//! [`ToolManager`](crate::tool::manager::ToolManager), a
//! [`GuardChain`](crate::guard::GuardChain), and a
//! [`MiddlewarePipeline`](crate::middleware::MiddlewarePipeline), then call
//! [`AgentRunner::run`] with a [`RunOptions`] against an [`AgentMemory`].

mod config;
mod memory;
mod options;
mod result;
mod runner;

pub use config::AgentConfig;
pub use memory::{
    ActionStep, AgentMemory, FinalAnswerStep, MemoryStep, PlanningStep, SystemPromptStep,
    TaskStep, Timing, ToolCall,
};
pub use options::RunOptions;
pub use result::{AgentOutcome, HandoffRequest, LoopResult};
pub use runner::{AgentRunner, HANDOFF_TOOL, SUBMIT_RESULT_TOOL};
