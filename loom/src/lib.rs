#![cfg_attr(docsrs, feature(doc_cfg))]
//! loom is an adaptive orchestration engine and agent execution loop for
//! LLM-driven tasks: a task classifier picks a size tier, a planner breaks
//! large tasks into a dependency graph of subtasks, an orchestrator
//! dispatches that graph under a concurrency budget, and an agent runner
//! drives each subtask's iteration loop -- model call, guarded tool
//! dispatch, stop-condition evaluation -- under middleware and budget
//! control.

pub mod agent;
pub mod budget;
pub mod classifier;
pub mod context;
pub mod error;
pub mod guard;
pub mod history;
pub mod message;
pub mod middleware;
pub mod orchestrator;
pub mod planner;
pub mod providers;
pub mod stop;
pub mod tool;
pub mod usage;

pub mod prelude;

#[cfg(feature = "derive")]
#[cfg_attr(docsrs, doc(cfg(feature = "derive")))]
pub use loom_derive::tool;
