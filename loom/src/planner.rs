//! Planner: decomposes a task into an [`ExecutionPlan`] of dependent
//! [`Subtask`]s for the orchestrator to dispatch.
//!
//! # Invariants
//!
//! - I1: every subtask id in a plan is unique, and the dependency graph is
//!   acyclic.
//! - I2: a subtask is ready to dispatch iff all of its dependencies have
//!   succeeded.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::budget::Tier;
use crate::error::{AgentError, Result};
use crate::message::ChatMessage;
use crate::providers::common::{GenerateOptions, Model};

/// Status of a single subtask within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubtaskStatus {
    /// Not yet dispatched; waiting on dependencies or a free dispatch slot.
    Pending,
    /// Currently executing.
    Running,
    /// Completed successfully.
    Succeeded,
    /// Completed with an error.
    Failed,
}

/// A single unit of work within an [`ExecutionPlan`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Subtask {
    /// Unique id within the plan.
    pub id: String,
    /// Natural-language description of the work.
    pub description: String,
    /// Ids of subtasks that must succeed before this one may be dispatched.
    pub depends_on: Vec<String>,
    /// Current status.
    pub status: SubtaskStatus,
    /// Result produced by the subtask's execution, once complete.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Size tier this subtask is dispatched at. May be bumped by the
    /// orchestrator on escalation.
    pub tier: Tier,
    /// Id of the managed agent assigned to this subtask, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    /// Dispatch priority among otherwise-ready subtasks, 1 (lowest) to 10
    /// (highest).
    pub priority: u8,
    /// Planner's estimate of this subtask's difficulty, `0.0` to `1.0`.
    pub estimated_complexity: f32,
}

/// Default dispatch priority for a newly created subtask.
const DEFAULT_PRIORITY: u8 = 5;

impl Subtask {
    /// Create a new pending subtask at [`Tier::Small`] with default
    /// priority and complexity.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            depends_on: Vec::new(),
            status: SubtaskStatus::Pending,
            result: None,
            tier: Tier::Small,
            agent_id: None,
            priority: DEFAULT_PRIORITY,
            estimated_complexity: 0.0,
        }
    }

    /// Add dependencies.
    #[must_use]
    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Set the tier this subtask starts out dispatched at.
    #[must_use]
    pub fn with_tier(mut self, tier: Tier) -> Self {
        self.tier = tier;
        self
    }

    /// Assign a managed agent id.
    #[must_use]
    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Set the dispatch priority, clamped to `1..=10`.
    #[must_use]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.clamp(1, 10);
        self
    }

    /// Set the planner's complexity estimate.
    #[must_use]
    pub fn with_estimated_complexity(mut self, estimated_complexity: f32) -> Self {
        self.estimated_complexity = estimated_complexity;
        self
    }
}

/// A plan adaptation, produced when the orchestrator decides the original
/// plan needs to change mid-execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PlanRevision {
    /// Add a new subtask.
    Add(Subtask),
    /// Remove a subtask by id (only valid if it hasn't started).
    Remove(String),
    /// Replace a subtask's description and dependencies, keeping its id and
    /// status.
    Modify {
        /// Id of the subtask to modify.
        id: String,
        /// New description.
        description: String,
        /// New dependency list.
        depends_on: Vec<String>,
    },
    /// Reorder subtasks (does not affect dependency semantics, only the
    /// dispatch preference among otherwise-ready subtasks).
    Reorder(Vec<String>),
}

/// A decomposed, dependency-ordered plan for completing a task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ExecutionPlan {
    /// The subtasks, in creation order.
    pub subtasks: Vec<Subtask>,
    /// Planner's rough total cost estimate for the plan, in whatever unit
    /// the caller's cost model uses.
    pub estimated_cost: f64,
    /// Incremented every time [`Self::apply`] commits a revision.
    pub version: u32,
}

impl ExecutionPlan {
    /// Create an empty plan.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            subtasks: Vec::new(),
            estimated_cost: 0.0,
            version: 0,
        }
    }

    /// Create a plan from an already-decomposed subtask list.
    #[must_use]
    pub fn from_subtasks(subtasks: Vec<Subtask>) -> Self {
        Self {
            subtasks,
            ..Self::new()
        }
    }

    /// Validate invariant I1: unique ids and an acyclic dependency graph.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Planning`] if ids repeat, a dependency
    /// references an unknown id, or the graph contains a cycle.
    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for subtask in &self.subtasks {
            if !seen.insert(subtask.id.as_str()) {
                return Err(AgentError::Planning {
                    message: format!("duplicate subtask id '{}'", subtask.id),
                });
            }
        }
        for subtask in &self.subtasks {
            for dep in &subtask.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(AgentError::Planning {
                        message: format!(
                            "subtask '{}' depends on unknown subtask '{dep}'",
                            subtask.id
                        ),
                    });
                }
            }
        }
        self.detect_cycle()
    }

    fn detect_cycle(&self) -> Result<()> {
        #[derive(Clone, Copy, PartialEq, Eq)]
        enum Mark {
            Visiting,
            Done,
        }

        let by_id: HashMap<&str, &Subtask> =
            self.subtasks.iter().map(|s| (s.id.as_str(), s)).collect();
        let mut marks: HashMap<&str, Mark> = HashMap::new();

        fn visit<'a>(
            id: &'a str,
            by_id: &HashMap<&'a str, &'a Subtask>,
            marks: &mut HashMap<&'a str, Mark>,
        ) -> Result<()> {
            match marks.get(id) {
                Some(Mark::Done) => return Ok(()),
                Some(Mark::Visiting) => {
                    return Err(AgentError::Planning {
                        message: format!("dependency cycle detected at subtask '{id}'"),
                    });
                }
                None => {}
            }
            marks.insert(id, Mark::Visiting);
            if let Some(subtask) = by_id.get(id) {
                for dep in &subtask.depends_on {
                    visit(dep, by_id, marks)?;
                }
            }
            marks.insert(id, Mark::Done);
            Ok(())
        }

        for subtask in &self.subtasks {
            visit(&subtask.id, &by_id, &mut marks)?;
        }
        Ok(())
    }

    /// Subtasks ready to dispatch right now: pending, with every dependency
    /// already succeeded (invariant I2).
    #[must_use]
    pub fn ready(&self) -> Vec<&Subtask> {
        let succeeded: HashSet<&str> = self
            .subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Succeeded)
            .map(|s| s.id.as_str())
            .collect();

        self.subtasks
            .iter()
            .filter(|s| s.status == SubtaskStatus::Pending)
            .filter(|s| s.depends_on.iter().all(|d| succeeded.contains(d.as_str())))
            .collect()
    }

    /// Whether every subtask has reached a terminal status.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.subtasks
            .iter()
            .all(|s| matches!(s.status, SubtaskStatus::Succeeded | SubtaskStatus::Failed))
    }

    /// Whether any subtask failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.subtasks.iter().any(|s| s.status == SubtaskStatus::Failed)
    }

    /// Propagates failure from failed subtasks to any pending subtask that
    /// (transitively) depends on them, so the plan can still reach a
    /// terminal state instead of deadlocking on an unreachable subtask.
    pub fn cascade_failures(&mut self) {
        loop {
            let failed: HashSet<String> = self
                .subtasks
                .iter()
                .filter(|s| s.status == SubtaskStatus::Failed)
                .map(|s| s.id.clone())
                .collect();
            let mut changed = false;
            for subtask in &mut self.subtasks {
                if subtask.status == SubtaskStatus::Pending
                    && subtask.depends_on.iter().any(|d| failed.contains(d))
                {
                    subtask.status = SubtaskStatus::Failed;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    /// Mark a subtask as running.
    pub fn mark_running(&mut self, id: &str) {
        if let Some(subtask) = self.subtasks.iter_mut().find(|s| s.id == id) {
            subtask.status = SubtaskStatus::Running;
        }
    }

    /// Record a subtask's completion.
    pub fn mark_done(&mut self, id: &str, succeeded: bool, result: Option<Value>) {
        if let Some(subtask) = self.subtasks.iter_mut().find(|s| s.id == id) {
            subtask.status = if succeeded {
                SubtaskStatus::Succeeded
            } else {
                SubtaskStatus::Failed
            };
            subtask.result = result;
        }
    }

    /// Apply a plan adaptation atomically: the revision is tried against a
    /// scratch copy, which only replaces `self` if it both succeeds and
    /// leaves the plan satisfying I1/I2. On any failure `self` is
    /// untouched.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Planning`] if the revision would violate I1
    /// (e.g. adding a duplicate id, removing an in-flight subtask),
    /// references an unknown subtask, or the resulting plan fails
    /// [`ExecutionPlan::validate`].
    pub fn apply(&mut self, revision: PlanRevision) -> Result<()> {
        let mut scratch = self.clone();
        scratch.apply_unchecked(revision)?;
        scratch.validate()?;
        scratch.version += 1;
        *self = scratch;
        Ok(())
    }

    /// Apply a single revision in place with no rollback on failure.
    /// Callers needing atomicity should go through [`Self::apply`].
    fn apply_unchecked(&mut self, revision: PlanRevision) -> Result<()> {
        match revision {
            PlanRevision::Add(subtask) => {
                if self.subtasks.iter().any(|s| s.id == subtask.id) {
                    return Err(AgentError::Planning {
                        message: format!("cannot add duplicate subtask id '{}'", subtask.id),
                    });
                }
                self.subtasks.push(subtask);
            }
            PlanRevision::Remove(id) => {
                let Some(pos) = self.subtasks.iter().position(|s| s.id == id) else {
                    return Err(AgentError::Planning {
                        message: format!("cannot remove unknown subtask '{id}'"),
                    });
                };
                if self.subtasks[pos].status != SubtaskStatus::Pending {
                    return Err(AgentError::Planning {
                        message: format!("cannot remove subtask '{id}' that has already started"),
                    });
                }
                self.subtasks.remove(pos);
            }
            PlanRevision::Modify {
                id,
                description,
                depends_on,
            } => {
                let subtask = self
                    .subtasks
                    .iter_mut()
                    .find(|s| s.id == id)
                    .ok_or_else(|| AgentError::Planning {
                        message: format!("cannot modify unknown subtask '{id}'"),
                    })?;
                subtask.description = description;
                subtask.depends_on = depends_on;
            }
            PlanRevision::Reorder(order) => {
                let mut reordered = Vec::with_capacity(self.subtasks.len());
                for id in &order {
                    if let Some(pos) = self.subtasks.iter().position(|s| &s.id == id) {
                        reordered.push(self.subtasks.remove(pos));
                    }
                }
                reordered.extend(self.subtasks.drain(..));
                self.subtasks = reordered;
            }
        }
        Ok(())
    }
}

/// Produces an [`ExecutionPlan`] for a task by asking the model to
/// decompose it into dependent subtasks.
pub struct Planner;

impl Planner {
    /// Ask `model` to decompose `task` into an execution plan.
    ///
    /// # Errors
    ///
    /// Returns an error if the model call fails, its response isn't valid
    /// JSON, or the resulting plan fails [`ExecutionPlan::validate`].
    pub async fn plan(task: &str, model: &dyn Model) -> Result<ExecutionPlan> {
        let prompt = format!(
            "Decompose the following task into a JSON array of subtasks. Each subtask \
             must have \"id\", \"description\", and \"depends_on\" (array of ids, possibly \
             empty) fields, and may optionally include \"tier\" (one of \"small\", \
             \"medium\", \"large\"), \"agent_id\", \"priority\" (1-10), and \
             \"estimated_complexity\" (0.0-1.0). Respond with only the JSON array.\n\n\
             Task:\n{task}"
        );
        let response = model
            .generate(
                vec![ChatMessage::user(prompt)],
                GenerateOptions::new().with_temperature(0.0),
            )
            .await?;
        let text = response.text().unwrap_or_default();
        let raw: Vec<RawSubtask> = serde_json::from_str(text.trim()).map_err(|e| {
            AgentError::Planning {
                message: format!("planner response was not a valid subtask array: {e}"),
            }
        })?;

        let plan = ExecutionPlan::from_subtasks(
            raw.into_iter()
                .map(|r| {
                    let mut subtask = Subtask::new(r.id, r.description)
                        .depends_on(r.depends_on)
                        .with_priority(r.priority)
                        .with_estimated_complexity(r.estimated_complexity);
                    if let Some(tier) = r.tier {
                        subtask = subtask.with_tier(tier);
                    }
                    if let Some(agent_id) = r.agent_id {
                        subtask = subtask.with_agent_id(agent_id);
                    }
                    subtask
                })
                .collect(),
        );
        plan.validate()?;
        Ok(plan)
    }
}

fn default_priority() -> u8 {
    DEFAULT_PRIORITY
}

#[derive(Debug, Deserialize)]
struct RawSubtask {
    id: String,
    description: String,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    tier: Option<Tier>,
    #[serde(default)]
    agent_id: Option<String>,
    #[serde(default = "default_priority")]
    priority: u8,
    #[serde(default)]
    estimated_complexity: f32,
}
