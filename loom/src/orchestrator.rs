//! Adaptive orchestrator: dispatches an [`ExecutionPlan`]'s subtasks under a
//! concurrency budget, folds their findings back into the plan between
//! rounds, and synthesizes a final result once every subtask is terminal.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Semaphore;

use crate::budget::Tier;
use crate::error::{AgentError, Result};
use crate::planner::{ExecutionPlan, PlanRevision, Subtask};
use crate::usage::Usage;

/// Outcome of a single subtask attempt at a given tier.
#[derive(Debug, Clone)]
pub enum SubtaskRunOutcome {
    /// The subtask completed with a final result.
    Done(Value),
    /// The attempt stalled (loop detected, validation failed, budget
    /// exhausted) and should be retried at the next tier up, if any.
    Escalate(String),
}

/// What a single [`SubtaskExecutor::execute`] call produced: the outcome,
/// which tier it actually ran at, and what that attempt cost.
#[derive(Debug, Clone)]
pub struct SubtaskRun {
    /// The attempt's outcome.
    pub outcome: SubtaskRunOutcome,
    /// Tier the attempt ran at.
    pub tier: Tier,
    /// Token usage consumed by the attempt.
    pub usage: Usage,
}

/// Executes a single subtask at its current tier, reporting back what it
/// cost and whether it finished or needs to escalate.
#[async_trait]
pub trait SubtaskExecutor: Send + Sync {
    /// Run `subtask` to completion or escalation at its current tier.
    ///
    /// # Errors
    ///
    /// Returns an error if the subtask's execution fails outright (not to
    /// be confused with [`SubtaskRunOutcome::Escalate`], which is a
    /// recoverable retry signal, not an error).
    async fn execute(&self, subtask: &Subtask) -> Result<SubtaskRun>;
}

/// Per-tier cost of a single token, in the caller's cost-model unit.
/// `Small` is cheapest, `Large` the most expensive.
const fn cost_per_token(tier: Tier) -> f64 {
    match tier {
        Tier::Small => 0.000_001,
        Tier::Medium => 0.000_003,
        Tier::Large => 0.000_015,
    }
}

const fn tier_key(tier: Tier) -> &'static str {
    match tier {
        Tier::Small => "small",
        Tier::Medium => "medium",
        Tier::Large => "large",
    }
}

/// Running total cost of an orchestrator run, broken down by tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CostBreakdown {
    /// Total cost across all tiers.
    pub total: f64,
    /// Cost attributed to each tier that saw at least one attempt.
    pub by_tier: BTreeMap<String, f64>,
}

impl CostBreakdown {
    /// Fold one attempt's usage into the breakdown at `tier`.
    pub fn record(&mut self, tier: Tier, usage: Usage) {
        let cost = f64::from(usage.total_tokens) * cost_per_token(tier);
        self.total += cost;
        *self.by_tier.entry(tier_key(tier).to_owned()).or_insert(0.0) += cost;
    }
}

/// The outcome of running a plan to completion: the terminal plan, the
/// synthesized output, and the cost actually spent getting there.
#[derive(Debug, Clone)]
pub struct OrchestratorResult {
    /// The plan in its terminal state.
    pub plan: ExecutionPlan,
    /// The synthesized output.
    pub output: Value,
    /// Cost breakdown across every tier an attempt ran at.
    pub cost: CostBreakdown,
}

/// Severity-bucketed summary of a subtask's result, folded into the
/// adaptation step after each dispatch round completes.
///
/// `actionable` is advisory: nothing in plan validation consults it, since
/// subtask results populate it inconsistently across callers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FindingsSummary {
    /// Id of the subtask this summary was derived from.
    pub subtask_id: String,
    /// Count of findings per severity label (e.g. `"critical"`, `"info"`).
    pub by_severity: BTreeMap<String, u32>,
    /// Advisory hint that the result warrants a follow-up subtask.
    pub actionable: bool,
    /// The subtask's raw result value.
    pub detail: Value,
}

impl FindingsSummary {
    /// Count of findings at or above `"critical"` severity.
    #[must_use]
    pub fn critical_count(&self) -> u32 {
        self.by_severity.get("critical").copied().unwrap_or(0)
    }

    /// Derive a summary from a subtask's raw result value.
    ///
    /// If `result` is an object with a `findings` array of
    /// `{severity, ...}` entries, severities are tallied from it; otherwise
    /// the summary carries an empty tally and the whole value as `detail`.
    fn from_result(subtask_id: impl Into<String>, result: &Value) -> Self {
        let mut by_severity = BTreeMap::new();
        if let Some(findings) = result.get("findings").and_then(Value::as_array) {
            for finding in findings {
                let severity = finding
                    .get("severity")
                    .and_then(Value::as_str)
                    .unwrap_or("info")
                    .to_owned();
                *by_severity.entry(severity).or_insert(0) += 1;
            }
        }
        let actionable = result
            .get("actionable")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        Self {
            subtask_id: subtask_id.into(),
            by_severity,
            actionable,
            detail: result.clone(),
        }
    }
}

/// Inspects a plan's accumulated findings after each dispatch round and
/// proposes revisions. The default [`NoopAdapter`] never revises.
#[async_trait]
pub trait PlanAdapter: Send + Sync {
    /// Propose zero or more revisions given the plan's current state and
    /// the findings gathered so far.
    async fn adapt(&self, plan: &ExecutionPlan, findings: &[FindingsSummary]) -> Vec<PlanRevision>;
}

/// A [`PlanAdapter`] that never proposes a revision.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAdapter;

#[async_trait]
impl PlanAdapter for NoopAdapter {
    async fn adapt(&self, _plan: &ExecutionPlan, _findings: &[FindingsSummary]) -> Vec<PlanRevision> {
        Vec::new()
    }
}

/// Combines a completed plan's subtask results into a single output value.
pub trait Synthesizer: Send + Sync {
    /// Produce the final output from the completed plan.
    fn synthesize(&self, plan: &ExecutionPlan) -> Value;
}

/// Synthesizes by collecting every subtask's result under its id.
#[derive(Debug, Clone, Copy, Default)]
pub struct CollectSynthesizer;

impl Synthesizer for CollectSynthesizer {
    fn synthesize(&self, plan: &ExecutionPlan) -> Value {
        let mut map = serde_json::Map::new();
        for subtask in &plan.subtasks {
            map.insert(
                subtask.id.clone(),
                subtask.result.clone().unwrap_or(Value::Null),
            );
        }
        Value::Object(map)
    }
}

/// Coordinates round-based, concurrency-budgeted execution of a plan:
/// dispatch every currently-ready subtask (up to the concurrency limit),
/// await the round, fold results back into the plan, let the adapter
/// propose revisions, and repeat until every subtask is terminal.
pub struct Orchestrator {
    executor: Arc<dyn SubtaskExecutor>,
    max_concurrency: usize,
}

impl Orchestrator {
    /// Create an orchestrator dispatching at most `max_concurrency`
    /// subtasks at a time.
    #[must_use]
    pub fn new(executor: Arc<dyn SubtaskExecutor>, max_concurrency: usize) -> Self {
        Self {
            executor,
            max_concurrency: max_concurrency.max(1),
        }
    }

    /// Run `plan` to completion, consulting `adapter` between rounds and
    /// `synthesizer` once it finishes.
    ///
    /// Each subtask dispatch may escalate: if the executor reports
    /// [`SubtaskRunOutcome::Escalate`] and the subtask's current tier can
    /// still step up, it is retried at the next tier immediately, without
    /// waiting for a round boundary. Escalation that runs out of tiers to
    /// climb is a terminal failure for that subtask.
    ///
    /// # Errors
    ///
    /// Returns [`AgentError::Orchestration`] if the plan deadlocks (no
    /// subtask is ready and none is running) or an applied revision
    /// violates the plan's invariants.
    pub async fn run(
        &self,
        mut plan: ExecutionPlan,
        adapter: &dyn PlanAdapter,
        synthesizer: &dyn Synthesizer,
    ) -> Result<OrchestratorResult> {
        let mut findings = Vec::new();
        let mut cost = CostBreakdown::default();

        while !plan.is_complete() {
            let ready_ids: Vec<String> = plan
                .ready()
                .into_iter()
                .take(self.max_concurrency)
                .map(|s| s.id.clone())
                .collect();

            if ready_ids.is_empty() {
                return Err(AgentError::Orchestration {
                    message: "plan deadlocked: no subtask is ready and none is running".to_owned(),
                });
            }

            for id in &ready_ids {
                plan.mark_running(id);
            }

            let semaphore = Arc::new(Semaphore::new(self.max_concurrency));
            let round = ready_ids.iter().map(|id| {
                let executor = Arc::clone(&self.executor);
                let subtask = plan
                    .subtasks
                    .iter()
                    .find(|s| &s.id == id)
                    .expect("id came from this plan")
                    .clone();
                let semaphore = Arc::clone(&semaphore);
                async move {
                    let _permit = semaphore.acquire().await.expect("semaphore not closed");
                    Self::dispatch_one(executor.as_ref(), subtask).await
                }
            });

            let outcomes = join_all(round).await;
            for outcome in outcomes {
                for (tier, usage) in &outcome.spend {
                    cost.record(*tier, *usage);
                }
                if let Some(subtask) = plan.subtasks.iter_mut().find(|s| s.id == outcome.id) {
                    subtask.tier = outcome.final_tier;
                }
                match outcome.result {
                    Ok(value) => {
                        findings.push(FindingsSummary::from_result(&outcome.id, &value));
                        plan.mark_done(&outcome.id, true, Some(value));
                    }
                    Err(message) => {
                        let value = Value::String(message);
                        findings.push(FindingsSummary::from_result(&outcome.id, &value));
                        plan.mark_done(&outcome.id, false, Some(value));
                    }
                }
            }

            for revision in adapter.adapt(&plan, &findings).await {
                plan.apply(revision)?;
            }

            plan.cascade_failures();
        }

        let output = synthesizer.synthesize(&plan);
        Ok(OrchestratorResult { plan, output, cost })
    }

    /// Dispatch a single subtask, escalating to the next tier each time the
    /// executor reports [`SubtaskRunOutcome::Escalate`], until it either
    /// completes or runs out of tiers to climb.
    async fn dispatch_one(executor: &dyn SubtaskExecutor, mut subtask: Subtask) -> DispatchOutcome {
        let mut spend = Vec::new();
        loop {
            let run = match executor.execute(&subtask).await {
                Ok(run) => run,
                Err(err) => {
                    return DispatchOutcome {
                        id: subtask.id,
                        final_tier: subtask.tier,
                        result: Err(err.to_string()),
                        spend,
                    };
                }
            };
            spend.push((run.tier, run.usage));
            match run.outcome {
                SubtaskRunOutcome::Done(value) => {
                    return DispatchOutcome {
                        id: subtask.id,
                        final_tier: run.tier,
                        result: Ok(value),
                        spend,
                    };
                }
                SubtaskRunOutcome::Escalate(reason) => match run.tier.escalate() {
                    Some(next) => subtask.tier = next,
                    None => {
                        return DispatchOutcome {
                            id: subtask.id,
                            final_tier: run.tier,
                            result: Err(reason),
                            spend,
                        };
                    }
                },
            }
        }
    }
}

/// Result of dispatching one subtask, including any escalation hops.
struct DispatchOutcome {
    id: String,
    final_tier: Tier,
    result: std::result::Result<Value, String>,
    spend: Vec<(Tier, Usage)>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::Subtask;

    struct EchoExecutor;

    #[async_trait]
    impl SubtaskExecutor for EchoExecutor {
        async fn execute(&self, subtask: &Subtask) -> Result<SubtaskRun> {
            Ok(SubtaskRun {
                outcome: SubtaskRunOutcome::Done(Value::String(format!(
                    "done: {}",
                    subtask.description
                ))),
                tier: subtask.tier,
                usage: Usage::new(10, 5),
            })
        }
    }

    struct FailingExecutor;

    #[async_trait]
    impl SubtaskExecutor for FailingExecutor {
        async fn execute(&self, subtask: &Subtask) -> Result<SubtaskRun> {
            if subtask.id == "b" {
                Err(AgentError::internal("boom"))
            } else {
                Ok(SubtaskRun {
                    outcome: SubtaskRunOutcome::Done(Value::String("ok".to_owned())),
                    tier: subtask.tier,
                    usage: Usage::new(10, 5),
                })
            }
        }
    }

    /// Escalates every subtask once (Small -> Medium) before succeeding,
    /// so each run exercises `Tier::escalate` and records cost at both
    /// tiers it actually ran at.
    struct EscalateOnceExecutor;

    #[async_trait]
    impl SubtaskExecutor for EscalateOnceExecutor {
        async fn execute(&self, subtask: &Subtask) -> Result<SubtaskRun> {
            let outcome = if subtask.tier == Tier::Small {
                SubtaskRunOutcome::Escalate("repeating-call loop detected".to_owned())
            } else {
                SubtaskRunOutcome::Done(Value::String("ok".to_owned()))
            };
            Ok(SubtaskRun {
                outcome,
                tier: subtask.tier,
                usage: Usage::new(100, 20),
            })
        }
    }

    fn linear_plan() -> ExecutionPlan {
        ExecutionPlan::from_subtasks(vec![
            Subtask::new("a", "first"),
            Subtask::new("b", "second").depends_on(["a"]),
            Subtask::new("c", "third").depends_on(["b"]),
        ])
    }

    #[tokio::test]
    async fn runs_linear_plan_to_completion() {
        let orchestrator = Orchestrator::new(Arc::new(EchoExecutor), 2);
        let result = orchestrator
            .run(linear_plan(), &NoopAdapter, &CollectSynthesizer)
            .await
            .unwrap();
        assert!(result.plan.is_complete());
        assert!(!result.plan.has_failures());
        assert_eq!(result.output["a"], Value::String("done: first".to_owned()));
    }

    #[tokio::test]
    async fn failed_subtask_cascades_to_dependents() {
        let orchestrator = Orchestrator::new(Arc::new(FailingExecutor), 2);
        let result = orchestrator
            .run(linear_plan(), &NoopAdapter, &CollectSynthesizer)
            .await
            .unwrap();
        assert!(result.plan.has_failures());
        let c = result.plan.subtasks.iter().find(|s| s.id == "c").unwrap();
        assert_eq!(c.status, crate::planner::SubtaskStatus::Failed);
    }

    #[tokio::test]
    async fn independent_subtasks_dispatch_in_one_round() {
        let mut plan = ExecutionPlan::new();
        plan.subtasks.push(Subtask::new("x", "one"));
        plan.subtasks.push(Subtask::new("y", "two"));
        let orchestrator = Orchestrator::new(Arc::new(EchoExecutor), 4);
        let result = orchestrator
            .run(plan, &NoopAdapter, &CollectSynthesizer)
            .await
            .unwrap();
        assert!(result.plan.is_complete());
    }

    #[tokio::test]
    async fn single_small_tier_subtask_costs_only_the_small_bucket() {
        let mut plan = ExecutionPlan::new();
        plan.subtasks.push(Subtask::new("a", "one").with_tier(Tier::Small));
        let orchestrator = Orchestrator::new(Arc::new(EchoExecutor), 1);
        let result = orchestrator
            .run(plan, &NoopAdapter, &CollectSynthesizer)
            .await
            .unwrap();
        assert!(result.plan.is_complete());
        assert_eq!(result.cost.by_tier.len(), 1);
        assert!(result.cost.by_tier.contains_key("small"));
        assert!(result.cost.total > 0.0);
    }

    #[tokio::test]
    async fn escalation_retries_at_next_tier_and_both_tiers_appear_in_cost() {
        let mut plan = ExecutionPlan::new();
        plan.subtasks.push(Subtask::new("a", "one").with_tier(Tier::Small));
        let orchestrator = Orchestrator::new(Arc::new(EscalateOnceExecutor), 1);
        let result = orchestrator
            .run(plan, &NoopAdapter, &CollectSynthesizer)
            .await
            .unwrap();
        assert!(result.plan.is_complete());
        assert!(!result.plan.has_failures());
        let a = result.plan.subtasks.iter().find(|s| s.id == "a").unwrap();
        assert_eq!(a.tier, Tier::Medium);
        assert!(result.cost.by_tier.contains_key("small"));
        assert!(result.cost.by_tier.contains_key("medium"));
    }
}
