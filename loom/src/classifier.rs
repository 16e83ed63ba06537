//! Task classifier: decides a task's size [`Tier`] before the loop or
//! orchestrator commits resources to it.
//!
//! Classification is a hybrid: a cheap heuristic pass runs first and is
//! used outright when it's confident; otherwise the task is escalated to
//! the model itself for a judgment call.

use serde::{Deserialize, Serialize};

use crate::budget::Tier;
use crate::error::Result;
use crate::message::ChatMessage;
use crate::providers::common::{GenerateOptions, Model};

/// How confident a [`Classification`] is in its assigned tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Confidence {
    /// The top-scoring tier clearly beat the runner-up.
    High,
    /// The verdict was close enough to be worth a second opinion.
    Low,
}

/// Which path produced a [`Classification`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationMethod {
    /// Decided entirely by [`HeuristicClassifier`].
    Heuristic,
    /// Decided by a model call.
    Llm,
    /// The heuristic pass wasn't confident, so the model was consulted.
    Hybrid,
}

/// A classification verdict: the assigned tier, how confident it is, which
/// method produced it, and why.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// The assigned tier.
    pub tier: Tier,
    /// Confidence in the assigned tier.
    pub confidence: Confidence,
    /// Which path produced this verdict.
    pub method: ClassificationMethod,
    /// Human-readable justification.
    pub reasoning: String,
}

/// Heuristic signals considered before falling back to the model.
///
/// - Task length in words above [`HeuristicClassifier::long_task_words`]
///   pushes toward `Large`.
/// - Explicit multi-step language ("then", "after that", numbered lists)
///   pushes toward `Medium`/`Large`.
/// - Short, single-intent tasks default to `Small`.
#[derive(Debug, Clone)]
pub struct HeuristicClassifier {
    long_task_words: usize,
    medium_task_words: usize,
    multi_step_markers: Vec<&'static str>,
}

/// Confidence is `High` when the top-scoring tier beats the runner-up by at
/// least this much.
const CONFIDENCE_MARGIN: f32 = 0.5;

impl HeuristicClassifier {
    /// Create a classifier with default thresholds and markers.
    #[must_use]
    pub fn new() -> Self {
        Self {
            long_task_words: 120,
            medium_task_words: 30,
            multi_step_markers: vec![
                "then ", "after that", "first,", "step 1", "1.", "2.", "and then", "finally,",
            ],
        }
    }

    fn word_count(task: &str) -> usize {
        task.split_whitespace().count()
    }

    fn has_multi_step_markers(&self, task: &str) -> bool {
        let lower = task.to_lowercase();
        self.multi_step_markers.iter().any(|m| lower.contains(m))
    }

    /// Per-tier scores in `[Small, Medium, Large]` order, from word count
    /// and multi-step markers. Not a probability distribution -- just
    /// relative evidence for ranking.
    fn tier_scores(&self, task: &str) -> [f32; 3] {
        let words = Self::word_count(task) as f32;
        let medium_words = self.medium_task_words as f32;
        let long_words = self.long_task_words as f32;
        let multi_step = self.has_multi_step_markers(task);

        let small = (1.0 - words / medium_words).max(0.0) + if multi_step { 0.0 } else { 0.3 };
        let medium_base = if words >= medium_words && words < long_words {
            1.0
        } else {
            0.2
        };
        let medium = medium_base + if multi_step { 0.4 } else { 0.0 };
        let large_base = (words / long_words).min(1.5);
        let large = large_base + if multi_step && words >= medium_words { 0.5 } else { 0.0 };

        [small, medium, large]
    }

    /// Classify `task` using only word count and marker heuristics.
    ///
    /// Confidence is `High` iff the top-scoring tier exceeds the
    /// runner-up's score by at least [`CONFIDENCE_MARGIN`].
    #[must_use]
    pub fn classify(&self, task: &str) -> Classification {
        let scores = self.tier_scores(task);
        let mut ranked = [(Tier::Small, scores[0]), (Tier::Medium, scores[1]), (Tier::Large, scores[2])];
        ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).expect("scores are finite"));
        let (tier, top_score) = ranked[0];
        let runner_up_score = ranked[1].1;
        let confidence = if top_score - runner_up_score >= CONFIDENCE_MARGIN {
            Confidence::High
        } else {
            Confidence::Low
        };
        let reasoning = format!(
            "{} words, multi-step markers={}; scores small={:.2} medium={:.2} large={:.2}",
            Self::word_count(task),
            self.has_multi_step_markers(task),
            scores[0],
            scores[1],
            scores[2],
        );
        Classification {
            tier,
            confidence,
            method: ClassificationMethod::Heuristic,
            reasoning,
        }
    }
}

impl Default for HeuristicClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Hybrid classifier: runs the heuristic pass, and only calls the model
/// when the heuristic isn't confident enough.
pub struct TaskClassifier {
    heuristic: HeuristicClassifier,
}

impl TaskClassifier {
    /// Create a classifier with the default heuristic.
    #[must_use]
    pub fn new() -> Self {
        Self {
            heuristic: HeuristicClassifier::new(),
        }
    }

    /// Classify `task`, consulting `model` if the heuristic pass isn't
    /// confident enough.
    ///
    /// # Errors
    ///
    /// Never fails: a model call error or an unparseable response falls
    /// back to `medium` at `Low` confidence with the failure recorded in
    /// `reasoning`. The `Result` wrapper is kept for API stability.
    pub async fn classify(&self, task: &str, model: &dyn Model) -> Result<Classification> {
        let heuristic = self.heuristic.classify(task);
        if heuristic.confidence == Confidence::High {
            return Ok(heuristic);
        }
        let mut escalated = Self::classify_with_model(task, model).await;
        escalated.method = ClassificationMethod::Hybrid;
        escalated.reasoning = format!(
            "heuristic was not confident ({}); escalated to model: {}",
            heuristic.reasoning, escalated.reasoning
        );
        Ok(escalated)
    }

    /// Ask the model to classify `task`, expecting a `TIER | reason`
    /// response. Falls back to `medium` at `Low` confidence, with the
    /// failure as `reasoning`, on a call error or an unparseable reply --
    /// never propagates the error.
    async fn classify_with_model(task: &str, model: &dyn Model) -> Classification {
        let fallback = |reasoning: String| Classification {
            tier: Tier::Medium,
            confidence: Confidence::Low,
            method: ClassificationMethod::Llm,
            reasoning,
        };

        let prompt = format!(
            "Classify the following task's complexity as exactly one of: small, medium, large.\n\
             - small: a single tool call or a direct answer.\n\
             - medium: a handful of dependent steps.\n\
             - large: a multi-subtask plan requiring orchestration.\n\
             Respond on a single line as `TIER | reason`, e.g. \
             `medium | requires two dependent api calls`.\n\nTask:\n{task}"
        );
        let response = match model
            .generate(
                vec![ChatMessage::user(prompt)],
                GenerateOptions::new().with_temperature(0.0),
            )
            .await
        {
            Ok(response) => response,
            Err(err) => return fallback(format!("model call failed: {err}")),
        };

        let text = response.text().unwrap_or_default();
        let text = text.trim();
        let Some((tier_part, reason_part)) = text.split_once('|') else {
            return fallback(format!("could not parse model response {text:?} as `TIER | reason`"));
        };
        let tier = match tier_part.trim().to_lowercase().as_str() {
            "small" => Tier::Small,
            "medium" => Tier::Medium,
            "large" => Tier::Large,
            other => return fallback(format!("unrecognized tier '{other}' in model response")),
        };
        Classification {
            tier,
            confidence: Confidence::High,
            method: ClassificationMethod::Llm,
            reasoning: reason_part.trim().to_owned(),
        }
    }
}

impl Default for TaskClassifier {
    fn default() -> Self {
        Self::new()
    }
}
