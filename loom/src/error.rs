//! Error types for the orchestration engine and agent execution loop.
//!
//! All fallible operations in this crate return [`Result`], a type alias over
//! [`AgentError`]. Tool-level failures use the narrower [`ToolError`], which
//! converts into [`AgentError`] at the boundary where a tool call result is
//! folded back into the execution loop.

use thiserror::Error;

/// A type alias for `Result<T, AgentError>`.
pub type Result<T> = std::result::Result<T, AgentError>;

/// Errors raised by tool execution.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool registered under this name.
    #[error("tool not found: {0}")]
    NotFound(String),

    /// Arguments failed to deserialize against the tool's schema.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    /// The tool ran but failed.
    #[error("execution failed: {0}")]
    Execution(String),

    /// The tool call was denied by a permission policy.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The tool call exceeded its allotted time.
    #[error("tool call timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// Two tools registered under the same name with a conflict policy of `Error`.
    #[error("name conflict registering tool '{0}': already present in namespace '{1}'")]
    NameConflict(String, String),
}

/// Reasons the execution loop gave up without reaching a normal stop condition.
#[derive(Debug, Error)]
pub enum FailureReport {
    /// A tool invocation failed and no retry policy recovered it.
    #[error("tool '{tool_name}' failed: {message}")]
    ToolError {
        /// Name of the failing tool.
        tool_name: String,
        /// Underlying error message.
        message: String,
    },

    /// The iteration or wall-clock budget was exhausted.
    #[error("timed out after {iterations} iterations")]
    Timeout {
        /// Number of iterations completed before timing out.
        iterations: usize,
    },

    /// An output guard rejected the final answer and no sanitized form was produced.
    #[error("output validation failed: {0}")]
    ValidationFailed(String),

    /// Loop detection identified a repeating, non-progressing call pattern.
    #[error("stuck: {0}")]
    Stuck(String),

    /// A permission policy denied the action outright.
    #[error("policy denied: {0}")]
    PolicyDenied(String),

    /// Catch-all for failures that don't fit another category.
    #[error("unknown failure: {0}")]
    Unknown(String),
}

/// The primary error type for agent and orchestration operations.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Error during tool execution.
    #[error("tool execution error in '{tool_name}': {message}")]
    ToolExecution {
        /// Name of the tool that failed.
        tool_name: String,
        /// The underlying error message.
        message: String,
    },

    /// Error parsing model output.
    #[error("parsing error: {message} (output: {output})")]
    Parsing {
        /// The output that failed to parse.
        output: String,
        /// The parsing error message.
        message: String,
    },

    /// Error from the model/LLM.
    #[error("model error: {message}")]
    Model {
        /// The underlying error message.
        message: String,
    },

    /// Agent reached the maximum number of loop iterations.
    #[error("reached maximum iterations ({iterations}/{max_iterations})")]
    MaxIterations {
        /// Number of iterations taken.
        iterations: usize,
        /// Maximum allowed iterations.
        max_iterations: usize,
    },

    /// The hard token or wall-clock budget was exceeded.
    #[error("budget exceeded: {message}")]
    BudgetExceeded {
        /// Description of which budget was exceeded.
        message: String,
    },

    /// Loop detection tripped: the same call repeated without progress.
    #[error("loop detected: {message}")]
    LoopDetected {
        /// Description of the repeating pattern.
        message: String,
    },

    /// Agent execution was interrupted via an abort signal.
    #[error("agent execution was interrupted")]
    Interrupted,

    /// Invalid configuration.
    #[error("configuration error: {message}")]
    Configuration {
        /// Description of the configuration issue.
        message: String,
    },

    /// A guard rejected input or output and no sanitized form was available.
    #[error("guard '{guard_name}' rejected {phase}: {reason}")]
    GuardRejected {
        /// Name of the guard that rejected the content.
        guard_name: String,
        /// Which phase was rejected (`"input"` or `"output"`).
        phase: &'static str,
        /// Human-readable rejection reason.
        reason: String,
    },

    /// A middleware hook failed under a fail-closed policy.
    #[error("middleware '{hook_name}' failed: {message}")]
    MiddlewareFailed {
        /// Name of the failing middleware.
        hook_name: String,
        /// Underlying error message.
        message: String,
    },

    /// Planning could not produce a valid execution plan.
    #[error("planning error: {message}")]
    Planning {
        /// Description of why planning failed.
        message: String,
    },

    /// Orchestration could not complete a subtask dispatch or adaptation cycle.
    #[error("orchestration error: {message}")]
    Orchestration {
        /// Description of the orchestration failure.
        message: String,
    },

    /// A tool-level error, converted at the execution-loop boundary.
    #[error(transparent)]
    Tool(#[from] ToolError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic internal error.
    #[error("internal error: {message}")]
    Internal {
        /// The underlying error message.
        message: String,
    },
}

impl AgentError {
    /// Create a new tool execution error.
    #[must_use]
    pub fn tool_execution(tool_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ToolExecution {
            tool_name: tool_name.into(),
            message: message.into(),
        }
    }

    /// Create a new parsing error.
    #[must_use]
    pub fn parsing(output: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Parsing {
            output: output.into(),
            message: message.into(),
        }
    }

    /// Create a new model error.
    #[must_use]
    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    /// Create a new max-iterations error.
    #[must_use]
    pub const fn max_iterations(iterations: usize, max_iterations: usize) -> Self {
        Self::MaxIterations {
            iterations,
            max_iterations,
        }
    }

    /// Create a new configuration error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create a new internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Classify this error into a [`FailureReport`] for the loop's final outcome.
    #[must_use]
    pub fn into_failure_report(self) -> FailureReport {
        match self {
            Self::ToolExecution { tool_name, message } => FailureReport::ToolError {
                tool_name,
                message,
            },
            Self::Tool(err) => FailureReport::ToolError {
                tool_name: "unknown".to_owned(),
                message: err.to_string(),
            },
            Self::MaxIterations { iterations, .. } => FailureReport::Timeout { iterations },
            Self::BudgetExceeded { message } => FailureReport::PolicyDenied(message),
            Self::LoopDetected { message } => FailureReport::Stuck(message),
            Self::GuardRejected { reason, .. } => FailureReport::ValidationFailed(reason),
            other => FailureReport::Unknown(other.to_string()),
        }
    }
}
