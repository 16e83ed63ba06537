//! Tool registry and manager: namespace resolution, conflict handling, and
//! permission filtering across a set of tool packs.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt;

use crate::error::ToolError;
use crate::tool::{BoxedTool, DynTool, ToolCallResult, ToolDefinition, ToolExecutionPolicy};

/// How the registry resolves a name collision between two tool packs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPolicy {
    /// Reject registration of the second pack with a [`ToolError::NameConflict`].
    #[default]
    Error,
    /// The most recently registered pack silently wins.
    Override,
    /// Disambiguate by registering the tool under `"<pack_name>::<tool_name>"`.
    NamespacePrefix,
}

/// A named group of tools registered together, e.g. all the tools an MCP
/// server or a plugin crate exposes.
pub struct ToolPack {
    /// Namespace the pack's tools are registered under on conflict.
    pub name: String,
    tools: Vec<BoxedTool>,
}

impl ToolPack {
    /// Create a new, empty tool pack.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            tools: Vec::new(),
        }
    }

    /// Add a boxed tool to the pack.
    #[must_use]
    pub fn with_tool(mut self, tool: BoxedTool) -> Self {
        self.tools.push(tool);
        self
    }
}

/// Permission constraints applied when filtering a tool manager's view for a
/// particular agent or task tier.
#[derive(Debug, Clone, Default)]
pub struct ToolPermissions {
    /// If set, only these tool names (post-resolution) are visible.
    pub allowed: Option<HashSet<String>>,
    /// Tool names that are never visible, regardless of `allowed`.
    pub denied: HashSet<String>,
}

impl ToolPermissions {
    /// Allow-list these tool names and nothing else.
    #[must_use]
    pub fn allow_only(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: Some(names.into_iter().map(Into::into).collect()),
            denied: HashSet::new(),
        }
    }

    /// Deny these tool names, otherwise allow everything.
    #[must_use]
    pub fn deny(names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            allowed: None,
            denied: names.into_iter().map(Into::into).collect(),
        }
    }

    fn permits(&self, name: &str) -> bool {
        if self.denied.contains(name) {
            return false;
        }
        self.allowed.as_ref().is_none_or(|a| a.contains(name))
    }
}

/// A registry of tools resolved from one or more [`ToolPack`]s, with
/// per-tool execution policy and optional permission filtering.
#[derive(Default)]
pub struct ToolManager {
    tools: HashMap<String, BoxedTool>,
    policies: HashMap<String, ToolExecutionPolicy>,
    auto_approved: HashSet<String>,
}

impl ToolManager {
    /// Create a new empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pack, applying `policy` to resolve name conflicts against
    /// tools already present.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::NameConflict`] if `policy` is [`ConflictPolicy::Error`]
    /// and a tool name in `pack` already exists.
    pub fn register_pack(
        &mut self,
        pack: ToolPack,
        policy: ConflictPolicy,
    ) -> Result<(), ToolError> {
        for tool in pack.tools {
            let name = tool.name().to_owned();
            if self.tools.contains_key(&name) {
                match policy {
                    ConflictPolicy::Error => {
                        return Err(ToolError::NameConflict(name, pack.name.clone()));
                    }
                    ConflictPolicy::Override => {
                        self.tools.insert(name, tool);
                    }
                    ConflictPolicy::NamespacePrefix => {
                        let namespaced = format!("{}::{name}", pack.name);
                        self.tools.insert(namespaced, tool);
                    }
                }
            } else {
                self.tools.insert(name, tool);
            }
        }
        Ok(())
    }

    /// Add a single tool directly, bypassing pack-level conflict handling.
    pub fn add_boxed(&mut self, tool: BoxedTool) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Set the execution policy for a tool.
    pub fn set_policy(&mut self, tool_name: impl Into<String>, policy: ToolExecutionPolicy) {
        self.policies.insert(tool_name.into(), policy);
    }

    /// Get the execution policy for a tool (defaults to [`ToolExecutionPolicy::Auto`]).
    #[must_use]
    pub fn get_policy(&self, tool_name: &str) -> ToolExecutionPolicy {
        if self.auto_approved.contains(tool_name) {
            return ToolExecutionPolicy::Auto;
        }
        self.policies
            .get(tool_name)
            .copied()
            .unwrap_or(ToolExecutionPolicy::Auto)
    }

    /// Mark a tool as auto-approved, overriding any confirmation requirement.
    pub fn mark_auto_approved(&mut self, tool_name: impl Into<String>) {
        self.auto_approved.insert(tool_name.into());
    }

    /// Tool definitions visible under the given permission constraints.
    #[must_use]
    pub fn definitions(&self, permissions: &ToolPermissions) -> Vec<ToolDefinition> {
        self.tools
            .iter()
            .filter(|(name, _)| permissions.permits(name))
            .map(|(_, t)| t.definition())
            .collect()
    }

    /// Get the names of all registered tools, ignoring permissions.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.tools.values().map(|t| t.name()).collect()
    }

    /// Check whether a tool is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether the manager has no registered tools.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Call a tool by name with JSON arguments, enforcing `permissions` first.
    ///
    /// # Errors
    ///
    /// Returns [`ToolError::PermissionDenied`] if the tool is filtered out by
    /// `permissions`, [`ToolError::NotFound`] if no such tool is registered,
    /// or the tool's own execution error otherwise.
    pub async fn call(
        &self,
        name: &str,
        args: Value,
        permissions: &ToolPermissions,
    ) -> Result<Value, ToolError> {
        if !permissions.permits(name) {
            return Err(ToolError::PermissionDenied(format!(
                "tool '{name}' is not permitted in this context"
            )));
        }
        let tool = self
            .tools
            .get(name)
            .ok_or_else(|| ToolError::NotFound(name.to_owned()))?;
        tool.call_json(args).await
    }
}

impl fmt::Debug for ToolManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolManager")
            .field("tools", &self.names())
            .finish_non_exhaustive()
    }
}

/// Request for human confirmation before tool execution.
#[derive(Debug, Clone)]
pub struct ToolConfirmationRequest {
    /// The tool call ID.
    pub id: String,
    /// The tool name.
    pub name: String,
    /// The tool arguments as JSON.
    pub arguments: Value,
}

/// Response to a tool confirmation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolConfirmationResponse {
    /// User approved the tool execution.
    Approved,
    /// User denied the tool execution.
    Denied,
    /// User approved this and all future calls to this tool.
    ApproveAll,
}

impl ToolConfirmationResponse {
    /// Check if the response approves execution.
    #[must_use]
    pub const fn is_approved(&self) -> bool {
        matches!(self, Self::Approved | Self::ApproveAll)
    }
}

/// Handler for tool execution confirmation requests.
#[async_trait]
pub trait ConfirmationHandler: Send + Sync {
    /// Request confirmation for a tool execution.
    async fn confirm(&self, request: &ToolConfirmationRequest) -> ToolConfirmationResponse;
}

/// Default confirmation handler that auto-approves all requests. Used when
/// an embedding application has no human in the loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct AutoApproveHandler;

#[async_trait]
impl ConfirmationHandler for AutoApproveHandler {
    async fn confirm(&self, _request: &ToolConfirmationRequest) -> ToolConfirmationResponse {
        ToolConfirmationResponse::Approved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool::Tool;

    struct NamedTool(&'static str);

    #[async_trait]
    impl Tool for NamedTool {
        const NAME: &'static str = "named";
        type Args = Value;
        type Output = Value;
        type Error = ToolError;

        fn name(&self) -> &'static str {
            self.0
        }

        fn description(&self) -> String {
            "test tool".to_owned()
        }

        fn parameters_schema(&self) -> Value {
            serde_json::json!({"type": "object"})
        }

        async fn call(&self, args: Self::Args) -> Result<Self::Output, Self::Error> {
            Ok(args)
        }
    }

    fn pack(name: &str, tool_name: &'static str) -> ToolPack {
        ToolPack::new(name).with_tool(Box::new(NamedTool(tool_name)))
    }

    #[test]
    fn conflict_policy_error_rejects_duplicate() {
        let mut manager = ToolManager::new();
        manager
            .register_pack(pack("pack-a", "search"), ConflictPolicy::Error)
            .unwrap();
        let err = manager
            .register_pack(pack("pack-b", "search"), ConflictPolicy::Error)
            .unwrap_err();
        assert!(matches!(err, ToolError::NameConflict(_, _)));
    }

    #[test]
    fn conflict_policy_namespace_prefix_disambiguates() {
        let mut manager = ToolManager::new();
        manager
            .register_pack(pack("pack-a", "search"), ConflictPolicy::Error)
            .unwrap();
        manager
            .register_pack(pack("pack-b", "search"), ConflictPolicy::NamespacePrefix)
            .unwrap();
        assert!(manager.contains("search"));
        assert!(manager.contains("pack-b::search"));
        assert_eq!(manager.len(), 2);
    }

    #[test]
    fn conflict_policy_override_replaces() {
        let mut manager = ToolManager::new();
        manager
            .register_pack(pack("pack-a", "search"), ConflictPolicy::Error)
            .unwrap();
        manager
            .register_pack(pack("pack-b", "search"), ConflictPolicy::Override)
            .unwrap();
        assert_eq!(manager.len(), 1);
    }

    #[tokio::test]
    async fn permission_denied_blocks_call() {
        let mut manager = ToolManager::new();
        manager
            .register_pack(pack("pack-a", "delete_all"), ConflictPolicy::Error)
            .unwrap();
        let permissions = ToolPermissions::deny(["delete_all"]);
        let err = manager
            .call("delete_all", serde_json::json!({}), &permissions)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied(_)));
    }

    #[tokio::test]
    async fn allow_only_hides_unlisted_tools() {
        let mut manager = ToolManager::new();
        manager
            .register_pack(pack("pack-a", "search"), ConflictPolicy::Error)
            .unwrap();
        manager
            .register_pack(pack("pack-a", "delete_all"), ConflictPolicy::NamespacePrefix)
            .unwrap();
        let permissions = ToolPermissions::allow_only(["search"]);
        assert_eq!(manager.definitions(&permissions).len(), 1);
    }
}
