//! Polyvox Tool Registry
//!
//! Process-wide registry of tool definitions with insertion order preserved,
//! plus per-wire-format schema emission. The registry is mutated at startup
//! and treated as read-only afterwards; every read takes a brief lock and
//! works on a snapshot.

pub mod schema;

use polyvox_core::tool::ToolDefinition;
use polyvox_core::types::ProviderKind;
use std::sync::RwLock;
use tracing::{debug, warn};

pub use schema::{parse_tool_schema, tool_to_json, tools_to_json};

#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<Vec<ToolDefinition>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool. Re-registering a name replaces the earlier
    /// definition in place, keeping its position.
    pub fn register(&self, tool: ToolDefinition) {
        let mut tools = self.tools.write().unwrap();
        if let Some(existing) = tools.iter_mut().find(|t| t.name == tool.name) {
            debug!(tool = %tool.name, "replacing registered tool");
            *existing = tool;
        } else {
            debug!(tool = %tool.name, "registered tool");
            tools.push(tool);
        }
    }

    /// Remove a tool by name. Returns whether anything was removed.
    pub fn unregister(&self, name: &str) -> bool {
        let mut tools = self.tools.write().unwrap();
        let before = tools.len();
        tools.retain(|t| t.name != name);
        before != tools.len()
    }

    pub fn find(&self, name: &str) -> Option<ToolDefinition> {
        self.tools.read().unwrap().iter().find(|t| t.name == name).cloned()
    }

    /// Snapshot of every definition, in registration order.
    pub fn all(&self) -> Vec<ToolDefinition> {
        self.tools.read().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.tools.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.read().unwrap().is_empty()
    }

    /// Emit every registered tool in `kind`'s wire format.
    ///
    /// Returns a JSON array; `[]` when the registry is empty.
    pub fn to_json(&self, kind: ProviderKind) -> serde_json::Value {
        let tools = self.tools.read().unwrap();
        schema::tools_to_json(&tools, kind)
    }

    /// Invoke a registered handler with pre-parsed JSON arguments.
    ///
    /// Always returns a JSON string: the handler's value on success, or an
    /// `{"error": "..."}` document for unknown tools, missing handlers,
    /// unparseable arguments and handler failures.
    pub fn execute(&self, name: &str, arguments_json: &str) -> String {
        let Some(tool) = self.find(name) else {
            warn!(tool = %name, "tool call for unregistered tool");
            return error_json(format!("unknown tool: {name}"));
        };
        let Some(handler) = tool.handler else {
            warn!(tool = %name, "tool has no handler");
            return error_json(format!("tool {name} has no handler"));
        };
        let args: serde_json::Value = match serde_json::from_str(arguments_json) {
            Ok(v) => v,
            Err(e) => return error_json(format!("invalid tool arguments: {e}")),
        };
        match handler(&args) {
            Ok(value) => value.to_string(),
            Err(message) => error_json(message),
        }
    }
}

fn error_json(message: String) -> String {
    serde_json::json!({ "error": message }).to_string()
}
