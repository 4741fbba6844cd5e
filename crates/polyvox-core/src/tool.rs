//! Tool definitions and parsed tool calls

use std::fmt;
use std::sync::Arc;

/// JSON-Schema parameter types accepted by every wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParameterType {
    String,
    Number,
    Integer,
    Boolean,
    Array,
    Object,
}

impl ParameterType {
    /// Lowercase JSON-Schema name (Anthropic- and OpenAI-style wires).
    pub fn json_schema_name(self) -> &'static str {
        match self {
            ParameterType::String => "string",
            ParameterType::Number => "number",
            ParameterType::Integer => "integer",
            ParameterType::Boolean => "boolean",
            ParameterType::Array => "array",
            ParameterType::Object => "object",
        }
    }

    /// Uppercase enum name (Gemini-style wire).
    pub fn uppercase_name(self) -> &'static str {
        match self {
            ParameterType::String => "STRING",
            ParameterType::Number => "NUMBER",
            ParameterType::Integer => "INTEGER",
            ParameterType::Boolean => "BOOLEAN",
            ParameterType::Array => "ARRAY",
            ParameterType::Object => "OBJECT",
        }
    }

    pub fn from_schema_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "string" => Some(ParameterType::String),
            "number" => Some(ParameterType::Number),
            "integer" => Some(ParameterType::Integer),
            "boolean" => Some(ParameterType::Boolean),
            "array" => Some(ParameterType::Array),
            "object" => Some(ParameterType::Object),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ToolParameter {
    pub name: String,
    pub description: String,
    pub param_type: ParameterType,
    pub required: bool,
    /// Closed value set, when the parameter is an enumeration
    pub allowed_values: Option<Vec<String>>,
    pub default: Option<serde_json::Value>,
}

impl ToolParameter {
    pub fn new(name: impl Into<String>, param_type: ParameterType, required: bool) -> Self {
        Self {
            name: name.into(),
            description: String::new(),
            param_type,
            required,
            allowed_values: None,
            default: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_allowed_values(mut self, values: Vec<String>) -> Self {
        self.allowed_values = Some(values);
        self
    }

    pub fn with_default(mut self, default: serde_json::Value) -> Self {
        self.default = Some(default);
        self
    }
}

/// Handler invoked when a model asks for this tool.
///
/// Receives the parsed arguments object and returns a JSON value to feed
/// back to the model, or an error string.
pub type ToolHandler =
    Arc<dyn Fn(&serde_json::Value) -> std::result::Result<serde_json::Value, String> + Send + Sync>;

#[derive(Clone)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    /// Parameters in declaration order; order is preserved on every wire
    pub parameters: Vec<ToolParameter>,
    pub handler: Option<ToolHandler>,
}

impl ToolDefinition {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: Vec::new(),
            handler: None,
        }
    }

    pub fn with_parameter(mut self, parameter: ToolParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    pub fn with_handler(mut self, handler: ToolHandler) -> Self {
        self.handler = Some(handler);
        self
    }

    /// Names of the required parameters, in declaration order.
    pub fn required_names(&self) -> Vec<&str> {
        self.parameters
            .iter()
            .filter(|p| p.required)
            .map(|p| p.name.as_str())
            .collect()
    }
}

impl fmt::Debug for ToolDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ToolDefinition")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("parameters", &self.parameters)
            .field("handler", &self.handler.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// A structured function invocation emitted by a model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolCall {
    pub tool_name: String,
    /// Provider-assigned call id; empty when the provider omits one
    pub tool_id: String,
    /// Raw arguments as a JSON document
    pub arguments_json: String,
}

impl ToolCall {
    pub fn arguments(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::from_str(&self.arguments_json)
    }
}
