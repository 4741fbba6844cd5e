//! Per-wire-format tool schema emission and parsing
//!
//! Three wire shapes exist for the same tool definition:
//!
//! - Anthropic-style: `{name, description, input_schema: {…}}`
//! - OpenAI-style: `{type: "function", function: {name, description, parameters: {…}}}`
//! - Gemini-style: same nesting as Anthropic but with uppercase type names
//!   under a `parameters` key
//!
//! OpenRouter, Ollama and the on-device bridges all accept the OpenAI shape.
//! Parameter order and the required-set survive a serialize/parse round trip
//! for every kind.

use polyvox_core::tool::{ParameterType, ToolDefinition, ToolParameter};
use polyvox_core::types::ProviderKind;
use serde_json::{Map, Value, json};

/// Emit one tool in `kind`'s wire format.
pub fn tool_to_json(tool: &ToolDefinition, kind: ProviderKind) -> Value {
    match kind {
        ProviderKind::Anthropic => json!({
            "name": tool.name,
            "description": tool.description,
            "input_schema": parameters_object(tool, false),
        }),
        ProviderKind::Gemini => json!({
            "name": tool.name,
            "description": tool.description,
            "parameters": parameters_object(tool, true),
        }),
        // Everything else speaks the OpenAI function wrapper.
        _ => json!({
            "type": "function",
            "function": {
                "name": tool.name,
                "description": tool.description,
                "parameters": parameters_object(tool, false),
            },
        }),
    }
}

/// Emit every tool as a JSON array; `[]` for an empty slice.
pub fn tools_to_json(tools: &[ToolDefinition], kind: ProviderKind) -> Value {
    Value::Array(tools.iter().map(|t| tool_to_json(t, kind)).collect())
}

fn parameters_object(tool: &ToolDefinition, uppercase: bool) -> Value {
    let mut properties = Map::new();
    for param in &tool.parameters {
        let mut prop = Map::new();
        let type_name = if uppercase {
            param.param_type.uppercase_name()
        } else {
            param.param_type.json_schema_name()
        };
        prop.insert("type".to_string(), Value::String(type_name.to_string()));
        if !param.description.is_empty() {
            prop.insert(
                "description".to_string(),
                Value::String(param.description.clone()),
            );
        }
        if let Some(values) = &param.allowed_values {
            prop.insert(
                "enum".to_string(),
                Value::Array(values.iter().map(|v| Value::String(v.clone())).collect()),
            );
        }
        if let Some(default) = &param.default {
            prop.insert("default".to_string(), default.clone());
        }
        properties.insert(param.name.clone(), Value::Object(prop));
    }

    let required: Vec<Value> = tool
        .required_names()
        .into_iter()
        .map(|n| Value::String(n.to_string()))
        .collect();

    json!({
        "type": if uppercase { "OBJECT" } else { "object" },
        "properties": Value::Object(properties),
        "required": Value::Array(required),
    })
}

/// Parse a tool schema previously emitted by [`tool_to_json`].
///
/// Handlers do not survive the wire; the parsed definition has none.
pub fn parse_tool_schema(value: &Value, kind: ProviderKind) -> Option<ToolDefinition> {
    let (header, params_key) = match kind {
        ProviderKind::Anthropic => (value, "input_schema"),
        ProviderKind::Gemini => (value, "parameters"),
        _ => (value.get("function")?, "parameters"),
    };

    let name = header.get("name")?.as_str()?.to_string();
    let description = header
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    let mut tool = ToolDefinition::new(name, description);

    let Some(params) = header.get(params_key) else {
        return Some(tool);
    };
    let required: Vec<&str> = params
        .get("required")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    if let Some(properties) = params.get("properties").and_then(Value::as_object) {
        for (param_name, prop) in properties {
            let param_type = prop
                .get("type")
                .and_then(Value::as_str)
                .and_then(ParameterType::from_schema_name)
                .unwrap_or(ParameterType::String);
            let mut param = ToolParameter::new(
                param_name.clone(),
                param_type,
                required.contains(&param_name.as_str()),
            );
            if let Some(description) = prop.get("description").and_then(Value::as_str) {
                param.description = description.to_string();
            }
            if let Some(values) = prop.get("enum").and_then(Value::as_array) {
                param.allowed_values = Some(
                    values
                        .iter()
                        .filter_map(Value::as_str)
                        .map(str::to_string)
                        .collect(),
                );
            }
            if let Some(default) = prop.get("default") {
                param.default = Some(default.clone());
            }
            tool.parameters.push(param);
        }
    }

    Some(tool)
}
