// SPDX-License-Identifier: Apache-2.0
//! Type conversions between [`mitto_tools`]'s shapes and rmcp's MCP model
//! types. Pure, stateless functions — this is the seam between the tool
//! registry and the wire protocol so neither side needs to know about the
//! other.

use std::sync::Arc;

use mitto_tools::{ToolOutput, ToolSchema};
use rmcp::model::{CallToolResult, Content, JsonObject, Tool as McpTool};

/// Convert a [`ToolSchema`] into an rmcp [`Tool`] descriptor. The JSON Schema
/// already produced by each tool's `parameters_schema` is passed through as
/// the `input_schema` without further processing.
pub fn schema_to_mcp_tool(schema: ToolSchema) -> McpTool {
    let input_schema: JsonObject = value_to_object(schema.parameters);
    McpTool::new(
        std::borrow::Cow::Owned(schema.name),
        std::borrow::Cow::Owned(schema.description),
        Arc::new(input_schema),
    )
}

/// MCP requires the schema to be a JSON object; wrap non-object schemas in a
/// minimal `{"type":"object"}` envelope rather than reject them.
fn value_to_object(v: serde_json::Value) -> JsonObject {
    use serde_json::{Map, Value};
    match v {
        Value::Object(m) => m,
        other => {
            let mut m = Map::new();
            m.insert("type".to_string(), Value::String("object".to_string()));
            m.insert("value".to_string(), other);
            m
        }
    }
}

/// Convert a [`ToolOutput`] into an rmcp [`CallToolResult`]. mitto's tool
/// output is always flat plain text, so this is always a single `Content::text`.
pub fn output_to_call_result(output: ToolOutput) -> CallToolResult {
    let content = vec![Content::text(output.content)];
    if output.is_error {
        CallToolResult {
            content,
            is_error: Some(true),
            structured_content: None,
            meta: None,
        }
    } else {
        CallToolResult::success(content)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::*;

    fn make_schema(name: &str, desc: &str, params: Value) -> ToolSchema {
        ToolSchema {
            name: name.to_string(),
            description: desc.to_string(),
            parameters: params,
        }
    }

    #[test]
    fn schema_to_mcp_tool_preserves_name_and_description() {
        let schema = make_schema("get_config", "Returns config", json!({"type":"object"}));
        let tool = schema_to_mcp_tool(schema);
        assert_eq!(tool.name.as_ref(), "get_config");
        assert_eq!(tool.description.as_deref(), Some("Returns config"));
    }

    #[test]
    fn schema_to_mcp_tool_object_schema_passes_through() {
        let schema = make_schema(
            "list_conversations",
            "Lists",
            json!({"type": "object", "properties": {"self_id": {"type": "string"}}}),
        );
        let tool = schema_to_mcp_tool(schema);
        assert!(tool.input_schema.contains_key("type"));
    }

    #[test]
    fn schema_to_mcp_tool_non_object_schema_gets_wrapped() {
        let schema = make_schema("echo", "Echoes", json!("not an object"));
        let tool = schema_to_mcp_tool(schema);
        assert_eq!(
            tool.input_schema.get("type"),
            Some(&Value::String("object".to_string()))
        );
    }

    #[test]
    fn output_to_call_result_text_success() {
        let out = ToolOutput::ok("id1", "hello world");
        let result = output_to_call_result(out);
        assert_eq!(result.is_error, Some(false));
        assert_eq!(result.content.len(), 1);
    }

    #[test]
    fn output_to_call_result_error_flag_set() {
        let out = ToolOutput::err("id2", "something went wrong");
        let result = output_to_call_result(out);
        assert_eq!(result.is_error, Some(true));
        assert_eq!(result.content.len(), 1);
    }
}
