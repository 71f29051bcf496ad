//! Plain-text flattening of issue descriptions for text matching.

use serde_json::Value;

/// Extract plain text description from Jira's ADF or plain text format
pub fn extract_description(value: &Value) -> Option<String> {
  // If it's a string, return it directly (API v2)
  if let Some(s) = value.as_str() {
    return Some(s.to_string());
  }

  // ADF document (API v3)
  let content = value.get("content").and_then(Value::as_array)?;
  let mut text = String::new();
  extract_adf_text(content, &mut text);
  (!text.is_empty()).then_some(text)
}

/// Recursively extract text from ADF content
fn extract_adf_text(content: &[Value], output: &mut String) {
  for node in content {
    let Some(node_type) = node.get("type").and_then(Value::as_str) else {
      continue;
    };

    match node_type {
      "text" => {
        if let Some(text) = node.get("text").and_then(Value::as_str) {
          output.push_str(text);
        }
      }
      "hardBreak" => output.push('\n'),
      _ => {
        if let Some(children) = node.get("content").and_then(Value::as_array) {
          extract_adf_text(children, output);
        }
        if matches!(node_type, "paragraph" | "heading" | "codeBlock") {
          output.push('\n');
        }
      }
    }
  }
}
