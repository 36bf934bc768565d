//! OpenAI-compatible wire shapes.
//!
//! The `content` field is a string or a list of typed parts; it is modeled as
//! an untagged enum so the translator converts exactly once at the boundary.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionRequest {
    pub model: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,
    /// Vendor extension; not part of the standard OpenAI surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<MessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum ContentPart {
    #[serde(rename = "text")]
    Text { text: String },
    #[serde(rename = "image_url")]
    ImageUrl { image_url: ImageUrl },
    /// Unrecognized part types are tolerated and dropped by the translator.
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ImageUrl {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    #[serde(rename = "type")]
    pub tool_type: String,
    pub function: FunctionSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSpec {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parameters: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub call_type: String,
    pub function: FunctionCall,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionCall {
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatCompletionResponse {
    pub id: String,
    pub object: String,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssistantMessage {
    pub role: String,
    pub content: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reasoning: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

/// Internal capture of vendor usage metadata, last-writer-wins across events.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub total_tokens: i64,
}

impl TokenUsage {
    pub fn from_metadata(metadata: &Value) -> Self {
        let field = |name: &str| metadata.get(name).and_then(|v| v.as_i64()).unwrap_or(0);
        Self {
            input_tokens: field("promptTokenCount"),
            output_tokens: field("candidatesTokenCount"),
            total_tokens: field("totalTokenCount"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn content_deserializes_both_shapes() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gemini-2.0-flash",
            "messages": [
                { "role": "user", "content": "plain string" },
                { "role": "user", "content": [
                    { "type": "text", "text": "describe" },
                    { "type": "image_url", "image_url": { "url": "data:image/png;base64,AAAA" } }
                ]}
            ]
        }))
        .expect("request parses");

        assert!(matches!(
            req.messages[0].content,
            Some(MessageContent::Text(_))
        ));
        match &req.messages[1].content {
            Some(MessageContent::Parts(parts)) => assert_eq!(parts.len(), 2),
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[test]
    fn unknown_content_part_types_are_tolerated() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gemini-2.0-flash",
            "messages": [{ "role": "user", "content": [
                { "type": "audio_url", "audio_url": { "url": "file.mp3" } },
                { "type": "text", "text": "hello" }
            ]}]
        }))
        .expect("request parses");

        match &req.messages[0].content {
            Some(MessageContent::Parts(parts)) => {
                assert_eq!(parts.len(), 2);
                assert!(matches!(parts[0], ContentPart::Unknown));
                assert!(matches!(parts[1], ContentPart::Text { .. }));
            }
            other => panic!("expected parts, got {:?}", other),
        }
    }

    #[test]
    fn sampling_fields_absent_stay_none() {
        let req: ChatCompletionRequest = serde_json::from_value(json!({
            "model": "gemini-2.0-flash",
            "messages": []
        }))
        .expect("request parses");
        assert!(req.temperature.is_none());
        assert!(req.top_p.is_none());
        assert!(req.top_k.is_none());
        assert!(req.max_tokens.is_none());
        assert!(!req.stream);
    }

    #[test]
    fn token_usage_reads_vendor_metadata() {
        let usage = TokenUsage::from_metadata(&json!({
            "promptTokenCount": 12,
            "candidatesTokenCount": 34,
            "totalTokenCount": 46
        }));
        assert_eq!(usage.input_tokens, 12);
        assert_eq!(usage.output_tokens, 34);
        assert_eq!(usage.total_tokens, 46);

        let empty = TokenUsage::from_metadata(&json!({}));
        assert_eq!(empty, TokenUsage::default());
    }

    #[test]
    fn empty_reasoning_is_omitted_from_response_json() {
        let message = AssistantMessage {
            role: "assistant".to_string(),
            content: "hi".to_string(),
            reasoning: String::new(),
            tool_calls: None,
        };
        let value = serde_json::to_value(&message).expect("serialize");
        assert!(value.get("reasoning").is_none());
        assert!(value.get("tool_calls").is_none());
    }
}
