//! Vendor SSE → single aggregated OpenAI chat completion.
//!
//! Walks every event: thought parts accumulate into `reasoning`, plain text
//! into `content`, function-call parts into the tool-call list. Usage
//! metadata is last-writer-wins. Two fallbacks apply at the end: an inline
//! `<think>…</think>` block is promoted to `reasoning` when no thought parts
//! arrived, and output tokens are estimated at len/4 when the upstream never
//! reported usage.

use std::hash::{Hash, Hasher};
use std::sync::LazyLock;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt};
use regex::Regex;
use serde_json::{json, Value};
use uuid::Uuid;

use super::models::{
    AssistantMessage, ChatCompletionResponse, Choice, FunctionCall, TokenUsage, ToolCall, Usage,
};

static THINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<think>(.*?)</think>").expect("think regex is valid"));

/// Aggregate the whole stream into one response. Returns the response plus
/// the raw captured usage (pre-estimate), which is what gets recorded against
/// the account.
pub async fn collect_chat_response<S, E>(
    mut stream: S,
    model: &str,
) -> Result<(ChatCompletionResponse, TokenUsage), String>
where
    S: Stream<Item = Result<Bytes, E>> + Unpin,
    E: std::fmt::Display,
{
    let mut buffer = BytesMut::new();
    let mut content = String::new();
    let mut reasoning = String::new();
    let mut tool_calls: Vec<ToolCall> = Vec::new();
    let mut usage = TokenUsage::default();
    let mut done = false;

    while !done {
        let Some(item) = stream.next().await else {
            break;
        };
        let bytes = item.map_err(|e| format!("upstream stream error: {}", e))?;
        buffer.extend_from_slice(&bytes);

        while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
            let line_raw = buffer.split_to(pos + 1);
            let Ok(line) = std::str::from_utf8(&line_raw) else {
                continue;
            };
            if consume_line(
                line,
                &mut content,
                &mut reasoning,
                &mut tool_calls,
                &mut usage,
            ) {
                done = true;
                break;
            }
        }
    }

    // A final line without a trailing newline still counts.
    if !done && !buffer.is_empty() {
        if let Ok(line) = std::str::from_utf8(&buffer) {
            let line = line.to_string();
            consume_line(
                &line,
                &mut content,
                &mut reasoning,
                &mut tool_calls,
                &mut usage,
            );
        }
    }

    let raw_usage = usage;

    if reasoning.is_empty() {
        let (extracted, remaining) = extract_think_block(content);
        reasoning = extracted;
        content = remaining;
    }

    let mut reported = raw_usage;
    if reported.total_tokens == 0 {
        reported.output_tokens = (content.len() / 4) as i64;
        reported.total_tokens = reported.output_tokens;
    }

    let response = ChatCompletionResponse {
        id: format!("chatcmpl-{}", Uuid::new_v4()),
        object: "chat.completion".to_string(),
        created: Utc::now().timestamp(),
        model: model.to_string(),
        choices: vec![Choice {
            index: 0,
            message: AssistantMessage {
                role: "assistant".to_string(),
                content,
                reasoning,
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: Some(Usage {
            prompt_tokens: reported.input_tokens,
            completion_tokens: reported.output_tokens,
            total_tokens: reported.total_tokens,
        }),
    };

    Ok((response, raw_usage))
}

/// Process one SSE line; returns true on the `[DONE]` sentinel.
fn consume_line(
    line: &str,
    content: &mut String,
    reasoning: &mut String,
    tool_calls: &mut Vec<ToolCall>,
    usage: &mut TokenUsage,
) -> bool {
    let line = line.trim();
    if !line.starts_with("data: ") {
        return false;
    }
    let payload = line.trim_start_matches("data: ").trim();
    if payload == "[DONE]" {
        return true;
    }
    let Ok(mut event) = serde_json::from_str::<Value>(payload) else {
        return false;
    };
    let data = if let Some(inner) = event.get_mut("response").map(|v| v.take()) {
        inner
    } else {
        event
    };

    if let Some(metadata) = data.get("usageMetadata") {
        *usage = TokenUsage::from_metadata(metadata);
    }

    let parts = data
        .get("candidates")
        .and_then(|c| c.as_array())
        .and_then(|c| c.first())
        .and_then(|c| c.get("content"))
        .and_then(|c| c.get("parts"))
        .and_then(|p| p.as_array());
    let Some(parts) = parts else {
        return false;
    };

    for part in parts {
        let is_thought = part
            .get("thought")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        if let Some(text) = part.get("text").and_then(|t| t.as_str()) {
            if is_thought {
                reasoning.push_str(text);
            } else {
                content.push_str(text);
            }
        }
        if let Some(call) = part.get("functionCall") {
            tool_calls.push(tool_call_from_function_call(call));
        }
    }
    false
}

/// Promote the first `<think>…</think>` block into reasoning and strip it
/// from the content. Running this on its own output changes nothing.
pub fn extract_think_block(content: String) -> (String, String) {
    let Some(captures) = THINK_RE.captures(&content) else {
        return (String::new(), content);
    };
    let reasoning = captures
        .get(1)
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let whole = captures.get(0).map(|m| m.as_str().to_string());
    let remaining = match whole {
        Some(block) => content.replacen(&block, "", 1).trim().to_string(),
        None => content,
    };
    (reasoning, remaining)
}

fn tool_call_from_function_call(call: &Value) -> ToolCall {
    let name = call
        .get("name")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown");
    let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
    ToolCall {
        id: stable_tool_call_id(call),
        call_type: "function".to_string(),
        function: FunctionCall {
            name: name.to_string(),
            arguments: serde_json::to_string(&args).unwrap_or_default(),
        },
    }
}

/// Deterministic id per distinct call payload so retried reads agree.
fn stable_tool_call_id(call: &Value) -> String {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    serde_json::to_string(call).unwrap_or_default().hash(&mut hasher);
    format!("call_{:x}", hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data_line(value: Value) -> Bytes {
        Bytes::from(format!(
            "data: {}\n",
            serde_json::to_string(&value).expect("serialize")
        ))
    }

    async fn collect(events: Vec<Bytes>) -> (ChatCompletionResponse, TokenUsage) {
        let events: Vec<Result<Bytes, std::convert::Infallible>> =
            events.into_iter().map(Ok).collect();
        collect_chat_response(Box::pin(futures::stream::iter(events)), "gemini-2.0-flash")
            .await
            .expect("collect")
    }

    #[tokio::test]
    async fn thought_parts_become_reasoning() {
        let (response, _) = collect(vec![
            data_line(json!({
                "response": { "candidates": [{ "content": { "parts": [
                    { "text": "pondering", "thought": true },
                    { "text": "answer" }
                ]}}]}
            })),
            Bytes::from("data: [DONE]\n"),
        ])
        .await;

        let message = &response.choices[0].message;
        assert_eq!(message.reasoning, "pondering");
        assert_eq!(message.content, "answer");
        assert_eq!(response.object, "chat.completion");
        assert!(response.id.starts_with("chatcmpl-"));
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
    }

    #[tokio::test]
    async fn think_tag_fallback_extracts_and_strips() {
        let (response, _) = collect(vec![data_line(json!({
            "response": { "candidates": [{ "content": { "parts": [
                { "text": "<think>because</think>final" }
            ]}}]}
        }))])
        .await;

        let message = &response.choices[0].message;
        assert_eq!(message.reasoning, "because");
        assert_eq!(message.content, "final");
    }

    #[tokio::test]
    async fn think_fallback_ignored_when_thought_parts_present() {
        let (response, _) = collect(vec![data_line(json!({
            "response": { "candidates": [{ "content": { "parts": [
                { "text": "real reasoning", "thought": true },
                { "text": "<think>not this</think>visible" }
            ]}}]}
        }))])
        .await;

        let message = &response.choices[0].message;
        assert_eq!(message.reasoning, "real reasoning");
        assert_eq!(message.content, "<think>not this</think>visible");
    }

    #[test]
    fn think_extraction_is_idempotent() {
        let (reasoning, content) =
            extract_think_block("<think>a\nmultiline\nthought</think>  rest".to_string());
        assert_eq!(reasoning, "a\nmultiline\nthought");
        assert_eq!(content, "rest");

        let (again_reasoning, again_content) = extract_think_block(content.clone());
        assert_eq!(again_reasoning, "");
        assert_eq!(again_content, content);
    }

    #[tokio::test]
    async fn usage_metadata_is_last_writer_wins() {
        let (response, raw) = collect(vec![
            data_line(json!({
                "response": {
                    "candidates": [{ "content": { "parts": [{ "text": "a" }] } }],
                    "usageMetadata": { "promptTokenCount": 1, "candidatesTokenCount": 1, "totalTokenCount": 2 }
                }
            })),
            data_line(json!({
                "response": {
                    "candidates": [{ "content": { "parts": [{ "text": "b" }] } }],
                    "usageMetadata": { "promptTokenCount": 5, "candidatesTokenCount": 7, "totalTokenCount": 12 }
                }
            })),
        ])
        .await;

        assert_eq!(raw.input_tokens, 5);
        assert_eq!(raw.output_tokens, 7);
        let usage = response.usage.expect("usage");
        assert_eq!(usage.prompt_tokens, 5);
        assert_eq!(usage.completion_tokens, 7);
        assert_eq!(usage.total_tokens, 12);
    }

    #[tokio::test]
    async fn missing_usage_falls_back_to_length_estimate() {
        let (response, raw) = collect(vec![data_line(json!({
            "response": { "candidates": [{ "content": { "parts": [
                { "text": "0123456789abcdef" }
            ]}}]}
        }))])
        .await;

        // The raw capture stays zero; only the reported usage is estimated.
        assert_eq!(raw, TokenUsage::default());
        let usage = response.usage.expect("usage");
        assert_eq!(usage.completion_tokens, 4);
        assert_eq!(usage.total_tokens, 4);
        assert_eq!(usage.prompt_tokens, 0);
    }

    #[tokio::test]
    async fn function_call_parts_assemble_tool_calls() {
        let (response, _) = collect(vec![
            data_line(json!({
                "response": { "candidates": [{ "content": { "parts": [
                    { "functionCall": { "name": "get_weather", "args": { "city": "Berlin" } } }
                ]}}]}
            })),
            data_line(json!({
                "response": { "candidates": [{ "content": { "parts": [
                    { "functionCall": { "name": "get_time", "args": {} } }
                ]}}]}
            })),
        ])
        .await;

        let calls = response.choices[0]
            .message
            .tool_calls
            .as_ref()
            .expect("tool calls");
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].call_type, "function");
        assert_eq!(calls[0].function.name, "get_weather");
        let args: Value = serde_json::from_str(&calls[0].function.arguments).expect("args json");
        assert_eq!(args["city"], "Berlin");
        assert!(calls[0].id.starts_with("call_"));
        assert_ne!(calls[0].id, calls[1].id);
    }

    #[tokio::test]
    async fn final_line_without_newline_is_consumed() {
        let (response, _) = collect(vec![Bytes::from(format!(
            "data: {}",
            json!({
                "response": { "candidates": [{ "content": { "parts": [{ "text": "tail" }] } }] }
            })
        ))])
        .await;

        assert_eq!(response.choices[0].message.content, "tail");
    }
}
