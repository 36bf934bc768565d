//! OpenAI request → vendor cloud-code request.
//!
//! The translation itself is pure and deterministic: all randomness lives in
//! [`RequestEnvelope::generate`], so one envelope + one request always yields
//! the same vendor body byte for byte. The translator never fails; malformed
//! caller input degrades to empty text or dropped parts.

use rand::Rng;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::constants::{
    ANSWER_RESERVE_TOKENS, PROJECT_ADJECTIVES, PROJECT_NOUNS, STOP_SEQUENCES, THINKING_BUDGET,
};

use super::models::{ChatCompletionRequest, ContentPart, MessageContent};

/// Per-request identity fields sent alongside the translated body.
#[derive(Debug, Clone)]
pub struct RequestEnvelope {
    /// Synthetic pseudo-id such as "useful-wave-41023".
    pub project: String,
    pub request_id: String,
    pub session_id: String,
}

impl RequestEnvelope {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let adjective = PROJECT_ADJECTIVES[rng.gen_range(0..PROJECT_ADJECTIVES.len())];
        let noun = PROJECT_NOUNS[rng.gen_range(0..PROJECT_NOUNS.len())];
        Self {
            project: format!("{}-{}-{}", adjective, noun, rng.gen_range(0..100_000)),
            request_id: format!("agent-{}", Uuid::new_v4()),
            session_id: format!("-{}", rng.gen_range(0..i64::MAX)),
        }
    }
}

/// Thinking is on for the `-thinking` alias plus the pro models that always
/// emit thoughts upstream.
pub fn thinking_enabled(model: &str) -> bool {
    model.ends_with("-thinking") || model == "gemini-2.5-pro" || model.starts_with("gemini-3-pro-")
}

pub fn transform_chat_request(request: &ChatCompletionRequest, envelope: &RequestEnvelope) -> Value {
    let enable_thinking = thinking_enabled(&request.model);
    let model_name = request
        .model
        .strip_suffix("-thinking")
        .unwrap_or(&request.model);

    let mut contents: Vec<Value> = Vec::new();
    let mut system_instruction: Option<Value> = None;

    for message in &request.messages {
        if message.role == "system" {
            let text = message
                .content
                .as_ref()
                .map(content_text)
                .unwrap_or_default();
            system_instruction = Some(json!({
                "role": "user",
                "parts": [{ "text": text }],
            }));
            continue;
        }

        let mut parts: Vec<Value> = Vec::new();
        match &message.content {
            Some(MessageContent::Text(text)) => parts.push(json!({ "text": text })),
            Some(MessageContent::Parts(list)) => {
                for part in list {
                    match part {
                        ContentPart::Text { text } => parts.push(json!({ "text": text })),
                        ContentPart::ImageUrl { image_url } => {
                            if let Some((mime_type, data)) = parse_data_url(&image_url.url) {
                                parts.push(json!({
                                    "inlineData": { "mimeType": mime_type, "data": data }
                                }));
                            }
                        }
                        ContentPart::Unknown => {}
                    }
                }
            }
            None => {}
        }

        let role = if message.role == "assistant" {
            "model"
        } else {
            message.role.as_str()
        };
        contents.push(json!({ "role": role, "parts": parts }));
    }

    let mut generation_config = json!({
        "candidateCount": 1,
        "stopSequences": STOP_SEQUENCES,
    });
    if let Some(temperature) = request.temperature {
        generation_config["temperature"] = json!(temperature);
    }
    if let Some(top_p) = request.top_p {
        generation_config["topP"] = json!(top_p);
    }
    if let Some(top_k) = request.top_k {
        generation_config["topK"] = json!(top_k);
    }
    if let Some(max_tokens) = request.max_tokens {
        generation_config["maxOutputTokens"] = json!(max_tokens);
    }

    if enable_thinking {
        generation_config["thinkingConfig"] = json!({
            "includeThoughts": true,
            "thinkingBudget": THINKING_BUDGET,
        });
        // The visible answer needs room beyond the thinking budget.
        let current_max = generation_config
            .get("maxOutputTokens")
            .and_then(|v| v.as_i64());
        if current_max.map_or(true, |max| max <= THINKING_BUDGET) {
            generation_config["maxOutputTokens"] = json!(THINKING_BUDGET + ANSWER_RESERVE_TOKENS);
        }
    }

    let mut inner = json!({
        "contents": contents,
        "generationConfig": generation_config,
        "sessionId": envelope.session_id,
    });
    if let Some(instruction) = system_instruction {
        inner["systemInstruction"] = instruction;
    }

    if let Some(tools) = &request.tools {
        let declarations: Vec<Value> = tools
            .iter()
            .filter(|tool| tool.tool_type == "function")
            .map(|tool| {
                let mut declaration = json!({ "name": tool.function.name });
                if let Some(description) = &tool.function.description {
                    declaration["description"] = json!(description);
                }
                if let Some(parameters) = &tool.function.parameters {
                    declaration["parameters"] = parameters.clone();
                }
                declaration
            })
            .collect();
        if !declarations.is_empty() {
            inner["tools"] = json!([{ "functionDeclarations": declarations }]);
        }
    }

    json!({
        "project": envelope.project,
        "requestId": envelope.request_id,
        "model": model_name,
        "userAgent": "antigravity",
        "request": inner,
    })
}

fn content_text(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => parts
            .iter()
            .filter_map(|part| match part {
                ContentPart::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// `data:{mime};base64,{payload}` → (mime, payload). Anything else is dropped.
fn parse_data_url(url: &str) -> Option<(&str, &str)> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, data) = rest.split_once(";base64,")?;
    Some((mime_type, data))
}
