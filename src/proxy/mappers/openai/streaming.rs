//! Vendor SSE → OpenAI chat-completion chunk stream.
//!
//! Frames the upstream byte stream on newlines, decodes each `data:` payload,
//! and emits one OpenAI chunk per text part. Lines that are not data lines or
//! fail to decode are skipped; that tolerates keep-alive whitespace and
//! benign schema drift. Usage metadata is captured internally and recorded
//! against the account when the upstream stream ends, since the handler has
//! already returned the response by then.

use std::pin::Pin;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use chrono::Utc;
use futures::{Stream, StreamExt};
use serde_json::{json, Value};
use tracing::error;
use uuid::Uuid;

use crate::proxy::usage::UsageRecorder;

use super::models::TokenUsage;

pub fn create_chat_sse_stream(
    upstream: Pin<Box<dyn Stream<Item = Result<Bytes, reqwest::Error>> + Send>>,
    model: String,
    recorder: Arc<UsageRecorder>,
    account_id: String,
) -> Pin<Box<dyn Stream<Item = Result<Bytes, String>> + Send>> {
    let created = Utc::now().timestamp();

    let stream = async_stream::stream! {
        let mut upstream = upstream;
        let mut buffer = BytesMut::new();
        let mut usage = TokenUsage::default();
        let mut done = false;

        while !done {
            match upstream.next().await {
                Some(Ok(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    while let Some(pos) = buffer.iter().position(|&b| b == b'\n') {
                        let line_raw = buffer.split_to(pos + 1);
                        let Ok(line) = std::str::from_utf8(&line_raw) else {
                            continue;
                        };
                        let line = line.trim();
                        if !line.starts_with("data: ") {
                            continue;
                        }
                        let payload = line.trim_start_matches("data: ").trim();
                        if payload == "[DONE]" {
                            done = true;
                            break;
                        }
                        let Ok(mut event) = serde_json::from_str::<Value>(payload) else {
                            continue;
                        };
                        let data = if let Some(inner) = event.get_mut("response").map(|v| v.take())
                        {
                            inner
                        } else {
                            event
                        };

                        if let Some(metadata) = data.get("usageMetadata") {
                            usage = TokenUsage::from_metadata(metadata);
                        }

                        let parts = data
                            .get("candidates")
                            .and_then(|c| c.as_array())
                            .and_then(|c| c.first())
                            .and_then(|c| c.get("content"))
                            .and_then(|c| c.get("parts"))
                            .and_then(|p| p.as_array());
                        let Some(parts) = parts else { continue };

                        for part in parts {
                            let Some(text) = part.get("text").and_then(|t| t.as_str()) else {
                                continue;
                            };
                            let chunk = json!({
                                "id": format!("chatcmpl-{}", Uuid::new_v4()),
                                "object": "chat.completion.chunk",
                                "created": created,
                                "model": &model,
                                "choices": [{
                                    "index": 0,
                                    "delta": { "content": text },
                                }],
                            });
                            let line = format!(
                                "data: {}\n\n",
                                serde_json::to_string(&chunk).unwrap_or_default()
                            );
                            yield Ok::<Bytes, String>(Bytes::from(line));
                        }
                    }
                }
                Some(Err(e)) => {
                    error!(error = %e, "Upstream stream error");
                    break;
                }
                None => break,
            }
        }

        recorder
            .record(&account_id, usage.input_tokens, usage.output_tokens)
            .await;
        yield Ok::<Bytes, String>(Bytes::from("data: [DONE]\n\n"));
    };

    Box::pin(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Account;
    use crate::modules::auth::oauth::OAuthClient;
    use crate::modules::storage::{AccountStore, UsageStore};
    use crate::proxy::token_manager::AccountPool;

    fn data_line(value: Value) -> Bytes {
        Bytes::from(format!(
            "data: {}\n",
            serde_json::to_string(&value).expect("serialize")
        ))
    }

    fn recorder_with_account(dir: &std::path::Path) -> (Arc<UsageRecorder>, Arc<AccountPool>) {
        let store = AccountStore::new(dir.join("accounts"));
        store
            .save(&Account::new(
                "a_1".to_string(),
                "a@example.com".to_string(),
                "a".to_string(),
                "token".to_string(),
                "refresh".to_string(),
                7200,
            ))
            .expect("save");
        let pool = Arc::new(AccountPool::new(store, OAuthClient::new(8045)));
        let recorder = Arc::new(UsageRecorder::new(
            pool.clone(),
            UsageStore::new(dir.join("usage")),
        ));
        (recorder, pool)
    }

    async fn run_stream(
        events: Vec<Result<Bytes, reqwest::Error>>,
        recorder: Arc<UsageRecorder>,
    ) -> Vec<String> {
        let mut stream = create_chat_sse_stream(
            Box::pin(futures::stream::iter(events)),
            "gemini-2.0-flash".to_string(),
            recorder,
            "a_1".to_string(),
        );

        let mut lines = Vec::new();
        while let Some(item) = stream.next().await {
            let bytes = item.expect("stream item");
            lines.push(String::from_utf8(bytes.to_vec()).expect("utf8"));
        }
        lines
    }

    #[tokio::test]
    async fn emits_one_chunk_per_text_part_then_done() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (recorder, pool) = recorder_with_account(dir.path());

        let events = vec![
            Ok(data_line(json!({
                "response": {
                    "candidates": [{ "content": { "role": "model", "parts": [{ "text": "A" }] } }]
                }
            }))),
            Ok(data_line(json!({
                "response": {
                    "candidates": [{
                        "content": { "role": "model", "parts": [{ "text": "B" }] },
                        "finishReason": "STOP"
                    }],
                    "usageMetadata": { "promptTokenCount": 3, "candidatesTokenCount": 2, "totalTokenCount": 5 }
                }
            }))),
            Ok(Bytes::from("data: [DONE]\n")),
        ];

        let lines = run_stream(events, recorder).await;
        assert_eq!(lines.len(), 3);

        let first: Value =
            serde_json::from_str(lines[0].trim_start_matches("data: ").trim()).expect("chunk");
        assert_eq!(first["object"], "chat.completion.chunk");
        assert_eq!(first["model"], "gemini-2.0-flash");
        assert_eq!(first["choices"][0]["index"], 0);
        assert_eq!(first["choices"][0]["delta"]["content"], "A");
        assert!(first["id"].as_str().expect("id").starts_with("chatcmpl-"));

        let second: Value =
            serde_json::from_str(lines[1].trim_start_matches("data: ").trim()).expect("chunk");
        assert_eq!(second["choices"][0]["delta"]["content"], "B");
        // Each chunk carries its own freshly minted id.
        assert!(second["id"].as_str().expect("id").starts_with("chatcmpl-"));
        assert_ne!(second["id"], first["id"]);

        assert_eq!(lines[2], "data: [DONE]\n\n");

        // Captured usage lands on the account once the stream is drained.
        let account = pool.store().load("a_1").expect("load");
        assert_eq!(account.usage.request_count, 1);
        assert_eq!(account.usage.input_tokens, 3);
        assert_eq!(account.usage.output_tokens, 2);
        assert_eq!(account.usage.total_tokens, 5);
    }

    #[tokio::test]
    async fn non_data_and_undecodable_lines_are_skipped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (recorder, _pool) = recorder_with_account(dir.path());

        let events = vec![
            Ok(Bytes::from(": keep-alive\n\n")),
            Ok(Bytes::from("data: { not json\n")),
            Ok(data_line(json!({
                "response": {
                    "candidates": [{ "content": { "parts": [{ "text": "ok" }] } }]
                }
            }))),
        ];

        let lines = run_stream(events, recorder).await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"ok\""));
        assert_eq!(lines[1], "data: [DONE]\n\n");
    }

    #[tokio::test]
    async fn events_split_across_reads_reassemble() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (recorder, _pool) = recorder_with_account(dir.path());

        let whole = data_line(json!({
            "response": { "candidates": [{ "content": { "parts": [{ "text": "spliced" }] } }] }
        }));
        let half = whole.len() / 2;
        let events = vec![
            Ok(whole.slice(0..half)),
            Ok(whole.slice(half..whole.len())),
        ];

        let lines = run_stream(events, recorder).await;
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("spliced"));
    }

    #[tokio::test]
    async fn unwrapped_events_without_response_envelope_still_parse() {
        let dir = tempfile::tempdir().expect("tempdir");
        let (recorder, _pool) = recorder_with_account(dir.path());

        let events = vec![Ok(data_line(json!({
            "candidates": [{ "content": { "parts": [{ "text": "bare" }] } }]
        })))];

        let lines = run_stream(events, recorder).await;
        assert!(lines[0].contains("bare"));
    }
}
