// Copyright 2025 Sushanth (https://github.com/sushanthpy)
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Anthropic messages API client used by the compression agent.

use async_trait::async_trait;
use recall_core::{MessageType, PendingMessage};
use recall_worker::{
    AgentConfig, AgentError, CompressedObservation, CompressedSummary, CompressionClient,
    CompressionOutput, SessionContext,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Tool payloads longer than this are cut before they reach the prompt.
const MAX_PAYLOAD_CHARS: usize = 8_000;

const SYSTEM_PROMPT: &str = "You compress activity from a coding session into long-term memory. \
Reply with exactly one JSON object and no other text.\n\
For tool activity worth remembering reply with \
{\"kind\":\"observation\",\"type\":\"decision|bugfix|feature|refactor|discovery|change\",\
\"title\":\"...\",\"subtitle\":\"...\",\"narrative\":\"...\",\"facts\":[\"...\"],\
\"concepts\":[\"...\"],\"files_read\":[\"...\"],\"files_modified\":[\"...\"]}.\n\
For routine activity with nothing to learn reply with {\"kind\":\"skip\"}.\n\
When asked for a session summary reply with \
{\"kind\":\"summary\",\"request\":\"...\",\"investigated\":\"...\",\"learned\":\"...\",\
\"completed\":\"...\",\"next_steps\":\"...\",\"notes\":\"...\"}.";

/// What the model is asked to return.
#[derive(Debug, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum ModelReply {
    Observation(CompressedObservation),
    Summary(CompressedSummary),
    Skip,
}

impl From<ModelReply> for CompressionOutput {
    fn from(reply: ModelReply) -> Self {
        match reply {
            ModelReply::Observation(obs) => CompressionOutput::Observation(obs),
            ModelReply::Summary(summary) => CompressionOutput::Summary(summary),
            ModelReply::Skip => CompressionOutput::Skip,
        }
    }
}

pub struct AnthropicCompressionClient {
    client: reqwest::Client,
    config: AgentConfig,
}

impl AnthropicCompressionClient {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| AgentError::Config(e.to_string()))?;
        Ok(Self { client, config })
    }

    pub fn has_api_key(&self) -> bool {
        self.config.api_key.is_some()
    }

    fn endpoint(&self) -> String {
        format!("{}/v1/messages", self.config.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl CompressionClient for AnthropicCompressionClient {
    async fn compress(
        &self,
        session: &SessionContext,
        message: &PendingMessage,
    ) -> Result<CompressionOutput, AgentError> {
        let api_key = self
            .config
            .api_key
            .as_deref()
            .ok_or_else(|| AgentError::Config("ANTHROPIC_API_KEY is not set".to_string()))?;

        let body = json!({
            "model": self.config.model,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "system": SYSTEM_PROMPT,
            "messages": [{"role": "user", "content": build_prompt(session, message)}],
        });

        let response = self
            .client
            .post(self.endpoint())
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| AgentError::Llm(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(AgentError::Llm(format!("{}: {}", status.as_u16(), text)));
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| AgentError::Parse(e.to_string()))?;
        let text = reply_text(&json)
            .ok_or_else(|| AgentError::Parse("response has no text content".to_string()))?;

        debug!(
            message_id = message.id,
            input_tokens = json["usage"]["input_tokens"].as_u64(),
            output_tokens = json["usage"]["output_tokens"].as_u64(),
            "Compression reply received"
        );

        parse_reply(text)
    }

    fn model_name(&self) -> &str {
        &self.config.model
    }
}

fn build_prompt(session: &SessionContext, message: &PendingMessage) -> String {
    let mut prompt = format!("Project: {}\n", session.project);
    if let Some(cwd) = &message.cwd {
        prompt.push_str(&format!("Working directory: {cwd}\n"));
    }

    match message.message_type {
        MessageType::Observation => {
            prompt.push_str(&format!(
                "Tool: {}\nInput:\n{}\nResponse:\n{}\n",
                message.tool_name.as_deref().unwrap_or("unknown"),
                truncate(message.tool_input.as_deref().unwrap_or("")),
                truncate(message.tool_response.as_deref().unwrap_or("")),
            ));
        }
        MessageType::Summarize => {
            prompt.push_str("Write the session summary.\n");
            if let Some(last) = &message.last_assistant_message {
                prompt.push_str(&format!("Last assistant message:\n{}\n", truncate(last)));
            }
        }
    }
    prompt
}

fn truncate(text: &str) -> &str {
    match text.char_indices().nth(MAX_PAYLOAD_CHARS) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// First text block of a messages API response.
fn reply_text(response: &Value) -> Option<&str> {
    response["content"]
        .as_array()?
        .iter()
        .find(|block| block["type"] == "text")
        .and_then(|block| block["text"].as_str())
}

/// Parse the model's JSON object, tolerating prose or code fences around it.
fn parse_reply(text: &str) -> Result<CompressionOutput, AgentError> {
    let start = text.find('{');
    let end = text.rfind('}');
    let object = match (start, end) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => return Err(AgentError::Parse("reply contains no JSON object".to_string())),
    };
    let reply: ModelReply = serde_json::from_str(object)?;
    Ok(reply.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::HeaderMap, routing::post, Json, Router};
    use recall_core::{MessageStatus, ObservationType};

    fn message(message_type: MessageType) -> PendingMessage {
        PendingMessage {
            id: 1,
            session_db_id: 1,
            content_session_id: "content-1".to_string(),
            message_type,
            tool_name: Some("Edit".to_string()),
            tool_input: Some(r#"{"file_path":"src/lib.rs"}"#.to_string()),
            tool_response: Some(r#"{"ok":true}"#.to_string()),
            cwd: Some("/work/recall".to_string()),
            last_assistant_message: Some("Done with the refactor".to_string()),
            prompt_number: Some(1),
            status: MessageStatus::Processing,
            retry_count: 0,
            created_at_epoch: 0,
            started_processing_at_epoch: Some(0),
            completed_at_epoch: None,
            failed_at_epoch: None,
            project: None,
        }
    }

    fn session() -> SessionContext {
        SessionContext {
            session_db_id: 1,
            content_session_id: "content-1".to_string(),
            project: "recall".to_string(),
        }
    }

    #[test]
    fn test_parse_observation_inside_fences() {
        let text = "```json\n{\"kind\":\"observation\",\"type\":\"bugfix\",\"title\":\"Fix race\",\"facts\":[\"lock order\"]}\n```";
        match parse_reply(text).unwrap() {
            CompressionOutput::Observation(obs) => {
                assert_eq!(obs.obs_type, ObservationType::Bugfix);
                assert_eq!(obs.title.as_deref(), Some("Fix race"));
                assert_eq!(obs.facts, vec!["lock order".to_string()]);
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn test_parse_skip_and_summary() {
        assert_eq!(
            parse_reply(r#"{"kind":"skip"}"#).unwrap(),
            CompressionOutput::Skip
        );
        match parse_reply(r#"{"kind":"summary","request":"Add login","next_steps":"tests"}"#)
            .unwrap()
        {
            CompressionOutput::Summary(summary) => {
                assert_eq!(summary.request.as_deref(), Some("Add login"));
                assert_eq!(summary.next_steps.as_deref(), Some("tests"));
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(
            parse_reply("I could not find anything."),
            Err(AgentError::Parse(_))
        ));
        assert!(matches!(
            parse_reply(r#"{"kind":"poem"}"#),
            Err(AgentError::Parse(_))
        ));
    }

    #[test]
    fn test_prompt_mentions_tool_and_truncates() {
        let mut msg = message(MessageType::Observation);
        msg.tool_response = Some("x".repeat(MAX_PAYLOAD_CHARS + 100));
        let prompt = build_prompt(&session(), &msg);
        assert!(prompt.contains("Tool: Edit"));
        assert!(prompt.contains("Project: recall"));
        assert!(prompt.len() < MAX_PAYLOAD_CHARS + 500);

        let prompt = build_prompt(&session(), &message(MessageType::Summarize));
        assert!(prompt.contains("Done with the refactor"));
    }

    #[tokio::test]
    async fn test_missing_api_key_is_a_config_error() {
        let client = AnthropicCompressionClient::new(AgentConfig::default()).unwrap();
        assert!(!client.has_api_key());
        let result = client
            .compress(&session(), &message(MessageType::Observation))
            .await;
        assert!(matches!(result, Err(AgentError::Config(_))));
    }

    #[tokio::test]
    async fn test_compress_against_local_endpoint() {
        let app = Router::new().route(
            "/v1/messages",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["x-api-key"], "test-key");
                assert_eq!(headers["anthropic-version"], ANTHROPIC_VERSION);
                assert_eq!(body["model"], "test-model");
                Json(json!({
                    "content": [{
                        "type": "text",
                        "text": "{\"kind\":\"observation\",\"type\":\"feature\",\"title\":\"Add parser\"}"
                    }],
                    "usage": {"input_tokens": 10, "output_tokens": 5}
                }))
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let config = AgentConfig {
            model: "test-model".to_string(),
            api_key: Some("test-key".to_string()),
            base_url: format!("http://{addr}/"),
            ..Default::default()
        };
        let client = AnthropicCompressionClient::new(config).unwrap();
        assert_eq!(client.model_name(), "test-model");

        match client
            .compress(&session(), &message(MessageType::Observation))
            .await
            .unwrap()
        {
            CompressionOutput::Observation(obs) => {
                assert_eq!(obs.obs_type, ObservationType::Feature);
                assert_eq!(obs.title.as_deref(), Some("Add parser"));
            }
            other => panic!("unexpected output: {other:?}"),
        }
    }
}
