use crate::config::ServiceConfig;
use crate::error::{ClientError, ClientResult};
use crate::types::{OutgoingMessage, PromptExchange};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

#[derive(Serialize)]
struct RunRequest<'a> {
    messages: &'a [Value],
}

#[derive(Deserialize)]
struct RunResponse {
    #[serde(default, rename = "finalText")]
    final_text: String,
    #[serde(default, rename = "totalTokens")]
    total_tokens: TokenUsage,
    #[serde(default)]
    messages: Vec<Value>,
}

#[derive(Deserialize, Default)]
struct TokenUsage {
    #[serde(default)]
    total: u64,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: Option<String>,
}

/// Client for the agent test endpoint.
pub struct AgentClient {
    http: reqwest::Client,
    endpoint: String,
}

impl AgentClient {
    pub fn new(config: &ServiceConfig) -> ClientResult<Self> {
        config
            .validate()
            .map_err(|message| ClientError::InvalidConfig { message })?;

        let http = reqwest::Client::builder()
            .timeout(config.agent_timeout)
            .build()?;

        let endpoint = format!(
            "{}/api/test/run",
            config.agent_base_url.trim_end_matches('/')
        );

        Ok(Self { http, endpoint })
    }

    /// Send one prompt turn, optionally continuing a prior conversation.
    ///
    /// Returns the agent's final text, the token count for the turn, and the
    /// updated history: the sent messages plus the turn's replayable
    /// responses. Tool-invocation messages are dropped from the returned
    /// history because they are not valid conversation context for the next
    /// turn.
    pub async fn send_prompt(
        &self,
        prompt: &str,
        history: &[Value],
    ) -> ClientResult<PromptExchange> {
        let envelope = serde_json::to_value(OutgoingMessage::user(prompt))?;
        let mut messages: Vec<Value> = history.to_vec();
        messages.push(envelope);

        debug!(endpoint = %self.endpoint, turn_messages = messages.len(), "sending prompt");

        let response = self
            .http
            .post(&self.endpoint)
            .json(&RunRequest {
                messages: &messages,
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let reason = status
                .canonical_reason()
                .unwrap_or("request failed")
                .to_string();
            let body = response.text().await.unwrap_or_default();
            let detail = if body.is_empty() {
                reason
            } else {
                serde_json::from_str::<ErrorBody>(&body)
                    .ok()
                    .and_then(|parsed| parsed.error)
                    .unwrap_or(reason)
            };
            return Err(ClientError::Agent(detail));
        }

        let body: RunResponse = response.json().await?;

        messages.extend(body.messages.into_iter().filter(is_replayable));

        Ok(PromptExchange {
            final_text: body.final_text,
            total_tokens: body.total_tokens.total,
            messages,
        })
    }
}

fn is_replayable(message: &Value) -> bool {
    matches!(
        message.get("role").and_then(Value::as_str),
        Some("user" | "assistant")
    )
}
