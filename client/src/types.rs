use chrono::Utc;
use serde::{Deserialize, Serialize};

/// One tabular record returned by a SQL execution.
///
/// Keys are column names; values keep whatever JSON type the execution
/// service reported.
pub type Row = serde_json::Map<String, serde_json::Value>;

/// A single content part of an outgoing conversation message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MessagePart {
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

impl MessagePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: "text".to_string(),
            text: text.into(),
        }
    }
}

/// The message envelope sent to the agent endpoint for one turn.
///
/// Messages coming back from the agent are kept as raw JSON values so they
/// can be replayed verbatim as conversation history; only outgoing messages
/// are built through this type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutgoingMessage {
    pub id: String,
    pub role: String,
    pub parts: Vec<MessagePart>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

impl OutgoingMessage {
    pub fn user(text: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: format!("msg_{}", now.timestamp_millis()),
            role: "user".to_string(),
            parts: vec![MessagePart::text(text)],
            created_at: now.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
        }
    }
}

/// Outcome of one prompt turn against the agent.
#[derive(Debug, Clone)]
pub struct PromptExchange {
    /// The agent's final response text for this turn.
    pub final_text: String,
    /// Tokens consumed by this turn as reported by the agent.
    pub total_tokens: u64,
    /// Sent history plus the replayable messages produced by this turn.
    pub messages: Vec<serde_json::Value>,
}
