use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::openai::create_chat_completions::types::CompletionUsage;

pub const STATUS_FINISHED: &str = "finished";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseCreated {
    #[serde(default)]
    pub response_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamDelta {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamStreamChoice {
    #[serde(default)]
    pub delta: Option<UpstreamDelta>,
}

/// One `data:` line of the upstream event stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamStreamChunk {
    #[serde(rename = "response.created", default)]
    pub response_created: Option<ResponseCreated>,
    #[serde(default)]
    pub choices: Vec<UpstreamStreamChoice>,
    #[serde(default)]
    pub usage: Option<JsonValue>,
}

impl UpstreamStreamChunk {
    pub fn first_delta(&self) -> Option<&UpstreamDelta> {
        self.choices.first().and_then(|choice| choice.delta.as_ref())
    }

    pub fn is_finished(&self) -> bool {
        self.first_delta()
            .and_then(|delta| delta.status.as_deref())
            .is_some_and(|status| status == STATUS_FINISHED)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamDocumentMessage {
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamDocumentChoice {
    #[serde(default)]
    pub message: Option<UpstreamDocumentMessage>,
}

/// Single JSON document returned when the upstream does not stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpstreamCompletionDocument {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub response_id: Option<String>,
    #[serde(default)]
    pub choices: Vec<UpstreamDocumentChoice>,
    #[serde(default)]
    pub usage: Option<JsonValue>,
}

impl UpstreamCompletionDocument {
    pub fn content(&self) -> Option<&str> {
        self.choices
            .first()
            .and_then(|choice| choice.message.as_ref())
            .and_then(|message| message.content.as_deref())
    }
}

fn int_field(value: &JsonValue, keys: &[&str]) -> Option<i64> {
    keys.iter()
        .find_map(|key| value.get(*key).and_then(JsonValue::as_i64))
}

/// Reads an upstream usage object. Field names vary between upstream
/// revisions and `{}` is common; missing counters are zero.
pub fn normalize_usage(value: &JsonValue) -> CompletionUsage {
    let prompt_tokens = int_field(value, &["prompt_tokens", "input_tokens"]).unwrap_or(0);
    let completion_tokens =
        int_field(value, &["completion_tokens", "output_tokens"]).unwrap_or(0);
    let total_tokens =
        int_field(value, &["total_tokens"]).unwrap_or(prompt_tokens + completion_tokens);
    CompletionUsage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_created_and_finished_chunks() {
        let created: UpstreamStreamChunk =
            serde_json::from_str(r#"{"response.created":{"response_id":"r-1"}}"#).unwrap();
        assert_eq!(
            created.response_created.and_then(|c| c.response_id).as_deref(),
            Some("r-1")
        );

        let finished: UpstreamStreamChunk = serde_json::from_str(
            r#"{"choices":[{"delta":{"content":"","status":"finished"}}]}"#,
        )
        .unwrap();
        assert!(finished.is_finished());
    }

    #[test]
    fn usage_accepts_input_output_aliases() {
        let usage = normalize_usage(&json!({"input_tokens": 3, "output_tokens": 5}));
        assert_eq!(usage.prompt_tokens, 3);
        assert_eq!(usage.completion_tokens, 5);
        assert_eq!(usage.total_tokens, 8);

        assert_eq!(normalize_usage(&json!({})), CompletionUsage::default());
    }
}
