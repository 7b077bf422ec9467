use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::openai::create_chat_completions::types::ChatCompletionRequestMessage;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct CreateChatCompletionRequestBody {
    /// A list of messages comprising the conversation so far.
    pub messages: Vec<ChatCompletionRequestMessage>,
    /// Model name as requested by the client; empty selects the default model.
    #[serde(default)]
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream: Option<bool>,
    /// Tool specs are forwarded to the upstream untouched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<JsonValue>>,
    /// Deprecated function specs; wrapped into `tools` when `tools` is absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub functions: Option<Vec<JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<JsonValue>,
    /// Already-uploaded upstream file descriptors, passed through as-is.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<JsonValue>,
    /// Upstream session to continue; a new one is created when absent.
    #[serde(
        default,
        rename = "chatId",
        alias = "chat_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub chat_id: Option<String>,
    #[serde(
        default,
        rename = "parentId",
        alias = "parent_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub parent_id: Option<String>,
}

impl CreateChatCompletionRequestBody {
    pub fn is_stream(&self) -> bool {
        self.stream.unwrap_or(false)
    }
}
