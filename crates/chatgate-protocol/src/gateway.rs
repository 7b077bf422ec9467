//! Gateway-specific bodies: the simplified `/chat` request, the structured
//! error envelope, and the session linkage added to completion responses.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::openai::create_chat_completions::types::{
    ChatCompletionMessageContent, ChatCompletionRequestMessage,
};

pub const ERROR_TYPE_SERVER: &str = "server_error";
pub const ERROR_TYPE_INVALID_REQUEST: &str = "invalid_request_error";
pub const ERROR_TYPE_AUTHENTICATION: &str = "authentication_error";
pub const ERROR_TYPE_CREDENTIALS_EXHAUSTED: &str = "credentials_exhausted";
pub const ERROR_TYPE_VERIFICATION: &str = "verification_required";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimpleChatRequestBody {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<ChatCompletionMessageContent>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<ChatCompletionRequestMessage>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<JsonValue>,
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorDetail {
    pub message: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: ErrorDetail,
    /// Present only when the upstream demanded interactive verification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verification: Option<bool>,
}

impl ErrorBody {
    pub fn new(message: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                message: message.into(),
                kind: kind.into(),
            },
            verification: None,
        }
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(message, ERROR_TYPE_SERVER)
    }
}

/// Wraps a response with the upstream session linkage a client needs to
/// continue the same conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WithSession<T> {
    #[serde(flatten)]
    pub inner: T,
    #[serde(rename = "chatId")]
    pub chat_id: String,
    #[serde(rename = "parentId")]
    pub parent_id: Option<String>,
}
