use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const CHAT_TYPE_TEXT: &str = "t2t";
pub const CHAT_MODE_NORMAL: &str = "normal";
pub const USER_ACTION_CHAT: &str = "chat";

/// Message content as the upstream accepts it: plain text or ordered parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpstreamContent {
    Text(String),
    Parts(Vec<UpstreamContentPart>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UpstreamContentPart {
    Text { text: String },
    Image { image: String },
    File { file: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpstreamMessageMeta {
    pub sub_chat_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamMessageExtra {
    pub meta: UpstreamMessageMeta,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamFeatureConfig {
    pub thinking_enabled: bool,
    pub output_schema: String,
}

impl Default for UpstreamFeatureConfig {
    fn default() -> Self {
        Self {
            thinking_enabled: false,
            output_schema: "phase".to_string(),
        }
    }
}

/// One user turn. The upstream reads the parent link under both spellings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamChatMessage {
    pub fid: String,
    #[serde(rename = "parentId")]
    pub parent_id_camel: Option<String>,
    pub parent_id: Option<String>,
    pub role: String,
    pub content: UpstreamContent,
    pub chat_type: String,
    pub sub_chat_type: String,
    /// Unix seconds.
    pub timestamp: i64,
    pub user_action: String,
    pub models: Vec<String>,
    #[serde(default)]
    pub files: Vec<JsonValue>,
    #[serde(rename = "childrenIds")]
    pub children_ids: Vec<String>,
    pub extra: UpstreamMessageExtra,
    pub feature_config: UpstreamFeatureConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamChatPayload {
    pub stream: bool,
    pub incremental_output: bool,
    pub chat_id: String,
    pub chat_mode: String,
    pub messages: Vec<UpstreamChatMessage>,
    pub model: String,
    pub parent_id: Option<String>,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<JsonValue>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<JsonValue>,
}

/// Body of `POST /api/v2/chats/new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateChatPayload {
    pub title: String,
    pub models: Vec<String>,
    pub chat_mode: String,
    pub chat_type: String,
    /// Unix milliseconds.
    pub timestamp: i64,
}

impl CreateChatPayload {
    pub fn new(model: impl Into<String>, timestamp_ms: i64) -> Self {
        Self {
            title: "New Chat".to_string(),
            models: vec![model.into()],
            chat_mode: CHAT_MODE_NORMAL.to_string(),
            chat_type: CHAT_TYPE_TEXT.to_string(),
            timestamp: timestamp_ms,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateChatData {
    #[serde(default)]
    pub id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CreateChatResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default)]
    pub data: Option<CreateChatData>,
}

impl CreateChatResponse {
    /// The new upstream session id, only when the upstream reported success.
    pub fn chat_id(&self) -> Option<&str> {
        if !self.success {
            return None;
        }
        self.data
            .as_ref()
            .and_then(|data| data.id.as_deref())
            .filter(|id| !id.is_empty())
    }
}
