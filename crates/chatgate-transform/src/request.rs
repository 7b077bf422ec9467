use serde_json::Value as JsonValue;
use uuid::Uuid;

use chatgate_protocol::upstream::chat::{
    CHAT_MODE_NORMAL, CHAT_TYPE_TEXT, CreateChatPayload, USER_ACTION_CHAT, UpstreamChatMessage,
    UpstreamChatPayload, UpstreamContent, UpstreamFeatureConfig, UpstreamMessageExtra,
    UpstreamMessageMeta,
};

use crate::unix_now;

/// One user turn, already validated and resolved to an upstream model.
#[derive(Debug, Clone)]
pub struct ChatTurn {
    pub content: UpstreamContent,
    pub model: String,
    pub chat_id: String,
    pub parent_id: Option<String>,
    pub files: Vec<JsonValue>,
    pub tools: Option<Vec<JsonValue>>,
    pub tool_choice: Option<JsonValue>,
}

/// Builds the upstream send payload. Every call mints a fresh message id and
/// a reserved id for the reply, so a retried turn never reuses ids.
pub fn build_chat_payload(turn: &ChatTurn) -> UpstreamChatPayload {
    let (now_secs, _) = unix_now();
    build_chat_payload_at(turn, now_secs)
}

pub fn build_chat_payload_at(turn: &ChatTurn, now_secs: i64) -> UpstreamChatPayload {
    let message = UpstreamChatMessage {
        fid: Uuid::new_v4().to_string(),
        parent_id_camel: turn.parent_id.clone(),
        parent_id: turn.parent_id.clone(),
        role: "user".to_string(),
        content: turn.content.clone(),
        chat_type: CHAT_TYPE_TEXT.to_string(),
        sub_chat_type: CHAT_TYPE_TEXT.to_string(),
        timestamp: now_secs,
        user_action: USER_ACTION_CHAT.to_string(),
        models: vec![turn.model.clone()],
        files: turn.files.clone(),
        children_ids: vec![Uuid::new_v4().to_string()],
        extra: UpstreamMessageExtra {
            meta: UpstreamMessageMeta {
                sub_chat_type: CHAT_TYPE_TEXT.to_string(),
            },
        },
        feature_config: UpstreamFeatureConfig::default(),
    };

    let (tools, tool_choice) = match turn.tools.as_ref().filter(|tools| !tools.is_empty()) {
        Some(tools) => (
            Some(tools.clone()),
            Some(
                turn.tool_choice
                    .clone()
                    .unwrap_or_else(|| JsonValue::String("auto".to_string())),
            ),
        ),
        None => (None, None),
    };

    UpstreamChatPayload {
        stream: true,
        incremental_output: true,
        chat_id: turn.chat_id.clone(),
        chat_mode: CHAT_MODE_NORMAL.to_string(),
        messages: vec![message],
        model: turn.model.clone(),
        parent_id: turn.parent_id.clone(),
        timestamp: now_secs,
        tools,
        tool_choice,
    }
}

pub fn build_create_chat_payload(model: &str) -> CreateChatPayload {
    let (_, now_ms) = unix_now();
    CreateChatPayload::new(model, now_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn turn(tools: Option<Vec<JsonValue>>, tool_choice: Option<JsonValue>) -> ChatTurn {
        ChatTurn {
            content: UpstreamContent::Text("hi".into()),
            model: "qwen-max-latest".into(),
            chat_id: "chat-1".into(),
            parent_id: None,
            files: Vec::new(),
            tools,
            tool_choice,
        }
    }

    #[test]
    fn fresh_ids_per_payload() {
        let turn = turn(None, None);
        let first = build_chat_payload_at(&turn, 10);
        let second = build_chat_payload_at(&turn, 10);
        assert_ne!(first.messages[0].fid, second.messages[0].fid);
        assert_ne!(
            first.messages[0].children_ids[0],
            second.messages[0].children_ids[0]
        );
        assert_ne!(first.messages[0].fid, first.messages[0].children_ids[0]);
    }

    #[test]
    fn tools_only_when_non_empty() {
        let empty = build_chat_payload_at(&turn(Some(Vec::new()), Some(json!("none"))), 1);
        let value = serde_json::to_value(&empty).unwrap();
        assert!(value.get("tools").is_none());
        assert!(value.get("tool_choice").is_none());

        let with_tools = build_chat_payload_at(&turn(Some(vec![json!({"type":"function"})]), None), 1);
        let value = serde_json::to_value(&with_tools).unwrap();
        assert_eq!(value["tools"].as_array().map(Vec::len), Some(1));
        assert_eq!(value["tool_choice"], "auto");
    }

    #[test]
    fn envelope_fields() {
        let mut turn = turn(None, None);
        turn.parent_id = Some("resp-0".into());
        let value = serde_json::to_value(build_chat_payload_at(&turn, 42)).unwrap();
        assert_eq!(value["stream"], true);
        assert_eq!(value["incremental_output"], true);
        assert_eq!(value["chat_id"], "chat-1");
        assert_eq!(value["chat_mode"], "normal");
        assert_eq!(value["parent_id"], "resp-0");
        assert_eq!(value["timestamp"], 42);
        assert_eq!(value["messages"][0]["parentId"], "resp-0");
        assert_eq!(value["messages"][0]["models"][0], "qwen-max-latest");
    }

    #[test]
    fn null_parent_is_serialized() {
        let value = serde_json::to_value(build_chat_payload_at(&turn(None, None), 1)).unwrap();
        assert!(value["parent_id"].is_null());
        assert!(value["messages"][0]["parent_id"].is_null());
    }
}
