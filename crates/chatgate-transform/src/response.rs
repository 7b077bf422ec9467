use serde_json::Value as JsonValue;

use chatgate_protocol::openai::create_chat_completions::response::{
    ChatCompletionChoice, ChatCompletionObjectType, CreateChatCompletionResponse,
};
use chatgate_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionResponseMessage, ChatCompletionResponseRole,
    CompletionUsage,
};
use chatgate_protocol::sse::SseLineDecoder;
use chatgate_protocol::upstream::event::{
    UpstreamCompletionDocument, UpstreamStreamChunk, normalize_usage,
};

use crate::errors::TransformError;
use crate::unix_now;

/// Canonical result of one upstream turn, whatever shape the upstream used.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: String,
    /// Upstream reply id; the client sends it back as `parentId`.
    pub response_id: Option<String>,
    pub content: String,
    pub usage: CompletionUsage,
    pub model: String,
    pub created: i64,
}

impl Completion {
    pub fn to_response(&self) -> CreateChatCompletionResponse {
        CreateChatCompletionResponse {
            id: self.id.clone(),
            object: ChatCompletionObjectType::ChatCompletion,
            created: self.created,
            model: self.model.clone(),
            choices: vec![ChatCompletionChoice {
                index: 0,
                message: ChatCompletionResponseMessage {
                    role: ChatCompletionResponseRole::Assistant,
                    content: Some(self.content.clone()),
                },
                finish_reason: ChatCompletionFinishReason::Stop,
            }],
            usage: Some(self.usage.clone()),
        }
    }
}

fn fallback_id(now_ms: i64) -> String {
    format!("chatcmpl-{now_ms}")
}

/// Raw bytes kept while no event has decoded, so a body that turns out not
/// to be an event stream can still be classified.
const RAW_HEAD_LIMIT: usize = 64 * 1024;

/// Accumulates the upstream event stream.
///
/// Input may be split at any byte offset; the outcome only depends on the
/// concatenated bytes. Reading stops at the first chunk whose delta status
/// is `finished`; anything after it is ignored.
#[derive(Debug, Default)]
pub struct UpstreamStreamState {
    decoder: SseLineDecoder,
    content: String,
    response_id: Option<String>,
    usage: Option<JsonValue>,
    finished: bool,
    decoded_any: bool,
    raw_head: Vec<u8>,
}

impl UpstreamStreamState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds raw bytes; returns `true` once the terminal status was seen.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> bool {
        if self.finished {
            return true;
        }
        if !self.decoded_any && self.raw_head.len() < RAW_HEAD_LIMIT {
            let room = RAW_HEAD_LIMIT - self.raw_head.len();
            self.raw_head
                .extend_from_slice(&bytes[..bytes.len().min(room)]);
        }
        for payload in self.decoder.push_bytes(bytes) {
            self.push_payload(&payload);
            if self.finished {
                break;
            }
        }
        self.finished
    }

    fn push_payload(&mut self, payload: &str) {
        let Ok(chunk) = serde_json::from_str::<UpstreamStreamChunk>(payload) else {
            return;
        };
        if !self.decoded_any {
            self.decoded_any = true;
            self.raw_head = Vec::new();
        }

        if let Some(id) = chunk
            .response_created
            .as_ref()
            .and_then(|created| created.response_id.as_ref())
        {
            self.response_id = Some(id.clone());
        }
        if let Some(delta) = chunk.first_delta()
            && let Some(content) = delta.content.as_deref()
        {
            self.content.push_str(content);
        }
        if let Some(usage) = chunk.usage.as_ref() {
            self.usage = Some(usage.clone());
        }
        if chunk.is_finished() {
            self.finished = true;
        }
    }

    /// Fails with [`TransformError::UnexpectedDocument`] carrying the raw
    /// body when not a single event decoded, e.g. an HTML interstitial.
    pub fn finish(self, model: &str) -> Result<Completion, TransformError> {
        let (now_secs, now_ms) = unix_now();
        self.finish_at(model, now_secs, now_ms)
    }

    pub fn finish_at(
        mut self,
        model: &str,
        now_secs: i64,
        now_ms: i64,
    ) -> Result<Completion, TransformError> {
        if !self.finished {
            for payload in self.decoder.finish() {
                self.push_payload(&payload);
                if self.finished {
                    break;
                }
            }
        }
        if !self.decoded_any {
            return Err(TransformError::UnexpectedDocument(
                String::from_utf8_lossy(&self.raw_head).into_owned(),
            ));
        }
        Ok(Completion {
            id: self
                .response_id
                .clone()
                .unwrap_or_else(|| fallback_id(now_ms)),
            response_id: self.response_id,
            content: self.content,
            usage: self.usage.as_ref().map(normalize_usage).unwrap_or_default(),
            model: model.to_string(),
            created: now_secs,
        })
    }
}

/// Reads a fully buffered upstream body: a single JSON document when it
/// looks like one, otherwise an event stream.
pub fn parse_upstream_body(body: &[u8], model: &str) -> Result<Completion, TransformError> {
    let (now_secs, now_ms) = unix_now();
    parse_upstream_body_at(body, model, now_secs, now_ms)
}

pub fn parse_upstream_body_at(
    body: &[u8],
    model: &str,
    now_secs: i64,
    now_ms: i64,
) -> Result<Completion, TransformError> {
    let trimmed = body.trim_ascii_start();
    if trimmed.first() == Some(&b'{')
        && let Ok(document) = serde_json::from_slice::<UpstreamCompletionDocument>(trimmed)
    {
        return completion_from_document(document, body, model, now_secs, now_ms);
    }
    let mut state = UpstreamStreamState::new();
    state.push_bytes(body);
    state.finish_at(model, now_secs, now_ms)
}

fn completion_from_document(
    document: UpstreamCompletionDocument,
    raw: &[u8],
    model: &str,
    now_secs: i64,
    now_ms: i64,
) -> Result<Completion, TransformError> {
    let Some(content) = document.content().map(str::to_string) else {
        return Err(TransformError::UnexpectedDocument(
            String::from_utf8_lossy(raw).into_owned(),
        ));
    };
    let response_id = document.response_id.clone();
    Ok(Completion {
        id: document
            .id
            .clone()
            .or_else(|| response_id.clone())
            .unwrap_or_else(|| fallback_id(now_ms)),
        response_id,
        content,
        usage: document
            .usage
            .as_ref()
            .map(normalize_usage)
            .unwrap_or_default(),
        model: model.to_string(),
        created: now_secs,
    })
}
