use bytes::Bytes;

use chatgate_protocol::openai::create_chat_completions::stream::{
    ChatCompletionChunkObjectType, ChatCompletionStreamChoice, CreateChatCompletionStreamResponse,
};
use chatgate_protocol::openai::create_chat_completions::types::{
    ChatCompletionFinishReason, ChatCompletionRole, ChatCompletionStreamResponseDelta,
    CompletionUsage,
};
use chatgate_protocol::sse::{sse_done_bytes, sse_json_bytes};

use crate::response::Completion;
use crate::unix_now;

/// Splits `content` into slices of at most `chunk_size` code points.
pub fn chunk_content(content: &str, chunk_size: usize) -> Vec<String> {
    let chunk_size = chunk_size.max(1);
    let chars: Vec<char> = content.chars().collect();
    chars
        .chunks(chunk_size)
        .map(|slice| slice.iter().collect())
        .collect()
}

fn chunk(
    id: &str,
    created: i64,
    model: &str,
    delta: ChatCompletionStreamResponseDelta,
    finish_reason: Option<ChatCompletionFinishReason>,
    usage: Option<CompletionUsage>,
) -> CreateChatCompletionStreamResponse {
    CreateChatCompletionStreamResponse {
        id: id.to_string(),
        object: ChatCompletionChunkObjectType::ChatCompletionChunk,
        created,
        model: model.to_string(),
        choices: vec![ChatCompletionStreamChoice {
            index: 0,
            delta,
            finish_reason,
        }],
        usage,
    }
}

/// Replays an accumulated completion as chat-completion chunks: one frame per
/// content slice (the first also carries the assistant role), a terminal
/// `finish_reason: stop` frame with usage, then `[DONE]`.
pub fn completion_frames(completion: &Completion, chunk_size: usize) -> Vec<Bytes> {
    let mut slices = chunk_content(&completion.content, chunk_size);
    if slices.is_empty() {
        slices.push(String::new());
    }

    let mut frames = Vec::with_capacity(slices.len() + 2);
    for (index, slice) in slices.into_iter().enumerate() {
        let delta = ChatCompletionStreamResponseDelta {
            role: (index == 0).then_some(ChatCompletionRole::Assistant),
            content: Some(slice),
        };
        frames.extend(sse_json_bytes(&chunk(
            &completion.id,
            completion.created,
            &completion.model,
            delta,
            None,
            None,
        )));
    }
    frames.extend(sse_json_bytes(&chunk(
        &completion.id,
        completion.created,
        &completion.model,
        ChatCompletionStreamResponseDelta::default(),
        Some(ChatCompletionFinishReason::Stop),
        Some(completion.usage.clone()),
    )));
    frames.push(sse_done_bytes());
    frames
}

/// Terminates a stream that failed: the message travels as content so
/// clients that only render deltas still show it.
pub fn error_frames(message: &str, model: &str) -> Vec<Bytes> {
    let (now_secs, now_ms) = unix_now();
    let delta = ChatCompletionStreamResponseDelta {
        role: Some(ChatCompletionRole::Assistant),
        content: Some(format!("Error: {message}")),
    };
    let mut frames: Vec<Bytes> = sse_json_bytes(&chunk(
        &format!("chatcmpl-{now_ms}"),
        now_secs,
        model,
        delta,
        Some(ChatCompletionFinishReason::Stop),
        None,
    ))
    .into_iter()
    .collect();
    frames.push(sse_done_bytes());
    frames
}
