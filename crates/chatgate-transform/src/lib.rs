//! Translation between the external chat-completion format and the upstream
//! web chat format. Pure functions and state machines only; IO lives in the
//! caller.

pub mod content;
pub mod errors;
pub mod request;
pub mod response;
pub mod restream;

pub use content::upstream_content;
pub use errors::TransformError;
pub use request::{ChatTurn, build_chat_payload, build_create_chat_payload};
pub use response::{Completion, UpstreamStreamState, parse_upstream_body};
pub use restream::{chunk_content, completion_frames, error_frames};

pub(crate) fn unix_now() -> (i64, i64) {
    let now = time::OffsetDateTime::now_utc();
    let millis = (now.unix_timestamp_nanos() / 1_000_000) as i64;
    (now.unix_timestamp(), millis)
}
