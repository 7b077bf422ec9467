//! Wire types shared by every chatgate crate.
//!
//! `openai` holds the external chat-completion surface the gateway exposes,
//! `upstream` holds the undocumented payload/event shapes of the browser
//! chat service, `gateway` the gateway's own request/error envelopes, and
//! `sse` decodes line-delimited event streams.

pub mod gateway;
pub mod openai;
pub mod sse;
pub mod upstream;
