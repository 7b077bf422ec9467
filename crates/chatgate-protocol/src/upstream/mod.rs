//! Payloads and events of the upstream web chat API (`/api/v2`).
//!
//! The upstream format is undocumented; unknown fields are ignored on decode
//! and only the fields the gateway relies on are modelled.

pub mod chat;
pub mod event;
