//! Core credential and session abstractions for chatgate.
//!
//! This crate does **not** depend on axum or any concrete HTTP client. The
//! upstream browser is consumed through the [`UpstreamBrowser`] and
//! [`BrowserTab`] traits; a higher layer supplies the implementation.

pub mod browser;
pub mod credential;
pub mod errors;
pub mod session;

pub use browser::{
    BodyChunk, BrowserError, BrowserMode, BrowserTab, ProbeStatus, UpstreamBody,
    UpstreamBrowser, UpstreamReply,
};
pub use credential::{
    Credential, CredentialPool, CredentialStore, CredentialView, MemoryCredentialStore,
};
pub use errors::{ProviderError, ProviderResult};
pub use session::{SessionHandle, SessionPool, SharedToken};
