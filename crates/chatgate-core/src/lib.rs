//! Request dispatch for chatgate.
//!
//! [`Dispatcher`] drives one logical "send a message" call across the
//! credential pool, the session pool and the upstream browser, and turns
//! every outcome into either a completion or a terminal [`GatewayError`].

pub mod classify;
pub mod context;
pub mod dispatch;
pub mod error;
pub mod status;
pub mod upstream_client;

pub use classify::{Attempt, DispatchResult, FatalKind, RecoverableKind, classify};
pub use context::GatewayContext;
pub use dispatch::{DispatchOutcome, Dispatcher, DispatcherConfig, SendRequest};
pub use error::GatewayError;
pub use status::{CredentialHealth, CredentialStatus, probe_credentials};
pub use upstream_client::{BrowserConfig, WreqBrowser};
