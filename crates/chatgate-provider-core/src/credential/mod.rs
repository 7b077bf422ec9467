mod pool;
mod store;

use std::fmt;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

pub use pool::CredentialPool;
pub use store::{CredentialStore, MemoryCredentialStore};

/// One upstream identity. Persisted as `{id, token, invalid, resetAt}`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credential {
    pub id: String,
    pub token: String,
    #[serde(default)]
    pub invalid: bool,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub reset_at: Option<OffsetDateTime>,
}

impl Credential {
    pub fn new(id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            token: token.into(),
            invalid: false,
            reset_at: None,
        }
    }

    pub fn is_eligible(&self, now: OffsetDateTime) -> bool {
        !self.invalid && self.reset_at.is_none_or(|reset_at| reset_at <= now)
    }

    pub fn view(&self, now: OffsetDateTime) -> CredentialView {
        CredentialView {
            id: self.id.clone(),
            invalid: self.invalid,
            reset_at: self.reset_at,
            eligible: self.is_eligible(now),
            token_hint: token_hint(&self.token),
        }
    }
}

// Tokens never reach logs.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("token", &token_hint(&self.token))
            .field("invalid", &self.invalid)
            .field("reset_at", &self.reset_at)
            .finish()
    }
}

/// Credential as shown to operators: health only, token masked.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialView {
    pub id: String,
    pub invalid: bool,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reset_at: Option<OffsetDateTime>,
    pub eligible: bool,
    pub token_hint: String,
}

fn token_hint(token: &str) -> String {
    let tail: String = token
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    if token.chars().count() <= 8 {
        "****".to_string()
    } else {
        format!("****{tail}")
    }
}
