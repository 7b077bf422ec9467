use futures_util::future::join_all;
use serde::Serialize;
use time::OffsetDateTime;

use chatgate_provider_core::{CredentialPool, ProbeStatus, UpstreamBrowser};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CredentialHealth {
    Ok,
    Unauthorized,
    RateLimited,
    Error,
    /// Marked invalid earlier; not probed.
    Invalid,
    /// Inside its cooldown window; not probed.
    CoolingDown,
}

impl From<ProbeStatus> for CredentialHealth {
    fn from(value: ProbeStatus) -> Self {
        match value {
            ProbeStatus::Ok => CredentialHealth::Ok,
            ProbeStatus::Unauthorized => CredentialHealth::Unauthorized,
            ProbeStatus::RateLimited => CredentialHealth::RateLimited,
            ProbeStatus::Error => CredentialHealth::Error,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CredentialStatus {
    pub id: String,
    pub health: CredentialHealth,
    #[serde(with = "time::serde::rfc3339::option")]
    pub reset_at: Option<OffsetDateTime>,
}

/// Health snapshot per credential. Eligible credentials get a lightweight
/// upstream ping; the pool itself is not modified.
pub async fn probe_credentials(
    pool: &CredentialPool,
    browser: &dyn UpstreamBrowser,
) -> Vec<CredentialStatus> {
    let now = OffsetDateTime::now_utc();
    let credentials = pool.list().await;
    let probes = credentials.into_iter().map(|credential| async move {
        let health = if credential.invalid {
            CredentialHealth::Invalid
        } else if !credential.is_eligible(now) {
            CredentialHealth::CoolingDown
        } else {
            browser.probe_token(&credential.token).await.into()
        };
        CredentialStatus {
            id: credential.id,
            health,
            reset_at: credential.reset_at,
        }
    });
    join_all(probes).await
}
