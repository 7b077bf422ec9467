use serde_json::Value as JsonValue;

use chatgate_provider_core::BrowserError;
use chatgate_transform::Completion;

/// Substrings that identify the upstream's anti-automation interstitial.
const CHALLENGE_MARKERS: &[&str] = &["Verification", "captcha", "Captcha", "punish"];
const AUTH_MARKERS: &[&str] = &["Unauthorized", "Token has expired", "Token expired"];
const RATE_LIMIT_MARKER: &str = "RateLimited";
/// Upper bound for an upstream-supplied cooldown hint: one year.
const MAX_COOLDOWN_HOURS: u64 = 24 * 365;

/// Raw result of one upstream send, before interpretation.
#[derive(Debug)]
pub enum Attempt {
    Completed(Completion),
    /// Non-success status, or a success status whose body carried no
    /// completion.
    Rejected { status: u16, body: String },
    Transport(BrowserError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoverableKind {
    AuthExpired,
    RateLimited { hours: u64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalKind {
    VerificationRequired,
    UpstreamOther,
}

#[derive(Debug)]
pub enum DispatchResult {
    Success(Completion),
    Recoverable { kind: RecoverableKind, detail: String },
    Fatal { kind: FatalKind, detail: String },
}

/// Interprets one attempt. Checks run challenge first, then auth, then rate
/// limit; transport failures and timeouts are never retried.
pub fn classify(attempt: Attempt, default_cooldown_hours: u64) -> DispatchResult {
    let (status, body) = match attempt {
        Attempt::Completed(completion) => return DispatchResult::Success(completion),
        Attempt::Transport(err) => {
            return DispatchResult::Fatal {
                kind: FatalKind::UpstreamOther,
                detail: err.to_string(),
            };
        }
        Attempt::Rejected { status, body } => (status, body),
    };

    let json = serde_json::from_str::<JsonValue>(&body).ok();

    if json.is_none() && looks_like_challenge(&body) {
        return DispatchResult::Fatal {
            kind: FatalKind::VerificationRequired,
            detail: format!("upstream returned a verification page (status {status})"),
        };
    }

    if status == 401 || AUTH_MARKERS.iter().any(|marker| body.contains(marker)) {
        return DispatchResult::Recoverable {
            kind: RecoverableKind::AuthExpired,
            detail: detail(status, &body),
        };
    }

    if status == 429 || body.contains(RATE_LIMIT_MARKER) {
        let hours = json
            .as_ref()
            .and_then(cooldown_hint)
            .unwrap_or(default_cooldown_hours);
        return DispatchResult::Recoverable {
            kind: RecoverableKind::RateLimited { hours },
            detail: detail(status, &body),
        };
    }

    DispatchResult::Fatal {
        kind: FatalKind::UpstreamOther,
        detail: detail(status, &body),
    }
}

/// Whether a non-JSON page is the anti-automation interstitial.
pub fn looks_like_challenge(page: &str) -> bool {
    CHALLENGE_MARKERS.iter().any(|marker| page.contains(marker))
}

fn detail(status: u16, body: &str) -> String {
    let body = body.trim();
    if body.is_empty() {
        format!("upstream status {status}")
    } else {
        format!("upstream status {status}: {body}")
    }
}

/// Reads `num` (hours) from `{code:"RateLimited", num}`, also when nested
/// under `data` or given as a string.
fn cooldown_hint(value: &JsonValue) -> Option<u64> {
    let num = value
        .get("num")
        .or_else(|| value.get("data").and_then(|data| data.get("num")))?;
    let hours = match num {
        JsonValue::Number(number) => number
            .as_u64()
            .or_else(|| number.as_f64().map(|value| value.ceil() as u64)),
        JsonValue::String(text) => text.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    (hours > 0).then_some(hours.min(MAX_COOLDOWN_HOURS))
}
