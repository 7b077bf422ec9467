use std::error::Error;
use std::fmt;

use http::StatusCode;

use chatgate_protocol::gateway::{
    ERROR_TYPE_CREDENTIALS_EXHAUSTED, ERROR_TYPE_INVALID_REQUEST, ERROR_TYPE_SERVER,
    ERROR_TYPE_VERIFICATION, ErrorBody,
};

/// Terminal outcome of a gateway call, as surfaced to clients.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayError {
    /// Malformed client input; never retried.
    Validation(String),
    /// No usable upstream token (shared-session mode only; credential auth
    /// failures are absorbed by rotation).
    AuthExpired(String),
    /// Rate limited while running on the shared session token.
    RateLimited(String),
    /// Upstream demands interactive verification; later calls are affected
    /// until a human resolves it.
    VerificationRequired(String),
    UpstreamOther(String),
    CredentialsExhausted(String),
}

impl GatewayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::Validation(_) => StatusCode::BAD_REQUEST,
            GatewayError::AuthExpired(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            GatewayError::VerificationRequired(_) => StatusCode::SERVICE_UNAVAILABLE,
            GatewayError::UpstreamOther(_) => StatusCode::INTERNAL_SERVER_ERROR,
            GatewayError::CredentialsExhausted(_) => StatusCode::SERVICE_UNAVAILABLE,
        }
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            GatewayError::Validation(_) => ERROR_TYPE_INVALID_REQUEST,
            GatewayError::VerificationRequired(_) => ERROR_TYPE_VERIFICATION,
            GatewayError::CredentialsExhausted(_) => ERROR_TYPE_CREDENTIALS_EXHAUSTED,
            GatewayError::AuthExpired(_)
            | GatewayError::RateLimited(_)
            | GatewayError::UpstreamOther(_) => ERROR_TYPE_SERVER,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            GatewayError::Validation(msg)
            | GatewayError::AuthExpired(msg)
            | GatewayError::RateLimited(msg)
            | GatewayError::VerificationRequired(msg)
            | GatewayError::UpstreamOther(msg)
            | GatewayError::CredentialsExhausted(msg) => msg,
        }
    }

    pub fn to_body(&self) -> ErrorBody {
        let mut body = ErrorBody::new(self.message(), self.error_type());
        if matches!(self, GatewayError::VerificationRequired(_)) {
            body.verification = Some(true);
        }
        body
    }
}

impl fmt::Display for GatewayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GatewayError::Validation(msg) => write!(f, "invalid request: {msg}"),
            GatewayError::AuthExpired(msg) => write!(f, "upstream auth expired: {msg}"),
            GatewayError::RateLimited(msg) => write!(f, "upstream rate limited: {msg}"),
            GatewayError::VerificationRequired(msg) => {
                write!(f, "upstream verification required: {msg}")
            }
            GatewayError::UpstreamOther(msg) => write!(f, "upstream error: {msg}"),
            GatewayError::CredentialsExhausted(msg) => write!(f, "credentials exhausted: {msg}"),
        }
    }
}

impl Error for GatewayError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verification_body_is_flagged() {
        let body = GatewayError::VerificationRequired("solve it".into()).to_body();
        assert_eq!(body.verification, Some(true));
        assert_eq!(body.error.kind, "verification_required");
    }

    #[test]
    fn exhaustion_is_503() {
        let err = GatewayError::CredentialsExhausted("none left".into());
        assert_eq!(err.status_code(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(err.to_body().error.kind, "credentials_exhausted");
    }
}
