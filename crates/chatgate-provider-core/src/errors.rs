use std::error::Error;
use std::fmt;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone)]
pub enum ProviderError {
    /// Durable credential storage could not be read or written.
    Storage(String),
}

impl fmt::Display for ProviderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderError::Storage(msg) => write!(f, "credential storage: {msg}"),
        }
    }
}

impl Error for ProviderError {}
