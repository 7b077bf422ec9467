use std::error::Error;
use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Client content the upstream cannot accept.
    InvalidContent(String),
    /// Upstream answered with a JSON document that carries no completion.
    UnexpectedDocument(String),
}

impl fmt::Display for TransformError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransformError::InvalidContent(msg) => write!(f, "invalid message content: {msg}"),
            TransformError::UnexpectedDocument(body) => {
                write!(f, "unexpected upstream document: {body}")
            }
        }
    }
}

impl Error for TransformError {}
