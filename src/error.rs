use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::analyzer::ParseError;
use crate::tokenizer::token::TokenizerError;

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
pub enum ChariotError {
    #[error("declaration error: {0}")]
    Declaration(String),
    #[error("attribute '{key}' not found on node '{node}'")]
    AttributeNotFound { node: String, key: String },
    #[error("{0}")]
    UndefinedSymbol(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("type error: {0}")]
    Type(String),
    #[error("host binding '{binding}' failed: {source}")]
    HostBinding {
        binding: String,
        #[source]
        source: BoxError,
    },
    #[error("session error: {0}")]
    Session(String),
    #[error("session '{0}' expired")]
    SessionExpired(String),
    #[error("debug protocol error: {0}")]
    DebugProtocol(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("run cancelled")]
    Cancelled,
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type ChariotResult<T> = Result<T, ChariotError>;

/// Error kind name carried in API results.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
)]
pub enum ErrorKind {
    DeclarationError,
    AttributeNotFound,
    UndefinedSymbol,
    InvalidArgument,
    TypeError,
    HostBindingError,
    SessionError,
    SessionExpired,
    DebugProtocolError,
    SerializationError,
    ParseError,
    Cancelled,
    IoError,
    InternalError,
}

impl ChariotError {
    pub fn internal<S: Into<String>>(message: S) -> Self {
        ChariotError::Internal(message.into())
    }

    pub fn invalid_argument<S: Into<String>>(message: S) -> Self {
        ChariotError::InvalidArgument(message.into())
    }

    pub fn host_binding<E>(binding: &str, source: E) -> Self
    where
        E: Into<BoxError>,
    {
        ChariotError::HostBinding {
            binding: binding.to_string(),
            source: source.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            ChariotError::Declaration(_) => ErrorKind::DeclarationError,
            ChariotError::AttributeNotFound { .. } => ErrorKind::AttributeNotFound,
            ChariotError::UndefinedSymbol(_) => ErrorKind::UndefinedSymbol,
            ChariotError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            ChariotError::Type(_) => ErrorKind::TypeError,
            ChariotError::HostBinding { .. } => ErrorKind::HostBindingError,
            ChariotError::Session(_) => ErrorKind::SessionError,
            ChariotError::SessionExpired(_) => ErrorKind::SessionExpired,
            ChariotError::DebugProtocol(_) => ErrorKind::DebugProtocolError,
            ChariotError::Serialization(_) => ErrorKind::SerializationError,
            ChariotError::Parse(_) => ErrorKind::ParseError,
            ChariotError::Cancelled => ErrorKind::Cancelled,
            ChariotError::Io(_) => ErrorKind::IoError,
            ChariotError::Internal(_) => ErrorKind::InternalError,
        }
    }
}

impl From<TokenizerError> for ChariotError {
    fn from(err: TokenizerError) -> Self {
        ChariotError::Parse(err.to_string())
    }
}

impl From<ParseError> for ChariotError {
    fn from(err: ParseError) -> Self {
        ChariotError::Parse(err.to_string())
    }
}

impl From<serde_json::Error> for ChariotError {
    fn from(err: serde_json::Error) -> Self {
        ChariotError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for ChariotError {
    fn from(err: bincode::Error) -> Self {
        ChariotError::Serialization(err.to_string())
    }
}

/// Serializable error summary attached to run results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&ChariotError> for ErrorInfo {
    fn from(err: &ChariotError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        let err = ChariotError::UndefinedSymbol("function 'foo' not defined".to_string());
        assert_eq!(err.kind(), ErrorKind::UndefinedSymbol);
        assert_eq!(err.kind().to_string(), "UndefinedSymbol");

        let info = ErrorInfo::from(&ChariotError::DebugProtocol("not paused".into()));
        assert_eq!(info.kind, ErrorKind::DebugProtocolError);
        assert_eq!(info.message, "debug protocol error: not paused");
    }

    #[test]
    fn test_host_binding_keeps_source() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = ChariotError::host_binding("treeLoad", io);
        assert_eq!(err.kind(), ErrorKind::HostBindingError);
        let source = std::error::Error::source(&err).map(|s| s.to_string());
        assert_eq!(source, Some("missing".to_string()));
    }
}
