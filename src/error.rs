use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for blockstream
///
/// Errors are `Clone` because a deferred value is shared between every
/// placeholder that references it, and each of them reports the same failure.
#[derive(Error, Debug, Clone)]
pub enum Error {
    #[error("Parse error at {line}:{column}: {message}")]
    Parse {
        message: String,
        line: usize,
        column: usize,
    },

    #[error("Failed to resolve '{placeholder}': {source}")]
    Resolution {
        placeholder: String,
        #[source]
        source: Box<Error>,
    },

    #[error("Unsupported data source: {0}")]
    UnsupportedDataSource(String),

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("IO error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Template error: {0}")]
    Template(String),

    #[error("Internal error: {0}")]
    Internal(String),

    // Error with context chain
    #[error("{message}")]
    WithContext {
        message: String,
        #[source]
        source: Box<Error>,
    },
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(Arc::new(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Template(format!("JSON error: {}", err))
    }
}

impl Error {
    pub fn parse(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::Parse {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn template(msg: impl Into<String>) -> Self {
        Self::Template(msg.into())
    }

    pub fn stream(msg: impl Into<String>) -> Self {
        Self::Stream(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn unsupported_data_source(msg: impl Into<String>) -> Self {
        Self::UnsupportedDataSource(msg.into())
    }

    /// Scope an error to the placeholder (or block) whose resolution failed.
    /// Already-scoped errors keep their innermost placeholder.
    pub fn for_placeholder(self, placeholder: impl Into<String>) -> Self {
        match self {
            Self::Resolution { .. } => self,
            other => Self::Resolution {
                placeholder: placeholder.into(),
                source: Box::new(other),
            },
        }
    }

    // Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        Self::WithContext {
            message: context.into(),
            source: Box::new(self),
        }
    }

    /// Parse errors fail the whole template; everything else is scoped to
    /// one placeholder or block and the render carries on.
    pub fn is_parse_error(&self) -> bool {
        match self {
            Error::Parse { .. } => true,
            Error::WithContext { source, .. } => source.is_parse_error(),
            _ => false,
        }
    }

    /// Get error code for host applications
    pub fn error_code(&self) -> &'static str {
        match self {
            Error::Parse { .. } => "E_PARSE",
            Error::Resolution { .. } => "E_RESOLUTION",
            Error::UnsupportedDataSource(_) => "E_UNSUPPORTED_DATA_SOURCE",
            Error::Stream(_) => "E_STREAM",
            Error::Io(_) => "E_IO",
            Error::Config(_) => "E_CONFIG",
            Error::Template(_) => "E_TEMPLATE",
            Error::Internal(_) => "E_INTERNAL",
            Error::WithContext { source, .. } => source.error_code(),
        }
    }
}
