use thiserror::Error;

/// Failure of a single fetch attempt.
///
/// None of these reach the UI host; the pipeline turns them into a
/// [`GenerationOutcome`](crate::view::GenerationOutcome) and keeps the last
/// committed list visible.
#[derive(Debug, Clone, Error, Eq, PartialEq)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,
    #[error("{code}: {message}")]
    Transient { code: &'static str, message: String },
    #[error("{code}: malformed payload: {message}")]
    MalformedPayload { code: &'static str, message: String },
}

impl FetchError {
    pub fn transient(code: &'static str, message: impl Into<String>) -> Self {
        Self::Transient {
            code,
            message: message.into(),
        }
    }

    pub fn malformed(code: &'static str, message: impl Into<String>) -> Self {
        Self::MalformedPayload {
            code,
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            FetchError::Cancelled => "CANCELLED",
            FetchError::Transient { code, .. } | FetchError::MalformedPayload { code, .. } => code,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, FetchError::Cancelled)
    }

    /// Malformed payloads are retried on the next query like any transport failure.
    pub fn is_transient(&self) -> bool {
        !self.is_cancelled()
    }
}

impl From<std::io::Error> for FetchError {
    fn from(err: std::io::Error) -> Self {
        FetchError::transient("IO", err.to_string())
    }
}

impl From<serde_json::Error> for FetchError {
    fn from(err: serde_json::Error) -> Self {
        FetchError::malformed("PAYLOAD_DECODE", err.to_string())
    }
}
