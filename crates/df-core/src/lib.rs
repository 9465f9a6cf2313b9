//! Shared error primitives used across domfetch crates.

use core::fmt;

/// Result alias used across the workspace.
pub type FetchResult<T> = Result<T, FetchError>;

/// Classification of a failed `send()` call.
///
/// A non-2xx HTTP response is never an error; these kinds only describe
/// protocol, transport, security and caller failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Explicit cancellation, or `redirect=error` meeting a redirect.
    Abort,
    /// Mixed content or a cross-origin denial.
    Security,
    /// Transport failure, invalid child output, redirect budget exhausted.
    Network,
    /// A request shape the selected transport or mode cannot carry.
    NotSupported,
    /// Content-Encoding decompression failure.
    Encoding,
    /// A redirect `Location` that cannot be parsed.
    UriMismatch,
    /// Caller mistakes caught while building a request.
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Abort => "AbortError",
            Self::Security => "SecurityError",
            Self::Network => "NetworkError",
            Self::NotSupported => "NotSupportedError",
            Self::Encoding => "EncodingError",
            Self::UriMismatch => "URIMismatchError",
            Self::InvalidInput => "TypeError",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Top-level error type: a kind, a stable dotted code and a human message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} [{code}]: {message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub code: &'static str,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: ErrorKind, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
        }
    }

    pub fn abort(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Abort, code, message)
    }

    pub fn security(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Security, code, message)
    }

    pub fn network(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, code, message)
    }

    pub fn not_supported(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotSupported, code, message)
    }

    pub fn encoding(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Encoding, code, message)
    }

    pub fn uri_mismatch(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UriMismatch, code, message)
    }

    pub fn invalid_input(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidInput, code, message)
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}
