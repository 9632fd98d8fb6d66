//! Error types for the doorbell communications core.

use std::fmt;

/// Errors that can occur in the doorbell library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Network**: [`Io`](Self::Io), [`NetworkNotReady`](Self::NetworkNotReady),
///   [`TransportWrite`](Self::TransportWrite), [`Timeout`](Self::Timeout).
/// - **Protocol**: [`Parse`](Self::Parse), [`UnexpectedStatus`](Self::UnexpectedStatus).
/// - **Auth**: [`InvalidChallenge`](Self::InvalidChallenge).
/// - **Resources**: [`ResourceExhausted`](Self::ResourceExhausted),
///   [`CallInProgress`](Self::CallInProgress),
///   [`SessionNotFound`](Self::SessionNotFound).
/// - **Server**: [`NotStarted`](Self::NotStarted),
///   [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Config**: [`Config`](Self::Config).
#[derive(Debug, thiserror::Error)]
pub enum DoorbellError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The host has no usable IPv4 address yet.
    #[error("network not ready")]
    NetworkNotReady,

    /// A 401/407 challenge lacked a realm or nonce.
    #[error("invalid authentication challenge: {0}")]
    InvalidChallenge(String),

    /// Fewer bytes than requested reached the socket.
    #[error("short write: {written} of {expected} bytes")]
    TransportWrite { written: usize, expected: usize },

    /// A bounded request/response window closed without a matching reply.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// The remote side answered with a status the exchange cannot continue from.
    #[error("unexpected status {code} for {method}")]
    UnexpectedStatus { method: String, code: u16 },

    /// Failed to parse a SIP, RTSP or SDP message.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The fixed-capacity viewer session pool is full.
    #[error("no free session slot (capacity {0})")]
    ResourceExhausted(usize),

    /// A ring was requested while another call is still active.
    #[error("call already in progress")]
    CallInProgress,

    /// No viewer session with the given id exists.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// [`StreamServer::start`](crate::StreamServer::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`StreamServer::start`](crate::StreamServer::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Missing or inconsistent configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Specific kind of parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no start line).
    EmptyMessage,
    /// Start line did not have the expected three-part format.
    InvalidStartLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// A required header was absent.
    MissingHeader(&'static str),
    /// The message was not valid UTF-8.
    InvalidEncoding,
    /// A TOML configuration document was rejected.
    Config(String),
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::MissingHeader(name) => write!(f, "missing {name} header"),
            Self::InvalidEncoding => write!(f, "message is not valid UTF-8"),
            Self::Config(msg) => write!(f, "{msg}"),
        }
    }
}

impl DoorbellError {
    pub(crate) fn parse(kind: ParseErrorKind) -> Self {
        Self::Parse { kind }
    }
}

/// Convenience alias for `Result<T, DoorbellError>`.
pub type Result<T> = std::result::Result<T, DoorbellError>;
