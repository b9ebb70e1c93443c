//! Error classification.
//!
//! Origins fail for heterogeneous reasons: an HTTP status, a malformed body,
//! a refused connection, a certificate, a slow server, an unresolvable host,
//! a domain-level rejection. [`ErrorClassifier`] folds every such cause into
//! the closed [`ErrorCode`] taxonomy and attaches a human-readable message.
//! Classification is pure and cannot fail: anything unrecognised becomes
//! [`ErrorCode::Unknown`].

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;
use std::io;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

use crate::error::ConfigError;

// ============================================================================
// TAXONOMY
// ============================================================================

/// Closed set of caller-visible failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The origin answered with a non-success HTTP status.
    HttpStatus,
    /// The response could not be decoded.
    Parse,
    /// The connection could not be established or was dropped.
    Transport,
    /// TLS handshake or certificate verification failed.
    Tls,
    Timeout,
    /// Host name resolution failed.
    Dns,
    /// The origin completed but produced a structurally invalid response.
    ResponseUnavailable,
    /// Domain-level rejection, distinct from transport failure.
    Business,
    Unknown,
}

impl ErrorCode {
    pub const ALL: [ErrorCode; 9] = [
        ErrorCode::HttpStatus,
        ErrorCode::Parse,
        ErrorCode::Transport,
        ErrorCode::Tls,
        ErrorCode::Timeout,
        ErrorCode::Dns,
        ErrorCode::ResponseUnavailable,
        ErrorCode::Business,
        ErrorCode::Unknown,
    ];

    /// Stable numeric code.
    pub fn as_u16(self) -> u16 {
        match self {
            ErrorCode::Unknown => 1000,
            ErrorCode::Parse => 1001,
            ErrorCode::Transport => 1002,
            ErrorCode::HttpStatus => 1003,
            ErrorCode::Tls => 1005,
            ErrorCode::Timeout => 1006,
            ErrorCode::Dns => 1007,
            ErrorCode::ResponseUnavailable => 1008,
            ErrorCode::Business => 1009,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::HttpStatus => "HTTP_STATUS",
            ErrorCode::Parse => "PARSE",
            ErrorCode::Transport => "TRANSPORT",
            ErrorCode::Tls => "TLS",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Dns => "DNS",
            ErrorCode::ResponseUnavailable => "RESPONSE_UNAVAILABLE",
            ErrorCode::Business => "BUSINESS",
            ErrorCode::Unknown => "UNKNOWN",
        }
    }

    /// Built-in message used when nothing more specific applies.
    pub fn default_message(self) -> &'static str {
        match self {
            ErrorCode::HttpStatus => "network unavailable, please check your connection",
            ErrorCode::Parse => "failed to parse response data",
            ErrorCode::Transport => "network unavailable, please check your connection",
            ErrorCode::Tls => "certificate verification failed",
            ErrorCode::Timeout => "request timed out",
            ErrorCode::Dns => "domain resolution failed",
            ErrorCode::ResponseUnavailable => "response unavailable",
            ErrorCode::Business => "business error",
            ErrorCode::Unknown => "unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_uppercase();
        ErrorCode::ALL
            .into_iter()
            .find(|code| code.as_str() == normalized)
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "error_code".to_string(),
                value: s.to_string(),
                reason: "unknown error code".to_string(),
            })
    }
}

/// Which phase of the exchange ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeoutPhase {
    Connect,
    Response,
}

impl TimeoutPhase {
    pub fn default_message(self) -> &'static str {
        match self {
            TimeoutPhase::Connect => "connection timed out",
            TimeoutPhase::Response => "server response timed out",
        }
    }
}

fn default_status_message(status: u16) -> Option<&'static str> {
    match status {
        401 => Some("unauthorized"),
        403 => Some("forbidden"),
        404 => Some("not found"),
        408 => Some("request timeout"),
        500 => Some("server error"),
        503 => Some("service unavailable"),
        _ => None,
    }
}

// ============================================================================
// ORIGIN FAILURE CAUSES
// ============================================================================

/// Failure reported by an origin fetch.
#[derive(Debug, Error)]
pub enum OriginError {
    #[error("Origin responded with HTTP status {status}")]
    Status { status: u16 },

    #[error("Failed to parse origin response: {reason}")]
    Parse { reason: String },

    #[error("Transport failure: {reason}")]
    Transport { reason: String },

    #[error("TLS failure: {reason}")]
    Tls { reason: String },

    #[error("Timed out waiting for {phase:?}: {reason}")]
    Timeout { phase: TimeoutPhase, reason: String },

    #[error("Failed to resolve host {host}: {reason}")]
    Dns { host: String, reason: String },

    #[error("Response unavailable: {reason}")]
    ResponseUnavailable { reason: String },

    #[error("Business error: {reason}")]
    Business { reason: String },

    #[error(transparent)]
    Other(Box<dyn StdError + Send + Sync>),
}

impl OriginError {
    pub fn status(status: u16) -> Self {
        OriginError::Status { status }
    }

    pub fn business(reason: impl Into<String>) -> Self {
        OriginError::Business {
            reason: reason.into(),
        }
    }

    pub fn response_unavailable(reason: impl Into<String>) -> Self {
        OriginError::ResponseUnavailable {
            reason: reason.into(),
        }
    }

    /// Recover a typed cause from a boxed error where possible.
    pub fn from_boxed(err: Box<dyn StdError + Send + Sync>) -> Self {
        let err = match err.downcast::<OriginError>() {
            Ok(origin) => return *origin,
            Err(err) => err,
        };
        let err = match err.downcast::<io::Error>() {
            Ok(io_err) => return OriginError::from(*io_err),
            Err(err) => err,
        };
        match err.downcast::<serde_json::Error>() {
            Ok(json_err) => OriginError::from(*json_err),
            Err(err) => OriginError::Other(err),
        }
    }
}

impl From<io::Error> for OriginError {
    fn from(err: io::Error) -> Self {
        match io_category(err.kind()) {
            Some((ErrorCode::Timeout, _)) => OriginError::Timeout {
                phase: TimeoutPhase::Response,
                reason: err.to_string(),
            },
            Some((ErrorCode::Transport, _)) => OriginError::Transport {
                reason: err.to_string(),
            },
            Some((ErrorCode::Parse, _)) => OriginError::Parse {
                reason: err.to_string(),
            },
            _ => OriginError::Other(Box::new(err)),
        }
    }
}

impl From<serde_json::Error> for OriginError {
    fn from(err: serde_json::Error) -> Self {
        match err.classify() {
            serde_json::error::Category::Io => OriginError::Transport {
                reason: err.to_string(),
            },
            _ => OriginError::Parse {
                reason: err.to_string(),
            },
        }
    }
}

fn io_category(kind: io::ErrorKind) -> Option<(ErrorCode, Option<TimeoutPhase>)> {
    use io::ErrorKind::*;
    match kind {
        TimedOut => Some((ErrorCode::Timeout, Some(TimeoutPhase::Response))),
        ConnectionRefused | ConnectionReset | ConnectionAborted | NotConnected | BrokenPipe
        | AddrNotAvailable | AddrInUse => Some((ErrorCode::Transport, None)),
        UnexpectedEof | InvalidData => Some((ErrorCode::Parse, None)),
        _ => None,
    }
}

// ============================================================================
// CLASSIFIED ERROR
// ============================================================================

/// Caller-facing error: a stable code, a message, and the underlying cause.
#[derive(Debug, Clone)]
pub struct ClassifiedError {
    code: ErrorCode,
    message: String,
    status: Option<u16>,
    cause: Option<Arc<OriginError>>,
}

impl ClassifiedError {
    /// Build an error with no underlying cause.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            status: None,
            cause: None,
        }
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// HTTP status, when the cause was a status failure.
    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn cause(&self) -> Option<&OriginError> {
        self.cause.as_deref()
    }
}

impl fmt::Display for ClassifiedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.message, self.code, self.code.as_u16())
    }
}

impl StdError for ClassifiedError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

// ============================================================================
// CLASSIFIER
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Category {
    code: ErrorCode,
    status: Option<u16>,
    phase: Option<TimeoutPhase>,
}

impl Category {
    fn code(code: ErrorCode) -> Self {
        Self {
            code,
            status: None,
            phase: None,
        }
    }
}

fn categorize(err: &OriginError) -> Category {
    match err {
        OriginError::Status { status } => Category {
            code: ErrorCode::HttpStatus,
            status: Some(*status),
            phase: None,
        },
        OriginError::Parse { .. } => Category::code(ErrorCode::Parse),
        OriginError::Transport { .. } => Category::code(ErrorCode::Transport),
        OriginError::Tls { .. } => Category::code(ErrorCode::Tls),
        OriginError::Timeout { phase, .. } => Category {
            code: ErrorCode::Timeout,
            status: None,
            phase: Some(*phase),
        },
        OriginError::Dns { .. } => Category::code(ErrorCode::Dns),
        OriginError::ResponseUnavailable { .. } => Category::code(ErrorCode::ResponseUnavailable),
        OriginError::Business { .. } => Category::code(ErrorCode::Business),
        OriginError::Other(inner) => categorize_chain(inner.as_ref()),
    }
}

/// Walk a `source()` chain looking for a cause we recognise.
fn categorize_chain(err: &(dyn StdError + 'static)) -> Category {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(origin) = err.downcast_ref::<OriginError>() {
            return categorize(origin);
        }
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            if let Some((code, phase)) = io_category(io_err.kind()) {
                return Category {
                    code,
                    status: None,
                    phase,
                };
            }
        }
        if err.is::<serde_json::Error>() {
            return Category::code(ErrorCode::Parse);
        }
        current = err.source();
    }
    Category::code(ErrorCode::Unknown)
}

/// Maps origin failures to [`ClassifiedError`]s.
///
/// Message resolution, most specific first:
/// 1. an explicit per-status (or per-timeout-phase) override,
/// 2. an explicit per-code override,
/// 3. the built-in per-status (or per-phase) message,
/// 4. [`ErrorCode::default_message`].
#[derive(Debug, Clone, Default)]
pub struct ErrorClassifier {
    code_messages: HashMap<ErrorCode, String>,
    status_messages: HashMap<u16, String>,
    timeout_messages: HashMap<TimeoutPhase, String>,
}

impl ErrorClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_code_message(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
        self.code_messages.insert(code, message.into());
        self
    }

    pub fn with_status_message(mut self, status: u16, message: impl Into<String>) -> Self {
        self.status_messages.insert(status, message.into());
        self
    }

    pub fn with_timeout_message(mut self, phase: TimeoutPhase, message: impl Into<String>) -> Self {
        self.timeout_messages.insert(phase, message.into());
        self
    }

    /// Apply message overrides keyed by code name (`"DNS"`), HTTP status
    /// (`"404"`) or timeout phase (`"TIMEOUT_CONNECT"`, `"TIMEOUT_RESPONSE"`).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a key that is none of those.
    pub fn with_overrides<'a, I>(mut self, overrides: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (&'a String, &'a String)>,
    {
        for (key, message) in overrides {
            let trimmed = key.trim();
            if let Ok(status) = trimmed.parse::<u16>() {
                self.status_messages.insert(status, message.clone());
                continue;
            }
            match trimmed.to_ascii_uppercase().as_str() {
                "TIMEOUT_CONNECT" => {
                    self.timeout_messages
                        .insert(TimeoutPhase::Connect, message.clone());
                }
                "TIMEOUT_RESPONSE" => {
                    self.timeout_messages
                        .insert(TimeoutPhase::Response, message.clone());
                }
                _ => {
                    let code = trimmed.parse::<ErrorCode>()?;
                    self.code_messages.insert(code, message.clone());
                }
            }
        }
        Ok(self)
    }

    /// Resolve the message for a classification.
    pub fn message_for(
        &self,
        code: ErrorCode,
        status: Option<u16>,
        phase: Option<TimeoutPhase>,
    ) -> String {
        let specific = match (code, status, phase) {
            (ErrorCode::HttpStatus, Some(status), _) => self.status_messages.get(&status),
            (ErrorCode::Timeout, _, Some(phase)) => self.timeout_messages.get(&phase),
            _ => None,
        };
        if let Some(message) = specific.or_else(|| self.code_messages.get(&code)) {
            return message.clone();
        }

        let built_in = match (code, status, phase) {
            (ErrorCode::HttpStatus, Some(status), _) => default_status_message(status),
            (ErrorCode::Timeout, _, Some(phase)) => Some(phase.default_message()),
            _ => None,
        };
        built_in.unwrap_or_else(|| code.default_message()).to_string()
    }

    /// Classify an origin failure.
    pub fn classify(&self, err: OriginError) -> ClassifiedError {
        let category = categorize(&err);
        ClassifiedError {
            code: category.code,
            message: self.message_for(category.code, category.status, category.phase),
            status: category.status,
            cause: Some(Arc::new(err)),
        }
    }

    /// Classify an arbitrary boxed error.
    pub fn classify_boxed(&self, err: Box<dyn StdError + Send + Sync>) -> ClassifiedError {
        self.classify(OriginError::from_boxed(err))
    }
}
