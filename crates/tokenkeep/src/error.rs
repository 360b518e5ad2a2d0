// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use std::fmt;

/// Status code that marks an authorization failure.
pub const UNAUTHORIZED: u16 = 401;

/// Error codes for requests sent through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Unauthorized,
    Forbidden,
    NotFound,
    BadRequest,
    Unavailable,
    Upstream,
    Network,
    Decode,
    Internal,
}

impl ErrorCode {
    /// Classify an HTTP error status.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            404 => Self::NotFound,
            400 | 409 | 422 => Self::BadRequest,
            503 => Self::Unavailable,
            _ => Self::Upstream,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unauthorized => "UNAUTHORIZED",
            Self::Forbidden => "FORBIDDEN",
            Self::NotFound => "NOT_FOUND",
            Self::BadRequest => "BAD_REQUEST",
            Self::Unavailable => "UNAVAILABLE",
            Self::Upstream => "UPSTREAM_ERROR",
            Self::Network => "NETWORK",
            Self::Decode => "DECODE",
            Self::Internal => "INTERNAL",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed request, as seen by the pipeline and its callers.
///
/// `Clone` so one renewal failure can be handed to every parked request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestError {
    pub code: ErrorCode,
    /// HTTP status, when the backend answered at all.
    pub status: Option<u16>,
    pub message: String,
}

impl RequestError {
    /// An error status returned by the backend.
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self { code: ErrorCode::from_status(status), status: Some(status), message: message.into() }
    }

    /// The request never produced a response.
    pub fn network(message: impl Into<String>) -> Self {
        Self { code: ErrorCode::Network, status: None, message: message.into() }
    }

    /// The response arrived but its body could not be read.
    pub fn decode(message: impl Into<String>) -> Self {
        Self { code: ErrorCode::Decode, status: None, message: message.into() }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self { code: ErrorCode::Internal, status: None, message: message.into() }
    }

    pub fn is_unauthorized(&self) -> bool {
        self.status == Some(UNAUTHORIZED)
    }
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(status) => write!(f, "{} ({status}): {}", self.code, self.message),
            None => write!(f, "{}: {}", self.code, self.message),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<reqwest::Error> for RequestError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            return Self::decode(e.to_string());
        }
        match e.status() {
            Some(status) => Self::status(status.as_u16(), e.to_string()),
            None => Self::network(e.to_string()),
        }
    }
}

/// Error envelope the backend uses: `{"detail": "..."}` or
/// `{"detail": {"code": "...", "message": "..."}}`.
#[derive(Debug, Deserialize)]
struct DetailBody {
    detail: serde_json::Value,
}

/// Best-effort human-readable message from an error response body.
pub fn detail_message(body: &[u8]) -> Option<String> {
    let parsed: DetailBody = serde_json::from_slice(body).ok()?;
    let message = match parsed.detail {
        serde_json::Value::String(s) => s,
        serde_json::Value::Object(map) => map.get("message")?.as_str()?.to_owned(),
        _ => return None,
    };
    if message.is_empty() {
        None
    } else {
        Some(message)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
