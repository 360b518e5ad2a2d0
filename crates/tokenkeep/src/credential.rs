// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The session credential and its advisory expiry claim.
//!
//! The client never verifies the token signature. The `exp` claim is read
//! only to decide when to renew ahead of time; the backend remains the sole
//! authority on whether the credential is valid.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::Deserialize;

/// Name of the cookie that carries the credential.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// An opaque bearer credential issued by the backend.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential(String);

impl Credential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Expiry in epoch seconds, decoded from the unverified payload.
    ///
    /// `None` when the token has no payload segment, the segment is not
    /// base64url JSON, or it carries no numeric `exp`.
    pub fn expires_at(&self) -> Option<u64> {
        decode_expiry(&self.0)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Credential").field(&"<redacted>").finish()
    }
}

#[derive(Debug, Deserialize)]
struct Claims {
    #[serde(default)]
    exp: Option<serde_json::Number>,
}

/// Decode the `exp` claim from the second dot-separated segment.
pub fn decode_expiry(token: &str) -> Option<u64> {
    let payload = token.split('.').nth(1)?;
    if payload.is_empty() {
        return None;
    }
    // Issuers differ on padding; accept both.
    let bytes = URL_SAFE_NO_PAD.decode(payload).or_else(|_| URL_SAFE.decode(payload)).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    let exp = claims.exp?;
    exp.as_u64().or_else(|| exp.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

/// Current time as epoch seconds.
pub fn epoch_secs() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[cfg(test)]
#[path = "credential_tests.rs"]
mod tests;
