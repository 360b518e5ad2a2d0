// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Device fingerprint derived from environment signals.
//!
//! The fingerprint identifies a device installation for device-trust
//! bookkeeping on the backend. It is not an authentication factor.

use std::fmt::Write as _;

use crate::store::{SessionStore, DEVICE_FINGERPRINT_KEY};

/// Separator between the feature fields.
const FEATURE_DELIMITER: &str = "|";

/// Seed of the fallback rolling hash.
const ROLLING_HASH_SEED: u32 = 5381;

/// Environment signals that make up the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSignals {
    pub user_agent: String,
    pub language: String,
    /// Resolution as `"WxH"`.
    pub screen: String,
    pub time_zone: String,
    pub platform: String,
}

impl EnvironmentSignals {
    /// Gather signals from the current process environment.
    ///
    /// `screen` overrides the terminal-size guess when given.
    pub fn detect(screen: Option<&str>) -> Self {
        Self {
            user_agent: format!("tokenkeep/{}", env!("CARGO_PKG_VERSION")),
            language: detect_language(),
            screen: screen.map(str::to_owned).unwrap_or_else(detect_screen),
            time_zone: detect_time_zone(),
            platform: format!("{}-{}", std::env::consts::OS, std::env::consts::ARCH),
        }
    }

    /// The delimited feature string that gets hashed.
    pub fn feature_string(&self) -> String {
        [
            self.user_agent.as_str(),
            self.language.as_str(),
            self.screen.as_str(),
            self.time_zone.as_str(),
            self.platform.as_str(),
        ]
        .join(FEATURE_DELIMITER)
    }
}

/// A strong cryptographic digest primitive.
pub trait DigestProvider: Send + Sync {
    fn digest(&self, data: &[u8]) -> anyhow::Result<Vec<u8>>;
}

/// SHA-256 via `ring`.
#[derive(Debug, Default, Clone, Copy)]
pub struct Sha256Digest;

impl DigestProvider for Sha256Digest {
    fn digest(&self, data: &[u8]) -> anyhow::Result<Vec<u8>> {
        Ok(ring::digest::digest(&ring::digest::SHA256, data).as_ref().to_vec())
    }
}

/// Derive the fingerprint for `signals`.
///
/// Uses the strong digest when one is provided and it succeeds; otherwise
/// falls back to the 32-bit rolling hash. Never fails.
pub fn generate_fingerprint(
    signals: &EnvironmentSignals,
    digest: Option<&dyn DigestProvider>,
) -> String {
    let features = signals.feature_string();
    if let Some(provider) = digest {
        match provider.digest(features.as_bytes()) {
            Ok(bytes) if !bytes.is_empty() => return to_hex(&bytes),
            Ok(_) => tracing::debug!("digest returned no bytes, using rolling hash"),
            Err(e) => tracing::debug!(err = %e, "digest unavailable, using rolling hash"),
        }
    }
    rolling_hash_hex(features.as_bytes())
}

/// `hash = ((hash * 33) XOR byte) mod 2^32`, seeded with 5381, as 8 hex chars.
pub fn rolling_hash_hex(data: &[u8]) -> String {
    let hash = data
        .iter()
        .fold(ROLLING_HASH_SEED, |hash, &b| hash.wrapping_mul(33) ^ u32::from(b));
    format!("{hash:08x}")
}

/// Return the stored fingerprint, generating and storing one if absent.
pub fn load_or_generate(
    store: &dyn SessionStore,
    signals: &EnvironmentSignals,
    digest: Option<&dyn DigestProvider>,
) -> String {
    if let Some(existing) = store.get(DEVICE_FINGERPRINT_KEY).filter(|fp| !fp.is_empty()) {
        return existing;
    }
    let fingerprint = generate_fingerprint(signals, digest);
    store.set(DEVICE_FINGERPRINT_KEY, &fingerprint);
    fingerprint
}

fn to_hex(bytes: &[u8]) -> String {
    bytes.iter().fold(String::with_capacity(bytes.len() * 2), |mut out, b| {
        let _ = write!(out, "{b:02x}");
        out
    })
}

fn detect_language() -> String {
    let raw = ["LC_ALL", "LC_MESSAGES", "LANG"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .find(|v| !v.is_empty())
        .unwrap_or_default();
    // "en_US.UTF-8@euro" -> "en-US"
    let tag = raw.split(['.', '@']).next().unwrap_or_default().replace('_', "-");
    if tag.is_empty() || tag == "C" || tag == "POSIX" {
        "en-US".to_owned()
    } else {
        tag
    }
}

fn detect_screen() -> String {
    let cols = std::env::var("COLUMNS").ok().and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    let rows = std::env::var("LINES").ok().and_then(|v| v.parse::<u32>().ok()).unwrap_or(0);
    format!("{cols}x{rows}")
}

fn detect_time_zone() -> String {
    if let Ok(tz) = std::env::var("TZ") {
        let tz = tz.trim_start_matches(':');
        if !tz.is_empty() {
            return tz.to_owned();
        }
    }
    if let Ok(target) = std::fs::read_link("/etc/localtime") {
        let target = target.to_string_lossy();
        if let Some((_, zone)) = target.split_once("zoneinfo/") {
            return zone.to_owned();
        }
    }
    "UTC".to_owned()
}

#[cfg(test)]
#[path = "fingerprint_tests.rs"]
mod tests;
