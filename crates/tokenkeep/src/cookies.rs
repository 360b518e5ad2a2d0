// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Minimal cookie jar for the single backend origin.
//!
//! The credential travels out-of-band in a cookie: the backend sets it with
//! `Set-Cookie` on login and refresh, and every request replays it in a
//! `Cookie` header. Attributes other than `Max-Age` are ignored because the
//! jar only ever talks to one origin.

use std::collections::BTreeMap;

use parking_lot::Mutex;

/// A parsed `Set-Cookie` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetCookie {
    pub name: String,
    pub value: String,
    /// `true` when the header asks the client to drop the cookie.
    pub removal: bool,
}

/// Parse a `Set-Cookie` header value. Returns `None` for headers without a
/// `name=value` pair.
pub fn parse_set_cookie(header: &str) -> Option<SetCookie> {
    let mut parts = header.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }
    let value = value.trim().trim_matches('"').to_owned();

    let mut removal = value.is_empty();
    for attr in parts {
        let Some((key, val)) = attr.split_once('=') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("max-age") {
            if let Ok(secs) = val.trim().parse::<i64>() {
                removal |= secs <= 0;
            }
        }
    }

    Some(SetCookie { name: name.to_owned(), value, removal })
}

/// Cookies received from the backend.
#[derive(Debug, Default)]
pub struct CookieJar {
    cookies: Mutex<BTreeMap<String, String>>,
}

impl CookieJar {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one `Set-Cookie` header value.
    pub fn store(&self, header: &str) {
        let Some(cookie) = parse_set_cookie(header) else {
            tracing::debug!("ignoring malformed set-cookie header");
            return;
        };
        let mut cookies = self.cookies.lock();
        if cookie.removal {
            cookies.remove(&cookie.name);
        } else {
            cookies.insert(cookie.name, cookie.value);
        }
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.cookies.lock().get(name).cloned()
    }

    pub fn set(&self, name: &str, value: impl Into<String>) {
        self.cookies.lock().insert(name.to_owned(), value.into());
    }

    pub fn remove(&self, name: &str) {
        self.cookies.lock().remove(name);
    }

    pub fn clear(&self) {
        self.cookies.lock().clear();
    }

    /// Render the jar as a `Cookie` request header, or `None` when empty.
    pub fn header_value(&self) -> Option<String> {
        let cookies = self.cookies.lock();
        if cookies.is_empty() {
            return None;
        }
        Some(cookies.iter().map(|(k, v)| format!("{k}={v}")).collect::<Vec<_>>().join("; "))
    }
}

#[cfg(test)]
#[path = "cookies_tests.rs"]
mod tests;
