// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Request and response values exchanged with the backend, and the
//! [`Dispatch`] primitive that sends them.

use bytes::Bytes;
use futures_util::future::BoxFuture;
use reqwest::Method;
use serde::de::DeserializeOwned;

use crate::error::RequestError;

/// Path of the renewal RPC, relative to the API base.
pub const REFRESH_PATH: &str = "/auth/refresh";

/// Header carrying the device fingerprint.
pub const FINGERPRINT_HEADER: &str = "X-Device-Fingerprint";

/// An API request that can be replayed verbatim.
#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `/auth/me`.
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    /// Set once the request has been replayed after a renewal. A second
    /// authorization failure on a retry is terminal.
    pub retry: bool,
    /// Suppress user-visible notification of failures.
    pub quiet: bool,
}

impl ApiRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: Vec::new(),
            body: None,
            retry: false,
            quiet: false,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn json(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn quiet(mut self) -> Self {
        self.quiet = true;
        self
    }

    /// Set a header, replacing any existing value with the same name.
    pub fn set_header(&mut self, name: &str, value: impl Into<String>) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(name));
        self.headers.push((name.to_owned(), value.into()));
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.iter().find(|(k, _)| k.eq_ignore_ascii_case(name)).map(|(_, v)| v.as_str())
    }

    /// Whether this request targets the renewal RPC.
    pub fn is_renewal(&self) -> bool {
        let path = self.path.split('?').next().unwrap_or_default();
        path.trim_end_matches('/').ends_with(REFRESH_PATH)
    }
}

/// A successful response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiResponse {
    pub status: u16,
    pub body: Bytes,
}

impl ApiResponse {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T, RequestError> {
        serde_json::from_slice(&self.body).map_err(|e| RequestError::decode(e.to_string()))
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Sends one request. Non-success statuses come back as `Err` carrying the
/// status code.
///
/// Object-safe for use as `Arc<dyn Dispatch>`.
pub trait Dispatch: Send + Sync {
    fn dispatch(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, RequestError>>;
}
