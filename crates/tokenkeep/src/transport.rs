// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP transport to the backend and the renewal RPC on top of it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use reqwest::header::{COOKIE, SET_COOKIE};
use serde::Deserialize;
use tracing::debug;

use crate::cookies::CookieJar;
use crate::coordinator::{Renewal, RenewalGrant};
use crate::credential::{Credential, ACCESS_TOKEN_COOKIE};
use crate::dispatch::{ApiRequest, ApiResponse, Dispatch, FINGERPRINT_HEADER, REFRESH_PATH};
use crate::error::{detail_message, RequestError};
use crate::store::{SessionStore, DEVICE_FINGERPRINT_KEY};

/// Sends requests to one backend origin, carrying the session cookies.
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
    jar: CookieJar,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        crate::ensure_crypto_provider();
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_owned(),
            jar: CookieJar::new(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn jar(&self) -> &CookieJar {
        &self.jar
    }

    /// Seed the credential cookie, e.g. from a token obtained out of band.
    pub fn set_credential(&self, credential: &Credential) {
        self.jar.set(ACCESS_TOKEN_COOKIE, credential.as_str());
    }

    /// The credential currently held in the jar.
    pub fn credential(&self) -> Option<Credential> {
        self.jar.get(ACCESS_TOKEN_COOKIE).filter(|t| !t.is_empty()).map(Credential::new)
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{path}", self.base_url)
        } else {
            format!("{}/{path}", self.base_url)
        }
    }

    /// Send one request. Error statuses come back as [`RequestError`]
    /// carrying the backend's `detail` message when there is one.
    pub async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, RequestError> {
        let mut builder = self.client.request(request.method.clone(), self.url(&request.path));
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(cookie) = self.jar.header_value() {
            builder = builder.header(COOKIE, cookie);
        }
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let resp = builder.send().await?;
        for value in resp.headers().get_all(SET_COOKIE) {
            if let Ok(header) = value.to_str() {
                self.jar.store(header);
            }
        }

        let status = resp.status();
        let body = resp.bytes().await?;
        if status.is_success() {
            return Ok(ApiResponse::new(status.as_u16(), body));
        }

        let message = detail_message(&body)
            .or_else(|| status.canonical_reason().map(str::to_owned))
            .unwrap_or_else(|| "request failed".to_owned());
        debug!(method = %request.method, path = %request.path, status = status.as_u16(), "backend error");
        Err(RequestError::status(status.as_u16(), message))
    }
}

impl Dispatch for HttpTransport {
    fn dispatch(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, RequestError>> {
        Box::pin(self.execute(request))
    }
}

/// Optional body of a successful renewal.
#[derive(Debug, Default, Deserialize)]
struct RefreshBody {
    #[serde(default)]
    expires_in: Option<u64>,
}

/// `POST /auth/refresh`. The new credential arrives as a `Set-Cookie`.
///
/// Sent straight through the transport, bypassing the pipeline, so a
/// failure here can never re-enter the coordinator.
pub struct RefreshRpc {
    transport: Arc<HttpTransport>,
    store: Arc<dyn SessionStore>,
}

impl RefreshRpc {
    pub fn new(transport: Arc<HttpTransport>, store: Arc<dyn SessionStore>) -> Self {
        Self { transport, store }
    }
}

impl Renewal for RefreshRpc {
    fn renew(&self) -> BoxFuture<'_, Result<RenewalGrant, RequestError>> {
        Box::pin(async move {
            let mut request = ApiRequest::post(REFRESH_PATH);
            if let Some(fingerprint) = self.store.get(DEVICE_FINGERPRINT_KEY) {
                request.set_header(FINGERPRINT_HEADER, fingerprint);
            }
            let response = self.transport.execute(request).await?;
            let body: RefreshBody = serde_json::from_slice(&response.body).unwrap_or_default();
            Ok(RenewalGrant { credential: self.transport.credential(), expires_in: body.expires_in })
        })
    }

    fn discard(&self) {
        self.transport.jar().remove(ACCESS_TOKEN_COOKIE);
    }
}
