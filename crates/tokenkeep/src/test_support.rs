// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test doubles for the dispatch and renewal seams.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::future::BoxFuture;
use parking_lot::Mutex;

use crate::coordinator::{Renewal, RenewalGrant};
use crate::credential::{epoch_secs, Credential};
use crate::dispatch::{ApiRequest, ApiResponse, Dispatch};
use crate::error::{RequestError, UNAUTHORIZED};

/// Build an unsigned JWT-shaped token carrying `claims`.
pub fn token_with_claims(claims: &serde_json::Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"HS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

pub fn credential_with_exp(exp: u64) -> Credential {
    Credential::new(token_with_claims(&serde_json::json!({ "sub": "1", "exp": exp })))
}

/// Credential whose expiry claim is `secs` from the wall clock now.
pub fn credential_expiring_in(secs: u64) -> Credential {
    credential_with_exp(epoch_secs() + secs)
}

/// In-memory backend: answers 401 until authorized, then a scripted error
/// for specific paths.
#[derive(Default)]
pub struct MockBackend {
    authorized: AtomicBool,
    failures: Mutex<HashMap<String, (u16, String)>>,
    bodies: Mutex<HashMap<String, serde_json::Value>>,
    log: Mutex<Vec<ApiRequest>>,
}

impl MockBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn authorized() -> Arc<Self> {
        let backend = Self::default();
        backend.authorized.store(true, Ordering::SeqCst);
        Arc::new(backend)
    }

    pub fn authorize(&self) {
        self.authorized.store(true, Ordering::SeqCst);
    }

    pub fn revoke(&self) {
        self.authorized.store(false, Ordering::SeqCst);
    }

    /// Fail authorized requests to `path` with `status` and `message`.
    pub fn fail_path(&self, path: &str, status: u16, message: &str) {
        self.failures.lock().insert(path.to_owned(), (status, message.to_owned()));
    }

    /// Answer authorized requests to `path` with `body`.
    pub fn respond(&self, path: &str, body: serde_json::Value) {
        self.bodies.lock().insert(path.to_owned(), body);
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.log.lock().clone()
    }

    pub fn request_count(&self) -> usize {
        self.log.lock().len()
    }
}

impl Dispatch for MockBackend {
    fn dispatch(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, RequestError>> {
        Box::pin(async move {
            self.log.lock().push(request.clone());
            if !self.authorized.load(Ordering::SeqCst) {
                return Err(RequestError::status(UNAUTHORIZED, "token expired"));
            }
            if let Some((status, message)) = self.failures.lock().get(&request.path).cloned() {
                return Err(RequestError::status(status, message));
            }
            let body = self.bodies.lock().get(&request.path).cloned().unwrap_or_else(|| {
                serde_json::json!({ "path": request.path, "retry": request.retry })
            });
            Ok(ApiResponse::new(200, body.to_string()))
        })
    }
}

/// Scriptable renewal RPC that counts its calls.
pub struct MockRenewal {
    calls: AtomicU32,
    discarded: AtomicU32,
    fail: AtomicBool,
    delay: Duration,
    lifetime_secs: u64,
    backend: Option<Arc<MockBackend>>,
    grant: Mutex<Option<RenewalGrant>>,
}

impl MockRenewal {
    /// Succeeds after `delay`, authorizing `backend` and issuing a
    /// credential that expires in `lifetime_secs`.
    pub fn new(backend: Option<Arc<MockBackend>>, delay: Duration, lifetime_secs: u64) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            discarded: AtomicU32::new(0),
            fail: AtomicBool::new(false),
            delay,
            lifetime_secs,
            backend,
            grant: Mutex::new(None),
        })
    }

    pub fn failing(delay: Duration) -> Arc<Self> {
        let renewal = Self::new(None, delay, 0);
        renewal.fail.store(true, Ordering::SeqCst);
        renewal
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Return `grant` from every successful renewal instead of a fresh
    /// credential.
    pub fn set_grant(&self, grant: RenewalGrant) {
        *self.grant.lock() = Some(grant);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn discarded(&self) -> u32 {
        self.discarded.load(Ordering::SeqCst)
    }
}

impl Renewal for MockRenewal {
    fn renew(&self) -> BoxFuture<'_, Result<RenewalGrant, RequestError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.delay > Duration::ZERO {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(RequestError::status(UNAUTHORIZED, "refresh token expired"));
            }
            if let Some(ref backend) = self.backend {
                backend.authorize();
            }
            if let Some(grant) = self.grant.lock().clone() {
                return Ok(grant);
            }
            Ok(RenewalGrant {
                credential: Some(credential_expiring_in(self.lifetime_secs)),
                expires_in: Some(self.lifetime_secs),
            })
        })
    }

    fn discard(&self) {
        self.discarded.fetch_add(1, Ordering::SeqCst);
        if let Some(ref backend) = self.backend {
            backend.revoke();
        }
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}
