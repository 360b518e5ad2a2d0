// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Outgoing request interceptor chain.
//!
//! Every request gets the device fingerprint attached before it is sent.
//! Failures are handed to the [`RefreshCoordinator`], which either renews
//! the credential and replays the request back through this pipeline, or
//! returns the error. Anything that is still a non-401 failure after that is
//! surfaced as a [`SessionEvent::Notice`].

use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::sync::broadcast;
use tracing::debug;

use crate::coordinator::RefreshCoordinator;
use crate::dispatch::{ApiRequest, ApiResponse, Dispatch, FINGERPRINT_HEADER};
use crate::error::RequestError;
use crate::events::SessionEvent;
use crate::store::{SessionStore, DEVICE_FINGERPRINT_KEY};

/// Fallback notice text when a failure carries no message.
const GENERIC_FAILURE: &str = "request failed";

pub struct RequestPipeline {
    inner: Arc<dyn Dispatch>,
    store: Arc<dyn SessionStore>,
    coordinator: Arc<RefreshCoordinator>,
    events: broadcast::Sender<SessionEvent>,
}

impl RequestPipeline {
    pub fn new(
        inner: Arc<dyn Dispatch>,
        store: Arc<dyn SessionStore>,
        coordinator: Arc<RefreshCoordinator>,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self { inner, store, coordinator, events }
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    /// Attach the stored fingerprint, if any.
    pub fn before_send(&self, request: &mut ApiRequest) {
        if let Some(fingerprint) = self.store.get(DEVICE_FINGERPRINT_KEY).filter(|f| !f.is_empty())
        {
            request.set_header(FINGERPRINT_HEADER, fingerprint);
        }
    }

    /// Send `request` through the full chain.
    pub async fn send(&self, mut request: ApiRequest) -> Result<ApiResponse, RequestError> {
        self.before_send(&mut request);
        let error = match self.inner.dispatch(request.clone()).await {
            Ok(response) => return Ok(response),
            Err(e) => e,
        };
        debug!(path = %request.path, status = ?error.status, "request failed");

        // A replay's failure is reported once, by the send that triggered it.
        let quiet = request.quiet || request.retry;
        let result = self.coordinator.recover(request, error, self).await;
        if let Err(ref e) = result {
            self.notify(e, quiet);
        }
        result
    }

    /// Report a failure on the notification channel unless it is an
    /// authorization failure or the request opted out.
    fn notify(&self, error: &RequestError, quiet: bool) {
        if quiet || error.is_unauthorized() {
            return;
        }
        let message = if error.message.is_empty() {
            GENERIC_FAILURE.to_owned()
        } else {
            error.message.clone()
        };
        let _ = self.events.send(SessionEvent::Notice { message });
    }
}

impl Dispatch for RequestPipeline {
    fn dispatch(&self, request: ApiRequest) -> BoxFuture<'_, Result<ApiResponse, RequestError>> {
        Box::pin(self.send(request))
    }
}

#[cfg(test)]
#[path = "pipeline_tests.rs"]
mod tests;
