// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Single-flight credential renewal.
//!
//! The coordinator owns the refresh state (`Idle` or `Refreshing`) and the
//! FIFO queue of requests parked while a renewal is in flight. The first
//! request to fail with 401 leads the episode and issues the one renewal
//! call; every other request that fails during the episode parks and is
//! replayed (or rejected) when the leader settles. The state check and the
//! `Idle -> Refreshing` transition happen under one lock that is never held
//! across an `.await`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tracing::{debug, info, warn};

use crate::credential::{epoch_secs, Credential};
use crate::dispatch::{ApiRequest, ApiResponse, Dispatch};
use crate::error::RequestError;
use crate::events::{RenewalTrigger, SessionEvent};
use crate::expiry::ExpiryTracker;

/// Result of a successful renewal call.
#[derive(Debug, Clone, Default)]
pub struct RenewalGrant {
    /// The new credential, when the transport exposes it.
    pub credential: Option<Credential>,
    /// Server-provided lifetime hint in seconds.
    pub expires_in: Option<u64>,
}

/// The renewal RPC.
pub trait Renewal: Send + Sync {
    fn renew(&self) -> BoxFuture<'_, Result<RenewalGrant, RequestError>>;

    /// Drop the locally held credential after the session is terminated.
    fn discard(&self);
}

/// A parked request, resumed with the outcome of the renewal.
type Continuation = Box<dyn FnOnce(Result<(), RequestError>) + Send>;

/// Local session state dropped on terminal logout.
type ResetHook = Arc<dyn Fn() + Send + Sync>;

/// Who is waiting on the in-flight renewal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Waiter {
    /// A failed request that replays once the renewal settles.
    Request,
    /// Another renewal trigger joining the episode.
    Renewal,
}

enum RefreshState {
    Idle,
    Refreshing { pending: VecDeque<Continuation>, requests: usize },
}

/// What settling an episode released.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Released {
    parked: usize,
    requests: usize,
}

enum Admission {
    /// The caller started the episode and must issue the renewal.
    Leader,
    /// A renewal is in flight; wait for its outcome.
    Parked(oneshot::Receiver<Result<(), RequestError>>),
}

/// Settles the episode on drop if the leader never got to, so parked
/// requests are not stranded when the leading future is dropped.
struct Episode<'a> {
    coordinator: &'a RefreshCoordinator,
    settled: bool,
}

impl Episode<'_> {
    fn settle(&mut self, outcome: Result<(), RequestError>) -> Released {
        self.settled = true;
        self.coordinator.settle(outcome)
    }
}

impl Drop for Episode<'_> {
    fn drop(&mut self) {
        if !self.settled {
            let released =
                self.coordinator.settle(Err(RequestError::internal("renewal abandoned")));
            warn!(parked = released.parked, "renewal abandoned before completing");
        }
    }
}

/// Process-wide refresh coordination.
pub struct RefreshCoordinator {
    state: Mutex<RefreshState>,
    renewal: Arc<dyn Renewal>,
    tracker: ExpiryTracker,
    events: broadcast::Sender<SessionEvent>,
    login_url: String,
    renewals: AtomicU64,
    resets: Mutex<Vec<ResetHook>>,
}

impl RefreshCoordinator {
    pub fn new(
        renewal: Arc<dyn Renewal>,
        tracker: ExpiryTracker,
        events: broadcast::Sender<SessionEvent>,
        login_url: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(RefreshState::Idle),
            renewal,
            tracker,
            events,
            login_url: login_url.into(),
            renewals: AtomicU64::new(0),
            resets: Mutex::new(Vec::new()),
        })
    }

    pub fn is_refreshing(&self) -> bool {
        matches!(*self.state.lock(), RefreshState::Refreshing { .. })
    }

    /// Number of requests parked on the in-flight renewal.
    pub fn pending(&self) -> usize {
        match &*self.state.lock() {
            RefreshState::Idle => 0,
            RefreshState::Refreshing { pending, .. } => pending.len(),
        }
    }

    /// Total renewal calls issued by this coordinator.
    pub fn renewal_count(&self) -> u64 {
        self.renewals.load(Ordering::Relaxed)
    }

    pub fn tracker(&self) -> &ExpiryTracker {
        &self.tracker
    }

    pub fn login_url(&self) -> &str {
        &self.login_url
    }

    /// Decide what happens to a failed request.
    ///
    /// Non-authorization failures, failures of retried requests and failures
    /// of the renewal RPC itself come back unchanged. Anything else is
    /// replayed through `replay` once the credential has been renewed.
    pub async fn recover(
        self: &Arc<Self>,
        mut request: ApiRequest,
        error: RequestError,
        replay: &dyn Dispatch,
    ) -> Result<ApiResponse, RequestError> {
        if !error.is_unauthorized() {
            return Err(error);
        }
        if request.is_renewal() {
            // An in-flight episode decides the session's fate on its own.
            if !self.is_refreshing() {
                warn!(path = %request.path, "renewal request unauthorized");
                self.terminate();
            }
            return Err(error);
        }
        if request.retry {
            debug!(path = %request.path, "unauthorized after renewal, giving up");
            return Err(error);
        }

        request.retry = true;
        match self.admit(Waiter::Request) {
            Admission::Parked(rx) => {
                debug!(path = %request.path, "renewal in flight, parking request");
                match rx.await {
                    Ok(Ok(())) => replay.dispatch(request).await,
                    Ok(Err(renewal_err)) => Err(renewal_err),
                    Err(_) => Err(RequestError::internal("renewal abandoned")),
                }
            }
            Admission::Leader => match self.lead(RenewalTrigger::Reactive).await {
                Ok(_) => replay.dispatch(request).await,
                Err(_) => Err(error),
            },
        }
    }

    /// Renew now unless a renewal is already in flight, in which case wait
    /// for that one. Failure terminates the session only when requests were
    /// parked on the renewal.
    pub async fn renew(self: &Arc<Self>, trigger: RenewalTrigger) -> Result<(), RequestError> {
        match self.admit(Waiter::Renewal) {
            Admission::Parked(rx) => {
                debug!(?trigger, "renewal already in flight, joining it");
                rx.await.unwrap_or_else(|_| Err(RequestError::internal("renewal abandoned")))
            }
            Admission::Leader => self.lead(trigger).await.map(|_| ()),
        }
    }

    /// Replace the proactive timer with one derived from `credential`.
    pub fn schedule_proactive_renewal(self: &Arc<Self>, credential: &Credential) -> Option<Duration> {
        self.schedule_expiry(credential.expires_at())
    }

    fn schedule_expiry(self: &Arc<Self>, expires_at: Option<u64>) -> Option<Duration> {
        let weak = Arc::downgrade(self);
        self.tracker.schedule_at(expires_at, move || async move {
            let Some(coordinator) = weak.upgrade() else {
                return;
            };
            if let Err(e) = coordinator.renew(RenewalTrigger::Proactive).await {
                debug!(err = %e, "proactive renewal failed, leaving it to the next request");
            }
        })
    }

    /// Run `hook` on every terminal logout, before `LoggedOut` is emitted.
    pub fn on_terminate(&self, hook: impl Fn() + Send + Sync + 'static) {
        self.resets.lock().push(Arc::new(hook));
    }

    /// End the session: drop the credential and local session state, stop
    /// the timer, and ask the user to re-authenticate.
    pub fn terminate(&self) {
        self.renewal.discard();
        self.tracker.cancel();
        let resets = self.resets.lock().clone();
        for reset in resets {
            reset();
        }
        warn!(login_url = %self.login_url, "session terminated, re-authentication required");
        let _ = self.events.send(SessionEvent::LoggedOut { login_url: self.login_url.clone() });
    }

    fn admit(&self, waiter: Waiter) -> Admission {
        let (tx, rx) = oneshot::channel();
        let continuation: Continuation = Box::new(move |outcome| {
            let _ = tx.send(outcome);
        });
        if self.enqueue_or_lead(continuation, waiter) {
            Admission::Leader
        } else {
            Admission::Parked(rx)
        }
    }

    /// Returns `true` if the caller now leads a new episode (the
    /// continuation is dropped); otherwise the continuation is queued.
    fn enqueue_or_lead(&self, continuation: Continuation, waiter: Waiter) -> bool {
        let mut state = self.state.lock();
        match &mut *state {
            RefreshState::Idle => {
                *state = RefreshState::Refreshing { pending: VecDeque::new(), requests: 0 };
                true
            }
            RefreshState::Refreshing { pending, requests } => {
                pending.push_back(continuation);
                if waiter == Waiter::Request {
                    *requests += 1;
                }
                false
            }
        }
    }

    /// Return to `Idle` and resume every parked continuation in FIFO order.
    fn settle(&self, outcome: Result<(), RequestError>) -> Released {
        let (pending, requests) = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, RefreshState::Idle) {
                RefreshState::Idle => (VecDeque::new(), 0),
                RefreshState::Refreshing { pending, requests } => (pending, requests),
            }
        };
        let released = Released { parked: pending.len(), requests };
        for continuation in pending {
            continuation(outcome.clone());
        }
        released
    }

    async fn lead(self: &Arc<Self>, trigger: RenewalTrigger) -> Result<RenewalGrant, RequestError> {
        let mut episode = Episode { coordinator: &**self, settled: false };
        self.renewals.fetch_add(1, Ordering::Relaxed);
        debug!(?trigger, "renewing credential");

        let result = self.renewal.renew().await;
        match result {
            Ok(grant) => {
                let released = episode.settle(Ok(()));
                let expires_at = grant.credential.as_ref().and_then(Credential::expires_at);
                // Opaque credential: fall back to the lifetime hint.
                let due =
                    expires_at.or_else(|| grant.expires_in.map(|secs| epoch_secs() + secs));
                let next = self.schedule_expiry(due);
                info!(
                    ?trigger,
                    resumed = released.parked,
                    expires_in = grant.expires_in,
                    next_renewal_secs = next.map(|d| d.as_secs()),
                    "credential renewed"
                );
                let _ = self.events.send(SessionEvent::Renewed { trigger, expires_at });
                Ok(grant)
            }
            Err(e) => {
                let released = episode.settle(Err(e.clone()));
                warn!(?trigger, rejected = released.parked, err = %e, "credential renewal failed");
                let _ = self
                    .events
                    .send(SessionEvent::RenewalFailed { trigger, error: e.to_string() });
                // A lone timer-driven renewal may fail quietly; rejected
                // requests end the session.
                if trigger == RenewalTrigger::Reactive || released.requests > 0 {
                    self.terminate();
                }
                Err(e)
            }
        }
    }
}

#[cfg(test)]
#[path = "coordinator_tests.rs"]
mod tests;
