// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Proactive renewal timer driven by the credential's expiry claim.

use std::future::Future;
use std::time::Duration;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::credential::{epoch_secs, Credential};

/// Renew this long before the credential expires.
pub const RENEWAL_MARGIN: Duration = Duration::from_secs(1800);

/// Never schedule a renewal sooner than this.
pub const MIN_RENEWAL_DELAY: Duration = Duration::from_secs(10);

/// Delay until proactive renewal is due: `max(remaining - margin, min_delay)`.
///
/// `None` when the credential has already expired at `now`.
pub fn renewal_delay(
    expires_at: u64,
    now: u64,
    margin: Duration,
    min_delay: Duration,
) -> Option<Duration> {
    if expires_at <= now {
        return None;
    }
    let remaining = expires_at - now;
    Some(Duration::from_secs(remaining.saturating_sub(margin.as_secs())).max(min_delay))
}

struct ScheduledRenewal {
    cancel: CancellationToken,
    delay: Duration,
}

/// Owns the single proactive renewal timer.
pub struct ExpiryTracker {
    margin: Duration,
    min_delay: Duration,
    timer: Mutex<Option<ScheduledRenewal>>,
}

impl ExpiryTracker {
    pub fn new(margin: Duration, min_delay: Duration) -> Self {
        Self { margin, min_delay, timer: Mutex::new(None) }
    }

    /// Replace any scheduled renewal with one derived from `credential`.
    ///
    /// The previous timer is always cancelled, even when the new credential
    /// yields nothing to schedule. Returns the delay of the new timer.
    /// Must be called from within a tokio runtime.
    pub fn schedule<F, Fut>(&self, credential: &Credential, task: F) -> Option<Duration>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.schedule_at(credential.expires_at(), task)
    }

    /// Like [`ExpiryTracker::schedule`], from an expiry in epoch seconds.
    /// `None` only cancels the previous timer.
    pub fn schedule_at<F, Fut>(&self, expires_at: Option<u64>, task: F) -> Option<Duration>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let mut slot = self.timer.lock();
        if let Some(prev) = slot.take() {
            prev.cancel.cancel();
        }

        let Some(expires_at) = expires_at else {
            tracing::debug!("no readable expiry, skipping proactive renewal");
            return None;
        };
        let Some(delay) = renewal_delay(expires_at, epoch_secs(), self.margin, self.min_delay)
        else {
            tracing::debug!(expires_at, "credential already expired, skipping proactive renewal");
            return None;
        };

        let cancel = CancellationToken::new();
        *slot = Some(ScheduledRenewal { cancel: cancel.clone(), delay });
        tokio::spawn(async move {
            tokio::select! {
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {
                    // Mark fired so `scheduled_delay` stops reporting it.
                    cancel.cancel();
                    task().await;
                }
            }
        });

        tracing::info!(delay_secs = delay.as_secs(), expires_at, "proactive renewal scheduled");
        Some(delay)
    }

    /// Cancel the pending timer, if any.
    pub fn cancel(&self) {
        if let Some(prev) = self.timer.lock().take() {
            prev.cancel.cancel();
            tracing::debug!("proactive renewal cancelled");
        }
    }

    /// Delay of the timer that is still pending, if any.
    pub fn scheduled_delay(&self) -> Option<Duration> {
        self.timer.lock().as_ref().filter(|t| !t.cancel.is_cancelled()).map(|t| t.delay)
    }

    pub fn margin(&self) -> Duration {
        self.margin
    }

    pub fn min_delay(&self) -> Duration {
        self.min_delay
    }
}

impl Default for ExpiryTracker {
    fn default() -> Self {
        Self::new(RENEWAL_MARGIN, MIN_RENEWAL_DELAY)
    }
}

impl Drop for ExpiryTracker {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[cfg(test)]
#[path = "expiry_tests.rs"]
mod tests;
