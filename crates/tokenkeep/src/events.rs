// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// How a renewal was triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenewalTrigger {
    /// The expiry timer fired ahead of expiry.
    Proactive,
    /// A request failed with an authorization error.
    Reactive,
    /// Requested explicitly by the caller.
    Manual,
}

/// Events emitted by the session layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The credential was renewed.
    Renewed {
        trigger: RenewalTrigger,
        /// Epoch seconds, when the new credential carries an expiry claim.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        expires_at: Option<u64>,
    },
    /// A renewal attempt failed.
    RenewalFailed { trigger: RenewalTrigger, error: String },
    /// The session is gone; the user must re-authenticate at `login_url`.
    LoggedOut { login_url: String },
    /// A user-visible notification for a failed request.
    Notice { message: String },
}

/// Capacity of the session event channel.
pub const EVENT_CAPACITY: usize = 64;

pub fn channel() -> (broadcast::Sender<SessionEvent>, broadcast::Receiver<SessionEvent>) {
    broadcast::channel(EVENT_CAPACITY)
}
