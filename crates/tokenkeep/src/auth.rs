// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Current-user state.
//!
//! Route guards and other consumers only look at [`AuthStore::is_authenticated`]
//! and [`AuthStore::is_admin`].

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dispatch::ApiRequest;
use crate::pipeline::RequestPipeline;

pub const ME_PATH: &str = "/auth/me";
pub const LOGOUT_PATH: &str = "/auth/logout";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    #[default]
    Active,
    Disabled,
}

/// Per-user quotas and capabilities.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Permissions {
    pub max_concurrent_sessions: u32,
    pub max_session_duration_hours: u32,
    pub daily_session_quota: u32,
    pub can_start_terminal: bool,
    pub can_view_monitoring: bool,
    pub can_export_data: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub language: String,
    pub theme: String,
    pub timezone: String,
}

/// The authenticated user, as returned by `GET /auth/me`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: u64,
    pub username: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name: Option<String>,
    pub role: Role,
    #[serde(default)]
    pub status: AccountStatus,
    #[serde(default)]
    pub groups: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permissions: Option<Permissions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferences: Option<Preferences>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    data: T,
}

pub struct AuthStore {
    pipeline: Arc<RequestPipeline>,
    user: Arc<RwLock<Option<User>>>,
}

impl AuthStore {
    /// The cached user is dropped whenever the coordinator ends the session.
    pub fn new(pipeline: Arc<RequestPipeline>) -> Self {
        let user: Arc<RwLock<Option<User>>> = Arc::new(RwLock::new(None));
        let slot = Arc::clone(&user);
        pipeline.coordinator().on_terminate(move || {
            if let Some(previous) = slot.write().take() {
                debug!(username = %previous.username, "session terminated, user cleared");
            }
        });
        Self { pipeline, user }
    }

    /// Load the current user. Any failure clears the cached user.
    pub async fn fetch_current_user(&self) -> Option<User> {
        let user = match self.pipeline.send(ApiRequest::get(ME_PATH)).await {
            Ok(response) => match response.json::<Envelope<User>>() {
                Ok(envelope) if envelope.success => Some(envelope.data),
                Ok(_) => {
                    debug!("current user lookup unsuccessful");
                    None
                }
                Err(e) => {
                    debug!(err = %e, "malformed current user response");
                    None
                }
            },
            Err(e) => {
                debug!(err = %e, "current user lookup failed");
                None
            }
        };
        self.user.write().clone_from(&user);
        user
    }

    pub fn user(&self) -> Option<User> {
        self.user.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.user.read().is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.user.read().as_ref().is_some_and(|u| u.role == Role::Admin)
    }

    /// The current user's permissions; defaults when unknown.
    pub fn permissions(&self) -> Permissions {
        self.user.read().as_ref().and_then(|u| u.permissions.clone()).unwrap_or_default()
    }

    /// Tell the backend, then drop local session state whatever it said.
    pub async fn logout(&self) {
        if let Err(e) = self.pipeline.send(ApiRequest::post(LOGOUT_PATH)).await {
            debug!(err = %e, "logout request failed, clearing local state anyway");
        }
        let previous = self.user.write().take();
        if let Some(user) = previous {
            info!(username = %user.username, "logged out");
        }
        self.pipeline.coordinator().terminate();
    }
}

#[cfg(test)]
#[path = "auth_tests.rs"]
mod tests;
