// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! One session per process: transport, coordinator, pipeline and user state
//! wired together.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::auth::AuthStore;
use crate::config::Config;
use crate::coordinator::RefreshCoordinator;
use crate::credential::Credential;
use crate::dispatch::{ApiRequest, ApiResponse, Dispatch};
use crate::error::RequestError;
use crate::events::{self, RenewalTrigger, SessionEvent};
use crate::expiry::{ExpiryTracker, MIN_RENEWAL_DELAY, RENEWAL_MARGIN};
use crate::fingerprint::{self, EnvironmentSignals, Sha256Digest};
use crate::pipeline::RequestPipeline;
use crate::store::{FileStore, MemoryStore, SessionStore};
use crate::transport::{HttpTransport, RefreshRpc};

pub const DEVICE_REGISTER_PATH: &str = "/auth/device/register";

/// Settings for [`SessionClient::new`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub base_url: String,
    pub timeout: Duration,
    pub renewal_margin: Duration,
    pub min_renewal_delay: Duration,
    pub login_url: String,
    /// Overrides the screen signal of the fingerprint.
    pub screen: Option<String>,
}

impl ClientOptions {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            timeout: Duration::from_secs(30),
            renewal_margin: RENEWAL_MARGIN,
            min_renewal_delay: MIN_RENEWAL_DELAY,
            login_url: "/login".to_owned(),
            screen: None,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            base_url: config.base_url.clone(),
            timeout: config.timeout(),
            renewal_margin: config.renewal_margin(),
            min_renewal_delay: config.min_renewal_delay(),
            login_url: config.login_url.clone(),
            screen: config.screen.clone(),
        }
    }
}

pub struct SessionClient {
    transport: Arc<HttpTransport>,
    store: Arc<dyn SessionStore>,
    signals: EnvironmentSignals,
    coordinator: Arc<RefreshCoordinator>,
    pipeline: Arc<RequestPipeline>,
    auth: AuthStore,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionClient {
    pub fn new(options: ClientOptions, store: Arc<dyn SessionStore>) -> anyhow::Result<Self> {
        let transport = Arc::new(HttpTransport::new(&options.base_url, options.timeout)?);
        let (events, _) = events::channel();

        let renewal = Arc::new(RefreshRpc::new(Arc::clone(&transport), Arc::clone(&store)));
        let tracker = ExpiryTracker::new(options.renewal_margin, options.min_renewal_delay);
        let coordinator =
            RefreshCoordinator::new(renewal, tracker, events.clone(), options.login_url.clone());
        let inner: Arc<dyn Dispatch> = transport.clone();
        let pipeline = Arc::new(RequestPipeline::new(
            inner,
            Arc::clone(&store),
            Arc::clone(&coordinator),
            events.clone(),
        ));
        let auth = AuthStore::new(Arc::clone(&pipeline));

        Ok(Self {
            transport,
            store,
            signals: EnvironmentSignals::detect(options.screen.as_deref()),
            coordinator,
            pipeline,
            auth,
            events,
        })
    }

    /// Build a client from CLI configuration, opening the file store when
    /// one is configured and seeding the credential when one is given.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let store: Arc<dyn SessionStore> = match config.store {
            Some(ref path) => Arc::new(FileStore::open(path)?),
            None => Arc::new(MemoryStore::new()),
        };
        let client = Self::new(ClientOptions::from_config(config), store)?;
        if let Some(ref token) = config.access_token {
            client.authenticated(Credential::new(token.as_str()));
        }
        Ok(client)
    }

    /// Adopt a freshly issued credential and schedule its proactive renewal.
    pub fn authenticated(&self, credential: Credential) -> Option<Duration> {
        self.transport.set_credential(&credential);
        self.coordinator.schedule_proactive_renewal(&credential)
    }

    /// The stored device fingerprint, generating it on first use.
    pub fn ensure_fingerprint(&self) -> String {
        fingerprint::load_or_generate(self.store.as_ref(), &self.signals, Some(&Sha256Digest))
    }

    /// Fire-and-forget device registration. Failures are logged and dropped.
    pub async fn register_device(&self) {
        let fingerprint = self.ensure_fingerprint();
        let request = ApiRequest::post(DEVICE_REGISTER_PATH)
            .json(serde_json::json!({ "fingerprint": fingerprint }))
            .quiet();
        match self.pipeline.send(request).await {
            Ok(_) => info!("device registered"),
            Err(e) => debug!(err = %e, "device registration failed"),
        }
    }

    pub async fn send(&self, request: ApiRequest) -> Result<ApiResponse, RequestError> {
        self.pipeline.send(request).await
    }

    /// Renew the credential now, joining any renewal already in flight.
    pub async fn refresh_now(&self) -> Result<(), RequestError> {
        self.coordinator.renew(RenewalTrigger::Manual).await
    }

    pub async fn logout(&self) {
        self.auth.logout().await;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn auth(&self) -> &AuthStore {
        &self.auth
    }

    pub fn coordinator(&self) -> &Arc<RefreshCoordinator> {
        &self.coordinator
    }

    pub fn transport(&self) -> &Arc<HttpTransport> {
        &self.transport
    }

    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }
}
