// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

pub mod auth;
pub mod client;
pub mod config;
pub mod cookies;
pub mod coordinator;
pub mod credential;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod expiry;
pub mod fingerprint;
pub mod pipeline;
pub mod store;
pub mod test_support;
pub mod transport;

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the rustls crypto provider (needed for reqwest even on plain HTTP).
pub fn ensure_crypto_provider() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
