// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};

/// Session-continuity client for a cookie-authenticated backend.
#[derive(Debug, Parser)]
#[command(name = "tokenkeep", version, about)]
pub struct Config {
    /// API base URL.
    #[arg(long, env = "TOKENKEEP_BASE_URL", default_value = "http://127.0.0.1:8000/api/v1")]
    pub base_url: String,

    /// Per-request timeout in seconds.
    #[arg(long, env = "TOKENKEEP_TIMEOUT_SECS", default_value_t = 30)]
    pub timeout_secs: u64,

    /// Renew this many seconds before the credential expires.
    #[arg(long, env = "TOKENKEEP_RENEWAL_MARGIN_SECS", default_value_t = 1800)]
    pub renewal_margin_secs: u64,

    /// Lower bound on the proactive renewal delay, in seconds.
    #[arg(long, env = "TOKENKEEP_MIN_RENEWAL_DELAY_SECS", default_value_t = 10)]
    pub min_renewal_delay_secs: u64,

    /// Where the user is sent to re-authenticate.
    #[arg(long, env = "TOKENKEEP_LOGIN_URL", default_value = "/login")]
    pub login_url: String,

    /// Seed credential (the `access_token` cookie value).
    #[arg(long, env = "TOKENKEEP_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// JSON file backing the session store. In-memory when unset.
    #[arg(long, env = "TOKENKEEP_STORE")]
    pub store: Option<PathBuf>,

    /// Screen resolution reported in the fingerprint, as `WxH`.
    #[arg(long, env = "TOKENKEEP_SCREEN")]
    pub screen: Option<String>,

    /// Log format (json or text).
    #[arg(long, env = "TOKENKEEP_LOG_FORMAT", default_value = "text")]
    pub log_format: String,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "TOKENKEEP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Print the current user.
    Me,
    /// GET a path relative to the base URL and print the body.
    Get { path: String },
    /// Renew the credential now.
    Refresh,
    /// Print the device fingerprint.
    Fingerprint,
    /// Register this device with the backend.
    Register,
    /// Log out and clear local session state.
    Logout,
    /// Keep the session alive, printing session events as JSON lines.
    Watch,
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            anyhow::bail!("--base-url must be an http(s) URL, got {:?}", self.base_url);
        }
        if self.timeout_secs == 0 {
            anyhow::bail!("--timeout-secs must be positive");
        }
        if self.min_renewal_delay_secs == 0 {
            anyhow::bail!("--min-renewal-delay-secs must be positive");
        }
        if let Some(ref screen) = self.screen {
            parse_screen(screen)?;
        }
        if let Command::Get { ref path } = self.command {
            if path.is_empty() {
                anyhow::bail!("get requires a non-empty path");
            }
        }
        match self.log_format.as_str() {
            "json" | "text" => {}
            other => anyhow::bail!("invalid log format: {other}"),
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn renewal_margin(&self) -> Duration {
        Duration::from_secs(self.renewal_margin_secs)
    }

    pub fn min_renewal_delay(&self) -> Duration {
        Duration::from_secs(self.min_renewal_delay_secs)
    }
}

/// Parse a `WxH` resolution.
pub fn parse_screen(s: &str) -> anyhow::Result<(u32, u32)> {
    let (w, h) = s
        .split_once('x')
        .ok_or_else(|| anyhow::anyhow!("invalid screen {s:?}: expected WxH"))?;
    let width: u32 = w.parse().map_err(|_| anyhow::anyhow!("invalid screen width: {w:?}"))?;
    let height: u32 = h.parse().map_err(|_| anyhow::anyhow!("invalid screen height: {h:?}"))?;
    Ok((width, height))
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
