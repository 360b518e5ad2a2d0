// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};

use tokenkeep::client::SessionClient;
use tokenkeep::config::{Command, Config};
use tokenkeep::dispatch::ApiRequest;
use tokenkeep::events::SessionEvent;

#[tokio::main]
async fn main() {
    let config = Config::parse();

    if let Err(e) = config.validate() {
        eprintln!("error: {e}");
        std::process::exit(2);
    }

    init_tracing(&config);

    match run(config).await {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("fatal: {e:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing(config: &Config) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.log_format.as_str() {
        "json" => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).json().init();
        }
        _ => {
            fmt::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        }
    }
}

async fn run(config: Config) -> anyhow::Result<i32> {
    let client = SessionClient::from_config(&config)?;
    let fingerprint = client.ensure_fingerprint();

    match config.command {
        Command::Me => match client.auth().fetch_current_user().await {
            Some(user) => {
                println!("{}", serde_json::to_string_pretty(&user)?);
                Ok(0)
            }
            None => {
                eprintln!("not authenticated");
                Ok(1)
            }
        },
        Command::Get { ref path } => match client.send(ApiRequest::get(path.as_str())).await {
            Ok(response) => {
                println!("{}", response.text());
                Ok(0)
            }
            Err(e) => {
                eprintln!("{e}");
                Ok(1)
            }
        },
        Command::Refresh => match client.refresh_now().await {
            Ok(()) => {
                let next = client.coordinator().tracker().scheduled_delay();
                match next {
                    Some(delay) => println!("renewed; next renewal in {}s", delay.as_secs()),
                    None => println!("renewed"),
                }
                Ok(0)
            }
            Err(e) => {
                eprintln!("renewal failed: {e}");
                Ok(1)
            }
        },
        Command::Fingerprint => {
            println!("{fingerprint}");
            Ok(0)
        }
        Command::Register => {
            client.register_device().await;
            Ok(0)
        }
        Command::Logout => {
            client.logout().await;
            println!("logged out; sign in again at {}", client.coordinator().login_url());
            Ok(0)
        }
        Command::Watch => watch(&client).await,
    }
}

/// Keep the session alive until interrupted or logged out, printing every
/// session event as a JSON line.
async fn watch(client: &SessionClient) -> anyhow::Result<i32> {
    let mut events = client.subscribe();
    client.register_device().await;
    if client.auth().fetch_current_user().await.is_none() {
        warn!("no authenticated user at startup");
    }
    info!("watching session");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted");
                return Ok(0);
            }
            event = events.recv() => match event {
                Ok(event) => {
                    println!("{}", serde_json::to_string(&event)?);
                    if let SessionEvent::LoggedOut { .. } = event {
                        return Ok(1);
                    }
                }
                Err(RecvError::Lagged(n)) => warn!(skipped = n, "session events lagged"),
                Err(RecvError::Closed) => return Ok(0),
            },
        }
    }
}
