// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Vireo live view server.
//! `GET /` renders a fresh session server-side; `GET /live?sid=` upgrades to
//! the websocket that carries the session's live frames.

mod app;
mod demo;
mod socket;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::net::TcpListener;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vireo_app_core::config::{ConfigService, ConfigStore};
use vireo_app_core::prefs::{ServerPrefs, SERVER_PREFS_KEY};
use vireo_config_fs::FsConfigStore;
use vireo_session::{spawn_sweeper, Registry};

#[derive(Parser, Debug)]
#[command(author, version, about = "Vireo live view server")]
struct Args {
    /// TCP listener for browsers (e.g. 127.0.0.1:4000); overrides saved prefs
    #[arg(long)]
    listen: Option<SocketAddr>,
    /// Seconds a session survives without activity
    #[arg(long)]
    session_ttl_secs: Option<u64>,
    /// Seconds between expiry sweeps
    #[arg(long)]
    sweep_interval_secs: Option<u64>,
    /// Ask clients to enable debug tooling
    #[arg(long)]
    debug: bool,
    /// Skip reading and writing the config file
    #[arg(long)]
    no_config: bool,
}

impl Args {
    /// Command-line values win over saved prefs.
    fn apply(&self, mut prefs: ServerPrefs) -> ServerPrefs {
        if let Some(listen) = self.listen {
            prefs.listen = listen.to_string();
        }
        if let Some(ttl) = self.session_ttl_secs {
            prefs.session_ttl_secs = ttl;
        }
        if let Some(interval) = self.sweep_interval_secs {
            prefs.sweep_interval_secs = interval;
        }
        prefs.debug |= self.debug;
        prefs
    }
}

/// Load prefs best-effort, persisting defaults the first time.
fn load_prefs<S: ConfigStore>(config: &ConfigService<S>) -> ServerPrefs {
    config
        .load_or_init(SERVER_PREFS_KEY)
        .unwrap_or_else(|err| {
            warn!(%err, "could not load server prefs; using defaults");
            ServerPrefs::default()
        })
}

fn saved_prefs(no_config: bool) -> ServerPrefs {
    if no_config {
        return ServerPrefs::default();
    }
    match FsConfigStore::new() {
        Ok(store) => load_prefs(&ConfigService::new(store)),
        Err(err) => {
            warn!(%err, "config dir unavailable; using defaults");
            ServerPrefs::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    let prefs = args.apply(saved_prefs(args.no_config));
    let listen: SocketAddr = prefs
        .listen
        .parse()
        .with_context(|| format!("invalid listen address {:?}", prefs.listen))?;

    let registry = Arc::new(Registry::with_memory_ttl(prefs.session_ttl()));
    let sweeper = spawn_sweeper(Arc::clone(&registry), prefs.sweep_interval());
    let app = app::router(app::AppState::new(registry, &prefs));

    let listener = TcpListener::bind(listen)
        .await
        .with_context(|| format!("bind {listen}"))?;
    info!(%listen, ttl_secs = prefs.session_ttl_secs, "vireo listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.shutdown().await;
    info!("vireo stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(%err, "failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use vireo_dry_tests::InMemoryConfigStore;

    #[test]
    fn flags_override_saved_prefs() {
        let args = Args::parse_from([
            "vireo-server",
            "--listen",
            "0.0.0.0:8080",
            "--session-ttl-secs",
            "5",
            "--debug",
        ]);
        let prefs = args.apply(ServerPrefs {
            sweep_interval_secs: 7,
            ..ServerPrefs::default()
        });
        assert_eq!(prefs.listen, "0.0.0.0:8080");
        assert_eq!(prefs.session_ttl_secs, 5);
        assert_eq!(prefs.sweep_interval_secs, 7);
        assert!(prefs.debug);
    }

    #[test]
    fn first_load_persists_defaults() {
        let store = InMemoryConfigStore::new();
        let prefs = load_prefs(&ConfigService::new(store.clone()));
        assert_eq!(prefs, ServerPrefs::default());
        assert!(store.contains_key(SERVER_PREFS_KEY));
    }

    #[test]
    fn unreadable_config_falls_back_to_defaults() {
        let store = InMemoryConfigStore::new();
        store.set_fail_on_load(true);
        let prefs = load_prefs(&ConfigService::new(store.clone()));
        assert_eq!(prefs, ServerPrefs::default());
        assert_eq!(store.save_count(), 0);
    }
}
