// SPDX-License-Identifier: Apache-2.0

//! Edge attendance coordinator: mediates between a pool of fingerprint
//! scanners and a remote central backend, degrading to offline capture and
//! deferred sync whenever the remote is unreachable (spec §1, §2).

pub mod attendance;
pub mod channel;
pub mod config;
pub mod connectivity;
pub mod counter;
pub mod decisions;
pub mod devices;
pub mod enrollment;
pub mod error;
pub mod models;
pub mod remote;
pub mod state;
pub mod store;
pub mod sync;
pub mod transport;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::EdgeConfig;
use crate::devices::driver::ZkDriver;
use crate::devices::registry::DeviceRegistry;
use crate::remote::RemoteClient;
use crate::state::AppState;
use crate::store::InMemoryStore;
use crate::transport::build_router;

/// Run the edge coordinator until shutdown.
pub async fn run(config: EdgeConfig) -> anyhow::Result<()> {
    let addr = format!("{}:{}", config.host, config.port);
    let shutdown = CancellationToken::new();

    let store = InMemoryStore::new();
    let configs = DeviceRegistry::load_config(&config.device_config);
    let registry = DeviceRegistry::new(Arc::new(ZkDriver), configs);
    let remote = Arc::new(RemoteClient::new(config.host_remote_url.clone(), config.remote_timeout()));

    let state = AppState::new(config, store, registry.clone(), remote, shutdown.clone());

    state.spawn_sync_worker();

    match registry.start_all(state.config.remote_timeout(), state.attendance.capture_callback()).await {
        Ok(summary) => {
            tracing::info!(started = ?summary.started, failed = ?summary.failed, "device capture supervision started");
        }
        Err(e) => {
            tracing::warn!(err = %e, "no device connected at startup; capture supervision idle until /fingerprint/start_attendance");
        }
    }

    tracing::info!("edge coordinator listening on {addr}");
    let router = build_router(Arc::clone(&state));
    let listener = TcpListener::bind(&addr).await?;

    let ctrl_c_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c_shutdown.cancel();
        }
    });

    let shutdown_signal = shutdown.clone();
    axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown_signal.cancelled().await })
        .await?;

    registry.stop_all().await;
    Ok(())
}
