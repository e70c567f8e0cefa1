// SPDX-License-Identifier: Apache-2.0

//! Shared application state: one instance wires every collaborator and is
//! handed to axum as the router's `State`.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::attendance::AttendanceOrchestrator;
use crate::channel::OperatorChannel;
use crate::config::EdgeConfig;
use crate::counter::IdAllocator;
use crate::decisions::DecisionArbiter;
use crate::devices::registry::DeviceRegistry;
use crate::enrollment::EnrollmentOrchestrator;
use crate::remote::RemoteClient;
use crate::store::LocalStore;
use crate::sync::SyncWorker;
use crate::transport::auth::{BearerTokenChecker, CredentialChecker};

/// Everything the edge HTTP surface and background workers share.
pub struct AppState {
    pub config: EdgeConfig,
    pub store: Arc<dyn LocalStore>,
    pub registry: Arc<DeviceRegistry>,
    pub remote: Arc<RemoteClient>,
    pub allocator: IdAllocator,
    pub enrollment: Arc<EnrollmentOrchestrator>,
    pub attendance: Arc<AttendanceOrchestrator>,
    pub arbiter: Arc<DecisionArbiter>,
    pub channel: Arc<OperatorChannel>,
    pub credential_checker: Arc<dyn CredentialChecker>,
    pub shutdown: CancellationToken,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: EdgeConfig,
        store: Arc<dyn LocalStore>,
        registry: Arc<DeviceRegistry>,
        remote: Arc<RemoteClient>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let allocator = IdAllocator::new(store.clone());
        let channel = Arc::new(OperatorChannel::new());
        let arbiter = Arc::new(DecisionArbiter::new(store.clone(), remote.clone(), channel.clone()));
        let attendance = AttendanceOrchestrator::new(
            store.clone(),
            registry.clone(),
            remote.clone(),
            channel.clone(),
            arbiter.clone(),
            config.timestamp_tz(),
        );
        let enrollment = Arc::new(EnrollmentOrchestrator::new(
            store.clone(),
            registry.clone(),
            remote.clone(),
            allocator.clone(),
            config.remote_timeout(),
            config.probe_timeout(),
        ));
        let credential_checker: Arc<dyn CredentialChecker> =
            Arc::new(BearerTokenChecker::new(config.auth_token.clone()));

        Arc::new(Self {
            config,
            store,
            registry,
            remote,
            allocator,
            enrollment,
            attendance,
            arbiter,
            channel,
            credential_checker,
            shutdown,
        })
    }

    /// Spawn the background sync worker (spec §4.10). Call once at startup.
    pub fn spawn_sync_worker(&self) -> tokio::task::JoinHandle<()> {
        let worker = SyncWorker::new(
            self.store.clone(),
            self.remote.clone(),
            self.channel.clone(),
            self.config.sync_interval(),
            self.config.probe_timeout(),
            self.config.sync_max_attempts,
        );
        worker.spawn(self.shutdown.clone())
    }
}
