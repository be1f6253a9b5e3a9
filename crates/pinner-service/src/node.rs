// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The pinner node: wiring of the scanner, the sweeper, and the operations
//! behind the admin API.

use std::{sync::Arc, time::Duration};

use pinner_core::Skylink;
use pinner_daemon_client::{DaemonClient, DaemonError};
use pinner_store::{settings, PinStore, StoreError};
use tokio_util::sync::CancellationToken;

use crate::config::PinnerConfig;

mod pinned_set;
mod scanner;
mod schedule;
mod status;
mod sweeper;

pub use pinned_set::{PinnedSet, RebuildHandle};
pub use scanner::{
    Scanner, SLEEP_BETWEEN_HEALTH_CHECKS, SLEEP_BETWEEN_PINS, SLEEP_BETWEEN_SCANS,
};
pub use status::SweepStatus;
pub use sweeper::{Sweeper, SWEEP_INTERVAL};

/// Error raised by the pin and unpin intents.
#[derive(Debug, thiserror::Error)]
pub enum IntentError {
    /// The store rejected the operation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Resolving a version-2 skylink through the daemon failed.
    #[error("failed to resolve skylink: {0}")]
    Resolve(#[from] DaemonError),
}

/// Builder to construct a [`PinnerNode`].
#[derive(Debug, Default)]
pub struct PinnerNodeBuilder {
    store: Option<Arc<dyn PinStore>>,
    daemon: Option<Arc<dyn DaemonClient>>,
    sweep_interval: Option<Duration>,
}

impl PinnerNodeBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the store the node coordinates through.
    pub fn with_store(mut self, store: Arc<dyn PinStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Sets the client for the local storage daemon.
    pub fn with_daemon(mut self, daemon: Arc<dyn DaemonClient>) -> Self {
        self.daemon = Some(daemon);
        self
    }

    /// Overrides the period of the scheduled sweeps.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Consumes the builder and returns the node.
    pub fn build(self, config: &PinnerConfig) -> anyhow::Result<PinnerNode> {
        let store = self
            .store
            .ok_or_else(|| anyhow::anyhow!("a store is required to build a node"))?;
        let daemon = self
            .daemon
            .ok_or_else(|| anyhow::anyhow!("a daemon client is required to build a node"))?;

        let pinned_set = PinnedSet::new();
        let scanner = Arc::new(Scanner::new(
            Arc::clone(&store),
            Arc::clone(&daemon),
            pinned_set.clone(),
            config.server_name.clone(),
            config.min_pinners,
            config.sleep_between_scans,
        ));
        let sweeper = Sweeper::new(
            Arc::clone(&store),
            Arc::clone(&daemon),
            pinned_set,
            config.server_name.clone(),
        );

        Ok(PinnerNode {
            store,
            daemon,
            scanner,
            sweeper,
            server_name: config.server_name.clone(),
            sweep_interval: self.sweep_interval.unwrap_or(SWEEP_INTERVAL),
        })
    }
}

/// A pinner node.
///
/// Owns the background workers of one service instance and exposes the
/// operations the admin API calls.
#[derive(Debug)]
pub struct PinnerNode {
    store: Arc<dyn PinStore>,
    daemon: Arc<dyn DaemonClient>,
    scanner: Arc<Scanner>,
    sweeper: Sweeper,
    server_name: String,
    sweep_interval: Duration,
}

impl PinnerNode {
    /// Creates a new [`PinnerNodeBuilder`] for constructing a node.
    pub fn builder() -> PinnerNodeBuilder {
        PinnerNodeBuilder::new()
    }

    /// The name under which this server appears in the store.
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Runs the node until the token is cancelled.
    pub async fn run(&self, cancel_token: CancellationToken) -> anyhow::Result<()> {
        tracing::info!(server_name = %self.server_name, "starting the pinner node");
        self.sweeper.update_schedule(self.sweep_interval);
        self.scanner.run(cancel_token).await;
        self.sweeper.cancel_schedule();
        tracing::info!("pinner node stopped");
        Ok(())
    }

    /// Returns whether the store is reachable, together with the current
    /// `min_pinners` setting.
    pub async fn health_info(&self) -> (bool, usize) {
        match settings::min_pinners(self.store.as_ref()).await {
            Ok(min_pinners) => (true, min_pinners),
            Err(_) => (false, 0),
        }
    }

    /// Records a user's intent to keep the skylink pinned, adding this
    /// server as its first pinner.
    ///
    /// Version-2 skylinks are resolved to their version-1 target before they
    /// are stored.
    pub async fn pin_skylink(&self, skylink: Skylink) -> Result<(), IntentError> {
        let skylink = self.resolve(skylink).await?;
        match self.store.create_skylink(&skylink, &self.server_name).await {
            Ok(_) => Ok(()),
            Err(StoreError::SkylinkExists) => {
                // Re-pinning also clears a previous unpin intent.
                self.store
                    .add_server_for_skylinks(&[skylink], &self.server_name, true)
                    .await?;
                Ok(())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// Records a user's intent to drop the skylink from every server.
    pub async fn unpin_skylink(&self, skylink: Skylink) -> Result<(), IntentError> {
        let skylink = self.resolve(skylink).await?;
        self.store.mark_unpinned(&skylink).await?;
        Ok(())
    }

    /// Starts a sweep, unless one is already running.
    pub fn start_sweep(&self) {
        self.sweeper.sweep();
    }

    /// The status of the current or most recent sweep.
    pub fn sweep_status(&self) -> SweepStatus {
        self.sweeper.status()
    }

    async fn resolve(&self, skylink: Skylink) -> Result<Skylink, DaemonError> {
        if skylink.is_v2() {
            self.daemon.resolve(&skylink).await
        } else {
            Ok(skylink)
        }
    }
}
