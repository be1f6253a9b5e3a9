// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Reconciliation of the store against the local daemon.
//!
//! The daemon is the authority on what this server actually holds; the store
//! is the cluster's view of it. A sweep diffs the two and repairs the
//! divergence in both directions: skylinks the store wrongly attributes to
//! this server are detached, skylinks the daemon holds without the store
//! knowing are recorded. Sweeps only document reality; they never override a
//! user's unpin intent.

use std::{sync::Arc, time::Duration};

use pinner_core::Skylink;
use pinner_daemon_client::{DaemonClient, DaemonError};
use pinner_store::{PinStore, StoreError, DEFAULT_STORE_TIMEOUT};

use super::{
    pinned_set::PinnedSet,
    schedule::Schedule,
    status::{StatusState, SweepStatus},
};

/// How often scheduled sweeps run by default.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

/// Error terminating a sweep. Recorded in the sweep status.
#[derive(Debug, thiserror::Error)]
enum SweepError {
    #[error("failed to rebuild the pinned-set cache: {0}")]
    CacheRebuild(Arc<DaemonError>),
    #[error("timed out fetching the skylinks for this server")]
    StoreTimeout,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Sweeps the skylinks pinned by the local daemon and reconciles the store's
/// view of this server with them.
///
/// Cheap to clone; clones share the same sweep state.
#[derive(Debug, Clone)]
pub struct Sweeper {
    inner: Arc<SweeperInner>,
}

#[derive(Debug)]
struct SweeperInner {
    store: Arc<dyn PinStore>,
    daemon: Arc<dyn DaemonClient>,
    pinned_set: PinnedSet,
    server_name: String,
    schedule: Schedule,
    status: StatusState,
}

impl Sweeper {
    /// Creates a new sweeper for the given server.
    pub fn new(
        store: Arc<dyn PinStore>,
        daemon: Arc<dyn DaemonClient>,
        pinned_set: PinnedSet,
        server_name: String,
    ) -> Self {
        Self {
            inner: Arc::new(SweeperInner {
                store,
                daemon,
                pinned_set,
                server_name,
                schedule: Schedule::default(),
                status: StatusState::default(),
            }),
        }
    }

    /// Returns a copy of the status of the current or last sweep.
    pub fn status(&self) -> SweepStatus {
        self.inner.status.current()
    }

    /// Starts a sweep, unless one is already underway. Non-blocking;
    /// parallel calls collapse onto the running sweep.
    pub fn sweep(&self) {
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move { inner.perform_sweep().await });
    }

    /// (Re)configures periodic sweeps. An existing schedule is cancelled;
    /// a sweep that is already running is not interrupted.
    pub fn update_schedule(&self, period: Duration) {
        self.inner.schedule.update(period, self.clone());
    }

    /// Cancels the periodic schedule.
    pub fn cancel_schedule(&self) {
        self.inner.schedule.cancel();
    }
}

impl SweeperInner {
    async fn perform_sweep(&self) {
        if !self.status.start() {
            tracing::debug!("a sweep is already in progress");
            return;
        }
        tracing::info!("started a sweep");
        let error = self.run_sweep().await.err();
        if let Some(error) = &error {
            tracing::warn!(%error, "sweep failed");
        }
        self.status.finalize(error.map(|error| error.to_string()));
        tracing::info!("finalized a sweep");
    }

    async fn run_sweep(&self) -> Result<(), SweepError> {
        // Kick off the cache rebuild; the store read below proceeds while
        // the walk is running.
        let rebuild = self.pinned_set.rebuild(Arc::clone(&self.daemon));

        let store_skylinks = tokio::time::timeout(
            DEFAULT_STORE_TIMEOUT,
            self.store.skylinks_for_server(&self.server_name),
        )
        .await
        .map_err(|_| SweepError::StoreTimeout)??;

        rebuild.wait().await;
        if let Some(error) = rebuild.error() {
            // Diffing against a stale or empty set would detach live pins;
            // report the failure instead.
            return Err(SweepError::CacheRebuild(error));
        }

        let (unknown, missing) = self.pinned_set.diff(&store_skylinks);
        self.reconcile(unknown, missing).await
    }

    async fn reconcile(
        &self,
        unknown: Vec<Skylink>,
        missing: Vec<Skylink>,
    ) -> Result<(), SweepError> {
        if !unknown.is_empty() {
            tracing::info!(
                count = unknown.len(),
                "detaching this server from skylinks the daemon does not hold"
            );
            self.store
                .remove_server_from_skylinks(&unknown, &self.server_name)
                .await?;
        }
        if !missing.is_empty() {
            tracing::info!(
                count = missing.len(),
                "recording this server for skylinks the daemon holds"
            );
            self.store
                .add_server_for_skylinks(&missing, &self.server_name, false)
                .await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pinner_core::test_utils::skylink_for_seed;

    use super::*;
    use crate::test_utils::{wait_until, FakeDaemon, InMemoryStore};

    const SERVER: &str = "eu-ger-1.example.net";

    fn sweeper(store: &Arc<InMemoryStore>, daemon: &Arc<FakeDaemon>) -> Sweeper {
        Sweeper::new(
            Arc::clone(store) as Arc<dyn PinStore>,
            Arc::clone(daemon) as Arc<dyn DaemonClient>,
            PinnedSet::new(),
            SERVER.to_owned(),
        )
    }

    #[tokio::test]
    async fn a_sweep_reconciles_both_directions() {
        let (a, b, c) = (
            skylink_for_seed(1),
            skylink_for_seed(2),
            skylink_for_seed(3),
        );

        // The daemon holds {a, b}; the store believes this server holds
        // {b, c}.
        let daemon = Arc::new(FakeDaemon::new());
        daemon.add_pinned([a, b]);
        let store = Arc::new(InMemoryStore::new());
        store.seed_record(b, &[SERVER], true);
        store.seed_record(c, &[SERVER], true);

        let sweeper = sweeper(&store, &daemon);
        sweeper.sweep();
        wait_until(|| !sweeper.status().in_progress && sweeper.status().end_time.is_some()).await;

        assert_eq!(sweeper.status().error, None);
        let mut recorded = store.skylinks_for_server(SERVER).await.unwrap();
        recorded.sort();
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(recorded, expected);

        // The missing skylink was documented, not marked as user intent.
        let record = store.record(&a).unwrap();
        assert!(record.pinned);
        // The skylink the daemon does not hold lost this server.
        assert!(store.record(&c).unwrap().servers.is_empty());
    }

    #[tokio::test]
    async fn a_sweep_documents_reality_without_overriding_unpin_intent() {
        let a = skylink_for_seed(1);

        // The user asked for a to be dropped, but the daemon still holds it.
        let daemon = Arc::new(FakeDaemon::new());
        daemon.add_pinned([a]);
        let store = Arc::new(InMemoryStore::new());
        store.seed_record(a, &[], false);

        let sweeper = sweeper(&store, &daemon);
        sweeper.sweep();
        wait_until(|| sweeper.status().end_time.is_some()).await;

        let record = store.record(&a).unwrap();
        assert_eq!(record.servers, vec![SERVER.to_owned()]);
        assert!(!record.pinned, "a sweep must not override an unpin intent");
    }

    #[tokio::test]
    async fn parallel_sweeps_collapse() {
        let daemon = Arc::new(FakeDaemon::new());
        daemon.set_walk_delay(Duration::from_millis(100));
        let store = Arc::new(InMemoryStore::new());

        let sweeper = sweeper(&store, &daemon);
        sweeper.sweep();
        wait_until(|| sweeper.status().in_progress).await;
        let first_start = sweeper.status().start_time;

        sweeper.sweep();
        tokio::time::sleep(Duration::from_millis(20)).await;
        // The second call attached to the running sweep instead of starting
        // a new one.
        assert_eq!(sweeper.status().start_time, first_start);
        assert_eq!(daemon.walk_count(), 1);

        wait_until(|| !sweeper.status().in_progress).await;
        assert_eq!(sweeper.status().start_time, first_start);
    }

    #[tokio::test]
    async fn a_failed_rebuild_finalizes_the_sweep_without_reconciling() {
        let a = skylink_for_seed(1);
        let daemon = Arc::new(FakeDaemon::new());
        daemon.fail_walks();
        let store = Arc::new(InMemoryStore::new());
        store.seed_record(a, &[SERVER], true);

        let sweeper = sweeper(&store, &daemon);
        sweeper.sweep();
        wait_until(|| sweeper.status().end_time.is_some()).await;

        let status = sweeper.status();
        assert!(status
            .error
            .as_deref()
            .is_some_and(|error| error.contains("rebuild")));
        // No reconciliation happened against the stale (empty) cache.
        assert_eq!(store.record(&a).unwrap().servers, vec![SERVER.to_owned()]);
    }
}
