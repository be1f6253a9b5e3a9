// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Background repair of underpinned skylinks.
//!
//! The scanner periodically walks the store for skylinks pinned by fewer
//! than `min_pinners` servers, locks one at a time, pins it through the
//! local daemon, and waits for it to approach full redundancy before picking
//! the next one. The store lock guarantees that no two servers repair the
//! same skylink simultaneously; which server picks it up first is
//! intentionally unspecified.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use pinner_core::Skylink;
use pinner_daemon_client::DaemonClient;
use pinner_store::{settings, PinStore, StoreError};
use rand::Rng as _;
use tokio_util::sync::CancellationToken;

use super::pinned_set::PinnedSet;

/// Pause between two pin operations. Prevents a single server from grabbing
/// every underpinned skylink at once, and gives fresh pins a head start
/// towards full redundancy.
pub const SLEEP_BETWEEN_PINS: Duration = Duration::from_secs(10);

/// Pause between two health polls of a freshly pinned skylink.
pub const SLEEP_BETWEEN_HEALTH_CHECKS: Duration = Duration::from_secs(5);

/// Pause between two scans of the store. A prime number of hours, so scans
/// and the daily sweeps naturally de-synchronize across the fleet.
pub const SLEEP_BETWEEN_SCANS: Duration = Duration::from_secs(19 * 60 * 60);

// The sleep between scans varies by this fraction in either direction.
const SLEEP_VARIATION_FACTOR: f64 = 0.1;

// Constants of the time-to-full-redundancy estimate: 25% of 1 Gbps upload,
// 4 MiB sectors, chunks of 10 sectors, and the daemon's redundancy scheme.
const ASSUMED_UPLOAD_SPEED_BYTES: u64 = (1 << 30) / 4 / 8;
const SECTOR_SIZE: u64 = 1 << 22;
const CHUNK_SIZE: u64 = 10 * SECTOR_SIZE;
const BASE_SECTOR_REDUNDANCY: u64 = 10;
const FANOUT_REDUNDANCY: u64 = 3;

/// Outcome of one iteration of the inner pin loop.
enum PinOutcome {
    /// A skylink was pinned; wait for it to become healthy.
    Pinned(Skylink),
    /// The skylink was already pinned locally; pick the next one right away.
    AlreadyPinned,
    /// A recoverable failure; sleep briefly, then continue scanning.
    Retry,
    /// The scan is done, either because no candidates remain or because an
    /// unrecoverable error makes continuing pointless this period.
    Done,
}

/// Settings the scanner caches per iteration of its outer loop.
#[derive(Debug, Clone, Copy)]
struct ScanSettings {
    dry_run: bool,
    min_pinners: usize,
}

/// Background worker that repairs underpinned skylinks by pinning them to
/// the local daemon.
#[derive(Debug)]
pub struct Scanner {
    store: Arc<dyn PinStore>,
    daemon: Arc<dyn DaemonClient>,
    pinned_set: PinnedSet,
    server_name: String,
    sleep_between_scans: Duration,
    // The outer loop refreshes the settings while the inner loop reads them.
    settings: Mutex<ScanSettings>,
}

impl Scanner {
    /// Creates a new scanner.
    ///
    /// `sleep_between_scans` overrides the default scan period when set.
    pub fn new(
        store: Arc<dyn PinStore>,
        daemon: Arc<dyn DaemonClient>,
        pinned_set: PinnedSet,
        server_name: String,
        min_pinners: usize,
        sleep_between_scans: Option<Duration>,
    ) -> Self {
        Self {
            store,
            daemon,
            pinned_set,
            server_name,
            sleep_between_scans: sleep_between_scans.unwrap_or(SLEEP_BETWEEN_SCANS),
            settings: Mutex::new(ScanSettings {
                dry_run: false,
                min_pinners,
            }),
        }
    }

    /// Runs the scan loop until the token is cancelled.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            // Rebuild the cache before scanning, watching for shutdown
            // while the walk runs.
            let rebuild = self.pinned_set.rebuild(Arc::clone(&self.daemon));
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = rebuild.wait() => {
                    if let Some(error) = rebuild.error() {
                        // A stale cache costs extra pin round-trips, but
                        // never correctness; scan anyway.
                        tracing::warn!(%error, "failed to rebuild the pinned-set cache");
                    }
                }
            }

            tracing::debug!("starting a scan");
            self.refresh_settings().await;
            self.pin_underpinned_skylinks(&cancel).await;
            tracing::debug!("scan finished");

            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(self.jittered_sleep()) => {}
            }
        }
    }

    /// The scan period with its random variation applied.
    pub fn jittered_sleep(&self) -> Duration {
        let factor = rand::thread_rng()
            .gen_range(1.0 - SLEEP_VARIATION_FACTOR..=1.0 + SLEEP_VARIATION_FACTOR);
        Duration::from_secs_f64(self.sleep_between_scans.as_secs_f64() * factor)
    }

    /// Reads the cluster settings for this iteration. On failure the
    /// previous values are kept.
    async fn refresh_settings(&self) {
        match settings::dry_run(self.store.as_ref()).await {
            Ok(dry_run) => self.settings().dry_run = dry_run,
            Err(error) => tracing::warn!(%error, "failed to fetch the dry_run setting"),
        }
        match settings::min_pinners(self.store.as_ref()).await {
            Ok(min_pinners) => self.settings().min_pinners = min_pinners,
            Err(error) => tracing::warn!(%error, "failed to fetch the min_pinners setting"),
        }
    }

    /// The inner pin loop: repairs skylinks one at a time until no
    /// candidates remain.
    async fn pin_underpinned_skylinks(&self, cancel: &CancellationToken) {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            match self.find_and_pin_one_underpinned_skylink().await {
                PinOutcome::Pinned(skylink) => {
                    self.wait_until_healthy(&skylink, cancel).await;
                }
                PinOutcome::AlreadyPinned => {}
                PinOutcome::Retry => {
                    // Pause so a failing daemon does not turn this into a
                    // tight error loop.
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        _ = tokio::time::sleep(SLEEP_BETWEEN_PINS) => {}
                    }
                }
                PinOutcome::Done => return,
            }
        }
    }

    /// Locks one underpinned skylink, pins it, and releases the lock on
    /// every exit path.
    async fn find_and_pin_one_underpinned_skylink(&self) -> PinOutcome {
        let ScanSettings {
            dry_run,
            min_pinners,
        } = *self.settings();

        let skylink = match self
            .store
            .find_and_lock_underpinned(&self.server_name, min_pinners)
            .await
        {
            Ok(skylink) => skylink,
            Err(StoreError::NoUnderpinnedSkylinks) => return PinOutcome::Done,
            Err(error) => {
                tracing::warn!(%error, "failed to fetch an underpinned skylink");
                return PinOutcome::Done;
            }
        };

        let outcome = self.pin_locked_skylink(&skylink, dry_run).await;

        if let Err(error) = self
            .store
            .unlock_skylink(&skylink, &self.server_name)
            .await
        {
            tracing::debug!(%skylink, %error, "failed to unlock skylink after trying to pin it");
        }
        outcome
    }

    async fn pin_locked_skylink(&self, skylink: &Skylink, dry_run: bool) -> PinOutcome {
        if dry_run {
            tracing::info!(%skylink, "[dry run] successfully pinned");
            return PinOutcome::Done;
        }

        match self.daemon.pin(skylink).await {
            Ok(()) => {}
            Err(error) if error.is_already_pinned() => {
                // Pinned locally but not marked as such; fix the bookkeeping.
                tracing::info!(%skylink, "skylink already pinned by the local daemon");
                self.mark_pinned_by_this_server(skylink).await;
                return PinOutcome::AlreadyPinned;
            }
            Err(error) if error.is_connect() || error.is_unauthorized() => {
                tracing::error!(%skylink, %error, "unrecoverable error while pinning");
                return PinOutcome::Done;
            }
            Err(error) => {
                tracing::warn!(%skylink, %error, "failed to pin skylink");
                return PinOutcome::Retry;
            }
        }

        tracing::info!(%skylink, "successfully pinned");
        self.mark_pinned_by_this_server(skylink).await;
        self.pinned_set.add([*skylink]);
        PinOutcome::Pinned(*skylink)
    }

    async fn mark_pinned_by_this_server(&self, skylink: &Skylink) {
        // Repair bookkeeping never overrides an unpin intent.
        if let Err(error) = self
            .store
            .add_server_for_skylinks(&[*skylink], &self.server_name, false)
            .await
        {
            tracing::debug!(%skylink, %error, "failed to mark skylink as pinned by this server");
        }
    }

    /// Blocks until the skylink no longer needs repair, its deadline fires,
    /// or shutdown is requested.
    async fn wait_until_healthy(&self, skylink: &Skylink, cancel: &CancellationToken) {
        let deadline = tokio::time::Instant::now() + 2 * self.estimate_time_to_full(skylink).await;
        loop {
            match self.daemon.file_health(skylink).await {
                Ok(health) if !health.needs_repair => return,
                Ok(health) => {
                    tracing::debug!(
                        %skylink,
                        health = health.health,
                        "waiting for skylink to become fully healthy"
                    );
                }
                Err(error) => {
                    tracing::warn!(%skylink, %error, "failed to fetch file health");
                    return;
                }
            }
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(%skylink, "skylink did not reach full health within the time limit");
                    return;
                }
                _ = tokio::time::sleep(SLEEP_BETWEEN_HEALTH_CHECKS) => {}
            }
        }
    }

    /// A ballpark of how long the daemon needs to bring the skylink to full
    /// redundancy.
    ///
    /// Assumes lazy pinning (none of the fanout uploaded yet) and large
    /// files whose metadata fills the base sector, to err on the long side.
    async fn estimate_time_to_full(&self, skylink: &Skylink) -> Duration {
        let metadata = match self.daemon.metadata(skylink).await {
            Ok(metadata) => metadata,
            Err(error) => {
                tracing::warn!(%skylink, %error, "failed to fetch metadata for skylink");
                return SLEEP_BETWEEN_PINS;
            }
        };
        let num_chunks = metadata.length.div_ceil(CHUNK_SIZE);
        let remaining_upload =
            num_chunks * CHUNK_SIZE * FANOUT_REDUNDANCY + (BASE_SECTOR_REDUNDANCY - 1) * SECTOR_SIZE;
        Duration::from_secs(remaining_upload / ASSUMED_UPLOAD_SPEED_BYTES)
    }

    fn settings(&self) -> std::sync::MutexGuard<'_, ScanSettings> {
        self.settings.lock().expect("settings lock is never poisoned")
    }
}
