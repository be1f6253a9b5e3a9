// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Stateful fakes for exercising the services without a database or a
//! daemon.
//!
//! [`InMemoryStore`] implements the full store contract, including lock
//! expiry and crash recovery, over a mutex-guarded map. [`FakeDaemon`]
//! mimics the daemon's observable behavior with scriptable failures. Both
//! are deliberately simple; the mockall mocks of the underlying traits
//! remain the tool for expectation-style tests.

use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use async_trait::async_trait;
use chrono::Utc;
use pinner_core::Skylink;
use pinner_daemon_client::{
    api::{DirectoryInfo, DirectoryListing, FileHealth, FileInfo, FileMetadata},
    DaemonClient, DaemonError, PIN_ROOT,
};
use pinner_store::{PinStore, SkylinkRecord, StoreError, LOCK_DURATION};

/// Polls the predicate until it holds, failing the test after five seconds.
pub async fn wait_until(predicate: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !predicate() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "condition not reached within five seconds"
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// In-memory implementation of the store contract.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    // Keyed by the canonical string so scans are deterministic.
    records: Mutex<BTreeMap<String, SkylinkRecord>>,
    config: Mutex<HashMap<String, String>>,
    fail_config_reads: AtomicBool,
}

impl InMemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a record with the given pinners and pinned flag.
    pub fn seed_record(&self, skylink: Skylink, servers: &[&str], pinned: bool) {
        self.records().insert(
            skylink.to_string(),
            SkylinkRecord {
                skylink,
                servers: servers.iter().map(|server| (*server).to_owned()).collect(),
                pinned,
                locked_by: None,
                lock_expires: None,
            },
        );
    }

    /// Seeds a raw record, locks included.
    pub fn seed_raw_record(&self, record: SkylinkRecord) {
        self.records().insert(record.skylink.to_string(), record);
    }

    /// Seeds a configuration value.
    pub fn seed_config(&self, key: &str, value: &str) {
        self.config().insert(key.to_owned(), value.to_owned());
    }

    /// Returns a copy of the record for the skylink, if any.
    pub fn record(&self, skylink: &Skylink) -> Option<SkylinkRecord> {
        self.records().get(&skylink.to_string()).cloned()
    }

    /// Makes all configuration reads fail, simulating an unreachable store.
    pub fn fail_config_reads(&self) {
        self.fail_config_reads.store(true, Ordering::SeqCst);
    }

    fn records(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, SkylinkRecord>> {
        self.records.lock().expect("store lock is never poisoned")
    }

    fn config(&self) -> std::sync::MutexGuard<'_, HashMap<String, String>> {
        self.config.lock().expect("config lock is never poisoned")
    }
}

#[async_trait]
impl PinStore for InMemoryStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn create_skylink(
        &self,
        skylink: &Skylink,
        server: &str,
    ) -> Result<SkylinkRecord, StoreError> {
        let mut records = self.records();
        if records.contains_key(&skylink.to_string()) {
            return Err(StoreError::SkylinkExists);
        }
        let record = SkylinkRecord {
            skylink: *skylink,
            servers: vec![server.to_owned()],
            pinned: true,
            locked_by: None,
            lock_expires: None,
        };
        records.insert(skylink.to_string(), record.clone());
        Ok(record)
    }

    async fn mark_unpinned(&self, skylink: &Skylink) -> Result<(), StoreError> {
        let mut records = self.records();
        records
            .entry(skylink.to_string())
            .or_insert_with(|| SkylinkRecord {
                skylink: *skylink,
                servers: Vec::new(),
                pinned: true,
                locked_by: None,
                lock_expires: None,
            })
            .pinned = false;
        Ok(())
    }

    async fn find_and_lock_underpinned(
        &self,
        server: &str,
        min_pinners: usize,
    ) -> Result<Skylink, StoreError> {
        let now = Utc::now();
        let mut records = self.records();

        // A record this server already holds a live lock on wins, so a
        // restarted server resumes its repair.
        if let Some(record) = records.values().find(|record| {
            record.locked_by.as_deref() == Some(server) && record.is_locked_at(now) && record.pinned
        }) {
            return Ok(record.skylink);
        }

        let candidate = records.values_mut().find(|record| {
            record.pinned
                && record.servers.len() < min_pinners
                && !record.servers.iter().any(|pinner| pinner == server)
                && !record.is_locked_at(now)
        });
        let Some(record) = candidate else {
            return Err(StoreError::NoUnderpinnedSkylinks);
        };
        record.locked_by = Some(server.to_owned());
        record.lock_expires = Some(
            now + chrono::Duration::from_std(LOCK_DURATION).expect("the lock duration converts"),
        );
        Ok(record.skylink)
    }

    async fn unlock_skylink(&self, skylink: &Skylink, server: &str) -> Result<(), StoreError> {
        let mut records = self.records();
        let record = records
            .get_mut(&skylink.to_string())
            .filter(|record| record.locked_by.as_deref() == Some(server))
            .ok_or(StoreError::SkylinkNotFound)?;
        record.locked_by = None;
        record.lock_expires = None;
        Ok(())
    }

    async fn add_server_for_skylinks(
        &self,
        skylinks: &[Skylink],
        server: &str,
        mark_pinned: bool,
    ) -> Result<(), StoreError> {
        let mut records = self.records();
        for skylink in skylinks {
            let record = records
                .entry(skylink.to_string())
                .or_insert_with(|| SkylinkRecord {
                    skylink: *skylink,
                    servers: Vec::new(),
                    pinned: true,
                    locked_by: None,
                    lock_expires: None,
                });
            if !record.servers.iter().any(|pinner| pinner == server) {
                record.servers.push(server.to_owned());
            }
            record.pinned = record.pinned || mark_pinned;
        }
        Ok(())
    }

    async fn remove_server_from_skylinks(
        &self,
        skylinks: &[Skylink],
        server: &str,
    ) -> Result<(), StoreError> {
        let mut records = self.records();
        for skylink in skylinks {
            if let Some(record) = records.get_mut(&skylink.to_string()) {
                record.servers.retain(|pinner| pinner != server);
            }
        }
        Ok(())
    }

    async fn skylinks_for_server(&self, server: &str) -> Result<Vec<Skylink>, StoreError> {
        Ok(self
            .records()
            .values()
            .filter(|record| record.servers.iter().any(|pinner| pinner == server))
            .map(|record| record.skylink)
            .collect())
    }

    async fn config_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_config_reads.load(Ordering::SeqCst) {
            return Err(StoreError::Unreachable("store down".to_owned()));
        }
        Ok(self.config().get(key).cloned())
    }

    async fn set_config_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.config().insert(key.to_owned(), value.to_owned());
        Ok(())
    }
}

type PinErrorFactory = Box<dyn Fn() -> DaemonError + Send + Sync>;

#[derive(Default)]
struct FakeDaemonInner {
    pinned: BTreeMap<Skylink, usize>,
    metadata: HashMap<Skylink, u64>,
    resolutions: HashMap<Skylink, Skylink>,
    tree: HashMap<String, DirectoryListing>,
    pin_error: Option<PinErrorFactory>,
    fail_walks: bool,
    fail_metadata: bool,
    walk_delay: Option<Duration>,
}

/// Stateful fake of the local daemon.
#[derive(Default)]
pub struct FakeDaemon {
    inner: Mutex<FakeDaemonInner>,
    walk_count: AtomicUsize,
    pin_attempts: AtomicUsize,
}

impl std::fmt::Debug for FakeDaemon {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FakeDaemon")
            .field("walk_count", &self.walk_count)
            .field("pin_attempts", &self.pin_attempts)
            .finish_non_exhaustive()
    }
}

impl FakeDaemon {
    /// Creates a daemon that pins everything successfully and holds nothing.
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks the given skylinks as held by the daemon.
    pub fn add_pinned(&self, skylinks: impl IntoIterator<Item = Skylink>) {
        let mut inner = self.lock();
        for skylink in skylinks {
            inner.pinned.entry(skylink).or_insert(0);
        }
    }

    /// Returns true when the daemon holds the skylink.
    pub fn is_pinning(&self, skylink: &Skylink) -> bool {
        self.lock().pinned.contains_key(skylink)
    }

    /// The number of successful pin calls for the skylink.
    pub fn pin_count(&self, skylink: &Skylink) -> usize {
        self.lock().pinned.get(skylink).copied().unwrap_or(0)
    }

    /// The total number of pin attempts, failed ones included.
    pub fn pin_attempts(&self) -> usize {
        self.pin_attempts.load(Ordering::SeqCst)
    }

    /// Makes every pin call fail with the error produced by the factory.
    pub fn set_pin_error(&self, factory: impl Fn() -> DaemonError + Send + Sync + 'static) {
        self.lock().pin_error = Some(Box::new(factory));
    }

    /// Registers the resolution of a version-2 skylink.
    pub fn set_resolution(&self, from: Skylink, to: Skylink) {
        self.lock().resolutions.insert(from, to);
    }

    /// Sets the object length reported for the skylink.
    pub fn set_metadata_length(&self, skylink: Skylink, length: u64) {
        self.lock().metadata.insert(skylink, length);
    }

    /// Makes every metadata call fail.
    pub fn fail_metadata(&self) {
        self.lock().fail_metadata = true;
    }

    /// Adds an explicit directory to the pin tree served to walkers.
    pub fn add_dir(
        &self,
        path: &str,
        subdirs: &[&str],
        skylinks: impl IntoIterator<Item = Skylink>,
    ) {
        let mut directories = vec![DirectoryInfo {
            path: path.to_owned(),
        }];
        directories.extend(subdirs.iter().map(|subdir| DirectoryInfo {
            path: (*subdir).to_owned(),
        }));
        let listing = DirectoryListing {
            directories,
            files: vec![FileInfo {
                skylinks: skylinks.into_iter().collect(),
            }],
        };
        self.lock().tree.insert(path.to_owned(), listing);
    }

    /// Makes every directory walk fail.
    pub fn fail_walks(&self) {
        self.lock().fail_walks = true;
    }

    /// Lets directory walks succeed again.
    pub fn restore_walks(&self) {
        self.lock().fail_walks = false;
    }

    /// Delays every directory listing, keeping walks observably in flight.
    pub fn set_walk_delay(&self, delay: Duration) {
        self.lock().walk_delay = Some(delay);
    }

    /// The number of directory walks started against this daemon.
    pub fn walk_count(&self) -> usize {
        self.walk_count.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, FakeDaemonInner> {
        self.inner.lock().expect("fake daemon lock is never poisoned")
    }
}

#[async_trait]
impl DaemonClient for FakeDaemon {
    async fn pin(&self, skylink: &Skylink) -> Result<(), DaemonError> {
        self.pin_attempts.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.lock();
        if let Some(factory) = &inner.pin_error {
            return Err(factory());
        }
        *inner.pinned.entry(*skylink).or_insert(0) += 1;
        Ok(())
    }

    async fn unpin(&self, skylink: &Skylink) -> Result<(), DaemonError> {
        self.lock().pinned.remove(skylink);
        Ok(())
    }

    async fn metadata(&self, skylink: &Skylink) -> Result<FileMetadata, DaemonError> {
        let inner = self.lock();
        if inner.fail_metadata {
            return Err(DaemonError::other(std::io::Error::other(
                "metadata unavailable",
            )));
        }
        Ok(FileMetadata {
            length: inner.metadata.get(skylink).copied().unwrap_or(0),
        })
    }

    async fn file_health(&self, _skylink: &Skylink) -> Result<FileHealth, DaemonError> {
        Ok(FileHealth {
            health: 0.0,
            needs_repair: false,
        })
    }

    async fn resolve(&self, skylink: &Skylink) -> Result<Skylink, DaemonError> {
        self.lock()
            .resolutions
            .get(skylink)
            .copied()
            .ok_or_else(|| DaemonError::other(std::io::Error::other("unknown skylink")))
    }

    async fn list_dir(&self, path: &str) -> Result<DirectoryListing, DaemonError> {
        if path == PIN_ROOT {
            self.walk_count.fetch_add(1, Ordering::SeqCst);
        }
        let (listing, delay) = {
            let inner = self.lock();
            if inner.fail_walks {
                return Err(DaemonError::connect("connection refused"));
            }
            let listing = if let Some(listing) = inner.tree.get(path) {
                listing.clone()
            } else {
                // Default tree: a flat root directory holding one file per
                // pinned skylink.
                DirectoryListing {
                    directories: vec![DirectoryInfo {
                        path: path.to_owned(),
                    }],
                    files: inner
                        .pinned
                        .keys()
                        .map(|skylink| FileInfo {
                            skylinks: vec![*skylink],
                        })
                        .collect(),
                }
            };
            (listing, inner.walk_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(listing)
    }
}

// The lock semantics of the in-memory store mirror the contract the
// services depend on; they are tested here so scenario tests above it can
// rely on them.
#[cfg(test)]
mod tests {
    use pinner_core::test_utils::skylink_for_seed;

    use super::*;

    const SERVER: &str = "eu-ger-1.example.net";
    const OTHER_SERVER: &str = "us-va-2.example.net";

    #[tokio::test]
    async fn a_live_lock_excludes_other_servers() {
        let store = InMemoryStore::new();
        let skylink = skylink_for_seed(1);
        store.seed_record(skylink, &[], true);

        assert_eq!(
            store.find_and_lock_underpinned(SERVER, 1).await.unwrap(),
            skylink
        );
        // The other server must not be handed the same skylink.
        assert!(matches!(
            store.find_and_lock_underpinned(OTHER_SERVER, 1).await,
            Err(StoreError::NoUnderpinnedSkylinks)
        ));
    }

    #[tokio::test]
    async fn unlocking_makes_the_skylink_selectable_again() {
        let store = InMemoryStore::new();
        let skylink = skylink_for_seed(1);
        store.seed_record(skylink, &[], true);

        store.find_and_lock_underpinned(SERVER, 1).await.unwrap();
        store.unlock_skylink(&skylink, SERVER).await.unwrap();
        assert_eq!(
            store
                .find_and_lock_underpinned(OTHER_SERVER, 1)
                .await
                .unwrap(),
            skylink
        );
    }

    #[tokio::test]
    async fn an_expired_lock_is_treated_as_absent() {
        let store = InMemoryStore::new();
        let skylink = skylink_for_seed(1);
        // A server crashed while holding the lock; the lock has run out.
        store.seed_raw_record(SkylinkRecord {
            skylink,
            servers: Vec::new(),
            pinned: true,
            locked_by: Some(OTHER_SERVER.to_owned()),
            lock_expires: Some(Utc::now() - chrono::Duration::seconds(1)),
        });

        assert_eq!(
            store.find_and_lock_underpinned(SERVER, 1).await.unwrap(),
            skylink
        );
    }

    #[tokio::test]
    async fn a_server_resumes_its_own_live_lock() {
        let store = InMemoryStore::new();
        let locked = skylink_for_seed(1);
        let other = skylink_for_seed(2);
        // The server restarted mid-repair; its lock is still live and the
        // skylink is otherwise fully pinned.
        store.seed_raw_record(SkylinkRecord {
            skylink: locked,
            servers: vec![OTHER_SERVER.to_owned()],
            pinned: true,
            locked_by: Some(SERVER.to_owned()),
            lock_expires: Some(Utc::now() + chrono::Duration::hours(1)),
        });
        store.seed_record(other, &[], true);

        // The resumed repair wins over the fresh candidate.
        assert_eq!(
            store.find_and_lock_underpinned(SERVER, 1).await.unwrap(),
            locked
        );
    }

    #[tokio::test]
    async fn unlocking_a_foreign_lock_fails() {
        let store = InMemoryStore::new();
        let skylink = skylink_for_seed(1);
        store.seed_record(skylink, &[], true);
        store.find_and_lock_underpinned(SERVER, 1).await.unwrap();

        assert!(matches!(
            store.unlock_skylink(&skylink, OTHER_SERVER).await,
            Err(StoreError::SkylinkNotFound)
        ));
    }
}
