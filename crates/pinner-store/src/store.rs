// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The contract every store implementation must honor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pinner_core::Skylink;

use crate::StoreError;

/// One row of the store: a skylink and everything the cluster knows about it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkylinkRecord {
    /// The canonical skylink.
    pub skylink: Skylink,
    /// The servers currently believed to pin this skylink. Set semantics.
    pub servers: Vec<String>,
    /// Whether the cluster wants this skylink pinned. When false, every
    /// server must drop it.
    pub pinned: bool,
    /// The server currently repairing this skylink, if any.
    pub locked_by: Option<String>,
    /// The instant at which the repair lock stops being honored.
    pub lock_expires: Option<DateTime<Utc>>,
}

impl SkylinkRecord {
    /// Returns true iff the record carries a lock that is still honored at
    /// the given instant.
    pub fn is_locked_at(&self, now: DateTime<Utc>) -> bool {
        self.locked_by.is_some() && self.lock_expires.is_some_and(|expires| expires > now)
    }
}

/// The document-store operations the pinner services rely on.
///
/// Implementations must make [`find_and_lock_underpinned`][Self::find_and_lock_underpinned]
/// race-free: under any number of concurrent callers from different servers,
/// at most one caller ever holds a live lock on a given skylink.
#[cfg_attr(any(test, feature = "test-utils"), mockall::automock)]
#[async_trait]
pub trait PinStore: std::fmt::Debug + Send + Sync {
    /// Verifies that the store is reachable.
    async fn ping(&self) -> Result<(), StoreError>;

    /// Creates a new skylink record on behalf of a user pin intent, with the
    /// given server as its only pinner and `pinned` set.
    ///
    /// Fails with [`StoreError::SkylinkExists`] when the record is already
    /// present.
    async fn create_skylink(
        &self,
        skylink: &Skylink,
        server: &str,
    ) -> Result<SkylinkRecord, StoreError>;

    /// Marks a skylink as unpinned: every server must stop pinning it, and
    /// the scanner stops selecting it.
    async fn mark_unpinned(&self, skylink: &Skylink) -> Result<(), StoreError>;

    /// Selects one skylink in need of repair and locks it for the given
    /// server.
    ///
    /// A record already locked by `server` with a live lock takes precedence,
    /// so a server that restarted mid-repair resumes its own work. Otherwise
    /// a record qualifies when it is pinned, has fewer than `min_pinners`
    /// servers, is not pinned by `server`, and carries no live lock.
    ///
    /// Fails with [`StoreError::NoUnderpinnedSkylinks`] when no record
    /// qualifies.
    async fn find_and_lock_underpinned(
        &self,
        server: &str,
        min_pinners: usize,
    ) -> Result<Skylink, StoreError>;

    /// Releases the repair lock on the skylink, provided it is held by the
    /// given server.
    ///
    /// Fails with [`StoreError::SkylinkNotFound`] when no row was affected,
    /// i.e. the lock was not held by `server`.
    async fn unlock_skylink(&self, skylink: &Skylink, server: &str) -> Result<(), StoreError>;

    /// Records the server as a pinner of each of the given skylinks,
    /// creating records that do not exist yet.
    ///
    /// When `mark_pinned` is set the records are additionally marked as
    /// pinned; it is never flipped to false by this call. Repair and sweep
    /// bookkeeping passes false so that a user's unpin intent survives.
    async fn add_server_for_skylinks(
        &self,
        skylinks: &[Skylink],
        server: &str,
        mark_pinned: bool,
    ) -> Result<(), StoreError>;

    /// Removes the server from the pinner sets of the given skylinks.
    async fn remove_server_from_skylinks(
        &self,
        skylinks: &[Skylink],
        server: &str,
    ) -> Result<(), StoreError>;

    /// Lists all skylinks the store believes the given server is pinning.
    async fn skylinks_for_server(&self, server: &str) -> Result<Vec<Skylink>, StoreError>;

    /// Reads a cluster configuration value.
    async fn config_value(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Writes a cluster configuration value.
    async fn set_config_value(&self, key: &str, value: &str) -> Result<(), StoreError>;
}
