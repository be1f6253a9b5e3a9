// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! In-process cache of the skylinks the local daemon is believed to hold.
//!
//! The scanner and the sweeper both need fast "does the daemon hold X?"
//! answers without a daemon round-trip on the hot path. The cache is rebuilt
//! by walking the daemon's pin directory tree; rebuilds are single-flight,
//! so concurrent callers attach to the in-flight walk instead of duplicating
//! it.

use std::{
    collections::{HashSet, VecDeque},
    sync::{Arc, Mutex},
};

use pinner_core::Skylink;
use pinner_daemon_client::{DaemonClient, DaemonError, PIN_ROOT};
use tokio::sync::watch;

/// The cache. One instance per service, shared by scanner and sweeper.
/// Cheap to clone; clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct PinnedSet {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    skylinks: HashSet<Skylink>,
    // INV: Some while exactly one rebuild task is running.
    rebuild: Option<RebuildHandle>,
}

/// Handle onto an in-flight or completed cache rebuild.
///
/// All callers that requested a rebuild while one was running hold handles
/// onto the same rebuild and observe the same result.
#[derive(Debug, Clone)]
pub struct RebuildHandle {
    done: watch::Receiver<bool>,
    error: Arc<Mutex<Option<Arc<DaemonError>>>>,
}

impl RebuildHandle {
    /// Waits until the rebuild has completed.
    pub async fn wait(&self) {
        let mut done = self.done.clone();
        // A closed channel means the rebuild task is gone, which only
        // happens after it has published its result.
        let _ = done.wait_for(|done| *done).await;
    }

    /// The error of the rebuild. Must only be read after
    /// [`wait`][Self::wait] has returned; `None` means the rebuild
    /// succeeded.
    pub fn error(&self) -> Option<Arc<DaemonError>> {
        self.error
            .lock()
            .expect("rebuild error lock is never poisoned")
            .clone()
    }
}

impl PinnedSet {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the given skylink is in the cache.
    pub fn contains(&self, skylink: &Skylink) -> bool {
        self.lock().skylinks.contains(skylink)
    }

    /// Registers the given skylinks in the cache.
    pub fn add(&self, skylinks: impl IntoIterator<Item = Skylink>) {
        self.lock().skylinks.extend(skylinks);
    }

    /// Removes the given skylinks from the cache.
    pub fn remove(&self, skylinks: impl IntoIterator<Item = Skylink>) {
        let mut inner = self.lock();
        for skylink in skylinks {
            inner.skylinks.remove(&skylink);
        }
    }

    /// The number of skylinks in the cache.
    pub fn len(&self) -> usize {
        self.lock().skylinks.len()
    }

    /// Returns true when the cache is empty.
    pub fn is_empty(&self) -> bool {
        self.lock().skylinks.is_empty()
    }

    /// Compares the cache against the given list.
    ///
    /// Returns the skylinks of the list that are not in the cache
    /// (`unknown`) and the skylinks of the cache that are not in the list
    /// (`missing`). Order is unspecified.
    pub fn diff(&self, skylinks: &[Skylink]) -> (Vec<Skylink>, Vec<Skylink>) {
        let inner = self.lock();
        let unknown = skylinks
            .iter()
            .filter(|skylink| !inner.skylinks.contains(skylink))
            .copied()
            .collect();
        let listed: HashSet<&Skylink> = skylinks.iter().collect();
        let missing = inner
            .skylinks
            .iter()
            .filter(|skylink| !listed.contains(skylink))
            .copied()
            .collect();
        (unknown, missing)
    }

    /// Rebuilds the cache from the daemon's pin directory tree.
    ///
    /// The walk runs in a background task; the returned handle can be
    /// awaited for completion. When a rebuild is already running, the handle
    /// of that rebuild is returned instead of starting a second walk. A
    /// failed rebuild leaves the cache unchanged and reports its error on
    /// the handle.
    pub fn rebuild(&self, daemon: Arc<dyn DaemonClient>) -> RebuildHandle {
        let mut inner = self.lock();
        if let Some(handle) = &inner.rebuild {
            return handle.clone();
        }

        let (done_tx, done_rx) = watch::channel(false);
        let error = Arc::new(Mutex::new(None));
        let handle = RebuildHandle {
            done: done_rx,
            error: Arc::clone(&error),
        };
        inner.rebuild = Some(handle.clone());
        drop(inner);

        let cache = self.clone();
        tokio::spawn(async move {
            let result = walk_pinned_skylinks(daemon.as_ref()).await;
            let mut inner = cache.lock();
            match result {
                Ok(skylinks) => {
                    tracing::debug!(count = skylinks.len(), "rebuilt the pinned-set cache");
                    inner.skylinks = skylinks;
                }
                Err(err) => {
                    *error
                        .lock()
                        .expect("rebuild error lock is never poisoned") = Some(Arc::new(err));
                }
            }
            // Clear the in-flight marker before signalling completion, so a
            // caller that observes the completion can start a fresh rebuild.
            inner.rebuild = None;
            drop(inner);
            let _ = done_tx.send(true);
        });

        handle
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("pinned set lock is never poisoned")
    }
}

/// Walks the daemon's pin tree breadth-first and collects every skylink
/// anchored on any file.
async fn walk_pinned_skylinks(
    daemon: &dyn DaemonClient,
) -> Result<HashSet<Skylink>, DaemonError> {
    let mut dirs = VecDeque::from([PIN_ROOT.to_owned()]);
    let mut skylinks = HashSet::new();
    while let Some(dir) = dirs.pop_front() {
        let listing = daemon.list_dir(&dir).await?;
        for file in listing.files {
            skylinks.extend(file.skylinks);
        }
        // The first directory entry is the listed directory itself.
        dirs.extend(
            listing
                .directories
                .into_iter()
                .skip(1)
                .map(|dir| dir.path),
        );
    }
    Ok(skylinks)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use pinner_core::test_utils::skylink_for_seed;

    use super::*;
    use crate::test_utils::FakeDaemon;

    #[tokio::test]
    async fn diff_classifies_both_directions() {
        let cache = PinnedSet::new();
        let (a, b, c) = (
            skylink_for_seed(1),
            skylink_for_seed(2),
            skylink_for_seed(3),
        );
        cache.add([a, b]);

        // Everything matches.
        let (unknown, missing) = cache.diff(&[a, b]);
        assert!(unknown.is_empty());
        assert!(missing.is_empty());

        // The cache is missing c; the list is missing b.
        let (unknown, mut missing) = cache.diff(&[a, c]);
        assert_eq!(unknown, vec![c]);
        missing.sort();
        assert_eq!(missing, vec![b]);

        // An empty list leaves the full cache as missing.
        let (unknown, missing) = cache.diff(&[]);
        assert!(unknown.is_empty());
        assert_eq!(missing.len(), 2);
    }

    #[tokio::test]
    async fn add_and_remove_are_idempotent() {
        let cache = PinnedSet::new();
        let skylink = skylink_for_seed(1);
        cache.add([skylink]);
        cache.add([skylink]);
        assert_eq!(cache.len(), 1);
        cache.remove([skylink]);
        cache.remove([skylink]);
        assert!(!cache.contains(&skylink));
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn rebuild_replaces_the_set_from_the_walk() {
        let daemon = Arc::new(FakeDaemon::new());
        let (old, new) = (skylink_for_seed(1), skylink_for_seed(2));
        daemon.add_pinned([new]);

        let cache = PinnedSet::new();
        cache.add([old]);

        let handle = cache.rebuild(daemon);
        handle.wait().await;
        assert!(handle.error().is_none());
        assert!(cache.contains(&new));
        assert!(!cache.contains(&old));
    }

    #[tokio::test]
    async fn concurrent_rebuilds_share_one_walk() {
        let daemon = Arc::new(FakeDaemon::new());
        daemon.set_walk_delay(Duration::from_millis(100));
        daemon.add_pinned([skylink_for_seed(1)]);

        let cache = PinnedSet::new();
        let first = cache.rebuild(Arc::clone(&daemon) as _);
        let second = cache.rebuild(Arc::clone(&daemon) as _);
        tokio::join!(first.wait(), second.wait());

        assert!(first.error().is_none());
        assert!(second.error().is_none());
        assert_eq!(daemon.walk_count(), 1);
    }

    #[tokio::test]
    async fn a_failed_rebuild_leaves_the_set_intact() {
        let daemon = Arc::new(FakeDaemon::new());
        daemon.fail_walks();

        let cache = PinnedSet::new();
        let skylink = skylink_for_seed(1);
        cache.add([skylink]);

        let handle = cache.rebuild(Arc::clone(&daemon) as _);
        handle.wait().await;
        assert!(handle.error().is_some());
        assert!(cache.contains(&skylink));

        // The next rebuild starts fresh and succeeds.
        daemon.restore_walks();
        daemon.add_pinned([skylink]);
        let handle = cache.rebuild(daemon);
        handle.wait().await;
        assert!(handle.error().is_none());
    }

    #[tokio::test]
    async fn rebuild_walks_subdirectories_and_skips_the_self_entry() {
        let daemon = Arc::new(FakeDaemon::new());
        let (a, b) = (skylink_for_seed(1), skylink_for_seed(2));
        let subdir = format!("{PIN_ROOT}/sub");
        daemon.add_dir(PIN_ROOT, &[subdir.as_str()], [a]);
        daemon.add_dir(&subdir, &[], [b]);

        let cache = PinnedSet::new();
        let handle = cache.rebuild(daemon);
        handle.wait().await;

        assert!(handle.error().is_none());
        assert!(cache.contains(&a));
        assert!(cache.contains(&b));
        assert_eq!(cache.len(), 2);
    }
}
