// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Publishable snapshot of sweep progress.

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// The status of the most recent sweep, as served by the admin API.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SweepStatus {
    /// Whether a sweep is currently running.
    pub in_progress: bool,
    /// The error of the last finished sweep, if it failed.
    pub error: Option<String>,
    /// When the sweep started.
    pub start_time: Option<DateTime<Utc>>,
    /// When the sweep finished. Unset while one is in progress.
    pub end_time: Option<DateTime<Utc>>,
}

/// Mutex-protected holder of the current [`SweepStatus`].
#[derive(Debug, Default)]
pub(crate) struct StatusState {
    status: Mutex<SweepStatus>,
}

impl StatusState {
    /// Marks the start of a new sweep.
    ///
    /// Returns false when a sweep is already in progress; callers that lose
    /// the race must return without acting.
    pub fn start(&self) -> bool {
        let mut status = self.lock();
        if status.in_progress {
            return false;
        }
        *status = SweepStatus {
            in_progress: true,
            error: None,
            start_time: Some(Utc::now()),
            end_time: None,
        };
        true
    }

    /// Marks the running sweep as finished with the given error.
    pub fn finalize(&self, error: Option<String>) {
        let mut status = self.lock();
        status.in_progress = false;
        status.end_time = Some(Utc::now());
        status.error = error;
    }

    /// Returns a copy of the current status.
    pub fn current(&self) -> SweepStatus {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SweepStatus> {
        self.status.lock().expect("status lock is never poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_wins_only_once() {
        let state = StatusState::default();
        assert!(state.start());
        assert!(!state.start());

        let status = state.current();
        assert!(status.in_progress);
        assert!(status.start_time.is_some());
        assert!(status.end_time.is_none());
    }

    #[test]
    fn finalize_records_the_error_and_end_time() {
        let state = StatusState::default();
        assert!(state.start());
        state.finalize(Some("boom".to_owned()));

        let status = state.current();
        assert!(!status.in_progress);
        assert_eq!(status.error.as_deref(), Some("boom"));
        assert!(status.end_time.is_some());

        // A new sweep may start and clears the previous error.
        assert!(state.start());
        assert!(state.current().error.is_none());
    }
}
