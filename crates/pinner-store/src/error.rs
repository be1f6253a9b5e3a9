// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Errors returned by the document store.

use pinner_core::SkylinkParseError;

/// Error raised by [`PinStore`][crate::PinStore] operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The skylink record already exists.
    #[error("skylink already exists")]
    SkylinkExists,

    /// The skylink record does not exist, or an update that was expected to
    /// affect a row affected none.
    #[error("skylink does not exist")]
    SkylinkNotFound,

    /// No record currently matches the underpinned predicate. This is
    /// expected control flow for a scan, not a failure.
    #[error("no skylinks need pinning")]
    NoUnderpinnedSkylinks,

    /// A cluster configuration value failed validation.
    #[error("invalid configuration value for '{key}': {reason}")]
    InvalidConfigValue {
        /// The configuration key that failed validation.
        key: &'static str,
        /// Why the stored value was rejected.
        reason: String,
    },

    /// The store contains a skylink string that does not parse. This points
    /// at a writer that bypassed canonicalization.
    #[error("invalid skylink in store: {0}")]
    InvalidStoredSkylink(#[from] SkylinkParseError),

    /// The store could not be reached.
    #[error("store unreachable: {0}")]
    Unreachable(String),

    /// The underlying database failed.
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

impl StoreError {
    /// Returns true iff the error is the benign end-of-scan signal.
    pub fn is_no_underpinned_skylinks(&self) -> bool {
        matches!(self, StoreError::NoUnderpinnedSkylinks)
    }
}
