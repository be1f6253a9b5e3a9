// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! The cluster-shared document store used to coordinate pinning.
//!
//! Every server in the cluster talks to the same store. It records, per
//! skylink, the set of servers currently pinning it, whether the cluster
//! wants it pinned at all, and a short-lived repair lock that serializes
//! repair work on a single skylink across the fleet.
//!
//! [`PinStore`] is the contract the services rely on; [`PostgresStore`] is
//! the shipped implementation.

use std::time::Duration;

mod error;
mod postgres;
pub mod settings;
mod store;

pub use error::StoreError;
pub use postgres::{DbConfig, PostgresStore};
pub use store::{PinStore, SkylinkRecord};

#[cfg(any(test, feature = "test-utils"))]
pub use store::MockPinStore;

/// How long a repair lock is honored before it is considered expired.
///
/// Chosen so that any legitimate single-object repair fits comfortably within
/// one lock, while a crashed server only stalls repairs of the skylinks it
/// had locked for this long.
pub const LOCK_DURATION: Duration = Duration::from_secs(7 * 60 * 60);

/// The default deadline for a single store call.
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(30);
