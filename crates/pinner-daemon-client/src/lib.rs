// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Client for the local storage daemon.
//!
//! Each server runs one storage daemon that physically pins and unpins
//! objects. This crate wraps its HTTP API behind the [`DaemonClient`] trait
//! so the services can be exercised against fakes, and classifies failures
//! into typed kinds instead of matching on error strings.

use async_trait::async_trait;
use pinner_core::Skylink;

pub mod api;
mod client;
mod error;

pub use client::{ClientBuilder, HttpDaemonClient};
pub use error::{ClientBuildError, DaemonError};

use api::{DirectoryListing, FileHealth, FileMetadata};

/// The root of the daemon's pin directory tree. Cache rebuilds walk the tree
/// starting here.
pub const PIN_ROOT: &str = "pins";

/// Operations of the local storage daemon the pinner services rely on.
#[async_trait]
pub trait DaemonClient: std::fmt::Debug + Send + Sync {
    /// Instructs the daemon to pin the given skylink.
    ///
    /// Fails with an error for which
    /// [`is_already_pinned`][DaemonError::is_already_pinned] holds when the
    /// daemon already pins the skylink.
    async fn pin(&self, skylink: &Skylink) -> Result<(), DaemonError>;

    /// Instructs the daemon to unpin the given skylink.
    async fn unpin(&self, skylink: &Skylink) -> Result<(), DaemonError>;

    /// Returns the metadata of the object behind the skylink.
    async fn metadata(&self, skylink: &Skylink) -> Result<FileMetadata, DaemonError>;

    /// Returns the current repair health of the pinned object.
    async fn file_health(&self, skylink: &Skylink) -> Result<FileHealth, DaemonError>;

    /// Resolves a version-2 skylink to the version-1 skylink it points at.
    async fn resolve(&self, skylink: &Skylink) -> Result<Skylink, DaemonError>;

    /// Lists one level of the daemon's pin directory tree.
    ///
    /// The first entry of the returned directories is the listed directory
    /// itself; walkers skip it.
    async fn list_dir(&self, path: &str) -> Result<DirectoryListing, DaemonError>;
}
