// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Wire types of the local daemon's HTTP API.

use pinner_core::Skylink;
use serde::{Deserialize, Serialize};

/// Metadata of a pinned object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Size of the object in bytes.
    pub length: u64,
}

/// Repair health of a pinned object as reported by the daemon.
///
/// The daemon may stop repairing a file before it reaches perfect health, so
/// callers should gate on [`needs_repair`][Self::needs_repair] rather than
/// comparing the numeric health to zero.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileHealth {
    /// Numeric health of the object. Zero is perfect.
    pub health: f64,
    /// Whether the daemon still schedules repair work for the object.
    pub needs_repair: bool,
}

/// One level of the daemon's pin directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryListing {
    /// The listed directory itself, followed by its subdirectories.
    pub directories: Vec<DirectoryInfo>,
    /// The files directly inside the listed directory.
    pub files: Vec<FileInfo>,
}

/// A directory entry of a [`DirectoryListing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryInfo {
    /// Daemon-relative path of the directory.
    pub path: String,
}

/// A file entry of a [`DirectoryListing`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// The skylinks anchored on this file.
    pub skylinks: Vec<Skylink>,
}

/// Response of the resolve endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct ResolveResponse {
    pub skylink: Skylink,
}

#[cfg(test)]
mod tests {
    use pinner_core::test_utils::skylink_for_seed;

    use super::*;

    #[test]
    fn file_health_uses_camel_case() {
        let health: FileHealth = serde_json::from_str(r#"{"health":0.5,"needsRepair":true}"#).unwrap();
        assert_eq!(
            health,
            FileHealth {
                health: 0.5,
                needs_repair: true
            }
        );
    }

    #[test]
    fn directory_listing_decodes_skylinks() {
        let skylink = skylink_for_seed(1);
        let json = format!(
            r#"{{"directories":[{{"path":"pins"}}],"files":[{{"skylinks":["{skylink}"]}}]}}"#
        );
        let listing: DirectoryListing = serde_json::from_str(&json).unwrap();
        assert_eq!(listing.directories[0].path, "pins");
        assert_eq!(listing.files[0].skylinks, vec![skylink]);
    }
}
