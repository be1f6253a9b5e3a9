// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0
//! Utility functions for tests.

use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

use crate::{Skylink, RAW_SKYLINK_SIZE};

/// Returns an arbitrary version-1 skylink for tests.
pub fn random_skylink() -> Skylink {
    skylink_for_seed(rand::thread_rng().gen())
}

/// Returns the version-1 skylink deterministically derived from the seed.
///
/// Tests that need several distinct, reproducible links can use consecutive
/// seeds.
pub fn skylink_for_seed(seed: u64) -> Skylink {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut raw = [0u8; RAW_SKYLINK_SIZE];
    rng.fill_bytes(&mut raw[2..]);
    Skylink::from_raw(raw)
}

/// Returns an arbitrary version-2 skylink for tests.
pub fn random_skylink_v2() -> Skylink {
    let mut raw = random_skylink().to_raw();
    raw[0] |= 0b01;
    Skylink::from_raw(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seeded_skylinks_are_deterministic() {
        assert_eq!(skylink_for_seed(7), skylink_for_seed(7));
        assert_ne!(skylink_for_seed(7), skylink_for_seed(8));
    }

    #[test]
    fn random_skylink_v2_is_version_2() {
        assert!(random_skylink_v2().is_v2());
        assert!(!random_skylink().is_v2());
    }
}
