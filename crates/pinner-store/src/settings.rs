// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Cluster-wide settings, stored as key/value pairs in the configuration
//! table so that every server observes the same values.

use crate::{PinStore, StoreError};

/// Key of the setting holding the minimum number of servers that should be
/// pinning each skylink. Raising it forces more replication.
pub const MIN_PINNERS_KEY: &str = "min_pinners";

/// Key of the dry-run switch. When set, scanners select and lock candidates
/// but skip the actual pin calls against the local daemon.
pub const DRY_RUN_KEY: &str = "dry_run";

/// The minimum number of pinners assumed when the setting is absent.
pub const DEFAULT_MIN_PINNERS: usize = 1;

// Going below 1 makes the service pointless; the ceiling bounds the direct
// financial impact of a typo, as each extra pinner costs real storage.
const MIN_PINNERS_FLOOR: usize = 1;
const MIN_PINNERS_CEILING: usize = 10;

/// Reads the cluster-wide `min_pinners` setting, validating its range.
pub async fn min_pinners(store: &dyn PinStore) -> Result<usize, StoreError> {
    let Some(value) = store.config_value(MIN_PINNERS_KEY).await? else {
        return Ok(DEFAULT_MIN_PINNERS);
    };
    let min_pinners: usize = value
        .parse()
        .map_err(|_| StoreError::InvalidConfigValue {
            key: MIN_PINNERS_KEY,
            reason: format!("'{value}' is not an integer"),
        })?;
    if !(MIN_PINNERS_FLOOR..=MIN_PINNERS_CEILING).contains(&min_pinners) {
        return Err(StoreError::InvalidConfigValue {
            key: MIN_PINNERS_KEY,
            reason: format!(
                "{min_pinners} is outside the allowed range \
                 [{MIN_PINNERS_FLOOR}, {MIN_PINNERS_CEILING}]"
            ),
        });
    }
    Ok(min_pinners)
}

/// Reads the cluster-wide `dry_run` switch. Absent means off.
pub async fn dry_run(store: &dyn PinStore) -> Result<bool, StoreError> {
    match store.config_value(DRY_RUN_KEY).await?.as_deref() {
        None => Ok(false),
        Some("1") => Ok(true),
        Some("0") => Ok(false),
        Some(value) => value.parse().map_err(|_| StoreError::InvalidConfigValue {
            key: DRY_RUN_KEY,
            reason: format!("'{value}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use mockall::predicate::eq;

    use super::*;
    use crate::MockPinStore;

    fn store_returning(key: &'static str, value: Option<&'static str>) -> MockPinStore {
        let mut store = MockPinStore::new();
        store
            .expect_config_value()
            .with(eq(key))
            .returning(move |_| Ok(value.map(str::to_owned)));
        store
    }

    #[tokio::test]
    async fn min_pinners_defaults_when_absent() {
        let store = store_returning(MIN_PINNERS_KEY, None);
        assert_eq!(min_pinners(&store).await.unwrap(), DEFAULT_MIN_PINNERS);
    }

    #[tokio::test]
    async fn min_pinners_parses_a_stored_value() {
        let store = store_returning(MIN_PINNERS_KEY, Some("3"));
        assert_eq!(min_pinners(&store).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn min_pinners_rejects_out_of_range_values() {
        for value in ["0", "11", "-2"] {
            let store = store_returning(MIN_PINNERS_KEY, Some(value));
            assert!(matches!(
                min_pinners(&store).await,
                Err(StoreError::InvalidConfigValue { key, .. }) if key == MIN_PINNERS_KEY
            ));
        }
    }

    #[tokio::test]
    async fn min_pinners_rejects_non_numeric_values() {
        let store = store_returning(MIN_PINNERS_KEY, Some("many"));
        assert!(matches!(
            min_pinners(&store).await,
            Err(StoreError::InvalidConfigValue { .. })
        ));
    }

    #[tokio::test]
    async fn dry_run_defaults_to_off() {
        let store = store_returning(DRY_RUN_KEY, None);
        assert!(!dry_run(&store).await.unwrap());
    }

    #[tokio::test]
    async fn dry_run_parses_boolean_forms() {
        for (value, expected) in [("true", true), ("false", false), ("1", true), ("0", false)] {
            let store = store_returning(DRY_RUN_KEY, Some(value));
            assert_eq!(dry_run(&store).await.unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn dry_run_rejects_garbage() {
        let store = store_returning(DRY_RUN_KEY, Some("maybe"));
        assert!(matches!(
            dry_run(&store).await,
            Err(StoreError::InvalidConfigValue { .. })
        ));
    }
}
