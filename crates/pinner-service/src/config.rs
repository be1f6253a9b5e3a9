// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! Configuration of a pinner node.
//!
//! The service is configured from the environment, like the rest of the
//! portal stack it is deployed with. [`PinnerConfig::from_env`] documents
//! the variables.

use std::{env, net::SocketAddr, path::PathBuf, time::Duration};

use anyhow::{bail, Context as _};
use pinner_store::DbConfig;
use serde::{Deserialize, Serialize};

/// Connection parameters for the local storage daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Host name or IP of the daemon's API.
    pub host: String,
    /// Port of the daemon's API.
    pub port: u16,
    /// Password for the daemon's API.
    pub api_password: String,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            host: defaults::daemon_host(),
            port: defaults::daemon_port(),
            api_password: String::new(),
        }
    }
}

/// Configuration of a pinner node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnerConfig {
    /// The name of this server. Used to identify which servers pin a given
    /// skylink, so it must be unique and stable across the fleet.
    pub server_name: String,
    /// Connection parameters for the shared store.
    #[serde(default)]
    pub db: DbConfig,
    /// Connection parameters for the local daemon.
    #[serde(default)]
    pub daemon: DaemonConfig,
    /// Socket address on which the admin API listens.
    #[serde(default = "defaults::rest_api_address")]
    pub rest_api_address: SocketAddr,
    /// Log file to write to, in addition to stderr. Unset disables logging
    /// to a file.
    #[serde(default)]
    pub log_file: Option<PathBuf>,
    /// Overrides the period between store scans. Unset uses the built-in
    /// default.
    #[serde(default)]
    pub sleep_between_scans: Option<Duration>,
    /// The number of pinners assumed before the first read of the
    /// cluster-wide setting succeeds.
    #[serde(default = "defaults::min_pinners")]
    pub min_pinners: usize,
    /// Host of the local accounts service.
    #[serde(default = "defaults::accounts_host")]
    pub accounts_host: String,
    /// Port of the local accounts service.
    #[serde(default = "defaults::accounts_port")]
    pub accounts_port: u16,
}

impl Default for PinnerConfig {
    fn default() -> Self {
        Self {
            server_name: String::new(),
            db: DbConfig::default(),
            daemon: DaemonConfig::default(),
            rest_api_address: defaults::rest_api_address(),
            log_file: None,
            sleep_between_scans: None,
            min_pinners: defaults::min_pinners(),
            accounts_host: defaults::accounts_host(),
            accounts_port: defaults::accounts_port(),
        }
    }
}

/// Default configuration values. For individual descriptions see
/// [`PinnerConfig`].
pub mod defaults {
    use std::net::SocketAddr;

    pub(super) fn daemon_host() -> String {
        "10.10.10.10".to_owned()
    }

    pub(super) fn daemon_port() -> u16 {
        9980
    }

    /// The default address of the admin API.
    pub fn rest_api_address() -> SocketAddr {
        "0.0.0.0:4000".parse().expect("this is a valid address")
    }

    pub(super) fn min_pinners() -> usize {
        1
    }

    pub(super) fn accounts_host() -> String {
        "10.10.10.70".to_owned()
    }

    pub(super) fn accounts_port() -> u16 {
        3000
    }
}

impl PinnerConfig {
    /// Loads the configuration from the environment.
    ///
    /// Required variables: `SERVER_DOMAIN`, `PINNER_DB_HOST`,
    /// `PINNER_DB_PORT`, `PINNER_DB_USER`, `PINNER_DB_PASSWORD`, and
    /// `DAEMON_API_PASSWORD`.
    ///
    /// Optional variables: `PINNER_DB_NAME`, `DAEMON_API_HOST`,
    /// `DAEMON_API_PORT`, `PINNER_API_ADDRESS`, `PINNER_LOG_FILE`,
    /// `PINNER_SLEEP_BETWEEN_SCANS` (a duration string such as `19h` or
    /// `90m`; a bare number is interpreted as seconds),
    /// `PINNER_ACCOUNTS_HOST`, and `PINNER_ACCOUNTS_PORT`.
    pub fn from_env() -> anyhow::Result<Self> {
        let mut config = Self {
            server_name: required_var("SERVER_DOMAIN")?,
            ..Self::default()
        };

        config.db.host = required_var("PINNER_DB_HOST")?;
        config.db.port = required_var("PINNER_DB_PORT")?
            .parse()
            .context("PINNER_DB_PORT is not a valid port")?;
        config.db.user = required_var("PINNER_DB_USER")?;
        config.db.password = required_var("PINNER_DB_PASSWORD")?;
        if let Ok(database) = env::var("PINNER_DB_NAME") {
            config.db.database = database;
        }

        config.daemon.api_password = required_var("DAEMON_API_PASSWORD")?;
        if let Ok(host) = env::var("DAEMON_API_HOST") {
            config.daemon.host = host;
        }
        if let Ok(port) = env::var("DAEMON_API_PORT") {
            config.daemon.port = port.parse().context("DAEMON_API_PORT is not a valid port")?;
        }

        if let Ok(address) = env::var("PINNER_API_ADDRESS") {
            config.rest_api_address = address
                .parse()
                .context("PINNER_API_ADDRESS is not a valid socket address")?;
        }
        if let Ok(log_file) = env::var("PINNER_LOG_FILE") {
            config.log_file = Some(PathBuf::from(log_file));
        }
        if let Ok(value) = env::var("PINNER_SLEEP_BETWEEN_SCANS") {
            config.sleep_between_scans = Some(
                parse_scan_interval(&value)
                    .context("PINNER_SLEEP_BETWEEN_SCANS is not a valid duration")?,
            );
        }
        if let Ok(host) = env::var("PINNER_ACCOUNTS_HOST") {
            config.accounts_host = host;
        }
        if let Ok(port) = env::var("PINNER_ACCOUNTS_PORT") {
            config.accounts_port = port
                .parse()
                .context("PINNER_ACCOUNTS_PORT is not a valid port")?;
        }

        Ok(config)
    }
}

fn required_var(name: &str) -> anyhow::Result<String> {
    match env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => bail!("missing env var {name}"),
    }
}

/// Parses a scan interval. A bare number is interpreted as seconds;
/// otherwise the value must be a duration string such as `19h` or `30m 10s`.
fn parse_scan_interval(value: &str) -> anyhow::Result<Duration> {
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    Ok(humantime::parse_duration(value)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_numbers_are_seconds() {
        assert_eq!(parse_scan_interval("90").unwrap(), Duration::from_secs(90));
    }

    #[test]
    fn duration_strings_are_parsed() {
        assert_eq!(
            parse_scan_interval("19h").unwrap(),
            Duration::from_secs(19 * 60 * 60)
        );
        assert_eq!(
            parse_scan_interval("1m 30s").unwrap(),
            Duration::from_secs(90)
        );
    }

    #[test]
    fn garbage_intervals_are_rejected() {
        assert!(parse_scan_interval("soon").is_err());
        assert!(parse_scan_interval("-5").is_err());
    }
}
