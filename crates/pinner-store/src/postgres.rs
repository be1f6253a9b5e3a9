// Copyright (c) Walrus Foundation
// SPDX-License-Identifier: Apache-2.0

//! PostgreSQL-backed implementation of the store contract.

use async_trait::async_trait;
use chrono::{DateTime, DurationRound as _, Utc};
use pinner_core::Skylink;
use serde::{Deserialize, Serialize};
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions},
    PgPool,
};

use crate::{PinStore, SkylinkRecord, StoreError, LOCK_DURATION};

/// The store schema, applied on connect. Every statement is idempotent.
const SCHEMA: &str = include_str!("schema.sql");

/// Connection parameters for the shared PostgreSQL store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbConfig {
    /// Host name or IP of the database server.
    pub host: String,
    /// Port of the database server.
    pub port: u16,
    /// Database user.
    pub user: String,
    /// Password of the database user.
    pub password: String,
    /// Name of the database.
    #[serde(default = "defaults::database")]
    pub database: String,
    /// Maximum number of pooled connections.
    #[serde(default = "defaults::max_connections")]
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_owned(),
            port: 5432,
            user: "pinner".to_owned(),
            password: String::new(),
            database: defaults::database(),
            max_connections: defaults::max_connections(),
        }
    }
}

mod defaults {
    pub(super) fn database() -> String {
        "pinner".to_owned()
    }

    pub(super) fn max_connections() -> u32 {
        8
    }
}

/// [`PinStore`] implementation over a PostgreSQL connection pool.
///
/// The atomic find-and-lock is a transaction selecting the candidate row
/// with `FOR UPDATE SKIP LOCKED`, so concurrent callers from different
/// servers can never be handed the same skylink.
#[derive(Debug, Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    /// Connects to the database and applies the schema.
    pub async fn connect(config: &DbConfig) -> Result<Self, StoreError> {
        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(&config.password)
            .database(&config.database);
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(options)
            .await?;
        tracing::info!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            "connected to the pinner store"
        );

        for statement in schema_statements(SCHEMA) {
            sqlx::query(statement).execute(&pool).await?;
        }

        Ok(Self { pool })
    }
}

#[async_trait]
impl PinStore for PostgresStore {
    async fn ping(&self) -> Result<(), StoreError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_skylink(
        &self,
        skylink: &Skylink,
        server: &str,
    ) -> Result<SkylinkRecord, StoreError> {
        let result = sqlx::query("INSERT INTO skylinks (skylink, servers) VALUES ($1, ARRAY[$2::text])")
            .bind(skylink.to_string())
            .bind(server)
            .execute(&self.pool)
            .await;
        match result {
            Ok(_) => Ok(SkylinkRecord {
                skylink: *skylink,
                servers: vec![server.to_owned()],
                pinned: true,
                locked_by: None,
                lock_expires: None,
            }),
            Err(error) if is_unique_violation(&error) => Err(StoreError::SkylinkExists),
            Err(error) => Err(error.into()),
        }
    }

    async fn mark_unpinned(&self, skylink: &Skylink) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO skylinks (skylink, pinned) VALUES ($1, FALSE) \
             ON CONFLICT (skylink) DO UPDATE SET pinned = FALSE",
        )
        .bind(skylink.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn find_and_lock_underpinned(
        &self,
        server: &str,
        min_pinners: usize,
    ) -> Result<Skylink, StoreError> {
        let now = Utc::now();

        // A record this server locked before a crash takes precedence; the
        // repair resumes instead of waiting out its own lock.
        let resumed = sqlx::query_scalar::<_, String>(
            "SELECT skylink FROM skylinks \
             WHERE locked_by = $1 AND lock_expires > $2 AND pinned LIMIT 1",
        )
        .bind(server)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(skylink) = resumed {
            return Ok(skylink.parse()?);
        }

        let mut tx = self.pool.begin().await?;
        let candidate = sqlx::query_scalar::<_, String>(
            "SELECT skylink FROM skylinks \
             WHERE pinned \
               AND cardinality(servers) < $1 \
               AND NOT servers @> ARRAY[$2::text] \
               AND (lock_expires IS NULL OR lock_expires < $3) \
             LIMIT 1 \
             FOR UPDATE SKIP LOCKED",
        )
        .bind(i32::try_from(min_pinners).unwrap_or(i32::MAX))
        .bind(server)
        .bind(now)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(StoreError::NoUnderpinnedSkylinks)?;

        sqlx::query("UPDATE skylinks SET locked_by = $1, lock_expires = $2 WHERE skylink = $3")
            .bind(server)
            .bind(lock_expiry(now))
            .bind(&candidate)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(candidate.parse()?)
    }

    async fn unlock_skylink(&self, skylink: &Skylink, server: &str) -> Result<(), StoreError> {
        let result = sqlx::query(
            "UPDATE skylinks SET locked_by = NULL, lock_expires = NULL \
             WHERE skylink = $1 AND locked_by = $2",
        )
        .bind(skylink.to_string())
        .bind(server)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::SkylinkNotFound);
        }
        Ok(())
    }

    async fn add_server_for_skylinks(
        &self,
        skylinks: &[Skylink],
        server: &str,
        mark_pinned: bool,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for skylink in skylinks {
            sqlx::query(
                "INSERT INTO skylinks (skylink, servers) VALUES ($1, ARRAY[$2::text]) \
                 ON CONFLICT (skylink) DO UPDATE SET \
                   servers = CASE \
                     WHEN skylinks.servers @> ARRAY[$2::text] THEN skylinks.servers \
                     ELSE array_append(skylinks.servers, $2) \
                   END, \
                   pinned = skylinks.pinned OR $3",
            )
            .bind(skylink.to_string())
            .bind(server)
            .bind(mark_pinned)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn remove_server_from_skylinks(
        &self,
        skylinks: &[Skylink],
        server: &str,
    ) -> Result<(), StoreError> {
        let skylinks: Vec<String> = skylinks.iter().map(Skylink::to_string).collect();
        sqlx::query("UPDATE skylinks SET servers = array_remove(servers, $1) WHERE skylink = ANY($2)")
            .bind(server)
            .bind(&skylinks)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn skylinks_for_server(&self, server: &str) -> Result<Vec<Skylink>, StoreError> {
        let rows = sqlx::query_scalar::<_, String>(
            "SELECT skylink FROM skylinks WHERE servers @> ARRAY[$1::text]",
        )
        .bind(server)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter()
            .map(|skylink| Ok(skylink.parse()?))
            .collect()
    }

    async fn config_value(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT value FROM configuration WHERE key = $1")
                .bind(key)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn set_config_value(&self, key: &str, value: &str) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO configuration (key, value) VALUES ($1, $2) \
             ON CONFLICT (key) DO UPDATE SET value = excluded.value",
        )
        .bind(key)
        .bind(value)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// The expiry instant of a lock taken at `now`, truncated to milliseconds so
/// the stored value round-trips through every client.
fn lock_expiry(now: DateTime<Utc>) -> DateTime<Utc> {
    let expires = now
        + chrono::Duration::from_std(LOCK_DURATION).expect("the lock duration fits in a chrono duration");
    expires
        .duration_trunc(chrono::Duration::milliseconds(1))
        .expect("truncating to milliseconds cannot fail")
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn schema_statements(schema: &str) -> Vec<&str> {
    schema
        .split(';')
        .filter_map(|statement| {
            let trimmed = statement.trim();
            let has_sql = trimmed.lines().any(|line| {
                let line = line.trim();
                !line.is_empty() && !line.starts_with("--")
            });
            has_sql.then_some(trimmed)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_splits_into_nonempty_statements() {
        let statements = schema_statements(SCHEMA);
        assert_eq!(statements.len(), 6);
        assert!(statements[0].contains("CREATE TABLE IF NOT EXISTS skylinks"));
        assert!(statements
            .last()
            .unwrap()
            .contains("CREATE TABLE IF NOT EXISTS configuration"));
    }

    #[test]
    fn schema_splitting_drops_comment_only_chunks() {
        let statements = schema_statements("-- only a comment\n;CREATE TABLE t (id INT);\n-- trailing");
        assert_eq!(statements, vec!["CREATE TABLE t (id INT)"]);
    }

    #[test]
    fn lock_expiry_is_truncated_to_milliseconds() {
        let now = Utc::now();
        let expires = lock_expiry(now);
        assert_eq!(expires.timestamp_subsec_nanos() % 1_000_000, 0);
        let lock_duration = chrono::Duration::from_std(LOCK_DURATION).unwrap();
        assert!(expires > now + lock_duration - chrono::Duration::milliseconds(1));
        assert!(expires <= now + lock_duration);
    }
}
