// Copyright (c) TX Society
// SPDX-License-Identifier: Apache-2.0

use std::ops::{Deref, DerefMut};
use std::time::Duration;

use anyhow::Context as _;
use diesel::prelude::QueryableByName;
use diesel_async::pooled_connection::bb8::{Pool, PooledConnection};
use diesel_async::pooled_connection::AsyncDieselConnectionManager;
use diesel_async::{AsyncPgConnection, RunQueryDsl, SimpleAsyncConnection};
use tracing::info;
use url::Url;

#[derive(clap::Args, Debug, Clone)]
pub struct DbArgs {
    // Number of connections to keep in the pool.
    #[arg(long, default_value_t = Self::default().db_connection_pool_size)]
    pub db_connection_pool_size: u32,

    // Time spent waiting for a connection from the pool to become available, in milliseconds.
    #[arg(long, default_value_t = Self::default().db_connection_timeout_ms)]
    pub db_connection_timeout_ms: u64,
}

impl DbArgs {
    pub fn connection_timeout(&self) -> Duration {
        Duration::from_millis(self.db_connection_timeout_ms)
    }
}

impl Default for DbArgs {
    fn default() -> Self {
        Self {
            db_connection_pool_size: 20,
            db_connection_timeout_ms: 60_000,
        }
    }
}

/// Shared connection pool. Instances of [Db] can be cloned to share access to
/// the same pool.
#[derive(Clone)]
pub struct Db {
    pool: Pool<AsyncPgConnection>,
}

// Wrapper struct over the pooled connection type so callers do not depend on bb8 directly.
pub struct Connection<'a>(PooledConnection<'a, AsyncPgConnection>);

impl Db {
    /// Construct a new DB connection pool talking to the database at `database_url`.
    pub async fn new(database_url: Url, config: DbArgs) -> anyhow::Result<Self> {
        let manager = AsyncDieselConnectionManager::new(database_url.as_str());
        let pool = Pool::builder()
            .max_size(config.db_connection_pool_size)
            .connection_timeout(config.connection_timeout())
            .build(manager)
            .await?;
        Ok(Self { pool })
    }

    /// Retrieves a connection from the pool. Can fail with a timeout if a connection cannot be
    /// established before the [DbArgs::connection_timeout] has elapsed.
    pub async fn connect(&self) -> anyhow::Result<Connection<'_>> {
        Ok(Connection(self.pool.get().await?))
    }

    /// Statistics about the connection pool.
    pub fn state(&self) -> bb8::State {
        self.pool.state()
    }

    /// Run all pending migrations, one version at a time.
    ///
    /// Progress is tracked in `schema_migrations (version, dirty)`: a step is
    /// marked dirty before its SQL runs and clean after. A table left dirty by
    /// a crashed run is a hard startup error and requires manual repair.
    pub async fn run_migrations(&self, migrations: &[Migration]) -> anyhow::Result<()> {
        let mut guard = self.connect().await?;
        let conn: &mut AsyncPgConnection = &mut guard;

        conn.batch_execute(
            "CREATE TABLE IF NOT EXISTS schema_migrations (version bigint, dirty boolean)",
        )
        .await
        .context("creating schema_migrations")?;

        let state: Vec<MigrationState> =
            diesel::sql_query("SELECT version, dirty FROM schema_migrations LIMIT 1")
                .load(conn)
                .await
                .context("reading schema_migrations")?;

        let mut version = 0i64;
        if let Some(state) = <[MigrationState]>::first(&state) {
            if state.dirty {
                return Err(DirtyMigration(state.version).into());
            }
            version = state.version;
        }

        let mut sorted: Vec<&Migration> = migrations.iter().collect();
        sorted.sort_by_key(|m| m.version);

        for migration in sorted {
            if migration.version <= version {
                continue;
            }
            if migration.version != version + 1 {
                anyhow::bail!(
                    "migration {} out of order, expected {}",
                    migration.version,
                    version + 1
                );
            }
            info!("Applying migration {} ({})", migration.version, migration.name);
            if version == 0 {
                conn.batch_execute(&format!(
                    "INSERT INTO schema_migrations (version, dirty) VALUES ({}, true)",
                    migration.version
                ))
                .await?;
            } else {
                conn.batch_execute(&format!(
                    "UPDATE schema_migrations SET dirty = true, version = {}",
                    migration.version
                ))
                .await?;
            }
            conn.batch_execute(migration.sql)
                .await
                .with_context(|| format!("running migration {}", migration.version))?;
            conn.batch_execute(&format!(
                "UPDATE schema_migrations SET dirty = false, version = {}",
                migration.version
            ))
            .await?;
            version = migration.version;
        }
        info!("Migrations complete, schema version {}", version);
        Ok(())
    }
}

/// A single embedded migration step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: i64,
    pub name: &'static str,
    pub sql: &'static str,
}

/// The `schema_migrations` table records a half-applied step. Startup must not
/// proceed until an operator repairs the schema by hand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirtyMigration(pub i64);

impl std::fmt::Display for DirtyMigration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "database migration {} is dirty", self.0)
    }
}

impl std::error::Error for DirtyMigration {}

#[derive(QueryableByName)]
struct MigrationState {
    #[diesel(sql_type = diesel::sql_types::BigInt)]
    version: i64,
    #[diesel(sql_type = diesel::sql_types::Bool)]
    dirty: bool,
}

impl<'a> Deref for Connection<'a> {
    type Target = PooledConnection<'a, AsyncPgConnection>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Connection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}
