/*
 *  Copyright 2025 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! SQLite connection pool for the register database.
//!
//! ```rust,no_run
//! use outpost::database::Database;
//!
//! let db = Database::new("sqlite:///var/lib/outpost/registers.db", 4).unwrap();
//! db.run_migrations().unwrap();
//! ```

use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use tracing::info;

use crate::error::RegisterError;

pub type SqlitePool = Pool<ConnectionManager<SqliteConnection>>;
pub type SqlitePooledConnection = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas. Foreign keys are off by default in SQLite and the busy
/// timeout does not survive across connections.
#[derive(Debug, Clone, Copy)]
struct ConnectionPragmas {
    busy_timeout_ms: u32,
}

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> Result<(), diesel::r2d2::Error> {
        diesel::sql_query(format!("PRAGMA busy_timeout={};", self.busy_timeout_ms))
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        diesel::sql_query("PRAGMA foreign_keys=ON;")
            .execute(conn)
            .map_err(diesel::r2d2::Error::QueryError)?;
        Ok(())
    }
}

/// Pooled handle to the register database. Clones share the pool.
#[derive(Clone, Debug)]
pub struct Database {
    pool: SqlitePool,
    path: String,
}

impl Database {
    /// Opens a pool over a file path, a `sqlite://` URL or `:memory:`.
    ///
    /// An in-memory database lives inside one connection, so its pool is capped at one.
    pub fn new(connection_string: &str, max_size: u32) -> Result<Self, RegisterError> {
        let path = Self::sqlite_path(connection_string);
        let max_size = if path == ":memory:" { 1 } else { max_size.max(1) };

        let manager = ConnectionManager::<SqliteConnection>::new(path.clone());
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_customizer(Box::new(ConnectionPragmas {
                busy_timeout_ms: 30_000,
            }))
            .build(manager)?;

        info!(path = %path, max_size, "Opened register database");
        Ok(Self { pool, path })
    }

    fn sqlite_path(connection_string: &str) -> String {
        connection_string
            .strip_prefix("sqlite://")
            .unwrap_or(connection_string)
            .to_string()
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn get_connection(&self) -> Result<SqlitePooledConnection, RegisterError> {
        Ok(self.pool.get()?)
    }

    /// Switches the database to WAL mode and runs pending register migrations.
    pub fn run_migrations(&self) -> Result<(), RegisterError> {
        use diesel_migrations::MigrationHarness;

        let mut conn = self.get_connection()?;
        if self.path != ":memory:" {
            diesel::sql_query("PRAGMA journal_mode=WAL;").execute(&mut conn)?;
        }
        let applied = conn
            .run_pending_migrations(super::SQLITE_MIGRATIONS)
            .map_err(|e| RegisterError::Migration(e.to_string()))?;
        info!(count = applied.len(), "Register migrations applied");
        Ok(())
    }
}
