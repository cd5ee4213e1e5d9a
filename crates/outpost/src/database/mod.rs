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

//! # Register Database
//!
//! SQLite persistence for the dispatch registers: table definitions, embedded
//! migrations and the connection pool.

pub mod connection;
pub mod schema;

use diesel_migrations::{embed_migrations, EmbeddedMigrations};

pub use connection::Database;

pub const SQLITE_MIGRATIONS: EmbeddedMigrations =
    embed_migrations!("src/database/migrations/sqlite");
