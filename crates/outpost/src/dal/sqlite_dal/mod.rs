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

//! SQLite Data Access Layer
//!
//! Persists the dispatch registers with Diesel over an r2d2 SQLite pool. Get-or-create
//! operations run inside `BEGIN IMMEDIATE` transactions so concurrent writers serialize
//! on the database lock instead of racing between the lookup and the insert.

use chrono::{DateTime, Utc};
use diesel::connection::Connection;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;

pub mod container_register;
pub mod item_register;
pub mod models;

use container_register::ContainerRegisterDAL;
use item_register::ItemRegisterDAL;

use super::RegisterStore;
use crate::database::schema::item_registers;
use crate::database::Database;
use crate::error::RegisterError;
use crate::models::{
    ContainerRegister, ItemRegister, ModelKey, NewContainerRegister, NewItemRegister, RecordId,
};
use models::uuid_to_blob;

/// The main Data Access Layer struct for SQLite.
#[derive(Clone, Debug)]
pub struct DAL {
    pub database: Database,
}

impl DAL {
    pub fn new(database: Database) -> Self {
        DAL { database }
    }

    /// Opens the register database and brings its schema up to date.
    pub fn open(connection_string: &str, max_size: u32) -> Result<Self, RegisterError> {
        let database = Database::new(connection_string, max_size)?;
        database.run_migrations()?;
        Ok(Self::new(database))
    }

    /// Executes a closure within a deferred transaction.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, RegisterError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, RegisterError>,
    {
        let mut conn = self.database.get_connection()?;
        let conn: &mut SqliteConnection = &mut conn;
        conn.transaction(f)
    }

    /// Executes a closure holding the database write lock from the first statement.
    pub fn immediate_transaction<T, F>(&self, f: F) -> Result<T, RegisterError>
    where
        F: FnOnce(&mut SqliteConnection) -> Result<T, RegisterError>,
    {
        let mut conn = self.database.get_connection()?;
        let conn: &mut SqliteConnection = &mut conn;
        conn.immediate_transaction(f)
    }

    pub fn container_register(&self) -> ContainerRegisterDAL {
        ContainerRegisterDAL { dal: self }
    }

    pub fn item_register(&self) -> ItemRegisterDAL {
        ItemRegisterDAL { dal: self }
    }
}

impl RegisterStore for DAL {
    fn get_or_create_container(
        &self,
        new: NewContainerRegister,
    ) -> Result<(ContainerRegister, bool), RegisterError> {
        self.container_register().get_or_create(new)
    }

    fn get_container(&self, id: Uuid) -> Result<Option<ContainerRegister>, RegisterError> {
        self.container_register().get(id)
    }

    fn find_container(
        &self,
        model: &ModelKey,
        pk: RecordId,
    ) -> Result<Option<ContainerRegister>, RegisterError> {
        self.container_register().find(model, pk)
    }

    fn find_dispatched_container(
        &self,
        model: &ModelKey,
        identifier: &str,
    ) -> Result<Option<ContainerRegister>, RegisterError> {
        self.container_register()
            .find_dispatched_by_identifier(model, identifier)
    }

    fn dispatched_containers(
        &self,
        producer: &str,
        identifiers: Option<&[String]>,
    ) -> Result<Vec<ContainerRegister>, RegisterError> {
        self.container_register()
            .list_dispatched(producer, identifiers)
    }

    fn get_or_create_item(
        &self,
        new: NewItemRegister,
    ) -> Result<(ItemRegister, bool), RegisterError> {
        self.item_register().get_or_create(new)
    }

    fn find_dispatched_item(
        &self,
        model: &ModelKey,
        pk: RecordId,
    ) -> Result<Option<ItemRegister>, RegisterError> {
        self.item_register().find_dispatched(model, pk)
    }

    fn items_for_container(
        &self,
        container_register_id: Uuid,
        dispatched_only: bool,
    ) -> Result<Vec<ItemRegister>, RegisterError> {
        self.item_register()
            .list_for_container(container_register_id, dispatched_only)
    }

    fn items_for_producer(
        &self,
        producer: &str,
        dispatched_only: bool,
    ) -> Result<Vec<ItemRegister>, RegisterError> {
        self.item_register()
            .list_for_producer(producer, dispatched_only)
    }

    fn return_items(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<usize, RegisterError> {
        let at = at.to_rfc3339();
        self.transaction(|conn| item_register::mark_returned(conn, ids, &at))
    }

    fn return_container(&self, id: Uuid, at: DateTime<Utc>) -> Result<usize, RegisterError> {
        let at = at.to_rfc3339();
        self.transaction(|conn| {
            if container_register::load(conn, id)?.is_none() {
                return Err(RegisterError::NotFound(format!("container register {}", id)));
            }
            let flipped = item_register::mark_returned_for_container(conn, id, &at)?;
            container_register::mark_returned(conn, id, &at)?;
            Ok(flipped)
        })
    }

    fn close_container_if_empty(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, RegisterError> {
        let at = at.to_rfc3339();
        self.transaction(|conn| {
            let active: i64 = item_registers::table
                .filter(item_registers::container_register_id.eq(uuid_to_blob(&id)))
                .filter(item_registers::is_dispatched.eq(1))
                .count()
                .get_result(conn)?;
            if active > 0 {
                return Ok(false);
            }
            Ok(container_register::mark_returned(conn, id, &at)? > 0)
        })
    }
}
