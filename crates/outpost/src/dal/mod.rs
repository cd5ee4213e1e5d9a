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

//! # Register Store
//!
//! Durable record of which containers and items are checked out, to which producer,
//! since when and when they came back. Two backends implement [`RegisterStore`]:
//!
//! - [`MemoryRegisterStore`] keeps rows in process, under one mutex
//! - [`SqliteDAL`] persists rows with Diesel over an r2d2 SQLite pool
//!
//! Both make the get-or-create operations atomic. Losing a race for an item shows up as
//! [`RegisterError::ItemDispatchedElsewhere`], for a container as
//! [`RegisterError::ContainerDispatchedElsewhere`].
//!
//! Rows are never deleted. A return flips `is_dispatched` and stamps
//! `return_datetime`; a later dispatch of the same container or item reactivates its row.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite_dal;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::RegisterError;
use crate::models::{
    ContainerRegister, ItemRegister, ModelKey, NewContainerRegister, NewItemRegister, RecordId,
};

pub use memory::MemoryRegisterStore;
#[cfg(feature = "sqlite")]
pub use sqlite_dal::DAL as SqliteDAL;

pub trait RegisterStore: Send + Sync {
    /// Returns the register row of a container, creating or reactivating it.
    ///
    /// Rows are keyed by (model, container pk). The boolean is `true` only when a new
    /// row was inserted.
    fn get_or_create_container(
        &self,
        new: NewContainerRegister,
    ) -> Result<(ContainerRegister, bool), RegisterError>;

    fn get_container(&self, id: Uuid) -> Result<Option<ContainerRegister>, RegisterError>;

    /// Register row of a container regardless of its dispatch state.
    fn find_container(
        &self,
        model: &ModelKey,
        pk: RecordId,
    ) -> Result<Option<ContainerRegister>, RegisterError>;

    /// Active register row for a container identifier.
    fn find_dispatched_container(
        &self,
        model: &ModelKey,
        identifier: &str,
    ) -> Result<Option<ContainerRegister>, RegisterError>;

    /// Active containers of a producer, optionally narrowed to some identifiers.
    fn dispatched_containers(
        &self,
        producer: &str,
        identifiers: Option<&[String]>,
    ) -> Result<Vec<ContainerRegister>, RegisterError>;

    /// Returns the register row of an item, creating or reactivating it.
    ///
    /// Rows are keyed by (container register, item pk, item identifier). Fails with
    /// [`RegisterError::ItemDispatchedElsewhere`] when another active row holds the
    /// item identifier.
    fn get_or_create_item(
        &self,
        new: NewItemRegister,
    ) -> Result<(ItemRegister, bool), RegisterError>;

    /// Active register row for an item.
    fn find_dispatched_item(
        &self,
        model: &ModelKey,
        pk: RecordId,
    ) -> Result<Option<ItemRegister>, RegisterError>;

    fn items_for_container(
        &self,
        container_register_id: Uuid,
        dispatched_only: bool,
    ) -> Result<Vec<ItemRegister>, RegisterError>;

    fn items_for_producer(
        &self,
        producer: &str,
        dispatched_only: bool,
    ) -> Result<Vec<ItemRegister>, RegisterError>;

    /// Flips the given item rows to returned. Rows already returned are left alone.
    fn return_items(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<usize, RegisterError>;

    /// Flips a container and all of its active items to returned in one unit of work.
    /// Returns the number of item rows flipped.
    fn return_container(&self, id: Uuid, at: DateTime<Utc>) -> Result<usize, RegisterError>;

    /// Flips a container to returned when none of its items is still dispatched.
    fn close_container_if_empty(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, RegisterError>;
}
