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

//! In-process [`RegisterStore`].

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use uuid::Uuid;

use super::RegisterStore;
use crate::error::RegisterError;
use crate::models::register::check_lease_invariant;
use crate::models::{
    ContainerRegister, ItemRegister, ModelKey, NewContainerRegister, NewItemRegister, RecordId,
};

#[derive(Debug, Default)]
struct Registers {
    containers: Vec<ContainerRegister>,
    items: Vec<ItemRegister>,
}

/// Register rows held in memory. Every operation runs under a single mutex.
#[derive(Debug, Default)]
pub struct MemoryRegisterStore {
    inner: Mutex<Registers>,
}

impl MemoryRegisterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every container row, in insertion order.
    pub fn containers(&self) -> Vec<ContainerRegister> {
        self.inner.lock().containers.clone()
    }

    /// Every item row, in insertion order.
    pub fn items(&self) -> Vec<ItemRegister> {
        self.inner.lock().items.clone()
    }
}

fn flip_item(item: &mut ItemRegister, at: DateTime<Utc>) -> Result<bool, RegisterError> {
    if !item.is_dispatched {
        return Ok(false);
    }
    check_lease_invariant(false, Some(at))?;
    item.is_dispatched = false;
    item.return_datetime = Some(at);
    item.updated_at = at;
    Ok(true)
}

fn flip_container(container: &mut ContainerRegister, at: DateTime<Utc>) -> bool {
    if !container.is_dispatched {
        return false;
    }
    container.is_dispatched = false;
    container.return_datetime = Some(at);
    container.updated_at = at;
    true
}

impl RegisterStore for MemoryRegisterStore {
    fn get_or_create_container(
        &self,
        new: NewContainerRegister,
    ) -> Result<(ContainerRegister, bool), RegisterError> {
        let mut inner = self.inner.lock();
        let now = Utc::now();

        if let Some(row) = inner
            .containers
            .iter_mut()
            .find(|c| c.container_model == new.container_model && c.container_pk == new.container_pk)
        {
            if row.is_dispatched {
                if row.producer != new.producer {
                    return Err(RegisterError::ContainerDispatchedElsewhere {
                        container_identifier: row.container_identifier.clone(),
                        producer: row.producer.clone(),
                    });
                }
                return Ok((row.clone(), false));
            }
            row.producer = new.producer;
            row.is_dispatched = true;
            row.dispatch_datetime = Some(now);
            row.return_datetime = None;
            row.container_identifier_attr = new.container_identifier_attr;
            row.container_identifier = new.container_identifier;
            row.dispatched_using = new.dispatched_using;
            row.updated_at = now;
            return Ok((row.clone(), false));
        }

        let row = ContainerRegister {
            id: Uuid::new_v4(),
            producer: new.producer,
            is_dispatched: true,
            dispatch_datetime: Some(now),
            return_datetime: None,
            container_model: new.container_model,
            container_identifier_attr: new.container_identifier_attr,
            container_identifier: new.container_identifier,
            container_pk: new.container_pk,
            dispatched_using: new.dispatched_using,
            created_at: now,
            updated_at: now,
        };
        inner.containers.push(row.clone());
        Ok((row, true))
    }

    fn get_container(&self, id: Uuid) -> Result<Option<ContainerRegister>, RegisterError> {
        Ok(self
            .inner
            .lock()
            .containers
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    fn find_container(
        &self,
        model: &ModelKey,
        pk: RecordId,
    ) -> Result<Option<ContainerRegister>, RegisterError> {
        Ok(self
            .inner
            .lock()
            .containers
            .iter()
            .find(|c| &c.container_model == model && c.container_pk == pk)
            .cloned())
    }

    fn find_dispatched_container(
        &self,
        model: &ModelKey,
        identifier: &str,
    ) -> Result<Option<ContainerRegister>, RegisterError> {
        Ok(self
            .inner
            .lock()
            .containers
            .iter()
            .find(|c| {
                c.is_dispatched
                    && &c.container_model == model
                    && c.container_identifier == identifier
            })
            .cloned())
    }

    fn dispatched_containers(
        &self,
        producer: &str,
        identifiers: Option<&[String]>,
    ) -> Result<Vec<ContainerRegister>, RegisterError> {
        Ok(self
            .inner
            .lock()
            .containers
            .iter()
            .filter(|c| c.is_dispatched && c.producer == producer)
            .filter(|c| identifiers.map_or(true, |ids| ids.contains(&c.container_identifier)))
            .cloned()
            .collect())
    }

    fn get_or_create_item(
        &self,
        new: NewItemRegister,
    ) -> Result<(ItemRegister, bool), RegisterError> {
        let mut inner = self.inner.lock();
        let now = Utc::now();

        if !inner.containers.iter().any(|c| c.id == new.container_register_id) {
            return Err(RegisterError::NotFound(format!(
                "container register {}",
                new.container_register_id
            )));
        }

        let same_row = |i: &ItemRegister| {
            i.container_register_id == new.container_register_id
                && i.item_pk == new.item_pk
                && i.item_identifier == new.item_identifier
        };

        if let Some(other) = inner.items.iter().find(|i| {
            i.is_dispatched
                && i.item_model == new.item_model
                && i.item_identifier == new.item_identifier
                && !same_row(i)
        }) {
            return Err(RegisterError::ItemDispatchedElsewhere {
                item_identifier: new.item_identifier,
                producer: other.producer.clone(),
            });
        }

        if let Some(row) = inner.items.iter_mut().find(|i| same_row(i)) {
            if !row.is_dispatched {
                row.producer = new.producer;
                row.is_dispatched = true;
                row.dispatch_datetime = Some(now);
                row.return_datetime = None;
                row.dispatch_host = new.dispatch_host;
                row.dispatch_using = new.dispatch_using;
                row.updated_at = now;
            }
            return Ok((row.clone(), false));
        }

        let row = ItemRegister {
            id: Uuid::new_v4(),
            container_register_id: new.container_register_id,
            producer: new.producer,
            is_dispatched: true,
            dispatch_datetime: Some(now),
            return_datetime: None,
            item_model: new.item_model,
            item_identifier_attr: new.item_identifier_attr,
            item_identifier: new.item_identifier,
            item_pk: new.item_pk,
            dispatch_host: new.dispatch_host,
            dispatch_using: new.dispatch_using,
            created_at: now,
            updated_at: now,
        };
        inner.items.push(row.clone());
        Ok((row, true))
    }

    fn find_dispatched_item(
        &self,
        model: &ModelKey,
        pk: RecordId,
    ) -> Result<Option<ItemRegister>, RegisterError> {
        Ok(self
            .inner
            .lock()
            .items
            .iter()
            .find(|i| i.is_dispatched && &i.item_model == model && i.item_pk == pk)
            .cloned())
    }

    fn items_for_container(
        &self,
        container_register_id: Uuid,
        dispatched_only: bool,
    ) -> Result<Vec<ItemRegister>, RegisterError> {
        Ok(self
            .inner
            .lock()
            .items
            .iter()
            .filter(|i| i.container_register_id == container_register_id)
            .filter(|i| !dispatched_only || i.is_dispatched)
            .cloned()
            .collect())
    }

    fn items_for_producer(
        &self,
        producer: &str,
        dispatched_only: bool,
    ) -> Result<Vec<ItemRegister>, RegisterError> {
        Ok(self
            .inner
            .lock()
            .items
            .iter()
            .filter(|i| i.producer == producer)
            .filter(|i| !dispatched_only || i.is_dispatched)
            .cloned()
            .collect())
    }

    fn return_items(&self, ids: &[Uuid], at: DateTime<Utc>) -> Result<usize, RegisterError> {
        let mut inner = self.inner.lock();
        let mut flipped = 0;
        for item in inner.items.iter_mut().filter(|i| ids.contains(&i.id)) {
            if flip_item(item, at)? {
                flipped += 1;
            }
        }
        Ok(flipped)
    }

    fn return_container(&self, id: Uuid, at: DateTime<Utc>) -> Result<usize, RegisterError> {
        let mut inner = self.inner.lock();
        if !inner.containers.iter().any(|c| c.id == id) {
            return Err(RegisterError::NotFound(format!("container register {}", id)));
        }
        let mut flipped = 0;
        for item in inner
            .items
            .iter_mut()
            .filter(|i| i.container_register_id == id)
        {
            if flip_item(item, at)? {
                flipped += 1;
            }
        }
        if let Some(container) = inner.containers.iter_mut().find(|c| c.id == id) {
            flip_container(container, at);
        }
        Ok(flipped)
    }

    fn close_container_if_empty(
        &self,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<bool, RegisterError> {
        let mut inner = self.inner.lock();
        if inner
            .items
            .iter()
            .any(|i| i.container_register_id == id && i.is_dispatched)
        {
            return Ok(false);
        }
        Ok(inner
            .containers
            .iter_mut()
            .find(|c| c.id == id)
            .map_or(false, |c| flip_container(c, at)))
    }
}
