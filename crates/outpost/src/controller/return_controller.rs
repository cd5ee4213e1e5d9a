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

//! # Return Controller
//!
//! Checks containers and items back in from a producer. Returning flips register rows
//! to returned and stamps their return time; rows are kept so a later dispatch can
//! reactivate them.
//!
//! Nothing is flipped while the producer has unsynchronized work in either direction.
//! Before a container is flipped its register row is transferred to the producer's
//! store so the device keeps a record of the lease. A failed transfer is logged and
//! tolerated.

use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::controller::registry::ControllerRegistration;
use crate::controller::serializer::{Serializer, TransferOptions};
use crate::controller::session::SessionContainer;
use crate::error::DispatchError;
use crate::hub::DispatchHub;
use crate::models::{BaseModel, ContainerRegister, Record};
use crate::producer::Producer;
use crate::store::Store;

/// Summary of a return.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReturnReport {
    pub message: String,
    /// Identifiers of the containers flipped to returned.
    pub containers: Vec<String>,
    pub items_returned: usize,
}

pub struct ReturnController {
    hub: DispatchHub,
    source_key: String,
    source: Arc<dyn Store>,
    destination: Arc<dyn Store>,
    channel_key: String,
    producer: Producer,
    _registration: ControllerRegistration,
}

impl ReturnController {
    pub fn new(hub: DispatchHub, channel_key: &str) -> Result<Self, DispatchError> {
        if channel_key.is_empty() {
            return Err(DispatchError::MissingParameter("channel_key"));
        }
        let source_key = hub.config().source_key().to_string();
        if source_key == channel_key {
            return Err(DispatchError::SourceIsDestination(source_key));
        }
        let source = hub.stores().using(&source_key)?;
        let destination = hub.stores().using(channel_key)?;
        let producer = hub.producers().resolve_active(channel_key)?;
        let registration = hub.controllers().register(channel_key, "return")?;

        Ok(Self {
            hub,
            source_key,
            source,
            destination,
            channel_key: channel_key.to_string(),
            producer,
            _registration: registration,
        })
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn channel_key(&self) -> &str {
        &self.channel_key
    }

    fn check_pending(&self) -> Result<(), DispatchError> {
        let transactions = self.hub.transactions();
        if transactions.has_outgoing_pending(&self.channel_key)? {
            return Err(DispatchError::PendingTransaction(format!(
                "Producer '{}' has pending outgoing transactions. Run sync first.",
                self.producer.name
            )));
        }
        if transactions.has_incoming_pending(&self.producer.name, &self.source_key, None)? {
            return Err(DispatchError::PendingTransaction(format!(
                "Producer '{}' has pending incoming transactions. Run sync first.",
                self.producer.name
            )));
        }
        Ok(())
    }

    /// Leaves a copy of the register row on the producer.
    fn lock_step(&self, register: &ContainerRegister) {
        let serializer = Serializer::new(
            &self.hub,
            &self.source_key,
            self.source.clone(),
            self.destination.clone(),
        );
        if let Err(e) = serializer.closure_and_transfer(
            &[register.to_record()],
            &TransferOptions::new(&[BaseModel::Register]),
            &mut SessionContainer::new(),
        ) {
            tracing::warn!(
                channel_key = %self.channel_key,
                identifier = %register.container_identifier,
                "Failed to save container register on producer: {}",
                e
            );
        }
    }

    fn return_containers(
        &self,
        containers: &[ContainerRegister],
    ) -> Result<(Vec<String>, usize), DispatchError> {
        let now = Utc::now();
        let mut identifiers = Vec::with_capacity(containers.len());
        let mut items_returned = 0;
        for register in containers {
            self.lock_step(register);
            items_returned += self.hub.registers().return_container(register.id, now)?;
            identifiers.push(register.container_identifier.clone());
        }
        Ok((identifiers, items_returned))
    }

    /// Returns the selected records, or everything the producer holds.
    ///
    /// With a selection, each record's active item register is flipped and every
    /// container left without dispatched items is flipped too. Records the producer
    /// does not hold are ignored.
    pub fn return_dispatched_items(
        &self,
        selection: Option<&[Record]>,
    ) -> Result<ReturnReport, DispatchError> {
        self.check_pending()?;

        let records = match selection {
            Some(records) => records,
            None => {
                let containers = self
                    .hub
                    .registers()
                    .dispatched_containers(&self.producer.name, None)?;
                let (containers, items_returned) = self.return_containers(&containers)?;
                let message = format!(
                    "All containers have been returned from producer '{}'",
                    self.producer.name
                );
                tracing::info!(
                    channel_key = %self.channel_key,
                    containers = containers.len(),
                    items = items_returned,
                    "{}",
                    message
                );
                return Ok(ReturnReport {
                    message,
                    containers,
                    items_returned,
                });
            }
        };

        let mut item_ids = Vec::new();
        let mut touched: Vec<Uuid> = Vec::new();
        for record in records {
            match self
                .hub
                .registers()
                .find_dispatched_item(&record.model, record.pk)?
            {
                Some(item) if item.producer == self.producer.name => {
                    item_ids.push(item.id);
                    if !touched.contains(&item.container_register_id) {
                        touched.push(item.container_register_id);
                    }
                }
                _ => {
                    tracing::debug!(model = %record.model, pk = %record.pk, "Not held by producer");
                }
            }
        }

        let now = Utc::now();
        let items_returned = self.hub.registers().return_items(&item_ids, now)?;

        let mut containers = Vec::new();
        for id in touched {
            let register = match self.hub.registers().get_container(id)? {
                Some(register) if register.is_dispatched => register,
                _ => continue,
            };
            if !self
                .hub
                .registers()
                .items_for_container(id, true)?
                .is_empty()
            {
                continue;
            }
            self.lock_step(&register);
            if self.hub.registers().close_container_if_empty(id, now)? {
                containers.push(register.container_identifier);
            }
        }

        let message = if containers.is_empty() {
            format!(
                "{} item(s) have been returned from producer '{}'",
                items_returned, self.producer.name
            )
        } else {
            format!(
                "Containers {:?}, have been returned from producer '{}'",
                containers, self.producer.name
            )
        };
        tracing::info!(
            channel_key = %self.channel_key,
            items = items_returned,
            "{}",
            message
        );
        Ok(ReturnReport {
            message,
            containers,
            items_returned,
        })
    }

    /// Fully returns the named containers.
    pub fn return_selected_items(
        &self,
        container_identifiers: &[String],
    ) -> Result<ReturnReport, DispatchError> {
        if container_identifiers.is_empty() {
            return Err(DispatchError::MissingParameter("container_identifiers"));
        }
        self.check_pending()?;

        let containers = self
            .hub
            .registers()
            .dispatched_containers(&self.producer.name, Some(container_identifiers))?;
        let missing: Vec<&String> = container_identifiers
            .iter()
            .filter(|id| !containers.iter().any(|c| &c.container_identifier == *id))
            .collect();
        if !missing.is_empty() {
            return Err(DispatchError::AlreadyReturned(format!(
                "Containers {:?} are not dispatched to producer '{}'",
                missing, self.producer.name
            )));
        }

        let (containers, items_returned) = self.return_containers(&containers)?;
        let message = format!(
            "Containers {:?}, have been returned from producer '{}'",
            containers, self.producer.name
        );
        tracing::info!(
            channel_key = %self.channel_key,
            items = items_returned,
            "{}",
            message
        );
        Ok(ReturnReport {
            message,
            containers,
            items_returned,
        })
    }
}

impl std::fmt::Debug for ReturnController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReturnController")
            .field("channel_key", &self.channel_key)
            .field("producer", &self.producer.name)
            .finish()
    }
}
