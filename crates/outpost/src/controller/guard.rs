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

//! # Ownership Guard
//!
//! Enforces who owns a record while it is checked out:
//!
//! - a container is registered before any of its items
//! - an item is never dispatched twice or under two containers
//! - dispatched records are not edited centrally unless the model whitelists the edit
//!
//! Dispatch state is read from the register store. An item inherits the state of its
//! container of record, found by walking the model's [`LookupPath`].

use std::sync::Arc;

use crate::error::{DispatchError, LookupError};
use crate::hub::DispatchHub;
use crate::models::{
    ContainerRegister, Dispatchable, ItemRegister, LookupPath, ModelKey, NewItemRegister, Record,
};
use crate::store::Store;

use super::session::SessionContainer;

/// Identifier attribute recorded for items whose model has no business identifier.
pub const PK_IDENTIFIER_ATTR: &str = "pk";

pub struct OwnershipGuard<'a> {
    hub: &'a DispatchHub,
    source: Arc<dyn Store>,
}

impl<'a> OwnershipGuard<'a> {
    pub fn new(hub: &'a DispatchHub, source: Arc<dyn Store>) -> Self {
        Self { hub, source }
    }

    pub fn is_container_model(&self, model: &ModelKey) -> bool {
        self.hub
            .models()
            .try_get(model)
            .map_or(false, |m| m.is_container())
    }

    /// Not ignored, and either in a dispatch app label or explicitly included.
    pub fn is_dispatchable(&self, record: &Record) -> bool {
        self.hub
            .models()
            .try_get(&record.model)
            .map_or(false, |model| self.is_dispatchable_model(model.as_ref()))
    }

    pub fn is_dispatchable_model(&self, model: &dyn Dispatchable) -> bool {
        if model.ignore_for_dispatch() {
            return false;
        }
        let app_label = &model.model_key().app_label;
        self.hub
            .config()
            .dispatch_app_labels()
            .iter()
            .any(|label| label == app_label)
            || model.include_for_dispatch()
    }

    /// Business identifier of a container record.
    pub fn container_identifier(&self, record: &Record) -> Result<(String, String), DispatchError> {
        let model = self.hub.models().get(&record.model)?;
        let attr = model.container_identifier_attr().ok_or_else(|| {
            DispatchError::DispatchContainer(format!(
                "Model {} is not a container model",
                record.model
            ))
        })?;
        let identifier = record.get_string(attr).ok_or_else(|| {
            DispatchError::DispatchContainer(format!(
                "Container {} [{}] has no value for '{}'",
                record.model, record.pk, attr
            ))
        })?;
        Ok((attr.to_string(), identifier))
    }

    /// `(identifier attribute, identifier)` recorded on an item register.
    pub fn item_identifier(&self, record: &Record) -> (String, String) {
        let attr = self
            .hub
            .models()
            .try_get(&record.model)
            .and_then(|m| m.container_identifier_attr().map(str::to_string));
        match attr {
            Some(attr) => match record.get_string(&attr) {
                Some(identifier) => (attr, identifier),
                None => (PK_IDENTIFIER_ATTR.to_string(), record.pk.to_string()),
            },
            None => (PK_IDENTIFIER_ATTR.to_string(), record.pk.to_string()),
        }
    }

    /// Active container register for a container record.
    pub fn container_register_for(
        &self,
        record: &Record,
    ) -> Result<Option<ContainerRegister>, DispatchError> {
        if !self.is_container_model(&record.model) {
            return Ok(None);
        }
        let (_, identifier) = self.container_identifier(record)?;
        Ok(self
            .hub
            .registers()
            .find_dispatched_container(&record.model, &identifier)?)
    }

    pub fn is_dispatched_as_container(&self, record: &Record) -> Result<bool, DispatchError> {
        Ok(self.container_register_for(record)?.is_some())
    }

    /// An active item register exists for the record, or, unless
    /// `ignore_container_inheritance`, its container of record is dispatched.
    /// Records of models outside dispatch are never dispatched.
    pub fn is_dispatched_as_item(
        &self,
        record: &Record,
        ignore_container_inheritance: bool,
    ) -> Result<bool, DispatchError> {
        if !self.is_dispatchable(record) {
            return Ok(false);
        }
        if self.active_item_register(record)?.is_some() {
            return Ok(true);
        }
        if ignore_container_inheritance {
            return Ok(false);
        }
        match self.resolve_container(record)? {
            Some(container) => self.is_dispatched_as_container(&container),
            None => Ok(false),
        }
    }

    pub fn active_item_register(
        &self,
        record: &Record,
    ) -> Result<Option<ItemRegister>, DispatchError> {
        Ok(self
            .hub
            .registers()
            .find_dispatched_item(&record.model, record.pk)?)
    }

    /// Walks the model's lookup path to its container of record. `None` when the
    /// model declares no path.
    pub fn resolve_container(&self, record: &Record) -> Result<Option<Record>, DispatchError> {
        let model = self.hub.models().get(&record.model)?;
        match model.container_lookup() {
            Some(path) => Ok(Some(self.follow_path(record, path)?)),
            None => Ok(None),
        }
    }

    fn follow_path(&self, record: &Record, path: &LookupPath) -> Result<Record, DispatchError> {
        let mut current = record.clone();
        for step in &path.steps {
            let model = self.hub.models().get(&current.model)?;
            let target = model
                .schema()
                .foreign_keys()
                .find(|(name, _)| *name == step.as_str())
                .map(|(_, target)| target.clone())
                .ok_or_else(|| LookupError::UnknownRelation {
                    model: current.model.clone(),
                    step: step.clone(),
                })?;
            let pk = current.fk(step).ok_or_else(|| LookupError::UnsetStep {
                container: path.container.clone(),
                model: record.model.clone(),
                step: step.clone(),
            })?;
            current = self
                .source
                .get(&target, pk)
                .map_err(LookupError::from)?
                .ok_or_else(|| LookupError::MissingTarget {
                    model: current.model.clone(),
                    step: step.clone(),
                    pk: pk.to_string(),
                })?;
        }
        if current.model != path.container {
            return Err(LookupError::WrongContainer {
                model: record.model.clone(),
                expected: path.container.clone(),
                found: current.model,
            }
            .into());
        }
        Ok(current)
    }

    /// Producer currently holding the record, directly or through its container.
    pub fn dispatched_to(&self, record: &Record) -> Result<Option<String>, DispatchError> {
        if let Some(register) = self.container_register_for(record)? {
            return Ok(Some(register.producer));
        }
        if let Some(register) = self.active_item_register(record)? {
            return Ok(Some(register.producer));
        }
        if self.is_container_model(&record.model) {
            return Ok(None);
        }
        match self.resolve_container(record)? {
            Some(container) => Ok(self
                .container_register_for(&container)?
                .map(|register| register.producer)),
            None => Ok(None),
        }
    }

    /// Dispatch state as it applies to edits: container models by their container
    /// register, everything else as an item including inheritance.
    pub fn is_dispatched(&self, record: &Record) -> Result<bool, DispatchError> {
        if self.is_container_model(&record.model) {
            self.is_dispatched_as_container(record)
        } else {
            self.is_dispatched_as_item(record, false)
        }
    }

    /// Registers `record` as an item under `register`.
    ///
    /// Without `container` the record must itself be the container being dispatched.
    pub fn register_item(
        &self,
        record: &Record,
        container: Option<&Record>,
        register: &ContainerRegister,
        channel_key: &str,
        session: &mut SessionContainer,
    ) -> Result<ItemRegister, DispatchError> {
        let model = self.hub.models().get(&record.model)?;
        if !self.is_dispatchable_model(model.as_ref()) {
            return Err(DispatchError::NotDispatchable {
                model: record.model.clone(),
                count: 1,
            });
        }

        match container {
            None => {
                if !model.is_container() {
                    return Err(DispatchError::DispatchItem(format!(
                        "Item {} [{}] requires a container",
                        record.model, record.pk
                    )));
                }
                if model.container_lookup().is_some() {
                    return Err(DispatchError::DispatchItem(format!(
                        "Container model {} may not define a container lookup",
                        record.model
                    )));
                }
            }
            Some(container) => {
                if !self.is_dispatched_as_container(container)? {
                    return Err(DispatchError::DispatchContainer(format!(
                        "Container {} [{}] is not dispatched",
                        container.model, container.pk
                    )));
                }
            }
        }

        let reference = record.reference();
        if !session.dispatched.contains(&reference) && self.is_dispatched_as_item(record, true)? {
            let (_, identifier) = self.item_identifier(record);
            return Err(DispatchError::AlreadyDispatched {
                model: record.model.clone(),
                identifier,
            });
        }

        let (item_identifier_attr, item_identifier) = self.item_identifier(record);
        let (item_register, created) =
            self.hub.registers().get_or_create_item(NewItemRegister {
                container_register_id: register.id,
                producer: register.producer.clone(),
                item_model: record.model.clone(),
                item_identifier_attr,
                item_identifier,
                item_pk: record.pk,
                dispatch_host: self.hub.config().dispatch_host().map(str::to_string),
                dispatch_using: Some(channel_key.to_string()),
            })?;
        session.mark_dispatched(reference);
        tracing::debug!(
            model = %record.model,
            pk = %record.pk,
            producer = %register.producer,
            created,
            "Registered item"
        );
        Ok(item_register)
    }

    /// Whether a central edit of `record` is allowed. `update_fields` names the fields
    /// the edit touches, `None` meaning all of them.
    pub fn can_edit(
        &self,
        record: &Record,
        update_fields: Option<&[String]>,
    ) -> Result<bool, DispatchError> {
        let model = match self.hub.models().try_get(&record.model) {
            Some(model) => model,
            None => return Ok(true),
        };
        if !self.is_dispatchable_model(model.as_ref()) {
            return Ok(true);
        }
        if self.source.get(&record.model, record.pk)?.is_none() {
            return Ok(true);
        }
        if model.bypass_for_edit(record, update_fields) {
            return Ok(true);
        }
        Ok(!self.is_dispatched(record)?)
    }

    /// Fails with the typed error when [`can_edit`](Self::can_edit) refuses the edit.
    pub fn ensure_editable(
        &self,
        record: &Record,
        update_fields: Option<&[String]>,
    ) -> Result<(), DispatchError> {
        if self.can_edit(record, update_fields)? {
            return Ok(());
        }
        let producer = self
            .dispatched_to(record)?
            .unwrap_or_else(|| "unknown".to_string());
        if self.is_container_model(&record.model) {
            let (_, identifier) = self.container_identifier(record)?;
            Err(DispatchError::AlreadyDispatchedContainer(format!(
                "Cannot update container {} '{}'. It is currently dispatched to '{}'",
                record.model, identifier, producer
            )))
        } else {
            let (_, identifier) = self.item_identifier(record);
            Err(DispatchError::AlreadyDispatchedItem(format!(
                "Cannot update item {} '{}'. It is currently dispatched to '{}'",
                record.model, identifier, producer
            )))
        }
    }
}
