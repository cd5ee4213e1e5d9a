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

//! # Dispatch Controller
//!
//! Checks one container out to the producer behind a channel key, then the items that
//! belong to it. Construction validates every parameter and claims the channel in the
//! controller registry; [`DispatchController::dispatch`] registers and transfers the
//! container and runs the [`DispatchHooks`] that select item sets.
//!
//! Every item set goes through the ownership guard before anything is serialized, so a
//! rejected set leaves no rows behind on either side.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::controller::guard::OwnershipGuard;
use crate::controller::registry::ControllerRegistration;
use crate::controller::serializer::{dedup_records, Serializer, TransferOptions, TransferReport};
use crate::controller::session::SessionContainer;
use crate::controller::ControllerState;
use crate::error::{DispatchError, RegisterError};
use crate::hub::DispatchHub;
use crate::models::{
    BaseModel, ContainerRegister, ItemRegister, ModelKey, NewContainerRegister, Record,
    RecordRef,
};
use crate::producer::Producer;
use crate::store::{Query, Store};

/// Callbacks run by [`DispatchController::dispatch`].
///
/// `dispatch_prep` is where item sets are chosen and passed to
/// [`DispatchController::dispatch_user_items_as_json`].
pub trait DispatchHooks: Send + Sync {
    fn pre_dispatch(&self, _controller: &mut DispatchController) -> Result<(), DispatchError> {
        Ok(())
    }

    fn dispatch_prep(&self, _controller: &mut DispatchController) -> Result<(), DispatchError> {
        Ok(())
    }

    fn post_dispatch(&self, _controller: &mut DispatchController) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Dispatches the records of each listed model that belong to the container.
#[derive(Debug, Clone, Default)]
pub struct ContainerItemsHooks {
    models: Vec<ModelKey>,
}

impl ContainerItemsHooks {
    pub fn new<I>(models: I) -> Self
    where
        I: IntoIterator<Item = ModelKey>,
    {
        Self {
            models: models.into_iter().collect(),
        }
    }
}

impl DispatchHooks for ContainerItemsHooks {
    fn dispatch_prep(&self, controller: &mut DispatchController) -> Result<(), DispatchError> {
        for model in &self.models {
            controller.dispatch_model_as_json(model, None)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct ContainerSpec {
    model: ModelKey,
    identifier_attr: String,
    identifier: String,
}

/// Parameters of a dispatch controller.
#[derive(Clone, Default)]
pub struct DispatchParams {
    destination: String,
    source: Option<String>,
    container: Option<ContainerSpec>,
    retry: bool,
    debug: bool,
    skip_container: bool,
    hooks: Option<Arc<dyn DispatchHooks>>,
}

impl DispatchParams {
    /// `destination` is the channel key of the producer's store.
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Self::default()
        }
    }

    /// Source store key. Defaults to the configured source.
    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn container(
        mut self,
        model: ModelKey,
        identifier_attr: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        self.container = Some(ContainerSpec {
            model,
            identifier_attr: identifier_attr.into(),
            identifier: identifier.into(),
        });
        self
    }

    /// Resume a dispatch whose container is already checked out.
    pub fn retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    /// Report an already dispatched container as an error instead of an outcome.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Register the container without serializing it.
    pub fn skip_container(mut self, skip: bool) -> Self {
        self.skip_container = skip;
        self
    }

    pub fn hooks(mut self, hooks: Arc<dyn DispatchHooks>) -> Self {
        self.hooks = Some(hooks);
        self
    }
}

impl fmt::Debug for DispatchParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchParams")
            .field("destination", &self.destination)
            .field("source", &self.source)
            .field("container", &self.container)
            .field("retry", &self.retry)
            .field("debug", &self.debug)
            .field("skip_container", &self.skip_container)
            .field("hooks", &self.hooks.is_some())
            .finish()
    }
}

/// Options for one item set.
#[derive(Debug, Clone, Default)]
pub struct ItemDispatchOptions {
    /// Foreign-key fields left out of the closure.
    pub skip_foreign_keys: Vec<String>,
    /// Base models accepted in addition to dispatch models.
    pub additional_base_models: Vec<BaseModel>,
}

impl ItemDispatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn skip_foreign_keys<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.skip_foreign_keys = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn additional_base_models(mut self, base_models: &[BaseModel]) -> Self {
        self.additional_base_models = base_models.to_vec();
        self
    }
}

/// Result of [`DispatchController::dispatch`] when no error occurred.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum DispatchOutcome {
    Dispatched(String),
    /// The container is held by a producer; nothing was written.
    AlreadyDispatched(String),
    /// Pending outgoing transactions must be synchronized first; nothing was written.
    Blocked(String),
}

impl DispatchOutcome {
    pub fn message(&self) -> &str {
        match self {
            DispatchOutcome::Dispatched(msg)
            | DispatchOutcome::AlreadyDispatched(msg)
            | DispatchOutcome::Blocked(msg) => msg,
        }
    }

    pub fn is_dispatched(&self) -> bool {
        matches!(self, DispatchOutcome::Dispatched(_))
    }
}

impl fmt::Display for DispatchOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

pub struct DispatchController {
    hub: DispatchHub,
    source_key: String,
    source: Arc<dyn Store>,
    destination: Arc<dyn Store>,
    channel_key: String,
    producer: Producer,
    container_model: ModelKey,
    container_identifier_attr: String,
    container_identifier: String,
    container: Record,
    register: Option<ContainerRegister>,
    state: ControllerState,
    session: SessionContainer,
    retry: bool,
    debug: bool,
    skip_container: bool,
    hooks: Option<Arc<dyn DispatchHooks>>,
    registration: Option<ControllerRegistration>,
}

impl DispatchController {
    /// Validates `params` and claims the destination channel.
    ///
    /// Every failure here is a configuration error, except a retry on a container that
    /// is not dispatched, which fails with [`DispatchError::DispatchContainer`].
    pub fn new(hub: DispatchHub, params: DispatchParams) -> Result<Self, DispatchError> {
        if params.destination.is_empty() {
            return Err(DispatchError::MissingParameter("destination"));
        }
        let spec = params
            .container
            .clone()
            .ok_or(DispatchError::MissingParameter("container"))?;
        if spec.identifier_attr.is_empty() {
            return Err(DispatchError::MissingParameter("identifier_attr"));
        }
        if spec.identifier.is_empty() {
            return Err(DispatchError::MissingParameter("identifier"));
        }

        let source_key = params
            .source
            .clone()
            .unwrap_or_else(|| hub.config().source_key().to_string());
        if source_key == params.destination {
            return Err(DispatchError::SourceIsDestination(source_key));
        }
        let source = hub.stores().using(&source_key)?;
        let destination = hub.stores().using(&params.destination)?;

        let model = hub.models().get(&spec.model)?;
        if !model.is_container() {
            return Err(DispatchError::ImproperlyConfigured(format!(
                "Model {} is not a container model",
                spec.model
            )));
        }
        if !OwnershipGuard::new(&hub, source.clone()).is_dispatchable_model(model.as_ref()) {
            return Err(DispatchError::NotDispatchable {
                model: spec.model.clone(),
                count: 1,
            });
        }

        let container = source
            .filter(
                &spec.model,
                &Query::new().eq(&spec.identifier_attr, spec.identifier.clone()),
            )?
            .into_iter()
            .next()
            .ok_or_else(|| {
                DispatchError::ImproperlyConfigured(format!(
                    "Container {} with {}='{}' does not exist",
                    spec.model, spec.identifier_attr, spec.identifier
                ))
            })?;

        let producer = hub.producers().resolve_active(&params.destination)?;
        let registration = hub.controllers().register(&params.destination, "dispatch")?;

        let mut controller = Self {
            source_key,
            source,
            destination,
            channel_key: params.destination,
            producer,
            container_model: spec.model,
            container_identifier_attr: spec.identifier_attr,
            container_identifier: spec.identifier,
            container,
            register: None,
            state: ControllerState::Uninitialized,
            session: SessionContainer::new(),
            retry: params.retry,
            debug: params.debug,
            skip_container: params.skip_container,
            hooks: params.hooks,
            registration: Some(registration),
            hub,
        };

        if controller.retry {
            controller.preload_dispatched()?;
            controller.state = ControllerState::ContainerDispatched;
        } else {
            controller.state = ControllerState::Ready;
        }

        tracing::debug!(
            channel_key = %controller.channel_key,
            producer = %controller.producer.name,
            model = %controller.container_model,
            identifier = %controller.container_identifier,
            retry = controller.retry,
            "Dispatch controller ready"
        );
        Ok(controller)
    }

    /// Loads the container and its dispatched items into the session.
    fn preload_dispatched(&mut self) -> Result<(), DispatchError> {
        let register = self
            .hub
            .registers()
            .find_container(&self.container_model, self.container.pk)?
            .filter(ContainerRegister::is_ready)
            .ok_or_else(|| {
                DispatchError::DispatchContainer(format!(
                    "Cannot retry. Container {} '{}' is not dispatched",
                    self.container_model, self.container_identifier
                ))
            })?;
        if register.producer != self.producer.name {
            return Err(DispatchError::DispatchContainer(format!(
                "Cannot retry. Container {} '{}' is dispatched to '{}', not '{}'",
                self.container_model,
                self.container_identifier,
                register.producer,
                self.producer.name
            )));
        }

        self.session.preload(self.container.reference());
        let items = self.hub.registers().items_for_container(register.id, true)?;
        for item in &items {
            self.session.preload(RecordRef {
                model: item.item_model.clone(),
                pk: item.item_pk,
            });
        }
        tracing::debug!(
            channel_key = %self.channel_key,
            items = items.len(),
            "Preloaded dispatched records for retry"
        );
        self.register = Some(register);
        Ok(())
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn session(&self) -> &SessionContainer {
        &self.session
    }

    pub fn producer(&self) -> &Producer {
        &self.producer
    }

    pub fn channel_key(&self) -> &str {
        &self.channel_key
    }

    pub fn container(&self) -> &Record {
        &self.container
    }

    pub fn container_register(&self) -> Option<&ContainerRegister> {
        self.register.as_ref()
    }

    /// Whether this controller still holds the channel in the controller registry.
    pub fn is_registered(&self) -> bool {
        self.registration.is_some()
    }

    /// Checks out the container and runs the hooks.
    pub fn dispatch(&mut self) -> Result<DispatchOutcome, DispatchError> {
        if self
            .hub
            .transactions()
            .has_outgoing_pending(&self.channel_key)?
        {
            let message = format!(
                "Producer '{}' has pending outgoing transactions. Run sync first.",
                self.producer.name
            );
            tracing::warn!(channel_key = %self.channel_key, "{}", message);
            return Ok(DispatchOutcome::Blocked(message));
        }

        let held_by = {
            let guard = OwnershipGuard::new(&self.hub, self.source.clone());
            if !self.session.is_dispatched(&self.container)
                && guard.is_dispatched_as_item(&self.container, false)?
            {
                Some(
                    guard
                        .dispatched_to(&self.container)?
                        .unwrap_or_else(|| "unknown".to_string()),
                )
            } else {
                None
            }
        };
        if let Some(producer) = held_by {
            let message = format!(
                "{} '{}' is already dispatched to producer '{}'.",
                self.container_model, self.container_identifier, producer
            );
            if self.debug {
                return Err(DispatchError::AlreadyDispatchedContainer(message));
            }
            tracing::info!(channel_key = %self.channel_key, "{}", message);
            self.registration = None;
            return Ok(DispatchOutcome::AlreadyDispatched(message));
        }

        let hooks = self.hooks.clone();
        if let Some(hooks) = &hooks {
            hooks.pre_dispatch(self)?;
        }

        let (register, created) =
            self.hub
                .registers()
                .get_or_create_container(NewContainerRegister {
                    producer: self.producer.name.clone(),
                    container_model: self.container_model.clone(),
                    container_identifier_attr: self.container_identifier_attr.clone(),
                    container_identifier: self.container_identifier.clone(),
                    container_pk: self.container.pk,
                    dispatched_using: Some(self.channel_key.clone()),
                })?;
        tracing::debug!(
            producer = %register.producer,
            model = %self.container_model,
            identifier = %self.container_identifier,
            created,
            "Container register active"
        );
        let register_id = register.id;
        self.register = Some(register);
        self.state = ControllerState::ContainerDispatched;

        if let Err(e) = self.dispatch_user_container_as_json(None) {
            self.release_register(register_id, &e);
            return Err(e);
        }

        if let Some(hooks) = &hooks {
            self.state = ControllerState::ItemsDispatching;
            hooks.dispatch_prep(self)?;
            hooks.post_dispatch(self)?;
        }

        self.state = ControllerState::Complete;
        let message = format!(
            "Successfully dispatched {} {}",
            self.container_model, self.container_identifier
        );
        tracing::info!(
            channel_key = %self.channel_key,
            producer = %self.producer.name,
            serialized = self.session.serialized.len(),
            dispatched = self.session.dispatched.len(),
            "{}",
            message
        );
        if !self.hub.config().retain_session_on_complete() {
            self.session.reset();
        }
        Ok(DispatchOutcome::Dispatched(message))
    }

    /// Flips a register back to returned after the container failed to transfer.
    fn release_register(&mut self, register_id: Uuid, cause: &DispatchError) {
        tracing::warn!(
            channel_key = %self.channel_key,
            model = %self.container_model,
            identifier = %self.container_identifier,
            "Container transfer failed, releasing register: {}",
            cause
        );
        if let Err(e) = self
            .hub
            .registers()
            .return_container(register_id, Utc::now())
        {
            tracing::error!(
                channel_key = %self.channel_key,
                register = %register_id,
                "Failed to release container register: {}",
                e
            );
        }
        self.register = None;
        self.state = ControllerState::Ready;
    }

    /// Active container register, re-read from the register store.
    fn ready_register(&self) -> Result<ContainerRegister, DispatchError> {
        let register = self.register.as_ref().ok_or_else(|| {
            DispatchError::ControllerNotReady(format!(
                "Controller is not ready. Container {} '{}' has not been dispatched",
                self.container_model, self.container_identifier
            ))
        })?;
        let current = self
            .hub
            .registers()
            .get_container(register.id)?
            .ok_or_else(|| RegisterError::NotFound(format!("container register {}", register.id)))?;
        if !current.is_ready() {
            return Err(DispatchError::AlreadyReturnedController);
        }
        Ok(current)
    }

    fn check_container(&self, container: &Record) -> Result<(), DispatchError> {
        if container.model != self.container_model || container.pk != self.container.pk {
            return Err(DispatchError::DispatchContainer(format!(
                "Container {} [{}] does not match the dispatched container {} '{}'",
                container.model, container.pk, self.container_model, self.container_identifier
            )));
        }
        Ok(())
    }

    /// Transfers and registers the container. `container` defaults to the controller's.
    pub fn dispatch_user_container_as_json(
        &mut self,
        container: Option<&Record>,
    ) -> Result<TransferReport, DispatchError> {
        let container = container.cloned().unwrap_or_else(|| self.container.clone());
        let register = self.ready_register()?;
        self.check_container(&container)?;

        let mut report = TransferReport::default();
        if !self.skip_container {
            let producer = self.producer.name.clone();
            let serializer = Serializer::new(
                &self.hub,
                &self.source_key,
                self.source.clone(),
                self.destination.clone(),
            );
            report = serializer.closure_and_transfer(
                std::slice::from_ref(&container),
                &TransferOptions::new(&[BaseModel::Dispatch]).producer(&producer),
                &mut self.session,
            )?;
        }

        let guard = OwnershipGuard::new(&self.hub, self.source.clone());
        guard.register_item(
            &container,
            None,
            &register,
            &self.channel_key,
            &mut self.session,
        )?;
        Ok(report)
    }

    /// Transfers and registers a set of items of one model under the container.
    ///
    /// All checks run before anything is written. Items this controller already
    /// dispatched, including those preloaded in retry mode, are skipped.
    pub fn dispatch_user_items_as_json(
        &mut self,
        items: &[Record],
        container: Option<&Record>,
        options: &ItemDispatchOptions,
    ) -> Result<TransferReport, DispatchError> {
        let first = items.first().ok_or_else(|| {
            DispatchError::DispatchItem("Cannot dispatch an empty set of items".to_string())
        })?;
        let register = self.ready_register()?;
        if self
            .hub
            .registers()
            .find_dispatched_item(&self.container.model, self.container.pk)?
            .is_none()
        {
            return Err(DispatchError::ControllerNotReady(format!(
                "Controller is not ready. Container {} '{}' has not been dispatched as an item",
                self.container_model, self.container_identifier
            )));
        }
        let container = container.cloned().unwrap_or_else(|| self.container.clone());

        let container_model = self.hub.models().get(&container.model)?;
        if container_model.schema().base == BaseModel::Register {
            return Err(DispatchError::DispatchContainer(format!(
                "Expected a container instance. Got register model {}",
                container.model
            )));
        }
        self.check_container(&container)?;

        if let Some(other) = items.iter().find(|item| item.model != first.model) {
            return Err(DispatchError::DispatchItem(format!(
                "Items must be of the same model. Got {} and {}",
                first.model, other.model
            )));
        }

        let mut allowed = vec![BaseModel::Dispatch];
        allowed.extend(options.additional_base_models.iter().copied());
        let transfer_options = TransferOptions::new(&allowed);
        let model = self.hub.models().get(&first.model)?;
        if !transfer_options
            .allowed_base_models
            .contains(&model.schema().base)
        {
            return Err(DispatchError::BaseModel {
                model: first.model.clone(),
                allowed: transfer_options
                    .allowed_base_models
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            });
        }
        if first.model == container.model {
            return Err(DispatchError::DispatchItem(format!(
                "Item model may not be the container model {}",
                container.model
            )));
        }

        let guard = OwnershipGuard::new(&self.hub, self.source.clone());
        let not_dispatchable = items.iter().filter(|i| !guard.is_dispatchable(i)).count();
        if not_dispatchable > 0 {
            return Err(DispatchError::NotDispatchable {
                model: first.model.clone(),
                count: not_dispatchable,
            });
        }

        let mut pending = Vec::new();
        for item in dedup_records(items) {
            if let Some(owner) = guard.resolve_container(&item)? {
                if owner.pk != container.pk {
                    return Err(DispatchError::DispatchContainer(format!(
                        "Item {} [{}] belongs to container {} [{}], not {} '{}'",
                        item.model,
                        item.pk,
                        owner.model,
                        owner.pk,
                        self.container_model,
                        self.container_identifier
                    )));
                }
            }
            if self.session.is_dispatched(&item) {
                tracing::debug!(model = %item.model, pk = %item.pk, "Skipping dispatched item");
                continue;
            }
            if let Some(held) = guard.active_item_register(&item)? {
                return Err(DispatchError::AlreadyDispatchedItem(format!(
                    "{} '{}' is already dispatched to producer '{}'",
                    item.model, held.item_identifier, held.producer
                )));
            }
            pending.push(item);
        }
        if pending.is_empty() {
            return Ok(TransferReport::default());
        }

        let producer = self.producer.name.clone();
        let serializer = Serializer::new(
            &self.hub,
            &self.source_key,
            self.source.clone(),
            self.destination.clone(),
        );
        let report = serializer.closure_and_transfer(
            &pending,
            &transfer_options
                .skip_foreign_keys(&options.skip_foreign_keys)
                .producer(&producer),
            &mut self.session,
        )?;

        for item in &pending {
            guard.register_item(
                item,
                Some(&container),
                &register,
                &self.channel_key,
                &mut self.session,
            )?;
        }
        if self.state == ControllerState::ContainerDispatched {
            self.state = ControllerState::ItemsDispatching;
        }

        tracing::info!(
            channel_key = %self.channel_key,
            producer = %self.producer.name,
            model = %first.model,
            items = pending.len(),
            written = report.written,
            "Dispatched items"
        );
        Ok(report)
    }

    /// Dispatches every instance of `model` as items.
    ///
    /// When the model declares a container lookup only the instances whose container
    /// of record is this controller's container are taken. No instances is not an error.
    pub fn dispatch_model_as_json(
        &mut self,
        model: &ModelKey,
        container: Option<&Record>,
    ) -> Result<TransferReport, DispatchError> {
        let definition = self.hub.models().get(model)?;
        let mut records = self.source.all(model)?;
        if definition.container_lookup().is_some() {
            let guard = OwnershipGuard::new(&self.hub, self.source.clone());
            let mut owned = Vec::with_capacity(records.len());
            for record in records {
                if let Some(owner) = guard.resolve_container(&record)? {
                    if owner.pk == self.container.pk {
                        owned.push(record);
                    }
                }
            }
            records = owned;
        }
        if records.is_empty() {
            tracing::debug!(model = %model, "No instances to dispatch");
            return Ok(TransferReport::default());
        }
        self.dispatch_user_items_as_json(&records, container, &ItemDispatchOptions::default())
    }

    /// Transfers every instance of `model` without registering anything.
    pub fn update_model(
        &self,
        model: &ModelKey,
        additional_base_models: &[BaseModel],
        skip_foreign_keys: &[String],
    ) -> Result<TransferReport, DispatchError> {
        let records = self.source.all(model)?;
        if records.is_empty() {
            return Ok(TransferReport::default());
        }
        let serializer = Serializer::new(
            &self.hub,
            &self.source_key,
            self.source.clone(),
            self.destination.clone(),
        );
        let report = serializer.closure_and_transfer(
            &records,
            &TransferOptions::new(additional_base_models).skip_foreign_keys(skip_foreign_keys),
            &mut SessionContainer::new(),
        )?;
        tracing::info!(
            channel_key = %self.channel_key,
            model = %model,
            written = report.written,
            "Updated model on producer"
        );
        Ok(report)
    }

    /// Active item registers under this controller's container.
    pub fn get_registered_items(&self) -> Result<Vec<ItemRegister>, DispatchError> {
        match &self.register {
            Some(register) => Ok(self
                .hub
                .registers()
                .items_for_container(register.id, true)?),
            None => Ok(Vec::new()),
        }
    }

    /// The container register is active.
    pub fn is_ready(&self) -> Result<bool, DispatchError> {
        match &self.register {
            Some(register) => Ok(self
                .hub
                .registers()
                .get_container(register.id)?
                .map_or(false, |r| r.is_ready())),
            None => Ok(false),
        }
    }

    /// JSON summary of the controller.
    pub fn to_json(&self) -> Result<String, DispatchError> {
        let value = json!({
            "channel_key": self.channel_key,
            "producer": self.producer.name,
            "source": self.source_key,
            "container": {
                "model": self.container_model.to_string(),
                "identifier_attr": self.container_identifier_attr,
                "identifier": self.container_identifier,
                "pk": self.container.pk.to_string(),
            },
            "state": self.state,
            "retry": self.retry,
            "session": self.session.summary(),
        });
        Ok(serde_json::to_string(&value)?)
    }
}

impl fmt::Debug for DispatchController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchController")
            .field("channel_key", &self.channel_key)
            .field("producer", &self.producer.name)
            .field("container_model", &self.container_model)
            .field("container_identifier", &self.container_identifier)
            .field("state", &self.state)
            .field("retry", &self.retry)
            .finish()
    }
}
