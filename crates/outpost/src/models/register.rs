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

//! Dispatch register models.
//!
//! A [`ContainerRegister`] row exists for every container ever dispatched and an
//! [`ItemRegister`] row for every item dispatched under it. Both carry the lease state
//! as the pair `is_dispatched` / `return_datetime`, which must always agree: an active
//! lease has no return time and a returned lease always has one.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::schema::{BaseModel, FieldSpec, ModelDefinition, ModelSchema};
use super::{ModelKey, Record, RecordId};
use crate::error::RegisterError;

/// Model key under which container register rows are serialized to a producer.
pub fn container_register_model() -> ModelKey {
    ModelKey::new("dispatch", "containerregister")
}

/// Builtin definition of the container register record model.
pub fn container_register_definition() -> ModelDefinition {
    ModelDefinition::new(
        ModelSchema::new(container_register_model(), BaseModel::Register)
            .field(FieldSpec::plain("producer"))
            .field(FieldSpec::plain("is_dispatched"))
            .field(FieldSpec::plain("dispatch_datetime"))
            .field(FieldSpec::plain("return_datetime"))
            .field(FieldSpec::plain("container_app_label"))
            .field(FieldSpec::plain("container_model_name"))
            .field(FieldSpec::plain("container_identifier_attrname"))
            .field(FieldSpec::plain("container_identifier"))
            .field(FieldSpec::plain("container_pk"))
            .field(FieldSpec::plain("dispatched_using")),
    )
}

/// Checks the `is_dispatched` / `return_datetime` pairing.
pub fn check_lease_invariant(
    is_dispatched: bool,
    return_datetime: Option<DateTime<Utc>>,
) -> Result<(), RegisterError> {
    match (is_dispatched, return_datetime) {
        (true, Some(_)) => Err(RegisterError::Invariant(
            "return_datetime must be None if is_dispatched is true".to_string(),
        )),
        (false, None) => Err(RegisterError::Invariant(
            "return_datetime may not be None if is_dispatched is false".to_string(),
        )),
        _ => Ok(()),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRegister {
    pub id: Uuid,
    pub producer: String,
    pub is_dispatched: bool,
    pub dispatch_datetime: Option<DateTime<Utc>>,
    pub return_datetime: Option<DateTime<Utc>>,
    pub container_model: ModelKey,
    pub container_identifier_attr: String,
    pub container_identifier: String,
    pub container_pk: RecordId,
    pub dispatched_using: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ContainerRegister {
    /// A controller may keep dispatching under this register while it is dispatched.
    pub fn is_ready(&self) -> bool {
        self.is_dispatched
    }

    /// Record form of the row, used to leave a copy of the register on the producer.
    pub fn to_record(&self) -> Record {
        Record::with_pk(container_register_model(), RecordId(self.id))
            .with("producer", self.producer.clone())
            .with("is_dispatched", self.is_dispatched)
            .with(
                "dispatch_datetime",
                self.dispatch_datetime.map(|d| d.to_rfc3339()),
            )
            .with("return_datetime", self.return_datetime.map(|d| d.to_rfc3339()))
            .with("container_app_label", self.container_model.app_label.clone())
            .with("container_model_name", self.container_model.model_name.clone())
            .with(
                "container_identifier_attrname",
                self.container_identifier_attr.clone(),
            )
            .with("container_identifier", self.container_identifier.clone())
            .with("container_pk", self.container_pk.to_string())
            .with("dispatched_using", self.dispatched_using.clone())
    }
}

/// Values for getting or creating a container register.
#[derive(Debug, Clone)]
pub struct NewContainerRegister {
    pub producer: String,
    pub container_model: ModelKey,
    pub container_identifier_attr: String,
    pub container_identifier: String,
    pub container_pk: RecordId,
    pub dispatched_using: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRegister {
    pub id: Uuid,
    pub container_register_id: Uuid,
    pub producer: String,
    pub is_dispatched: bool,
    pub dispatch_datetime: Option<DateTime<Utc>>,
    pub return_datetime: Option<DateTime<Utc>>,
    pub item_model: ModelKey,
    pub item_identifier_attr: String,
    pub item_identifier: String,
    pub item_pk: RecordId,
    pub dispatch_host: Option<String>,
    pub dispatch_using: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Values for getting or creating an item register.
#[derive(Debug, Clone)]
pub struct NewItemRegister {
    pub container_register_id: Uuid,
    pub producer: String,
    pub item_model: ModelKey,
    pub item_identifier_attr: String,
    pub item_identifier: String,
    pub item_pk: RecordId,
    pub dispatch_host: Option<String>,
    pub dispatch_using: Option<String>,
}
