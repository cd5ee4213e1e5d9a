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

//! Domain models.
//!
//! Records are generic: a [`Record`] names its model through a [`ModelKey`] and carries
//! its field values as JSON. Everything a model *is* (fields, relations, natural key,
//! dispatch capabilities) lives in its [`schema::ModelSchema`] and the
//! [`schema::Dispatchable`] implementation registered for it in a
//! [`registry::ModelRegistry`].

pub mod register;
pub mod registry;
pub mod schema;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub use register::{ContainerRegister, ItemRegister, NewContainerRegister, NewItemRegister};
pub use registry::ModelRegistry;
pub use schema::{
    BaseModel, Dispatchable, FieldKind, FieldSpec, LookupPath, ManyToManySpec, ModelDefinition,
    ModelSchema,
};

/// Identifies a model by app label and model name, e.g. `household.household`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ModelKey {
    pub app_label: String,
    pub model_name: String,
}

impl ModelKey {
    /// Model names are stored lowercase.
    pub fn new(app_label: impl Into<String>, model_name: impl Into<String>) -> Self {
        Self {
            app_label: app_label.into(),
            model_name: model_name.into().to_lowercase(),
        }
    }
}

impl fmt::Display for ModelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.app_label, self.model_name)
    }
}

/// Primary key of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(RecordId)
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

/// (model, pk) pair used as the identity of a record in session sets.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordRef {
    pub model: ModelKey,
    pub pk: RecordId,
}

impl fmt::Display for RecordRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.model, self.pk)
    }
}

/// Ordered natural-key values identifying a record independently of its primary key.
pub type NaturalKey = Vec<Value>;

/// A stored record.
///
/// Foreign-key fields hold the referenced primary key as a string. Many-to-many
/// relations are kept apart from `fields`, keyed by relation name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub model: ModelKey,
    pub pk: RecordId,
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub m2m: BTreeMap<String, Vec<RecordId>>,
}

impl Record {
    /// Creates an empty record with a fresh primary key.
    pub fn new(model: ModelKey) -> Self {
        Self::with_pk(model, RecordId::new_v4())
    }

    pub fn with_pk(model: ModelKey, pk: RecordId) -> Self {
        Self {
            model,
            pk,
            fields: Map::new(),
            m2m: BTreeMap::new(),
        }
    }

    /// Builder-style field setter.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.set(field, value);
        self
    }

    /// Builder-style foreign-key setter.
    pub fn with_fk(mut self, field: &str, target: &Record) -> Self {
        self.set(field, target.pk.to_string());
        self
    }

    pub fn with_m2m(mut self, relation: &str, related: &[&Record]) -> Self {
        self.m2m
            .insert(relation.to_string(), related.iter().map(|r| r.pk).collect());
        self
    }

    pub fn set(&mut self, field: &str, value: impl Into<Value>) {
        self.fields.insert(field.to_string(), value.into());
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    /// Field value rendered as a string; `None` for missing or null values.
    pub fn get_string(&self, field: &str) -> Option<String> {
        match self.fields.get(field)? {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }
    }

    /// Foreign-key value of `field`, if set and parseable.
    pub fn fk(&self, field: &str) -> Option<RecordId> {
        self.fields
            .get(field)
            .and_then(Value::as_str)
            .and_then(|s| s.parse().ok())
    }

    pub fn reference(&self) -> RecordRef {
        RecordRef {
            model: self.model.clone(),
            pk: self.pk,
        }
    }
}
