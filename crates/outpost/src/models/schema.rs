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

//! Model schemas and the dispatch capability interface.
//!
//! Every model taking part in dispatch implements [`Dispatchable`]. The trait answers
//! the questions the controllers ask of a model: is it a container root, is it eligible
//! for dispatch, how does an instance reach its container, and may a dispatched
//! instance still be edited. Absent answers fall back to the trait's defaults.
//!
//! [`ModelDefinition`] is a declarative implementation covering the common cases:
//!
//! ```rust
//! use outpost::models::{BaseModel, FieldSpec, LookupPath, ModelDefinition, ModelKey, ModelSchema};
//!
//! let household = ModelKey::new("household", "household");
//! let member = ModelDefinition::new(
//!     ModelSchema::new(ModelKey::new("household", "householdmember"), BaseModel::Dispatch)
//!         .field(FieldSpec::foreign_key("household", household.clone()))
//!         .field(FieldSpec::encrypted("first_name")),
//! )
//! .lookup(LookupPath::new(household, ["household"]));
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use super::{ModelKey, NaturalKey, Record};
use crate::store::Query;

/// Base model family of a model. Serialization accepts only records whose base is in
/// the allowed set for the current transfer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BaseModel {
    /// Models participating in dispatch bookkeeping.
    Dispatch,
    /// Synchronized models that are not dispatch models.
    Sync,
    /// Lookup lists referenced through many-to-many relations.
    List,
    /// Reference data (visit definitions, schedules, sites).
    Reference,
    /// Encrypted-field companion records.
    Crypt,
    /// Dispatch register rows.
    Register,
}

impl BaseModel {
    /// Base models always accepted in addition to the controller's own.
    pub const ALWAYS_ALLOWED: [BaseModel; 3] =
        [BaseModel::List, BaseModel::Reference, BaseModel::Crypt];
}

impl fmt::Display for BaseModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BaseModel::Dispatch => "Dispatch",
            BaseModel::Sync => "Sync",
            BaseModel::List => "List",
            BaseModel::Reference => "Reference",
            BaseModel::Crypt => "Crypt",
            BaseModel::Register => "Register",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldKind {
    Plain,
    ForeignKey { to: ModelKey },
    Encrypted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldSpec {
    pub fn plain(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Plain,
        }
    }

    pub fn foreign_key(name: &str, to: ModelKey) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::ForeignKey { to },
        }
    }

    pub fn encrypted(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: FieldKind::Encrypted,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManyToManySpec {
    pub name: String,
    pub to: ModelKey,
}

/// Ordered relation steps leading from an item to its container.
///
/// Each step is a foreign-key field name on the model reached so far; the record
/// reached after the last step must be an instance of `container`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupPath {
    pub container: ModelKey,
    pub steps: Vec<String>,
}

impl LookupPath {
    pub fn new<I, S>(container: ModelKey, steps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            container,
            steps: steps.into_iter().map(Into::into).collect(),
        }
    }
}

/// Structure of a model: fields, relations and natural key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSchema {
    pub key: ModelKey,
    pub base: BaseModel,
    pub fields: Vec<FieldSpec>,
    pub many_to_many: Vec<ManyToManySpec>,
    /// Field names forming the natural key. Empty means the primary key is the natural key.
    pub natural_key: Vec<String>,
}

impl ModelSchema {
    pub fn new(key: ModelKey, base: BaseModel) -> Self {
        Self {
            key,
            base,
            fields: Vec::new(),
            many_to_many: Vec::new(),
            natural_key: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn many_to_many(mut self, name: &str, to: ModelKey) -> Self {
        self.many_to_many.push(ManyToManySpec {
            name: name.to_string(),
            to,
        });
        self
    }

    pub fn natural_key<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.natural_key = fields.into_iter().map(Into::into).collect();
        self
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// `(field name, target model)` for every foreign-key field.
    pub fn foreign_keys(&self) -> impl Iterator<Item = (&str, &ModelKey)> {
        self.fields.iter().filter_map(|f| match &f.kind {
            FieldKind::ForeignKey { to } => Some((f.name.as_str(), to)),
            _ => None,
        })
    }

    pub fn encrypted_fields(&self) -> impl Iterator<Item = &str> {
        self.fields
            .iter()
            .filter(|f| f.kind == FieldKind::Encrypted)
            .map(|f| f.name.as_str())
    }

    pub fn get_many_to_many(&self, name: &str) -> Option<&ManyToManySpec> {
        self.many_to_many.iter().find(|m| m.name == name)
    }

    /// Natural key of `record` under this schema.
    pub fn natural_key_of(&self, record: &Record) -> NaturalKey {
        if self.natural_key.is_empty() {
            return vec![Value::String(record.pk.to_string())];
        }
        self.natural_key
            .iter()
            .map(|f| record.get(f).cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// Query matching the record identified by `key`.
    pub fn natural_key_query(&self, key: &NaturalKey) -> Query {
        if self.natural_key.is_empty() {
            return key
                .first()
                .cloned()
                .map_or_else(Query::new, |pk| Query::new().eq("pk", pk));
        }
        self.natural_key
            .iter()
            .zip(key.iter())
            .fold(Query::new(), |q, (field, value)| q.eq(field, value.clone()))
    }
}

/// Capability interface every participating model implements.
pub trait Dispatchable: Send + Sync {
    fn schema(&self) -> &ModelSchema;

    fn model_key(&self) -> &ModelKey {
        &self.schema().key
    }

    /// Container roots are registered in the container register when dispatched.
    fn is_container(&self) -> bool {
        false
    }

    /// Includes a model whose app label is not in the configured dispatch app labels.
    fn include_for_dispatch(&self) -> bool {
        false
    }

    /// Excludes a model whose app label is in the configured dispatch app labels.
    fn ignore_for_dispatch(&self) -> bool {
        false
    }

    /// Field holding the business identifier of a container instance.
    fn container_identifier_attr(&self) -> Option<&str> {
        None
    }

    /// Relation path from an instance to its container, `None` when the model has no
    /// path to a container.
    fn container_lookup(&self) -> Option<&LookupPath> {
        None
    }

    /// Allows an edit of a dispatched instance. `update_fields` lists the fields the
    /// caller intends to change, `None` meaning all of them.
    fn bypass_for_edit(&self, _record: &Record, _update_fields: Option<&[String]>) -> bool {
        false
    }
}

/// Declarative [`Dispatchable`] built from a schema and a handful of flags.
#[derive(Debug, Clone)]
pub struct ModelDefinition {
    schema: ModelSchema,
    container_identifier_attr: Option<String>,
    include: bool,
    ignore: bool,
    lookup: Option<LookupPath>,
    editable_fields: Vec<String>,
}

impl ModelDefinition {
    pub fn new(schema: ModelSchema) -> Self {
        Self {
            schema,
            container_identifier_attr: None,
            include: false,
            ignore: false,
            lookup: None,
            editable_fields: Vec::new(),
        }
    }

    /// Marks the model as a container root identified by `identifier_attr`.
    pub fn container(mut self, identifier_attr: &str) -> Self {
        self.container_identifier_attr = Some(identifier_attr.to_string());
        self
    }

    pub fn include_for_dispatch(mut self) -> Self {
        self.include = true;
        self
    }

    pub fn ignore_for_dispatch(mut self) -> Self {
        self.ignore = true;
        self
    }

    pub fn lookup(mut self, path: LookupPath) -> Self {
        self.lookup = Some(path);
        self
    }

    /// Fields that stay editable while an instance is dispatched. An edit passes only
    /// when it names its fields and all of them are listed here.
    pub fn editable_while_dispatched<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.editable_fields = fields.into_iter().map(Into::into).collect();
        self
    }
}

impl Dispatchable for ModelDefinition {
    fn schema(&self) -> &ModelSchema {
        &self.schema
    }

    fn is_container(&self) -> bool {
        self.container_identifier_attr.is_some()
    }

    fn include_for_dispatch(&self) -> bool {
        self.include
    }

    fn ignore_for_dispatch(&self) -> bool {
        self.ignore
    }

    fn container_identifier_attr(&self) -> Option<&str> {
        self.container_identifier_attr.as_deref()
    }

    fn container_lookup(&self) -> Option<&LookupPath> {
        self.lookup.as_ref()
    }

    fn bypass_for_edit(&self, _record: &Record, update_fields: Option<&[String]>) -> bool {
        match update_fields {
            Some(fields) if !fields.is_empty() && !self.editable_fields.is_empty() => fields
                .iter()
                .all(|f| self.editable_fields.iter().any(|e| e == f)),
            _ => false,
        }
    }
}
