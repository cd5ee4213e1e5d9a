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

//! # Record Stores
//!
//! The persistence engine holding domain records is an external collaborator. The
//! [`Store`] trait is the surface the dispatch machinery consumes from it: lookups by
//! primary or natural key, filtered queries, upserts, get-or-create, in-place updates and
//! many-to-many linking. Conflicts are reported as structured [`StoreError`] variants so
//! the serializer can tell a tolerable duplicate from a real integrity failure.
//!
//! Stores are addressed by string key through a [`StoreRouter`]; the source is usually
//! `"default"` and each producer's store is keyed by its channel key.

pub mod memory;

use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{DispatchError, StoreError};
use crate::models::{ModelKey, NaturalKey, Record, RecordId};

pub use memory::MemoryStore;

/// A single filter condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    Eq(String, Value),
    In(String, Vec<Value>),
    /// Inclusive bounds; `None` leaves a side open.
    Range {
        field: String,
        min: Option<Value>,
        max: Option<Value>,
    },
    /// `true` matches missing or null values, `false` matches set values.
    IsNull(String, bool),
}

/// Conjunction of filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    filters: Vec<Filter>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    pub fn is_in<I, V>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.filters.push(Filter::In(
            field.to_string(),
            values.into_iter().map(Into::into).collect(),
        ));
        self
    }

    pub fn range(mut self, field: &str, min: Option<Value>, max: Option<Value>) -> Self {
        self.filters.push(Filter::Range {
            field: field.to_string(),
            min,
            max,
        });
        self
    }

    pub fn is_null(mut self, field: &str, is_null: bool) -> Self {
        self.filters.push(Filter::IsNull(field.to_string(), is_null));
        self
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Evaluates the query against a record. The pseudo-field `"pk"` addresses the
    /// primary key.
    pub fn matches(&self, record: &Record) -> bool {
        self.filters.iter().all(|filter| match filter {
            Filter::Eq(field, expected) => field_value(record, field)
                .map(|v| values_equal(&v, expected))
                .unwrap_or(false),
            Filter::In(field, options) => field_value(record, field)
                .map(|v| options.iter().any(|o| values_equal(&v, o)))
                .unwrap_or(false),
            Filter::Range { field, min, max } => match field_value(record, field) {
                Some(v) if !v.is_null() => {
                    let above = min.as_ref().map_or(true, |m| {
                        matches!(
                            compare_values(&v, m),
                            Some(Ordering::Greater | Ordering::Equal)
                        )
                    });
                    let below = max.as_ref().map_or(true, |m| {
                        matches!(compare_values(&v, m), Some(Ordering::Less | Ordering::Equal))
                    });
                    above && below
                }
                _ => false,
            },
            Filter::IsNull(field, is_null) => {
                let null = field_value(record, field).map_or(true, |v| v.is_null());
                null == *is_null
            }
        })
    }
}

fn field_value(record: &Record, field: &str) -> Option<Value> {
    if field == "pk" {
        return Some(Value::String(record.pk.to_string()));
    }
    record.fields.get(field).cloned()
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Result of a successful save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Created,
    Updated,
}

/// Generic record store.
pub trait Store: Send + Sync {
    /// Key this store is addressed by.
    fn name(&self) -> &str;

    fn get(&self, model: &ModelKey, pk: RecordId) -> Result<Option<Record>, StoreError>;

    fn get_by_natural_key(
        &self,
        model: &ModelKey,
        key: &NaturalKey,
    ) -> Result<Option<Record>, StoreError>;

    fn filter(&self, model: &ModelKey, query: &Query) -> Result<Vec<Record>, StoreError>;

    fn all(&self, model: &ModelKey) -> Result<Vec<Record>, StoreError> {
        self.filter(model, &Query::new())
    }

    fn exists(&self, model: &ModelKey, query: &Query) -> Result<bool, StoreError> {
        Ok(!self.filter(model, query)?.is_empty())
    }

    /// Inserts the record or updates the one with the same primary key. Many-to-many
    /// links carried by the record are stored too; an empty map leaves existing links
    /// untouched.
    fn save(&self, record: &Record) -> Result<SaveOutcome, StoreError>;

    /// Returns the first record matching `query`, creating `defaults` when none does.
    /// Implementations must perform the check and the insert atomically.
    fn get_or_create(
        &self,
        model: &ModelKey,
        query: &Query,
        defaults: Record,
    ) -> Result<(Record, bool), StoreError>;

    /// Applies `changes` to every record matching `query` and returns how many changed.
    fn update(
        &self,
        model: &ModelKey,
        query: &Query,
        changes: &Map<String, Value>,
    ) -> Result<usize, StoreError>;

    /// Replaces the related primary keys of a many-to-many relation.
    fn set_m2m(
        &self,
        model: &ModelKey,
        pk: RecordId,
        relation: &str,
        related: &[RecordId],
    ) -> Result<(), StoreError>;
}

/// Named store handles.
#[derive(Clone, Default)]
pub struct StoreRouter {
    stores: HashMap<String, Arc<dyn Store>>,
}

impl StoreRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a store under its own name.
    pub fn add(&mut self, store: Arc<dyn Store>) {
        self.stores.insert(store.name().to_string(), store);
    }

    pub fn insert(&mut self, key: impl Into<String>, store: Arc<dyn Store>) {
        self.stores.insert(key.into(), store);
    }

    pub fn using(&self, key: &str) -> Result<Arc<dyn Store>, DispatchError> {
        self.stores
            .get(key)
            .cloned()
            .ok_or_else(|| DispatchError::UnknownStore(key.to_string()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.stores.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.stores.keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl std::fmt::Debug for StoreRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreRouter")
            .field("stores", &self.keys())
            .finish()
    }
}
