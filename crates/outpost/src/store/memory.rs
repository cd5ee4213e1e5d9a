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

//! In-memory [`Store`] enforcing natural-key uniqueness and foreign-key existence.
//!
//! Every operation runs under one lock, so `get_or_create` is atomic.

use parking_lot::RwLock;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

use super::{Query, SaveOutcome, Store};
use crate::error::StoreError;
use crate::models::{ModelKey, ModelRegistry, ModelSchema, NaturalKey, Record, RecordId};

type Tables = HashMap<ModelKey, Vec<Record>>;

pub struct MemoryStore {
    name: String,
    models: Arc<ModelRegistry>,
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new(name: impl Into<String>, models: Arc<ModelRegistry>) -> Self {
        Self {
            name: name.into(),
            models,
            tables: RwLock::new(HashMap::new()),
        }
    }

    /// Number of records stored for `model`.
    pub fn count(&self, model: &ModelKey) -> usize {
        self.tables.read().get(model).map_or(0, Vec::len)
    }

    fn schema(&self, model: &ModelKey) -> Result<ModelSchema, StoreError> {
        self.models
            .try_get(model)
            .map(|m| m.schema().clone())
            .ok_or_else(|| StoreError::UnknownModel(model.clone()))
    }

    fn check_constraints(
        &self,
        tables: &Tables,
        schema: &ModelSchema,
        record: &Record,
    ) -> Result<(), StoreError> {
        if !schema.natural_key.is_empty() {
            let key = schema.natural_key_of(record);
            let duplicate = tables.get(&record.model).map_or(false, |rows| {
                rows.iter()
                    .any(|r| r.pk != record.pk && schema.natural_key_of(r) == key)
            });
            if duplicate {
                return Err(StoreError::UniqueViolation {
                    model: record.model.clone(),
                    constraint: format!("natural_key({})", schema.natural_key.join(", ")),
                });
            }
        }

        for (field, target) in schema.foreign_keys() {
            let value = match record.get(field) {
                None | Some(Value::Null) => continue,
                Some(v) => v,
            };
            let target_pk = record.fk(field).ok_or_else(|| StoreError::Integrity {
                model: record.model.clone(),
                message: format!("field '{}' holds an invalid reference {}", field, value),
            })?;
            let found = tables
                .get(target)
                .map_or(false, |rows| rows.iter().any(|r| r.pk == target_pk));
            if !found {
                return Err(StoreError::ForeignKeyViolation {
                    model: record.model.clone(),
                    field: field.to_string(),
                    target: target.clone(),
                });
            }
        }
        Ok(())
    }

    fn check_m2m(
        tables: &Tables,
        schema: &ModelSchema,
        relation: &str,
        related: &[RecordId],
    ) -> Result<(), StoreError> {
        let spec = schema
            .get_many_to_many(relation)
            .ok_or_else(|| StoreError::Integrity {
                model: schema.key.clone(),
                message: format!("no many-to-many relation named '{}'", relation),
            })?;
        let rows = tables.get(&spec.to);
        for pk in related {
            if !rows.map_or(false, |rows| rows.iter().any(|r| r.pk == *pk)) {
                return Err(StoreError::ForeignKeyViolation {
                    model: schema.key.clone(),
                    field: relation.to_string(),
                    target: spec.to.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, model: &ModelKey, pk: RecordId) -> Result<Option<Record>, StoreError> {
        Ok(self
            .tables
            .read()
            .get(model)
            .and_then(|rows| rows.iter().find(|r| r.pk == pk).cloned()))
    }

    fn get_by_natural_key(
        &self,
        model: &ModelKey,
        key: &NaturalKey,
    ) -> Result<Option<Record>, StoreError> {
        let schema = self.schema(model)?;
        Ok(self.tables.read().get(model).and_then(|rows| {
            rows.iter()
                .find(|r| &schema.natural_key_of(r) == key)
                .cloned()
        }))
    }

    fn filter(&self, model: &ModelKey, query: &Query) -> Result<Vec<Record>, StoreError> {
        Ok(self.tables.read().get(model).map_or_else(Vec::new, |rows| {
            rows.iter().filter(|r| query.matches(r)).cloned().collect()
        }))
    }

    fn save(&self, record: &Record) -> Result<SaveOutcome, StoreError> {
        let schema = self.schema(&record.model)?;
        let mut tables = self.tables.write();
        self.check_constraints(&tables, &schema, record)?;
        for (relation, related) in &record.m2m {
            Self::check_m2m(&tables, &schema, relation, related)?;
        }

        let rows = tables.entry(record.model.clone()).or_default();
        match rows.iter_mut().find(|r| r.pk == record.pk) {
            Some(existing) => {
                existing.fields = record.fields.clone();
                for (relation, related) in &record.m2m {
                    existing.m2m.insert(relation.clone(), related.clone());
                }
                Ok(SaveOutcome::Updated)
            }
            None => {
                rows.push(record.clone());
                Ok(SaveOutcome::Created)
            }
        }
    }

    fn get_or_create(
        &self,
        model: &ModelKey,
        query: &Query,
        defaults: Record,
    ) -> Result<(Record, bool), StoreError> {
        let schema = self.schema(model)?;
        let mut tables = self.tables.write();
        if let Some(found) = tables
            .get(model)
            .and_then(|rows| rows.iter().find(|r| query.matches(r)))
        {
            return Ok((found.clone(), false));
        }
        self.check_constraints(&tables, &schema, &defaults)?;
        tables.entry(model.clone()).or_default().push(defaults.clone());
        Ok((defaults, true))
    }

    fn update(
        &self,
        model: &ModelKey,
        query: &Query,
        changes: &Map<String, Value>,
    ) -> Result<usize, StoreError> {
        let schema = self.schema(model)?;
        let mut tables = self.tables.write();

        let updated: Vec<Record> = tables
            .get(model)
            .map_or_else(Vec::new, |rows| {
                rows.iter()
                    .filter(|r| query.matches(r))
                    .map(|r| {
                        let mut r = r.clone();
                        for (field, value) in changes {
                            r.fields.insert(field.clone(), value.clone());
                        }
                        r
                    })
                    .collect()
            });
        for record in &updated {
            self.check_constraints(&tables, &schema, record)?;
        }

        if let Some(rows) = tables.get_mut(model) {
            for record in &updated {
                if let Some(row) = rows.iter_mut().find(|r| r.pk == record.pk) {
                    row.fields = record.fields.clone();
                }
            }
        }
        Ok(updated.len())
    }

    fn set_m2m(
        &self,
        model: &ModelKey,
        pk: RecordId,
        relation: &str,
        related: &[RecordId],
    ) -> Result<(), StoreError> {
        let schema = self.schema(model)?;
        let mut tables = self.tables.write();
        Self::check_m2m(&tables, &schema, relation, related)?;
        let row = tables
            .get_mut(model)
            .and_then(|rows| rows.iter_mut().find(|r| r.pk == pk))
            .ok_or_else(|| StoreError::NotFound {
                model: model.clone(),
                pk: pk.to_string(),
            })?;
        row.m2m.insert(relation.to_string(), related.to_vec());
        Ok(())
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("name", &self.name)
            .finish()
    }
}
