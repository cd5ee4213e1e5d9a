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

//! # Serialization Engine
//!
//! Moves a set of records from a source store to a destination store together with
//! everything they need there:
//!
//! 1. companion records of encrypted fields, resolved through the hub's crypt resolver
//! 2. the foreign-key closure, collected iteratively and visited once per session
//! 3. the records themselves
//!
//! References are written as natural keys so the payload does not depend on the
//! primary keys of either side. Applying the payload is idempotent: a natural-key
//! conflict means the record is already there, a missing foreign-key target defers the
//! record to the next pass, anything else aborts the transfer. When a pass makes no
//! progress, references between the deferred records are saved as null and restored
//! once every record of the cycle exists on the destination.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::crypt::companions_for;
use crate::error::{DispatchError, StoreError};
use crate::hub::DispatchHub;
use crate::models::{BaseModel, ModelKey, NaturalKey, Record, RecordId, RecordRef};
use crate::store::{Query, Store};

use super::session::SessionContainer;

/// Portable form of one record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializedRecord {
    pub model: ModelKey,
    pub pk: RecordId,
    pub natural_key: NaturalKey,
    /// Field values; foreign keys hold the target's natural key or null.
    #[serde(default)]
    pub fields: Map<String, Value>,
    #[serde(default)]
    pub m2m: BTreeMap<String, Vec<NaturalKey>>,
}

impl SerializedRecord {
    fn reference(&self) -> RecordRef {
        RecordRef {
            model: self.model.clone(),
            pk: self.pk,
        }
    }
}

/// Counts for one transfer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TransferReport {
    /// Records saved on the destination.
    pub written: usize,
    /// Records found already present under their natural key.
    pub accepted_duplicates: usize,
    pub companions: usize,
    pub dependencies: usize,
    pub m2m_links: usize,
    /// Foreign keys restored after a reference cycle was broken.
    pub relinked: usize,
    pub passes: usize,
}

impl TransferReport {
    pub fn merge(&mut self, other: &TransferReport) {
        self.written += other.written;
        self.accepted_duplicates += other.accepted_duplicates;
        self.companions += other.companions;
        self.dependencies += other.dependencies;
        self.m2m_links += other.m2m_links;
        self.relinked += other.relinked;
        self.passes = self.passes.max(other.passes);
    }

    pub fn is_empty(&self) -> bool {
        self.written == 0 && self.accepted_duplicates == 0
    }
}

#[derive(Debug, Clone)]
pub struct TransferOptions<'o> {
    pub allowed_base_models: Vec<BaseModel>,
    pub skip_foreign_keys: &'o [String],
    /// Producer whose pending incoming transactions block the transfer.
    pub producer: Option<&'o str>,
}

impl<'o> TransferOptions<'o> {
    /// Allows `base_models` plus the base models every transfer accepts.
    pub fn new(base_models: &[BaseModel]) -> Self {
        let mut allowed: Vec<BaseModel> = base_models.to_vec();
        for base in BaseModel::ALWAYS_ALLOWED {
            if !allowed.contains(&base) {
                allowed.push(base);
            }
        }
        Self {
            allowed_base_models: allowed,
            skip_foreign_keys: &[],
            producer: None,
        }
    }

    pub fn skip_foreign_keys(mut self, fields: &'o [String]) -> Self {
        self.skip_foreign_keys = fields;
        self
    }

    pub fn producer(mut self, producer: &'o str) -> Self {
        self.producer = Some(producer);
        self
    }

    fn allowed_display(&self) -> String {
        self.allowed_base_models
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

enum Applied {
    Written(RecordId),
    Accepted(RecordId),
    Deferred(String),
}

/// Foreign key saved as null while its target was still pending.
#[derive(Debug)]
struct BrokenLink {
    model: ModelKey,
    pk: RecordId,
    field: String,
    target: ModelKey,
    key: NaturalKey,
}

pub struct Serializer<'a> {
    hub: &'a DispatchHub,
    source_key: String,
    source: Arc<dyn Store>,
    destination: Arc<dyn Store>,
}

impl<'a> Serializer<'a> {
    pub fn new(
        hub: &'a DispatchHub,
        source_key: &str,
        source: Arc<dyn Store>,
        destination: Arc<dyn Store>,
    ) -> Self {
        Self {
            hub,
            source_key: source_key.to_string(),
            source,
            destination,
        }
    }

    /// Transfers `instances` with their companions and foreign-key closure.
    pub fn closure_and_transfer(
        &self,
        instances: &[Record],
        options: &TransferOptions<'_>,
        session: &mut SessionContainer,
    ) -> Result<TransferReport, DispatchError> {
        self.check_base_models(instances, options)?;

        let originals: Vec<Record> = instances
            .iter()
            .filter(|r| !session.is_serialized(r))
            .cloned()
            .collect();
        let mut companions = self.collect_companions(&originals, session)?;
        self.check_pending(instances, options)?;

        let dependencies =
            self.foreign_key_closure(&originals, options.skip_foreign_keys, session)?;
        for companion in self.collect_companions(&dependencies, session)? {
            if !companions.iter().any(|c| c.pk == companion.pk) {
                companions.push(companion);
            }
        }

        let mut report = TransferReport {
            companions: companions.len(),
            dependencies: dependencies.len(),
            ..TransferReport::default()
        };

        let ordered: Vec<Record> = companions
            .into_iter()
            .chain(dependencies)
            .chain(originals)
            .collect();
        if ordered.is_empty() {
            return Ok(report);
        }

        let payload = self.serialize(&ordered)?;
        let records = Self::deserialize(&payload)?;
        let applied = self.apply(records, session, &mut report)?;
        report.m2m_links = self.link_many_to_many(&applied)?;

        tracing::debug!(
            source = %self.source.name(),
            destination = %self.destination.name(),
            written = report.written,
            accepted = report.accepted_duplicates,
            passes = report.passes,
            "Transferred records"
        );
        Ok(report)
    }

    fn check_base_models(
        &self,
        instances: &[Record],
        options: &TransferOptions<'_>,
    ) -> Result<(), DispatchError> {
        for instance in instances {
            let model = self.hub.models().get(&instance.model)?;
            if !options.allowed_base_models.contains(&model.schema().base) {
                return Err(DispatchError::BaseModel {
                    model: instance.model.clone(),
                    allowed: options.allowed_display(),
                });
            }
        }
        Ok(())
    }

    /// Companions of every encrypted field, deduplicated by hash.
    fn collect_companions(
        &self,
        records: &[Record],
        session: &SessionContainer,
    ) -> Result<Vec<Record>, DispatchError> {
        let resolver = self.hub.crypt();
        let mut hashes = HashSet::new();
        let mut companions = Vec::new();
        for record in records {
            let model = self.hub.models().get(&record.model)?;
            for companion in companions_for(resolver.as_ref(), model.schema(), record)? {
                let hash = companion
                    .get_string("hash")
                    .unwrap_or_else(|| companion.pk.to_string());
                if session.is_serialized(&companion) || !hashes.insert(hash) {
                    continue;
                }
                companions.push(companion);
            }
        }
        Ok(companions)
    }

    fn check_pending(
        &self,
        instances: &[Record],
        options: &TransferOptions<'_>,
    ) -> Result<(), DispatchError> {
        let producer = match options.producer {
            Some(producer) => producer,
            None => return Ok(()),
        };
        let mut models: Vec<ModelKey> = instances.iter().map(|r| r.model.clone()).collect();
        models.sort();
        models.dedup();
        if self
            .hub
            .transactions()
            .has_incoming_pending(producer, &self.source_key, Some(models.as_slice()))?
        {
            let names: Vec<String> = models.iter().map(ToString::to_string).collect();
            return Err(DispatchError::PendingTransaction(format!(
                "Producer '{}' has pending incoming transactions for {}. Run sync first.",
                producer,
                names.join(", ")
            )));
        }
        Ok(())
    }

    /// Records reachable through foreign keys, dependencies before dependents.
    ///
    /// Records in the batch itself, records already serialized this session and records
    /// already visited are not descended into.
    pub fn foreign_key_closure(
        &self,
        instances: &[Record],
        skip_foreign_keys: &[String],
        session: &mut SessionContainer,
    ) -> Result<Vec<Record>, DispatchError> {
        let batch: HashSet<RecordRef> = instances.iter().map(Record::reference).collect();
        let mut ordered = Vec::new();
        let mut stack: Vec<(Record, bool)> = Vec::new();

        for instance in instances {
            for target in self.foreign_key_targets(instance, skip_foreign_keys)? {
                stack.push((target, false));
            }
            while let Some((record, expanded)) = stack.pop() {
                if expanded {
                    ordered.push(record);
                    continue;
                }
                let reference = record.reference();
                if batch.contains(&reference)
                    || session.serialized.contains(&reference)
                    || !session.fk_dependencies.insert(reference)
                {
                    continue;
                }
                let targets = self.foreign_key_targets(&record, skip_foreign_keys)?;
                stack.push((record, true));
                for target in targets {
                    stack.push((target, false));
                }
            }
        }
        Ok(ordered)
    }

    fn foreign_key_targets(
        &self,
        record: &Record,
        skip_foreign_keys: &[String],
    ) -> Result<Vec<Record>, DispatchError> {
        let model = self.hub.models().get(&record.model)?;
        let mut targets = Vec::new();
        for (field, target) in model.schema().foreign_keys() {
            if skip_foreign_keys.iter().any(|s| s == field) {
                continue;
            }
            if let Some(pk) = record.fk(field) {
                if let Some(found) = self.source.get(target, pk)? {
                    targets.push(found);
                }
            }
        }
        Ok(targets)
    }

    /// Serializes records to the portable JSON payload.
    pub fn serialize(&self, records: &[Record]) -> Result<String, DispatchError> {
        let serialized = records
            .iter()
            .map(|r| self.to_serialized(r))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(serde_json::to_string(&serialized)?)
    }

    pub fn deserialize(payload: &str) -> Result<Vec<SerializedRecord>, DispatchError> {
        Ok(serde_json::from_str(payload)?)
    }

    fn to_serialized(&self, record: &Record) -> Result<SerializedRecord, DispatchError> {
        let model = self.hub.models().get(&record.model)?;
        let schema = model.schema();
        let mut fields = record.fields.clone();

        for (field, target) in schema.foreign_keys() {
            let value = match record.fk(field) {
                Some(pk) => {
                    let target_model = self.hub.models().get(target)?;
                    match self.source.get(target, pk)? {
                        Some(found) => Value::Array(target_model.schema().natural_key_of(&found)),
                        None => Value::Array(vec![Value::String(pk.to_string())]),
                    }
                }
                None => Value::Null,
            };
            fields.insert(field.to_string(), value);
        }

        let mut m2m = BTreeMap::new();
        for (relation, related) in &record.m2m {
            let spec = match schema.get_many_to_many(relation) {
                Some(spec) => spec,
                None => continue,
            };
            let target_model = self.hub.models().get(&spec.to)?;
            let mut keys = Vec::with_capacity(related.len());
            for pk in related {
                if let Some(found) = self.source.get(&spec.to, *pk)? {
                    keys.push(target_model.schema().natural_key_of(&found));
                }
            }
            m2m.insert(relation.clone(), keys);
        }

        Ok(SerializedRecord {
            model: record.model.clone(),
            pk: record.pk,
            natural_key: schema.natural_key_of(record),
            fields,
            m2m,
        })
    }

    /// Applies records in passes until all are saved or accepted.
    ///
    /// A pass without progress switches the next pass to breaking cycles: foreign keys
    /// whose target is itself pending are saved as null and restored at the end.
    fn apply(
        &self,
        records: Vec<SerializedRecord>,
        session: &mut SessionContainer,
        report: &mut TransferReport,
    ) -> Result<Vec<(SerializedRecord, RecordId)>, DispatchError> {
        let max_passes = self.hub.config().max_apply_passes();
        let mut applied = Vec::with_capacity(records.len());
        let mut broken = Vec::new();
        let mut break_cycles = false;
        let mut pending: Vec<(SerializedRecord, String)> =
            records.into_iter().map(|r| (r, String::new())).collect();

        while !pending.is_empty() {
            if report.passes >= max_passes {
                return Err(Self::exhausted(&pending));
            }
            report.passes += 1;

            let pending_keys: Vec<(ModelKey, NaturalKey)> = if break_cycles {
                pending
                    .iter()
                    .map(|(r, _)| (r.model.clone(), r.natural_key.clone()))
                    .collect()
            } else {
                Vec::new()
            };

            let before = pending.len();
            let mut deferred = Vec::new();
            for (record, _) in pending {
                match self.apply_one(&record, &pending_keys, &mut broken)? {
                    Applied::Written(pk) => {
                        report.written += 1;
                        session.mark_serialized(record.reference());
                        applied.push((record, pk));
                    }
                    Applied::Accepted(pk) => {
                        report.accepted_duplicates += 1;
                        session.mark_serialized(record.reference());
                        applied.push((record, pk));
                    }
                    Applied::Deferred(reason) => deferred.push((record, reason)),
                }
            }
            if deferred.len() == before {
                if break_cycles {
                    return Err(Self::exhausted(&deferred));
                }
                tracing::debug!(
                    destination = %self.destination.name(),
                    deferred = deferred.len(),
                    "No progress, breaking reference cycles"
                );
                break_cycles = true;
            } else {
                break_cycles = false;
            }
            pending = deferred;
        }

        report.relinked = self.restore_links(&broken)?;
        Ok(applied)
    }

    /// Points every broken foreign key at its target, now on the destination.
    fn restore_links(&self, broken: &[BrokenLink]) -> Result<usize, DispatchError> {
        for link in broken {
            let target = self
                .destination
                .get_by_natural_key(&link.target, &link.key)?
                .ok_or_else(|| DispatchError::Deserialization {
                    model: link.model.clone(),
                    pk: link.pk.to_string(),
                    reason: format!(
                        "{}.{} references a missing {}",
                        link.model, link.field, link.target
                    ),
                })?;
            let mut changes = Map::new();
            changes.insert(link.field.clone(), Value::String(target.pk.to_string()));
            self.destination.update(
                &link.model,
                &Query::new().eq("pk", link.pk.to_string()),
                &changes,
            )?;
        }
        Ok(broken.len())
    }

    fn exhausted(pending: &[(SerializedRecord, String)]) -> DispatchError {
        match pending.first() {
            Some((record, reason)) => DispatchError::Deserialization {
                model: record.model.clone(),
                pk: record.pk.to_string(),
                reason: reason.clone(),
            },
            None => DispatchError::ImproperlyConfigured(
                "apply pass limit reached with nothing pending".to_string(),
            ),
        }
    }

    fn apply_one(
        &self,
        item: &SerializedRecord,
        pending_keys: &[(ModelKey, NaturalKey)],
        broken: &mut Vec<BrokenLink>,
    ) -> Result<Applied, DispatchError> {
        let model = self.hub.models().get(&item.model)?;
        let mut record = Record::with_pk(item.model.clone(), item.pk);
        record.fields = item.fields.clone();
        let mut nulled = Vec::new();

        for (field, target) in model.schema().foreign_keys() {
            let key = match item.fields.get(field) {
                Some(Value::Array(key)) => key,
                _ => {
                    record.fields.insert(field.to_string(), Value::Null);
                    continue;
                }
            };
            match self.destination.get_by_natural_key(target, key)? {
                Some(found) => {
                    record.set(field, found.pk.to_string());
                }
                None if pending_keys
                    .iter()
                    .any(|(pending_model, pending)| pending_model == target && pending == key) =>
                {
                    record.fields.insert(field.to_string(), Value::Null);
                    nulled.push(BrokenLink {
                        model: item.model.clone(),
                        pk: item.pk,
                        field: field.to_string(),
                        target: target.clone(),
                        key: key.clone(),
                    });
                }
                None => {
                    return Ok(Applied::Deferred(format!(
                        "{}.{} references a missing {}",
                        item.model, field, target
                    )))
                }
            }
        }

        match self.destination.save(&record) {
            Ok(_) => {
                broken.extend(nulled);
                Ok(Applied::Written(record.pk))
            }
            Err(StoreError::UniqueViolation { .. }) => {
                let existing = self
                    .destination
                    .get_by_natural_key(&item.model, &item.natural_key)?;
                Ok(Applied::Accepted(existing.map_or(item.pk, |r| r.pk)))
            }
            Err(err @ StoreError::ForeignKeyViolation { .. }) => {
                Ok(Applied::Deferred(err.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Re-links many-to-many relations with destination primary keys, transferring
    /// missing related list records first.
    fn link_many_to_many(
        &self,
        applied: &[(SerializedRecord, RecordId)],
    ) -> Result<usize, DispatchError> {
        let mut links = 0;
        for (record, destination_pk) in applied {
            if record.m2m.is_empty() {
                continue;
            }
            let model = self.hub.models().get(&record.model)?;
            for (relation, keys) in &record.m2m {
                let spec = match model.schema().get_many_to_many(relation) {
                    Some(spec) => spec,
                    None => continue,
                };
                let mut related = Vec::with_capacity(keys.len());
                for key in keys {
                    related.push(self.related_on_destination(&spec.to, key)?);
                }
                self.destination
                    .set_m2m(&record.model, *destination_pk, relation, &related)?;
                links += related.len();
            }
        }
        Ok(links)
    }

    fn related_on_destination(
        &self,
        model: &ModelKey,
        key: &NaturalKey,
    ) -> Result<RecordId, DispatchError> {
        if let Some(found) = self.destination.get_by_natural_key(model, key)? {
            return Ok(found.pk);
        }
        if let Some(source_record) = self.source.get_by_natural_key(model, key)? {
            // List records carry no dispatch bookkeeping of their own.
            let mut throwaway = SessionContainer::new();
            self.closure_and_transfer(
                &[source_record],
                &TransferOptions::new(&[BaseModel::List]),
                &mut throwaway,
            )?;
        }
        self.destination
            .get_by_natural_key(model, key)?
            .map(|r| r.pk)
            .ok_or_else(|| DispatchError::Deserialization {
                model: model.clone(),
                pk: Value::Array(key.clone()).to_string(),
                reason: "related record is missing on the source".to_string(),
            })
    }
}

/// Drops repeated records, keeping the first occurrence.
pub(crate) fn dedup_records(records: &[Record]) -> Vec<Record> {
    let mut seen: HashSet<RecordRef> = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.reference()))
        .cloned()
        .collect()
}
