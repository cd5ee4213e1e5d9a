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

//! Per-controller session tracking.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::models::{ModelKey, Record, RecordRef};

/// What one controller has done so far.
///
/// `serialized` holds every record written to (or found already present on) the
/// destination, `dispatched` every record registered as an item, `fk_dependencies` the
/// visited set of the foreign-key closure. `class_counter` counts serialized records
/// per model.
#[derive(Debug, Clone, Default)]
pub struct SessionContainer {
    pub serialized: HashSet<RecordRef>,
    pub dispatched: HashSet<RecordRef>,
    pub fk_dependencies: HashSet<RecordRef>,
    pub class_counter: BTreeMap<ModelKey, usize>,
}

impl SessionContainer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// Records a serialized record, counting it once.
    pub fn mark_serialized(&mut self, reference: RecordRef) -> bool {
        let model = reference.model.clone();
        let inserted = self.serialized.insert(reference);
        if inserted {
            *self.class_counter.entry(model).or_insert(0) += 1;
        }
        inserted
    }

    pub fn mark_dispatched(&mut self, reference: RecordRef) -> bool {
        self.dispatched.insert(reference)
    }

    /// Adds previously dispatched records without touching the counters.
    pub fn preload(&mut self, reference: RecordRef) {
        self.serialized.insert(reference.clone());
        self.dispatched.insert(reference);
    }

    pub fn is_serialized(&self, record: &Record) -> bool {
        self.serialized.contains(&record.reference())
    }

    pub fn is_dispatched(&self, record: &Record) -> bool {
        self.dispatched.contains(&record.reference())
    }

    pub fn count(&self, model: &ModelKey) -> usize {
        self.class_counter.get(model).copied().unwrap_or(0)
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            serialized: self.serialized.len(),
            dispatched: self.dispatched.len(),
            fk_dependencies: self.fk_dependencies.len(),
            counters: self
                .class_counter
                .iter()
                .map(|(model, count)| (model.to_string(), *count))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSummary {
    pub serialized: usize,
    pub dispatched: usize,
    pub fk_dependencies: usize,
    pub counters: BTreeMap<String, usize>,
}
