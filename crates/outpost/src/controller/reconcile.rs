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

//! Reconciliation of item registers against producer stores.

use serde::Serialize;

use crate::error::{DispatchError, ProducerError};
use crate::hub::DispatchHub;
use crate::models::{ModelKey, RecordId};
use crate::producer::Producer;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileEntry {
    pub producer: String,
    pub model: ModelKey,
    pub pk: RecordId,
    pub identifier: String,
    /// The record exists in the producer's store.
    pub found: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ReconcileReport {
    pub entries: Vec<ReconcileEntry>,
}

impl ReconcileReport {
    pub fn found(&self) -> impl Iterator<Item = &ReconcileEntry> {
        self.entries.iter().filter(|e| e.found)
    }

    pub fn missing(&self) -> impl Iterator<Item = &ReconcileEntry> {
        self.entries.iter().filter(|e| !e.found)
    }

    pub fn is_consistent(&self) -> bool {
        self.entries.iter().all(|e| e.found)
    }
}

/// Checks every dispatched item of `producer`, or of every active producer, against
/// the producer's store. Producers without a configured store are skipped.
pub(crate) fn reconcile(
    hub: &DispatchHub,
    producer: Option<&str>,
) -> Result<ReconcileReport, DispatchError> {
    let producers: Vec<Producer> = match producer {
        Some(name) => {
            let producer = hub
                .producers()
                .get(name)
                .ok_or_else(|| ProducerError::NotFound(name.to_string()))?;
            if !producer.is_active {
                tracing::warn!(producer = %name, "Producer is not active. Nothing to reconcile");
                return Ok(ReconcileReport::default());
            }
            vec![producer]
        }
        None => hub.producers().active_producers(),
    };

    let mut report = ReconcileReport::default();
    for producer in producers {
        let store = match hub.stores().using(&producer.settings_key) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!(producer = %producer.name, "Skipping reconcile: {}", e);
                continue;
            }
        };
        for item in hub.registers().items_for_producer(&producer.name, true)? {
            let found = store.get(&item.item_model, item.item_pk)?.is_some();
            report.entries.push(ReconcileEntry {
                producer: producer.name.clone(),
                model: item.item_model,
                pk: item.item_pk,
                identifier: item.item_identifier,
                found,
            });
        }
    }

    tracing::info!(
        entries = report.entries.len(),
        missing = report.missing().count(),
        "Reconciled dispatched items"
    );
    Ok(report)
}
