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

//! Query surface of the transaction log.
//!
//! Replication between the central store and producers happens elsewhere; controllers
//! only ask whether unsynchronized transactions remain. Outgoing transactions sit on a
//! producer channel waiting to be pulled; incoming transactions arrived from a producer
//! and have not yet been consumed into the source store.

use parking_lot::Mutex;

use crate::error::StoreError;
use crate::models::ModelKey;

pub trait TransactionLog: Send + Sync {
    /// Unsent transactions queued for the producer behind `channel_key`.
    fn has_outgoing_pending(&self, channel_key: &str) -> Result<bool, StoreError>;

    /// Unconsumed transactions received from `producer_name` into `source_key`,
    /// narrowed to `models` when given.
    fn has_incoming_pending(
        &self,
        producer_name: &str,
        source_key: &str,
        models: Option<&[ModelKey]>,
    ) -> Result<bool, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Pending {
    Outgoing {
        channel_key: String,
        model: ModelKey,
    },
    Incoming {
        producer: String,
        source_key: String,
        model: ModelKey,
    },
}

/// In-memory transaction log.
#[derive(Debug, Default)]
pub struct MemoryTransactionLog {
    pending: Mutex<Vec<Pending>>,
}

impl MemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_outgoing(&self, channel_key: &str, model: ModelKey) {
        self.pending.lock().push(Pending::Outgoing {
            channel_key: channel_key.to_string(),
            model,
        });
    }

    pub fn push_incoming(&self, producer: &str, source_key: &str, model: ModelKey) {
        self.pending.lock().push(Pending::Incoming {
            producer: producer.to_string(),
            source_key: source_key.to_string(),
            model,
        });
    }

    /// Marks everything pending as synchronized.
    pub fn consume_all(&self) {
        self.pending.lock().clear();
    }

    /// Marks outgoing transactions of one channel as sent.
    pub fn consume_outgoing(&self, channel_key: &str) {
        self.pending.lock().retain(|p| {
            !matches!(p, Pending::Outgoing { channel_key: key, .. } if key == channel_key)
        });
    }

    pub fn len(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.lock().is_empty()
    }
}

impl TransactionLog for MemoryTransactionLog {
    fn has_outgoing_pending(&self, channel_key: &str) -> Result<bool, StoreError> {
        Ok(self.pending.lock().iter().any(
            |p| matches!(p, Pending::Outgoing { channel_key: key, .. } if key == channel_key),
        ))
    }

    fn has_incoming_pending(
        &self,
        producer_name: &str,
        source_key: &str,
        models: Option<&[ModelKey]>,
    ) -> Result<bool, StoreError> {
        Ok(self.pending.lock().iter().any(|p| match p {
            Pending::Incoming {
                producer,
                source_key: key,
                model,
            } => {
                producer == producer_name
                    && key == source_key
                    && models.map_or(true, |models| models.contains(model))
            }
            Pending::Outgoing { .. } => false,
        }))
    }
}
