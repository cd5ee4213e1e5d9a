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

//! Producers are the peer devices containers are dispatched to. Each is reached through
//! a store keyed by its channel (settings) key, and both controllers require exactly
//! one active producer for that key.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::ProducerError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Producer {
    pub name: String,
    /// Channel key of the producer's store.
    pub settings_key: String,
    pub is_active: bool,
}

impl Producer {
    pub fn new(name: impl Into<String>, settings_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            settings_key: settings_key.into(),
            is_active: true,
        }
    }
}

/// Directory of known producers.
pub trait ProducerDirectory: Send + Sync {
    fn producers(&self) -> Vec<Producer>;

    fn get(&self, name: &str) -> Option<Producer> {
        self.producers().into_iter().find(|p| p.name == name)
    }

    /// The single active producer behind `channel_key`.
    fn resolve_active(&self, channel_key: &str) -> Result<Producer, ProducerError> {
        let mut matches: Vec<Producer> = self
            .producers()
            .into_iter()
            .filter(|p| p.is_active && p.settings_key == channel_key)
            .collect();
        match matches.len() {
            0 => Err(ProducerError::NotFound(channel_key.to_string())),
            1 => Ok(matches.remove(0)),
            count => Err(ProducerError::Ambiguous {
                channel_key: channel_key.to_string(),
                count,
            }),
        }
    }

    fn active_producers(&self) -> Vec<Producer> {
        self.producers().into_iter().filter(|p| p.is_active).collect()
    }
}

/// In-memory producer directory.
#[derive(Debug, Default)]
pub struct MemoryProducerDirectory {
    producers: RwLock<Vec<Producer>>,
}

impl MemoryProducerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a producer, replacing one with the same name.
    pub fn add(&self, producer: Producer) {
        let mut producers = self.producers.write();
        producers.retain(|p| p.name != producer.name);
        tracing::debug!("Registered producer: {}", producer.name);
        producers.push(producer);
    }

    pub fn set_active(&self, name: &str, is_active: bool) -> Result<(), ProducerError> {
        let mut producers = self.producers.write();
        let producer = producers
            .iter_mut()
            .find(|p| p.name == name)
            .ok_or_else(|| ProducerError::NotFound(name.to_string()))?;
        producer.is_active = is_active;
        Ok(())
    }
}

impl ProducerDirectory for MemoryProducerDirectory {
    fn producers(&self) -> Vec<Producer> {
        self.producers.read().clone()
    }
}
