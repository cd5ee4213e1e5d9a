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

//! # Model Registry
//!
//! Maps model keys to their [`Dispatchable`] implementations. Stores, the guard and the
//! serializer all resolve model behavior through a shared registry. The crypt companion
//! model and the container register record model are registered in every registry.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use super::register::container_register_definition;
use super::schema::Dispatchable;
use super::ModelKey;
use crate::crypt::crypt_definition;
use crate::error::DispatchError;

pub struct ModelRegistry {
    models: RwLock<HashMap<ModelKey, Arc<dyn Dispatchable>>>,
}

impl ModelRegistry {
    /// Creates a registry holding the builtin models.
    pub fn new() -> Self {
        let registry = Self {
            models: RwLock::new(HashMap::new()),
        };
        registry.register(crypt_definition());
        registry.register(container_register_definition());
        registry
    }

    /// Registers a model, replacing any previous registration under the same key.
    pub fn register<D: Dispatchable + 'static>(&self, model: D) {
        self.register_arc(Arc::new(model));
    }

    pub fn register_arc(&self, model: Arc<dyn Dispatchable>) {
        let key = model.model_key().clone();
        self.models.write().insert(key.clone(), model);
        tracing::debug!("Registered model: {}", key);
    }

    pub fn get(&self, key: &ModelKey) -> Result<Arc<dyn Dispatchable>, DispatchError> {
        self.try_get(key)
            .ok_or_else(|| DispatchError::UnknownModel(key.clone()))
    }

    pub fn try_get(&self, key: &ModelKey) -> Option<Arc<dyn Dispatchable>> {
        self.models.read().get(key).cloned()
    }

    pub fn contains(&self, key: &ModelKey) -> bool {
        self.models.read().contains_key(key)
    }

    /// All registered model keys, sorted.
    pub fn keys(&self) -> Vec<ModelKey> {
        let mut keys: Vec<ModelKey> = self.models.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("models", &self.keys())
            .finish()
    }
}
