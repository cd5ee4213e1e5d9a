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

//! Live controllers by channel key.
//!
//! At most one controller may work a channel at a time. Constructing a controller
//! registers it; the returned [`ControllerRegistration`] deregisters on drop.

use once_cell::sync::Lazy;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::DispatchError;

static GLOBAL_CONTROLLER_REGISTRY: Lazy<Arc<ControllerRegistry>> =
    Lazy::new(|| Arc::new(ControllerRegistry::new()));

#[derive(Debug, Default)]
pub struct ControllerRegistry {
    active: Mutex<HashMap<String, &'static str>>,
}

impl ControllerRegistry {
    /// Creates an isolated registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<ControllerRegistry> {
        GLOBAL_CONTROLLER_REGISTRY.clone()
    }

    /// Claims `channel_key` for a controller of the given kind.
    pub fn register(
        self: &Arc<Self>,
        channel_key: &str,
        kind: &'static str,
    ) -> Result<ControllerRegistration, DispatchError> {
        let mut active = self.active.lock();
        if let Some(existing) = active.get(channel_key) {
            tracing::debug!(
                "Controller already registered: {} ({})",
                channel_key,
                existing
            );
            return Err(DispatchError::ControllerAlreadyRegistered(
                channel_key.to_string(),
            ));
        }
        active.insert(channel_key.to_string(), kind);
        tracing::debug!("Registered controller: {} ({})", channel_key, kind);
        Ok(ControllerRegistration {
            registry: Arc::clone(self),
            channel_key: channel_key.to_string(),
        })
    }

    pub fn is_registered(&self, channel_key: &str) -> bool {
        self.active.lock().contains_key(channel_key)
    }

    /// Registered channel keys, sorted.
    pub fn registered(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.active.lock().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn deregister(&self, channel_key: &str) {
        if self.active.lock().remove(channel_key).is_some() {
            tracing::debug!("Deregistered controller: {}", channel_key);
        }
    }

    #[cfg(test)]
    pub(crate) fn clear(&self) {
        self.active.lock().clear();
    }
}

/// Holds a channel key in a [`ControllerRegistry`] for as long as it lives.
#[derive(Debug)]
pub struct ControllerRegistration {
    registry: Arc<ControllerRegistry>,
    channel_key: String,
}

impl ControllerRegistration {
    pub fn channel_key(&self) -> &str {
        &self.channel_key
    }
}

impl Drop for ControllerRegistration {
    fn drop(&mut self) {
        self.registry.deregister(&self.channel_key);
    }
}
