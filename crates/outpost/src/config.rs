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

//! Configuration for dispatch and return controllers.
//!
//! ```rust
//! use outpost::DispatchConfig;
//!
//! let config = DispatchConfig::builder()
//!     .dispatch_app_labels(["household", "subject"])
//!     .dispatch_host("central-01")
//!     .build();
//! assert_eq!(config.source_key(), "default");
//! ```

use std::env;

use crate::error::DispatchError;

/// Settings shared by every controller created from a hub.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct DispatchConfig {
    dispatch_app_labels: Vec<String>,
    source_key: String,
    dispatch_host: Option<String>,
    max_apply_passes: usize,
    retain_session_on_complete: bool,
}

impl DispatchConfig {
    /// Creates a new configuration builder with default values.
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Loads configuration from the environment, reading a `.env` file first when present.
    ///
    /// - `OUTPOST_DISPATCH_APP_LABELS`: comma separated app labels
    /// - `OUTPOST_SOURCE_KEY`: key of the source store
    /// - `OUTPOST_DISPATCH_HOST`: host recorded on item registers, `HOSTNAME` otherwise
    /// - `OUTPOST_MAX_APPLY_PASSES`: cap on serializer apply passes
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, DispatchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut builder = Self::builder();
        if let Some(labels) = lookup("OUTPOST_DISPATCH_APP_LABELS") {
            builder = builder.dispatch_app_labels(
                labels
                    .split(',')
                    .map(str::trim)
                    .filter(|l| !l.is_empty())
                    .map(String::from)
                    .collect::<Vec<_>>(),
            );
        }
        if let Some(key) = lookup("OUTPOST_SOURCE_KEY") {
            builder = builder.source_key(key);
        }
        if let Some(host) = lookup("OUTPOST_DISPATCH_HOST").or_else(|| lookup("HOSTNAME")) {
            builder = builder.dispatch_host(host);
        }
        if let Some(passes) = lookup("OUTPOST_MAX_APPLY_PASSES") {
            let passes = passes.trim().parse::<usize>().map_err(|e| {
                DispatchError::ImproperlyConfigured(format!(
                    "OUTPOST_MAX_APPLY_PASSES must be a positive integer, got '{}': {}",
                    passes, e
                ))
            })?;
            builder = builder.max_apply_passes(passes);
        }
        Ok(builder.build())
    }

    /// App labels whose models are dispatchable unless they opt out.
    pub fn dispatch_app_labels(&self) -> &[String] {
        &self.dispatch_app_labels
    }

    /// Key of the store dispatches are read from.
    pub fn source_key(&self) -> &str {
        &self.source_key
    }

    /// Host name recorded on item registers.
    pub fn dispatch_host(&self) -> Option<&str> {
        self.dispatch_host.as_deref()
    }

    /// Maximum number of apply passes before the serializer gives up.
    pub fn max_apply_passes(&self) -> usize {
        self.max_apply_passes
    }

    /// Keep the session sets of a controller once it completes.
    pub fn retain_session_on_complete(&self) -> bool {
        self.retain_session_on_complete
    }
}

/// Builder for [`DispatchConfig`].
#[derive(Debug, Clone)]
pub struct DispatchConfigBuilder {
    config: DispatchConfig,
}

impl Default for DispatchConfigBuilder {
    fn default() -> Self {
        Self {
            config: DispatchConfig {
                dispatch_app_labels: Vec::new(),
                source_key: "default".to_string(),
                dispatch_host: None,
                max_apply_passes: 20,
                retain_session_on_complete: true,
            },
        }
    }
}

impl DispatchConfigBuilder {
    pub fn dispatch_app_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.dispatch_app_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    pub fn source_key(mut self, key: impl Into<String>) -> Self {
        self.config.source_key = key.into();
        self
    }

    pub fn dispatch_host(mut self, host: impl Into<String>) -> Self {
        self.config.dispatch_host = Some(host.into());
        self
    }

    /// Sets the apply pass cap. Zero is raised to one.
    pub fn max_apply_passes(mut self, passes: usize) -> Self {
        self.config.max_apply_passes = passes.max(1);
        self
    }

    pub fn retain_session_on_complete(mut self, retain: bool) -> Self {
        self.config.retain_session_on_complete = retain;
        self
    }

    pub fn build(self) -> DispatchConfig {
        self.config
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        DispatchConfigBuilder::default().build()
    }
}
