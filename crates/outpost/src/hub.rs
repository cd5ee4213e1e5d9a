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

//! # Dispatch Hub
//!
//! Wires the collaborators the controllers depend on: the model registry, the record
//! stores, the register store, the transaction log, the producer directory and the
//! crypt resolver. Controllers are created from a hub and share its configuration.
//!
//! ```rust,ignore
//! let hub = DispatchHub::builder()
//!     .models(models)
//!     .store(central_store)
//!     .store(netbook_store)
//!     .registers(Arc::new(SqliteDAL::open("registers.db", 4)?))
//!     .transactions(transaction_log)
//!     .producers(producers)
//!     .config(DispatchConfig::from_env()?)
//!     .build()?;
//!
//! let mut controller = hub.dispatch_controller(
//!     DispatchParams::new("netbook-01").container(household, "household_identifier", "HH-01"),
//! )?;
//! controller.dispatch()?;
//! ```

use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::controller::guard::OwnershipGuard;
use crate::controller::reconcile::{self, ReconcileReport};
use crate::controller::registry::ControllerRegistry;
use crate::controller::serializer::{Serializer, TransferOptions, TransferReport};
use crate::controller::session::SessionContainer;
use crate::controller::{DispatchController, DispatchParams, ReturnController};
use crate::crypt::{crypt_model, CryptResolver, StoreCryptResolver};
use crate::dal::RegisterStore;
use crate::error::DispatchError;
use crate::models::{BaseModel, ItemRegister, ModelRegistry, Record};
use crate::producer::ProducerDirectory;
use crate::store::{Store, StoreRouter};
use crate::transaction_log::TransactionLog;

#[derive(Clone)]
pub struct DispatchHub {
    models: Arc<ModelRegistry>,
    stores: StoreRouter,
    registers: Arc<dyn RegisterStore>,
    transactions: Arc<dyn TransactionLog>,
    producers: Arc<dyn ProducerDirectory>,
    crypt: Arc<dyn CryptResolver>,
    controllers: Arc<ControllerRegistry>,
    config: DispatchConfig,
}

impl DispatchHub {
    pub fn builder() -> DispatchHubBuilder {
        DispatchHubBuilder::default()
    }

    pub fn models(&self) -> &Arc<ModelRegistry> {
        &self.models
    }

    pub fn stores(&self) -> &StoreRouter {
        &self.stores
    }

    pub fn registers(&self) -> &Arc<dyn RegisterStore> {
        &self.registers
    }

    pub fn transactions(&self) -> &Arc<dyn TransactionLog> {
        &self.transactions
    }

    pub fn producers(&self) -> &Arc<dyn ProducerDirectory> {
        &self.producers
    }

    pub fn crypt(&self) -> &Arc<dyn CryptResolver> {
        &self.crypt
    }

    pub fn controllers(&self) -> &Arc<ControllerRegistry> {
        &self.controllers
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// The store dispatches read from.
    pub fn source_store(&self) -> Result<Arc<dyn Store>, DispatchError> {
        self.stores.using(self.config.source_key())
    }

    /// Ownership guard over the source store.
    pub fn guard(&self) -> Result<OwnershipGuard<'_>, DispatchError> {
        Ok(OwnershipGuard::new(self, self.source_store()?))
    }

    pub fn dispatch_controller(
        &self,
        params: DispatchParams,
    ) -> Result<DispatchController, DispatchError> {
        DispatchController::new(self.clone(), params)
    }

    pub fn return_controller(&self, channel_key: &str) -> Result<ReturnController, DispatchError> {
        ReturnController::new(self.clone(), channel_key)
    }

    /// Producer holding `record`, if it is dispatched.
    pub fn dispatched_to(&self, record: &Record) -> Result<Option<String>, DispatchError> {
        self.guard()?.dispatched_to(record)
    }

    pub fn is_dispatched(&self, record: &Record) -> Result<bool, DispatchError> {
        self.guard()?.is_dispatched(record)
    }

    /// Refuses central edits of dispatched records.
    pub fn ensure_editable(
        &self,
        record: &Record,
        update_fields: Option<&[String]>,
    ) -> Result<(), DispatchError> {
        self.guard()?.ensure_editable(record, update_fields)
    }

    /// Item registers of a producer.
    pub fn registered_items(
        &self,
        producer: &str,
        dispatched_only: bool,
    ) -> Result<Vec<ItemRegister>, DispatchError> {
        Ok(self.registers.items_for_producer(producer, dispatched_only)?)
    }

    /// Checks dispatched items against producer stores.
    pub fn reconcile(&self, producer: Option<&str>) -> Result<ReconcileReport, DispatchError> {
        reconcile::reconcile(self, producer)
    }

    /// Copies every crypt companion record to a producer store.
    pub fn import_crypt(&self, channel_key: &str) -> Result<TransferReport, DispatchError> {
        let source_key = self.config.source_key();
        if source_key == channel_key {
            return Err(DispatchError::SourceIsDestination(channel_key.to_string()));
        }
        let source = self.source_store()?;
        let destination = self.stores.using(channel_key)?;
        let records = source.all(&crypt_model())?;
        let serializer = Serializer::new(self, source_key, source, destination);
        let report = serializer.closure_and_transfer(
            &records,
            &TransferOptions::new(&[BaseModel::Crypt]),
            &mut SessionContainer::new(),
        )?;
        tracing::info!(
            channel_key = %channel_key,
            written = report.written,
            accepted = report.accepted_duplicates,
            "Imported crypt records"
        );
        Ok(report)
    }
}

impl std::fmt::Debug for DispatchHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DispatchHub")
            .field("models", &self.models)
            .field("stores", &self.stores)
            .field("config", &self.config)
            .finish()
    }
}

/// Builder for [`DispatchHub`].
#[derive(Default)]
pub struct DispatchHubBuilder {
    models: Option<Arc<ModelRegistry>>,
    stores: StoreRouter,
    registers: Option<Arc<dyn RegisterStore>>,
    transactions: Option<Arc<dyn TransactionLog>>,
    producers: Option<Arc<dyn ProducerDirectory>>,
    crypt: Option<Arc<dyn CryptResolver>>,
    controllers: Option<Arc<ControllerRegistry>>,
    config: DispatchConfig,
}

impl DispatchHubBuilder {
    pub fn models(mut self, models: Arc<ModelRegistry>) -> Self {
        self.models = Some(models);
        self
    }

    /// Adds a store under its own name.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.stores.add(store);
        self
    }

    pub fn store_as(mut self, key: impl Into<String>, store: Arc<dyn Store>) -> Self {
        self.stores.insert(key, store);
        self
    }

    pub fn registers(mut self, registers: Arc<dyn RegisterStore>) -> Self {
        self.registers = Some(registers);
        self
    }

    pub fn transactions(mut self, transactions: Arc<dyn TransactionLog>) -> Self {
        self.transactions = Some(transactions);
        self
    }

    pub fn producers(mut self, producers: Arc<dyn ProducerDirectory>) -> Self {
        self.producers = Some(producers);
        self
    }

    /// Defaults to a [`StoreCryptResolver`] over the source store.
    pub fn crypt(mut self, crypt: Arc<dyn CryptResolver>) -> Self {
        self.crypt = Some(crypt);
        self
    }

    /// Defaults to [`ControllerRegistry::global`].
    pub fn controllers(mut self, controllers: Arc<ControllerRegistry>) -> Self {
        self.controllers = Some(controllers);
        self
    }

    pub fn config(mut self, config: DispatchConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<DispatchHub, DispatchError> {
        let source = self.stores.using(self.config.source_key()).map_err(|_| {
            DispatchError::ImproperlyConfigured(format!(
                "Source store '{}' is not configured",
                self.config.source_key()
            ))
        })?;
        let registers = self.registers.ok_or_else(|| {
            DispatchError::ImproperlyConfigured("A register store is required".to_string())
        })?;
        let transactions = self.transactions.ok_or_else(|| {
            DispatchError::ImproperlyConfigured("A transaction log is required".to_string())
        })?;
        let producers = self.producers.ok_or_else(|| {
            DispatchError::ImproperlyConfigured("A producer directory is required".to_string())
        })?;
        let crypt = self
            .crypt
            .unwrap_or_else(|| Arc::new(StoreCryptResolver::new(source)));

        Ok(DispatchHub {
            models: self
                .models
                .unwrap_or_else(|| Arc::new(ModelRegistry::new())),
            stores: self.stores,
            registers,
            transactions,
            producers,
            crypt,
            controllers: self.controllers.unwrap_or_else(ControllerRegistry::global),
            config: self.config,
        })
    }
}
