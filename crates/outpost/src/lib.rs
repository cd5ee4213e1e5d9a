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

//! # Outpost
//!
//! Offline-first dispatch and return of record containers. A container (a household,
//! a plot, a subject) is checked out to a producer device together with the items that
//! belong to it and everything those items reference. While checked out, the central
//! copies are read-only; returning the container hands ownership back.
//!
//! ## Key Features
//!
//! - Register store recording which containers and items are held by which producer,
//!   in memory or in SQLite through Diesel
//! - Serialization engine transferring records with their foreign-key closure and
//!   encrypted-field companions, keyed by natural keys
//! - Ownership guard rejecting double dispatch and central edits of dispatched records
//! - Dispatch and return controllers with a process-wide registry per channel key
//!
//! ## Example
//!
//! ```rust,ignore
//! use outpost::{DispatchHub, DispatchOutcome, DispatchParams};
//!
//! let mut controller = hub.dispatch_controller(
//!     DispatchParams::new("netbook-01")
//!         .container(household_model, "household_identifier", "HH-01")
//!         .hooks(Arc::new(ContainerItemsHooks::new([member_model]))),
//! )?;
//! match controller.dispatch()? {
//!     DispatchOutcome::Dispatched(msg) => println!("{}", msg),
//!     other => eprintln!("{}", other),
//! }
//! drop(controller);
//!
//! let report = hub.return_controller("netbook-01")?.return_dispatched_items(None)?;
//! ```

pub mod config;
pub mod controller;
pub mod crypt;
pub mod dal;
#[cfg(feature = "sqlite")]
pub mod database;
pub mod error;
pub mod hub;
pub mod models;
pub mod producer;
pub mod store;
pub mod transaction_log;

pub use config::{DispatchConfig, DispatchConfigBuilder};
pub use controller::{
    ContainerItemsHooks, ControllerRegistry, ControllerState, DispatchController, DispatchHooks,
    DispatchOutcome, DispatchParams, ItemDispatchOptions, OwnershipGuard, ReconcileReport,
    ReturnController, ReturnReport, SessionContainer, TransferReport,
};
pub use crypt::{CryptResolver, HashStrategy, StoreCryptResolver};
pub use dal::{MemoryRegisterStore, RegisterStore};
#[cfg(feature = "sqlite")]
pub use dal::SqliteDAL;
#[cfg(feature = "sqlite")]
pub use database::Database;
pub use error::{
    CryptError, DispatchError, LookupError, ProducerError, RegisterError, StoreError,
};
pub use hub::{DispatchHub, DispatchHubBuilder};
pub use models::{
    BaseModel, ContainerRegister, Dispatchable, FieldSpec, ItemRegister, LookupPath, ModelKey,
    ModelDefinition, ModelRegistry, ModelSchema, Record, RecordId,
};
pub use producer::{MemoryProducerDirectory, Producer, ProducerDirectory};
pub use store::{MemoryStore, Query, SaveOutcome, Store, StoreRouter};
pub use transaction_log::{MemoryTransactionLog, TransactionLog};

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs a fmt subscriber filtered at `level`. Without a level `RUST_LOG` is used,
/// falling back to `info`. Does nothing if a global subscriber is already set.
pub fn init_logging(level: Option<tracing::Level>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level.to_string()),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };

    let _ = tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .try_init();
}
