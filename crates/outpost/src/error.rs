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

//! # Error Types
//!
//! Errors are layered the same way the components are:
//!
//! - [`StoreError`]: conflicts and failures reported by a record store, classified
//!   structurally (unique violation, missing foreign-key target, ...).
//! - [`RegisterError`]: failures of the register store, including the
//!   "already dispatched elsewhere" lost-race signal.
//! - [`LookupError`]: failures walking a container lookup path.
//! - [`CryptError`]: encrypted-field companion resolution failures.
//! - [`ProducerError`]: missing or ambiguous producers for a channel key.
//! - [`DispatchError`]: the top-level error returned by the controllers, the guard and
//!   the serializer. Every lower-level error converts into it.
//!
//! `DispatchError` carries classification helpers so callers can tell configuration
//! problems, ownership violations and pending-work blocks apart without matching on
//! every variant.

use thiserror::Error;

use crate::models::ModelKey;

/// Errors reported by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    /// A unique constraint (natural key or primary key) rejected the write.
    #[error("Unique constraint '{constraint}' violated on {model}")]
    UniqueViolation { model: ModelKey, constraint: String },

    /// A foreign-key field references a record that does not exist in this store.
    #[error("Foreign key {model}.{field} references missing {target}")]
    ForeignKeyViolation {
        model: ModelKey,
        field: String,
        target: ModelKey,
    },

    /// Any other integrity rule rejected the write.
    #[error("Integrity error on {model}: {message}")]
    Integrity { model: ModelKey, message: String },

    #[error("Record {model} with pk={pk} not found")]
    NotFound { model: ModelKey, pk: String },

    #[error("Model {0} is not known to this store")]
    UnknownModel(ModelKey),

    #[error("Store backend error: {0}")]
    Backend(String),
}

/// Errors reported by a [`RegisterStore`](crate::dal::RegisterStore).
#[derive(Debug, Error)]
pub enum RegisterError {
    /// Another active item register holds the same item identifier.
    #[error("Cannot dispatch. The item '{item_identifier}' is already dispatched to '{producer}'")]
    ItemDispatchedElsewhere {
        item_identifier: String,
        producer: String,
    },

    /// The container is currently dispatched to a different producer.
    #[error("Container '{container_identifier}' is already dispatched to '{producer}'")]
    ContainerDispatchedElsewhere {
        container_identifier: String,
        producer: String,
    },

    /// A row would break the `is_dispatched` / `return_datetime` pairing.
    #[error("Register invariant violated: {0}")]
    Invariant(String),

    #[error("Register row not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] diesel::r2d2::PoolError),

    #[error("Migration error: {0}")]
    Migration(String),

    #[error("Invalid stored value: {0}")]
    InvalidValue(String),
}

/// Errors raised while resolving a container lookup path.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LookupError {
    /// An intermediate foreign key on the path is not set.
    #[error("Unable to lookup the container {container} for {model}. Relation '{step}' is not set")]
    UnsetStep {
        container: ModelKey,
        model: ModelKey,
        step: String,
    },

    /// A step names a field that is not a foreign key on the current model.
    #[error("Model {model} has no relation named '{step}'")]
    UnknownRelation { model: ModelKey, step: String },

    /// A step points at a record missing from the store.
    #[error("Relation {model}.{step} points at missing record {pk}")]
    MissingTarget {
        model: ModelKey,
        step: String,
        pk: String,
    },

    /// The path ended on a model other than the declared container.
    #[error("Lookup for {model} ended on {found}, expected container {expected}")]
    WrongContainer {
        model: ModelKey,
        expected: ModelKey,
        found: ModelKey,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while resolving encrypted-field companion records.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CryptError {
    /// A non-empty encrypted value matched no hash strategy.
    #[error("Could not get a secret for field={field}, of model={model}")]
    Unresolved { model: ModelKey, field: String },

    #[error("Hash strategy '{0}' is not configured")]
    UnknownStrategy(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Errors raised while resolving the producer for a channel key.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProducerError {
    #[error("No active producer found for settings key '{0}'")]
    NotFound(String),

    #[error("Found {count} active producers for settings key '{channel_key}', expected exactly one")]
    Ambiguous { channel_key: String, count: usize },

    #[error("Producer '{0}' is not active")]
    Inactive(String),
}

/// Top-level error for dispatch and return operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    // Configuration errors
    #[error("Improperly configured: {0}")]
    ImproperlyConfigured(String),

    #[error("Missing required parameter '{0}'")]
    MissingParameter(&'static str),

    #[error("Source and destination may not be the same store. Got '{0}'")]
    SourceIsDestination(String),

    #[error("Store '{0}' is not configured")]
    UnknownStore(String),

    #[error("Model {0} is not registered")]
    UnknownModel(ModelKey),

    #[error("Model {model} is not configured for dispatch. Found {count} instance(s) that are not dispatchable")]
    NotDispatchable { model: ModelKey, count: usize },

    #[error("A controller is already registered for settings key '{0}'")]
    ControllerAlreadyRegistered(String),

    #[error(transparent)]
    Producer(#[from] ProducerError),

    // Ownership violations
    #[error("Model {model} instance {identifier} is already dispatched")]
    AlreadyDispatched { model: ModelKey, identifier: String },

    #[error("{0}")]
    AlreadyDispatchedItem(String),

    #[error("{0}")]
    AlreadyDispatchedContainer(String),

    #[error("{0}")]
    DispatchContainer(String),

    #[error("{0}")]
    DispatchItem(String),

    #[error("{0}")]
    ControllerNotReady(String),

    #[error("This controller has already returned its items. To dispatch new items, create a new instance")]
    AlreadyReturnedController,

    #[error("{0}")]
    AlreadyReturned(String),

    #[error("For dispatch, model {model} must be one of {allowed}")]
    BaseModel { model: ModelKey, allowed: String },

    // Pending work
    #[error("{0}")]
    PendingTransaction(String),

    // Transfer
    #[error("Unable to deserialize object. Tries exceeded on {model} pk={pk}. Got {reason}")]
    Deserialization {
        model: ModelKey,
        pk: String,
        reason: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Closure and resolution
    #[error(transparent)]
    Lookup(#[from] LookupError),

    #[error(transparent)]
    Crypt(#[from] CryptError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Register(#[from] RegisterError),
}

impl DispatchError {
    /// True for errors that can only be fixed by changing configuration or parameters.
    pub fn is_configuration_error(&self) -> bool {
        matches!(
            self,
            DispatchError::ImproperlyConfigured(_)
                | DispatchError::MissingParameter(_)
                | DispatchError::SourceIsDestination(_)
                | DispatchError::UnknownStore(_)
                | DispatchError::UnknownModel(_)
                | DispatchError::NotDispatchable { .. }
                | DispatchError::ControllerAlreadyRegistered(_)
                | DispatchError::Producer(_)
        )
    }

    /// True for violations of the dispatch ownership rules.
    pub fn is_ownership_violation(&self) -> bool {
        matches!(
            self,
            DispatchError::AlreadyDispatched { .. }
                | DispatchError::AlreadyDispatchedItem(_)
                | DispatchError::AlreadyDispatchedContainer(_)
                | DispatchError::DispatchContainer(_)
                | DispatchError::DispatchItem(_)
                | DispatchError::ControllerNotReady(_)
                | DispatchError::AlreadyReturnedController
                | DispatchError::AlreadyReturned(_)
                | DispatchError::BaseModel { .. }
                | DispatchError::Register(RegisterError::ItemDispatchedElsewhere { .. })
                | DispatchError::Register(RegisterError::ContainerDispatchedElsewhere { .. })
        )
    }

    /// True when the operation was blocked by unsynchronized transactions.
    pub fn is_pending_work(&self) -> bool {
        matches!(self, DispatchError::PendingTransaction(_))
    }
}
