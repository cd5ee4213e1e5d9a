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

//! # Controllers
//!
//! A dispatch controller checks a container and its items out to one producer; a
//! return controller checks them back in. Both run as synchronous sessions against a
//! (source, destination) store pair and are reachable through a
//! [`DispatchHub`](crate::hub::DispatchHub).
//!
//! ## Dispatch lifecycle
//!
//! ```text
//! Uninitialized -> Ready -> ContainerDispatched -> ItemsDispatching -> Complete
//! ```
//!
//! A controller built in retry mode starts in `ContainerDispatched` with the records
//! already held by the producer preloaded into its session.

pub mod dispatch;
pub mod guard;
pub mod reconcile;
pub mod registry;
pub mod return_controller;
pub mod serializer;
pub mod session;

use serde::Serialize;
use std::fmt;

pub use dispatch::{
    ContainerItemsHooks, DispatchController, DispatchHooks, DispatchOutcome, DispatchParams,
    ItemDispatchOptions,
};
pub use guard::OwnershipGuard;
pub use reconcile::{ReconcileEntry, ReconcileReport};
pub use registry::{ControllerRegistration, ControllerRegistry};
pub use return_controller::{ReturnController, ReturnReport};
pub use serializer::{SerializedRecord, Serializer, TransferOptions, TransferReport};
pub use session::{SessionContainer, SessionSummary};

/// State of a dispatch controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ControllerState {
    Uninitialized,
    /// Parameters validated and the channel claimed.
    Ready,
    /// The container register is active.
    ContainerDispatched,
    ItemsDispatching,
    Complete,
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Uninitialized => "uninitialized",
            ControllerState::Ready => "ready",
            ControllerState::ContainerDispatched => "container_dispatched",
            ControllerState::ItemsDispatching => "items_dispatching",
            ControllerState::Complete => "complete",
        };
        f.write_str(name)
    }
}
