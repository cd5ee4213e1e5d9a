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

//! Return controller behavior.

use crate::fixtures::*;
use outpost::models::register::container_register_model;
use outpost::models::NaturalKey;
use outpost::{
    DispatchConfig, DispatchError, DispatchHub, ItemDispatchOptions, ModelKey, Query, Record,
    RecordId, RegisterStore, SaveOutcome, Store, StoreError,
};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing_test::traced_test;

#[test]
fn test_return_everything() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let first = fixture.member(&household, "Tumelo", &[]);
    let second = fixture.member(&household, "Kagiso", &[]);
    fixture.household("HH-02");

    let mut controller = fixture.dispatched("HH-01");
    controller
        .dispatch_user_items_as_json(&[first, second], None, &ItemDispatchOptions::default())
        .unwrap();
    drop(controller);
    drop(fixture.dispatched("HH-02"));

    let returner = fixture.hub.return_controller(NETBOOK).unwrap();
    let report = returner.return_dispatched_items(None).unwrap();
    assert_eq!(
        report.message,
        "All containers have been returned from producer 'netbook-01'"
    );
    assert_eq!(report.items_returned, 4);
    assert_eq!(report.containers.len(), 2);

    assert!(fixture
        .registers
        .dispatched_containers("netbook-01", None)
        .unwrap()
        .is_empty());
    let items = fixture
        .registers
        .items_for_producer("netbook-01", false)
        .unwrap();
    assert_eq!(items.len(), 4);
    assert!(items
        .iter()
        .all(|i| !i.is_dispatched && i.return_datetime.is_some()));

    // The register rows are left on the producer.
    assert_eq!(fixture.netbook.count(&container_register_model()), 2);
}

#[test]
fn test_lock_step_refreshes_register_copy() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");

    drop(fixture.dispatched("HH-01"));
    fixture
        .hub
        .return_controller(NETBOOK)
        .unwrap()
        .return_dispatched_items(None)
        .unwrap();

    let controller = fixture.dispatched("HH-01");
    let register = controller.container_register().unwrap().clone();
    drop(controller);
    fixture
        .hub
        .return_controller(NETBOOK)
        .unwrap()
        .return_dispatched_items(None)
        .unwrap();

    assert_eq!(fixture.netbook.count(&container_register_model()), 1);
    let copy = fixture
        .netbook
        .get(&container_register_model(), RecordId(register.id))
        .unwrap()
        .unwrap();
    let expected = register.dispatch_datetime.map(|d| d.to_rfc3339());
    assert_eq!(
        copy.get("dispatch_datetime").and_then(Value::as_str),
        expected.as_deref()
    );
    assert_eq!(
        copy.get("container_identifier").and_then(Value::as_str),
        Some("HH-01")
    );
}

#[test]
fn test_return_selection() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let first = fixture.member(&household, "Tumelo", &[]);
    let second = fixture.member(&household, "Kagiso", &[]);

    let mut controller = fixture.dispatched("HH-01");
    controller
        .dispatch_user_items_as_json(
            &[first.clone(), second.clone()],
            None,
            &ItemDispatchOptions::default(),
        )
        .unwrap();
    drop(controller);

    let returner = fixture.hub.return_controller(NETBOOK).unwrap();
    let report = returner
        .return_dispatched_items(Some(std::slice::from_ref(&first)))
        .unwrap();
    assert_eq!(report.items_returned, 1);
    assert!(report.containers.is_empty());
    assert_eq!(
        report.message,
        "1 item(s) have been returned from producer 'netbook-01'"
    );

    let guard = fixture.hub.guard().unwrap();
    assert!(!guard.is_dispatched_as_item(&first, true).unwrap());
    assert!(guard.is_dispatched_as_item(&second, true).unwrap());
    assert!(guard.is_dispatched_as_container(&household).unwrap());

    // Records the producer does not hold are ignored.
    let report = returner
        .return_dispatched_items(Some(&[first.clone(), second.clone(), household.clone()]))
        .unwrap();
    assert_eq!(report.items_returned, 2);
    assert_eq!(report.containers, vec!["HH-01".to_string()]);
    assert_eq!(
        report.message,
        "Containers [\"HH-01\"], have been returned from producer 'netbook-01'"
    );
    assert!(!guard.is_dispatched_as_container(&household).unwrap());
}

#[test]
fn test_return_selected_containers() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    let other = fixture.household("HH-02");
    drop(fixture.dispatched("HH-01"));
    drop(fixture.dispatched("HH-02"));

    let returner = fixture.hub.return_controller(NETBOOK).unwrap();
    assert!(matches!(
        returner.return_selected_items(&[]),
        Err(DispatchError::MissingParameter(_))
    ));
    assert!(matches!(
        returner.return_selected_items(&["HH-01".to_string(), "HH-77".to_string()]),
        Err(DispatchError::AlreadyReturned(_))
    ));
    assert_eq!(
        fixture
            .registers
            .dispatched_containers("netbook-01", None)
            .unwrap()
            .len(),
        2
    );

    let report = returner
        .return_selected_items(&["HH-01".to_string()])
        .unwrap();
    assert_eq!(report.containers, vec!["HH-01".to_string()]);
    assert_eq!(report.items_returned, 1);

    let remaining = fixture
        .registers
        .dispatched_containers("netbook-01", None)
        .unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].container_pk, other.pk);

    assert!(matches!(
        returner.return_selected_items(&["HH-01".to_string()]),
        Err(DispatchError::AlreadyReturned(_))
    ));
}

#[test]
fn test_pending_transactions_block_return() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    drop(fixture.dispatched("HH-01"));

    fixture.transactions.push_outgoing(NETBOOK, household_model());
    let returner = fixture.hub.return_controller(NETBOOK).unwrap();
    let err = returner.return_dispatched_items(None).unwrap_err();
    assert!(err.is_pending_work());
    assert_eq!(
        err.to_string(),
        "Producer 'netbook-01' has pending outgoing transactions. Run sync first."
    );

    fixture.transactions.consume_all();
    fixture
        .transactions
        .push_incoming("netbook-01", CENTRAL, member_model());
    let err = returner
        .return_selected_items(&["HH-01".to_string()])
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Producer 'netbook-01' has pending incoming transactions. Run sync first."
    );
    assert_eq!(
        fixture
            .registers
            .dispatched_containers("netbook-01", None)
            .unwrap()
            .len(),
        1
    );

    fixture.transactions.consume_all();
    assert!(returner.return_dispatched_items(None).is_ok());
}

#[test]
fn test_return_controller_shares_channel_registry() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    let controller = fixture.controller("HH-01").unwrap();

    assert!(matches!(
        fixture.hub.return_controller(NETBOOK),
        Err(DispatchError::ControllerAlreadyRegistered(_))
    ));
    drop(controller);
    assert!(fixture.hub.return_controller(NETBOOK).is_ok());
    assert!(matches!(
        fixture.hub.return_controller(CENTRAL),
        Err(DispatchError::SourceIsDestination(_))
    ));
}

#[test]
#[traced_test]
fn test_failed_lock_step_is_logged() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    drop(fixture.dispatched("HH-01"));

    let hub = DispatchHub::builder()
        .models(fixture.models.clone())
        .store(fixture.central.clone())
        .store_as(NETBOOK, Arc::new(UnreachableStore))
        .registers(fixture.registers.clone())
        .transactions(fixture.transactions.clone())
        .producers(fixture.producers.clone())
        .controllers(fixture.controllers.clone())
        .config(
            DispatchConfig::builder()
                .dispatch_app_labels(["household"])
                .build(),
        )
        .build()
        .unwrap();

    let report = hub
        .return_controller(NETBOOK)
        .unwrap()
        .return_dispatched_items(None)
        .unwrap();
    assert_eq!(report.containers, vec!["HH-01".to_string()]);
    assert!(!fixture.hub.is_dispatched(&household).unwrap());
    assert!(logs_contain("Failed to save container register on producer"));
}

/// Producer store rejecting every write.
struct UnreachableStore;

fn unreachable() -> StoreError {
    StoreError::Backend("device unreachable".to_string())
}

impl Store for UnreachableStore {
    fn name(&self) -> &str {
        NETBOOK
    }

    fn get(&self, _model: &ModelKey, _pk: RecordId) -> Result<Option<Record>, StoreError> {
        Ok(None)
    }

    fn get_by_natural_key(
        &self,
        _model: &ModelKey,
        _key: &NaturalKey,
    ) -> Result<Option<Record>, StoreError> {
        Ok(None)
    }

    fn filter(&self, _model: &ModelKey, _query: &Query) -> Result<Vec<Record>, StoreError> {
        Ok(Vec::new())
    }

    fn save(&self, _record: &Record) -> Result<SaveOutcome, StoreError> {
        Err(unreachable())
    }

    fn get_or_create(
        &self,
        _model: &ModelKey,
        _query: &Query,
        _defaults: Record,
    ) -> Result<(Record, bool), StoreError> {
        Err(unreachable())
    }

    fn update(
        &self,
        _model: &ModelKey,
        _query: &Query,
        _changes: &Map<String, Value>,
    ) -> Result<usize, StoreError> {
        Err(unreachable())
    }

    fn set_m2m(
        &self,
        _model: &ModelKey,
        _pk: RecordId,
        _relation: &str,
        _related: &[RecordId],
    ) -> Result<(), StoreError> {
        Err(unreachable())
    }
}
