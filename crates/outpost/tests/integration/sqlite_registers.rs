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

//! Dispatch registers persisted in SQLite.

use crate::fixtures::*;
use chrono::Utc;
use outpost::models::register::{NewContainerRegister, NewItemRegister};
use outpost::{ItemDispatchOptions, RecordId, RegisterError, RegisterStore, SqliteDAL};
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn open_dal(dir: &TempDir) -> SqliteDAL {
    let path = dir.path().join("registers.db");
    SqliteDAL::open(path.to_str().unwrap(), 4).expect("Failed to open register database")
}

fn new_container(identifier: &str, pk: RecordId) -> NewContainerRegister {
    NewContainerRegister {
        producer: "netbook-01".to_string(),
        container_model: household_model(),
        container_identifier_attr: "household_identifier".to_string(),
        container_identifier: identifier.to_string(),
        container_pk: pk,
        dispatched_using: Some(NETBOOK.to_string()),
    }
}

fn new_item(container_register_id: uuid::Uuid, identifier: &str, pk: RecordId) -> NewItemRegister {
    NewItemRegister {
        container_register_id,
        producer: "netbook-01".to_string(),
        item_model: member_model(),
        item_identifier_attr: "member_identifier".to_string(),
        item_identifier: identifier.to_string(),
        item_pk: pk,
        dispatch_host: Some("central-server".to_string()),
        dispatch_using: Some(NETBOOK.to_string()),
    }
}

#[test]
fn test_container_register_lifecycle() {
    let dir = TempDir::new().unwrap();
    let dal = open_dal(&dir);
    let pk = RecordId::new_v4();

    let (created, is_new) = dal.get_or_create_container(new_container("HH-01", pk)).unwrap();
    assert!(is_new);
    assert!(created.is_dispatched);
    assert!(created.return_datetime.is_none());

    let (again, is_new) = dal.get_or_create_container(new_container("HH-01", pk)).unwrap();
    assert!(!is_new);
    assert_eq!(again.id, created.id);

    let mut elsewhere = new_container("HH-01", pk);
    elsewhere.producer = "netbook-02".to_string();
    assert!(matches!(
        dal.get_or_create_container(elsewhere),
        Err(RegisterError::ContainerDispatchedElsewhere { .. })
    ));

    assert_eq!(
        dal.find_dispatched_container(&household_model(), "HH-01")
            .unwrap()
            .map(|r| r.id),
        Some(created.id)
    );
    assert_eq!(
        dal.dispatched_containers("netbook-01", Some(&["HH-01".to_string()]))
            .unwrap()
            .len(),
        1
    );
    assert!(dal
        .dispatched_containers("netbook-01", Some(&["HH-02".to_string()]))
        .unwrap()
        .is_empty());

    assert_eq!(dal.return_container(created.id, Utc::now()).unwrap(), 0);
    let returned = dal.get_container(created.id).unwrap().unwrap();
    assert!(!returned.is_dispatched);
    assert!(returned.return_datetime.is_some());
    assert!(dal
        .find_dispatched_container(&household_model(), "HH-01")
        .unwrap()
        .is_none());
    assert_eq!(
        dal.find_container(&household_model(), pk)
            .unwrap()
            .map(|r| r.id),
        Some(created.id)
    );

    // A returned container is reactivated, possibly for another producer.
    let mut elsewhere = new_container("HH-01", pk);
    elsewhere.producer = "netbook-02".to_string();
    let (reactivated, is_new) = dal.get_or_create_container(elsewhere).unwrap();
    assert!(!is_new);
    assert_eq!(reactivated.id, created.id);
    assert_eq!(reactivated.producer, "netbook-02");
    assert!(reactivated.return_datetime.is_none());
}

#[test]
fn test_item_register_lifecycle() {
    let dir = TempDir::new().unwrap();
    let dal = open_dal(&dir);
    let (container, _) = dal
        .get_or_create_container(new_container("HH-01", RecordId::new_v4()))
        .unwrap();
    let first_pk = RecordId::new_v4();
    let second_pk = RecordId::new_v4();

    let (first, is_new) = dal
        .get_or_create_item(new_item(container.id, "M-01", first_pk))
        .unwrap();
    assert!(is_new);
    let (second, _) = dal
        .get_or_create_item(new_item(container.id, "M-02", second_pk))
        .unwrap();
    let (again, is_new) = dal
        .get_or_create_item(new_item(container.id, "M-01", first_pk))
        .unwrap();
    assert!(!is_new);
    assert_eq!(again.id, first.id);

    assert_eq!(
        dal.find_dispatched_item(&member_model(), first_pk)
            .unwrap()
            .map(|i| i.id),
        Some(first.id)
    );
    assert_eq!(dal.items_for_container(container.id, true).unwrap().len(), 2);
    assert_eq!(dal.items_for_producer("netbook-01", true).unwrap().len(), 2);

    let now = Utc::now();
    assert_eq!(dal.return_items(&[first.id], now).unwrap(), 1);
    assert_eq!(dal.return_items(&[first.id], now).unwrap(), 0);
    assert!(dal
        .find_dispatched_item(&member_model(), first_pk)
        .unwrap()
        .is_none());
    assert!(!dal.close_container_if_empty(container.id, now).unwrap());

    assert_eq!(dal.return_items(&[second.id], now).unwrap(), 1);
    assert!(dal.close_container_if_empty(container.id, now).unwrap());
    assert!(!dal.get_container(container.id).unwrap().unwrap().is_dispatched);

    let items = dal.items_for_container(container.id, false).unwrap();
    assert_eq!(items.len(), 2);
    assert!(items
        .iter()
        .all(|i| !i.is_dispatched && i.return_datetime.is_some()));

    assert!(matches!(
        dal.get_or_create_item(new_item(uuid::Uuid::new_v4(), "M-03", RecordId::new_v4())),
        Err(RegisterError::NotFound(_))
    ));
}

#[test]
fn test_item_held_by_another_container() {
    let dir = TempDir::new().unwrap();
    let dal = open_dal(&dir);
    let (first, _) = dal
        .get_or_create_container(new_container("HH-01", RecordId::new_v4()))
        .unwrap();
    let (second, _) = dal
        .get_or_create_container(new_container("HH-02", RecordId::new_v4()))
        .unwrap();
    let pk = RecordId::new_v4();

    dal.get_or_create_item(new_item(first.id, "M-01", pk)).unwrap();
    match dal.get_or_create_item(new_item(second.id, "M-01", pk)) {
        Err(RegisterError::ItemDispatchedElsewhere {
            item_identifier,
            producer,
        }) => {
            assert_eq!(item_identifier, "M-01");
            assert_eq!(producer, "netbook-01");
        }
        other => panic!("unexpected result: {:?}", other),
    }

    // Once returned, the item may follow another container.
    dal.return_container(first.id, Utc::now()).unwrap();
    let (moved, is_new) = dal.get_or_create_item(new_item(second.id, "M-01", pk)).unwrap();
    assert!(is_new);
    assert_eq!(moved.container_register_id, second.id);
}

#[test]
fn test_concurrent_get_or_create_container() {
    let dir = TempDir::new().unwrap();
    let dal = Arc::new(open_dal(&dir));
    let pk = RecordId::new_v4();

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let dal = dal.clone();
            thread::spawn(move || dal.get_or_create_container(new_container("HH-01", pk)))
        })
        .collect();
    let results: Vec<_> = handles
        .into_iter()
        .map(|h| h.join().unwrap().unwrap())
        .collect();

    assert_eq!(results.iter().filter(|(_, created)| *created).count(), 1);
    let id = results[0].0.id;
    assert!(results.iter().all(|(register, _)| register.id == id));
    assert_eq!(dal.dispatched_containers("netbook-01", None).unwrap().len(), 1);
}

#[test]
fn test_dispatch_cycle_on_sqlite_registers() {
    let dir = TempDir::new().unwrap();
    let fixture = TestFixture::with_registers(Arc::new(open_dal(&dir)));
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

    assert!(fixture.hub.is_dispatched(&first).unwrap());
    assert_eq!(
        fixture
            .hub
            .registered_items("netbook-01", true)
            .unwrap()
            .len(),
        3
    );

    let report = fixture
        .hub
        .return_controller(NETBOOK)
        .unwrap()
        .return_dispatched_items(None)
        .unwrap();
    assert_eq!(report.items_returned, 3);
    assert!(!fixture.hub.is_dispatched(&first).unwrap());
    assert!(!fixture.hub.is_dispatched(&household).unwrap());

    // Reopening the database sees the same rows.
    let reopened = open_dal(&dir);
    let items = reopened.items_for_producer("netbook-01", false).unwrap();
    assert_eq!(items.len(), 3);
    assert!(items.iter().all(|i| !i.is_dispatched));
}
