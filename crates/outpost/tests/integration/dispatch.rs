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

//! Dispatch controller construction, lifecycle and item checks.

use crate::fixtures::*;
use chrono::Utc;
use outpost::controller::ControllerState;
use outpost::{
    BaseModel, ContainerItemsHooks, DispatchController, DispatchError, DispatchHooks,
    DispatchOutcome, DispatchParams, ItemDispatchOptions, Producer, ProducerError, Record,
    RegisterStore, Store,
};
use outpost::models::NewContainerRegister;
use std::sync::{Arc, Mutex};

#[test]
fn test_missing_parameters() {
    let fixture = TestFixture::new();

    let err = fixture
        .hub
        .dispatch_controller(DispatchParams::new(NETBOOK))
        .unwrap_err();
    assert!(matches!(err, DispatchError::MissingParameter("container")));

    let err = fixture
        .hub
        .dispatch_controller(DispatchParams::new(NETBOOK).container(
            household_model(),
            "household_identifier",
            "",
        ))
        .unwrap_err();
    assert!(matches!(err, DispatchError::MissingParameter("identifier")));

    let err = fixture
        .hub
        .dispatch_controller(DispatchParams::new("").container(
            household_model(),
            "household_identifier",
            "HH-01",
        ))
        .unwrap_err();
    assert!(matches!(err, DispatchError::MissingParameter("destination")));
}

#[test]
fn test_configuration_errors() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");

    let err = fixture
        .hub
        .dispatch_controller(DispatchParams::new(CENTRAL).container(
            household_model(),
            "household_identifier",
            "HH-01",
        ))
        .unwrap_err();
    assert!(matches!(err, DispatchError::SourceIsDestination(_)));

    let err = fixture
        .hub
        .dispatch_controller(DispatchParams::new("tablet-09").container(
            household_model(),
            "household_identifier",
            "HH-01",
        ))
        .unwrap_err();
    assert!(matches!(err, DispatchError::UnknownStore(_)));

    let err = fixture
        .hub
        .dispatch_controller(DispatchParams::new(NETBOOK).container(
            member_model(),
            "household_identifier",
            "HH-01",
        ))
        .unwrap_err();
    assert!(matches!(err, DispatchError::ImproperlyConfigured(_)));

    let err = fixture
        .hub
        .dispatch_controller(DispatchParams::new(NETBOOK).container(
            plot_model(),
            "plot_identifier",
            "P-01",
        ))
        .unwrap_err();
    assert!(matches!(err, DispatchError::NotDispatchable { .. }));

    let err = fixture.controller("HH-99").unwrap_err();
    assert!(matches!(err, DispatchError::ImproperlyConfigured(_)));
    assert!(err.is_configuration_error());

    assert!(fixture.controllers.registered().is_empty());
    assert!(fixture
        .registers
        .items_for_producer("netbook-01", false)
        .unwrap()
        .is_empty());
}

#[test]
fn test_producer_must_be_unique_and_active() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");

    fixture.producers.set_active("netbook-01", false).unwrap();
    let err = fixture.controller("HH-01").unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Producer(ProducerError::NotFound(_))
    ));

    fixture.producers.set_active("netbook-01", true).unwrap();
    fixture.producers.add(Producer::new("netbook-01b", NETBOOK));
    let err = fixture.controller("HH-01").unwrap_err();
    assert!(matches!(
        err,
        DispatchError::Producer(ProducerError::Ambiguous { count: 2, .. })
    ));
}

#[test]
fn test_one_controller_per_channel() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    fixture.household("HH-02");

    let first = fixture.controller("HH-01").unwrap();
    assert_eq!(first.state(), ControllerState::Ready);
    assert!(fixture.controllers.is_registered(NETBOOK));

    let err = fixture.controller("HH-02").unwrap_err();
    assert!(matches!(err, DispatchError::ControllerAlreadyRegistered(_)));

    drop(first);
    assert!(!fixture.controllers.is_registered(NETBOOK));
    assert!(fixture.controller("HH-02").is_ok());
}

#[test]
fn test_dispatch_container() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");

    let mut controller = fixture.controller("HH-01").unwrap();
    let outcome = controller.dispatch().unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Dispatched("Successfully dispatched household.household HH-01".into())
    );
    assert_eq!(controller.state(), ControllerState::Complete);
    assert!(controller.is_ready().unwrap());

    let copy = fixture.netbook.get(&household_model(), household.pk).unwrap();
    assert_eq!(copy.unwrap().fields, household.fields);

    let register = controller.container_register().unwrap();
    assert_eq!(register.producer, "netbook-01");
    assert_eq!(register.container_identifier, "HH-01");
    assert_eq!(register.dispatched_using.as_deref(), Some(NETBOOK));

    let items = controller.get_registered_items().unwrap();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].item_pk, household.pk);
    assert_eq!(items[0].item_identifier, "HH-01");
    assert_eq!(items[0].dispatch_host.as_deref(), Some("central-server"));
    assert_eq!(controller.session().count(&household_model()), 1);
}

#[test]
fn test_dispatch_is_idempotent() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");

    let mut controller = fixture.dispatched("HH-01");
    let outcome = controller.dispatch().unwrap();
    assert!(outcome.is_dispatched());

    assert_eq!(fixture.netbook.count(&household_model()), 1);
    assert_eq!(
        fixture
            .registers
            .dispatched_containers("netbook-01", None)
            .unwrap()
            .len(),
        1
    );
    assert_eq!(controller.get_registered_items().unwrap().len(), 1);
    drop(controller);

    let mut again = fixture.controller("HH-01").unwrap();
    let outcome = again.dispatch().unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::AlreadyDispatched(
            "household.household 'HH-01' is already dispatched to producer 'netbook-01'.".into()
        )
    );
    assert!(!again.is_registered());
    assert!(!fixture.controllers.is_registered(NETBOOK));
}

#[test]
fn test_debug_mode_raises_for_dispatched_container() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    drop(fixture.dispatched("HH-01"));

    let mut controller = fixture
        .hub
        .dispatch_controller(fixture.params("HH-01").debug(true))
        .unwrap();
    let err = controller.dispatch().unwrap_err();
    assert!(matches!(err, DispatchError::AlreadyDispatchedContainer(_)));
    assert!(err.is_ownership_violation());
}

#[test]
fn test_pending_outgoing_blocks_dispatch() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    fixture.transactions.push_outgoing(NETBOOK, member_model());

    let mut controller = fixture.controller("HH-01").unwrap();
    let outcome = controller.dispatch().unwrap();
    assert_eq!(
        outcome,
        DispatchOutcome::Blocked(
            "Producer 'netbook-01' has pending outgoing transactions. Run sync first.".into()
        )
    );
    assert_eq!(controller.state(), ControllerState::Ready);
    assert!(controller.container_register().is_none());
    assert_eq!(fixture.netbook.count(&household_model()), 0);

    fixture.transactions.consume_outgoing(NETBOOK);
    assert!(controller.dispatch().unwrap().is_dispatched());
}

#[test]
fn test_items_require_dispatched_container() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let member = fixture.member(&household, "Tumelo", &[]);

    let mut controller = fixture.controller("HH-01").unwrap();
    let err = controller
        .dispatch_user_items_as_json(&[member], None, &ItemDispatchOptions::default())
        .unwrap_err();
    assert!(matches!(err, DispatchError::ControllerNotReady(_)));
    assert_eq!(fixture.netbook.count(&member_model()), 0);
}

#[test]
fn test_failed_container_transfer_releases_register() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    fixture
        .transactions
        .push_incoming(NETBOOK, CENTRAL, household_model());

    let mut controller = fixture.controller("HH-01").unwrap();
    let err = controller.dispatch().unwrap_err();
    assert!(matches!(err, DispatchError::PendingTransaction(_)));
    assert_eq!(controller.state(), ControllerState::Ready);
    assert!(controller.container_register().is_none());

    assert!(fixture
        .registers
        .dispatched_containers(NETBOOK, None)
        .unwrap()
        .is_empty());
    assert!(!fixture.hub.is_dispatched(&household).unwrap());
    assert_eq!(fixture.netbook.count(&household_model()), 0);

    let member = fixture.member(&household, "Tumelo", &[]);
    let err = controller
        .dispatch_user_items_as_json(&[member], None, &ItemDispatchOptions::default())
        .unwrap_err();
    assert!(matches!(err, DispatchError::ControllerNotReady(_)));

    fixture.transactions.consume_all();
    assert!(controller.dispatch().unwrap().is_dispatched());
    assert_eq!(
        fixture
            .registers
            .dispatched_containers(NETBOOK, None)
            .unwrap()
            .len(),
        1
    );
}

#[test]
fn test_items_require_container_item_register() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let member = fixture.member(&household, "Tumelo", &[]);
    fixture
        .registers
        .get_or_create_container(NewContainerRegister {
            producer: NETBOOK.to_string(),
            container_model: household_model(),
            container_identifier_attr: "household_identifier".to_string(),
            container_identifier: "HH-01".to_string(),
            container_pk: household.pk,
            dispatched_using: Some(NETBOOK.to_string()),
        })
        .unwrap();

    let mut controller = fixture
        .hub
        .dispatch_controller(fixture.params("HH-01").retry(true))
        .unwrap();
    assert_eq!(controller.state(), ControllerState::ContainerDispatched);

    let err = controller
        .dispatch_user_items_as_json(
            std::slice::from_ref(&member),
            None,
            &ItemDispatchOptions::default(),
        )
        .unwrap_err();
    match err {
        DispatchError::ControllerNotReady(message) => assert_eq!(
            message,
            "Controller is not ready. Container household.household 'HH-01' has not been dispatched as an item"
        ),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fixture.netbook.count(&member_model()), 0);
    assert!(fixture
        .registers
        .find_dispatched_item(&member_model(), member.pk)
        .unwrap()
        .is_none());
}

#[test]
fn test_dispatch_items() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let setswana = fixture.language("Setswana");
    let member = fixture.member(&household, "Tumelo", &[&setswana]);

    let mut controller = fixture.dispatched("HH-01");
    let report = controller
        .dispatch_user_items_as_json(
            std::slice::from_ref(&member),
            Some(&household),
            &ItemDispatchOptions::default(),
        )
        .unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(report.companions, 1);
    assert_eq!(report.m2m_links, 1);

    let copy = fixture
        .netbook
        .get(&member_model(), member.pk)
        .unwrap()
        .unwrap();
    assert_eq!(copy.fk("household"), Some(household.pk));
    assert_eq!(copy.m2m["languages"].len(), 1);
    assert_eq!(fixture.netbook.count(&outpost::crypt::crypt_model()), 1);

    let items = controller.get_registered_items().unwrap();
    assert_eq!(items.len(), 2);
    let registered = items.iter().find(|i| i.item_pk == member.pk).unwrap();
    assert_eq!(registered.item_identifier_attr, "pk");
    assert_eq!(registered.item_identifier, member.pk.to_string());
    assert!(controller.session().dispatched.contains(&member.reference()));
}

#[test]
fn test_item_set_checks() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let other = fixture.household("HH-02");
    let member = fixture.member(&household, "Tumelo", &[]);
    let note = Record::new(note_model())
        .with_fk("household", &household)
        .with("text", "Dog at the gate");
    fixture.central.save(&note).unwrap();

    let mut controller = fixture.dispatched("HH-01");
    let options = ItemDispatchOptions::default();

    let err = controller
        .dispatch_user_items_as_json(&[], None, &options)
        .unwrap_err();
    assert!(matches!(err, DispatchError::DispatchItem(_)));

    let err = controller
        .dispatch_user_items_as_json(std::slice::from_ref(&member), Some(&other), &options)
        .unwrap_err();
    assert!(matches!(err, DispatchError::DispatchContainer(_)));

    let register = controller.container_register().unwrap().to_record();
    let err = controller
        .dispatch_user_items_as_json(std::slice::from_ref(&member), Some(&register), &options)
        .unwrap_err();
    assert!(matches!(err, DispatchError::DispatchContainer(_)));

    let err = controller
        .dispatch_user_items_as_json(&[member.clone(), note.clone()], None, &options)
        .unwrap_err();
    assert!(matches!(err, DispatchError::DispatchItem(_)));

    let err = controller
        .dispatch_user_items_as_json(std::slice::from_ref(&note), None, &options)
        .unwrap_err();
    assert!(matches!(err, DispatchError::BaseModel { .. }));

    let err = controller
        .dispatch_user_items_as_json(std::slice::from_ref(&other), None, &options)
        .unwrap_err();
    assert!(matches!(err, DispatchError::DispatchItem(_)));

    assert_eq!(fixture.netbook.count(&member_model()), 0);
    assert_eq!(fixture.netbook.count(&note_model()), 0);
    assert_eq!(controller.get_registered_items().unwrap().len(), 1);

    let report = controller
        .dispatch_user_items_as_json(
            std::slice::from_ref(&note),
            None,
            &ItemDispatchOptions::new().additional_base_models(&[BaseModel::Sync]),
        )
        .unwrap();
    assert_eq!(report.written, 1);
    assert_eq!(controller.get_registered_items().unwrap().len(), 2);
}

#[test]
fn test_non_dispatchable_items_write_nothing() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    let plot = Record::new(plot_model()).with("plot_identifier", "P-01");
    fixture.central.save(&plot).unwrap();

    let mut controller = fixture.dispatched("HH-01");
    let err = controller
        .dispatch_user_items_as_json(&[plot], None, &ItemDispatchOptions::default())
        .unwrap_err();
    assert!(matches!(
        err,
        DispatchError::NotDispatchable { count: 1, .. }
    ));
    assert!(err.is_configuration_error());
    assert_eq!(fixture.netbook.count(&plot_model()), 0);
    assert_eq!(controller.get_registered_items().unwrap().len(), 1);
}

#[test]
fn test_item_of_another_container_is_rejected() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    let other = fixture.household("HH-02");
    let member = fixture.member(&other, "Kagiso", &[]);

    let mut controller = fixture.dispatched("HH-01");
    let err = controller
        .dispatch_user_items_as_json(&[member], None, &ItemDispatchOptions::default())
        .unwrap_err();
    assert!(matches!(err, DispatchError::DispatchContainer(_)));
    assert_eq!(fixture.netbook.count(&member_model()), 0);
}

#[test]
fn test_item_dispatched_under_another_container() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    fixture.household("HH-02");
    let device = Record::new(device_model()).with("serial", "SN-100");
    fixture.central.save(&device).unwrap();

    let mut first = fixture.dispatched("HH-01");
    first
        .dispatch_user_items_as_json(
            std::slice::from_ref(&device),
            None,
            &ItemDispatchOptions::default(),
        )
        .unwrap();
    drop(first);

    let mut second = fixture.dispatched("HH-02");
    let err = second
        .dispatch_user_items_as_json(
            std::slice::from_ref(&device),
            None,
            &ItemDispatchOptions::default(),
        )
        .unwrap_err();
    match err {
        DispatchError::AlreadyDispatchedItem(message) => assert_eq!(
            message,
            format!(
                "mobile.device '{}' is already dispatched to producer 'netbook-01'",
                device.pk
            )
        ),
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(second.get_registered_items().unwrap().len(), 1);
}

#[test]
fn test_controller_returned_elsewhere() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let member = fixture.member(&household, "Tumelo", &[]);

    let mut controller = fixture.dispatched("HH-01");
    let register = controller.container_register().unwrap().clone();
    fixture
        .registers
        .return_container(register.id, Utc::now())
        .unwrap();

    assert!(!controller.is_ready().unwrap());
    let err = controller
        .dispatch_user_items_as_json(&[member], None, &ItemDispatchOptions::default())
        .unwrap_err();
    assert!(matches!(err, DispatchError::AlreadyReturnedController));
}

#[test]
fn test_retry_preloads_dispatched_records() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let first = fixture.member(&household, "Tumelo", &[]);
    let second = fixture.member(&household, "Kagiso", &[]);

    let mut controller = fixture.dispatched("HH-01");
    controller
        .dispatch_user_items_as_json(
            std::slice::from_ref(&first),
            None,
            &ItemDispatchOptions::default(),
        )
        .unwrap();
    drop(controller);

    let mut retry = fixture
        .hub
        .dispatch_controller(fixture.params("HH-01").retry(true))
        .unwrap();
    assert_eq!(retry.state(), ControllerState::ContainerDispatched);
    assert!(retry.session().is_dispatched(&household));
    assert!(retry.session().is_dispatched(&first));
    assert_eq!(retry.session().count(&member_model()), 0);

    assert!(retry.dispatch().unwrap().is_dispatched());
    let report = retry
        .dispatch_user_items_as_json(&[first, second.clone()], None, &ItemDispatchOptions::default())
        .unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(retry.session().count(&member_model()), 1);
    assert_eq!(fixture.netbook.count(&member_model()), 2);
    assert_eq!(retry.get_registered_items().unwrap().len(), 3);
}

#[test]
fn test_retry_requires_dispatched_container() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");

    let err = fixture
        .hub
        .dispatch_controller(fixture.params("HH-01").retry(true))
        .unwrap_err();
    assert!(matches!(err, DispatchError::DispatchContainer(_)));
    assert!(!fixture.controllers.is_registered(NETBOOK));
}

#[derive(Default)]
struct RecordingHooks {
    calls: Mutex<Vec<(&'static str, ControllerState)>>,
}

impl DispatchHooks for RecordingHooks {
    fn pre_dispatch(&self, controller: &mut DispatchController) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push(("pre_dispatch", controller.state()));
        Ok(())
    }

    fn dispatch_prep(&self, controller: &mut DispatchController) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push(("dispatch_prep", controller.state()));
        controller.dispatch_model_as_json(&member_model(), None)?;
        Ok(())
    }

    fn post_dispatch(&self, controller: &mut DispatchController) -> Result<(), DispatchError> {
        self.calls
            .lock()
            .unwrap()
            .push(("post_dispatch", controller.state()));
        Ok(())
    }
}

#[test]
fn test_hooks_run_in_order() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    fixture.member(&household, "Tumelo", &[]);

    let hooks = Arc::new(RecordingHooks::default());
    let mut controller = fixture
        .hub
        .dispatch_controller(fixture.params("HH-01").hooks(hooks.clone()))
        .unwrap();
    assert!(controller.dispatch().unwrap().is_dispatched());

    let calls = hooks.calls.lock().unwrap().clone();
    assert_eq!(
        calls,
        vec![
            ("pre_dispatch", ControllerState::Ready),
            ("dispatch_prep", ControllerState::ItemsDispatching),
            ("post_dispatch", ControllerState::ItemsDispatching),
        ]
    );
    assert_eq!(controller.state(), ControllerState::Complete);
    assert_eq!(controller.get_registered_items().unwrap().len(), 2);
}

#[test]
fn test_container_items_hooks() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let other = fixture.household("HH-02");
    let site = fixture.site("S-01");
    let member = fixture.member(&household, "Tumelo", &[]);
    fixture.member(&other, "Kagiso", &[]);
    let visit = fixture.visit(&member, &site, "1000");

    let mut controller = fixture
        .hub
        .dispatch_controller(
            fixture
                .params("HH-01")
                .hooks(Arc::new(ContainerItemsHooks::new([
                    member_model(),
                    visit_model(),
                ]))),
        )
        .unwrap();
    assert!(controller.dispatch().unwrap().is_dispatched());

    assert_eq!(fixture.netbook.count(&member_model()), 1);
    assert_eq!(fixture.netbook.count(&visit_model()), 1);
    assert_eq!(fixture.netbook.count(&site_model()), 1);
    assert!(fixture
        .netbook
        .get(&visit_model(), visit.pk)
        .unwrap()
        .is_some());
    assert_eq!(controller.get_registered_items().unwrap().len(), 3);
}

#[test]
fn test_skip_container() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");

    let mut controller = fixture
        .hub
        .dispatch_controller(fixture.params("HH-01").skip_container(true))
        .unwrap();
    assert!(controller.dispatch().unwrap().is_dispatched());
    assert_eq!(fixture.netbook.count(&household_model()), 0);
    assert_eq!(controller.get_registered_items().unwrap().len(), 1);
}

#[test]
fn test_session_cleared_on_complete_when_configured() {
    let fixture = TestFixture::with_config(
        outpost::DispatchConfig::builder().retain_session_on_complete(false),
    );
    fixture.household("HH-01");

    let controller = fixture.dispatched("HH-01");
    assert_eq!(controller.session().summary().serialized, 0);
    assert_eq!(fixture.netbook.count(&household_model()), 1);
}

#[test]
fn test_update_model_and_crypt_import() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    fixture.language("Setswana");
    fixture.language("English");
    fixture.member(&household, "Tumelo", &[]);
    fixture.member(&household, "Kagiso", &[]);

    let controller = fixture.controller("HH-01").unwrap();
    let report = controller
        .update_model(&language_model(), &[BaseModel::List], &[])
        .unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(fixture.netbook.count(&language_model()), 2);
    assert!(fixture
        .registers
        .items_for_producer("netbook-01", false)
        .unwrap()
        .is_empty());

    let report = fixture.hub.import_crypt(NETBOOK).unwrap();
    assert_eq!(report.written, 2);
    assert_eq!(fixture.netbook.count(&outpost::crypt::crypt_model()), 2);
    assert!(matches!(
        fixture.hub.import_crypt(CENTRAL),
        Err(DispatchError::SourceIsDestination(_))
    ));
}

#[test]
fn test_to_json() {
    let fixture = TestFixture::new();
    fixture.household("HH-01");
    let controller = fixture.dispatched("HH-01");

    let value: serde_json::Value = serde_json::from_str(&controller.to_json().unwrap()).unwrap();
    assert_eq!(value["producer"], "netbook-01");
    assert_eq!(value["state"], "Complete");
    assert_eq!(value["container"]["identifier"], "HH-01");
    assert_eq!(value["session"]["dispatched"], 1);
    assert_eq!(value["session"]["counters"]["household.household"], 1);
}
