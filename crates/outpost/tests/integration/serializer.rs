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

//! Transfers between stores: closure, companions, conflicts and many-to-many links.

use crate::fixtures::*;
use outpost::controller::{SessionContainer, Serializer, TransferOptions};
use outpost::crypt::crypt_model;
use outpost::{BaseModel, CryptError, DispatchConfig, DispatchError, Record, Store};

fn serializer(fixture: &TestFixture) -> Serializer<'_> {
    Serializer::new(
        &fixture.hub,
        CENTRAL,
        fixture.central.clone(),
        fixture.netbook.clone(),
    )
}

#[test]
fn test_foreign_key_closure_orders_dependencies_first() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let site = fixture.site("S-01");
    let member = fixture.member(&household, "Tumelo", &[]);
    let first = fixture.visit(&member, &site, "1000");
    let second = fixture.visit(&member, &site, "2000");

    let mut session = SessionContainer::new();
    let closure = serializer(&fixture)
        .foreign_key_closure(&[first, second], &[], &mut session)
        .unwrap();

    let position = |record: &Record| closure.iter().position(|r| r.pk == record.pk).unwrap();
    assert_eq!(closure.len(), 3);
    assert!(position(&household) < position(&member));
    assert!(closure.iter().any(|r| r.pk == site.pk));
    assert_eq!(session.fk_dependencies.len(), 3);
    assert!(session.fk_dependencies.contains(&site.reference()));

    let mut session = SessionContainer::new();
    let closure = serializer(&fixture)
        .foreign_key_closure(
            &[fixture.visit(&member, &site, "3000")],
            &["site".to_string()],
            &mut session,
        )
        .unwrap();
    assert_eq!(closure.len(), 2);
    assert!(!closure.iter().any(|r| r.pk == site.pk));
}

#[test]
fn test_transfer_with_closure_and_companions() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let site = fixture.site("S-01");
    let member = fixture.member(&household, "Tumelo", &[]);
    let visit = fixture.visit(&member, &site, "1000");

    let mut session = SessionContainer::new();
    let report = serializer(&fixture)
        .closure_and_transfer(
            std::slice::from_ref(&visit),
            &TransferOptions::new(&[BaseModel::Dispatch]),
            &mut session,
        )
        .unwrap();

    assert_eq!(report.dependencies, 3);
    assert_eq!(report.companions, 1);
    assert_eq!(report.written, 5);
    assert_eq!(report.passes, 1);
    for model in [visit_model(), member_model(), household_model(), site_model(), crypt_model()] {
        assert_eq!(fixture.netbook.count(&model), 1, "{}", model);
        assert_eq!(session.count(&model), 1, "{}", model);
    }

    let copy = fixture
        .netbook
        .get(&visit_model(), visit.pk)
        .unwrap()
        .unwrap();
    assert_eq!(copy.fk("member"), Some(member.pk));
    assert_eq!(copy.fk("site"), Some(site.pk));

    // Everything is in the session now; a second transfer writes nothing.
    let report = serializer(&fixture)
        .closure_and_transfer(
            &[visit],
            &TransferOptions::new(&[BaseModel::Dispatch]),
            &mut session,
        )
        .unwrap();
    assert!(report.is_empty());
}

#[test]
fn test_duplicate_natural_key_is_accepted() {
    let fixture = TestFixture::new();
    let setswana = fixture.language("Setswana");
    let existing = Record::new(language_model()).with("name", "Setswana");
    fixture.netbook.save(&existing).unwrap();

    let mut session = SessionContainer::new();
    let report = serializer(&fixture)
        .closure_and_transfer(
            std::slice::from_ref(&setswana),
            &TransferOptions::new(&[]),
            &mut session,
        )
        .unwrap();
    assert_eq!(report.written, 0);
    assert_eq!(report.accepted_duplicates, 1);
    assert_eq!(fixture.netbook.count(&language_model()), 1);
    assert!(session.is_serialized(&setswana));
}

#[test]
fn test_unresolved_companion_is_fatal() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let member = Record::new(member_model())
        .with_fk("household", &household)
        .with("first_name", "Unknown");
    fixture.central.save(&member).unwrap();

    let err = serializer(&fixture)
        .closure_and_transfer(
            &[member],
            &TransferOptions::new(&[BaseModel::Dispatch]),
            &mut SessionContainer::new(),
        )
        .unwrap_err();
    match err {
        DispatchError::Crypt(CryptError::Unresolved { model, field }) => {
            assert_eq!(model, member_model());
            assert_eq!(field, "first_name");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fixture.netbook.count(&household_model()), 0);
    assert_eq!(fixture.netbook.count(&member_model()), 0);
}

#[test]
fn test_empty_encrypted_value_needs_no_companion() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let member = Record::new(member_model())
        .with_fk("household", &household)
        .with("first_name", "");
    fixture.central.save(&member).unwrap();

    let report = serializer(&fixture)
        .closure_and_transfer(
            &[member],
            &TransferOptions::new(&[BaseModel::Dispatch]),
            &mut SessionContainer::new(),
        )
        .unwrap();
    assert_eq!(report.companions, 0);
    assert_eq!(report.written, 2);
}

#[test]
fn test_base_model_must_be_allowed() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let member = fixture.member(&household, "Tumelo", &[]);

    let err = serializer(&fixture)
        .closure_and_transfer(
            &[member],
            &TransferOptions::new(&[BaseModel::List]),
            &mut SessionContainer::new(),
        )
        .unwrap_err();
    assert!(matches!(err, DispatchError::BaseModel { .. }));
    assert_eq!(fixture.netbook.count(&crypt_model()), 0);
}

#[test]
fn test_pending_incoming_blocks_transfer() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let member = fixture.member(&household, "Tumelo", &[]);
    fixture
        .transactions
        .push_incoming("netbook-01", CENTRAL, member_model());

    let err = serializer(&fixture)
        .closure_and_transfer(
            std::slice::from_ref(&member),
            &TransferOptions::new(&[BaseModel::Dispatch]).producer("netbook-01"),
            &mut SessionContainer::new(),
        )
        .unwrap_err();
    assert_eq!(
        err.to_string(),
        "Producer 'netbook-01' has pending incoming transactions for household.householdmember. Run sync first."
    );
    assert_eq!(fixture.netbook.count(&crypt_model()), 0);

    // Pending work on other models does not block.
    fixture.transactions.consume_all();
    fixture
        .transactions
        .push_incoming("netbook-01", CENTRAL, site_model());
    assert!(serializer(&fixture)
        .closure_and_transfer(
            &[member],
            &TransferOptions::new(&[BaseModel::Dispatch]).producer("netbook-01"),
            &mut SessionContainer::new(),
        )
        .is_ok());
}

#[test]
fn test_missing_reference_exhausts_passes() {
    let fixture = TestFixture::with_config(DispatchConfig::builder().max_apply_passes(3));
    let household = fixture.household("HH-01");
    let member = fixture.member(&household, "Tumelo", &[]);

    let err = serializer(&fixture)
        .closure_and_transfer(
            std::slice::from_ref(&member),
            &TransferOptions::new(&[BaseModel::Dispatch])
                .skip_foreign_keys(&["household".to_string()]),
            &mut SessionContainer::new(),
        )
        .unwrap_err();
    match err {
        DispatchError::Deserialization { model, pk, .. } => {
            assert_eq!(model, member_model());
            assert_eq!(pk, member.pk.to_string());
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fixture.netbook.count(&member_model()), 0);
}

#[test]
fn test_reference_cycle_is_transferred() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let site = fixture.site("S-01");
    let head = fixture.member(&household, "Tumelo", &[]);
    let household = household.with_fk("head", &head);
    fixture.central.save(&household).unwrap();
    let visit = fixture.visit(&head, &site, "1000");

    let mut session = SessionContainer::new();
    let closure = serializer(&fixture)
        .foreign_key_closure(std::slice::from_ref(&visit), &[], &mut session)
        .unwrap();
    assert_eq!(closure.len(), 3);
    assert_eq!(closure.iter().filter(|r| r.pk == head.pk).count(), 1);
    assert_eq!(closure.iter().filter(|r| r.pk == household.pk).count(), 1);

    let report = serializer(&fixture)
        .closure_and_transfer(
            std::slice::from_ref(&visit),
            &TransferOptions::new(&[BaseModel::Dispatch]),
            &mut SessionContainer::new(),
        )
        .unwrap();
    assert_eq!(report.written, 5);
    assert_eq!(report.relinked, 1);

    let household_copy = fixture
        .netbook
        .get(&household_model(), household.pk)
        .unwrap()
        .unwrap();
    let head_copy = fixture
        .netbook
        .get(&member_model(), head.pk)
        .unwrap()
        .unwrap();
    assert_eq!(household_copy.fk("head"), Some(head.pk));
    assert_eq!(head_copy.fk("household"), Some(household.pk));
    assert_eq!(fixture.netbook.count(&visit_model()), 1);
}

#[test]
fn test_cycle_with_missing_reference_still_fails() {
    let fixture = TestFixture::with_config(DispatchConfig::builder().max_apply_passes(5));
    let household = fixture.household("HH-01");
    let site = fixture.site("S-01");
    let head = fixture.member(&household, "Tumelo", &[]);
    let household = household.with_fk("head", &head);
    fixture.central.save(&household).unwrap();
    let visit = fixture.visit(&head, &site, "1000");

    let err = serializer(&fixture)
        .closure_and_transfer(
            std::slice::from_ref(&visit),
            &TransferOptions::new(&[BaseModel::Dispatch])
                .skip_foreign_keys(&["site".to_string()]),
            &mut SessionContainer::new(),
        )
        .unwrap_err();
    match err {
        DispatchError::Deserialization { model, reason, .. } => {
            assert_eq!(model, visit_model());
            assert_eq!(reason, "household.membervisit.site references a missing reference.site");
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(fixture.netbook.count(&visit_model()), 0);
}

#[test]
fn test_list_records_written_once_per_session() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let setswana = fixture.language("Setswana");
    let english = fixture.language("English");
    let first = fixture.member(&household, "Tumelo", &[&setswana, &english]);
    let second = fixture.member(&household, "Kagiso", &[&setswana]);

    let report = serializer(&fixture)
        .closure_and_transfer(
            &[first.clone(), second.clone()],
            &TransferOptions::new(&[BaseModel::Dispatch]),
            &mut SessionContainer::new(),
        )
        .unwrap();
    assert_eq!(report.m2m_links, 3);
    assert_eq!(fixture.netbook.count(&language_model()), 2);

    let copy = fixture
        .netbook
        .get(&member_model(), second.pk)
        .unwrap()
        .unwrap();
    assert_eq!(copy.m2m["languages"], vec![setswana.pk]);
    let copy = fixture
        .netbook
        .get(&member_model(), first.pk)
        .unwrap()
        .unwrap();
    assert_eq!(copy.m2m["languages"].len(), 2);
}

#[test]
fn test_payload_uses_natural_keys() {
    let fixture = TestFixture::new();
    let household = fixture.household("HH-01");
    let member = fixture.member(&household, "Tumelo", &[]);

    let payload = serializer(&fixture).serialize(&[member]).unwrap();
    let records = Serializer::deserialize(&payload).unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(
        records[0].fields["household"],
        serde_json::json!(["HH-01"])
    );
}
