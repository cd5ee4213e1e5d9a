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

//! Item Register Data Access Layer
//!
//! One row per (container register, item pk, item identifier). The partial unique
//! index on active identifiers backs the "already dispatched elsewhere" check made
//! inside the get-or-create transaction.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    bool_to_int, convert_all, current_timestamp_string, uuid_to_blob, NewSqliteItemRegister,
    SqliteItemRegister,
};
use super::DAL;
use crate::database::schema::{container_registers, item_registers};
use crate::error::RegisterError;
use crate::models::{ItemRegister, ModelKey, NewItemRegister, RecordId};

pub struct ItemRegisterDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> ItemRegisterDAL<'a> {
    /// Gets, reactivates or creates the register row for an item.
    pub fn get_or_create(
        &self,
        new: NewItemRegister,
    ) -> Result<(ItemRegister, bool), RegisterError> {
        self.dal.immediate_transaction(move |conn| {
            let container_blob = uuid_to_blob(&new.container_register_id);
            let pk_blob = uuid_to_blob(&new.item_pk.as_uuid());

            let containers: i64 = container_registers::table
                .filter(container_registers::id.eq(container_blob.clone()))
                .count()
                .get_result(conn)?;
            if containers == 0 {
                return Err(RegisterError::NotFound(format!(
                    "container register {}",
                    new.container_register_id
                )));
            }

            let holder: Option<SqliteItemRegister> = item_registers::table
                .filter(item_registers::item_app_label.eq(&new.item_model.app_label))
                .filter(item_registers::item_model_name.eq(&new.item_model.model_name))
                .filter(item_registers::item_identifier.eq(&new.item_identifier))
                .filter(item_registers::is_dispatched.eq(1))
                .select(SqliteItemRegister::as_select())
                .first(conn)
                .optional()?;
            if let Some(holder) = holder {
                if holder.container_register_id != container_blob || holder.item_pk != pk_blob {
                    return Err(RegisterError::ItemDispatchedElsewhere {
                        item_identifier: new.item_identifier,
                        producer: holder.producer,
                    });
                }
                return Ok((ItemRegister::try_from(holder)?, false));
            }

            let now = current_timestamp_string();
            let existing: Option<SqliteItemRegister> = item_registers::table
                .filter(item_registers::container_register_id.eq(container_blob.clone()))
                .filter(item_registers::item_pk.eq(pk_blob.clone()))
                .filter(item_registers::item_identifier.eq(&new.item_identifier))
                .select(SqliteItemRegister::as_select())
                .first(conn)
                .optional()?;

            let (id, created) = match existing {
                Some(row) => {
                    diesel::update(item_registers::table.filter(item_registers::id.eq(row.id.clone())))
                        .set((
                            item_registers::producer.eq(new.producer),
                            item_registers::is_dispatched.eq(bool_to_int(true)),
                            item_registers::dispatch_datetime.eq(Some(now.clone())),
                            item_registers::return_datetime.eq(None::<String>),
                            item_registers::dispatch_host.eq(new.dispatch_host),
                            item_registers::dispatch_using.eq(new.dispatch_using),
                            item_registers::updated_at.eq(now),
                        ))
                        .execute(conn)?;
                    (row.id, false)
                }
                None => {
                    let id = uuid_to_blob(&Uuid::new_v4());
                    let row = NewSqliteItemRegister {
                        id: id.clone(),
                        container_register_id: container_blob,
                        producer: new.producer,
                        is_dispatched: bool_to_int(true),
                        dispatch_datetime: Some(now.clone()),
                        return_datetime: None,
                        item_app_label: new.item_model.app_label.clone(),
                        item_model_name: new.item_model.model_name.clone(),
                        item_identifier_attrname: new.item_identifier_attr,
                        item_identifier: new.item_identifier.clone(),
                        item_pk: pk_blob,
                        dispatch_host: new.dispatch_host,
                        dispatch_using: new.dispatch_using,
                        created_at: now.clone(),
                        updated_at: now,
                    };
                    diesel::insert_into(item_registers::table)
                        .values(&row)
                        .execute(conn)?;
                    (id, true)
                }
            };
            debug!(
                item_identifier = %new.item_identifier,
                model = %new.item_model,
                created,
                "Item register dispatched"
            );

            let row: SqliteItemRegister = item_registers::table
                .filter(item_registers::id.eq(id))
                .select(SqliteItemRegister::as_select())
                .first(conn)?;
            Ok((ItemRegister::try_from(row)?, created))
        })
    }

    pub fn find_dispatched(
        &self,
        model: &ModelKey,
        pk: RecordId,
    ) -> Result<Option<ItemRegister>, RegisterError> {
        let mut conn = self.dal.database.get_connection()?;
        item_registers::table
            .filter(item_registers::item_app_label.eq(&model.app_label))
            .filter(item_registers::item_model_name.eq(&model.model_name))
            .filter(item_registers::item_pk.eq(uuid_to_blob(&pk.as_uuid())))
            .filter(item_registers::is_dispatched.eq(1))
            .select(SqliteItemRegister::as_select())
            .first(&mut conn)
            .optional()?
            .map(ItemRegister::try_from)
            .transpose()
    }

    pub fn list_for_container(
        &self,
        container_register_id: Uuid,
        dispatched_only: bool,
    ) -> Result<Vec<ItemRegister>, RegisterError> {
        let mut conn = self.dal.database.get_connection()?;
        let mut query = item_registers::table
            .filter(item_registers::container_register_id.eq(uuid_to_blob(&container_register_id)))
            .into_boxed();
        if dispatched_only {
            query = query.filter(item_registers::is_dispatched.eq(1));
        }
        let rows: Vec<SqliteItemRegister> = query
            .order(item_registers::created_at.asc())
            .select(SqliteItemRegister::as_select())
            .load(&mut conn)?;
        convert_all(rows)
    }

    pub fn list_for_producer(
        &self,
        producer: &str,
        dispatched_only: bool,
    ) -> Result<Vec<ItemRegister>, RegisterError> {
        let mut conn = self.dal.database.get_connection()?;
        let mut query = item_registers::table
            .filter(item_registers::producer.eq(producer))
            .into_boxed();
        if dispatched_only {
            query = query.filter(item_registers::is_dispatched.eq(1));
        }
        let rows: Vec<SqliteItemRegister> = query
            .order(item_registers::created_at.asc())
            .select(SqliteItemRegister::as_select())
            .load(&mut conn)?;
        convert_all(rows)
    }
}

/// Flips the given active item rows to returned.
pub(super) fn mark_returned(
    conn: &mut SqliteConnection,
    ids: &[Uuid],
    at: &str,
) -> Result<usize, RegisterError> {
    let blobs: Vec<Vec<u8>> = ids.iter().map(uuid_to_blob).collect();
    Ok(diesel::update(
        item_registers::table
            .filter(item_registers::id.eq_any(blobs))
            .filter(item_registers::is_dispatched.eq(1)),
    )
    .set((
        item_registers::is_dispatched.eq(bool_to_int(false)),
        item_registers::return_datetime.eq(Some(at.to_string())),
        item_registers::updated_at.eq(at.to_string()),
    ))
    .execute(conn)?)
}

/// Flips every active item row of a container to returned.
pub(super) fn mark_returned_for_container(
    conn: &mut SqliteConnection,
    container_register_id: Uuid,
    at: &str,
) -> Result<usize, RegisterError> {
    Ok(diesel::update(
        item_registers::table
            .filter(item_registers::container_register_id.eq(uuid_to_blob(&container_register_id)))
            .filter(item_registers::is_dispatched.eq(1)),
    )
    .set((
        item_registers::is_dispatched.eq(bool_to_int(false)),
        item_registers::return_datetime.eq(Some(at.to_string())),
        item_registers::updated_at.eq(at.to_string()),
    ))
    .execute(conn)?)
}
