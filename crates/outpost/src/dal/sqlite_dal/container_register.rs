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

//! Container Register Data Access Layer
//!
//! One row per (container model, container pk) ever dispatched. A returned row is
//! reactivated when the container goes out again, possibly to a different producer.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use tracing::debug;
use uuid::Uuid;

use super::models::{
    bool_to_int, convert_all, current_timestamp_string, uuid_to_blob, NewSqliteContainerRegister,
    SqliteContainerRegister,
};
use super::DAL;
use crate::database::schema::container_registers;
use crate::error::RegisterError;
use crate::models::{ContainerRegister, ModelKey, NewContainerRegister, RecordId};

pub struct ContainerRegisterDAL<'a> {
    pub dal: &'a DAL,
}

impl<'a> ContainerRegisterDAL<'a> {
    /// Gets, reactivates or creates the register row for a container.
    pub fn get_or_create(
        &self,
        new: NewContainerRegister,
    ) -> Result<(ContainerRegister, bool), RegisterError> {
        self.dal.immediate_transaction(move |conn| {
            let now = current_timestamp_string();

            if let Some(row) = find_row(conn, &new.container_model, new.container_pk)? {
                let existing = ContainerRegister::try_from(row)?;
                if existing.is_dispatched {
                    if existing.producer != new.producer {
                        return Err(RegisterError::ContainerDispatchedElsewhere {
                            container_identifier: existing.container_identifier,
                            producer: existing.producer,
                        });
                    }
                    return Ok((existing, false));
                }

                diesel::update(
                    container_registers::table
                        .filter(container_registers::id.eq(uuid_to_blob(&existing.id))),
                )
                .set((
                    container_registers::producer.eq(new.producer),
                    container_registers::is_dispatched.eq(bool_to_int(true)),
                    container_registers::dispatch_datetime.eq(Some(now.clone())),
                    container_registers::return_datetime.eq(None::<String>),
                    container_registers::container_identifier_attrname
                        .eq(new.container_identifier_attr),
                    container_registers::container_identifier.eq(new.container_identifier),
                    container_registers::dispatched_using.eq(new.dispatched_using),
                    container_registers::updated_at.eq(now),
                ))
                .execute(conn)?;
                debug!(id = %existing.id, "Reactivated container register");

                let reloaded = load(conn, existing.id)?
                    .ok_or_else(|| RegisterError::NotFound(existing.id.to_string()))?;
                return Ok((reloaded, false));
            }

            let id = Uuid::new_v4();
            let row = NewSqliteContainerRegister {
                id: uuid_to_blob(&id),
                producer: new.producer,
                is_dispatched: bool_to_int(true),
                dispatch_datetime: Some(now.clone()),
                return_datetime: None,
                container_app_label: new.container_model.app_label.clone(),
                container_model_name: new.container_model.model_name.clone(),
                container_identifier_attrname: new.container_identifier_attr,
                container_identifier: new.container_identifier,
                container_pk: uuid_to_blob(&new.container_pk.as_uuid()),
                dispatched_using: new.dispatched_using,
                created_at: now.clone(),
                updated_at: now,
            };
            diesel::insert_into(container_registers::table)
                .values(&row)
                .execute(conn)?;
            debug!(%id, model = %new.container_model, "Created container register");

            let created = load(conn, id)?.ok_or_else(|| RegisterError::NotFound(id.to_string()))?;
            Ok((created, true))
        })
    }

    pub fn get(&self, id: Uuid) -> Result<Option<ContainerRegister>, RegisterError> {
        let mut conn = self.dal.database.get_connection()?;
        load(&mut conn, id)
    }

    pub fn find(
        &self,
        model: &ModelKey,
        pk: RecordId,
    ) -> Result<Option<ContainerRegister>, RegisterError> {
        let mut conn = self.dal.database.get_connection()?;
        find_row(&mut conn, model, pk)?
            .map(ContainerRegister::try_from)
            .transpose()
    }

    pub fn find_dispatched_by_identifier(
        &self,
        model: &ModelKey,
        identifier: &str,
    ) -> Result<Option<ContainerRegister>, RegisterError> {
        let mut conn = self.dal.database.get_connection()?;
        container_registers::table
            .filter(container_registers::container_app_label.eq(&model.app_label))
            .filter(container_registers::container_model_name.eq(&model.model_name))
            .filter(container_registers::container_identifier.eq(identifier))
            .filter(container_registers::is_dispatched.eq(1))
            .select(SqliteContainerRegister::as_select())
            .first(&mut conn)
            .optional()?
            .map(ContainerRegister::try_from)
            .transpose()
    }

    /// Active containers of a producer in dispatch order.
    pub fn list_dispatched(
        &self,
        producer: &str,
        identifiers: Option<&[String]>,
    ) -> Result<Vec<ContainerRegister>, RegisterError> {
        let mut conn = self.dal.database.get_connection()?;
        let mut query = container_registers::table
            .filter(container_registers::producer.eq(producer))
            .filter(container_registers::is_dispatched.eq(1))
            .into_boxed();
        if let Some(identifiers) = identifiers {
            query = query.filter(container_registers::container_identifier.eq_any(identifiers.to_vec()));
        }
        let rows: Vec<SqliteContainerRegister> = query
            .order(container_registers::created_at.asc())
            .select(SqliteContainerRegister::as_select())
            .load(&mut conn)?;
        convert_all(rows)
    }
}

pub(super) fn load(
    conn: &mut SqliteConnection,
    id: Uuid,
) -> Result<Option<ContainerRegister>, RegisterError> {
    container_registers::table
        .filter(container_registers::id.eq(uuid_to_blob(&id)))
        .select(SqliteContainerRegister::as_select())
        .first(conn)
        .optional()?
        .map(ContainerRegister::try_from)
        .transpose()
}

fn find_row(
    conn: &mut SqliteConnection,
    model: &ModelKey,
    pk: RecordId,
) -> Result<Option<SqliteContainerRegister>, RegisterError> {
    Ok(container_registers::table
        .filter(container_registers::container_app_label.eq(&model.app_label))
        .filter(container_registers::container_model_name.eq(&model.model_name))
        .filter(container_registers::container_pk.eq(uuid_to_blob(&pk.as_uuid())))
        .select(SqliteContainerRegister::as_select())
        .first(conn)
        .optional()?)
}

/// Flips an active container row to returned.
pub(super) fn mark_returned(
    conn: &mut SqliteConnection,
    id: Uuid,
    at: &str,
) -> Result<usize, RegisterError> {
    Ok(diesel::update(
        container_registers::table
            .filter(container_registers::id.eq(uuid_to_blob(&id)))
            .filter(container_registers::is_dispatched.eq(1)),
    )
    .set((
        container_registers::is_dispatched.eq(bool_to_int(false)),
        container_registers::return_datetime.eq(Some(at.to_string())),
        container_registers::updated_at.eq(at.to_string()),
    ))
    .execute(conn)?)
}
