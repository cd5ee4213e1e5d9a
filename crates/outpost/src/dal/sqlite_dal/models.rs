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

//! SQLite row types for the register tables.
//!
//! UUIDs are stored as BLOB, timestamps as RFC3339 TEXT and booleans as INTEGER (0/1).
//! Rows are converted to the domain registers at the DAL boundary.

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::database::schema::{container_registers, item_registers};
use crate::error::RegisterError;
use crate::models::register::check_lease_invariant;
use crate::models::{ContainerRegister, ItemRegister, ModelKey, RecordId};

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = container_registers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteContainerRegister {
    pub id: Vec<u8>,
    pub producer: String,
    pub is_dispatched: i32,
    pub dispatch_datetime: Option<String>,
    pub return_datetime: Option<String>,
    pub container_app_label: String,
    pub container_model_name: String,
    pub container_identifier_attrname: String,
    pub container_identifier: String,
    pub container_pk: Vec<u8>,
    pub dispatched_using: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = container_registers)]
pub struct NewSqliteContainerRegister {
    pub id: Vec<u8>,
    pub producer: String,
    pub is_dispatched: i32,
    pub dispatch_datetime: Option<String>,
    pub return_datetime: Option<String>,
    pub container_app_label: String,
    pub container_model_name: String,
    pub container_identifier_attrname: String,
    pub container_identifier: String,
    pub container_pk: Vec<u8>,
    pub dispatched_using: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Queryable, Selectable)]
#[diesel(table_name = item_registers)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SqliteItemRegister {
    pub id: Vec<u8>,
    pub container_register_id: Vec<u8>,
    pub producer: String,
    pub is_dispatched: i32,
    pub dispatch_datetime: Option<String>,
    pub return_datetime: Option<String>,
    pub item_app_label: String,
    pub item_model_name: String,
    pub item_identifier_attrname: String,
    pub item_identifier: String,
    pub item_pk: Vec<u8>,
    pub dispatch_host: Option<String>,
    pub dispatch_using: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = item_registers)]
pub struct NewSqliteItemRegister {
    pub id: Vec<u8>,
    pub container_register_id: Vec<u8>,
    pub producer: String,
    pub is_dispatched: i32,
    pub dispatch_datetime: Option<String>,
    pub return_datetime: Option<String>,
    pub item_app_label: String,
    pub item_model_name: String,
    pub item_identifier_attrname: String,
    pub item_identifier: String,
    pub item_pk: Vec<u8>,
    pub dispatch_host: Option<String>,
    pub dispatch_using: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

// ============================================================================
// Type conversion helpers
// ============================================================================

pub fn uuid_to_blob(uuid: &Uuid) -> Vec<u8> {
    uuid.as_bytes().to_vec()
}

pub fn blob_to_uuid(blob: &[u8]) -> Result<Uuid, RegisterError> {
    Uuid::from_slice(blob).map_err(|e| RegisterError::InvalidValue(format!("uuid: {}", e)))
}

pub fn string_to_datetime(s: &str) -> Result<DateTime<Utc>, RegisterError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RegisterError::InvalidValue(format!("timestamp '{}': {}", s, e)))
}

fn optional_datetime(s: Option<String>) -> Result<Option<DateTime<Utc>>, RegisterError> {
    s.as_deref().map(string_to_datetime).transpose()
}

pub fn current_timestamp_string() -> String {
    Utc::now().to_rfc3339()
}

pub fn bool_to_int(value: bool) -> i32 {
    i32::from(value)
}

// ============================================================================
// Conversion Implementations: SQLite rows -> registers
// ============================================================================

impl TryFrom<SqliteContainerRegister> for ContainerRegister {
    type Error = RegisterError;

    fn try_from(s: SqliteContainerRegister) -> Result<Self, Self::Error> {
        let register = ContainerRegister {
            id: blob_to_uuid(&s.id)?,
            producer: s.producer,
            is_dispatched: s.is_dispatched != 0,
            dispatch_datetime: optional_datetime(s.dispatch_datetime)?,
            return_datetime: optional_datetime(s.return_datetime)?,
            container_model: ModelKey::new(s.container_app_label, s.container_model_name),
            container_identifier_attr: s.container_identifier_attrname,
            container_identifier: s.container_identifier,
            container_pk: RecordId(blob_to_uuid(&s.container_pk)?),
            dispatched_using: s.dispatched_using,
            created_at: string_to_datetime(&s.created_at)?,
            updated_at: string_to_datetime(&s.updated_at)?,
        };
        check_lease_invariant(register.is_dispatched, register.return_datetime)?;
        Ok(register)
    }
}

impl TryFrom<SqliteItemRegister> for ItemRegister {
    type Error = RegisterError;

    fn try_from(s: SqliteItemRegister) -> Result<Self, Self::Error> {
        let register = ItemRegister {
            id: blob_to_uuid(&s.id)?,
            container_register_id: blob_to_uuid(&s.container_register_id)?,
            producer: s.producer,
            is_dispatched: s.is_dispatched != 0,
            dispatch_datetime: optional_datetime(s.dispatch_datetime)?,
            return_datetime: optional_datetime(s.return_datetime)?,
            item_model: ModelKey::new(s.item_app_label, s.item_model_name),
            item_identifier_attr: s.item_identifier_attrname,
            item_identifier: s.item_identifier,
            item_pk: RecordId(blob_to_uuid(&s.item_pk)?),
            dispatch_host: s.dispatch_host,
            dispatch_using: s.dispatch_using,
            created_at: string_to_datetime(&s.created_at)?,
            updated_at: string_to_datetime(&s.updated_at)?,
        };
        check_lease_invariant(register.is_dispatched, register.return_datetime)?;
        Ok(register)
    }
}

/// Converts a batch of rows, failing on the first bad one.
pub fn convert_all<S, T>(rows: Vec<S>) -> Result<Vec<T>, RegisterError>
where
    T: TryFrom<S, Error = RegisterError>,
{
    rows.into_iter().map(T::try_from).collect()
}
