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

//! Diesel table definitions for the dispatch registers.

diesel::table! {
    container_registers (id) {
        id -> Binary,
        producer -> Text,
        is_dispatched -> Integer,
        dispatch_datetime -> Nullable<Text>,
        return_datetime -> Nullable<Text>,
        container_app_label -> Text,
        container_model_name -> Text,
        container_identifier_attrname -> Text,
        container_identifier -> Text,
        container_pk -> Binary,
        dispatched_using -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::table! {
    item_registers (id) {
        id -> Binary,
        container_register_id -> Binary,
        producer -> Text,
        is_dispatched -> Integer,
        dispatch_datetime -> Nullable<Text>,
        return_datetime -> Nullable<Text>,
        item_app_label -> Text,
        item_model_name -> Text,
        item_identifier_attrname -> Text,
        item_identifier -> Text,
        item_pk -> Binary,
        dispatch_host -> Nullable<Text>,
        dispatch_using -> Nullable<Text>,
        created_at -> Text,
        updated_at -> Text,
    }
}

diesel::joinable!(item_registers -> container_registers (container_register_id));

diesel::allow_tables_to_appear_in_same_query!(container_registers, item_registers);
