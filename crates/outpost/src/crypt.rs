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

//! # Encrypted-field companions
//!
//! Encrypted field values are stored as hashes; the secret behind each hash lives in a
//! companion record of the builtin `crypto.crypt` model. A record whose encrypted fields
//! are dispatched is useless on the producer without its companions, so the serializer
//! resolves them through a [`CryptResolver`] and ships them first.
//!
//! A value is tried against each [`HashStrategy`] in [`HASH_STRATEGY_PRIORITY`] order;
//! the first strategy whose hash has a companion wins.

use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

use crate::error::CryptError;
use crate::models::schema::{BaseModel, FieldSpec, ModelDefinition, ModelSchema};
use crate::models::{ModelKey, Record};
use crate::store::{Query, Store};

pub fn crypt_model() -> ModelKey {
    ModelKey::new("crypto", "crypt")
}

/// Builtin definition of the companion model. Companions are identified by hash.
pub fn crypt_definition() -> ModelDefinition {
    ModelDefinition::new(
        ModelSchema::new(crypt_model(), BaseModel::Crypt)
            .field(FieldSpec::plain("hash"))
            .field(FieldSpec::plain("secret"))
            .field(FieldSpec::plain("algorithm"))
            .field(FieldSpec::plain("mode"))
            .natural_key(["hash"]),
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashStrategy {
    RsaLocal,
    RsaRestricted,
    AesLocal,
}

pub const HASH_STRATEGY_PRIORITY: [HashStrategy; 3] = [
    HashStrategy::RsaLocal,
    HashStrategy::RsaRestricted,
    HashStrategy::AesLocal,
];

impl HashStrategy {
    pub fn algorithm(&self) -> &'static str {
        match self {
            HashStrategy::RsaLocal | HashStrategy::RsaRestricted => "rsa",
            HashStrategy::AesLocal => "aes",
        }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            HashStrategy::RsaLocal | HashStrategy::AesLocal => "local",
            HashStrategy::RsaRestricted => "restricted",
        }
    }

    pub fn from_parts(algorithm: &str, mode: &str) -> Result<Self, CryptError> {
        HASH_STRATEGY_PRIORITY
            .into_iter()
            .find(|s| s.algorithm() == algorithm && s.mode() == mode)
            .ok_or_else(|| CryptError::UnknownStrategy(format!("{}/{}", algorithm, mode)))
    }
}

impl fmt::Display for HashStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.algorithm(), self.mode())
    }
}

/// Hashing and companion lookup for encrypted values.
pub trait CryptResolver: Send + Sync {
    fn hash(&self, strategy: HashStrategy, plaintext: &str) -> Result<String, CryptError>;

    /// Companion record stored under `hash`, if any.
    fn lookup(&self, hash: &str) -> Result<Option<Record>, CryptError>;
}

/// Resolves the companion of one encrypted value. Empty values have none.
pub fn resolve_companion(
    resolver: &dyn CryptResolver,
    model: &ModelKey,
    field: &str,
    value: &Value,
) -> Result<Option<Record>, CryptError> {
    let plaintext = match value {
        Value::Null => return Ok(None),
        Value::String(s) if s.is_empty() => return Ok(None),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    for strategy in HASH_STRATEGY_PRIORITY {
        let hash = resolver.hash(strategy, &plaintext)?;
        if let Some(companion) = resolver.lookup(&hash)? {
            return Ok(Some(companion));
        }
    }
    Err(CryptError::Unresolved {
        model: model.clone(),
        field: field.to_string(),
    })
}

/// Companions for every encrypted field of `record`.
pub fn companions_for(
    resolver: &dyn CryptResolver,
    schema: &ModelSchema,
    record: &Record,
) -> Result<Vec<Record>, CryptError> {
    let mut companions = Vec::new();
    for field in schema.encrypted_fields() {
        let value = record.get(field).cloned().unwrap_or(Value::Null);
        if let Some(companion) = resolve_companion(resolver, &record.model, field, &value)? {
            companions.push(companion);
        }
    }
    Ok(companions)
}

/// [`CryptResolver`] reading companions from a record store.
///
/// Hashes are hex-encoded SHA-256 digests over the salt, the strategy and the
/// plaintext.
pub struct StoreCryptResolver {
    store: Arc<dyn Store>,
    salt: String,
}

impl StoreCryptResolver {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            salt: String::new(),
        }
    }

    pub fn with_salt(mut self, salt: impl Into<String>) -> Self {
        self.salt = salt.into();
        self
    }

    /// Stores a companion for `plaintext` and returns it. An existing companion with
    /// the same hash is returned unchanged.
    pub fn store_secret(
        &self,
        strategy: HashStrategy,
        plaintext: &str,
    ) -> Result<Record, CryptError> {
        let hash = self.hash(strategy, plaintext)?;
        let companion = Record::new(crypt_model())
            .with("hash", hash.clone())
            .with("secret", hex::encode(plaintext.as_bytes()))
            .with("algorithm", strategy.algorithm())
            .with("mode", strategy.mode());
        let (record, _) = self.store.get_or_create(
            &crypt_model(),
            &Query::new().eq("hash", hash),
            companion,
        )?;
        Ok(record)
    }
}

impl CryptResolver for StoreCryptResolver {
    fn hash(&self, strategy: HashStrategy, plaintext: &str) -> Result<String, CryptError> {
        let mut hasher = Sha256::new();
        hasher.update(self.salt.as_bytes());
        hasher.update(strategy.to_string().as_bytes());
        hasher.update(b":");
        hasher.update(plaintext.as_bytes());
        Ok(hex::encode(hasher.finalize()))
    }

    fn lookup(&self, hash: &str) -> Result<Option<Record>, CryptError> {
        Ok(self
            .store
            .filter(&crypt_model(), &Query::new().eq("hash", hash))?
            .into_iter()
            .next())
    }
}
