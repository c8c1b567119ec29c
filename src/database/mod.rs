// In-memory record store.
//
// Records are JSON objects keyed by UUID, grouped in named collections.
// System fields (id, created_at, updated_at) are owned by the repository
// and never taken from input.

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;
use uuid::Uuid;

/// System fields that can only be set by the repository, not by API input
const SYSTEM_FIELDS: &[&str] = &["id", "created_at", "updated_at"];

pub type Record = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{collection} {id} not found")]
    NotFound { collection: String, id: Uuid },

    #[error("{0}")]
    Conflict(String),

    #[error("Invalid record: {0}")]
    InvalidRecord(String),
}

/// Shared backing storage for every collection
#[derive(Debug, Default)]
pub struct Store {
    collections: RwLock<HashMap<String, BTreeMap<Uuid, Record>>>,
}

impl Store {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Typed view over one collection
#[derive(Debug, Clone)]
pub struct Repository {
    collection: String,
    store: Arc<Store>,
}

impl Repository {
    pub fn new(collection: impl Into<String>, store: Arc<Store>) -> Self {
        Self {
            collection: collection.into(),
            store,
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// All records, oldest id order is not guaranteed
    pub async fn select_all(&self) -> Vec<Record> {
        let collections = self.store.collections.read().await;
        collections
            .get(&self.collection)
            .map(|records| records.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Records whose `field` equals `value`
    pub async fn select_where(&self, field: &str, value: &Value) -> Vec<Record> {
        let collections = self.store.collections.read().await;
        collections
            .get(&self.collection)
            .map(|records| {
                records
                    .values()
                    .filter(|r| r.get(field) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn select_one(&self, id: Uuid) -> Option<Record> {
        let collections = self.store.collections.read().await;
        collections.get(&self.collection).and_then(|records| records.get(&id).cloned())
    }

    /// Like select_one, but a missing record is an error
    pub async fn select_404(&self, id: Uuid) -> Result<Record, StoreError> {
        self.select_one(id).await.ok_or_else(|| self.not_found(id))
    }

    pub async fn count_where(&self, field: &str, value: &Value) -> usize {
        self.select_where(field, value).await.len()
    }

    /// Insert a record. When `unique` names a field, a record with the same
    /// value must not already exist; the check and insert are atomic.
    pub async fn create_one(&self, fields: Record, unique: Option<&str>) -> Result<Record, StoreError> {
        let mut record = strip_system_fields(fields);
        let id = Uuid::new_v4();
        let now = now();
        record.insert("id".into(), Value::String(id.to_string()));
        record.insert("created_at".into(), Value::String(now.clone()));
        record.insert("updated_at".into(), Value::String(now));

        let mut collections = self.store.collections.write().await;
        let records = collections.entry(self.collection.clone()).or_default();

        if let Some(field) = unique {
            let value = record
                .get(field)
                .ok_or_else(|| StoreError::InvalidRecord(format!("missing unique field '{}'", field)))?;
            if records.values().any(|r| r.get(field) == Some(value)) {
                return Err(StoreError::Conflict(format!(
                    "{} with {} {} already exists",
                    self.collection, field, value
                )));
            }
        }

        records.insert(id, record.clone());
        tracing::debug!("Created {} {}", self.collection, id);
        Ok(record)
    }

    /// Merge `changes` into an existing record. When `unique` names a field
    /// that `changes` sets, no other record may hold the new value.
    pub async fn update_one(&self, id: Uuid, changes: Record, unique: Option<&str>) -> Result<Record, StoreError> {
        let changes = strip_system_fields(changes);

        let mut collections = self.store.collections.write().await;
        let records = collections
            .get_mut(&self.collection)
            .filter(|records| records.contains_key(&id))
            .ok_or_else(|| self.not_found(id))?;

        if let Some((field, value)) = unique.and_then(|field| changes.get(field).map(|value| (field, value))) {
            if records
                .iter()
                .any(|(other, r)| *other != id && r.get(field) == Some(value))
            {
                return Err(StoreError::Conflict(format!(
                    "{} with {} {} already exists",
                    self.collection, field, value
                )));
            }
        }

        let record = records.get_mut(&id).ok_or_else(|| self.not_found(id))?;

        for (key, value) in changes {
            record.insert(key, value);
        }
        record.insert("updated_at".into(), Value::String(now()));

        tracing::debug!("Updated {} {}", self.collection, id);
        Ok(record.clone())
    }

    pub async fn delete_one(&self, id: Uuid) -> Result<Record, StoreError> {
        let mut collections = self.store.collections.write().await;
        let removed = collections
            .get_mut(&self.collection)
            .and_then(|records| records.remove(&id))
            .ok_or_else(|| self.not_found(id))?;

        tracing::debug!("Deleted {} {}", self.collection, id);
        Ok(removed)
    }

    fn not_found(&self, id: Uuid) -> StoreError {
        StoreError::NotFound {
            collection: self.collection.clone(),
            id,
        }
    }
}

fn strip_system_fields(mut fields: Record) -> Record {
    fields.retain(|key, _| !SYSTEM_FIELDS.contains(&key.as_str()));
    fields
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}
