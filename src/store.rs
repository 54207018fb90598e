//! Credential store: persistence of issued access credentials.
//!
//! The [`TokenStore`] trait abstracts over storage backends. The bundled
//! implementation is [`InMemoryTokenStore`], a `DashMap` keyed by token id.
//!
//! # Concurrency
//!
//! `create` uses the entry API so two concurrent creates of the same id cannot
//! both succeed. `update` is optimistic: the caller passes back the record it
//! read, and the write is rejected when the stored `version` has moved on in
//! the meantime. Of two concurrent refreshes of one credential exactly one
//! lands.

use dashmap::{DashMap, mapref::entry::Entry};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::token::ClaimSet;

/// Property holding the audience (the party the credential was issued to).
pub const AUDIENCE_PROPERTY: &str = "audience";
/// Property holding the credential type; always [`BEARER`].
pub const AUTH_TYPE_PROPERTY: &str = "authType";
/// Property linking a credential to the transfer process that obtained it.
pub const PROCESS_ID_PROPERTY: &str = "process_id";
/// The only credential type issued.
pub const BEARER: &str = "bearer";

/// Opaque descriptor of the resource a credential grants access to.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DataAddress {
    /// Address type tag (e.g. `HttpData`).
    #[serde(rename = "type")]
    pub address_type: String,
    /// Type-specific properties.
    #[serde(default)]
    pub properties: Map<String, Value>,
}

impl DataAddress {
    /// Create an address of the given type with no properties.
    #[must_use]
    pub fn new(address_type: impl Into<String>) -> Self {
        Self {
            address_type: address_type.into(),
            properties: Map::new(),
        }
    }

    /// Builder-style property setter.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }
}

/// Durable record of an issued credential.
///
/// `id`, `claims` and `data_address` never change after creation; only
/// `additional_properties` is rewritten by refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccessTokenData {
    /// Token id (`jti` of the access token).
    pub id: String,
    /// Caller-supplied claims the access token was built from.
    pub claims: ClaimSet,
    /// The resource the credential grants access to.
    pub data_address: DataAddress,
    /// Mutable metadata (audience, auth type, caller passthrough).
    #[serde(default)]
    pub additional_properties: Map<String, Value>,
    /// Revision counter maintained by the store.
    #[serde(default)]
    pub version: u64,
}

impl AccessTokenData {
    /// Create a new record at version 0.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        claims: ClaimSet,
        data_address: DataAddress,
        additional_properties: Map<String, Value>,
    ) -> Self {
        Self {
            id: id.into(),
            claims,
            data_address,
            additional_properties,
            version: 0,
        }
    }

    /// String value of an additional property.
    #[must_use]
    pub fn property(&self, key: &str) -> Option<&str> {
        self.additional_properties.get(key).and_then(Value::as_str)
    }

    /// The party this credential was issued to.
    #[must_use]
    pub fn audience(&self) -> Option<&str> {
        self.property(AUDIENCE_PROPERTY)
    }

    /// Resolve a dotted path into one of the JSON bags
    /// (`additionalProperties.process_id`, `claims.sub`,
    /// `dataAddress.properties.assetId`).
    fn field(&self, path: &str) -> Option<&Value> {
        let (head, rest) = path.split_once('.')?;
        match head {
            "additionalProperties" => lookup(&self.additional_properties, rest),
            "claims" => lookup(self.claims.as_map(), rest),
            "dataAddress" => lookup(&self.data_address.properties, rest.strip_prefix("properties.")?),
            _ => None,
        }
    }

    fn matches(&self, criterion: &Criterion) -> bool {
        if criterion.field == "id" {
            return self.id == criterion.value;
        }
        if criterion.field == "dataAddress.type" {
            return self.data_address.address_type == criterion.value;
        }
        match self.field(&criterion.field) {
            Some(Value::String(s)) => *s == criterion.value,
            Some(other @ (Value::Number(_) | Value::Bool(_))) => {
                other.to_string() == criterion.value
            }
            _ => false,
        }
    }
}

fn lookup<'a>(map: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = map.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

/// Equality filter on a dotted field path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Criterion {
    /// Dotted path, e.g. `additionalProperties.process_id`.
    pub field: String,
    /// Expected value, compared against the field's string form.
    pub value: String,
}

impl Criterion {
    /// `field == value`.
    #[must_use]
    pub fn equals(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Conjunction of criteria. An empty query matches everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QuerySpec {
    /// All must match.
    pub filter: Vec<Criterion>,
}

impl QuerySpec {
    /// Empty query.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a criterion.
    #[must_use]
    pub fn with(mut self, criterion: Criterion) -> Self {
        self.filter.push(criterion);
        self
    }
}

/// Credential store failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// `create` with an id that is already stored.
    #[error("AccessTokenData with ID '{0}' already exists.")]
    AlreadyExists(String),

    /// No record with this id.
    #[error("AccessTokenData with ID '{0}' does not exist.")]
    NotFound(String),

    /// `update` lost a race with another writer.
    #[error(
        "AccessTokenData with ID '{id}' was modified concurrently (expected version {expected}, found {actual})."
    )]
    Conflict {
        /// Record id.
        id: String,
        /// Version the caller read.
        expected: u64,
        /// Version currently stored.
        actual: u64,
    },

    /// Backend-specific failure.
    #[error("{0}")]
    Backend(String),
}

/// Trait abstracting the credential storage backend.
///
/// Implementations must be `Send + Sync` because the store is shared across
/// async tasks.
#[async_trait::async_trait]
pub trait TokenStore: Send + Sync + 'static {
    /// Insert a new record. Fails with [`StoreError::AlreadyExists`] if the id
    /// is taken.
    async fn create(&self, data: AccessTokenData) -> Result<(), StoreError>;

    /// Look up a record by id.
    async fn get_by_id(&self, id: &str) -> Option<AccessTokenData>;

    /// Replace an existing record.
    ///
    /// `data.version` must equal the stored version; the stored copy is bumped
    /// by one. Returns the record as stored.
    async fn update(&self, data: AccessTokenData) -> Result<AccessTokenData, StoreError>;

    /// Remove a record. Returns `true` if it existed.
    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError>;

    /// All records matching `spec`.
    async fn query(&self, spec: &QuerySpec) -> Result<Vec<AccessTokenData>, StoreError>;
}

/// In-memory store: id → record.
#[derive(Debug, Default)]
pub struct InMemoryTokenStore {
    records: DashMap<String, AccessTokenData>,
}

impl InMemoryTokenStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// `true` when the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait::async_trait]
impl TokenStore for InMemoryTokenStore {
    async fn create(&self, mut data: AccessTokenData) -> Result<(), StoreError> {
        match self.records.entry(data.id.clone()) {
            Entry::Occupied(_) => Err(StoreError::AlreadyExists(data.id)),
            Entry::Vacant(slot) => {
                data.version = 0;
                debug!(id = %data.id, "Stored access token data");
                slot.insert(data);
                Ok(())
            }
        }
    }

    async fn get_by_id(&self, id: &str) -> Option<AccessTokenData> {
        self.records.get(id).map(|entry| entry.clone())
    }

    async fn update(&self, mut data: AccessTokenData) -> Result<AccessTokenData, StoreError> {
        let Some(mut current) = self.records.get_mut(&data.id) else {
            return Err(StoreError::NotFound(data.id));
        };
        if current.version != data.version {
            return Err(StoreError::Conflict {
                id: data.id,
                expected: data.version,
                actual: current.version,
            });
        }
        data.version += 1;
        *current = data.clone();
        debug!(id = %data.id, version = data.version, "Updated access token data");
        Ok(data)
    }

    async fn delete_by_id(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.records.remove(id).is_some())
    }

    async fn query(&self, spec: &QuerySpec) -> Result<Vec<AccessTokenData>, StoreError> {
        Ok(self
            .records
            .iter()
            .filter(|entry| spec.filter.iter().all(|c| entry.value().matches(c)))
            .map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn record(id: &str, process_id: &str) -> AccessTokenData {
        let mut props = Map::new();
        props.insert(AUDIENCE_PROPERTY.to_string(), json!("did:web:bob"));
        props.insert(PROCESS_ID_PROPERTY.to_string(), json!(process_id));
        AccessTokenData::new(
            id,
            ClaimSet::new().with("sub", "did:web:alice"),
            DataAddress::new("HttpData").with_property("assetId", "asset-1"),
            props,
        )
    }

    #[tokio::test]
    async fn create_rejects_duplicate_ids() {
        // GIVEN: a store holding one record
        let store = InMemoryTokenStore::new();
        store.create(record("t1", "p1")).await.unwrap();

        // WHEN: the same id is created again
        let err = store.create(record("t1", "p2")).await.unwrap_err();

        // THEN: the original record survives
        assert_eq!(err, StoreError::AlreadyExists("t1".to_string()));
        assert_eq!(
            store.get_by_id("t1").await.unwrap().property(PROCESS_ID_PROPERTY),
            Some("p1")
        );
    }

    #[tokio::test]
    async fn update_bumps_version_and_rejects_stale_writes() {
        // GIVEN: a stored record read twice by two writers
        let store = InMemoryTokenStore::new();
        store.create(record("t1", "p1")).await.unwrap();
        let mut first = store.get_by_id("t1").await.unwrap();
        let mut second = first.clone();

        // WHEN: both write back
        first
            .additional_properties
            .insert("refreshToken".to_string(), json!("a"));
        let stored = store.update(first).await.unwrap();
        second
            .additional_properties
            .insert("refreshToken".to_string(), json!("b"));
        let err = store.update(second).await.unwrap_err();

        // THEN: the first write lands, the second conflicts
        assert_eq!(stored.version, 1);
        assert_eq!(
            err,
            StoreError::Conflict {
                id: "t1".to_string(),
                expected: 0,
                actual: 1
            }
        );
        assert_eq!(
            store.get_by_id("t1").await.unwrap().property("refreshToken"),
            Some("a")
        );
    }

    #[tokio::test]
    async fn update_of_missing_record_is_not_found() {
        let store = InMemoryTokenStore::new();
        let err = store.update(record("ghost", "p")).await.unwrap_err();
        assert_eq!(err.to_string(), "AccessTokenData with ID 'ghost' does not exist.");
    }

    #[tokio::test]
    async fn delete_reports_existence() {
        let store = InMemoryTokenStore::new();
        store.create(record("t1", "p1")).await.unwrap();
        assert!(store.delete_by_id("t1").await.unwrap());
        assert!(!store.delete_by_id("t1").await.unwrap());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn query_filters_on_dotted_paths() {
        // GIVEN: records for two processes
        let store = InMemoryTokenStore::new();
        store.create(record("t1", "p1")).await.unwrap();
        store.create(record("t2", "p1")).await.unwrap();
        store.create(record("t3", "p2")).await.unwrap();

        // WHEN: querying by process id
        let spec = QuerySpec::new().with(Criterion::equals("additionalProperties.process_id", "p1"));
        let mut ids: Vec<_> = store
            .query(&spec)
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.id)
            .collect();
        ids.sort();

        // THEN: only that process's credentials are returned
        assert_eq!(ids, vec!["t1", "t2"]);

        let by_claim = QuerySpec::new().with(Criterion::equals("claims.sub", "did:web:alice"));
        assert_eq!(store.query(&by_claim).await.unwrap().len(), 3);

        let by_asset =
            QuerySpec::new().with(Criterion::equals("dataAddress.properties.assetId", "asset-1"));
        assert_eq!(store.query(&by_asset).await.unwrap().len(), 3);

        let by_id = QuerySpec::new().with(Criterion::equals("id", "t3"));
        assert_eq!(store.query(&by_id).await.unwrap().len(), 1);

        let none = QuerySpec::new().with(Criterion::equals("additionalProperties.process_id", "p9"));
        assert!(store.query(&none).await.unwrap().is_empty());
    }

    #[test]
    fn record_serializes_camel_case() {
        let json = serde_json::to_value(record("t1", "p1")).unwrap();
        assert!(json.get("dataAddress").is_some());
        assert!(json.get("additionalProperties").is_some());
        assert_eq!(json["dataAddress"]["type"], "HttpData");
    }
}
