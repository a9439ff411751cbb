//! The store: identity table, normalizer, and serializer.
//!
//! A [`Store`] owns the flat `type -> id -> record` table that is the single
//! source of truth for every resource the client has seen. One store exists
//! per backend connection; there is no module-level singleton.
//!
//! # Identity
//!
//! At most one record exists per `(type, id)` pair for the lifetime of the
//! store. Every relationship reference, however deeply nested across
//! responses, resolves to the same [`RecordHandle`], which makes hydration
//! idempotent and lets a mutation made through one reference show through
//! every other reference to the same logical resource. Records are never
//! evicted: a server-side delete removes the resource from whatever the
//! application is displaying, not from the identity table.
//!
//! # Materialization
//!
//! [`Store::materialize`] accepts a response body in any of the three read
//! shapes and, in order:
//!
//! 1. materializes the `included` array first, so primary-data hydration
//!    finds fully populated records instead of empty placeholders;
//! 2. captures `meta`;
//! 3. unwraps the primary data, remembering single vs array;
//! 4. for each resource: resolves its record through the identity table,
//!    replaces the snapshot wholesale, then hydrates: snapshot attributes
//!    are copied onto the live surface and each non-null linkage is resolved
//!    to live references; an explicitly null linkage clears the live field.
//!
//! Linkage entries missing `type` or `id` are skipped rather than erroring.
//!
//! # Serialization
//!
//! [`Store::serialize`] is the inverse: it walks a record's live surface and
//! splits it into attributes and relationship linkage. Whether a value is a
//! relationship is decided structurally through
//! [`ResourceIdentifier::from_value`], because a relationship field may hold
//! a plain `{type, id}` placeholder assembled by user code. Null values
//! under a known relationship name serialize as an explicit `{data: null}`
//! clear; any other value under a declared relationship name is a
//! programmer error and fails fast.
//!
//! # Events
//!
//! Lifecycle notifications are broadcast through a [`tokio::sync::broadcast`]
//! channel; see [`Store::subscribe`] and [`StoreEvent`].

use std::collections::{BTreeMap, BTreeSet, HashMap};

use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::{Record, RecordHandle, RelationshipRef, Snapshot};
use crate::types::{
    Document, Map, PrimaryData, Relationship, ResourceIdentifier, ResourceObject, WriteDocument,
    WriteResource,
};

/// Lifecycle notification broadcast by the store.
///
/// `Saved` always accompanies `Created` or `Updated`; subscribe for whichever
/// granularity the UI needs.
#[derive(Clone, Debug)]
pub enum StoreEvent {
    Saved { record: RecordHandle },
    Created { record: RecordHandle },
    Updated { record: RecordHandle },
    Deleted { record: RecordHandle },
    SaveFailed { record: RecordHandle, message: String },
    DeleteFailed { record: RecordHandle, message: String },
    FindFailed { message: String },
}

/// Primary data of a materialized response, preserving the input shape.
#[derive(Clone, Debug)]
pub enum Primary {
    /// `data` was null or absent.
    None,
    /// `data` was a single resource object.
    One(RecordHandle),
    /// `data` was an array, in server order.
    Many(Vec<RecordHandle>),
}

impl Primary {
    pub fn one(&self) -> Option<&RecordHandle> {
        match self {
            Self::One(record) => Some(record),
            _ => None,
        }
    }

    /// All primary records regardless of shape.
    pub fn records(&self) -> Vec<RecordHandle> {
        match self {
            Self::None => Vec::new(),
            Self::One(record) => vec![record.clone()],
            Self::Many(records) => records.clone(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Self::None => 0,
            Self::One(_) => 1,
            Self::Many(records) => records.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of materializing a response body.
#[derive(Clone, Debug)]
pub struct Materialized {
    pub data: Primary,
    /// Records materialized from the `included` array.
    pub included: Vec<RecordHandle>,
    pub meta: Map,
    /// The original input, untouched.
    pub response: Value,
}

impl Materialized {
    /// The single primary record, when the response was single-resource.
    pub fn record(&self) -> Option<&RecordHandle> {
        self.data.one()
    }

    /// All primary records regardless of shape.
    pub fn records(&self) -> Vec<RecordHandle> {
        self.data.records()
    }
}

/// Identity table, normalizer, and serializer for one backend connection.
#[derive(Debug)]
pub struct Store {
    records: RwLock<HashMap<String, HashMap<String, RecordHandle>>>,
    declared: RwLock<HashMap<String, BTreeSet<String>>>,
    events: broadcast::Sender<StoreEvent>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl Store {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            records: RwLock::new(HashMap::new()),
            declared: RwLock::new(HashMap::new()),
            events,
        }
    }

    /// Subscribe to lifecycle events. Receivers lagging more than the
    /// channel capacity miss the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub(crate) fn emit(&self, event: StoreEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    /// Declare relationship names for a type, so the serializer can emit an
    /// explicit `{data: null}` clear for relationships the record has never
    /// had loaded into its snapshot.
    pub fn declare_relationships<I, S>(&self, kind: &str, names: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.declared
            .write()
            .entry(kind.to_string())
            .or_default()
            .extend(names.into_iter().map(Into::into));
    }

    /// A new local record, not yet indexed in the identity table.
    pub fn create_record(&self, kind: impl Into<String>) -> RecordHandle {
        RecordHandle::new(Record::new(kind))
    }

    /// The record for `(kind, id)`, lazily creating an unpersisted
    /// placeholder. Idempotent: repeated calls return handles to the same
    /// underlying record.
    pub fn get_or_create(&self, kind: &str, id: &str) -> RecordHandle {
        self.records
            .write()
            .entry(kind.to_string())
            .or_default()
            .entry(id.to_string())
            .or_insert_with(|| {
                let mut record = Record::new(kind);
                record.set_id(id);
                RecordHandle::new(record)
            })
            .clone()
    }

    /// The record for `(kind, id)` if it is already indexed.
    pub fn get(&self, kind: &str, id: &str) -> Option<RecordHandle> {
        self.records.read().get(kind)?.get(id).cloned()
    }

    /// Force-index `record` under `(record.type, id)`, overwriting any
    /// existing slot. Used after a successful create so the server-assigned
    /// id replaces the client-side placeholder.
    pub fn persist(&self, record: &RecordHandle, id: &str) -> RecordHandle {
        record.write().set_id(id);
        self.records
            .write()
            .entry(record.kind())
            .or_default()
            .insert(id.to_string(), record.clone());
        record.clone()
    }

    /// Materialize a response body into the identity table.
    ///
    /// Accepts a bare resource object, an array of resource objects, or a
    /// `{data, included?, meta?}` envelope.
    pub fn materialize(&self, body: &Value) -> Result<Materialized> {
        let document = Document::from_value(body)?;
        self.materialize_document(&document, body, None)
    }

    /// Materialize a response body, folding a single-resource primary onto
    /// the given record instead of resolving it through the identity table.
    ///
    /// This is the create path: the local record has no id yet, so the
    /// server-assigned identity must land on the record the caller already
    /// holds, which is then indexed under the new id.
    pub(crate) fn materialize_onto(
        &self,
        record: &RecordHandle,
        body: &Value,
    ) -> Result<Materialized> {
        let document = Document::from_value(body)?;
        self.materialize_document(&document, body, Some(record))
    }

    fn materialize_document(
        &self,
        document: &Document,
        body: &Value,
        onto: Option<&RecordHandle>,
    ) -> Result<Materialized> {
        // Included first, so primary-data hydration resolves fully populated
        // records instead of empty placeholders.
        let included: Vec<RecordHandle> = document
            .included
            .iter()
            .map(|resource| self.materialize_resource(resource))
            .collect();

        let data = match &document.data {
            None => Primary::None,
            Some(PrimaryData::One(resource)) => match onto {
                Some(record) => Primary::One(self.materialize_resource_onto(record, resource)),
                None => Primary::One(self.materialize_resource(resource)),
            },
            Some(PrimaryData::Many(resources)) => Primary::Many(
                resources
                    .iter()
                    .map(|resource| self.materialize_resource(resource))
                    .collect(),
            ),
        };

        debug!(
            primary = data.len(),
            included = included.len(),
            "materialized document"
        );

        Ok(Materialized {
            data,
            included,
            meta: document.meta.clone(),
            response: body.clone(),
        })
    }

    fn materialize_resource(&self, resource: &ResourceObject) -> RecordHandle {
        let record = match &resource.id {
            Some(id) => self.get_or_create(&resource.kind, id),
            // A primary resource without an id cannot be deduplicated.
            None => self.create_record(resource.kind.clone()),
        };
        self.materialize_resource_onto(&record, resource)
    }

    fn materialize_resource_onto(
        &self,
        record: &RecordHandle,
        resource: &ResourceObject,
    ) -> RecordHandle {
        record.write().materialize(resource);
        if let Some(id) = &resource.id {
            // Covers the create path, where the record was not yet indexed;
            // a no-op overwrite otherwise.
            self.persist(record, id);
        }
        self.hydrate(record);
        record.clone()
    }

    /// Populate the live surface from the snapshot.
    ///
    /// Attributes are copied key by key; relationships with non-null linkage
    /// are resolved to live references through the identity table; an
    /// explicitly null linkage clears the live field rather than leaving a
    /// stale reference. Malformed linkage entries are skipped.
    fn hydrate(&self, record: &RecordHandle) {
        let snapshot: Snapshot = record.read().snapshot().clone();
        {
            let mut rec = record.write();
            for (name, value) in &snapshot.attributes {
                rec.attributes.insert(name.clone(), value.clone());
            }
            rec.meta = snapshot.meta.clone();
        }
        // References are resolved without holding the record lock: a
        // resource may relate to itself.
        for (name, relationship) in &snapshot.relationships {
            let resolved = match &relationship.data {
                Value::Null => Some(RelationshipRef::Empty),
                Value::Array(items) => Some(RelationshipRef::ToMany(
                    items
                        .iter()
                        .filter_map(ResourceIdentifier::from_value)
                        .map(|ident| self.get_or_create(&ident.kind, &ident.id))
                        .collect(),
                )),
                other => match ResourceIdentifier::from_value(other) {
                    Some(ident) => Some(RelationshipRef::ToOne(
                        self.get_or_create(&ident.kind, &ident.id),
                    )),
                    None => {
                        debug!(name = %name, "skipping malformed relationship linkage");
                        None
                    }
                },
            };
            if let Some(reference) = resolved {
                record.write().set_relationship(name.clone(), reference);
            }
        }
    }

    /// Serialize a record's live surface into a JSON:API write document.
    pub fn serialize(&self, record: &RecordHandle) -> Result<WriteDocument> {
        let rec = record.read();
        let declared = self
            .declared
            .read()
            .get(rec.kind())
            .cloned()
            .unwrap_or_default();
        let known_relationship = |name: &str| {
            rec.snapshot().relationships.contains_key(name) || declared.contains(name)
        };

        let mut attributes = Map::new();
        let mut relationships: BTreeMap<String, Relationship> = BTreeMap::new();

        for (name, value) in rec.attributes() {
            if let Some(ident) = ResourceIdentifier::from_value(value) {
                relationships.insert(name.clone(), Relationship::to_one(ident));
                continue;
            }
            match value {
                Value::Array(items)
                    if items
                        .first()
                        .is_some_and(|item| ResourceIdentifier::from_value(item).is_some()) =>
                {
                    relationships.insert(
                        name.clone(),
                        Relationship::to_many(
                            items
                                .iter()
                                .filter_map(ResourceIdentifier::from_value)
                                .collect(),
                        ),
                    );
                }
                Value::Null if known_relationship(name) => {
                    // Explicit relationship clear, distinct from an absent
                    // attribute.
                    relationships.insert(name.clone(), Relationship::empty());
                }
                _ if declared.contains(name.as_str()) => {
                    return Err(Error::Serialize {
                        kind: rec.kind().to_string(),
                        field: name.clone(),
                    });
                }
                _ => {
                    attributes.insert(name.clone(), value.clone());
                }
            }
        }

        for (name, reference) in rec.relationships() {
            let linkage = match reference {
                RelationshipRef::Empty => Relationship::empty(),
                RelationshipRef::ToOne(handle) => match handle.identifier() {
                    Some(ident) => Relationship::to_one(ident),
                    // A reference to a record that was never saved has no id
                    // to link against.
                    None => {
                        return Err(Error::Serialize {
                            kind: rec.kind().to_string(),
                            field: name.clone(),
                        })
                    }
                },
                RelationshipRef::ToMany(handles) => Relationship::to_many(
                    handles.iter().filter_map(RecordHandle::identifier).collect(),
                ),
            };
            relationships.insert(name.clone(), linkage);
        }

        Ok(WriteDocument {
            data: WriteResource {
                id: rec.id().map(str::to_string),
                kind: rec.kind().to_string(),
                attributes,
                relationships,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_is_unique_per_type_and_id() {
        let store = Store::new();
        let a = store.get_or_create("post", "1");
        let b = store.get_or_create("post", "1");
        assert!(RecordHandle::ptr_eq(&a, &b));

        let other_type = store.get_or_create("user", "1");
        assert!(!RecordHandle::ptr_eq(&a, &other_type));
    }

    #[test]
    fn materializing_twice_reuses_the_record() {
        let store = Store::new();
        let first = store
            .materialize(&json!({"data": {"type": "post", "id": "1", "attributes": {"title": "a"}}}))
            .unwrap();
        let second = store
            .materialize(&json!({"data": {"type": "post", "id": "1", "attributes": {"title": "b"}}}))
            .unwrap();
        let a = first.record().unwrap();
        let b = second.record().unwrap();
        assert!(RecordHandle::ptr_eq(a, b));
        assert_eq!(a.attr("title"), Some(json!("b")));
    }

    #[test]
    fn included_materialized_before_primary() {
        let store = Store::new();
        let result = store
            .materialize(&json!({
                "data": {
                    "type": "post", "id": "1",
                    "relationships": {"author": {"data": {"type": "user", "id": "9"}}}
                },
                "included": [{"type": "user", "id": "9", "attributes": {"name": "Ada"}}]
            }))
            .unwrap();

        let post = result.record().unwrap();
        let Some(RelationshipRef::ToOne(author)) = post.relationship("author") else {
            panic!("author not hydrated");
        };
        assert_eq!(author.attr("name"), Some(json!("Ada")));
        assert!(author.persisted());
        assert_eq!(result.included.len(), 1);
        assert!(RecordHandle::ptr_eq(&author, &result.included[0]));
    }

    #[test]
    fn single_and_array_shapes_unwrap_differently() {
        let store = Store::new();

        let one = store
            .materialize(&json!({"data": {"type": "post", "id": "1"}}))
            .unwrap();
        assert!(matches!(one.data, Primary::One(_)));

        let many = store
            .materialize(&json!({"data": [{"type": "post", "id": "1"}]}))
            .unwrap();
        match &many.data {
            Primary::Many(records) => assert_eq!(records.len(), 1),
            other => panic!("expected many, got {other:?}"),
        }

        let none = store.materialize(&json!({"data": null})).unwrap();
        assert!(matches!(none.data, Primary::None));
        assert!(none.data.is_empty());
    }

    #[test]
    fn meta_is_captured() {
        let store = Store::new();
        let result = store
            .materialize(&json!({"data": [], "meta": {"record_count": 12}}))
            .unwrap();
        assert_eq!(result.meta.get("record_count"), Some(&json!(12)));
    }

    #[test]
    fn null_linkage_clears_a_previous_reference() {
        let store = Store::new();
        store
            .materialize(&json!({
                "data": {
                    "type": "post", "id": "1",
                    "relationships": {"author": {"data": {"type": "user", "id": "9"}}}
                }
            }))
            .unwrap();

        let result = store
            .materialize(&json!({
                "data": {
                    "type": "post", "id": "1",
                    "relationships": {"author": {"data": null}}
                }
            }))
            .unwrap();

        let post = result.record().unwrap();
        assert!(matches!(
            post.relationship("author"),
            Some(RelationshipRef::Empty)
        ));
    }

    #[test]
    fn malformed_linkage_entries_are_skipped() {
        let store = Store::new();
        let result = store
            .materialize(&json!({
                "data": {
                    "type": "post", "id": "1",
                    "relationships": {
                        "comments": {"data": [
                            {"type": "comment", "id": "1"},
                            {"type": "comment"}
                        ]},
                        "author": {"data": {"id": "9"}}
                    }
                }
            }))
            .unwrap();

        let post = result.record().unwrap();
        let Some(RelationshipRef::ToMany(comments)) = post.relationship("comments") else {
            panic!("comments not hydrated");
        };
        assert_eq!(comments.len(), 1);
        // Malformed to-one linkage is skipped, not hydrated, not an error.
        assert!(post.relationship("author").is_none());
    }

    #[test]
    fn snapshot_is_replaced_not_merged() {
        let store = Store::new();
        store
            .materialize(&json!({
                "data": {"type": "post", "id": "1", "attributes": {"title": "a", "body": "text"}}
            }))
            .unwrap();
        let result = store
            .materialize(&json!({
                "data": {"type": "post", "id": "1", "attributes": {"title": "a"}}
            }))
            .unwrap();
        let record = result.record().unwrap();
        // The baseline dropped `body`, so the lingering live value is now a
        // local change.
        assert!(record.read().snapshot().attributes.get("body").is_none());
        assert_eq!(record.dirty_fields(), vec!["body"]);
    }

    #[test]
    fn serialize_round_trips_attributes_and_linkage() {
        let store = Store::new();
        let result = store
            .materialize(&json!({
                "data": {
                    "type": "post", "id": "1",
                    "attributes": {"title": "Hello", "views": 3},
                    "relationships": {
                        "author": {"data": {"type": "user", "id": "9"}},
                        "comments": {"data": [
                            {"type": "comment", "id": "1"},
                            {"type": "comment", "id": "2"}
                        ]}
                    }
                }
            }))
            .unwrap();

        let doc = store.serialize(result.record().unwrap()).unwrap();
        assert_eq!(doc.data.id.as_deref(), Some("1"));
        assert_eq!(doc.data.kind, "post");
        assert_eq!(doc.data.attributes.get("title"), Some(&json!("Hello")));
        assert_eq!(doc.data.attributes.get("views"), Some(&json!(3)));
        assert_eq!(
            doc.data.relationships.get("author").map(|r| &r.data),
            Some(&json!({"type": "user", "id": "9"}))
        );
        assert_eq!(
            doc.data.relationships.get("comments").map(|r| &r.data),
            Some(&json!([
                {"type": "comment", "id": "1"},
                {"type": "comment", "id": "2"}
            ]))
        );
    }

    #[test]
    fn serialize_emits_null_clear_for_known_relationships() {
        let store = Store::new();
        let result = store
            .materialize(&json!({
                "data": {
                    "type": "post", "id": "1",
                    "relationships": {"author": {"data": {"type": "user", "id": "9"}}}
                }
            }))
            .unwrap();
        let post = result.record().unwrap();
        post.set_relationship("author", RelationshipRef::Empty);

        let doc = store.serialize(post).unwrap();
        assert_eq!(
            doc.data.relationships.get("author").map(|r| &r.data),
            Some(&Value::Null)
        );
    }

    #[test]
    fn serialize_duck_types_placeholder_identifiers() {
        let store = Store::new();
        let record = store.create_record("post");
        record.set_attr("title", "Hello");
        record.set_attr("author", json!({"type": "user", "id": "9"}));
        record.set_attr(
            "comments",
            json!([{"type": "comment", "id": "1"}, {"type": "comment", "id": "2"}]),
        );

        let doc = store.serialize(&record).unwrap();
        assert!(doc.data.id.is_none());
        assert_eq!(doc.data.attributes.len(), 1);
        assert!(doc.data.relationships.contains_key("author"));
        assert!(doc.data.relationships.contains_key("comments"));
    }

    #[test]
    fn serialize_null_declared_relationship_clears() {
        let store = Store::new();
        store.declare_relationships("post", ["author"]);
        let record = store.create_record("post");
        record.set_attr("author", Value::Null);

        let doc = store.serialize(&record).unwrap();
        assert_eq!(
            doc.data.relationships.get("author").map(|r| &r.data),
            Some(&Value::Null)
        );
        assert!(doc.data.attributes.is_empty());
    }

    #[test]
    fn serialize_fails_fast_on_mistyped_relationship() {
        let store = Store::new();
        store.declare_relationships("post", ["author"]);
        let record = store.create_record("post");
        record.set_attr("author", "not-a-reference");

        let err = store.serialize(&record).unwrap_err();
        match err {
            Error::Serialize { kind, field } => {
                assert_eq!(kind, "post");
                assert_eq!(field, "author");
            }
            other => panic!("expected serialize error, got {other:?}"),
        }
    }

    #[test]
    fn serialize_fails_on_reference_to_unsaved_record() {
        let store = Store::new();
        let record = store.create_record("post");
        let unsaved = store.create_record("user");
        record.set_relationship("author", RelationshipRef::ToOne(unsaved));

        assert!(matches!(
            store.serialize(&record),
            Err(Error::Serialize { .. })
        ));
    }

    #[test]
    fn persist_indexes_the_record_under_the_new_id() {
        let store = Store::new();
        let record = store.create_record("post");
        assert!(store.get("post", "42").is_none());

        store.persist(&record, "42");
        let found = store.get("post", "42").unwrap();
        assert!(RecordHandle::ptr_eq(&record, &found));
        assert_eq!(record.id().as_deref(), Some("42"));
    }

    #[test]
    fn self_referential_resource_hydrates() {
        let store = Store::new();
        let result = store
            .materialize(&json!({
                "data": {
                    "type": "category", "id": "1",
                    "relationships": {"parent": {"data": {"type": "category", "id": "1"}}}
                }
            }))
            .unwrap();
        let category = result.record().unwrap();
        let Some(RelationshipRef::ToOne(parent)) = category.relationship("parent") else {
            panic!("parent not hydrated");
        };
        assert!(RecordHandle::ptr_eq(category, &parent));
    }
}
