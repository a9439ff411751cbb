//! Records: the entity abstraction held in the identity table.
//!
//! A [`Record`] carries two representations of the same resource:
//!
//! - the **snapshot**: the last server-shaped state (raw attributes,
//!   relationship linkage, meta), replaced wholesale on every
//!   materialization and used as the baseline for dirty checking;
//! - the **live surface**: attributes and relationships application code
//!   reads and writes, where relationships hold resolved [`RecordHandle`]
//!   references instead of raw linkage.
//!
//! [`RecordHandle`] is the shared-ownership view handed out by the store.
//! Every handle for a given `(type, id)` pair points at the same underlying
//! record, so a mutation made through one reference is visible through every
//! other reference to the same logical resource.
//!
//! # Dirty checking
//!
//! [`Record::dirty_fields`] compares the live surface against the snapshot:
//!
//! - a record that has never been persisted is always dirty;
//! - to-many relationships compare as sorted `"type:id"` token lists, so
//!   reordering references is not a change but adding or removing one is;
//! - to-one relationships compare by presence and `(type, id)`;
//! - a relationship that was never loaded but now holds a live value is
//!   dirty;
//! - plain attributes compare by structural JSON equality.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use serde_json::Value;

use crate::types::{Linkage, Map, Relationship, ResourceIdentifier, ResourceObject};

/// Last-materialized server-shaped state, the dirty-check baseline.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Snapshot {
    pub attributes: Map,
    pub relationships: BTreeMap<String, Relationship>,
    pub meta: Map,
}

/// A live relationship value: resolved record references, not raw linkage.
#[derive(Clone, Debug)]
pub enum RelationshipRef {
    /// Cleared, or explicitly null on the server.
    Empty,
    ToOne(RecordHandle),
    ToMany(Vec<RecordHandle>),
}

impl RelationshipRef {
    /// Sorted comparison tokens for the referenced records. A reference
    /// without an id yields a `"type:"` token that can never match server
    /// linkage, which is what makes unsaved references register as dirty.
    fn tokens(&self) -> Vec<String> {
        let token = |handle: &RecordHandle| {
            format!("{}:{}", handle.kind(), handle.id().unwrap_or_default())
        };
        match self {
            Self::Empty => Vec::new(),
            Self::ToOne(handle) => vec![token(handle)],
            Self::ToMany(handles) => handles.iter().map(token).collect(),
        }
    }
}

/// One cached resource: identity, snapshot, and live surface.
#[derive(Clone, Debug)]
pub struct Record {
    kind: String,
    id: Option<String>,
    persisted: bool,
    pub(crate) snapshot: Snapshot,
    pub(crate) attributes: Map,
    pub(crate) relationships: BTreeMap<String, RelationshipRef>,
    pub(crate) meta: Map,
}

impl Record {
    /// A new local record of the given type, never round-tripped through the
    /// server and therefore dirty until first saved.
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: None,
            persisted: false,
            snapshot: Snapshot::default(),
            attributes: Map::new(),
            relationships: BTreeMap::new(),
            meta: Map::new(),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub(crate) fn set_id(&mut self, id: impl Into<String>) {
        self.id = Some(id.into());
    }

    pub fn persisted(&self) -> bool {
        self.persisted
    }

    /// `{type, id}` identity, present once the record has an id.
    pub fn identifier(&self) -> Option<ResourceIdentifier> {
        self.id
            .as_ref()
            .map(|id| ResourceIdentifier::new(self.kind.clone(), id.clone()))
    }

    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    pub fn attributes(&self) -> &Map {
        &self.attributes
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn relationships(&self) -> &BTreeMap<String, RelationshipRef> {
        &self.relationships
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipRef> {
        self.relationships.get(name)
    }

    pub fn set_relationship(&mut self, name: impl Into<String>, reference: RelationshipRef) {
        self.relationships.insert(name.into(), reference);
    }

    pub fn meta(&self) -> &Map {
        &self.meta
    }

    /// Fold a server resource into this record.
    ///
    /// Marks the record persisted, adopts the server id, and replaces the
    /// snapshot wholesale. Snapshot field groups are never merged: a server
    /// response that dropped an attribute drops it from the baseline too.
    /// Hydration of the live surface is the store's job, since resolving
    /// relationship references needs the identity table.
    pub(crate) fn materialize(&mut self, resource: &ResourceObject) {
        self.persisted = true;
        if let Some(id) = &resource.id {
            self.id = Some(id.clone());
        }
        if !resource.kind.is_empty() {
            self.kind = resource.kind.clone();
        }
        self.snapshot = Snapshot {
            attributes: resource.attributes.clone(),
            relationships: resource.relationships.clone(),
            meta: resource.meta.clone(),
        };
    }

    /// True when the record has unsaved changes.
    ///
    /// A record that has never been persisted is always dirty, even with no
    /// fields set.
    pub fn dirty(&self) -> bool {
        !self.persisted || !self.dirty_fields().is_empty()
    }

    /// True when the named field differs from the snapshot.
    pub fn field_dirty(&self, name: &str) -> bool {
        !self.persisted || self.field_changed(name)
    }

    /// True when any of the named fields differs from the snapshot.
    pub fn any_dirty(&self, names: &[&str]) -> bool {
        !self.persisted || names.iter().any(|name| self.field_changed(name))
    }

    /// Names of all live fields that differ from the snapshot.
    pub fn dirty_fields(&self) -> Vec<String> {
        let mut names: Vec<&str> = self
            .attributes
            .keys()
            .chain(self.relationships.keys())
            .map(String::as_str)
            .collect();
        names.sort_unstable();
        names.dedup();
        names
            .into_iter()
            .filter(|name| self.field_changed(name))
            .map(str::to_string)
            .collect()
    }

    fn field_changed(&self, name: &str) -> bool {
        // A hydrated reference takes precedence over a leftover attribute of
        // the same name.
        if let Some(live) = self.relationships.get(name) {
            return self.reference_changed(name, live);
        }
        match self.attributes.get(name) {
            Some(value) => match self.snapshot.relationships.get(name) {
                // User code wrote a raw value over a relationship name.
                Some(rel) => {
                    let current = Relationship { data: value.clone() }.linkage();
                    linkage_changed(&current, &rel.linkage())
                }
                None => self.snapshot.attributes.get(name) != Some(value),
            },
            None => false,
        }
    }

    fn reference_changed(&self, name: &str, live: &RelationshipRef) -> bool {
        let Some(rel) = self.snapshot.relationships.get(name) else {
            // Never loaded from the server, but a live value is set.
            return !matches!(live, RelationshipRef::Empty);
        };
        match rel.linkage() {
            Linkage::ToMany(idents) => {
                let mut current = live.tokens();
                if matches!(live, RelationshipRef::ToOne(_)) || current.len() != idents.len() {
                    return true;
                }
                let mut baseline: Vec<String> =
                    idents.iter().map(ResourceIdentifier::token).collect();
                current.sort_unstable();
                baseline.sort_unstable();
                current != baseline
            }
            Linkage::ToOne(ident) => match live {
                RelationshipRef::ToOne(handle) => handle.identifier() != Some(ident),
                _ => true,
            },
            Linkage::Empty => !matches!(live, RelationshipRef::Empty),
        }
    }
}

fn linkage_changed(current: &Linkage, baseline: &Linkage) -> bool {
    match (current, baseline) {
        (Linkage::Empty, Linkage::Empty) => false,
        (Linkage::ToOne(a), Linkage::ToOne(b)) => a != b,
        (Linkage::ToMany(a), Linkage::ToMany(b)) => {
            if a.len() != b.len() {
                return true;
            }
            let mut left: Vec<String> = a.iter().map(ResourceIdentifier::token).collect();
            let mut right: Vec<String> = b.iter().map(ResourceIdentifier::token).collect();
            left.sort_unstable();
            right.sort_unstable();
            left != right
        }
        _ => true,
    }
}

/// Shared handle to a record in the identity table.
///
/// Cloning a handle is cheap and shares the underlying record. Pointer
/// equality ([`RecordHandle::ptr_eq`]) is the identity-uniqueness check:
/// two handles for the same `(type, id)` pair always compare equal.
#[derive(Clone)]
pub struct RecordHandle(Arc<RwLock<Record>>);

impl RecordHandle {
    pub fn new(record: Record) -> Self {
        Self(Arc::new(RwLock::new(record)))
    }

    /// Read access to the underlying record.
    pub fn read(&self) -> RwLockReadGuard<'_, Record> {
        self.0.read()
    }

    /// Write access to the underlying record.
    pub fn write(&self) -> RwLockWriteGuard<'_, Record> {
        self.0.write()
    }

    pub fn kind(&self) -> String {
        self.read().kind.clone()
    }

    pub fn id(&self) -> Option<String> {
        self.read().id.clone()
    }

    pub fn persisted(&self) -> bool {
        self.read().persisted
    }

    pub fn identifier(&self) -> Option<ResourceIdentifier> {
        self.read().identifier()
    }

    pub fn attr(&self, name: &str) -> Option<Value> {
        self.read().attr(name).cloned()
    }

    pub fn set_attr(&self, name: impl Into<String>, value: impl Into<Value>) {
        self.write().set_attr(name, value);
    }

    pub fn relationship(&self, name: &str) -> Option<RelationshipRef> {
        self.read().relationship(name).cloned()
    }

    pub fn set_relationship(&self, name: impl Into<String>, reference: RelationshipRef) {
        self.write().set_relationship(name, reference);
    }

    pub fn meta(&self) -> Map {
        self.read().meta.clone()
    }

    pub fn dirty(&self) -> bool {
        self.read().dirty()
    }

    pub fn field_dirty(&self, name: &str) -> bool {
        self.read().field_dirty(name)
    }

    pub fn any_dirty(&self, names: &[&str]) -> bool {
        self.read().any_dirty(names)
    }

    pub fn dirty_fields(&self) -> Vec<String> {
        self.read().dirty_fields()
    }

    /// An editable copy that is no longer shared with the identity table but
    /// still serializes into the same resource.
    pub fn clone_detached(&self) -> Self {
        Self::new(self.read().clone())
    }

    /// Whether two handles point at the same underlying record.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }
}

impl fmt::Debug for RecordHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Shallow on purpose: relationship graphs can be cyclic.
        match self.0.try_read() {
            Some(record) => f
                .debug_struct("RecordHandle")
                .field("type", &record.kind)
                .field("id", &record.id)
                .field("persisted", &record.persisted)
                .finish(),
            None => f.write_str("RecordHandle(<locked>)"),
        }
    }
}
