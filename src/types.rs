//! Wire-format types for the JSON:API subset this crate consumes and produces.
//!
//! Read documents arrive in one of three shapes: a bare resource object, an
//! array of resource objects, or an envelope `{data, included?, meta?}`.
//! [`Document::from_value`] normalizes all three into an envelope while
//! remembering whether the primary data was a single resource or an array,
//! so materialization can unwrap the result back to the original shape.
//!
//! Write documents ([`WriteDocument`]) carry only attributes and relationship
//! linkage; `included` and `meta` are never sent, and `id` is omitted for
//! create requests.
//!
//! # Key Types
//!
//! | Type | Description |
//! |------|-------------|
//! | [`ResourceIdentifier`] | Raw `{type, id}` linkage pair |
//! | [`Relationship`] | A `relationships.<name>` object with raw `data` linkage |
//! | [`Linkage`] | Parsed linkage: empty, to-one, or to-many |
//! | [`ResourceObject`] | One resource as received from the server |
//! | [`Document`] | Read envelope with primary data, `included`, and `meta` |
//! | [`WriteDocument`] | Write payload produced by the serializer |

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::Result;

/// String-keyed JSON object, used for attributes and meta maps.
pub type Map = BTreeMap<String, Value>;

/// A raw `{type, id}` reference as found in `relationships.<name>.data`.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResourceIdentifier {
    #[serde(rename = "type")]
    pub kind: String,
    pub id: String,
}

impl ResourceIdentifier {
    pub fn new(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            id: id.into(),
        }
    }

    /// The single structural check for "does this value reference a record".
    ///
    /// A value qualifies when it is an object carrying a string `type` and a
    /// defined `id`. The check is structural rather than type-based because a
    /// relationship field can legitimately hold a plain `{type, id}` object
    /// assembled by user code instead of a hydrated record reference. Every
    /// shape inference in the crate (linkage parsing, serialization) goes
    /// through this one predicate.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let kind = obj.get("type")?.as_str()?;
        let id = match obj.get("id")? {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            _ => return None,
        };
        Some(Self::new(kind, id))
    }

    /// Sortable `"type:id"` token used by the order-insensitive to-many
    /// comparison in dirty checking.
    pub fn token(&self) -> String {
        format!("{}:{}", self.kind, self.id)
    }
}

/// One relationship object as received or sent over the wire.
///
/// `data` is kept raw so malformed linkage entries survive decoding and can
/// be skipped (rather than erroring) when the linkage is interpreted.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Relationship {
    #[serde(default)]
    pub data: Value,
}

impl Relationship {
    /// Explicit `{data: null}`, which clears the relationship on the server.
    pub fn empty() -> Self {
        Self { data: Value::Null }
    }

    pub fn to_one(ident: ResourceIdentifier) -> Self {
        Self {
            data: json!({ "type": ident.kind, "id": ident.id }),
        }
    }

    pub fn to_many(idents: Vec<ResourceIdentifier>) -> Self {
        let items: Vec<Value> = idents
            .into_iter()
            .map(|ident| json!({ "type": ident.kind, "id": ident.id }))
            .collect();
        Self {
            data: Value::Array(items),
        }
    }

    /// Interpret the raw `data` member.
    ///
    /// To-many entries missing `type` or `id` are dropped; a to-one value
    /// that is not a valid identifier parses as [`Linkage::Empty`].
    pub fn linkage(&self) -> Linkage {
        match &self.data {
            Value::Array(items) => Linkage::ToMany(
                items
                    .iter()
                    .filter_map(ResourceIdentifier::from_value)
                    .collect(),
            ),
            value => match ResourceIdentifier::from_value(value) {
                Some(ident) => Linkage::ToOne(ident),
                None => Linkage::Empty,
            },
        }
    }
}

/// Parsed relationship linkage.
#[derive(Clone, Debug, PartialEq)]
pub enum Linkage {
    /// `data: null`, or linkage never loaded.
    Empty,
    ToOne(ResourceIdentifier),
    ToMany(Vec<ResourceIdentifier>),
}

/// One resource object as received from the server.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResourceObject {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: Map,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub relationships: BTreeMap<String, Relationship>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub meta: Map,
}

/// Primary data of a read document: a single resource or an ordered list.
///
/// The distinction is preserved through materialization so a single-resource
/// response unwraps back to a single record rather than a one-element list.
#[derive(Clone, Debug, Deserialize)]
#[serde(untagged)]
pub enum PrimaryData {
    One(ResourceObject),
    Many(Vec<ResourceObject>),
}

/// A read envelope: `{data, included?, meta?}`.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Document {
    #[serde(default)]
    pub data: Option<PrimaryData>,
    #[serde(default)]
    pub included: Vec<ResourceObject>,
    #[serde(default)]
    pub meta: Map,
}

impl Document {
    /// Accept any of the three input shapes and normalize to an envelope.
    ///
    /// An object with a `data` member is an envelope; a bare array is a
    /// many-resource document; `null` is an empty document; anything else is
    /// treated as a bare resource object.
    pub fn from_value(value: &Value) -> Result<Self> {
        match value {
            Value::Object(obj) if obj.contains_key("data") => {
                Ok(serde_json::from_value(value.clone())?)
            }
            Value::Array(_) => Ok(Self {
                data: Some(PrimaryData::Many(serde_json::from_value(value.clone())?)),
                ..Self::default()
            }),
            Value::Null => Ok(Self::default()),
            _ => Ok(Self {
                data: Some(PrimaryData::One(serde_json::from_value(value.clone())?)),
                ..Self::default()
            }),
        }
    }
}

/// A JSON:API write payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteDocument {
    pub data: WriteResource,
}

/// The resource object inside a write payload.
///
/// `id` is omitted from the serialized form when absent, which is how create
/// requests are distinguished from updates on the wire.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WriteResource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub attributes: Map,
    #[serde(default)]
    pub relationships: BTreeMap<String, Relationship>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identifier_requires_type_and_id() {
        assert!(ResourceIdentifier::from_value(&json!({"type": "user", "id": "9"})).is_some());
        assert!(ResourceIdentifier::from_value(&json!({"type": "user"})).is_none());
        assert!(ResourceIdentifier::from_value(&json!({"id": "9"})).is_none());
        assert!(ResourceIdentifier::from_value(&json!("user:9")).is_none());
        assert!(ResourceIdentifier::from_value(&Value::Null).is_none());
    }

    #[test]
    fn identifier_accepts_numeric_id() {
        let ident = ResourceIdentifier::from_value(&json!({"type": "user", "id": 9})).unwrap();
        assert_eq!(ident.id, "9");
    }

    #[test]
    fn linkage_skips_malformed_entries() {
        let rel = Relationship {
            data: json!([
                {"type": "comment", "id": "1"},
                {"type": "comment"},
                {"id": "3"},
                {"type": "comment", "id": "4"}
            ]),
        };
        match rel.linkage() {
            Linkage::ToMany(idents) => {
                let ids: Vec<&str> = idents.iter().map(|i| i.id.as_str()).collect();
                assert_eq!(ids, vec!["1", "4"]);
            }
            other => panic!("expected to-many linkage, got {other:?}"),
        }
    }

    #[test]
    fn null_linkage_is_empty() {
        assert_eq!(Relationship::empty().linkage(), Linkage::Empty);
    }

    #[test]
    fn document_from_envelope() {
        let doc = Document::from_value(&json!({
            "data": {"type": "post", "id": "1"},
            "included": [{"type": "user", "id": "9"}],
            "meta": {"record_count": 1}
        }))
        .unwrap();
        assert!(matches!(doc.data, Some(PrimaryData::One(_))));
        assert_eq!(doc.included.len(), 1);
        assert_eq!(doc.meta.get("record_count"), Some(&json!(1)));
    }

    #[test]
    fn document_from_bare_resource_and_array() {
        let one = Document::from_value(&json!({"type": "post", "id": "1"})).unwrap();
        assert!(matches!(one.data, Some(PrimaryData::One(_))));

        let many = Document::from_value(&json!([{"type": "post", "id": "1"}])).unwrap();
        match many.data {
            Some(PrimaryData::Many(items)) => assert_eq!(items.len(), 1),
            other => panic!("expected many, got {other:?}"),
        }
    }

    #[test]
    fn document_from_null_data() {
        let doc = Document::from_value(&json!({"data": null})).unwrap();
        assert!(doc.data.is_none());
    }

    #[test]
    fn write_document_omits_absent_id() {
        let doc = WriteDocument {
            data: WriteResource {
                id: None,
                kind: "post".into(),
                attributes: Map::new(),
                relationships: BTreeMap::new(),
            },
        };
        let value = serde_json::to_value(&doc).unwrap();
        assert!(value["data"].get("id").is_none());
        assert_eq!(value["data"]["type"], "post");
    }
}
