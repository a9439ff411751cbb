//! Client-side normalization cache for JSON:API backends.
//!
//! This crate intercepts HTTP responses encoded as JSON:API documents,
//! normalizes the nested resource graph into a flat per-type/per-id identity
//! table, resolves relationships into live record references, and can turn
//! edited records back into JSON:API write payloads, with dirty tracking in
//! between so calling code can detect unsaved local changes.
//!
//! # Overview
//!
//! - **Identity**: at most one record exists per `(type, id)` pair, for the
//!   lifetime of the [`Store`]. Every nested reference across every response
//!   resolves to the same [`RecordHandle`], so a mutation made through one
//!   reference is visible through all of them.
//! - **Dual representation**: each record keeps the raw server-shaped
//!   snapshot (the dirty-check baseline, replaced wholesale on every
//!   materialization) alongside a live surface of attributes and resolved
//!   relationship references.
//! - **Round trip**: `Client → Transport → Store::materialize → records`,
//!   then `edits → Store::serialize → Transport`, and the response feeds
//!   back through materialization, closing the loop.
//!
//! # Modules
//!
//! - [`client`] - Resource-level verbs (`find`, `save`, `delete`)
//! - [`store`] - Identity table, normalizer, serializer, event channel
//! - [`record`] - Records, handles, and the dirty comparator
//! - [`transport`] - The transport seam and the reqwest implementation
//! - [`types`] - JSON:API wire types
//! - [`error`] - Error taxonomy and the crate [`Result`] alias
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use jsonapi_store::{Client, HttpTransport, RelationshipRef, Store};
//!
//! let store = Arc::new(Store::new());
//! let client = Client::new(store.clone(), HttpTransport::new("https://api.example.com")?);
//!
//! // Fetch a post with its author side-loaded.
//! let result = client.find("post", Some("1"), &[("include", "author")]).await?;
//! let post = result.record().unwrap().clone();
//!
//! // Relationship fields hold live references, not raw linkage.
//! if let Some(RelationshipRef::ToOne(author)) = post.relationship("author") {
//!     println!("by {:?}", author.attr("name"));
//! }
//!
//! // Edit, check for unsaved changes, save.
//! post.set_attr("title", "Renamed");
//! assert!(post.dirty());
//! client.save(&post, &[]).await?;
//! assert!(!post.dirty());
//! ```
//!
//! Out of scope by design: cache eviction (nothing is ever evicted),
//! in-flight request deduplication, retries, and any UI-framework binding.

pub mod client;
pub mod error;
pub mod record;
pub mod store;
pub mod transport;
pub mod types;

pub use client::Client;
pub use error::{status_message, ApiError, Error, ErrorSource, Result};
pub use record::{Record, RecordHandle, RelationshipRef, Snapshot};
pub use store::{Materialized, Primary, Store, StoreEvent};
pub use transport::{Method, Transport, TransportRequest, TransportResponse};
pub use types::{
    Document, Linkage, Map, PrimaryData, Relationship, ResourceIdentifier, ResourceObject,
    WriteDocument, WriteResource,
};

#[cfg(feature = "http")]
pub use transport::{HttpTransport, TransportConfig};
