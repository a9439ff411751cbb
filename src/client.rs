//! The transport client: verbs in, materialized records out.
//!
//! [`Client`] is a thin adapter between resource-level operations and the
//! [`Transport`] collaborator. Responses are piped through the store's
//! normalizer, so every fetch both returns records and refreshes the
//! identity table as a side effect; failures are wrapped into
//! [`crate::Error::Request`] with status-derived copy and broadcast through
//! the store's event channel.
//!
//! Concurrency model: requests suspend only at the network boundary, and
//! normalization runs synchronously once a response arrives. There is no
//! in-flight deduplication: two overlapping finds for the same resource
//! race to normalize into the same record, and the last writer wins. Since
//! materialization replaces snapshot field groups wholesale, the record
//! never ends up torn between the two responses; an overwritten earlier
//! response is simply lost. No retries are built in: a failed request
//! surfaces as an error and the caller decides.
//!
//! # Examples
//!
//! ```ignore
//! use std::sync::Arc;
//! use jsonapi_store::{Client, HttpTransport, Store};
//!
//! let store = Arc::new(Store::new());
//! let transport = HttpTransport::new("https://api.example.com")?;
//! let client = Client::new(store.clone(), transport);
//!
//! let posts = client.find("post", None, &[("include", "author")]).await?;
//! let post = posts.records().into_iter().next().unwrap();
//! post.set_attr("title", "Renamed");
//! client.save(&post, &[]).await?;
//! ```

use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::record::RecordHandle;
use crate::store::{Materialized, Store, StoreEvent};
use crate::transport::{Method, Transport, TransportRequest, TransportResponse};

/// Resource-level API client bound to one store and one transport.
#[derive(Debug)]
pub struct Client<T: Transport> {
    store: Arc<Store>,
    transport: T,
}

impl<T: Transport> Client<T> {
    pub fn new(store: Arc<Store>, transport: T) -> Self {
        Self { store, transport }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Perform a raw request without materializing the response.
    pub async fn request(&self, request: TransportRequest) -> Result<TransportResponse> {
        debug!(
            method = request.method.as_str(),
            path = %request.path,
            "request"
        );
        self.transport.request(request).await
    }

    /// Perform a request and materialize the resultant records.
    pub async fn fetch(&self, request: TransportRequest) -> Result<Materialized> {
        let response = self.request(request).await?;
        self.store.materialize(&response.body)
    }

    /// Find one record (`GET /<type>/<id>`) or a collection (`GET /<type>`).
    pub async fn find(
        &self,
        kind: &str,
        id: Option<&str>,
        params: &[(&str, &str)],
    ) -> Result<Materialized> {
        let path = match id {
            Some(id) => format!("/{kind}/{id}"),
            None => format!("/{kind}"),
        };
        let request = TransportRequest::new(Method::Get, path).with_params(owned_params(params));
        match self.fetch(request).await {
            Ok(result) => Ok(result),
            Err(error) => {
                self.store.emit(StoreEvent::FindFailed {
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Save a record: `POST /<type>` when it has never been persisted,
    /// `PATCH /<type>/<id>` otherwise.
    ///
    /// The response is materialized back onto the same record, so the
    /// snapshot baseline is refreshed and the record reads clean afterwards.
    /// For a create, the server-assigned id replaces the local placeholder
    /// in the identity table.
    pub async fn save(&self, record: &RecordHandle, params: &[(&str, &str)]) -> Result<RecordHandle> {
        let creating = !record.persisted() || record.id().is_none();
        let mut document = self.store.serialize(record)?;

        let (method, path) = if creating {
            // id omitted on create; the server assigns one.
            document.data.id = None;
            (Method::Post, format!("/{}", record.kind()))
        } else {
            let id = record.id().unwrap_or_default();
            (Method::Patch, format!("/{}/{id}", record.kind()))
        };

        let body: Value = serde_json::to_value(&document)?;
        let request = TransportRequest::new(method, path)
            .with_params(owned_params(params))
            .with_body(body);

        match self.request(request).await {
            Ok(response) => {
                let result = if creating {
                    self.store.materialize_onto(record, &response.body)?
                } else {
                    self.store.materialize(&response.body)?
                };
                // An update resolves to the same record through the identity
                // table; fall back to the input for empty response bodies.
                let saved = result.record().cloned().unwrap_or_else(|| record.clone());
                self.store.emit(StoreEvent::Saved {
                    record: saved.clone(),
                });
                self.store.emit(if creating {
                    StoreEvent::Created {
                        record: saved.clone(),
                    }
                } else {
                    StoreEvent::Updated {
                        record: saved.clone(),
                    }
                });
                Ok(saved)
            }
            Err(error) => {
                let error = error.with_record(record.clone());
                self.store.emit(StoreEvent::SaveFailed {
                    record: record.clone(),
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }

    /// Delete a record (`DELETE /<type>/<id>`).
    ///
    /// The record stays in the identity table: existing references keep
    /// resolving, and it is up to the application to drop the record from
    /// whatever it is displaying.
    pub async fn delete(&self, record: &RecordHandle) -> Result<()> {
        let Some(id) = record.id() else {
            return Err(Error::request(None, None)
                .with_message("cannot delete a record that has never been saved")
                .with_record(record.clone()));
        };
        let request = TransportRequest::new(Method::Delete, format!("/{}/{id}", record.kind()));
        match self.request(request).await {
            Ok(_) => {
                self.store.emit(StoreEvent::Deleted {
                    record: record.clone(),
                });
                Ok(())
            }
            Err(error) => {
                let error = error.with_record(record.clone());
                self.store.emit(StoreEvent::DeleteFailed {
                    record: record.clone(),
                    message: error.to_string(),
                });
                Err(error)
            }
        }
    }
}

fn owned_params(params: &[(&str, &str)]) -> Vec<(String, String)> {
    params
        .iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}
