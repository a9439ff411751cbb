//! Error types for store, serializer, and transport operations.
//!
//! The [`Result`] type alias is used throughout the crate.
//!
//! # Error Categories
//!
//! | Category | Variant | Class |
//! |----------|---------|-------|
//! | Transport failure | [`Error::Request`] | Runtime, caller decides whether to retry |
//! | Serialization mismatch | [`Error::Serialize`] | Programmer error, fail fast |
//! | Malformed response body | [`Error::Decode`] | Runtime |
//! | Bad base URL | [`Error::BaseUrl`] | Configuration |
//!
//! Malformed relationship linkage is deliberately **not** an error: entries
//! missing `type` or `id` are skipped during hydration, favoring resilience
//! over strictness at the wire boundary.
//!
//! # Request errors
//!
//! A failed request carries the HTTP status (when one was received), a
//! human-readable message resolved from the status code, the parsed JSON:API
//! `errors` array, and optionally the record involved in a save or delete.
//! Validation failures (422) additionally expose a per-attribute view
//! through [`Error::attribute_errors`] so UI layers can render inline field
//! errors.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::record::RecordHandle;

/// Result type for store, serializer, and transport operations.
pub type Result<T> = std::result::Result<T, Error>;

const FALLBACK_MESSAGE: &str =
    "An error occurred with your request, please try again momentarily";

/// Human-readable copy for a failed request, resolved by HTTP status.
pub fn status_message(status: Option<u16>) -> &'static str {
    match status {
        Some(400) => "An error occurred with your request, please contact support with more information",
        Some(401) => "Please log in to continue",
        Some(403) => "You don't have permission to perform that action",
        Some(404) => "That record cannot be found",
        Some(422) => "Error saving record",
        _ => FALLBACK_MESSAGE,
    }
}

/// One entry of a JSON:API `errors` array.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
    #[serde(default)]
    pub source: Option<ErrorSource>,
}

/// The `source` member of a JSON:API error, pointing at the offending field.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct ErrorSource {
    #[serde(default)]
    pub pointer: Option<String>,
}

/// Errors produced by this crate.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// A transport call failed: network error or non-2xx response.
    ///
    /// `status` is absent when no response was received at all. `record` is
    /// attached for save/delete contexts so callers can tie the failure back
    /// to the entity involved.
    #[error("{message}")]
    Request {
        status: Option<u16>,
        message: String,
        errors: Vec<ApiError>,
        record: Option<RecordHandle>,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A field declared as a relationship holds a value that is neither a
    /// record reference, a list of record references, nor null.
    #[error("cannot serialize `{field}` on `{kind}`: expected a record reference, a list of record references, or null")]
    Serialize { kind: String, field: String },

    /// The response body could not be decoded as a JSON:API document.
    #[error("failed to decode document: {0}")]
    Decode(#[from] serde_json::Error),

    /// The configured base URL is not a valid URL.
    #[cfg(feature = "http")]
    #[error("invalid base URL: {0}")]
    BaseUrl(#[from] url::ParseError),
}

impl Error {
    /// A failed request, with the message resolved from the status code and
    /// the JSON:API `errors` array parsed from the response body if present.
    pub fn request(status: Option<u16>, body: Option<&Value>) -> Self {
        let errors = body
            .and_then(|body| body.get("errors"))
            .and_then(|errors| serde_json::from_value(errors.clone()).ok())
            .unwrap_or_default();
        Self::Request {
            status,
            message: status_message(status).to_string(),
            errors,
            record: None,
            source: None,
        }
    }

    /// A request that failed before any response was received.
    pub fn transport<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Request {
            status: None,
            message: FALLBACK_MESSAGE.to_string(),
            errors: Vec::new(),
            record: None,
            source: Some(Box::new(source)),
        }
    }

    /// Attach the record involved in a save or delete.
    #[must_use]
    pub fn with_record(mut self, handle: RecordHandle) -> Self {
        if let Self::Request { record, .. } = &mut self {
            *record = Some(handle);
        }
        self
    }

    /// Replace the resolved message with custom copy.
    #[must_use]
    pub fn with_message(mut self, custom: impl Into<String>) -> Self {
        if let Self::Request { message, .. } = &mut self {
            *message = custom.into();
        }
        self
    }

    /// HTTP status of a failed request, if one was received.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Request { status, .. } => *status,
            _ => None,
        }
    }

    /// The parsed JSON:API `errors` array, empty for non-request errors.
    pub fn errors(&self) -> &[ApiError] {
        match self {
            Self::Request { errors, .. } => errors,
            _ => &[],
        }
    }

    /// The record involved in the failed save or delete, if any.
    pub fn record(&self) -> Option<&RecordHandle> {
        match self {
            Self::Request { record, .. } => record.as_ref(),
            _ => None,
        }
    }

    /// True for a 422 response with a structured `errors` array.
    pub fn is_validation(&self) -> bool {
        self.status() == Some(422)
    }

    /// Per-attribute error copy, keyed by the last segment of each error's
    /// `source.pointer` (e.g. `/data/attributes/name` maps to `name`).
    pub fn attribute_errors(&self) -> BTreeMap<String, String> {
        let mut out = BTreeMap::new();
        for error in self.errors() {
            let Some(pointer) = error.source.as_ref().and_then(|s| s.pointer.as_deref()) else {
                continue;
            };
            let Some(field) = pointer.rsplit('/').next().filter(|f| !f.is_empty()) else {
                continue;
            };
            let message = error
                .title
                .clone()
                .or_else(|| error.detail.clone())
                .unwrap_or_else(|| FALLBACK_MESSAGE.to_string());
            out.insert(field.to_string(), message);
        }
        out
    }
}
