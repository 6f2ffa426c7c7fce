//! Request and response types for the DMS API.
//!
//! The backend speaks snake_case JSON with `DD-MM-YYYY` dates and wraps
//! tags in `{ "tag_name": ... }` objects. Everything is normalized here so
//! callers only ever see the canonical shapes.

use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{ApiError, Result};

/// Wire format for document dates (`DD-MM-YYYY`).
pub const DATE_FORMAT: &str = "%d-%m-%Y";

/// Serde adapter for `DD-MM-YYYY` dates.
pub mod date_format {
    use super::{NaiveDate, DATE_FORMAT};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&date.format(DATE_FORMAT).to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(de)?;
        NaiveDate::parse_from_str(&raw, DATE_FORMAT).map_err(serde::de::Error::custom)
    }
}

/// Serde adapter for optional `DD-MM-YYYY` dates.
pub mod date_format_opt {
    use super::{NaiveDate, DATE_FORMAT};
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &Option<NaiveDate>, ser: S) -> Result<S::Ok, S::Error> {
        match date {
            Some(d) => ser.serialize_str(&d.format(DATE_FORMAT).to_string()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Option<NaiveDate>, D::Error> {
        let raw = Option::<String>::deserialize(de)?;
        match raw.as_deref() {
            None | Some("") => Ok(None),
            Some(s) => NaiveDate::parse_from_str(s, DATE_FORMAT)
                .map(Some)
                .map_err(serde::de::Error::custom),
        }
    }
}

/// Tag object as the backend expects it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagRef {
    pub tag_name: String,
}

impl TagRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            tag_name: name.into(),
        }
    }
}

fn tags_to_refs<S: serde::Serializer>(tags: &[String], ser: S) -> std::result::Result<S::Ok, S::Error> {
    let refs: Vec<TagRef> = tags.iter().map(TagRef::new).collect();
    serde::Serialize::serialize(&refs, ser)
}

fn tags_from_refs<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Vec<String>, D::Error> {
    let refs = Option::<Vec<TagRef>>::deserialize(de)?;
    Ok(refs
        .unwrap_or_default()
        .into_iter()
        .map(|t| t.tag_name)
        .collect())
}

/// Document identifiers arrive as either strings or numbers depending on
/// the endpoint; normalize to a string.
fn id_from_value<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "unexpected document id: {other}"
        ))),
    }
}

/// A document entry as returned by `searchDocumentEntry`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    #[serde(deserialize_with = "id_from_value")]
    pub document_id: String,
    #[serde(default)]
    pub major_head: String,
    #[serde(default)]
    pub minor_head: String,
    #[serde(
        serialize_with = "tags_to_refs",
        deserialize_with = "tags_from_refs",
        default
    )]
    pub tags: Vec<String>,
    #[serde(default)]
    pub uploaded_by: String,
    #[serde(with = "date_format")]
    pub document_date: NaiveDate,
    #[serde(default)]
    pub file_url: String,
    #[serde(default, alias = "remarks")]
    pub document_remarks: String,
}

/// Server-side search filter for `searchDocumentEntry`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub major_head: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub minor_head: Option<String>,
    #[serde(with = "date_format_opt", skip_serializing_if = "Option::is_none")]
    pub from_date: Option<NaiveDate>,
    #[serde(with = "date_format_opt", skip_serializing_if = "Option::is_none")]
    pub to_date: Option<NaiveDate>,
    #[serde(serialize_with = "tags_to_refs")]
    pub tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_by: Option<String>,
    pub start: u32,
    pub length: u32,
}

impl SearchRequest {
    /// Default pagination window used when the caller does not care.
    pub const DEFAULT_PAGE_LENGTH: u32 = 100;

    /// An unconstrained request for the first page.
    pub fn all() -> Self {
        Self {
            length: Self::DEFAULT_PAGE_LENGTH,
            ..Self::default()
        }
    }
}

/// Metadata part of a `saveDocumentEntry` upload.
#[derive(Debug, Clone, Serialize)]
pub struct DocumentEntry {
    pub major_head: String,
    pub minor_head: String,
    #[serde(with = "date_format")]
    pub document_date: NaiveDate,
    pub document_remarks: String,
    #[serde(serialize_with = "tags_to_refs")]
    pub tags: Vec<String>,
    pub user_id: String,
}

/// File part of a `saveDocumentEntry` upload.
#[derive(Debug)]
pub struct FilePayload {
    pub file_name: String,
    pub mime_type: String,
    pub bytes: bytes::Bytes,
    /// Fraction of the payload handed to the transport, 0.0..=1.0.
    /// `None` means the caller does not want progress. Shared so the
    /// caller keeps publishing on the same channel across retries.
    pub progress: Option<std::sync::Arc<tokio::sync::watch::Sender<f32>>>,
}

/// Outcome of a `saveDocumentEntry` call that reached the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOutcome {
    pub success: bool,
    pub message: String,
}

/// Identity fields extracted from a successful `validateOTP` envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    pub token: String,
    pub user_id: Option<String>,
    pub user_name: Option<String>,
    pub roles: Vec<String>,
}

/// Generic `{ status, message, data }` envelope used by most endpoints.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope<T> {
    #[serde(default = "default_true")]
    pub status: bool,
    #[serde(default)]
    pub message: Option<String>,
    pub data: Option<T>,
}

fn default_true() -> bool {
    true
}

fn string_at(value: &Value, path: &[&str]) -> Option<String> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(key)?;
    }
    match cursor {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn strings_at(value: &Value, path: &[&str]) -> Option<Vec<String>> {
    let mut cursor = value;
    for key in path {
        cursor = cursor.get(key)?;
    }
    cursor.as_array().map(|items| {
        items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_owned))
            .collect()
    })
}

/// Normalize a `validateOTP` response envelope.
///
/// The backend has shipped the token under several different keys over
/// time; probe the known locations once here so nothing downstream ever
/// branches on response shape.
pub fn normalize_auth(value: &Value) -> Result<AuthSuccess> {
    const TOKEN_PATHS: &[&[&str]] = &[
        &["token"],
        &["data", "token"],
        &["auth_token"],
        &["data", "auth_token"],
        &["authToken"],
        &["data", "authToken"],
    ];

    let token = TOKEN_PATHS
        .iter()
        .find_map(|path| string_at(value, path))
        .ok_or_else(|| ApiError::Parse("no session token in validateOTP response".into()))?;

    let user_id = string_at(value, &["user_id"])
        .or_else(|| string_at(value, &["data", "user_id"]))
        .or_else(|| string_at(value, &["userId"]));
    let user_name = string_at(value, &["user_name"])
        .or_else(|| string_at(value, &["data", "user_name"]))
        .or_else(|| string_at(value, &["userName"]));
    let roles = strings_at(value, &["roles"])
        .or_else(|| strings_at(value, &["data", "roles"]))
        .unwrap_or_default();

    Ok(AuthSuccess {
        token,
        user_id,
        user_name,
        roles,
    })
}
