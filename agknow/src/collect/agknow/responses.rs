//! v3/v4 response normalisation
//!
//! Both API versions carry the same records in two serialisations and report
//! failures differently. Everything version-specific is decided here so the
//! callers only see one outcome type per endpoint.

use serde_json::Value;

use super::ApiVersion;
use crate::collect::global_variables::UNAUTHORIZED_CONTENT;
use crate::collect::http::HttpResponse;
use crate::commons::error::{AgknowError, Result};
use crate::geometric::parcel::ParcelSummary;

/// Result of the parcel listing endpoint.
#[derive(Debug, Clone, PartialEq)]
pub enum ParcelListing {
    Parcels(Vec<ParcelSummary>),
    /// Valid key without any parcel
    Empty,
    Unauthorized,
}

/// Result of a parcel registration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrationOutcome {
    Registered { parcel_id: i64 },
    Rejected { message: String },
}

fn parse_body(url: &str, response: &HttpResponse) -> Result<Value> {
    serde_json::from_slice(&response.body).map_err(|e| {
        if response.is_ok() {
            AgknowError::Json(e)
        } else {
            status_error(url, response)
        }
    })
}

fn status_error(url: &str, response: &HttpResponse) -> AgknowError {
    AgknowError::HttpStatus {
        url: url.to_string(),
        status: response.status,
        body: response.text(),
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// `"{error}: {detail}"` of a v4 failure body, `None` when neither is present.
pub fn v4_error_message(body: &Value) -> Option<String> {
    let error = body.get("error").map(value_text);
    let detail = body.get("detail").map(value_text);
    match (error, detail) {
        (Some(e), Some(d)) if !d.is_empty() => Some(format!("{}: {}", e, d)),
        (Some(e), _) => Some(e),
        (None, Some(d)) => Some(d),
        (None, None) => None,
    }
}

/// Extract the `content` payload of a response.
///
/// v3 fails on any status other than 200. v4 bodies are read whatever the
/// status: `content` means success, an `error`/`detail` pair becomes
/// [`AgknowError::Application`].
pub fn content(version: ApiVersion, url: &str, response: &HttpResponse) -> Result<Value> {
    match version {
        ApiVersion::V3 => {
            if !response.is_ok() {
                return Err(status_error(url, response));
            }
            let mut body = parse_body(url, response)?;
            body.get_mut("content")
                .map(Value::take)
                .ok_or_else(|| AgknowError::InvalidResponse(format!("no content in response from {}", url)))
        }
        ApiVersion::V4 => {
            let mut body = parse_body(url, response)?;
            if let Some(content) = body.get_mut("content") {
                return Ok(content.take());
            }
            match v4_error_message(&body) {
                Some(message) => Err(AgknowError::Application(message)),
                None if response.is_ok() => Err(AgknowError::InvalidResponse(format!(
                    "no content in response from {}",
                    url
                ))),
                None => Err(status_error(url, response)),
            }
        }
    }
}

/// The single parcel record of a detail response.
pub fn detail_record(version: ApiVersion, content: Value) -> Result<serde_json::Map<String, Value>> {
    let record = match (version, content) {
        (ApiVersion::V3, Value::Array(items)) => items.into_iter().next(),
        (ApiVersion::V3, other) => {
            return Err(AgknowError::InvalidResponse(format!(
                "expected a one-element list, got {}",
                other
            )))
        }
        (ApiVersion::V4, other) => Some(other),
    };
    match record {
        Some(Value::Object(map)) => Ok(map),
        Some(other) => Err(AgknowError::InvalidResponse(format!(
            "parcel detail is not an object: {}",
            other
        ))),
        None => Err(AgknowError::InvalidResponse("empty parcel detail".to_string())),
    }
}

fn is_unauthorized(message: &str) -> bool {
    message.trim().eq_ignore_ascii_case(UNAUTHORIZED_CONTENT) || message.contains("not authorized")
}

/// Normalise a parcel listing response.
pub fn parcel_listing(version: ApiVersion, url: &str, response: &HttpResponse) -> Result<ParcelListing> {
    let content = match content(version, url, response) {
        Ok(content) => content,
        Err(AgknowError::Application(message)) if is_unauthorized(&message) => {
            return Ok(ParcelListing::Unauthorized)
        }
        Err(e) => return Err(e),
    };

    match content {
        Value::String(message) if is_unauthorized(&message) => Ok(ParcelListing::Unauthorized),
        Value::Array(items) if items.is_empty() => Ok(ParcelListing::Empty),
        Value::Null => Ok(ParcelListing::Empty),
        Value::Array(items) => {
            let parcels = items
                .into_iter()
                .map(serde_json::from_value::<ParcelSummary>)
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(ParcelListing::Parcels(parcels))
        }
        other => Err(AgknowError::InvalidResponse(format!(
            "unexpected parcel listing: {}",
            other
        ))),
    }
}

/// Normalise a registration response.
///
/// v3 reports rejection through a non-empty `errors` field and the new id
/// under `id`; v4 answers `content.parcel_id` or an `error`/`detail` pair.
pub fn registration(version: ApiVersion, url: &str, response: &HttpResponse) -> Result<RegistrationOutcome> {
    match version {
        ApiVersion::V3 => {
            let body = parse_body(url, response)?;
            let errors = body.get("errors").map(value_text).unwrap_or_default();
            if !errors.is_empty() {
                return Ok(RegistrationOutcome::Rejected { message: errors });
            }
            if !response.is_ok() {
                return Err(status_error(url, response));
            }
            body.get("id")
                .and_then(Value::as_i64)
                .map(|parcel_id| RegistrationOutcome::Registered { parcel_id })
                .ok_or_else(|| AgknowError::InvalidResponse(format!("no parcel id in response from {}", url)))
        }
        ApiVersion::V4 => {
            let body = parse_body(url, response)?;
            if let Some(content) = body.get("content") {
                return content
                    .get("parcel_id")
                    .and_then(Value::as_i64)
                    .map(|parcel_id| RegistrationOutcome::Registered { parcel_id })
                    .ok_or_else(|| {
                        AgknowError::InvalidResponse(format!("no parcel_id in response from {}", url))
                    });
            }
            match v4_error_message(&body) {
                Some(message) => Ok(RegistrationOutcome::Rejected { message }),
                None => Err(status_error(url, response)),
            }
        }
    }
}
