//! Outbound response shape.
//!
//! Responses are flat JSON objects: `{type, success, resolve_id, [reason],
//! [description], ...data}`. Data fields live at the top level next to the
//! header, so the builder wraps a plain map instead of a fixed struct.

use serde::Serialize;
use serde_json::{Map, Value};

use crate::errors::{HubError, MESSAGE_FORMAT_ERROR, SIGNATURE_VERIFICATION_ERROR};

/// Outgoing message to a module.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct Response(Map<String, Value>);

/// Response type for a request type.
pub fn response_type(request_type: &str) -> String {
    format!("{request_type}_response")
}

impl Response {
    fn header(message_type: String, success: bool, resolve_id: Option<&str>) -> Self {
        let mut map = Map::new();
        let _ = map.insert("type".into(), Value::String(message_type));
        let _ = map.insert("success".into(), Value::Bool(success));
        if let Some(resolve_id) = resolve_id {
            let _ = map.insert("resolve_id".into(), Value::String(resolve_id.to_owned()));
        }
        Self(map)
    }

    /// `{type: "<request_type>_response", success: true, resolve_id}`.
    pub fn success(request_type: &str, resolve_id: &str) -> Self {
        Self::header(response_type(request_type), true, Some(resolve_id))
    }

    /// Failure response for `err`, carrying its stable reason.
    ///
    /// `resolve_id` is omitted when the request never had one.
    pub fn failure(request_type: &str, resolve_id: Option<&str>, err: &HubError) -> Self {
        let mut response = Self::header(response_type(request_type), false, resolve_id)
            .with("reason", err.reason());
        if let Some(description) = err.description() {
            response = response.with("description", description);
        }
        response
    }

    /// The single undifferentiated authentication failure.
    pub fn signature_verification_error(resolve_id: Option<&str>) -> Self {
        Self::header(SIGNATURE_VERIFICATION_ERROR.into(), false, resolve_id)
            .with("reason", SIGNATURE_VERIFICATION_ERROR)
    }

    /// Reply to an authenticated message that lacks a usable `type`.
    pub fn message_format_error(resolve_id: Option<&str>, err: &HubError) -> Self {
        let mut response = Self::header(MESSAGE_FORMAT_ERROR.into(), false, resolve_id)
            .with("reason", MESSAGE_FORMAT_ERROR);
        if let Some(description) = err.description() {
            response = response.with("description", description);
        }
        response
    }

    /// Attach a data field. Header fields cannot be overwritten.
    #[must_use]
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !matches!(key, "type" | "success" | "resolve_id") {
            let _ = self.0.insert(key.to_owned(), value.into());
        }
        self
    }

    /// Whether this is a success response.
    pub fn is_success(&self) -> bool {
        self.0.get("success").and_then(Value::as_bool).unwrap_or(false)
    }

    /// Look up a field.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Serialize to wire text.
    pub fn to_json(&self) -> String {
        Value::Object(self.0.clone()).to_string()
    }

    /// Consume into a JSON value.
    pub fn into_value(self) -> Value {
        Value::Object(self.0)
    }
}
