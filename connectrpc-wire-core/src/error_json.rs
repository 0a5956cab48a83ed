//! JSON form of [`ConnectError`] and of the Connect end-of-stream message.
//!
//! ```json
//! {"code": "not_found", "message": "...", "details": [{"type": "...", "value": "<base64>", "debug": {}}]}
//! ```

use base64::Engine;
use base64::engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD};
use bytes::Bytes;
use http::{HeaderMap, HeaderName, HeaderValue};
use serde_json::{Map, Value};

use crate::error::{Code, ConnectError, DetailEncodeError, ErrorDetail, RawDetail};

/// A JSON value that does not describe a Connect error.
///
/// Kept apart from [`ConnectError`] so callers can tell "the peer sent an
/// error" from "the peer sent garbage". Converts into an `Internal` error.
#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum ErrorJsonParseError {
    #[error("cannot decode ConnectError{property} from JSON: {value}")]
    Malformed { property: &'static str, value: String },

    /// A detail value was not base64.
    #[error("cannot decode ConnectError.details from JSON: {0}")]
    DetailValue(#[source] base64::DecodeError),
}

impl ErrorJsonParseError {
    fn malformed(value: &Value, property: &'static str) -> Self {
        ErrorJsonParseError::Malformed {
            property,
            value: describe(value),
        }
    }
}

impl From<ErrorJsonParseError> for ConnectError {
    fn from(err: ErrorJsonParseError) -> Self {
        ConnectError::new(Code::Internal, err.to_string())
    }
}

// Strings are quoted, containers collapse to "object".
fn describe(value: &Value) -> String {
    match value {
        Value::Object(_) | Value::Array(_) => "object".to_owned(),
        other => other.to_string(),
    }
}

/// Decode base64 with or without padding, standard or URL-safe alphabet.
pub(crate) fn decode_base64(input: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let trimmed = input.trim_end_matches('=');
    STANDARD_NO_PAD
        .decode(trimmed)
        .or_else(|e| URL_SAFE_NO_PAD.decode(trimmed).map_err(|_| e))
}

/// Parse a Connect error from its JSON form.
///
/// `metadata` becomes the error's metadata.
pub fn error_from_json(
    json: &Value,
    metadata: Option<&HeaderMap>,
) -> Result<ConnectError, ErrorJsonParseError> {
    let Some(object) = json.as_object() else {
        return Err(ErrorJsonParseError::malformed(json, ""));
    };
    let Some(code_value) = object.get("code") else {
        return Err(ErrorJsonParseError::malformed(json, ""));
    };
    let Some(code_str) = code_value.as_str() else {
        return Err(ErrorJsonParseError::malformed(json, ""));
    };
    let code: Code = code_str
        .parse()
        .map_err(|_| ErrorJsonParseError::malformed(code_value, ".code"))?;

    let message = match object.get("message") {
        None | Some(Value::Null) => "",
        Some(Value::String(s)) => s.as_str(),
        Some(other) => return Err(ErrorJsonParseError::malformed(other, ".message")),
    };

    let mut error = ConnectError::new(code, message);
    if let Some(metadata) = metadata {
        error = error.with_metadata(metadata.clone());
    }

    if let Some(Value::Array(details)) = object.get("details") {
        let parsed = details
            .iter()
            .map(detail_from_json)
            .collect::<Result<Vec<_>, _>>()?;
        error.set_details(parsed);
    }
    Ok(error)
}

fn detail_from_json(detail: &Value) -> Result<ErrorDetail, ErrorJsonParseError> {
    let malformed = || ErrorJsonParseError::malformed(detail, ".details");
    let object = detail.as_object().ok_or_else(malformed)?;
    let type_name = object
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(malformed)?;
    let value = object
        .get("value")
        .and_then(Value::as_str)
        .ok_or_else(malformed)?;
    // Only an object is a usable rendering; anything else is ignored.
    let debug = object.get("debug").filter(|v| v.is_object()).cloned();

    let bytes = decode_base64(value).map_err(ErrorJsonParseError::DetailValue)?;
    let mut raw = RawDetail::try_new(type_name, bytes).ok_or_else(malformed)?;
    if let Some(debug) = debug {
        raw = raw.with_debug(debug);
    }
    Ok(ErrorDetail::Raw(raw))
}

/// Parse a Connect error from JSON bytes.
///
/// Malformed input becomes an `Internal` error, so the result is always a
/// `ConnectError` one way or the other.
pub fn error_from_json_bytes(
    bytes: &[u8],
    metadata: Option<&HeaderMap>,
) -> Result<ConnectError, ConnectError> {
    let json: Value = serde_json::from_slice(bytes).map_err(|e| {
        ConnectError::new(
            Code::Internal,
            format!("cannot decode ConnectError from JSON: {e}"),
        )
    })?;
    error_from_json(&json, metadata).map_err(ConnectError::from)
}

/// Render an error as a JSON object.
///
/// `message` is omitted when empty and `details` when there are none. A
/// detail's `debug` rendering is best effort and never fails the call.
pub fn error_to_json(error: &ConnectError) -> Result<Map<String, Value>, DetailEncodeError> {
    let mut object = Map::new();
    object.insert("code".into(), Value::String(error.code().as_str().into()));
    if !error.raw_message().is_empty() {
        object.insert("message".into(), Value::String(error.raw_message().into()));
    }
    if !error.details().is_empty() {
        let details = error
            .details()
            .iter()
            .map(|detail| detail.to_raw().map(|raw| detail_to_json(&raw)))
            .collect::<Result<Vec<_>, _>>()?;
        object.insert("details".into(), Value::Array(details));
    }
    Ok(object)
}

fn detail_to_json(raw: &RawDetail) -> Value {
    let mut object = Map::new();
    object.insert("type".into(), Value::String(raw.type_name().into()));
    object.insert(
        "value".into(),
        Value::String(STANDARD_NO_PAD.encode(raw.value())),
    );
    if let Some(debug) = raw.debug() {
        object.insert("debug".into(), debug.clone());
    }
    Value::Object(object)
}

/// Render an error as JSON bytes.
///
/// Any failure along the way becomes an `Internal` error.
pub fn error_to_json_bytes(error: &ConnectError) -> Result<Bytes, ConnectError> {
    let serialize_failed = |m: String| {
        ConnectError::new(
            Code::Internal,
            format!("failed to serialize Connect Error: {m}"),
        )
    };
    let object = error_to_json(error).map_err(|e| serialize_failed(e.to_string()))?;
    serde_json::to_vec(&object)
        .map(Bytes::from)
        .map_err(|e| serialize_failed(e.to_string()))
}

/// The final message of a Connect streaming response.
#[derive(Clone, Debug, Default)]
pub struct EndStream {
    /// Trailing metadata.
    pub metadata: HeaderMap,
    pub error: Option<ConnectError>,
}

fn invalid_end_stream() -> ConnectError {
    ConnectError::new(Code::InvalidArgument, "protocol error: invalid end stream")
}

/// Parse the JSON payload of an end-of-stream envelope.
///
/// The error, if any, carries the trailing metadata.
pub fn end_stream_from_json(bytes: &[u8]) -> Result<EndStream, ConnectError> {
    let json: Value = serde_json::from_slice(bytes).map_err(|_| invalid_end_stream())?;
    let object = json.as_object().ok_or_else(invalid_end_stream)?;

    let mut metadata = HeaderMap::new();
    if let Some(entries) = object.get("metadata") {
        let entries = entries.as_object().ok_or_else(invalid_end_stream)?;
        for (key, values) in entries {
            let values = values.as_array().ok_or_else(invalid_end_stream)?;
            let name = HeaderName::from_bytes(key.as_bytes()).map_err(|_| invalid_end_stream())?;
            for value in values {
                let value = value
                    .as_str()
                    .and_then(|v| HeaderValue::from_str(v).ok())
                    .ok_or_else(invalid_end_stream)?;
                metadata.append(name.clone(), value);
            }
        }
    }

    let error = match object.get("error") {
        None | Some(Value::Null) => None,
        Some(error) => Some(error_from_json(error, Some(&metadata))?),
    };
    Ok(EndStream { metadata, error })
}

/// Render the JSON payload of an end-of-stream envelope.
pub fn end_stream_to_json(
    metadata: &HeaderMap,
    error: Option<&ConnectError>,
) -> Result<Bytes, ConnectError> {
    let mut object = Map::new();
    if let Some(error) = error {
        let json = error_to_json(error).map_err(|e| {
            ConnectError::new(
                Code::Internal,
                format!("failed to serialize Connect Error: {e}"),
            )
        })?;
        object.insert("error".into(), Value::Object(json));
    }
    let metadata = metadata_to_json(metadata);
    if !metadata.is_empty() {
        object.insert("metadata".into(), Value::Object(metadata));
    }
    serde_json::to_vec(&object).map(Bytes::from).map_err(|e| {
        ConnectError::new(
            Code::Internal,
            format!("failed to serialize EndStreamResponse: {e}"),
        )
    })
}

fn metadata_to_json(metadata: &HeaderMap) -> Map<String, Value> {
    let mut object = Map::new();
    for name in metadata.keys() {
        let values: Vec<Value> = metadata
            .get_all(name)
            .iter()
            .filter_map(|v| match v.to_str() {
                Ok(s) => Some(Value::String(s.to_owned())),
                Err(_) => {
                    tracing::debug!(key = %name, "non-text metadata value dropped from end stream");
                    None
                }
            })
            .collect();
        if !values.is_empty() {
            object.insert(name.as_str().to_owned(), Value::Array(values));
        }
    }
    object
}
