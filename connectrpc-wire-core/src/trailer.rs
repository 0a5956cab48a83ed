//! gRPC status trailers.
//!
//! gRPC reports the outcome of a call in trailers:
//!
//! - `grpc-status`: numeric code, `0` on success
//! - `grpc-message`: percent-encoded message
//! - `grpc-status-details-bin`: base64 `google.rpc.Status` carrying the details
//!
//! gRPC-Web moves the same fields into a trailer block inside the body.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue};
use prost::Message;

use crate::error::{
    Code, ConnectError, ErrorDetail, RawDetail, type_name_from_url, type_url_from_name,
};
use crate::error_json::decode_base64;
use crate::headers::{GRPC_MESSAGE, GRPC_STATUS, GRPC_STATUS_DETAILS_BIN};

/// `google.rpc.Status`.
#[derive(Clone, PartialEq, prost::Message)]
struct StatusProto {
    #[prost(int32, tag = "1")]
    code: i32,
    #[prost(string, tag = "2")]
    message: String,
    #[prost(message, repeated, tag = "3")]
    details: Vec<prost_types::Any>,
}

/// Write the outcome of a call into `trailers`.
///
/// `None` writes `grpc-status: 0`. An error writes its code, message and
/// details, and appends its metadata.
pub fn set_trailer_status(
    trailers: &mut HeaderMap,
    error: Option<&ConnectError>,
) -> Result<(), ConnectError> {
    let Some(error) = error else {
        trailers.insert(GRPC_STATUS, HeaderValue::from_static("0"));
        return Ok(());
    };

    for (name, value) in error.metadata() {
        trailers.append(name, value.clone());
    }
    trailers.insert(GRPC_STATUS, HeaderValue::from(error.code().as_i32()));
    if !error.raw_message().is_empty() {
        let encoded = encode_grpc_message(error.raw_message());
        trailers.insert(GRPC_MESSAGE, header_value(&encoded)?);
    }
    if !error.details().is_empty() {
        let status = status_proto(error)?;
        let encoded = STANDARD_NO_PAD.encode(status.encode_to_vec());
        trailers.insert(GRPC_STATUS_DETAILS_BIN, header_value(&encoded)?);
    }
    Ok(())
}

fn header_value(value: &str) -> Result<HeaderValue, ConnectError> {
    HeaderValue::from_str(value)
        .map_err(|e| ConnectError::internal(format!("failed to encode trailer: {e}")))
}

fn status_proto(error: &ConnectError) -> Result<StatusProto, ConnectError> {
    let details = error
        .details()
        .iter()
        .map(|detail| {
            detail.to_raw().map(|raw| prost_types::Any {
                type_url: type_url_from_name(raw.type_name()),
                value: raw.value().to_vec(),
            })
        })
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| ConnectError::internal(format!("failed to encode error details: {e}")))?;
    Ok(StatusProto {
        code: error.code().as_i32(),
        message: error.raw_message().to_owned(),
        details,
    })
}

/// Read the outcome of a call from trailers (or headers of a trailers-only
/// response).
///
/// Returns `Ok(None)` for success and when no status is present; use
/// [`has_status`] to tell the two apart. A status that cannot be parsed is
/// an `Internal` error.
pub fn find_trailer_error(headers: &HeaderMap) -> Result<Option<ConnectError>, ConnectError> {
    if let Some(bin) = headers.get(GRPC_STATUS_DETAILS_BIN) {
        return error_from_status_details(bin, headers);
    }

    let Some(status) = headers.get(GRPC_STATUS) else {
        return Ok(None);
    };
    let value = status
        .to_str()
        .ok()
        .and_then(|s| s.trim().parse::<i32>().ok())
        .ok_or_else(|| invalid_status(status))?;
    if value == 0 {
        return Ok(None);
    }
    let code = Code::from_i32(value).ok_or_else(|| invalid_status(status))?;
    let message = headers
        .get(GRPC_MESSAGE)
        .map(|m| decode_grpc_message(m.as_bytes()))
        .unwrap_or_default();
    Ok(Some(
        ConnectError::new(code, message).with_metadata(error_metadata(headers)),
    ))
}

/// Whether `headers` carry a gRPC status at all.
pub fn has_status(headers: &HeaderMap) -> bool {
    headers.contains_key(GRPC_STATUS) || headers.contains_key(GRPC_STATUS_DETAILS_BIN)
}

fn invalid_status(value: &HeaderValue) -> ConnectError {
    ConnectError::internal(format!("protocol error: invalid grpc-status: {value:?}"))
}

fn error_from_status_details(
    bin: &HeaderValue,
    headers: &HeaderMap,
) -> Result<Option<ConnectError>, ConnectError> {
    let invalid = |e: &dyn std::fmt::Display| {
        ConnectError::internal(format!("invalid grpc-status-details-bin: {e}"))
    };
    let text = bin.to_str().map_err(|e| invalid(&e))?;
    let bytes = decode_base64(text).map_err(|e| invalid(&e))?;
    let status = StatusProto::decode(bytes.as_slice()).map_err(|e| invalid(&e))?;
    if status.code == 0 {
        return Ok(None);
    }
    let code = Code::from_i32(status.code)
        .ok_or_else(|| invalid(&format!("unknown code {}", status.code)))?;

    let mut error = ConnectError::new(code, status.message).with_metadata(error_metadata(headers));
    for any in status.details {
        match RawDetail::try_new(type_name_from_url(&any.type_url), any.value) {
            Some(raw) => error = error.add_detail(ErrorDetail::Raw(raw)),
            None => tracing::debug!("dropping grpc status detail without a type url"),
        }
    }
    Ok(Some(error))
}

/// `headers` without the gRPC status keys.
pub fn error_metadata(headers: &HeaderMap) -> HeaderMap {
    let mut metadata = headers.clone();
    for name in [GRPC_STATUS, GRPC_MESSAGE, GRPC_STATUS_DETAILS_BIN] {
        metadata.remove(name);
    }
    metadata
}

/// Percent-encode a `grpc-message`: bytes outside printable ASCII and `%`
/// become `%XX`.
pub fn encode_grpc_message(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    for &b in message.as_bytes() {
        if (0x20..=0x7e).contains(&b) && b != b'%' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{b:02X}"));
        }
    }
    out
}

/// Reverse of [`encode_grpc_message`]. Malformed escapes are kept verbatim.
pub fn decode_grpc_message(value: &[u8]) -> String {
    let mut out = Vec::with_capacity(value.len());
    let mut i = 0;
    while i < value.len() {
        if value[i] == b'%' && i + 2 < value.len() {
            if let Some(byte) = hex_pair(value[i + 1], value[i + 2]) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(value[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_pair(hi: u8, lo: u8) -> Option<u8> {
    let digit = |c: u8| (c as char).to_digit(16).map(|d| d as u8);
    Some(digit(hi)? << 4 | digit(lo)?)
}

/// Serialize trailers as a gRPC-Web trailer block (`name: value\r\n` lines).
pub fn encode_trailer_block(trailers: &HeaderMap) -> Bytes {
    let mut buf = BytesMut::new();
    for (name, value) in trailers {
        buf.put_slice(name.as_str().as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(value.as_bytes());
        buf.put_slice(b"\r\n");
    }
    buf.freeze()
}

/// Parse a gRPC-Web trailer block. Names are case-insensitive.
pub fn parse_trailer_block(block: &[u8]) -> Result<HeaderMap, ConnectError> {
    let invalid = || ConnectError::internal("protocol error: invalid trailer block");
    let mut trailers = HeaderMap::new();
    for line in block.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let colon = line.iter().position(|&b| b == b':').ok_or_else(invalid)?;
        let name = HeaderName::from_bytes(line[..colon].trim_ascii()).map_err(|_| invalid())?;
        let value = HeaderValue::from_bytes(line[colon + 1..].trim_ascii()).map_err(|_| invalid())?;
        trailers.append(name, value);
    }
    Ok(trailers)
}
