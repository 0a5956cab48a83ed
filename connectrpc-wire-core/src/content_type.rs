//! Content-Type recognition for the three protocols.

/// Connect unary, JSON payload.
pub const CONTENT_TYPE_UNARY_JSON: &str = "application/json";
/// Connect unary, protobuf payload.
pub const CONTENT_TYPE_UNARY_PROTO: &str = "application/proto";
/// Connect streaming, JSON payload.
pub const CONTENT_TYPE_STREAM_JSON: &str = "application/connect+json";
/// Connect streaming, protobuf payload.
pub const CONTENT_TYPE_STREAM_PROTO: &str = "application/connect+proto";

pub const CONTENT_TYPE_GRPC: &str = "application/grpc";
pub const CONTENT_TYPE_GRPC_PROTO: &str = "application/grpc+proto";
pub const CONTENT_TYPE_GRPC_JSON: &str = "application/grpc+json";

pub const CONTENT_TYPE_GRPC_WEB: &str = "application/grpc-web";
pub const CONTENT_TYPE_GRPC_WEB_PROTO: &str = "application/grpc-web+proto";
pub const CONTENT_TYPE_GRPC_WEB_JSON: &str = "application/grpc-web+json";

/// What a Connect content type says about the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentTypeInfo {
    /// Enveloped streaming body rather than a bare unary message.
    pub stream: bool,
    /// Protobuf rather than JSON.
    pub binary: bool,
}

/// A recognized gRPC content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrpcContentType {
    pub binary: bool,
}

/// A recognized gRPC-Web content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GrpcWebContentType {
    /// Base64 text encoding (`application/grpc-web-text`).
    pub text: bool,
    pub binary: bool,
}

/// Connect content type for a call shape and payload format.
pub fn connect_content_type(stream: bool, binary: bool) -> &'static str {
    match (stream, binary) {
        (false, false) => CONTENT_TYPE_UNARY_JSON,
        (false, true) => CONTENT_TYPE_UNARY_PROTO,
        (true, false) => CONTENT_TYPE_STREAM_JSON,
        (true, true) => CONTENT_TYPE_STREAM_PROTO,
    }
}

/// Parse a Connect content type.
///
/// Accepts `application/{json,proto}` and `application/connect+{json,proto}`,
/// case-insensitively. JSON forms may carry `;charset=utf-8` (or `utf8`),
/// with at most one space after the semicolon.
pub fn parse_connect_content_type(content_type: Option<&str>) -> Option<ContentTypeInfo> {
    let lower = content_type?.to_ascii_lowercase();
    let rest = lower.strip_prefix("application/")?;
    let (stream, rest) = match rest.strip_prefix("connect+") {
        Some(rest) => (true, rest),
        None => (false, rest),
    };
    let binary = payload_format(rest)?;
    Some(ContentTypeInfo { stream, binary })
}

/// Parse a gRPC content type: `application/grpc`, `application/grpc+proto`
/// or `application/grpc+json[;charset=utf-8]`.
pub fn parse_grpc_content_type(content_type: Option<&str>) -> Option<GrpcContentType> {
    let lower = content_type?.to_ascii_lowercase();
    let rest = lower.strip_prefix("application/grpc")?;
    let binary = match rest {
        "" => true,
        _ => payload_format(rest.strip_prefix('+')?)?,
    };
    Some(GrpcContentType { binary })
}

/// Parse a gRPC-Web content type, including the `-text` variants.
pub fn parse_grpc_web_content_type(content_type: Option<&str>) -> Option<GrpcWebContentType> {
    let lower = content_type?.to_ascii_lowercase();
    let rest = lower.strip_prefix("application/grpc-web")?;
    let (text, rest) = match rest.strip_prefix("-text") {
        Some(rest) => (true, rest),
        None => (false, rest),
    };
    let binary = match rest {
        "" => true,
        _ => payload_format(rest.strip_prefix('+')?)?,
    };
    Some(GrpcWebContentType { text, binary })
}

// `proto` or `json` with an optional utf-8 charset; returns `binary`.
fn payload_format(s: &str) -> Option<bool> {
    if s == "proto" {
        return Some(true);
    }
    let params = s.strip_prefix("json")?;
    if params.is_empty() {
        return Some(false);
    }
    let params = params.strip_prefix(';')?;
    let params = params.strip_prefix(' ').unwrap_or(params);
    match params {
        "charset=utf-8" | "charset=utf8" => Some(false),
        _ => None,
    }
}
