//! Header names and request header construction.

use std::time::Duration;

use http::header::{CONTENT_TYPE, USER_AGENT};
use http::{HeaderMap, HeaderValue};

use crate::codec::BoxedCodec;
use crate::content_type::{
    CONTENT_TYPE_GRPC, CONTENT_TYPE_GRPC_JSON, CONTENT_TYPE_GRPC_WEB_JSON,
    CONTENT_TYPE_GRPC_WEB_PROTO, connect_content_type,
};
use crate::error::{Code, ConnectError};
use crate::timeout::{encode_connect_timeout, encode_grpc_timeout};

pub const CONNECT_PROTOCOL_VERSION_HEADER: &str = "connect-protocol-version";
/// The only protocol version there is.
pub const CONNECT_PROTOCOL_VERSION: &str = "1";
pub const CONNECT_TIMEOUT_HEADER: &str = "connect-timeout-ms";
pub const CONTENT_ENCODING: &str = "content-encoding";
pub const ACCEPT_ENCODING: &str = "accept-encoding";
pub const CONNECT_CONTENT_ENCODING: &str = "connect-content-encoding";
pub const CONNECT_ACCEPT_ENCODING: &str = "connect-accept-encoding";

pub const GRPC_STATUS: &str = "grpc-status";
pub const GRPC_MESSAGE: &str = "grpc-message";
pub const GRPC_STATUS_DETAILS_BIN: &str = "grpc-status-details-bin";
pub const GRPC_ENCODING: &str = "grpc-encoding";
pub const GRPC_ACCEPT_ENCODING: &str = "grpc-accept-encoding";
pub const GRPC_TIMEOUT: &str = "grpc-timeout";
pub const TE: &str = "te";
pub const X_GRPC_WEB: &str = "x-grpc-web";
pub const X_USER_AGENT: &str = "x-user-agent";

const DEFAULT_USER_AGENT: &str = concat!("connectrpc-wire/", env!("CARGO_PKG_VERSION"));

/// Shape of an RPC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MethodKind {
    Unary,
    ServerStreaming,
    ClientStreaming,
    BiDiStreaming,
}

impl MethodKind {
    pub fn is_unary(&self) -> bool {
        matches!(self, MethodKind::Unary)
    }

    /// Whether the client sends more than one message.
    pub fn client_streams(&self) -> bool {
        matches!(self, MethodKind::ClientStreaming | MethodKind::BiDiStreaming)
    }

    /// Whether the server sends more than one message.
    pub fn server_streams(&self) -> bool {
        matches!(self, MethodKind::ServerStreaming | MethodKind::BiDiStreaming)
    }
}

/// Compression-related header names for a Connect call shape.
pub fn connect_encoding_headers(method_kind: MethodKind) -> (&'static str, &'static str) {
    if method_kind.is_unary() {
        (CONTENT_ENCODING, ACCEPT_ENCODING)
    } else {
        (CONNECT_CONTENT_ENCODING, CONNECT_ACCEPT_ENCODING)
    }
}

/// Headers for a Connect request.
///
/// Starts from `user_headers` and then sets `content-type`,
/// `connect-protocol-version` and, when given, `connect-timeout-ms`. Values
/// set here replace user values of the same name.
pub fn create_request_header(
    method_kind: MethodKind,
    use_binary_format: bool,
    timeout_ms: Option<u64>,
    user_headers: Option<&HeaderMap>,
) -> HeaderMap {
    let mut headers = user_headers.cloned().unwrap_or_default();
    if let Some(ms) = timeout_ms {
        headers.insert(CONNECT_TIMEOUT_HEADER, HeaderValue::from(ms));
    }
    headers.insert(
        CONTENT_TYPE,
        HeaderValue::from_static(connect_content_type(
            !method_kind.is_unary(),
            use_binary_format,
        )),
    );
    headers.insert(
        CONNECT_PROTOCOL_VERSION_HEADER,
        HeaderValue::from_static(CONNECT_PROTOCOL_VERSION),
    );
    headers
}

/// [`create_request_header`] plus compression headers.
///
/// Unary calls use `content-encoding` / `accept-encoding`, streaming calls
/// the `connect-` prefixed pair. The send encoding is always declared; a
/// caller that ends up not compressing a unary body removes it.
pub fn create_request_header_with_compression(
    method_kind: MethodKind,
    use_binary_format: bool,
    timeout_ms: Option<u64>,
    user_headers: Option<&HeaderMap>,
    accept_compression: &[BoxedCodec],
    send_compression: Option<&BoxedCodec>,
) -> HeaderMap {
    let mut headers =
        create_request_header(method_kind, use_binary_format, timeout_ms, user_headers);
    let (encoding, accept) = connect_encoding_headers(method_kind);
    if let Some(codec) = send_compression {
        headers.insert(encoding, HeaderValue::from_static(codec.name()));
    }
    if let Some(value) = join_names(accept_compression) {
        headers.insert(accept, value);
    }
    headers
}

fn join_names(codecs: &[BoxedCodec]) -> Option<HeaderValue> {
    if codecs.is_empty() {
        return None;
    }
    let joined = codecs.iter().map(|c| c.name()).collect::<Vec<_>>().join(",");
    HeaderValue::from_str(&joined).ok()
}

/// Headers for a gRPC or gRPC-Web request.
pub fn create_grpc_request_header(
    web: bool,
    use_binary_format: bool,
    timeout: Option<Duration>,
    user_headers: Option<&HeaderMap>,
    accept_compression: &[BoxedCodec],
    send_compression: Option<&BoxedCodec>,
) -> HeaderMap {
    let mut headers = user_headers.cloned().unwrap_or_default();
    let content_type = match (web, use_binary_format) {
        (false, true) => CONTENT_TYPE_GRPC,
        (false, false) => CONTENT_TYPE_GRPC_JSON,
        (true, true) => CONTENT_TYPE_GRPC_WEB_PROTO,
        (true, false) => CONTENT_TYPE_GRPC_WEB_JSON,
    };
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    if web {
        headers.insert(X_GRPC_WEB, HeaderValue::from_static("1"));
        if !headers.contains_key(X_USER_AGENT) {
            headers.insert(X_USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
    } else {
        headers.insert(TE, HeaderValue::from_static("trailers"));
        if !headers.contains_key(USER_AGENT) {
            headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
        }
    }
    if let Some(value) = timeout.and_then(encode_grpc_timeout) {
        if let Ok(value) = HeaderValue::from_str(&value) {
            headers.insert(GRPC_TIMEOUT, value);
        }
    }
    if let Some(codec) = send_compression {
        headers.insert(GRPC_ENCODING, HeaderValue::from_static(codec.name()));
    }
    if let Some(value) = join_names(accept_compression) {
        headers.insert(GRPC_ACCEPT_ENCODING, value);
    }
    headers
}

/// `connect-timeout-ms` in milliseconds for a deadline, if it can be expressed.
pub fn connect_timeout_ms(timeout: Option<Duration>) -> Option<u64> {
    timeout
        .and_then(encode_connect_timeout)
        .and_then(|s| s.parse().ok())
}

/// Check `connect-protocol-version` on an incoming Connect request.
///
/// When present it must be `1`; when absent it is an error only if
/// `require_header` is set.
pub fn validate_protocol_version(
    headers: &HeaderMap,
    require_header: bool,
) -> Result<(), ConnectError> {
    let version = headers
        .get(CONNECT_PROTOCOL_VERSION_HEADER)
        .map(|v| v.to_str().unwrap_or("<binary>"));
    match version {
        Some(CONNECT_PROTOCOL_VERSION) => Ok(()),
        Some(other) => Err(ConnectError::new(
            Code::InvalidArgument,
            format!(
                "{CONNECT_PROTOCOL_VERSION_HEADER} must be \"{CONNECT_PROTOCOL_VERSION}\": got \"{other}\""
            ),
        )),
        None if require_header => Err(ConnectError::new(
            Code::InvalidArgument,
            format!(
                "missing required header: set {CONNECT_PROTOCOL_VERSION_HEADER} to \"{CONNECT_PROTOCOL_VERSION}\""
            ),
        )),
        None => Ok(()),
    }
}

/// Headers applications must not set: they belong to the wire protocols.
pub fn is_reserved_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    name.starts_with("connect-")
        || name.starts_with("grpc-")
        || matches!(
            name.as_str(),
            "content-type" | "content-encoding" | "accept-encoding" | "te" | "x-grpc-web"
        )
}
