//! Protocol variants behind one capability trait.
//!
//! A call picks its [`Protocol`] once, from a [`ProtocolKind`], and drives
//! every wire decision through it: headers, framing, compression and error
//! encoding. [`ConnectProtocol`], [`GrpcProtocol`] and [`GrpcWebProtocol`]
//! are the three implementations.

mod connect;
mod grpc;
mod grpc_web;

use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::{HeaderMap, StatusCode};

pub use connect::{ConnectProtocol, split_unary_trailers, unary_trailer_headers};
pub use grpc::GrpcProtocol;
pub use grpc_web::GrpcWebProtocol;

use crate::codec::BoxedCodec;
use crate::compression::{CompressionConfig, CompressionRegistry};
use crate::content_type::{
    parse_connect_content_type, parse_grpc_content_type, parse_grpc_web_content_type,
};
use crate::envelope::{Envelope, envelope_flags};
use crate::error::{Code, ConnectError};
use crate::error_json::EndStream;
use crate::headers::MethodKind;
use crate::limits::MessageLimits;

/// The three wire protocols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProtocolKind {
    #[default]
    Connect,
    Grpc,
    GrpcWeb,
}

impl ProtocolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProtocolKind::Connect => "connect",
            ProtocolKind::Grpc => "grpc",
            ProtocolKind::GrpcWeb => "grpc_web",
        }
    }

    /// The implementation for this kind.
    pub fn protocol(&self) -> &'static dyn Protocol {
        match self {
            ProtocolKind::Connect => &ConnectProtocol,
            ProtocolKind::Grpc => &GrpcProtocol,
            ProtocolKind::GrpcWeb => &GrpcWebProtocol,
        }
    }

    /// Identify the protocol of an incoming request from its content type.
    pub fn detect(content_type: Option<&str>) -> Option<Self> {
        if parse_grpc_web_content_type(content_type).is_some() {
            Some(ProtocolKind::GrpcWeb)
        } else if parse_grpc_content_type(content_type).is_some() {
            Some(ProtocolKind::Grpc)
        } else if parse_connect_content_type(content_type).is_some() {
            Some(ProtocolKind::Connect)
        } else {
            None
        }
    }
}

impl fmt::Display for ProtocolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inputs for request header construction.
#[derive(Debug, Clone, Copy)]
pub struct RequestHeaderOptions<'a> {
    pub method_kind: MethodKind,
    pub use_binary_format: bool,
    pub timeout: Option<Duration>,
    pub user_headers: Option<&'a HeaderMap>,
    /// Encodings we accept, in preference order.
    pub accept_compression: &'a [BoxedCodec],
    /// Encoding we compress our messages with.
    pub send_compression: Option<&'a BoxedCodec>,
}

/// What the response headers told a client.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    /// Encoding the peer compressed its messages with.
    pub compression: Option<BoxedCodec>,
    /// The body is an error document (Connect unary error responses), to
    /// be passed to [`Protocol::decode_error`].
    pub error_body: bool,
}

/// What the request headers told a handler.
#[derive(Debug, Clone, Default)]
pub struct RequestHead {
    pub binary: bool,
    /// Encoding the client compressed its messages with.
    pub request_compression: Option<BoxedCodec>,
    /// Encoding to compress our response messages with.
    pub response_compression: Option<BoxedCodec>,
    pub timeout: Option<Duration>,
}

/// An outgoing message body or envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WrappedMessage {
    pub data: Bytes,
    /// Whether the payload went through the codec.
    pub compressed: bool,
}

/// A decoded inbound frame.
#[derive(Debug, Clone)]
pub enum Frame {
    Message(Bytes),
    End(EndStream),
}

/// A complete response for a call that failed before any message was sent.
#[derive(Debug, Clone)]
pub struct ErrorResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// How a handler closes a successful or failed response.
#[derive(Debug, Clone)]
pub enum EndOfStream {
    /// Append these bytes to the body.
    Body(Bytes),
    /// Send as HTTP trailers.
    Trailers(HeaderMap),
    /// Merge into the response headers (Connect unary).
    Headers(HeaderMap),
}

/// The wire-level capabilities of one protocol.
pub trait Protocol: Send + Sync + fmt::Debug {
    fn kind(&self) -> ProtocolKind;

    /// Whether messages of this call shape travel in envelopes.
    fn is_framed(&self, method_kind: MethodKind) -> bool;

    /// Build the headers of a request.
    fn request_headers(&self, options: &RequestHeaderOptions<'_>) -> HeaderMap;

    /// Validate a response's status line and headers.
    ///
    /// Fails when the headers alone settle the call: an unexpected HTTP
    /// status, a content type that does not match the request, an encoding
    /// we cannot decompress, or a gRPC trailers-only error.
    fn parse_response_headers(
        &self,
        method_kind: MethodKind,
        use_binary_format: bool,
        status: StatusCode,
        headers: &HeaderMap,
        registry: &CompressionRegistry,
    ) -> Result<ResponseHead, ConnectError>;

    /// Decode the error carried by a response that
    /// [`parse_response_headers`](Self::parse_response_headers) flagged.
    fn decode_error(&self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> ConnectError;

    /// Wrap one outgoing message, compressing it when a codec is given and
    /// the payload reaches the configured threshold.
    fn wrap_message(
        &self,
        method_kind: MethodKind,
        payload: Bytes,
        compression: Option<&BoxedCodec>,
        config: &CompressionConfig,
        limits: &MessageLimits,
    ) -> Result<WrappedMessage, ConnectError> {
        limits.check_write_size(payload.len())?;
        let (data, compressed) = compress_payload(payload, compression, config)?;
        if !self.is_framed(method_kind) {
            return Ok(WrappedMessage { data, compressed });
        }
        Ok(WrappedMessage {
            data: Envelope::message(data, compressed).encode(),
            compressed,
        })
    }

    /// Interpret one inbound envelope.
    fn unwrap_frame(
        &self,
        envelope: Envelope,
        compression: Option<&BoxedCodec>,
        limits: &MessageLimits,
    ) -> Result<Frame, ConnectError>;

    /// Decode an unframed body. Only Connect unary calls have one.
    fn unwrap_unary_body(
        &self,
        body: Bytes,
        compression: Option<&BoxedCodec>,
        limits: &MessageLimits,
    ) -> Result<Bytes, ConnectError> {
        let _ = (body, compression, limits);
        Err(ConnectError::internal(format!(
            "protocol error: {} bodies are always enveloped",
            self.kind()
        )))
    }

    /// Produce the end of stream after the body ended without an
    /// in-band end-of-stream frame.
    fn end_of_body(
        &self,
        method_kind: MethodKind,
        headers: &HeaderMap,
        trailers: Option<&HeaderMap>,
    ) -> Result<EndStream, ConnectError>;

    /// Handler side: validate request headers and negotiate compression.
    fn negotiate_request(
        &self,
        method_kind: MethodKind,
        headers: &HeaderMap,
        registry: &CompressionRegistry,
    ) -> Result<RequestHead, ConnectError>;

    /// Handler side: headers of a successful response.
    fn response_headers(
        &self,
        method_kind: MethodKind,
        use_binary_format: bool,
        compression: Option<&BoxedCodec>,
        registry: &CompressionRegistry,
    ) -> HeaderMap;

    /// Handler side: a complete response for a call that failed before any
    /// message was written.
    fn encode_error(
        &self,
        method_kind: MethodKind,
        use_binary_format: bool,
        error: &ConnectError,
    ) -> ErrorResponse;

    /// Handler side: close a response, successful or not.
    fn encode_end_of_stream(
        &self,
        method_kind: MethodKind,
        error: Option<&ConnectError>,
        trailers: &HeaderMap,
    ) -> Result<EndOfStream, ConnectError>;
}

/// Compress `payload` with `codec` when `config` allows it.
pub fn compress_payload(
    payload: Bytes,
    codec: Option<&BoxedCodec>,
    config: &CompressionConfig,
) -> Result<(Bytes, bool), ConnectError> {
    match codec {
        Some(codec) if config.should_compress(payload.len()) => {
            let compressed = codec.compress(&payload).map_err(|e| {
                ConnectError::new(Code::Internal, format!("compression failed: {e}"))
            })?;
            Ok((compressed, true))
        }
        _ => Ok((payload, false)),
    }
}

/// Decompress an inbound payload, enforcing the read limit before and after.
pub fn decompress_payload(
    payload: Bytes,
    compressed: bool,
    codec: Option<&BoxedCodec>,
    limits: &MessageLimits,
) -> Result<Bytes, ConnectError> {
    limits.check_read_size(payload.len())?;
    if !compressed {
        return Ok(payload);
    }
    let Some(codec) = codec else {
        return Err(ConnectError::internal(
            "protocol error: received compressed message without a negotiated encoding",
        ));
    };
    codec
        .decompress(&payload, limits.read_max_bytes_or_max())
        .map_err(|e| e.into_connect_error(codec.name()))
}

// Message envelopes may only carry the compressed bit.
fn check_message_flags(flags: u8) -> Result<(), ConnectError> {
    if flags & !envelope_flags::COMPRESSED != 0 {
        return Err(crate::envelope::EnvelopeError::InvalidFlags(flags).into());
    }
    Ok(())
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn http_status_error(status: StatusCode, headers: &HeaderMap) -> ConnectError {
    ConnectError::new(Code::from_http_status(status), format!("HTTP {status}"))
        .with_metadata(headers.clone())
}

fn unexpected_content_type(content_type: Option<&str>) -> ConnectError {
    ConnectError::internal(format!(
        "unexpected response content type \"{}\"",
        content_type.unwrap_or_default()
    ))
}

fn unsupported_content_type() -> ConnectError {
    ConnectError::unknown("unsupported content-type")
}
