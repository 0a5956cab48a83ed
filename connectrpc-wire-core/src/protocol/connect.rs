use bytes::Bytes;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};

use super::{
    EndOfStream, ErrorResponse, Frame, Protocol, ProtocolKind, RequestHead, RequestHeaderOptions,
    ResponseHead, check_message_flags, decompress_payload, header_str, http_status_error,
    unexpected_content_type, unsupported_content_type,
};
use crate::codec::BoxedCodec;
use crate::compression::CompressionRegistry;
use crate::content_type::{CONTENT_TYPE_UNARY_JSON, connect_content_type, parse_connect_content_type};
use crate::envelope::{Envelope, envelope_flags};
use crate::error::{Code, ConnectError};
use crate::error_json::{EndStream, end_stream_from_json, end_stream_to_json, error_from_json_bytes, error_to_json_bytes};
use crate::headers::{
    CONNECT_TIMEOUT_HEADER, MethodKind, connect_encoding_headers, connect_timeout_ms,
    create_request_header_with_compression, validate_protocol_version,
};
use crate::limits::MessageLimits;
use crate::timeout::parse_connect_timeout;

const TRAILER_PREFIX: &str = "trailer-";

/// The Connect protocol.
///
/// Unary calls carry a bare message body, with trailers sent as
/// `trailer-`-prefixed headers and errors as a JSON body under a non-200
/// status. Streaming calls are enveloped and end with an end-stream
/// envelope holding JSON trailers and the error, if any.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectProtocol;

impl Protocol for ConnectProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Connect
    }

    fn is_framed(&self, method_kind: MethodKind) -> bool {
        !method_kind.is_unary()
    }

    fn request_headers(&self, options: &RequestHeaderOptions<'_>) -> HeaderMap {
        create_request_header_with_compression(
            options.method_kind,
            options.use_binary_format,
            connect_timeout_ms(options.timeout),
            options.user_headers,
            options.accept_compression,
            options.send_compression,
        )
    }

    fn parse_response_headers(
        &self,
        method_kind: MethodKind,
        use_binary_format: bool,
        status: StatusCode,
        headers: &HeaderMap,
        registry: &CompressionRegistry,
    ) -> Result<ResponseHead, ConnectError> {
        let (encoding_header, _) = connect_encoding_headers(method_kind);
        let encoding = header_str(headers, encoding_header);

        if method_kind.is_unary() && status != StatusCode::OK {
            // An error body may be compressed; an encoding we cannot read
            // leaves decode_error to fall back to the HTTP status.
            let compression = registry
                .resolve_inbound(encoding, Code::Internal)
                .ok()
                .flatten();
            return Ok(ResponseHead {
                compression,
                error_body: true,
            });
        }
        if status != StatusCode::OK {
            return Err(http_status_error(status, headers));
        }

        let content_type = header_str(headers, CONTENT_TYPE.as_str());
        match parse_connect_content_type(content_type) {
            Some(info)
                if info.stream != method_kind.is_unary() && info.binary == use_binary_format => {}
            _ => return Err(unexpected_content_type(content_type)),
        }

        let compression = registry.resolve_inbound(encoding, Code::Internal)?;
        Ok(ResponseHead {
            compression,
            error_body: false,
        })
    }

    fn decode_error(&self, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> ConnectError {
        let (headers, trailers) = split_unary_trailers(headers);
        let mut metadata = headers;
        for (name, value) in &trailers {
            metadata.append(name, value.clone());
        }
        match error_from_json_bytes(body, Some(&metadata)) {
            Ok(error) => error,
            Err(parse_error) => {
                tracing::debug!(%status, error = %parse_error, "response is not a Connect error");
                http_status_error(status, &metadata)
            }
        }
    }

    fn unwrap_frame(
        &self,
        envelope: Envelope,
        compression: Option<&BoxedCodec>,
        limits: &MessageLimits,
    ) -> Result<Frame, ConnectError> {
        let compressed = envelope.is_compressed();
        if envelope.is_end_stream() {
            if envelope.flags & !(envelope_flags::END_STREAM | envelope_flags::COMPRESSED) != 0 {
                return Err(crate::envelope::EnvelopeError::InvalidFlags(envelope.flags).into());
            }
            let payload = decompress_payload(envelope.data, compressed, compression, limits)?;
            return end_stream_from_json(&payload).map(Frame::End);
        }
        check_message_flags(envelope.flags)?;
        decompress_payload(envelope.data, compressed, compression, limits).map(Frame::Message)
    }

    fn unwrap_unary_body(
        &self,
        body: Bytes,
        compression: Option<&BoxedCodec>,
        limits: &MessageLimits,
    ) -> Result<Bytes, ConnectError> {
        decompress_payload(body, compression.is_some(), compression, limits)
    }

    fn end_of_body(
        &self,
        method_kind: MethodKind,
        headers: &HeaderMap,
        _trailers: Option<&HeaderMap>,
    ) -> Result<EndStream, ConnectError> {
        if method_kind.is_unary() {
            let (_, metadata) = split_unary_trailers(headers);
            return Ok(EndStream {
                metadata,
                error: None,
            });
        }
        Err(ConnectError::invalid_argument(
            "protocol error: missing EndStreamResponse",
        ))
    }

    fn negotiate_request(
        &self,
        method_kind: MethodKind,
        headers: &HeaderMap,
        registry: &CompressionRegistry,
    ) -> Result<RequestHead, ConnectError> {
        let info = parse_connect_content_type(header_str(headers, CONTENT_TYPE.as_str()))
            .filter(|info| info.stream != method_kind.is_unary())
            .ok_or_else(unsupported_content_type)?;
        validate_protocol_version(headers, false)?;

        // Invalid or zero values mean no deadline.
        let timeout = header_str(headers, CONNECT_TIMEOUT_HEADER).and_then(parse_connect_timeout);

        let (encoding_header, accept_header) = connect_encoding_headers(method_kind);
        let request_compression = registry
            .resolve_inbound(header_str(headers, encoding_header), Code::InvalidArgument)?;
        let response_compression = registry.negotiate(header_str(headers, accept_header));

        Ok(RequestHead {
            binary: info.binary,
            request_compression,
            response_compression,
            timeout,
        })
    }

    fn response_headers(
        &self,
        method_kind: MethodKind,
        use_binary_format: bool,
        compression: Option<&BoxedCodec>,
        registry: &CompressionRegistry,
    ) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(connect_content_type(
                !method_kind.is_unary(),
                use_binary_format,
            )),
        );
        let (encoding_header, accept_header) = connect_encoding_headers(method_kind);
        if let Some(codec) = compression {
            headers.insert(encoding_header, HeaderValue::from_static(codec.name()));
        }
        if let Some(value) = registry
            .accept_header_value()
            .and_then(|v| HeaderValue::from_str(&v).ok())
        {
            headers.insert(accept_header, value);
        }
        headers
    }

    fn encode_error(
        &self,
        method_kind: MethodKind,
        use_binary_format: bool,
        error: &ConnectError,
    ) -> ErrorResponse {
        if method_kind.is_unary() {
            let mut headers = error.metadata().clone();
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(CONTENT_TYPE_UNARY_JSON));
            let body = error_to_json_bytes(error)
                .or_else(|e| error_to_json_bytes(&e))
                .unwrap_or_default();
            return ErrorResponse {
                status: error.code().http_status(),
                headers,
                body,
            };
        }

        let mut headers = HeaderMap::new();
        headers.insert(
            CONTENT_TYPE,
            HeaderValue::from_static(connect_content_type(true, use_binary_format)),
        );
        let payload = end_stream_to_json(&HeaderMap::new(), Some(error))
            .or_else(|e| end_stream_to_json(&HeaderMap::new(), Some(&e)))
            .unwrap_or_default();
        ErrorResponse {
            status: StatusCode::OK,
            headers,
            body: Envelope::new(envelope_flags::END_STREAM, payload).encode(),
        }
    }

    fn encode_end_of_stream(
        &self,
        method_kind: MethodKind,
        error: Option<&ConnectError>,
        trailers: &HeaderMap,
    ) -> Result<EndOfStream, ConnectError> {
        if method_kind.is_unary() {
            // Unary errors replace the whole response; see encode_error.
            return Ok(EndOfStream::Headers(unary_trailer_headers(trailers)));
        }
        let payload = end_stream_to_json(trailers, error)?;
        Ok(EndOfStream::Body(
            Envelope::new(envelope_flags::END_STREAM, payload).encode(),
        ))
    }
}

/// Prefix trailers for a Connect unary response.
pub fn unary_trailer_headers(trailers: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::with_capacity(trailers.len());
    for (name, value) in trailers {
        let prefixed = format!("{TRAILER_PREFIX}{}", name.as_str());
        if let Ok(name) = HeaderName::from_bytes(prefixed.as_bytes()) {
            headers.append(name, value.clone());
        }
    }
    headers
}

/// Split Connect unary response headers into headers and trailers.
pub fn split_unary_trailers(headers: &HeaderMap) -> (HeaderMap, HeaderMap) {
    let mut plain = HeaderMap::new();
    let mut trailers = HeaderMap::new();
    for (name, value) in headers {
        match name
            .as_str()
            .strip_prefix(TRAILER_PREFIX)
            .and_then(|n| HeaderName::from_bytes(n.as_bytes()).ok())
        {
            Some(trailer) => {
                trailers.append(trailer, value.clone());
            }
            None => {
                plain.append(name, value.clone());
            }
        }
    }
    (plain, trailers)
}
