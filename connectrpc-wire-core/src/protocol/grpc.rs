use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};

use super::{
    EndOfStream, ErrorResponse, Frame, Protocol, ProtocolKind, RequestHead, RequestHeaderOptions,
    ResponseHead, check_message_flags, decompress_payload, header_str, http_status_error,
    unexpected_content_type, unsupported_content_type,
};
use crate::codec::BoxedCodec;
use crate::compression::CompressionRegistry;
use crate::content_type::{CONTENT_TYPE_GRPC, CONTENT_TYPE_GRPC_JSON, parse_grpc_content_type};
use crate::envelope::Envelope;
use crate::error::{Code, ConnectError};
use crate::error_json::EndStream;
use crate::headers::{
    GRPC_ACCEPT_ENCODING, GRPC_ENCODING, GRPC_TIMEOUT, MethodKind, create_grpc_request_header,
};
use crate::limits::MessageLimits;
use crate::timeout::parse_grpc_timeout;
use crate::trailer::{error_metadata, find_trailer_error, has_status, set_trailer_status};

/// The gRPC protocol over HTTP/2.
///
/// Every call is enveloped. The outcome travels in HTTP trailers, or in the
/// headers of a trailers-only response.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcProtocol;

impl Protocol for GrpcProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::Grpc
    }

    fn is_framed(&self, _method_kind: MethodKind) -> bool {
        true
    }

    fn request_headers(&self, options: &RequestHeaderOptions<'_>) -> HeaderMap {
        create_grpc_request_header(
            false,
            options.use_binary_format,
            options.timeout,
            options.user_headers,
            options.accept_compression,
            options.send_compression,
        )
    }

    fn parse_response_headers(
        &self,
        _method_kind: MethodKind,
        use_binary_format: bool,
        status: StatusCode,
        headers: &HeaderMap,
        registry: &CompressionRegistry,
    ) -> Result<ResponseHead, ConnectError> {
        check_grpc_response_head(status, headers)?;
        let content_type = header_str(headers, CONTENT_TYPE.as_str());
        match parse_grpc_content_type(content_type) {
            Some(ct) if ct.binary == use_binary_format => {}
            _ => return Err(unexpected_content_type(content_type)),
        }
        let compression =
            registry.resolve_inbound(header_str(headers, GRPC_ENCODING), Code::Internal)?;
        Ok(ResponseHead {
            compression,
            error_body: false,
        })
    }

    fn decode_error(&self, status: StatusCode, headers: &HeaderMap, _body: &[u8]) -> ConnectError {
        decode_status_error(status, headers)
    }

    fn unwrap_frame(
        &self,
        envelope: Envelope,
        compression: Option<&BoxedCodec>,
        limits: &MessageLimits,
    ) -> Result<Frame, ConnectError> {
        check_message_flags(envelope.flags)?;
        let compressed = envelope.is_compressed();
        decompress_payload(envelope.data, compressed, compression, limits).map(Frame::Message)
    }

    fn end_of_body(
        &self,
        _method_kind: MethodKind,
        headers: &HeaderMap,
        trailers: Option<&HeaderMap>,
    ) -> Result<EndStream, ConnectError> {
        let source = match trailers {
            Some(trailers) if has_status(trailers) => trailers,
            _ if has_status(headers) => headers,
            _ => return Err(ConnectError::internal("protocol error: missing trailer")),
        };
        end_stream_from_status(source)
    }

    fn negotiate_request(
        &self,
        _method_kind: MethodKind,
        headers: &HeaderMap,
        registry: &CompressionRegistry,
    ) -> Result<RequestHead, ConnectError> {
        let content_type = parse_grpc_content_type(header_str(headers, CONTENT_TYPE.as_str()))
            .ok_or_else(unsupported_content_type)?;
        negotiate_grpc_request(content_type.binary, headers, registry)
    }

    fn response_headers(
        &self,
        _method_kind: MethodKind,
        use_binary_format: bool,
        compression: Option<&BoxedCodec>,
        registry: &CompressionRegistry,
    ) -> HeaderMap {
        let content_type = if use_binary_format {
            CONTENT_TYPE_GRPC
        } else {
            CONTENT_TYPE_GRPC_JSON
        };
        grpc_response_headers(content_type, compression, registry)
    }

    fn encode_error(
        &self,
        method_kind: MethodKind,
        use_binary_format: bool,
        error: &ConnectError,
    ) -> ErrorResponse {
        let headers = self.response_headers(
            method_kind,
            use_binary_format,
            None,
            &CompressionRegistry::new(),
        );
        trailers_only_error(headers, error)
    }

    fn encode_end_of_stream(
        &self,
        _method_kind: MethodKind,
        error: Option<&ConnectError>,
        trailers: &HeaderMap,
    ) -> Result<EndOfStream, ConnectError> {
        let mut trailers = trailers.clone();
        set_trailer_status(&mut trailers, error)?;
        Ok(EndOfStream::Trailers(trailers))
    }
}

/// Reject a response whose status line or headers already settle the call.
pub(super) fn check_grpc_response_head(
    status: StatusCode,
    headers: &HeaderMap,
) -> Result<(), ConnectError> {
    if status != StatusCode::OK {
        return Err(http_status_error(status, headers));
    }
    match find_trailer_error(headers)? {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

pub(super) fn decode_status_error(status: StatusCode, headers: &HeaderMap) -> ConnectError {
    match find_trailer_error(headers) {
        Ok(Some(error)) => error,
        Ok(None) => http_status_error(status, headers),
        Err(error) => error,
    }
}

/// The end of stream described by a gRPC status block.
pub(super) fn end_stream_from_status(source: &HeaderMap) -> Result<EndStream, ConnectError> {
    let error = find_trailer_error(source)?;
    Ok(EndStream {
        metadata: error_metadata(source),
        error,
    })
}

pub(super) fn negotiate_grpc_request(
    binary: bool,
    headers: &HeaderMap,
    registry: &CompressionRegistry,
) -> Result<RequestHead, ConnectError> {
    let timeout = header_str(headers, GRPC_TIMEOUT).and_then(parse_grpc_timeout);
    let request_compression =
        registry.resolve_inbound(header_str(headers, GRPC_ENCODING), Code::InvalidArgument)?;
    let response_compression = registry.negotiate(header_str(headers, GRPC_ACCEPT_ENCODING));
    Ok(RequestHead {
        binary,
        request_compression,
        response_compression,
        timeout,
    })
}

pub(super) fn grpc_response_headers(
    content_type: &'static str,
    compression: Option<&BoxedCodec>,
    registry: &CompressionRegistry,
) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    if let Some(codec) = compression {
        headers.insert(GRPC_ENCODING, HeaderValue::from_static(codec.name()));
    }
    if let Some(value) = registry
        .accept_header_value()
        .and_then(|v| HeaderValue::from_str(&v).ok())
    {
        headers.insert(GRPC_ACCEPT_ENCODING, value);
    }
    headers
}

/// A trailers-only response: the status rides in the headers.
pub(super) fn trailers_only_error(mut headers: HeaderMap, error: &ConnectError) -> ErrorResponse {
    if let Err(encode_error) = set_trailer_status(&mut headers, Some(error)) {
        tracing::warn!(error = %encode_error, "failed to encode error status");
        let _ = set_trailer_status(&mut headers, Some(&encode_error));
    }
    ErrorResponse {
        status: StatusCode::OK,
        headers,
        body: bytes::Bytes::new(),
    }
}
