use http::header::CONTENT_TYPE;
use http::{HeaderMap, StatusCode};

use super::grpc::{
    check_grpc_response_head, decode_status_error, end_stream_from_status, grpc_response_headers,
    negotiate_grpc_request, trailers_only_error,
};
use super::{
    EndOfStream, ErrorResponse, Frame, Protocol, ProtocolKind, RequestHead, RequestHeaderOptions,
    ResponseHead, check_message_flags, decompress_payload, header_str, unexpected_content_type,
    unsupported_content_type,
};
use crate::codec::BoxedCodec;
use crate::compression::CompressionRegistry;
use crate::content_type::{
    CONTENT_TYPE_GRPC_WEB_JSON, CONTENT_TYPE_GRPC_WEB_PROTO, parse_grpc_web_content_type,
};
use crate::envelope::{Envelope, envelope_flags};
use crate::error::{Code, ConnectError};
use crate::error_json::EndStream;
use crate::headers::{GRPC_ENCODING, MethodKind, create_grpc_request_header};
use crate::limits::MessageLimits;
use crate::trailer::{encode_trailer_block, has_status, parse_trailer_block, set_trailer_status};

/// gRPC-Web: gRPC framing for HTTP/1.1 peers.
///
/// Trailers travel in the body as a final envelope flagged `0x80`, holding
/// an HTTP/1-style header block.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrpcWebProtocol;

impl Protocol for GrpcWebProtocol {
    fn kind(&self) -> ProtocolKind {
        ProtocolKind::GrpcWeb
    }

    fn is_framed(&self, _method_kind: MethodKind) -> bool {
        true
    }

    fn request_headers(&self, options: &RequestHeaderOptions<'_>) -> HeaderMap {
        create_grpc_request_header(
            true,
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
        match parse_grpc_web_content_type(content_type) {
            Some(ct) if !ct.text && ct.binary == use_binary_format => {}
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
        let compressed = envelope.is_compressed();
        if envelope.is_trailer() {
            if envelope.flags & !(envelope_flags::TRAILER | envelope_flags::COMPRESSED) != 0 {
                return Err(crate::envelope::EnvelopeError::InvalidFlags(envelope.flags).into());
            }
            let block = decompress_payload(envelope.data, compressed, compression, limits)?;
            let trailers = parse_trailer_block(&block)?;
            if !has_status(&trailers) {
                return Err(ConnectError::internal("protocol error: missing status in trailer"));
            }
            return end_stream_from_status(&trailers).map(Frame::End);
        }
        check_message_flags(envelope.flags)?;
        decompress_payload(envelope.data, compressed, compression, limits).map(Frame::Message)
    }

    fn end_of_body(
        &self,
        _method_kind: MethodKind,
        headers: &HeaderMap,
        trailers: Option<&HeaderMap>,
    ) -> Result<EndStream, ConnectError> {
        // Without a trailer envelope, only a trailers-only response or
        // real HTTP trailers can still settle the call.
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
        let content_type = parse_grpc_web_content_type(header_str(headers, CONTENT_TYPE.as_str()))
            .filter(|ct| !ct.text)
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
            CONTENT_TYPE_GRPC_WEB_PROTO
        } else {
            CONTENT_TYPE_GRPC_WEB_JSON
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
        let block = encode_trailer_block(&trailers);
        Ok(EndOfStream::Body(
            Envelope::new(envelope_flags::TRAILER, block).encode(),
        ))
    }
}
