//! Enveloped response decoding.
//!
//! [`FrameDecoder`] reads a response body, splits it into envelopes and
//! yields decoded messages. Where the stream ends depends on the protocol:
//! a Connect end-stream envelope, a gRPC-Web trailer envelope, or HTTP
//! trailers for gRPC.

use std::pin::Pin;
use std::task::{Context, Poll};

use connectrpc_wire_core::{
    BoxedCodec, ConnectError, EndStream, EnvelopeReader, Frame, MessageLimits, MethodKind,
    Protocol, Serialization,
};
use futures::Stream;
use http::HeaderMap;
use http_body::Body;

use super::Metadata;
use crate::transport::ResponseBody;

/// Stream adapter from a response body to messages of type `T`.
///
/// Yields `Ok(message)` for each message, then either ends cleanly or
/// yields the error carried by the end of stream. Trailers are available
/// through [`trailers`](Self::trailers) once the stream has ended.
pub struct FrameDecoder<T> {
    body: ResponseBody,
    reader: EnvelopeReader,
    protocol: &'static dyn Protocol,
    method_kind: MethodKind,
    compression: Option<BoxedCodec>,
    limits: MessageLimits,
    serialization: Box<dyn Serialization<T>>,
    headers: HeaderMap,
    http_trailers: Option<HeaderMap>,
    trailers: Option<Metadata>,
    finished: bool,
}

impl<T> FrameDecoder<T> {
    /// `headers` are the response headers, consulted when the body ends
    /// without an in-band end of stream.
    pub fn new(
        body: ResponseBody,
        protocol: &'static dyn Protocol,
        method_kind: MethodKind,
        compression: Option<BoxedCodec>,
        limits: MessageLimits,
        serialization: Box<dyn Serialization<T>>,
        headers: HeaderMap,
    ) -> Self {
        let reader = match limits.get_read_max_bytes() {
            Some(max) => EnvelopeReader::with_max_bytes(max),
            None => EnvelopeReader::new(),
        };
        Self {
            body,
            reader,
            protocol,
            method_kind,
            compression,
            limits,
            serialization,
            headers,
            http_trailers: None,
            trailers: None,
            finished: false,
        }
    }

    /// Trailing metadata, once the stream has ended.
    pub fn trailers(&self) -> Option<&Metadata> {
        self.trailers.as_ref()
    }

    pub fn take_trailers(&mut self) -> Option<Metadata> {
        self.trailers.take()
    }

    /// Response headers.
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn fail(&mut self, error: ConnectError) -> Poll<Option<Result<T, ConnectError>>> {
        self.finished = true;
        Poll::Ready(Some(Err(error)))
    }

    fn end(&mut self, end: EndStream) -> Poll<Option<Result<T, ConnectError>>> {
        self.finished = true;
        self.trailers = Some(Metadata::new(end.metadata));
        match end.error {
            Some(error) => Poll::Ready(Some(Err(error))),
            None => Poll::Ready(None),
        }
    }
}

impl<T> Unpin for FrameDecoder<T> {}

impl<T> Stream for FrameDecoder<T> {
    type Item = Result<T, ConnectError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();

        loop {
            if this.finished {
                return Poll::Ready(None);
            }

            match this.reader.next_envelope() {
                Ok(Some(envelope)) => {
                    let frame = this.protocol.unwrap_frame(
                        envelope,
                        this.compression.as_ref(),
                        &this.limits,
                    );
                    return match frame {
                        Ok(Frame::Message(payload)) => match this.serialization.parse(&payload) {
                            Ok(message) => Poll::Ready(Some(Ok(message))),
                            Err(error) => this.fail(error),
                        },
                        Ok(Frame::End(end)) => this.end(end),
                        Err(error) => this.fail(error),
                    };
                }
                Ok(None) => {}
                Err(error) => return this.fail(error.into()),
            }

            match Pin::new(&mut this.body).poll_frame(cx) {
                Poll::Ready(Some(Ok(frame))) => match frame.into_data() {
                    Ok(data) => this.reader.push(&data),
                    Err(frame) => {
                        if let Ok(trailers) = frame.into_trailers() {
                            this.http_trailers
                                .get_or_insert_with(HeaderMap::new)
                                .extend(trailers);
                        }
                    }
                },
                Poll::Ready(Some(Err(error))) => return this.fail(error),
                Poll::Ready(None) => {
                    if let Err(error) = this.reader.finish() {
                        return this.fail(error.into());
                    }
                    let end = this.protocol.end_of_body(
                        this.method_kind,
                        &this.headers,
                        this.http_trailers.as_ref(),
                    );
                    return match end {
                        Ok(end) => this.end(end),
                        Err(error) => this.fail(error),
                    };
                }
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
