//! Streaming request encoding.
//!
//! [`FrameEncoder`] turns a stream of messages into enveloped chunks for a
//! streaming request body.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use connectrpc_wire_core::{
    BoxedCodec, CompressionConfig, ConnectError, MessageLimits, MethodKind, Protocol,
    Serialization,
};
use futures::Stream;

/// Stream adapter from messages to enveloped request bytes.
///
/// The request side never carries an end-of-stream frame; closing the
/// body ends the stream. The first encoding error is yielded and ends the
/// stream.
///
/// # Frame Format
///
/// ```text
/// [flags:1][length:4][payload:length]
/// ```
pub struct FrameEncoder<S, T> {
    stream: S,
    protocol: &'static dyn Protocol,
    method_kind: MethodKind,
    serialization: Box<dyn Serialization<T>>,
    compression: Option<BoxedCodec>,
    config: CompressionConfig,
    limits: MessageLimits,
    done: bool,
}

impl<S, T> FrameEncoder<S, T> {
    pub fn new(
        stream: S,
        protocol: &'static dyn Protocol,
        method_kind: MethodKind,
        serialization: Box<dyn Serialization<T>>,
        compression: Option<BoxedCodec>,
        config: CompressionConfig,
        limits: MessageLimits,
    ) -> Self {
        Self {
            stream,
            protocol,
            method_kind,
            serialization,
            compression,
            config,
            limits,
            done: false,
        }
    }

    /// The codec outgoing messages are compressed with.
    pub fn compression(&self) -> Option<&BoxedCodec> {
        self.compression.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.done
    }

    fn encode_frame(&self, message: &T) -> Result<Bytes, ConnectError> {
        let payload = self.serialization.serialize(message)?;
        let wrapped = self.protocol.wrap_message(
            self.method_kind,
            payload,
            self.compression.as_ref(),
            &self.config,
            &self.limits,
        )?;
        Ok(wrapped.data)
    }
}

impl<S: Unpin, T> Unpin for FrameEncoder<S, T> {}

impl<S, T> Stream for FrameEncoder<S, T>
where
    S: Stream<Item = T> + Unpin,
{
    type Item = Result<Bytes, ConnectError>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match Pin::new(&mut this.stream).poll_next(cx) {
            Poll::Ready(Some(message)) => {
                let frame = this.encode_frame(&message);
                if frame.is_err() {
                    this.done = true;
                }
                Poll::Ready(Some(frame))
            }
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
