//! RPC client.
//!
//! [`ConnectClient`] composes the wire building blocks of
//! `connectrpc-wire-core` into the four call shapes. It speaks Connect, gRPC
//! or gRPC-Web, picked once at build time, and hands every request to a
//! [`Transport`].

use std::future::Future;
use std::time::Duration;

use bytes::Bytes;
use connectrpc_wire_core::{
    BoxedCodec, CompressionConfig, CompressionRegistry, ConnectError, MessageLimits, MethodKind,
    Protocol, ProtocolKind, RequestHeaderOptions, ResponseHead, create_serialization,
    is_reserved_header, split_unary_trailers,
};
use futures::{Stream, StreamExt};
use http::{HeaderMap, Method, StatusCode};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use serde::{Serialize, de::DeserializeOwned};
use tokio::time::Instant;
use tracing::Instrument;

use crate::builder::ClientBuilder;
use crate::options::{CallOptions, CancelSignal};
use crate::request::FrameEncoder;
use crate::response::{ConnectResponse, FrameDecoder, Metadata, Streaming};
use crate::transport::{ResponseBody, Transport, TransportBody};

/// Bounds every request and response message satisfies.
///
/// Implemented for all prost messages that also derive serde.
pub trait RpcMessage:
    prost::Message + prost::Name + Serialize + DeserializeOwned + Default + Send + Sync + 'static
{
}

impl<T> RpcMessage for T where
    T: prost::Message
        + prost::Name
        + Serialize
        + DeserializeOwned
        + Default
        + Send
        + Sync
        + 'static
{
}

/// RPC client over a [`Transport`].
///
/// Use [`ClientBuilder`] or [`ConnectClient::builder`] to create an instance.
///
/// # Example
///
/// ```ignore
/// use connectrpc_wire_client::ConnectClient;
///
/// let client = ConnectClient::builder("http://localhost:3000", transport)
///     .use_proto()
///     .build()?;
///
/// let response = client.call_unary::<MyRequest, MyResponse>(
///     "my.package.MyService/MyMethod",
///     &request,
/// ).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ConnectClient<T> {
    transport: T,
    base_url: String,
    protocol: ProtocolKind,
    use_proto: bool,
    send_compression: Option<BoxedCodec>,
    registry: CompressionRegistry,
    compression: CompressionConfig,
    limits: MessageLimits,
    default_timeout: Option<Duration>,
    headers: HeaderMap,
}

/// Deadline and cancellation of one call.
struct CallGuard {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    cancel: Option<CancelSignal>,
}

impl CallGuard {
    /// Run `future` until it completes, the deadline passes or the call is
    /// canceled.
    async fn run<F, O>(&self, future: F) -> Result<O, ConnectError>
    where
        F: Future<Output = Result<O, ConnectError>>,
    {
        if self.cancel.as_ref().is_some_and(|c| c.is_cancelled()) {
            return Err(canceled());
        }
        let deadline = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending().await,
            }
        };
        let cancel = async {
            match &self.cancel {
                Some(signal) => signal.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;

            _ = cancel => Err(canceled()),
            _ = deadline => Err(deadline_exceeded()),
            result = future => result,
        }
    }

    /// Carry the deadline and cancellation into a response stream.
    fn attach<R>(&self, streaming: Streaming<R>) -> Streaming<R> {
        streaming
            .with_deadline(self.deadline)
            .with_cancel(self.cancel.as_ref().map(|c| c.cancelled()))
    }
}

fn canceled() -> ConnectError {
    ConnectError::canceled("call canceled")
}

fn deadline_exceeded() -> ConnectError {
    ConnectError::deadline_exceeded("deadline exceeded")
}

/// Buffer a whole body, failing as soon as it grows past `max_bytes`.
async fn collect_limited(
    body: ResponseBody,
    max_bytes: Option<usize>,
) -> Result<Bytes, ConnectError> {
    let Some(max) = max_bytes else {
        return Ok(body.collect().await?.to_bytes());
    };
    match Limited::new(body, max).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(err) => match err.downcast::<ConnectError>() {
            Ok(err) => Err(*err),
            Err(err) if err.is::<LengthLimitError>() => Err(ConnectError::resource_exhausted(
                format!("response body is larger than configured max {max}"),
            )),
            Err(err) => Err(ConnectError::internal(err.to_string())),
        },
    }
}

fn method_type(method_kind: MethodKind) -> &'static str {
    match method_kind {
        MethodKind::Unary => "unary",
        MethodKind::ServerStreaming => "server_streaming",
        MethodKind::ClientStreaming => "client_streaming",
        MethodKind::BiDiStreaming => "bidi_streaming",
    }
}

impl<T: Transport> ConnectClient<T> {
    /// Equivalent to [`ClientBuilder::new`].
    pub fn builder<S: Into<String>>(base_url: S, transport: T) -> ClientBuilder<T> {
        ClientBuilder::new(base_url, transport)
    }

    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        transport: T,
        base_url: String,
        protocol: ProtocolKind,
        use_proto: bool,
        send_compression: Option<BoxedCodec>,
        registry: CompressionRegistry,
        compression: CompressionConfig,
        limits: MessageLimits,
        default_timeout: Option<Duration>,
        headers: HeaderMap,
    ) -> Self {
        Self {
            transport,
            base_url,
            protocol,
            use_proto,
            send_compression,
            registry,
            compression,
            limits,
            default_timeout,
            headers,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn protocol(&self) -> ProtocolKind {
        self.protocol
    }

    pub fn is_proto(&self) -> bool {
        self.use_proto
    }

    /// Codec outgoing messages are compressed with, if any.
    pub fn send_compression(&self) -> Option<&BoxedCodec> {
        self.send_compression.as_ref()
    }

    pub fn registry(&self) -> &CompressionRegistry {
        &self.registry
    }

    pub fn limits(&self) -> MessageLimits {
        self.limits
    }

    fn driver(&self) -> &'static dyn Protocol {
        self.protocol.protocol()
    }

    fn encoding_name(&self) -> &'static str {
        if self.use_proto { "proto" } else { "json" }
    }

    fn span(&self, procedure: &str, method_kind: MethodKind) -> tracing::Span {
        tracing::info_span!(
            "rpc.call",
            rpc.method = %procedure,
            rpc.type = method_type(method_kind),
            rpc.protocol = %self.protocol,
            rpc.encoding = self.encoding_name(),
            otel.kind = "client",
        )
    }

    fn guard(&self, options: &CallOptions) -> CallGuard {
        let timeout = options.timeout.or(self.default_timeout);
        CallGuard {
            timeout,
            deadline: timeout.map(|t| Instant::now() + t),
            cancel: options.cancel.clone(),
        }
    }

    /// Client defaults followed by per-call headers, minus reserved names.
    fn user_headers(&self, options: &CallOptions) -> HeaderMap {
        let mut headers = HeaderMap::with_capacity(self.headers.len() + options.headers.len());
        for (name, value) in self.headers.iter().chain(options.headers.iter()) {
            if is_reserved_header(name.as_str()) {
                tracing::debug!(header = %name, "dropping reserved header");
                continue;
            }
            headers.append(name.clone(), value.clone());
        }
        headers
    }

    fn build_request(
        &self,
        procedure: &str,
        method_kind: MethodKind,
        options: &CallOptions,
        guard: &CallGuard,
        send_compression: Option<&BoxedCodec>,
        body: TransportBody,
    ) -> Result<http::Request<TransportBody>, ConnectError> {
        let user_headers = self.user_headers(options);
        let headers = self.driver().request_headers(&RequestHeaderOptions {
            method_kind,
            use_binary_format: self.use_proto,
            timeout: guard.timeout,
            user_headers: Some(&user_headers),
            accept_compression: self.registry.codecs(),
            send_compression,
        });

        let procedure = procedure.strip_prefix('/').unwrap_or(procedure);
        let url = format!("{}/{}", self.base_url, procedure);
        let mut request = http::Request::builder()
            .method(Method::POST)
            .uri(&url)
            .body(body)
            .map_err(|e| ConnectError::internal(format!("failed to build request: {e}")))?;
        *request.headers_mut() = headers;
        Ok(request)
    }

    fn parse_head(
        &self,
        method_kind: MethodKind,
        status: StatusCode,
        headers: &HeaderMap,
    ) -> Result<ResponseHead, ConnectError> {
        self.driver().parse_response_headers(
            method_kind,
            self.use_proto,
            status,
            headers,
            &self.registry,
        )
    }

    /// Decode an error document body flagged by the response head.
    async fn read_error(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        head: &ResponseHead,
        body: ResponseBody,
    ) -> ConnectError {
        let body = match collect_limited(body, self.limits.get_read_max_bytes()).await {
            Ok(body) => body,
            Err(err) => return err,
        };
        let body = match &head.compression {
            Some(codec) => codec
                .decompress(&body, self.limits.read_max_bytes_or_max())
                .unwrap_or(body),
            None => body,
        };
        self.driver().decode_error(status, headers, &body)
    }

    /// Read a response that must hold exactly one message.
    async fn read_single<Res: RpcMessage>(
        &self,
        method_kind: MethodKind,
        response: http::Response<ResponseBody>,
    ) -> Result<ConnectResponse<Res>, ConnectError> {
        let (parts, body) = response.into_parts();
        let head = self.parse_head(method_kind, parts.status, &parts.headers)?;
        if head.error_body {
            return Err(self.read_error(parts.status, &parts.headers, &head, body).await);
        }

        let serialization = create_serialization::<Res>(self.use_proto);
        let driver = self.driver();
        if !driver.is_framed(method_kind) {
            let body = collect_limited(body, self.limits.get_read_max_bytes()).await?;
            let payload =
                driver.unwrap_unary_body(body, head.compression.as_ref(), &self.limits)?;
            let message = serialization.parse(&payload)?;
            let (headers, trailers) = split_unary_trailers(&parts.headers);
            return Ok(ConnectResponse::new(message, headers.into()).with_trailers(trailers.into()));
        }

        let mut decoder = FrameDecoder::new(
            body,
            driver,
            method_kind,
            head.compression,
            self.limits,
            serialization,
            parts.headers,
        );
        let message = match decoder.next().await {
            Some(Ok(message)) => message,
            Some(Err(err)) => return Err(err),
            None => {
                return Err(ConnectError::unimplemented(
                    "protocol error: response has no message",
                ));
            }
        };
        match decoder.next().await {
            None => {}
            Some(Err(err)) => return Err(err),
            Some(Ok(_)) => {
                return Err(ConnectError::unimplemented(
                    "protocol error: response has more than one message",
                ));
            }
        }
        let trailers = decoder.take_trailers().unwrap_or_default();
        let metadata = Metadata::new(decoder.headers().clone());
        Ok(ConnectResponse::new(message, metadata).with_trailers(trailers))
    }

    /// Validate a streaming response head and wrap its body.
    async fn open_stream<Res: RpcMessage>(
        &self,
        method_kind: MethodKind,
        response: http::Response<ResponseBody>,
    ) -> Result<ConnectResponse<Streaming<Res>>, ConnectError> {
        let (parts, body) = response.into_parts();
        let head = self.parse_head(method_kind, parts.status, &parts.headers)?;
        if head.error_body {
            return Err(self.read_error(parts.status, &parts.headers, &head, body).await);
        }
        let metadata = Metadata::new(parts.headers.clone());
        let decoder = FrameDecoder::new(
            body,
            self.driver(),
            method_kind,
            head.compression,
            self.limits,
            create_serialization::<Res>(self.use_proto),
            parts.headers,
        );
        Ok(ConnectResponse::new(Streaming::new(decoder), metadata))
    }

    /// Enveloped request body fed by `requests`.
    fn streaming_body<Req, S>(&self, method_kind: MethodKind, requests: S) -> TransportBody
    where
        Req: RpcMessage,
        S: Stream<Item = Req> + Send + 'static,
    {
        TransportBody::streaming(FrameEncoder::new(
            Box::pin(requests),
            self.driver(),
            method_kind,
            create_serialization::<Req>(self.use_proto),
            self.send_compression.clone(),
            self.compression,
            self.limits,
        ))
    }

    /// Make a unary RPC call.
    ///
    /// `procedure` is the full path, e.g. `my.package.MyService/MyMethod`.
    pub async fn call_unary<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
    ) -> Result<ConnectResponse<Res>, ConnectError>
    where
        Req: RpcMessage,
        Res: RpcMessage,
    {
        self.call_unary_with_options(procedure, request, CallOptions::default())
            .await
    }

    /// [`call_unary`](Self::call_unary) with per-call options.
    pub async fn call_unary_with_options<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<ConnectResponse<Res>, ConnectError>
    where
        Req: RpcMessage,
        Res: RpcMessage,
    {
        let method_kind = MethodKind::Unary;
        let guard = self.guard(&options);
        let call = async {
            let payload = create_serialization::<Req>(self.use_proto).serialize(request)?;
            let wrapped = self.driver().wrap_message(
                method_kind,
                payload,
                self.send_compression.as_ref(),
                &self.compression,
                &self.limits,
            )?;
            // An unframed body only declares an encoding when it was compressed.
            let send_compression = if wrapped.compressed || self.driver().is_framed(method_kind)
            {
                self.send_compression.as_ref()
            } else {
                None
            };
            let request = self.build_request(
                procedure,
                method_kind,
                &options,
                &guard,
                send_compression,
                TransportBody::full(wrapped.data),
            )?;
            let response = self.transport.send(request).await?;
            self.read_single(method_kind, response).await
        };
        guard
            .run(call)
            .instrument(self.span(procedure, method_kind))
            .await
    }

    /// Make a server-streaming RPC call.
    ///
    /// Errors raised before the first message arrive here; later ones are
    /// yielded by the [`Streaming`], which also exposes the trailers once
    /// consumed.
    ///
    /// # Example
    ///
    /// ```ignore
    /// use futures::StreamExt;
    ///
    /// let response = client.call_server_stream::<ListRequest, ListItem>(
    ///     "items.v1.ItemService/ListItems",
    ///     &ListRequest { page_size: 10 },
    /// ).await?;
    ///
    /// let mut stream = response.into_inner();
    /// while let Some(item) = stream.next().await {
    ///     println!("Item: {:?}", item?);
    /// }
    /// ```
    pub async fn call_server_stream<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
    ) -> Result<ConnectResponse<Streaming<Res>>, ConnectError>
    where
        Req: RpcMessage,
        Res: RpcMessage,
    {
        self.call_server_stream_with_options(procedure, request, CallOptions::default())
            .await
    }

    pub async fn call_server_stream_with_options<Req, Res>(
        &self,
        procedure: &str,
        request: &Req,
        options: CallOptions,
    ) -> Result<ConnectResponse<Streaming<Res>>, ConnectError>
    where
        Req: RpcMessage,
        Res: RpcMessage,
    {
        let method_kind = MethodKind::ServerStreaming;
        let guard = self.guard(&options);
        let call = async {
            let payload = create_serialization::<Req>(self.use_proto).serialize(request)?;
            let wrapped = self.driver().wrap_message(
                method_kind,
                payload,
                self.send_compression.as_ref(),
                &self.compression,
                &self.limits,
            )?;
            let request = self.build_request(
                procedure,
                method_kind,
                &options,
                &guard,
                self.send_compression.as_ref(),
                TransportBody::full(wrapped.data),
            )?;
            let response = self.transport.send(request).await?;
            self.open_stream::<Res>(method_kind, response).await
        };
        let response = guard
            .run(call)
            .instrument(self.span(procedure, method_kind))
            .await?;
        Ok(response.map(|streaming| guard.attach(streaming)))
    }

    /// Make a client-streaming RPC call.
    ///
    /// Every message of `requests` is sent before the single response is
    /// read.
    pub async fn call_client_stream<Req, Res, S>(
        &self,
        procedure: &str,
        requests: S,
    ) -> Result<ConnectResponse<Res>, ConnectError>
    where
        Req: RpcMessage,
        Res: RpcMessage,
        S: Stream<Item = Req> + Send + 'static,
    {
        self.call_client_stream_with_options(procedure, requests, CallOptions::default())
            .await
    }

    pub async fn call_client_stream_with_options<Req, Res, S>(
        &self,
        procedure: &str,
        requests: S,
        options: CallOptions,
    ) -> Result<ConnectResponse<Res>, ConnectError>
    where
        Req: RpcMessage,
        Res: RpcMessage,
        S: Stream<Item = Req> + Send + 'static,
    {
        let method_kind = MethodKind::ClientStreaming;
        let guard = self.guard(&options);
        let call = async {
            let body = self.streaming_body(method_kind, requests);
            let request = self.build_request(
                procedure,
                method_kind,
                &options,
                &guard,
                self.send_compression.as_ref(),
                body,
            )?;
            let response = self.transport.send(request).await?;
            self.read_single(method_kind, response).await
        };
        guard
            .run(call)
            .instrument(self.span(procedure, method_kind))
            .await
    }

    /// Make a bidirectional streaming RPC call.
    ///
    /// Whether responses arrive while requests are still being sent depends
    /// on the transport; HTTP/1.1 transports usually finish the request
    /// first.
    pub async fn call_bidi_stream<Req, Res, S>(
        &self,
        procedure: &str,
        requests: S,
    ) -> Result<ConnectResponse<Streaming<Res>>, ConnectError>
    where
        Req: RpcMessage,
        Res: RpcMessage,
        S: Stream<Item = Req> + Send + 'static,
    {
        self.call_bidi_stream_with_options(procedure, requests, CallOptions::default())
            .await
    }

    pub async fn call_bidi_stream_with_options<Req, Res, S>(
        &self,
        procedure: &str,
        requests: S,
        options: CallOptions,
    ) -> Result<ConnectResponse<Streaming<Res>>, ConnectError>
    where
        Req: RpcMessage,
        Res: RpcMessage,
        S: Stream<Item = Req> + Send + 'static,
    {
        let method_kind = MethodKind::BiDiStreaming;
        let guard = self.guard(&options);
        let call = async {
            let body = self.streaming_body(method_kind, requests);
            let request = self.build_request(
                procedure,
                method_kind,
                &options,
                &guard,
                self.send_compression.as_ref(),
                body,
            )?;
            let response = self.transport.send(request).await?;
            self.open_stream::<Res>(method_kind, response).await
        };
        let response = guard
            .run(call)
            .instrument(self.span(procedure, method_kind))
            .await?;
        Ok(response.map(|streaming| guard.attach(streaming)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::cancel_pair;
    use futures::future::BoxFuture;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
    struct Ping {
        #[prost(string, tag = "1")]
        text: String,
    }

    impl prost::Name for Ping {
        const NAME: &'static str = "Ping";
        const PACKAGE: &'static str = "test.v1";
    }

    /// Records the request and never answers.
    #[derive(Clone, Default)]
    struct Recorder {
        seen: Arc<Mutex<Option<http::request::Parts>>>,
    }

    impl Transport for Recorder {
        fn send(
            &self,
            request: http::Request<TransportBody>,
        ) -> BoxFuture<'static, Result<http::Response<ResponseBody>, ConnectError>> {
            let (parts, _) = request.into_parts();
            if let Ok(mut seen) = self.seen.lock() {
                *seen = Some(parts);
            }
            Box::pin(std::future::pending())
        }
    }

    fn client(recorder: &Recorder) -> ConnectClient<Recorder> {
        ClientBuilder::new("http://localhost:3000/", recorder.clone())
            .header("x-default", "1")
            .build()
            .unwrap()
    }

    fn ping() -> Ping {
        Ping { text: "hi".into() }
    }

    #[tokio::test(start_paused = true)]
    async fn test_unary_deadline() {
        let recorder = Recorder::default();
        let client = client(&recorder);
        let options = CallOptions::new().timeout(Duration::from_millis(250));
        let err = client
            .call_unary_with_options::<Ping, Ping>("/test.v1.Svc/Ping", &ping(), options)
            .await
            .unwrap_err();
        assert_eq!(err.code(), connectrpc_wire_core::Code::DeadlineExceeded);

        let parts = recorder.seen.lock().unwrap().take().unwrap();
        assert_eq!(parts.method, Method::POST);
        assert_eq!(parts.uri, "http://localhost:3000/test.v1.Svc/Ping");
        assert_eq!(parts.headers.get("connect-timeout-ms").unwrap(), "250");
        assert_eq!(parts.headers.get("x-default").unwrap(), "1");
    }

    #[tokio::test]
    async fn test_unary_cancel() {
        let recorder = Recorder::default();
        let client = client(&recorder);
        let (handle, signal) = cancel_pair();
        let options = CallOptions::new().cancel_signal(signal);
        let request = ping();
        let call = client.call_unary_with_options::<Ping, Ping>("test.v1.Svc/Ping", &request, options);
        let cancel = async {
            tokio::task::yield_now().await;
            handle.cancel();
        };
        let (result, ()) = tokio::join!(call, cancel);
        assert_eq!(
            result.unwrap_err().code(),
            connectrpc_wire_core::Code::Canceled
        );
    }

    #[tokio::test]
    async fn test_already_canceled_call_is_not_sent() {
        let recorder = Recorder::default();
        let client = client(&recorder);
        let (handle, signal) = cancel_pair();
        handle.cancel();
        let err = client
            .call_unary_with_options::<Ping, Ping>(
                "test.v1.Svc/Ping",
                &ping(),
                CallOptions::new().cancel_signal(signal),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), connectrpc_wire_core::Code::Canceled);
        assert!(recorder.seen.lock().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reserved_call_headers_are_dropped() {
        let recorder = Recorder::default();
        let client = client(&recorder);
        let options = CallOptions::new()
            .timeout(Duration::from_millis(10))
            .header("connect-protocol-version", "9")
            .header("grpc-status", "0")
            .header("authorization", "Bearer t");
        let _ = client
            .call_unary_with_options::<Ping, Ping>("test.v1.Svc/Ping", &ping(), options)
            .await;
        let parts = recorder.seen.lock().unwrap().take().unwrap();
        assert_eq!(parts.headers.get("connect-protocol-version").unwrap(), "1");
        assert!(parts.headers.get("grpc-status").is_none());
        assert_eq!(parts.headers.get("authorization").unwrap(), "Bearer t");
    }

    static CHUNK: [u8; 1024] = [b' '; 1024];

    /// Answers with the given status and a JSON body that never ends.
    #[derive(Clone)]
    struct Endless(StatusCode);

    impl Transport for Endless {
        fn send(
            &self,
            _request: http::Request<TransportBody>,
        ) -> BoxFuture<'static, Result<http::Response<ResponseBody>, ConnectError>> {
            let chunks = futures::stream::repeat_with(|| {
                Ok::<_, ConnectError>(http_body::Frame::data(Bytes::from_static(&CHUNK)))
            });
            let mut response =
                http::Response::new(http_body_util::StreamBody::new(chunks).boxed_unsync());
            *response.status_mut() = self.0;
            response.headers_mut().insert(
                http::header::CONTENT_TYPE,
                http::HeaderValue::from_static("application/json"),
            );
            Box::pin(async move { Ok(response) })
        }
    }

    #[tokio::test]
    async fn test_unary_body_read_stops_at_limit() {
        for status in [StatusCode::OK, StatusCode::INTERNAL_SERVER_ERROR] {
            let client = ClientBuilder::new("http://localhost:3000", Endless(status))
                .read_max_bytes(4096)
                .build()
                .unwrap();
            let err = client
                .call_unary::<Ping, Ping>("test.v1.Svc/Ping", &ping())
                .await
                .unwrap_err();
            assert_eq!(
                err.code(),
                connectrpc_wire_core::Code::ResourceExhausted,
                "{status}"
            );
        }
    }

    #[tokio::test]
    async fn test_write_limit_fails_before_sending() {
        let recorder = Recorder::default();
        let client = ClientBuilder::new("http://localhost:3000", recorder.clone())
            .write_max_bytes(1)
            .build()
            .unwrap();
        let err = client
            .call_unary::<Ping, Ping>("test.v1.Svc/Ping", &ping())
            .await
            .unwrap_err();
        assert_eq!(err.code(), connectrpc_wire_core::Code::ResourceExhausted);
        assert!(recorder.seen.lock().unwrap().is_none());
    }
}
