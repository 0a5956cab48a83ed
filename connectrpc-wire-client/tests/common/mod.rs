//! In-memory server for client integration tests.
//!
//! `TestServer` implements [`Transport`] by running a tiny handler built
//! on the handler-side API of `connectrpc-wire-core`, so every call goes
//! through real request and response encoding for all three protocols.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use connectrpc_wire_client::{
    ClientBuilder, ConnectError, ProtocolKind, ResponseBody, Transport, TransportBody,
};
use connectrpc_wire_core::{
    CompressionConfig, CompressionLevel, CompressionRegistry, EndOfStream, EnvelopeReader,
    ErrorResponse, Frame, MessageLimits, MethodKind, Protocol, RequestHead, create_serialization,
};
use futures::StreamExt;
use futures::future::BoxFuture;
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use http_body::Frame as BodyFrame;
use http_body_util::{BodyExt, StreamBody};

pub const SERVICE: &str = "test.v1.TestService";

#[derive(Clone, PartialEq, prost::Message, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Msg {
    #[prost(string, tag = "1")]
    pub text: String,
    #[prost(int32, tag = "2")]
    pub n: i32,
}

impl prost::Name for Msg {
    const NAME: &'static str = "Msg";
    const PACKAGE: &'static str = "test.v1";
}

pub fn msg(text: &str, n: i32) -> Msg {
    Msg {
        text: text.to_string(),
        n,
    }
}

pub fn path(method: &str) -> String {
    format!("{SERVICE}/{method}")
}

pub const PROTOCOLS: [ProtocolKind; 3] =
    [ProtocolKind::Connect, ProtocolKind::Grpc, ProtocolKind::GrpcWeb];

/// Every protocol with JSON and binary payloads.
pub fn matrix() -> impl Iterator<Item = (ProtocolKind, bool)> {
    PROTOCOLS
        .into_iter()
        .flat_map(|protocol| [(protocol, false), (protocol, true)])
}

fn method_kind(method: &str) -> Option<MethodKind> {
    match method {
        "Echo" | "Fail" | "Deadline" | "Slow" => Some(MethodKind::Unary),
        "Count" | "CountThenFail" | "Stall" => Some(MethodKind::ServerStreaming),
        "Sum" | "Nothing" | "Twice" => Some(MethodKind::ClientStreaming),
        "Chat" => Some(MethodKind::BiDiStreaming),
        _ => None,
    }
}

#[derive(Default)]
struct Reply {
    messages: Vec<Msg>,
    error: Option<ConnectError>,
    trailers: HeaderMap,
    /// Keep the body open after the messages.
    stall: bool,
}

impl Reply {
    fn messages(messages: Vec<Msg>) -> Self {
        Self {
            messages,
            ..Default::default()
        }
    }

    fn error(error: ConnectError) -> Self {
        Self {
            error: Some(error),
            ..Default::default()
        }
    }

    fn trailer(mut self, name: &'static str, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.trailers.insert(name, value);
        }
        self
    }
}

async fn respond(method: &str, head: &RequestHead, requests: Vec<Msg>) -> Reply {
    match method {
        "Echo" => Reply::messages(requests).trailer("x-trailer", "t"),
        "Fail" => Reply::error(
            ConnectError::not_found("no such thing").with_meta("x-reason", "missing"),
        ),
        "Deadline" => {
            let millis = head.timeout.map_or(0, |t| t.as_millis() as i32);
            let text = if head.timeout.is_some() { "deadline" } else { "none" };
            Reply::messages(vec![msg(text, millis)])
        }
        "Count" => {
            let n = requests.first().map_or(0, |r| r.n);
            let items = (0..n).map(|i| msg(&format!("item-{i}"), i)).collect();
            Reply::messages(items).trailer("x-count", &n.to_string())
        }
        "CountThenFail" => Reply {
            messages: vec![msg("a", 0), msg("b", 1)],
            error: Some(ConnectError::resource_exhausted("quota")),
            ..Default::default()
        },
        "Stall" => Reply {
            messages: vec![msg("first", 0)],
            stall: true,
            ..Default::default()
        },
        "Sum" => {
            let text = requests
                .iter()
                .map(|r| r.text.as_str())
                .collect::<Vec<_>>()
                .join(",");
            let n = requests.iter().map(|r| r.n).sum();
            Reply::messages(vec![msg(&text, n)])
        }
        "Nothing" => Reply::default(),
        "Twice" => Reply::messages(vec![msg("one", 1), msg("two", 2)]),
        "Chat" => Reply::messages(
            requests
                .into_iter()
                .map(|r| msg(&r.text.to_uppercase(), r.n))
                .collect(),
        ),
        _ => std::future::pending().await,
    }
}

struct State {
    registry: CompressionRegistry,
    requests: Mutex<Vec<HeaderMap>>,
}

#[derive(Clone)]
pub struct TestServer {
    state: Arc<State>,
}

impl Default for TestServer {
    fn default() -> Self {
        Self::new()
    }
}

impl TestServer {
    pub fn new() -> Self {
        Self::with_registry(CompressionRegistry::builtin(CompressionLevel::Default))
    }

    pub fn with_registry(registry: CompressionRegistry) -> Self {
        Self {
            state: Arc::new(State {
                registry,
                requests: Mutex::new(Vec::new()),
            }),
        }
    }

    pub fn client(&self, protocol: ProtocolKind, binary: bool) -> ClientBuilder<TestServer> {
        let builder = ClientBuilder::new("http://test.local", self.clone()).protocol(protocol);
        if binary { builder.use_proto() } else { builder.use_json() }
    }

    /// Headers of the most recent request.
    pub fn last_headers(&self) -> HeaderMap {
        self.state
            .requests
            .lock()
            .unwrap()
            .last()
            .cloned()
            .unwrap_or_default()
    }

    async fn handle(
        self,
        request: http::Request<TransportBody>,
    ) -> Result<http::Response<ResponseBody>, ConnectError> {
        let (parts, body) = request.into_parts();
        self.state
            .requests
            .lock()
            .unwrap()
            .push(parts.headers.clone());

        let method = parts
            .uri
            .path()
            .trim_start_matches('/')
            .strip_prefix(SERVICE)
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or_default()
            .to_string();
        let Some(method_kind) = method_kind(&method) else {
            return Ok(plain(StatusCode::NOT_FOUND));
        };
        let content_type = parts.headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok());
        let Some(kind) = ProtocolKind::detect(content_type) else {
            return Ok(plain(StatusCode::UNSUPPORTED_MEDIA_TYPE));
        };
        let protocol = kind.protocol();
        let registry = &self.state.registry;

        let head = match protocol.negotiate_request(method_kind, &parts.headers, registry) {
            Ok(head) => head,
            Err(err) => return Ok(error_response(protocol.encode_error(method_kind, false, &err))),
        };
        let body = body.collect().await?.to_bytes();
        let requests = match decode_requests(protocol, method_kind, &head, body) {
            Ok(requests) => requests,
            Err(err) => {
                return Ok(error_response(
                    protocol.encode_error(method_kind, head.binary, &err),
                ));
            }
        };

        let reply = respond(&method, &head, requests).await;
        if reply.messages.is_empty() {
            if let Some(err) = &reply.error {
                return Ok(error_response(
                    protocol.encode_error(method_kind, head.binary, err),
                ));
            }
        }

        let mut headers = protocol.response_headers(
            method_kind,
            head.binary,
            head.response_compression.as_ref(),
            registry,
        );
        let serialization = create_serialization::<Msg>(head.binary);
        let mut frames = Vec::new();
        for message in &reply.messages {
            let wrapped = protocol.wrap_message(
                method_kind,
                serialization.serialize(message)?,
                head.response_compression.as_ref(),
                &CompressionConfig::default(),
                &MessageLimits::default(),
            )?;
            frames.push(BodyFrame::data(wrapped.data));
        }

        if !reply.stall {
            match protocol.encode_end_of_stream(method_kind, reply.error.as_ref(), &reply.trailers)? {
                EndOfStream::Body(bytes) => frames.push(BodyFrame::data(bytes)),
                EndOfStream::Trailers(trailers) => frames.push(BodyFrame::trailers(trailers)),
                EndOfStream::Headers(extra) => headers.extend(extra),
            }
        }

        let frames = futures::stream::iter(frames.into_iter().map(Ok::<_, ConnectError>));
        let body = if reply.stall {
            StreamBody::new(frames.chain(futures::stream::pending())).boxed_unsync()
        } else {
            StreamBody::new(frames).boxed_unsync()
        };
        let mut response = http::Response::new(body);
        *response.headers_mut() = headers;
        Ok(response)
    }
}

impl Transport for TestServer {
    fn send(
        &self,
        request: http::Request<TransportBody>,
    ) -> BoxFuture<'static, Result<http::Response<ResponseBody>, ConnectError>> {
        Box::pin(self.clone().handle(request))
    }
}

fn decode_requests(
    protocol: &dyn Protocol,
    method_kind: MethodKind,
    head: &RequestHead,
    body: Bytes,
) -> Result<Vec<Msg>, ConnectError> {
    let limits = MessageLimits::default();
    let payloads = if protocol.is_framed(method_kind) {
        let mut reader = EnvelopeReader::new();
        reader.push(&body);
        let mut payloads = Vec::new();
        while let Some(envelope) = reader.next_envelope()? {
            match protocol.unwrap_frame(envelope, head.request_compression.as_ref(), &limits)? {
                Frame::Message(payload) => payloads.push(payload),
                Frame::End(_) => break,
            }
        }
        reader.finish()?;
        payloads
    } else {
        vec![protocol.unwrap_unary_body(body, head.request_compression.as_ref(), &limits)?]
    };

    let serialization = create_serialization::<Msg>(head.binary);
    payloads.iter().map(|p| serialization.parse(p)).collect()
}

fn full(bytes: Bytes) -> ResponseBody {
    http_body_util::Full::new(bytes)
        .map_err(|never| match never {})
        .boxed_unsync()
}

fn plain(status: StatusCode) -> http::Response<ResponseBody> {
    let mut response = http::Response::new(full(Bytes::new()));
    *response.status_mut() = status;
    response
}

fn error_response(error: ErrorResponse) -> http::Response<ResponseBody> {
    let mut response = http::Response::new(full(error.body));
    *response.status_mut() = error.status;
    *response.headers_mut() = error.headers;
    response
}

/// Answers every request with the same response.
#[derive(Clone)]
pub struct Canned {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Canned {
    pub fn new(status: StatusCode, headers: &[(&'static str, &'static str)], body: Bytes) -> Self {
        let mut map = HeaderMap::new();
        for (name, value) in headers {
            map.append(*name, HeaderValue::from_static(value));
        }
        Self {
            status,
            headers: map,
            body,
        }
    }
}

impl Transport for Canned {
    fn send(
        &self,
        _request: http::Request<TransportBody>,
    ) -> BoxFuture<'static, Result<http::Response<ResponseBody>, ConnectError>> {
        let mut response = http::Response::new(full(self.body.clone()));
        *response.status_mut() = self.status;
        *response.headers_mut() = self.headers.clone();
        Box::pin(async move { Ok(response) })
    }
}
