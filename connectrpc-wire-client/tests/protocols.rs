//! End-to-end calls over every protocol against the in-memory server.

mod common;

use std::time::Duration;

use bytes::Bytes;
use common::{Canned, Msg, PROTOCOLS, TestServer, matrix, msg, path};
use connectrpc_wire_client::{
    CallOptions, ClientBuilder, Code, CompressionRegistry, ConnectError, ProtocolKind, Streaming,
    cancel_pair,
};
use futures::StreamExt;
use http::StatusCode;

/// Open a server stream and collect it, folding early errors into the
/// result: Connect reports them in the stream, gRPC in the response head.
async fn collect_stream(
    stream: Result<connectrpc_wire_client::ConnectResponse<Streaming<Msg>>, ConnectError>,
) -> (Vec<Msg>, Option<ConnectError>, Option<Streaming<Msg>>) {
    let mut stream = match stream {
        Ok(response) => response.into_inner(),
        Err(err) => return (Vec::new(), Some(err), None),
    };
    let mut messages = Vec::new();
    let mut error = None;
    while let Some(item) = stream.next().await {
        match item {
            Ok(message) => messages.push(message),
            Err(err) => error = Some(err),
        }
    }
    (messages, error, Some(stream))
}

#[tokio::test]
async fn test_unary_round_trip() {
    for (protocol, binary) in matrix() {
        let server = TestServer::new();
        let client = server.client(protocol, binary).build().unwrap();
        let response = client
            .call_unary::<Msg, Msg>(&path("Echo"), &msg("hello", 7))
            .await
            .unwrap();
        assert_eq!(response.get_ref(), &msg("hello", 7), "{protocol} binary={binary}");
        assert_eq!(
            response.trailers().get("x-trailer"),
            Some("t"),
            "{protocol} binary={binary}"
        );
    }
}

#[tokio::test]
async fn test_unary_error_carries_code_message_and_metadata() {
    for (protocol, binary) in matrix() {
        let server = TestServer::new();
        let client = server.client(protocol, binary).build().unwrap();
        let err = client
            .call_unary::<Msg, Msg>(&path("Fail"), &msg("", 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::NotFound, "{protocol} binary={binary}");
        assert_eq!(err.raw_message(), "no such thing");
        assert_eq!(
            err.metadata().get("x-reason").unwrap(),
            "missing",
            "{protocol} binary={binary}"
        );
    }
}

#[tokio::test]
async fn test_server_stream_messages_and_trailers() {
    for (protocol, binary) in matrix() {
        let server = TestServer::new();
        let client = server.client(protocol, binary).build().unwrap();
        let response = client
            .call_server_stream::<Msg, Msg>(&path("Count"), &msg("", 3))
            .await;
        let (messages, error, stream) = collect_stream(response).await;
        assert!(error.is_none(), "{protocol} binary={binary}: {error:?}");
        assert_eq!(
            messages,
            vec![msg("item-0", 0), msg("item-1", 1), msg("item-2", 2)]
        );
        let stream = stream.unwrap();
        assert!(stream.is_finished());
        assert_eq!(
            stream.trailers().unwrap().get("x-count"),
            Some("3"),
            "{protocol} binary={binary}"
        );
    }
}

#[tokio::test]
async fn test_server_stream_empty() {
    for protocol in PROTOCOLS {
        let server = TestServer::new();
        let client = server.client(protocol, true).build().unwrap();
        let response = client
            .call_server_stream::<Msg, Msg>(&path("Count"), &msg("", 0))
            .await;
        let (messages, error, _) = collect_stream(response).await;
        assert!(messages.is_empty());
        assert!(error.is_none(), "{protocol}: {error:?}");
    }
}

#[tokio::test]
async fn test_server_stream_error_after_messages() {
    for (protocol, binary) in matrix() {
        let server = TestServer::new();
        let client = server.client(protocol, binary).build().unwrap();
        let response = client
            .call_server_stream::<Msg, Msg>(&path("CountThenFail"), &msg("", 0))
            .await;
        let (messages, error, _) = collect_stream(response).await;
        assert_eq!(messages.len(), 2, "{protocol} binary={binary}");
        let error = error.unwrap();
        assert_eq!(error.code(), Code::ResourceExhausted);
        assert_eq!(error.raw_message(), "quota");
    }
}

#[tokio::test]
async fn test_client_stream() {
    for (protocol, binary) in matrix() {
        let server = TestServer::new();
        let client = server.client(protocol, binary).build().unwrap();
        let requests = futures::stream::iter(vec![msg("a", 1), msg("b", 2), msg("c", 3)]);
        let response = client
            .call_client_stream::<Msg, Msg, _>(&path("Sum"), requests)
            .await
            .unwrap();
        assert_eq!(response.into_inner(), msg("a,b,c", 6), "{protocol} binary={binary}");
    }
}

#[tokio::test]
async fn test_client_stream_requires_exactly_one_response() {
    for protocol in PROTOCOLS {
        let server = TestServer::new();
        let client = server.client(protocol, false).build().unwrap();

        let err = client
            .call_client_stream::<Msg, Msg, _>(&path("Nothing"), futures::stream::iter(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented, "{protocol}");

        let err = client
            .call_client_stream::<Msg, Msg, _>(
                &path("Twice"),
                futures::stream::iter(vec![msg("x", 0)]),
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unimplemented, "{protocol}");
    }
}

#[tokio::test]
async fn test_bidi_stream() {
    for (protocol, binary) in matrix() {
        let server = TestServer::new();
        let client = server.client(protocol, binary).build().unwrap();
        let requests = futures::stream::iter(vec![msg("hello", 1), msg("world", 2)]);
        let response = client
            .call_bidi_stream::<Msg, Msg, _>(&path("Chat"), requests)
            .await
            .unwrap();
        let mut stream = response.into_inner();
        let mut replies = Vec::new();
        while let Some(reply) = stream.next().await {
            replies.push(reply.unwrap());
        }
        assert_eq!(
            replies,
            vec![msg("HELLO", 1), msg("WORLD", 2)],
            "{protocol} binary={binary}"
        );
    }
}

#[tokio::test]
async fn test_timeout_is_propagated() {
    for protocol in PROTOCOLS {
        let server = TestServer::new();
        let client = server.client(protocol, false).build().unwrap();

        let options = CallOptions::new().timeout(Duration::from_secs(5));
        let response = client
            .call_unary_with_options::<Msg, Msg>(&path("Deadline"), &msg("", 0), options)
            .await
            .unwrap();
        assert_eq!(response.into_inner(), msg("deadline", 5000), "{protocol}");

        let response = client
            .call_unary::<Msg, Msg>(&path("Deadline"), &msg("", 0))
            .await
            .unwrap();
        assert_eq!(response.into_inner(), msg("none", 0), "{protocol}");
    }

    let server = TestServer::new();
    let client = server
        .client(ProtocolKind::Grpc, true)
        .timeout(Duration::from_millis(1500))
        .build()
        .unwrap();
    let response = client
        .call_unary::<Msg, Msg>(&path("Deadline"), &msg("", 0))
        .await
        .unwrap();
    assert_eq!(response.into_inner().n, 1500);
    assert!(server.last_headers().contains_key("grpc-timeout"));
}

#[tokio::test(start_paused = true)]
async fn test_unary_deadline_exceeded() {
    for protocol in PROTOCOLS {
        let server = TestServer::new();
        let client = server
            .client(protocol, true)
            .timeout(Duration::from_millis(100))
            .build()
            .unwrap();
        let err = client
            .call_unary::<Msg, Msg>(&path("Slow"), &msg("", 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded, "{protocol}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_stream_deadline_exceeded_mid_stream() {
    for protocol in PROTOCOLS {
        let server = TestServer::new();
        let client = server.client(protocol, true).build().unwrap();
        let options = CallOptions::new().timeout(Duration::from_millis(100));
        let response = client
            .call_server_stream_with_options::<Msg, Msg>(&path("Stall"), &msg("", 0), options)
            .await
            .unwrap();
        let mut stream = response.into_inner();
        assert_eq!(stream.next().await.unwrap().unwrap(), msg("first", 0));
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::DeadlineExceeded, "{protocol}");
        assert!(stream.next().await.is_none());
    }
}

#[tokio::test]
async fn test_stream_cancel_mid_stream() {
    for protocol in PROTOCOLS {
        let server = TestServer::new();
        let client = server.client(protocol, false).build().unwrap();
        let (handle, signal) = cancel_pair();
        let options = CallOptions::new().cancel_signal(signal);
        let response = client
            .call_server_stream_with_options::<Msg, Msg>(&path("Stall"), &msg("", 0), options)
            .await
            .unwrap();
        let mut stream = response.into_inner();
        assert!(stream.next().await.unwrap().is_ok());
        handle.cancel();
        let err = stream.next().await.unwrap().unwrap_err();
        assert_eq!(err.code(), Code::Canceled, "{protocol}");
    }
}

#[tokio::test]
async fn test_request_compression_headers() {
    let expected = [
        (ProtocolKind::Connect, "content-encoding"),
        (ProtocolKind::Grpc, "grpc-encoding"),
        (ProtocolKind::GrpcWeb, "grpc-encoding"),
    ];
    for (protocol, header) in expected {
        let server = TestServer::new();
        let client = server
            .client(protocol, true)
            .send_compression("gzip")
            .build()
            .unwrap();
        let response = client
            .call_unary::<Msg, Msg>(&path("Echo"), &msg("compressed request", 1))
            .await
            .unwrap();
        assert_eq!(response.into_inner(), msg("compressed request", 1));
        assert_eq!(
            server.last_headers().get(header).unwrap(),
            "gzip",
            "{protocol}"
        );
    }

    // Connect streams declare the encoding in a connect- prefixed header.
    let server = TestServer::new();
    let client = server
        .client(ProtocolKind::Connect, false)
        .send_compression("gzip")
        .build()
        .unwrap();
    let requests = futures::stream::iter(vec![msg("a", 1), msg("b", 2)]);
    let response = client
        .call_client_stream::<Msg, Msg, _>(&path("Sum"), requests)
        .await
        .unwrap();
    assert_eq!(response.into_inner(), msg("a,b", 3));
    let headers = server.last_headers();
    assert_eq!(headers.get("connect-content-encoding").unwrap(), "gzip");
    let accept = headers.get("connect-accept-encoding").unwrap().to_str().unwrap();
    assert!(accept.starts_with("gzip"), "{accept}");
}

#[tokio::test]
async fn test_unsupported_request_encoding_is_invalid_argument() {
    for protocol in PROTOCOLS {
        let server = TestServer::with_registry(CompressionRegistry::new());
        let client = server
            .client(protocol, true)
            .send_compression("gzip")
            .build()
            .unwrap();
        let err = client
            .call_unary::<Msg, Msg>(&path("Echo"), &msg("compressed request", 1))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::InvalidArgument, "{protocol}");
        assert!(err.raw_message().contains("unknown compression"), "{protocol}");
    }
}

#[tokio::test]
async fn test_response_compression_is_negotiated() {
    let expected = [
        (ProtocolKind::Connect, "content-encoding"),
        (ProtocolKind::Grpc, "grpc-encoding"),
        (ProtocolKind::GrpcWeb, "grpc-encoding"),
    ];
    for (protocol, header) in expected {
        let server = TestServer::new();
        let client = server.client(protocol, false).build().unwrap();
        let response = client
            .call_unary::<Msg, Msg>(&path("Echo"), &msg("compressed response", 2))
            .await
            .unwrap();
        assert_eq!(response.metadata().get(header), Some("gzip"), "{protocol}");
        assert_eq!(response.into_inner(), msg("compressed response", 2));

        // Without an accept header the server answers uncompressed.
        let client = server
            .client(protocol, false)
            .registry(CompressionRegistry::new())
            .build()
            .unwrap();
        let response = client
            .call_unary::<Msg, Msg>(&path("Echo"), &msg("plain", 3))
            .await
            .unwrap();
        assert!(response.metadata().get(header).is_none(), "{protocol}");
        assert_eq!(response.into_inner(), msg("plain", 3));
    }
}

#[tokio::test]
async fn test_read_limit() {
    for protocol in PROTOCOLS {
        let server = TestServer::new();
        let client = server
            .client(protocol, false)
            .registry(CompressionRegistry::new())
            .read_max_bytes(8)
            .build()
            .unwrap();
        let err = client
            .call_unary::<Msg, Msg>(&path("Echo"), &msg("a response over the limit", 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::ResourceExhausted, "{protocol}");
    }
}

#[tokio::test]
async fn test_write_limit_on_stream() {
    let server = TestServer::new();
    let client = server
        .client(ProtocolKind::Connect, false)
        .write_max_bytes(8)
        .build()
        .unwrap();
    let requests = futures::stream::iter(vec![msg("a request over the limit", 0)]);
    let err = client
        .call_client_stream::<Msg, Msg, _>(&path("Sum"), requests)
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::ResourceExhausted);
}

#[tokio::test]
async fn test_unknown_response_encoding_is_internal() {
    let transport = Canned::new(
        StatusCode::OK,
        &[("content-type", "application/json"), ("content-encoding", "lz4")],
        Bytes::from_static(b"{}"),
    );
    let client = ClientBuilder::new("http://test.local", transport)
        .build()
        .unwrap();
    let err = client
        .call_unary::<Msg, Msg>(&path("Echo"), &msg("", 0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Internal);
}

#[tokio::test]
async fn test_unexpected_content_type_is_internal() {
    let transport = Canned::new(
        StatusCode::OK,
        &[("content-type", "text/html")],
        Bytes::from_static(b"<html></html>"),
    );
    for protocol in PROTOCOLS {
        let client = ClientBuilder::new("http://test.local", transport.clone())
            .protocol(protocol)
            .build()
            .unwrap();
        let err = client
            .call_unary::<Msg, Msg>(&path("Echo"), &msg("", 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Internal, "{protocol}");
    }
}

#[tokio::test]
async fn test_http_status_maps_to_code() {
    let transport = Canned::new(StatusCode::SERVICE_UNAVAILABLE, &[], Bytes::new());
    for protocol in PROTOCOLS {
        let client = ClientBuilder::new("http://test.local", transport.clone())
            .protocol(protocol)
            .build()
            .unwrap();
        let err = client
            .call_unary::<Msg, Msg>(&path("Echo"), &msg("", 0))
            .await
            .unwrap_err();
        assert_eq!(err.code(), Code::Unavailable, "{protocol}");
    }
}

#[tokio::test]
async fn test_unknown_route_is_unimplemented() {
    let server = TestServer::new();
    let client = server.client(ProtocolKind::Connect, false).build().unwrap();
    let err = client
        .call_unary::<Msg, Msg>(&path("Missing"), &msg("", 0))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::Unimplemented);
}
