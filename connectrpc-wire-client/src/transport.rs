//! HTTP transport seam.
//!
//! The client never opens connections itself. It hands a fully built
//! [`http::Request`] to a [`Transport`] and reads the [`http::Response`] it
//! gets back, including trailers when the transport surfaces them as
//! `http_body` trailer frames.
//!
//! # Example
//!
//! ```ignore
//! use connectrpc_wire_client::transport::{ResponseBody, Transport, TransportBody};
//!
//! #[derive(Clone)]
//! struct MyTransport { /* connection pool */ }
//!
//! impl Transport for MyTransport {
//!     fn send(
//!         &self,
//!         request: http::Request<TransportBody>,
//!     ) -> BoxFuture<'static, Result<http::Response<ResponseBody>, ConnectError>> {
//!         // Map connection failures to Code::Unavailable.
//!         todo!()
//!     }
//! }
//! ```

mod body;

use std::sync::Arc;

use bytes::Bytes;
use connectrpc_wire_core::ConnectError;
use futures::future::BoxFuture;
use http_body_util::BodyExt;
use http_body_util::combinators::UnsyncBoxBody;

pub use body::TransportBody;

/// Response body handed back by a [`Transport`].
pub type ResponseBody = UnsyncBoxBody<Bytes, ConnectError>;

/// Sends one HTTP request and resolves to its response head.
///
/// Implementations report connection-level failures as
/// [`Code::Unavailable`](connectrpc_wire_core::Code::Unavailable). The
/// response body is read lazily by the caller.
pub trait Transport: Send + Sync + 'static {
    fn send(
        &self,
        request: http::Request<TransportBody>,
    ) -> BoxFuture<'static, Result<http::Response<ResponseBody>, ConnectError>>;
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    fn send(
        &self,
        request: http::Request<TransportBody>,
    ) -> BoxFuture<'static, Result<http::Response<ResponseBody>, ConnectError>> {
        (**self).send(request)
    }
}

/// Box any body whose error converts into [`ConnectError`].
pub fn box_response_body<B>(body: B) -> ResponseBody
where
    B: http_body::Body<Data = Bytes> + Send + 'static,
    B::Error: Into<ConnectError>,
{
    body.map_err(Into::into).boxed_unsync()
}

/// An HTTP-level failure from a transport, as [`Code::Unavailable`].
///
/// [`Code::Unavailable`]: connectrpc_wire_core::Code::Unavailable
pub fn transport_error(err: impl std::fmt::Display) -> ConnectError {
    ConnectError::unavailable(format!("transport error: {err}"))
}
